use crate::columns::ColumnDef;
use crate::error::EngineError;
use ahash::AHashMap;
use regex::Regex;

/// Registry of data-key definitions, in declaration order.
///
/// Declaration order is observable (it drives column order in the output
/// tables), so the registry keeps a vector and only uses the hash map for
/// name lookup.
#[derive(Debug, Clone, Default)]
pub struct DataKeyRegistry {
    defs: Vec<ColumnDef>,
    by_name: AHashMap<String, usize>,
}

impl DataKeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition. An existing name is an error unless
    /// `replace` is set, in which case the definition is swapped in place
    /// (keeping its declaration position).
    pub fn register(&mut self, def: ColumnDef, replace: bool) -> Result<(), EngineError> {
        match self.by_name.get(&def.name) {
            Some(&idx) if replace => {
                self.defs[idx] = def;
                Ok(())
            }
            Some(_) => Err(EngineError::DuplicateKey(def.name)),
            None => {
                self.by_name.insert(def.name.clone(), self.defs.len());
                self.defs.push(def);
                Ok(())
            }
        }
    }

    pub fn resolve(&self, name: &str) -> Result<&ColumnDef, EngineError> {
        self.get(name)
            .ok_or_else(|| EngineError::UnknownKey(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&ColumnDef> {
        self.by_name.get(name).map(|&idx| &self.defs[idx])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// All definitions in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &ColumnDef> {
        self.defs.iter()
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Names matching the pattern, lazily, in declaration order. Used by
    /// key-enumeration tooling.
    pub fn keys_matching<'a>(&'a self, pattern: &'a Regex) -> impl Iterator<Item = &'a str> + 'a {
        self.defs
            .iter()
            .map(|def| def.name.as_str())
            .filter(move |name| pattern.is_match(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns::ColumnKind;
    use pretty_assertions::assert_eq;

    fn raw(name: &str) -> ColumnDef {
        ColumnDef::raw(name, name)
    }

    #[test]
    fn duplicate_registration_fails_without_replace() {
        let mut registry = DataKeyRegistry::new();
        registry.register(raw("Time"), false).unwrap();
        let err = registry.register(raw("Time"), false).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateKey(name) if name == "Time"));
    }

    #[test]
    fn replace_keeps_declaration_position() {
        let mut registry = DataKeyRegistry::new();
        registry.register(raw("Time"), false).unwrap();
        registry.register(raw("Nodes"), false).unwrap();
        registry
            .register(ColumnDef::raw("Time", "SolvingTime"), true)
            .unwrap();
        let names: Vec<&str> = registry.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Time", "Nodes"]);
        let def = registry.resolve("Time").unwrap();
        assert!(matches!(&def.kind, ColumnKind::Raw { source } if source == "SolvingTime"));
    }

    #[test]
    fn resolve_unknown_key_is_an_error() {
        let registry = DataKeyRegistry::new();
        assert!(matches!(
            registry.resolve("Gap"),
            Err(EngineError::UnknownKey(name)) if name == "Gap"
        ));
    }

    #[test]
    fn keys_matching_filters_by_regex() {
        let mut registry = DataKeyRegistry::new();
        for name in ["Time", "TimeLimit", "Nodes"] {
            registry.register(raw(name), false).unwrap();
        }
        let pattern = Regex::new("^Time").unwrap();
        let hits: Vec<&str> = registry.keys_matching(&pattern).collect();
        assert_eq!(hits, vec!["Time", "TimeLimit"]);
    }
}
