use crate::aggregate::AggregationSpec;
use crate::error::EngineError;
use ahash::AHashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use verdict_model::Value;

use crate::table::Table;

/// Comparison applied by a [`Filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Inclusive range over `value` .. `value2`.
    Between,
    /// Regex match on the rendered value.
    Matches,
    /// The only operator a missing value satisfies.
    IsMissing,
}

/// Right-hand side of a filter: a literal, or another column on the same
/// row (the evaluation files compare two data keys this way).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Literal(Value),
    Column(String),
}

/// A named predicate over one column of the enriched table.
///
/// Pure and total over any row: a missing operand never satisfies the
/// predicate unless the operator is `IsMissing`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub name: String,
    pub column: String,
    pub op: FilterOp,
    pub value: Option<Operand>,
    /// Upper bound for `Between`.
    pub value2: Option<Operand>,
}

impl Filter {
    pub fn new(
        name: impl Into<String>,
        column: impl Into<String>,
        op: FilterOp,
        value: Option<Operand>,
    ) -> Self {
        Self {
            name: name.into(),
            column: column.into(),
            op,
            value,
            value2: None,
        }
    }

    pub fn between(
        name: impl Into<String>,
        column: impl Into<String>,
        lo: Operand,
        hi: Operand,
    ) -> Self {
        Self {
            name: name.into(),
            column: column.into(),
            op: FilterOp::Between,
            value: Some(lo),
            value2: Some(hi),
        }
    }

    /// Columns this filter reads (for lazy column materialization).
    pub fn needed_columns(&self) -> Vec<&str> {
        let mut cols = vec![self.column.as_str()];
        for operand in [&self.value, &self.value2].into_iter().flatten() {
            if let Operand::Column(name) = operand {
                cols.push(name.as_str());
            }
        }
        cols
    }
}

/// How a group combines its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupJoin {
    /// Every member must hold (AND). Over zero members: the full table.
    All,
    /// Any member may hold (OR). Over zero members: the empty set.
    Any,
}

/// One member of a filter group, referenced by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GroupMember {
    Filter(String),
    Group(String),
}

/// A named, composable instance group.
///
/// Groups may reference other groups; the reference graph must be acyclic
/// (checked when the evaluation is built). `aggregations` optionally
/// overrides the column-level aggregation list for this group's summary
/// table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterGroup {
    pub name: String,
    pub join: GroupJoin,
    pub negate: bool,
    pub members: Vec<GroupMember>,
    pub aggregations: Vec<AggregationSpec>,
}

impl FilterGroup {
    pub fn new(name: impl Into<String>, join: GroupJoin) -> Self {
        Self {
            name: name.into(),
            join,
            negate: false,
            members: Vec::new(),
            aggregations: Vec::new(),
        }
    }

    pub fn with_member(mut self, member: GroupMember) -> Self {
        self.members.push(member);
        self
    }

    pub fn negated(mut self) -> Self {
        self.negate = true;
        self
    }
}

/// Evaluates group membership over one table, memoized per group.
///
/// Construction compiles every regex filter and validates member
/// references and acyclicity, so membership evaluation itself cannot fail.
#[derive(Debug)]
pub struct GroupEngine<'a> {
    filters: AHashMap<&'a str, &'a Filter>,
    groups: AHashMap<&'a str, &'a FilterGroup>,
    regexes: AHashMap<&'a str, Regex>,
    masks: AHashMap<String, Vec<bool>>,
}

impl<'a> GroupEngine<'a> {
    pub fn new(filters: &'a [Filter], groups: &'a [FilterGroup]) -> Result<Self, EngineError> {
        let mut filter_map: AHashMap<&str, &Filter> = AHashMap::new();
        for filter in filters {
            if filter_map.insert(filter.name.as_str(), filter).is_some() {
                return Err(EngineError::DuplicateKey(filter.name.clone()));
            }
        }
        let mut group_map: AHashMap<&str, &FilterGroup> = AHashMap::new();
        for group in groups {
            if group_map.insert(group.name.as_str(), group).is_some() {
                return Err(EngineError::DuplicateKey(group.name.clone()));
            }
        }

        let mut regexes: AHashMap<&str, Regex> = AHashMap::new();
        for filter in filters {
            if filter.op != FilterOp::Matches {
                continue;
            }
            let pattern = match &filter.value {
                Some(Operand::Literal(Value::Text(p))) => p.as_str(),
                _ => {
                    return Err(EngineError::BadRegex {
                        filter: filter.name.clone(),
                        message: "matches operator needs a text literal pattern".to_string(),
                    })
                }
            };
            let regex = Regex::new(pattern).map_err(|e| EngineError::BadRegex {
                filter: filter.name.clone(),
                message: e.to_string(),
            })?;
            regexes.insert(filter.name.as_str(), regex);
        }

        let engine = Self {
            filters: filter_map,
            groups: group_map,
            regexes,
            masks: AHashMap::new(),
        };
        engine.check_references()?;
        Ok(engine)
    }

    /// Validate member references and group acyclicity.
    fn check_references(&self) -> Result<(), EngineError> {
        for group in self.groups.values() {
            for member in &group.members {
                match member {
                    GroupMember::Filter(name) => {
                        if !self.filters.contains_key(name.as_str()) {
                            return Err(EngineError::UnknownFilter(name.clone()));
                        }
                    }
                    GroupMember::Group(name) => {
                        if !self.groups.contains_key(name.as_str()) {
                            return Err(EngineError::UnknownGroup(name.clone()));
                        }
                    }
                }
            }
        }

        // DFS over group-to-group edges; group names are unique.
        let mut done: AHashMap<&str, bool> = AHashMap::new();
        let mut names: Vec<&str> = self.groups.keys().copied().collect();
        names.sort_unstable();
        for start in names {
            if done.contains_key(start) {
                continue;
            }
            self.visit(start, &mut Vec::new(), &mut done)?;
        }
        Ok(())
    }

    fn visit(
        &self,
        name: &'a str,
        path: &mut Vec<String>,
        done: &mut AHashMap<&'a str, bool>,
    ) -> Result<(), EngineError> {
        if let Some(&finished) = done.get(name) {
            if finished {
                return Ok(());
            }
            let cycle_start = path.iter().position(|p| p == name).unwrap_or(0);
            let mut cycle = path[cycle_start..].to_vec();
            cycle.push(name.to_string());
            return Err(EngineError::CyclicDependency { path: cycle });
        }
        done.insert(name, false);
        path.push(name.to_string());
        // Reference validity was checked before the cycle pass.
        if let Some(group) = self.groups.get(name) {
            for member in &group.members {
                if let GroupMember::Group(child) = member {
                    if let Some((&key, _)) = self.groups.get_key_value(child.as_str()) {
                        self.visit(key, path, done)?;
                    }
                }
            }
        }
        path.pop();
        done.insert(name, true);
        Ok(())
    }

    /// Row indices of the group's members, in table row order.
    ///
    /// Memoized: repeated calls for the same group reuse the computed mask,
    /// so membership is idempotent by construction.
    pub fn membership(&mut self, group: &str, table: &Table) -> Result<Vec<usize>, EngineError> {
        let mask = self.group_mask(group, table)?;
        Ok(mask
            .iter()
            .enumerate()
            .filter_map(|(idx, &keep)| keep.then_some(idx))
            .collect())
    }

    fn group_mask(&mut self, name: &str, table: &Table) -> Result<Vec<bool>, EngineError> {
        if let Some(mask) = self.masks.get(name) {
            return Ok(mask.clone());
        }
        let group = *self
            .groups
            .get(name)
            .ok_or_else(|| EngineError::UnknownGroup(name.to_string()))?;

        let mut mask = match group.join {
            GroupJoin::All => vec![true; table.len()],
            GroupJoin::Any => vec![false; table.len()],
        };
        for member in &group.members {
            let member_mask = match member {
                GroupMember::Filter(filter_name) => {
                    let filter = *self
                        .filters
                        .get(filter_name.as_str())
                        .ok_or_else(|| EngineError::UnknownFilter(filter_name.clone()))?;
                    let regex = self.regexes.get(filter_name.as_str());
                    (0..table.len())
                        .map(|row| evaluate_filter(filter, regex, table, row))
                        .collect::<Vec<bool>>()
                }
                GroupMember::Group(child) => self.group_mask(child, table)?,
            };
            for (acc, hit) in mask.iter_mut().zip(member_mask) {
                match group.join {
                    GroupJoin::All => *acc = *acc && hit,
                    GroupJoin::Any => *acc = *acc || hit,
                }
            }
        }
        if group.negate {
            for slot in mask.iter_mut() {
                *slot = !*slot;
            }
        }
        self.masks.insert(name.to_string(), mask.clone());
        Ok(mask)
    }
}

/// Evaluate one filter on one row. Pure and total.
fn evaluate_filter(filter: &Filter, regex: Option<&Regex>, table: &Table, row: usize) -> bool {
    let lhs = table.value(row, &filter.column);

    if filter.op == FilterOp::IsMissing {
        return lhs.is_missing();
    }
    if lhs.is_missing() {
        return false;
    }

    let resolve = |operand: &Option<Operand>| -> Option<Value> {
        match operand {
            Some(Operand::Literal(v)) => Some(v.clone()),
            Some(Operand::Column(name)) => Some(table.value(row, name).clone()),
            None => None,
        }
    };

    match filter.op {
        FilterOp::Eq => match resolve(&filter.value) {
            Some(rhs) => lhs.loose_eq(&rhs),
            None => false,
        },
        FilterOp::Ne => match resolve(&filter.value) {
            Some(rhs) => !rhs.is_missing() && !lhs.loose_eq(&rhs),
            None => false,
        },
        FilterOp::Lt | FilterOp::Le | FilterOp::Gt | FilterOp::Ge => {
            let Some(rhs) = resolve(&filter.value) else {
                return false;
            };
            match lhs.loose_cmp(&rhs) {
                Some(ordering) => match filter.op {
                    FilterOp::Lt => ordering.is_lt(),
                    FilterOp::Le => ordering.is_le(),
                    FilterOp::Gt => ordering.is_gt(),
                    FilterOp::Ge => ordering.is_ge(),
                    _ => unreachable!(),
                },
                None => false,
            }
        }
        FilterOp::Between => {
            let (Some(lo), Some(hi)) = (resolve(&filter.value), resolve(&filter.value2)) else {
                return false;
            };
            matches!(lhs.loose_cmp(&lo), Some(o) if o.is_ge())
                && matches!(lhs.loose_cmp(&hi), Some(o) if o.is_le())
        }
        FilterOp::Matches => match regex {
            Some(regex) => regex.is_match(&lhs.to_string()),
            None => {
                debug_assert!(false, "matches filter without a compiled regex");
                false
            }
        },
        FilterOp::IsMissing => unreachable!(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn table() -> Table {
        let mut t = Table::new(vec!["Problem".into(), "Time".into(), "Status".into()]);
        t.push_row(vec!["mip_easy".into(), Value::Number(1.0), "ok".into()]);
        t.push_row(vec!["mip_hard".into(), Value::Number(90.0), "timelimit".into()]);
        t.push_row(vec!["sat_hard".into(), Value::Missing, "fail".into()]);
        t
    }

    fn lit(v: impl Into<Value>) -> Option<Operand> {
        Some(Operand::Literal(v.into()))
    }

    #[test]
    fn comparison_filters_skip_missing_rows() {
        let filters = vec![Filter::new("slow", "Time", FilterOp::Ge, lit(10.0))];
        let groups = vec![
            FilterGroup::new("slow", GroupJoin::All)
                .with_member(GroupMember::Filter("slow".into())),
        ];
        let mut engine = GroupEngine::new(&filters, &groups).unwrap();
        let t = table();
        assert_eq!(engine.membership("slow", &t).unwrap(), vec![1]);
    }

    #[test]
    fn is_missing_is_the_only_operator_satisfied_by_missing() {
        let filters = vec![Filter::new("nodata", "Time", FilterOp::IsMissing, None)];
        let groups = vec![
            FilterGroup::new("nodata", GroupJoin::All)
                .with_member(GroupMember::Filter("nodata".into())),
        ];
        let mut engine = GroupEngine::new(&filters, &groups).unwrap();
        let t = table();
        assert_eq!(engine.membership("nodata", &t).unwrap(), vec![2]);
    }

    #[test]
    fn empty_all_group_is_the_full_table_and_empty_any_group_is_empty() {
        let groups = vec![
            FilterGroup::new("everything", GroupJoin::All),
            FilterGroup::new("nothing", GroupJoin::Any),
        ];
        let mut engine = GroupEngine::new(&[], &groups).unwrap();
        let t = table();
        assert_eq!(engine.membership("everything", &t).unwrap(), vec![0, 1, 2]);
        assert_eq!(engine.membership("nothing", &t).unwrap(), Vec::<usize>::new());
    }

    #[test]
    fn negated_composite_group() {
        let filters = vec![Filter::new("slow", "Time", FilterOp::Ge, lit(10.0))];
        let groups = vec![
            FilterGroup::new("slow", GroupJoin::All)
                .with_member(GroupMember::Filter("slow".into())),
            FilterGroup::new("rest", GroupJoin::All)
                .with_member(GroupMember::Group("slow".into()))
                .negated(),
        ];
        let mut engine = GroupEngine::new(&filters, &groups).unwrap();
        let t = table();
        // Complement relative to the full table, missing row included.
        assert_eq!(engine.membership("rest", &t).unwrap(), vec![0, 2]);
    }

    #[test]
    fn regex_filter_matches_rendered_values() {
        let filters = vec![Filter::new(
            "mip",
            "Problem",
            FilterOp::Matches,
            lit("^mip_"),
        )];
        let groups = vec![
            FilterGroup::new("mip", GroupJoin::All).with_member(GroupMember::Filter("mip".into())),
        ];
        let mut engine = GroupEngine::new(&filters, &groups).unwrap();
        let t = table();
        assert_eq!(engine.membership("mip", &t).unwrap(), vec![0, 1]);
    }

    #[test]
    fn membership_is_idempotent() {
        let filters = vec![Filter::new("slow", "Time", FilterOp::Ge, lit(10.0))];
        let groups = vec![
            FilterGroup::new("slow", GroupJoin::All)
                .with_member(GroupMember::Filter("slow".into())),
        ];
        let mut engine = GroupEngine::new(&filters, &groups).unwrap();
        let t = table();
        let first = engine.membership("slow", &t).unwrap();
        let second = engine.membership("slow", &t).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn group_cycles_are_rejected_at_construction() {
        let groups = vec![
            FilterGroup::new("a", GroupJoin::All).with_member(GroupMember::Group("b".into())),
            FilterGroup::new("b", GroupJoin::All).with_member(GroupMember::Group("a".into())),
        ];
        let err = GroupEngine::new(&[], &groups).unwrap_err();
        let EngineError::CyclicDependency { path } = err else {
            panic!("expected cycle error, got {err:?}");
        };
        assert_eq!(path.first(), path.last());
    }

    #[test]
    fn unknown_member_references_are_rejected() {
        let groups = vec![
            FilterGroup::new("a", GroupJoin::All).with_member(GroupMember::Filter("ghost".into())),
        ];
        assert!(matches!(
            GroupEngine::new(&[], &groups),
            Err(EngineError::UnknownFilter(name)) if name == "ghost"
        ));
    }

    #[test]
    fn ne_never_matches_against_a_missing_operand() {
        let filters = vec![Filter::new(
            "neq",
            "Time",
            FilterOp::Ne,
            Some(Operand::Column("Absent".into())),
        )];
        let groups = vec![
            FilterGroup::new("neq", GroupJoin::All).with_member(GroupMember::Filter("neq".into())),
        ];
        let mut engine = GroupEngine::new(&filters, &groups).unwrap();
        let t = table();
        assert_eq!(engine.membership("neq", &t).unwrap(), Vec::<usize>::new());
    }
}
