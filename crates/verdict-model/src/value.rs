use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A single cell value in a testrun record or an evaluation table.
///
/// `Missing` is the explicit sentinel for absent data (a solver that never
/// reported the figure, a failed numeric derivation, a baseline row that does
/// not exist). It is a normal value, not an error: arithmetic over it yields
/// `Missing` again and aggregation excludes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Number(f64),
    Int(i64),
    Text(String),
    Bool(bool),
    Missing,
}

impl Value {
    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    /// Numeric view of the value. Integers widen, booleans count as 0/1,
    /// text and missing have none.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Text(_) | Value::Missing => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => Some(*n != 0.0),
            Value::Int(i) => Some(*i != 0),
            Value::Text(_) | Value::Missing => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Parse a literal the way the evaluation files write constants and
    /// filter operands: integer first, then float, then boolean. Anything
    /// else is not a scalar literal and stays text at the call site.
    pub fn parse_literal(s: &str) -> Option<Value> {
        let t = s.trim();
        if let Ok(i) = t.parse::<i64>() {
            return Some(Value::Int(i));
        }
        if let Ok(f) = t.parse::<f64>() {
            return Some(Value::Number(f));
        }
        match t {
            "true" | "True" => Some(Value::Bool(true)),
            "false" | "False" => Some(Value::Bool(false)),
            _ => None,
        }
    }

    /// Total-order key for deterministic sorting and grouping.
    pub fn key(&self) -> ValueKey {
        match self {
            Value::Number(n) => ValueKey::Number(total_order_bits(*n)),
            Value::Int(i) => ValueKey::Number(total_order_bits(*i as f64)),
            Value::Text(s) => ValueKey::Text(s.clone()),
            Value::Bool(b) => ValueKey::Bool(*b),
            Value::Missing => ValueKey::Missing,
        }
    }

    /// Equality for filter semantics: numeric kinds compare by value
    /// (`Int(3) == Number(3.0)`), everything else structurally. Missing is
    /// equal to nothing, including itself.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => a == b,
            _ => match (self, other) {
                (Value::Text(a), Value::Text(b)) => a == b,
                _ => false,
            },
        }
    }

    /// Partial order for filter comparisons. `None` whenever either side is
    /// missing or the kinds are not comparable.
    pub fn loose_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => match (self, other) {
                (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
                _ => None,
            },
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Text(s) => f.write_str(s),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Missing => Ok(()),
        }
    }
}

/// Sort key with a total order over heterogeneous values.
///
/// Numbers sort first, then text, then booleans; `Missing` always sorts
/// last so that incomplete rows end up at the bottom of any listing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ValueKey {
    Number(u64),
    Text(String),
    Bool(bool),
    Missing,
}

/// Map an `f64` to bits whose unsigned order matches the IEEE-754 total
/// order (negative values reversed, NaN at the top of its sign class).
fn total_order_bits(x: f64) -> u64 {
    let bits = x.to_bits();
    if bits >> 63 == 0 {
        bits | (1 << 63)
    } else {
        !bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn literal_parsing_prefers_int_over_float() {
        assert_eq!(Value::parse_literal("42"), Some(Value::Int(42)));
        assert_eq!(Value::parse_literal("42.5"), Some(Value::Number(42.5)));
        assert_eq!(Value::parse_literal("true"), Some(Value::Bool(true)));
        assert_eq!(Value::parse_literal("default"), None);
    }

    #[test]
    fn missing_never_equals_anything() {
        assert!(!Value::Missing.loose_eq(&Value::Missing));
        assert!(!Value::Missing.loose_eq(&Value::Number(0.0)));
    }

    #[test]
    fn int_and_number_compare_by_value() {
        assert!(Value::Int(3).loose_eq(&Value::Number(3.0)));
        assert_eq!(
            Value::Int(2).loose_cmp(&Value::Number(2.5)),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn value_keys_sort_numbers_before_text_and_missing_last() {
        let mut keys = vec![
            Value::Missing.key(),
            Value::Text("abc".into()).key(),
            Value::Number(-1.0).key(),
            Value::Number(2.0).key(),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                Value::Number(-1.0).key(),
                Value::Number(2.0).key(),
                Value::Text("abc".into()).key(),
                Value::Missing.key(),
            ]
        );
    }

    #[test]
    fn negative_zero_and_zero_share_an_order() {
        assert!(Value::Number(-0.0).key() <= Value::Number(0.0).key());
        assert!(Value::Number(-1.0).key() < Value::Number(-0.5).key());
    }
}
