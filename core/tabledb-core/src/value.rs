//! Typed cell values and column type tags.
//!
//! Values are stored in table documents as plain JSON scalars. Comparison
//! follows the query dialect: numeric when both sides are numeric, otherwise
//! lexicographic on the textual rendering.

use crate::error::{TdbError, TdbResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Format used for `datetime` values.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current UTC time rendered as a `datetime` value.
pub fn now_timestamp() -> String {
    chrono::Utc::now().format(DATETIME_FORMAT).to_string()
}

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// `f` as an `i64` when it is integral and inside the `i64` range.
pub fn integral_f64(f: f64) -> Option<i64> {
    // 2^63 itself is out of range; `as` would saturate it.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    (f.fract() == 0.0 && (-LIMIT..LIMIT).contains(&f)).then_some(f as i64)
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the value. Text that parses as a number counts.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Text(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            Value::Text(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    /// Exact integer view: integers, integral floats inside the `i64` range
    /// and text spelling either.
    pub fn as_exact_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) => integral_f64(*f),
            Value::Text(s) => {
                let t = s.trim();
                t.parse::<i64>()
                    .ok()
                    .or_else(|| t.parse::<f64>().ok().and_then(integral_f64))
            }
            _ => None,
        }
    }

    fn is_numeric_literal(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }

    /// Textual rendering used for lexicographic comparison and LIKE.
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Text(s) => s.clone(),
        }
    }

    /// SQL comparison. `None` when either side is NULL.
    ///
    /// Numeric when at least one side is a number and the other has a numeric
    /// view; lexicographic otherwise.
    pub fn sql_cmp(&self, other: &Value) -> Option<Ordering> {
        if self.is_null() || other.is_null() {
            return None;
        }
        if self.is_numeric_literal() || other.is_numeric_literal() {
            // Integers compare exactly; f64 would merge neighbours above 2^53.
            if let (Some(a), Some(b)) = (self.as_exact_i64(), other.as_exact_i64()) {
                return Some(a.cmp(&b));
            }
            if let (Some(a), Some(b)) = (self.as_f64(), other.as_f64()) {
                let ord = a.partial_cmp(&b)?;
                // An integer never equals a float outside the i64 range, even
                // when rounding makes them look equal.
                if ord == Ordering::Equal {
                    match (self.as_exact_i64().is_some(), other.as_exact_i64().is_some()) {
                        (true, false) if b > 0.0 => return Some(Ordering::Less),
                        (true, false) => return Some(Ordering::Greater),
                        (false, true) if a > 0.0 => return Some(Ordering::Greater),
                        (false, true) => return Some(Ordering::Less),
                        _ => {}
                    }
                }
                return Some(ord);
            }
        }
        if let (Value::Bool(a), Value::Bool(b)) = (self, other) {
            return Some(a.cmp(b));
        }
        Some(self.to_text().cmp(&other.to_text()))
    }

    /// Equality under the query dialect. NULL equals only NULL.
    pub fn sql_eq(&self, other: &Value) -> bool {
        match (self.is_null(), other.is_null()) {
            (true, true) => true,
            (false, false) => self.sql_cmp(other) == Some(Ordering::Equal),
            _ => false,
        }
    }

    /// Total order used by ORDER BY: NULLs first, then numeric-aware comparison.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self.is_null(), other.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self.sql_cmp(other).unwrap_or(Ordering::Equal),
        }
    }

    /// Coerce a literal into the column's type when the conversion is lossless.
    /// Anything else is kept as given; type constraints are not enforced.
    pub fn coerce_to(self, ty: &ColumnType) -> Value {
        match (ty, self) {
            (_, Value::Null) => Value::Null,
            (ColumnType::Int, Value::Float(f)) if f.fract() == 0.0 && f.is_finite() => {
                Value::Int(f as i64)
            }
            (ColumnType::Int, Value::Text(s)) => match s.trim().parse::<i64>() {
                Ok(i) => Value::Int(i),
                Err(_) => Value::Text(s),
            },
            (ColumnType::Float | ColumnType::Double, Value::Int(i)) => Value::Float(i as f64),
            (ColumnType::Float | ColumnType::Double, Value::Text(s)) => {
                match s.trim().parse::<f64>() {
                    Ok(f) => Value::Float(f),
                    Err(_) => Value::Text(s),
                }
            }
            (ColumnType::Boolean, Value::Int(i)) if i == 0 || i == 1 => Value::Bool(i == 1),
            (ColumnType::Boolean, Value::Text(s)) => match s.to_ascii_lowercase().as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => Value::Text(s),
            },
            (
                ColumnType::Text | ColumnType::Varchar(_) | ColumnType::Datetime,
                v @ (Value::Int(_) | Value::Float(_)),
            ) => Value::Text(v.to_text()),
            (_, v) => v,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Text(s) => write!(f, "'{}'", s),
            other => write!(f, "{}", other.to_text()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// SQL LIKE: `%` matches any run (including empty), `_` exactly one char.
pub fn like_match(text: &str, pattern: &str) -> bool {
    let t: Vec<char> = text.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    // Iterative wildcard match with single backtrack point on the last '%'.
    let (mut ti, mut pi) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;
    while ti < t.len() {
        if pi < p.len() && p[pi] == '%' {
            star = Some((pi, ti));
            pi += 1;
        } else if pi < p.len() && (p[pi] == '_' || p[pi] == t[ti]) {
            ti += 1;
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '%' {
        pi += 1;
    }
    pi == p.len()
}

/// Column type tag as written in the schema section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ColumnType {
    Int,
    Varchar(Option<u32>),
    Datetime,
    Text,
    Float,
    Double,
    Boolean,
}

impl ColumnType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Int | ColumnType::Float | ColumnType::Double)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Int => write!(f, "int"),
            ColumnType::Varchar(Some(n)) => write!(f, "varchar({})", n),
            ColumnType::Varchar(None) => write!(f, "varchar"),
            ColumnType::Datetime => write!(f, "datetime"),
            ColumnType::Text => write!(f, "text"),
            ColumnType::Float => write!(f, "float"),
            ColumnType::Double => write!(f, "double"),
            ColumnType::Boolean => write!(f, "boolean"),
        }
    }
}

impl FromStr for ColumnType {
    type Err = TdbError;

    fn from_str(s: &str) -> TdbResult<Self> {
        let lower = s.trim().to_ascii_lowercase();
        if let Some(rest) = lower.strip_prefix("varchar") {
            let rest = rest.trim();
            if rest.is_empty() {
                return Ok(ColumnType::Varchar(None));
            }
            let inner = rest
                .strip_prefix('(')
                .and_then(|r| r.strip_suffix(')'))
                .ok_or_else(|| TdbError::invalid_query(format!("bad varchar type '{}'", s)))?;
            let n = inner
                .trim()
                .parse::<u32>()
                .map_err(|_| TdbError::invalid_query(format!("bad varchar length in '{}'", s)))?;
            return Ok(ColumnType::Varchar(Some(n)));
        }
        match lower.as_str() {
            "int" | "integer" => Ok(ColumnType::Int),
            "datetime" => Ok(ColumnType::Datetime),
            "text" => Ok(ColumnType::Text),
            "float" => Ok(ColumnType::Float),
            "double" => Ok(ColumnType::Double),
            "boolean" | "bool" => Ok(ColumnType::Boolean),
            _ => Err(TdbError::invalid_query(format!("unsupported column type '{}'", s))),
        }
    }
}

impl From<ColumnType> for String {
    fn from(t: ColumnType) -> Self {
        t.to_string()
    }
}

impl TryFrom<String> for ColumnType {
    type Error = TdbError;

    fn try_from(s: String) -> TdbResult<Self> {
        s.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_comparison_is_numeric() {
        assert_eq!(Value::Int(9).sql_cmp(&Value::Int(10)), Some(Ordering::Less));
        assert_eq!(
            Value::Text("9".into()).sql_cmp(&Value::Int(10)),
            Some(Ordering::Less)
        );
        assert_eq!(Value::Float(2.5).sql_cmp(&Value::Int(2)), Some(Ordering::Greater));
    }

    #[test]
    fn text_comparison_is_lexicographic() {
        assert_eq!(
            Value::Text("9".into()).sql_cmp(&Value::Text("10".into())),
            Some(Ordering::Greater)
        );
        assert_eq!(
            Value::Text("Alice".into()).sql_cmp(&Value::Text("Bob".into())),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn null_semantics() {
        assert!(Value::Null.sql_eq(&Value::Null));
        assert!(!Value::Null.sql_eq(&Value::Int(0)));
        assert_eq!(Value::Null.sql_cmp(&Value::Int(1)), None);
        assert_eq!(Value::Null.sort_cmp(&Value::Int(1)), Ordering::Less);
    }

    #[test]
    fn like_wildcards() {
        assert!(like_match("Alice", "A%"));
        assert!(like_match("Alice", "%ice"));
        assert!(like_match("Alice", "A_ice"));
        assert!(like_match("Alice", "%"));
        assert!(like_match("", "%"));
        assert!(!like_match("Alice", "a%"));
        assert!(!like_match("Alice", "A_ce"));
        assert!(like_match("abcabc", "%b_a%"));
    }

    #[test]
    fn column_type_round_trip() {
        for raw in ["int", "varchar(32)", "datetime", "text", "float", "double", "boolean"] {
            let ty: ColumnType = raw.parse().unwrap();
            assert_eq!(ty.to_string(), raw);
        }
        assert_eq!("INTEGER".parse::<ColumnType>().unwrap(), ColumnType::Int);
        assert!("blob".parse::<ColumnType>().is_err());
    }

    #[test]
    fn values_serialize_as_plain_json() {
        let json = serde_json::to_string(&vec![
            Value::Null,
            Value::Bool(true),
            Value::Int(3),
            Value::Float(1.5),
            Value::Text("x".into()),
        ])
        .unwrap();
        assert_eq!(json, r#"[null,true,3,1.5,"x"]"#);
        let back: Vec<Value> = serde_json::from_str(&json).unwrap();
        assert_eq!(back[2], Value::Int(3));
        assert_eq!(back[3], Value::Float(1.5));
    }

    #[test]
    fn coercion_is_lossless_only() {
        assert_eq!(Value::Text("42".into()).coerce_to(&ColumnType::Int), Value::Int(42));
        assert_eq!(
            Value::Text("abc".into()).coerce_to(&ColumnType::Int),
            Value::Text("abc".into())
        );
        assert_eq!(Value::Int(2).coerce_to(&ColumnType::Double), Value::Float(2.0));
        assert_eq!(Value::Int(1).coerce_to(&ColumnType::Boolean), Value::Bool(true));
    }
}
