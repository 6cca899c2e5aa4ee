//! Normalized, totally ordered index keys.
//!
//! Two values that compare equal under the query dialect always map to the same
//! key, so an index lookup yields a superset of the matching rows and the
//! caller re-checks the predicate on the candidates.

use crate::value::{Value, integral_f64};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// `f64` wrapper with a total order (`f64::total_cmp`), `-0.0` folded into `0.0`.
#[derive(Debug, Clone, Copy)]
pub struct FloatKey(f64);

impl FloatKey {
    pub fn new(f: f64) -> Self {
        if f == 0.0 { Self(0.0) } else { Self(f) }
    }

    pub fn get(self) -> f64 {
        self.0
    }
}

impl PartialEq for FloatKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for FloatKey {}

impl PartialOrd for FloatKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FloatKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Hash for FloatKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

/// Index key derived from a cell value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndexKey {
    Null,
    Int(i64),
    Float(FloatKey),
    Text(String),
}

impl IndexKey {
    fn from_f64(f: f64) -> Self {
        match integral_f64(f) {
            Some(i) => IndexKey::Int(i),
            None => IndexKey::Float(FloatKey::new(f)),
        }
    }

    /// Stable string form, used as the key of persisted index entries.
    pub fn canonical(&self) -> String {
        match self {
            IndexKey::Null => "null".to_string(),
            IndexKey::Int(i) => format!("n:{}", i),
            IndexKey::Float(f) => format!("f:{}", f.get()),
            IndexKey::Text(s) => format!("s:{}", s),
        }
    }
}

impl From<&Value> for IndexKey {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => IndexKey::Null,
            // Booleans compare equal to their text form.
            Value::Bool(b) => IndexKey::Text(b.to_string()),
            Value::Int(i) => IndexKey::Int(*i),
            Value::Float(f) => IndexKey::from_f64(*f),
            Value::Text(s) => {
                let trimmed = s.trim();
                if let Ok(i) = trimmed.parse::<i64>() {
                    IndexKey::Int(i)
                } else if let Ok(f) = trimmed.parse::<f64>() {
                    IndexKey::from_f64(f)
                } else {
                    IndexKey::Text(s.clone())
                }
            }
        }
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKey::Null => write!(f, "NULL"),
            IndexKey::Int(i) => write!(f, "{}", i),
            IndexKey::Float(x) => write!(f, "{}", x.get()),
            IndexKey::Text(s) => write!(f, "'{}'", s),
        }
    }
}

/// Row identity: the primary-key column values, in key order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowKey(Vec<IndexKey>);

impl RowKey {
    pub fn new(parts: Vec<IndexKey>) -> Self {
        Self(parts)
    }

    pub fn parts(&self) -> &[IndexKey] {
        &self.0
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", part)?;
        }
        write!(f, ")")
    }
}
