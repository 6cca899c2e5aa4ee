//! Predicate binding and evaluation.
//!
//! A [`Predicate`] is bound once against the columns of a relation, which
//! surfaces `UnknownColumn` before any row is read, then evaluated per row.

use crate::error::TdbResult;
use crate::sql::ast::{ColumnRef, CompareOp, Operand, Predicate};
use crate::storage::Row;
use crate::value::{Value, like_match};
use std::cmp::Ordering;

/// Row access by bound column slot.
pub trait RowAccess {
    fn value(&self, slot: usize) -> &Value;
}

impl RowAccess for [Value] {
    fn value(&self, slot: usize) -> &Value {
        self.get(slot).unwrap_or(&Value::Null)
    }
}

impl RowAccess for Vec<Value> {
    fn value(&self, slot: usize) -> &Value {
        self.as_slice().value(slot)
    }
}

/// A document row viewed through a column-name list.
pub struct NamedRow<'a> {
    pub row: &'a Row,
    pub names: &'a [String],
}

impl RowAccess for NamedRow<'_> {
    fn value(&self, slot: usize) -> &Value {
        self.names
            .get(slot)
            .and_then(|n| self.row.get(n))
            .unwrap_or(&Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BoundOperand {
    Slot(usize),
    Literal(Value),
}

impl BoundOperand {
    fn get<'a, R: RowAccess + ?Sized>(&'a self, row: &'a R) -> &'a Value {
        match self {
            BoundOperand::Slot(i) => row.value(*i),
            BoundOperand::Literal(v) => v,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BoundPredicate {
    Compare {
        left: BoundOperand,
        op: CompareOp,
        right: BoundOperand,
    },
    Like {
        operand: BoundOperand,
        pattern: BoundOperand,
        negated: bool,
    },
    InList {
        operand: BoundOperand,
        list: Vec<BoundOperand>,
        negated: bool,
    },
    IsNull {
        operand: BoundOperand,
        negated: bool,
    },
    And(Box<BoundPredicate>, Box<BoundPredicate>),
    Or(Box<BoundPredicate>, Box<BoundPredicate>),
    Not(Box<BoundPredicate>),
}

/// Compare two values under `op`.
///
/// `=` holds only for two NULLs, `!=` is its negation, ordering operators are
/// false when either side is NULL.
pub fn compare(left: &Value, op: CompareOp, right: &Value) -> bool {
    let ordering = || left.sql_cmp(right);
    match op {
        CompareOp::Eq => left.sql_eq(right),
        CompareOp::NotEq => !left.sql_eq(right),
        CompareOp::Lt => ordering() == Some(Ordering::Less),
        CompareOp::Gt => ordering() == Some(Ordering::Greater),
        CompareOp::LtEq => matches!(ordering(), Some(Ordering::Less | Ordering::Equal)),
        CompareOp::GtEq => matches!(ordering(), Some(Ordering::Greater | Ordering::Equal)),
    }
}

impl BoundPredicate {
    /// Bind `predicate`, resolving each column with `resolve`.
    pub fn bind(
        predicate: &Predicate,
        resolve: &dyn Fn(&ColumnRef) -> TdbResult<usize>,
    ) -> TdbResult<Self> {
        let operand = |o: &Operand| -> TdbResult<BoundOperand> {
            Ok(match o {
                Operand::Column(c) => BoundOperand::Slot(resolve(c)?),
                Operand::Literal(v) => BoundOperand::Literal(v.clone()),
            })
        };
        Ok(match predicate {
            Predicate::Compare { left, op, right } => BoundPredicate::Compare {
                left: operand(left)?,
                op: *op,
                right: operand(right)?,
            },
            Predicate::Like {
                operand: o,
                pattern,
                negated,
            } => BoundPredicate::Like {
                operand: operand(o)?,
                pattern: operand(pattern)?,
                negated: *negated,
            },
            Predicate::InList {
                operand: o,
                list,
                negated,
            } => BoundPredicate::InList {
                operand: operand(o)?,
                list: list.iter().map(|o| operand(o)).collect::<TdbResult<_>>()?,
                negated: *negated,
            },
            Predicate::IsNull {
                operand: o,
                negated,
            } => BoundPredicate::IsNull {
                operand: operand(o)?,
                negated: *negated,
            },
            Predicate::And(l, r) => BoundPredicate::And(
                Box::new(Self::bind(l, resolve)?),
                Box::new(Self::bind(r, resolve)?),
            ),
            Predicate::Or(l, r) => BoundPredicate::Or(
                Box::new(Self::bind(l, resolve)?),
                Box::new(Self::bind(r, resolve)?),
            ),
            Predicate::Not(p) => BoundPredicate::Not(Box::new(Self::bind(p, resolve)?)),
        })
    }

    pub fn eval<R: RowAccess + ?Sized>(&self, row: &R) -> bool {
        match self {
            BoundPredicate::Compare { left, op, right } => {
                compare(left.get(row), *op, right.get(row))
            }
            BoundPredicate::Like {
                operand,
                pattern,
                negated,
            } => {
                let (value, pattern) = (operand.get(row), pattern.get(row));
                if value.is_null() || pattern.is_null() {
                    return false;
                }
                like_match(&value.to_text(), &pattern.to_text()) != *negated
            }
            BoundPredicate::InList {
                operand,
                list,
                negated,
            } => {
                let value = operand.get(row);
                if value.is_null() {
                    return false;
                }
                list.iter().any(|item| value.sql_eq(item.get(row))) != *negated
            }
            BoundPredicate::IsNull { operand, negated } => operand.get(row).is_null() != *negated,
            BoundPredicate::And(l, r) => l.eval(row) && r.eval(row),
            BoundPredicate::Or(l, r) => l.eval(row) || r.eval(row),
            BoundPredicate::Not(p) => !p.eval(row),
        }
    }

    /// `slot = literal` terms of the top-level conjunction.
    pub fn equality_terms(&self) -> Vec<(usize, &Value)> {
        let mut out = Vec::new();
        self.collect_equalities(&mut out);
        out
    }

    fn collect_equalities<'a>(&'a self, out: &mut Vec<(usize, &'a Value)>) {
        match self {
            BoundPredicate::Compare {
                left: BoundOperand::Slot(s),
                op: CompareOp::Eq,
                right: BoundOperand::Literal(v),
            }
            | BoundPredicate::Compare {
                left: BoundOperand::Literal(v),
                op: CompareOp::Eq,
                right: BoundOperand::Slot(s),
            } if !v.is_null() => out.push((*s, v)),
            BoundPredicate::And(l, r) => {
                l.collect_equalities(out);
                r.collect_equalities(out);
            }
            _ => {}
        }
    }
}
