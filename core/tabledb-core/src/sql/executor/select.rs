//! SELECT: FROM/JOIN → WHERE → GROUP BY → ORDER BY → projection → DISTINCT → LIMIT/OFFSET.

use super::{BoundPredicate, QueryExecutor, QueryResult, matching_positions, schema_names};
use crate::error::{TdbError, TdbResult};
use crate::index::IndexKey;
use crate::sql::ast::{AggregateFunc, ColumnRef, Join, JoinKind, Select, SelectItem, TableRef};
use crate::storage::TableDocument;
use crate::value::Value;
use ahash::{AHashMap, AHashSet};
use std::cmp::Ordering;

/// One column of the working relation.
#[derive(Debug, Clone)]
struct Binding {
    /// Alias, or the table name when unaliased.
    qualifier: String,
    table: String,
    name: String,
}

/// Rows as value vectors, columns described by `bindings`.
#[derive(Debug, Default)]
struct Relation {
    bindings: Vec<Binding>,
    rows: Vec<Vec<Value>>,
}

impl Relation {
    fn bindings_for(doc: &TableDocument, table: &TableRef) -> Vec<Binding> {
        doc.schema
            .names()
            .map(|name| Binding {
                qualifier: table.binding().to_string(),
                table: table.name.clone(),
                name: name.to_string(),
            })
            .collect()
    }

    fn resolve(&self, column: &ColumnRef) -> TdbResult<usize> {
        let mut found = self.bindings.iter().enumerate().filter(|(_, b)| {
            b.name == column.name
                && column
                    .qualifier
                    .as_ref()
                    .is_none_or(|q| *q == b.qualifier || *q == b.table)
        });
        match (found.next(), found.next()) {
            (Some((slot, _)), None) => Ok(slot),
            (Some(_), Some(_)) => Err(TdbError::invalid_query(format!(
                "column '{}' is ambiguous",
                column
            ))),
            (None, _) => {
                let table = column
                    .qualifier
                    .clone()
                    .or_else(|| self.bindings.first().map(|b| b.table.clone()))
                    .unwrap_or_default();
                Err(TdbError::unknown_column(table, column.name.clone()))
            }
        }
    }

    /// Whether another binding shares this one's bare name.
    fn is_shadowed(&self, slot: usize) -> bool {
        let name = &self.bindings[slot].name;
        self.bindings
            .iter()
            .enumerate()
            .any(|(i, b)| i != slot && &b.name == name)
    }

    fn label(&self, slot: usize) -> String {
        let b = &self.bindings[slot];
        if self.is_shadowed(slot) {
            format!("{}.{}", b.qualifier, b.name)
        } else {
            b.name.clone()
        }
    }
}

#[derive(Debug, Clone)]
enum OutputKind {
    Source(usize),
    Aggregate(AggregateFunc, Option<usize>),
}

#[derive(Debug, Clone)]
struct OutputColumn {
    label: String,
    kind: OutputKind,
}

/// An output row together with the source row ORDER BY may fall back to.
struct Record {
    output: Vec<Value>,
    source: Vec<Value>,
}

impl QueryExecutor {
    pub(super) fn select(&self, database: &str, select: &Select) -> TdbResult<QueryResult> {
        let relation = match &select.join {
            None => self.scan_single(database, select)?,
            Some(join) => {
                let joined = self.scan_join(database, &select.from, join)?;
                filter_relation(joined, select)?
            }
        };

        let outputs = plan_outputs(&relation, &select.items)?;
        let grouped = !select.group_by.is_empty()
            || outputs
                .iter()
                .any(|o| matches!(o.kind, OutputKind::Aggregate(..)));

        let mut records = if grouped {
            group_records(&relation, &outputs, &select.group_by)?
        } else {
            relation
                .rows
                .iter()
                .map(|row| Record {
                    output: project(&outputs, row),
                    source: row.clone(),
                })
                .collect()
        };

        sort_records(&relation, &outputs, select, &mut records)?;

        let mut data: Vec<Vec<Value>> = records.into_iter().map(|r| r.output).collect();
        if select.distinct {
            let mut seen = AHashSet::new();
            data.retain(|row| seen.insert(serde_json::to_string(row).unwrap_or_default()));
        }
        let offset = select.offset.unwrap_or(0);
        let data: Vec<Vec<Value>> = data
            .into_iter()
            .skip(offset)
            .take(select.limit.unwrap_or(usize::MAX))
            .collect();

        let labels = outputs.into_iter().map(|o| o.label).collect();
        Ok(QueryResult::rows(labels, data))
    }

    /// Single-table FROM with WHERE, using indexes for equality terms.
    fn scan_single(&self, database: &str, select: &Select) -> TdbResult<Relation> {
        self.read_table(database, &select.from.name, |doc, indexes| {
            let names = schema_names(doc);
            let mut relation = Relation {
                bindings: Relation::bindings_for(doc, &select.from),
                rows: Vec::new(),
            };
            let filter = select
                .filter
                .as_ref()
                .map(|p| BoundPredicate::bind(p, &|c: &ColumnRef| relation.resolve(c)))
                .transpose()?;
            relation.rows = matching_positions(doc, &names, indexes, filter.as_ref())
                .into_iter()
                .filter_map(|pos| doc.rows.get(pos))
                .map(|row| {
                    names
                        .iter()
                        .map(|n| row.get(n).cloned().unwrap_or_default())
                        .collect()
                })
                .collect();
            Ok(relation)
        })
    }

    /// Nested-loop equality join. NULL keys never match.
    fn scan_join(&self, database: &str, from: &TableRef, join: &Join) -> TdbResult<Relation> {
        let left_doc = self.engine.load_table(database, &from.name)?;
        let right_doc = self.engine.load_table(database, &join.table.name)?;
        let left_names = schema_names(&left_doc);
        let right_names = schema_names(&right_doc);

        let mut relation = Relation {
            bindings: Relation::bindings_for(&left_doc, from),
            rows: Vec::new(),
        };
        relation
            .bindings
            .extend(Relation::bindings_for(&right_doc, &join.table));

        let width = left_names.len();
        let a = relation.resolve(&join.left)?;
        let b = relation.resolve(&join.right)?;
        let (left_key, right_key) = match (a < width, b < width) {
            (true, false) => (a, b - width),
            (false, true) => (b, a - width),
            _ => {
                return Err(TdbError::invalid_query(format!(
                    "join condition {} = {} must reference both tables",
                    join.left, join.right
                )));
            }
        };

        let values = |doc: &TableDocument, names: &[String]| -> Vec<Vec<Value>> {
            doc.rows
                .iter()
                .map(|row| {
                    names
                        .iter()
                        .map(|n| row.get(n).cloned().unwrap_or_default())
                        .collect()
                })
                .collect()
        };
        let left_rows = values(&left_doc, &left_names);
        let right_rows = values(&right_doc, &right_names);
        let matches = |l: &[Value], r: &[Value]| match (l.get(left_key), r.get(right_key)) {
            (Some(lv), Some(rv)) => !lv.is_null() && !rv.is_null() && lv.sql_eq(rv),
            _ => false,
        };
        let concat = |l: &Vec<Value>, r: &Vec<Value>| -> Vec<Value> { l.iter().chain(r).cloned().collect() };

        match join.kind {
            JoinKind::Inner | JoinKind::Left => {
                let null_right = vec![Value::Null; right_names.len()];
                for l in &left_rows {
                    let mut matched = false;
                    for r in right_rows.iter().filter(|r| matches(l.as_slice(), r.as_slice())) {
                        relation.rows.push(concat(l, r));
                        matched = true;
                    }
                    if !matched && join.kind == JoinKind::Left {
                        relation.rows.push(concat(l, &null_right));
                    }
                }
            }
            JoinKind::Right => {
                let null_left = vec![Value::Null; width];
                for r in &right_rows {
                    let mut matched = false;
                    for l in left_rows.iter().filter(|l| matches(l.as_slice(), r.as_slice())) {
                        relation.rows.push(concat(l, r));
                        matched = true;
                    }
                    if !matched {
                        relation.rows.push(concat(&null_left, r));
                    }
                }
            }
        }
        Ok(relation)
    }
}

fn filter_relation(mut relation: Relation, select: &Select) -> TdbResult<Relation> {
    if let Some(predicate) = &select.filter {
        let bound = BoundPredicate::bind(predicate, &|c: &ColumnRef| relation.resolve(c))?;
        relation.rows.retain(|row| bound.eval(row));
    }
    Ok(relation)
}

fn plan_outputs(relation: &Relation, items: &[SelectItem]) -> TdbResult<Vec<OutputColumn>> {
    let mut outputs = Vec::new();
    for item in items {
        match item {
            SelectItem::Wildcard => {
                outputs.extend((0..relation.bindings.len()).map(|slot| OutputColumn {
                    label: relation.label(slot),
                    kind: OutputKind::Source(slot),
                }));
            }
            SelectItem::QualifiedWildcard(q) => {
                let before = outputs.len();
                for (slot, b) in relation.bindings.iter().enumerate() {
                    if &b.qualifier == q || &b.table == q {
                        outputs.push(OutputColumn {
                            label: relation.label(slot),
                            kind: OutputKind::Source(slot),
                        });
                    }
                }
                if outputs.len() == before {
                    return Err(TdbError::invalid_query(format!("unknown table '{}'", q)));
                }
            }
            SelectItem::Column { column, alias } => outputs.push(OutputColumn {
                label: alias.clone().unwrap_or_else(|| column.name.clone()),
                kind: OutputKind::Source(relation.resolve(column)?),
            }),
            SelectItem::Aggregate { func, arg, alias } => {
                let slot = arg.as_ref().map(|c| relation.resolve(c)).transpose()?;
                let label = alias.clone().unwrap_or_else(|| match arg {
                    Some(c) => format!("{}({})", func, c),
                    None => format!("{}(*)", func),
                });
                outputs.push(OutputColumn {
                    label,
                    kind: OutputKind::Aggregate(*func, slot),
                });
            }
        }
    }
    Ok(outputs)
}

fn project(outputs: &[OutputColumn], row: &[Value]) -> Vec<Value> {
    outputs
        .iter()
        .map(|o| match o.kind {
            OutputKind::Source(slot) => row.get(slot).cloned().unwrap_or_default(),
            OutputKind::Aggregate(func, slot) => aggregate(func, slot, &[row]),
        })
        .collect()
}

/// Groups in first-appearance order. Without GROUP BY the whole input is
/// one group, even when empty.
fn group_records(
    relation: &Relation,
    outputs: &[OutputColumn],
    group_by: &[ColumnRef],
) -> TdbResult<Vec<Record>> {
    let key_slots = group_by
        .iter()
        .map(|c| relation.resolve(c))
        .collect::<TdbResult<Vec<_>>>()?;

    let mut groups: Vec<Vec<&Vec<Value>>> = Vec::new();
    if key_slots.is_empty() {
        groups.push(relation.rows.iter().collect());
    } else {
        let mut lookup: AHashMap<Vec<IndexKey>, usize> = AHashMap::new();
        for row in &relation.rows {
            let key: Vec<IndexKey> = key_slots
                .iter()
                .map(|&s| IndexKey::from(row.get(s).unwrap_or(&Value::Null)))
                .collect();
            let next = groups.len();
            let slot = *lookup.entry(key).or_insert(next);
            if slot == next {
                groups.push(Vec::new());
            }
            groups[slot].push(row);
        }
    }

    let empty = vec![Value::Null; relation.bindings.len()];
    Ok(groups
        .into_iter()
        .map(|members| {
            let first = members.first().copied().unwrap_or(&empty);
            let output = outputs
                .iter()
                .map(|o| match o.kind {
                    OutputKind::Source(slot) => first.get(slot).cloned().unwrap_or_default(),
                    OutputKind::Aggregate(func, slot) => {
                        let rows: Vec<&[Value]> = members.iter().map(|r| r.as_slice()).collect();
                        aggregate(func, slot, &rows)
                    }
                })
                .collect();
            Record {
                output,
                source: first.clone(),
            }
        })
        .collect())
}

/// `None` slot is `COUNT(*)`.
fn aggregate(func: AggregateFunc, slot: Option<usize>, rows: &[&[Value]]) -> Value {
    let Some(slot) = slot else {
        return Value::Int(rows.len() as i64);
    };
    let values: Vec<&Value> = rows
        .iter()
        .filter_map(|r| r.get(slot))
        .filter(|v| !v.is_null())
        .collect();

    match func {
        AggregateFunc::Count => Value::Int(values.len() as i64),
        AggregateFunc::Sum => {
            let numbers: Vec<&Value> = values.into_iter().filter(|v| v.as_f64().is_some()).collect();
            if numbers.is_empty() {
                return Value::Null;
            }
            if numbers.iter().all(|v| matches!(v, Value::Int(_))) {
                let total = numbers
                    .iter()
                    .filter_map(|v| v.as_i64())
                    .try_fold(0i64, |acc, n| acc.checked_add(n));
                if let Some(total) = total {
                    return Value::Int(total);
                }
            }
            Value::Float(numbers.iter().filter_map(|v| v.as_f64()).sum())
        }
        AggregateFunc::Avg => {
            let numbers: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
            if numbers.is_empty() {
                return Value::Null;
            }
            Value::Float(numbers.iter().sum::<f64>() / numbers.len() as f64)
        }
        AggregateFunc::Min => values
            .into_iter()
            .min_by(|a, b| a.sort_cmp(b))
            .cloned()
            .unwrap_or_default(),
        AggregateFunc::Max => values
            .into_iter()
            .max_by(|a, b| a.sort_cmp(b))
            .cloned()
            .unwrap_or_default(),
    }
}

enum SortKey {
    Output(usize),
    Source(usize),
}

/// ORDER BY keys resolve against output labels first, then source columns.
fn sort_records(
    relation: &Relation,
    outputs: &[OutputColumn],
    select: &Select,
    records: &mut [Record],
) -> TdbResult<()> {
    if select.order_by.is_empty() {
        return Ok(());
    }
    let mut keys = Vec::with_capacity(select.order_by.len());
    for order in &select.order_by {
        let written = order.column.to_string();
        let by_label = outputs
            .iter()
            .position(|o| o.label == written || (order.column.qualifier.is_none() && o.label == order.column.name));
        let key = match by_label {
            Some(i) => SortKey::Output(i),
            None => SortKey::Source(relation.resolve(&order.column)?),
        };
        keys.push((key, order.descending));
    }

    records.sort_by(|a, b| {
        for (key, descending) in &keys {
            let (x, y) = match key {
                SortKey::Output(i) => (a.output.get(*i), b.output.get(*i)),
                SortKey::Source(i) => (a.source.get(*i), b.source.get(*i)),
            };
            let ord = match (x, y) {
                (Some(x), Some(y)) => x.sort_cmp(y),
                _ => Ordering::Equal,
            };
            let ord = if *descending { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    Ok(())
}
