// 속성 기반 테스트 (proptest)
//
// Primary-key uniqueness, index consistency (in memory and across reopen)
// and diff round-trip.

use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::path::Path;
use tabledb_core::engine::TableKey;
use tabledb_core::sql::parse_predicate;
use tabledb_core::sync::{apply_diff, diff_tables};
use tabledb_core::{
    AllowAll, ColumnType, DocumentStore, FlushPolicy, QueryExecutor, ReadLocking, RealtimeMirror,
    Row, Schema, StorageEngine, TableDocument, Value, WriteMode,
};
use tempfile::{TempDir, tempdir};

#[derive(Debug, Clone)]
enum Op {
    Insert(i64, u8),
    UpdateKey { from: i64, to: i64 },
    UpdateValue { id: i64, v: u8 },
    Delete(i64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0i64..6, 0u8..3).prop_map(|(id, v)| Op::Insert(id, v)),
        (0i64..6, 0i64..6).prop_map(|(from, to)| Op::UpdateKey { from, to }),
        (0i64..6, 0u8..3).prop_map(|(id, v)| Op::UpdateValue { id, v }),
        (0i64..6).prop_map(Op::Delete),
    ]
}

fn sql(op: &Op) -> String {
    match op {
        Op::Insert(id, v) => format!("INSERT INTO t VALUES ({}, 'v{}')", id, v),
        Op::UpdateKey { from, to } => format!("UPDATE t SET id = {} WHERE id = {}", to, from),
        Op::UpdateValue { id, v } => format!("UPDATE t SET v = 'v{}' WHERE id = {}", v, id),
        Op::Delete(id) => format!("DELETE FROM t WHERE id = {}", id),
    }
}

#[derive(Debug, Clone)]
enum Step {
    Sql(Op),
    Mirror { id: i64, v: u8 },
    FlushIndexes,
    Reopen,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => op().prop_map(Step::Sql),
        1 => (0i64..6, 0u8..3).prop_map(|(id, v)| Step::Mirror { id, v }),
        1 => Just(Step::FlushIndexes),
        1 => Just(Step::Reopen),
    ]
}

fn open(root: &Path, mode: WriteMode) -> (Arc<StorageEngine>, QueryExecutor) {
    let store = DocumentStore::open(root, ReadLocking::Optimistic).unwrap();
    let engine = Arc::new(StorageEngine::new(store, mode));
    let executor = QueryExecutor::new(engine.clone(), Arc::new(AllowAll));
    (engine, executor)
}

/// One mirrored update, written back straight away.
fn mirror_update(engine: &Arc<StorageEngine>, id: i64, v: u8) {
    let mirror = RealtimeMirror::new(engine.clone());
    mirror.enable("p", "t", FlushPolicy::Manual).unwrap();
    let filter = parse_predicate(&format!("id = {}", id)).unwrap();
    let value = Value::from(format!("v{}", v));
    let _ = mirror.update("p", "t", Some(&filter), &[("v".to_string(), value)]);
    mirror.disable("p", "t").unwrap();
}

fn ids(values: Vec<Value>) -> BTreeSet<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn scanned_ids(doc: &TableDocument, v: u8) -> BTreeSet<String> {
    let value = Value::from(format!("v{}", v));
    doc.rows
        .iter()
        .filter(|r| r.get("v") == Some(&value))
        .map(|r| r.get("id").map(|x| x.to_string()).unwrap_or_default())
        .collect()
}

fn executor(mode: WriteMode) -> (TempDir, Arc<StorageEngine>, QueryExecutor) {
    let dir = tempdir().unwrap();
    let (engine, executor) = open(dir.path(), mode);
    for r in executor.execute_script(
        "root",
        "",
        "CREATE DATABASE p; USE p; CREATE TABLE t (id INT PRIMARY KEY, v TEXT, INDEX(v))",
    ) {
        assert!(r.is_success(), "{}", r.message);
    }
    (dir, engine, executor)
}

fn doc_with(rows: &BTreeMap<i64, u8>) -> TableDocument {
    let schema = Schema::from_columns(vec![
        ("id".to_string(), ColumnType::Int),
        ("v".to_string(), ColumnType::Text),
    ]);
    let mut doc = TableDocument::new("t", schema);
    doc.metadata.primary_key = vec!["id".to_string()];
    doc.rows = rows
        .iter()
        .map(|(id, v)| {
            let mut row = Row::new();
            row.insert("id".to_string(), Value::Int(*id));
            row.insert("v".to_string(), Value::from(format!("v{}", v)));
            row
        })
        .collect();
    doc
}

fn keyed(doc: &TableDocument) -> BTreeMap<String, Row> {
    doc.rows
        .iter()
        .map(|r| (r.get("id").map(|v| v.to_string()).unwrap_or_default(), r.clone()))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn primary_keys_stay_unique(ops in prop::collection::vec(op(), 1..24)) {
        let (_dir, engine, executor) = executor(WriteMode::WriteThrough);
        for op in &ops {
            let _ = executor.execute("root", "p", &sql(op));
            let doc = engine.load_table("p", "t").unwrap();
            let ids: Vec<String> = doc
                .rows
                .iter()
                .map(|r| r.get("id").map(|v| v.to_string()).unwrap_or_default())
                .collect();
            let distinct: BTreeSet<&String> = ids.iter().collect();
            prop_assert_eq!(distinct.len(), ids.len(), "after {:?}", op);
        }
    }

    #[test]
    fn index_matches_row_scan(
        ops in prop::collection::vec(op(), 1..24),
        deferred in any::<bool>(),
    ) {
        let mode = if deferred { WriteMode::Deferred } else { WriteMode::WriteThrough };
        let (_dir, engine, executor) = executor(mode);
        let key = TableKey::new("p", "t");
        for op in &ops {
            let _ = executor.execute("root", "p", &sql(op));
            let doc = engine.load_table("p", "t").unwrap();
            let indexes = engine.take_indexes(&key, &doc);
            for v in 0..3u8 {
                let value = Value::from(format!("v{}", v));
                let expected: BTreeSet<usize> = doc
                    .rows
                    .iter()
                    .enumerate()
                    .filter(|(_, r)| r.get("v") == Some(&value))
                    .map(|(pos, _)| pos)
                    .collect();
                prop_assert_eq!(indexes.manager.lookup("v", &value), Some(expected));
            }
            engine.put_indexes(&key, &doc, indexes);
        }
    }

    #[test]
    fn applying_a_diff_reproduces_the_client(
        server in prop::collection::btree_map(0i64..12, 0u8..4, 0..10),
        client in prop::collection::btree_map(0i64..12, 0u8..4, 0..10),
    ) {
        let server_doc = doc_with(&server);
        let client_doc = doc_with(&client);
        let diff = diff_tables(Some(&server_doc), Some(&client_doc));

        let mut applied = server_doc.clone();
        apply_diff(&mut applied, &diff);
        prop_assert_eq!(keyed(&applied), keyed(&client_doc));
    }

    #[test]
    fn indexed_lookups_survive_mirror_flushes_and_reopen(
        steps in prop::collection::vec(step(), 1..24),
    ) {
        let (dir, mut engine, mut executor) = executor(WriteMode::WriteThrough);
        for step in &steps {
            match step {
                Step::Sql(op) => {
                    let _ = executor.execute("root", "p", &sql(op));
                }
                Step::Mirror { id, v } => mirror_update(&engine, *id, *v),
                Step::FlushIndexes => {
                    engine.flush_indexes().unwrap();
                }
                Step::Reopen => {
                    (engine, executor) = open(dir.path(), WriteMode::WriteThrough);
                }
            }

            let doc = engine.load_table("p", "t").unwrap();
            for v in 0..3u8 {
                let result = executor.execute("root", "p", &format!("SELECT id FROM t WHERE v = 'v{}'", v));
                prop_assert!(result.is_success(), "{}", result.message);
                prop_assert_eq!(ids(result.column_values("id")), scanned_ids(&doc, v), "after {:?}", step);
            }
        }
    }
}
