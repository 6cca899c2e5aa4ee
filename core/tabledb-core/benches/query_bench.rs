//! Query Throughput Benchmark
//!
//! Indexed vs scanned point lookups, aggregation and multi-row INSERT under
//! both write modes.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::sync::Arc;
use tabledb_core::{AllowAll, EngineConfig, TableDb, WriteMode};
use tempfile::TempDir;

fn open(mode: WriteMode) -> (TempDir, TableDb) {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::new(dir.path())
        .with_write_mode(mode)
        .with_background_jobs(false);
    let db = TableDb::open(config, Arc::new(AllowAll)).unwrap();
    db.execute("root", "", "CREATE DATABASE bench");
    let result = db.execute(
        "root",
        "bench",
        "CREATE TABLE users (id INT PRIMARY KEY, name TEXT, city TEXT, age INT, INDEX(city))",
    );
    assert!(result.is_success(), "{}", result.message);
    (dir, db)
}

/// Generate one multi-row INSERT
fn generate_insert(start: usize, count: usize) -> String {
    let mut sql = String::from("INSERT INTO users VALUES ");
    for i in start..start + count {
        if i > start {
            sql.push_str(", ");
        }
        sql.push_str(&format!(
            "({}, 'user{}', 'city{}', {})",
            i,
            i,
            i % 20,
            20 + i % 50
        ));
    }
    sql
}

fn seeded(rows: usize) -> (TempDir, TableDb) {
    let (dir, db) = open(WriteMode::WriteThrough);
    let result = db.execute("root", "bench", &generate_insert(0, rows));
    assert!(result.is_success(), "{}", result.message);
    (dir, db)
}

/// Benchmark: point lookups through an index and through a scan
fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup");
    for rows in [100usize, 1_000] {
        let (_dir, db) = seeded(rows);
        group.bench_with_input(BenchmarkId::new("indexed", rows), &rows, |b, _| {
            b.iter(|| black_box(db.execute("root", "bench", "SELECT * FROM users WHERE city = 'city7'")))
        });
        group.bench_with_input(BenchmarkId::new("scan", rows), &rows, |b, _| {
            b.iter(|| black_box(db.execute("root", "bench", "SELECT * FROM users WHERE age = 33")))
        });
    }
    group.finish();
}

/// Benchmark: GROUP BY with aggregates
fn bench_aggregate(c: &mut Criterion) {
    let (_dir, db) = seeded(1_000);
    c.bench_function("group_by_city", |b| {
        b.iter(|| {
            black_box(db.execute(
                "root",
                "bench",
                "SELECT city, COUNT(*) AS n, AVG(age) AS mean FROM users GROUP BY city ORDER BY n DESC",
            ))
        })
    });
}

/// Benchmark: 50-row INSERT, write-through vs deferred
fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert_50");
    for (label, mode) in [("write_through", WriteMode::WriteThrough), ("deferred", WriteMode::Deferred)] {
        group.bench_function(label, |b| {
            let (_dir, db) = open(mode);
            let mut next = 0;
            b.iter(|| {
                let result = db.execute("root", "bench", &generate_insert(next, 50));
                next += 50;
                black_box(result)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_lookup, bench_aggregate, bench_insert);
criterion_main!(benches);
