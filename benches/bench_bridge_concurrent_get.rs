//! Criterion comparison of single-row SELECT latency for raw `rusqlite` vs. many
//! concurrent callers funnelled through the bridge's one worker thread.

use std::fs;
use std::hint::black_box;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rusqlite::{Connection, params};
use sqlite_bridge::{BridgeClient, SqlValue};
use tokio::runtime::Runtime;

/// Holds the reusable on-disk database path plus a deterministic id workload.
struct Dataset {
    path: PathBuf,
    ids: Vec<i64>,
}

static DATASET: LazyLock<Dataset> = LazyLock::new(|| {
    let row_count = lookup_row_count();
    let path = PathBuf::from("benchmark_bridge_lookup.db");
    prepare_dataset(&path, row_count).expect("failed to prepare SQLite dataset");

    // Stride through the table so consecutive lookups do not hit neighbouring pages.
    let count = i64::try_from(row_count).expect("row count fits in i64");
    let ids = (0..count).map(|i| (i * 7919) % count + 1).collect();
    Dataset { path, ids }
});

static TOKIO_RUNTIME: LazyLock<Runtime> =
    LazyLock::new(|| Runtime::new().expect("create tokio runtime"));

fn lookup_row_count() -> usize {
    std::env::var("BENCH_ROWS")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(1000)
}

fn prepare_dataset(path: &Path, row_count: usize) -> rusqlite::Result<()> {
    if path.exists() {
        let _ = fs::remove_file(path);
    }

    let mut conn = Connection::open(path)?;
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        CREATE TABLE games (
            id     INTEGER PRIMARY KEY,
            title  TEXT NOT NULL,
            rating REAL NOT NULL
        );
        ",
    )?;

    let tx = conn.transaction()?;
    {
        let mut insert = tx.prepare("INSERT INTO games (id, title, rating) VALUES (?1, ?2, ?3)")?;
        for id in 1..=i64::try_from(row_count).unwrap_or(i64::MAX) {
            #[allow(clippy::cast_precision_loss)]
            let rating = id as f64 * 0.5;
            insert.execute(params![id, format!("game-{id}"), rating])?;
        }
    }
    tx.commit()
}

fn benchmark_rusqlite_direct(
    group: &mut criterion::BenchmarkGroup<'_, criterion::measurement::WallTime>,
) {
    let dataset = &*DATASET;
    let conn = Connection::open(&dataset.path).expect("open sqlite connection");

    group.bench_function(BenchmarkId::new("rusqlite", dataset.ids.len()), |b| {
        b.iter_custom(|iters| {
            let mut stmt = conn
                .prepare_cached("SELECT id, title, rating FROM games WHERE id = ?1")
                .expect("prepare select statement");
            let start = Instant::now();
            for _ in 0..iters {
                for &id in &dataset.ids {
                    let title: String = stmt.query_row([id], |row| row.get(1)).expect("query row");
                    black_box(title);
                }
            }
            start.elapsed()
        });
    });
}

fn benchmark_bridge(
    group: &mut criterion::BenchmarkGroup<'_, criterion::measurement::WallTime>,
    callers: usize,
) {
    let dataset = &*DATASET;
    let runtime = &*TOKIO_RUNTIME;
    let bridge = runtime
        .block_on(BridgeClient::builder(&dataset.path).build())
        .expect("open bridge");

    group.bench_function(BenchmarkId::new(format!("bridge-{callers}-callers"), dataset.ids.len()), |b| {
        b.iter_custom(|iters| {
            runtime.block_on(async {
                let mut total = Duration::default();
                for _ in 0..iters {
                    let start = Instant::now();
                    let chunks = dataset.ids.chunks(dataset.ids.len().div_ceil(callers));
                    let tasks: Vec<_> = chunks
                        .map(|chunk| {
                            let bridge = bridge.clone();
                            let chunk = chunk.to_vec();
                            tokio::spawn(async move {
                                for id in chunk {
                                    let row = bridge
                                        .get(
                                            "SELECT id, title, rating FROM games WHERE id = ?",
                                            vec![SqlValue::Integer(id)],
                                        )
                                        .await
                                        .expect("bridge get");
                                    black_box(row);
                                }
                            })
                        })
                        .collect();
                    for task in tasks {
                        task.await.expect("lookup task");
                    }
                    total += start.elapsed();
                }
                total
            })
        });
    });
}

fn bridge_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("bridge_single_row_lookup");
    group.throughput(Throughput::Elements(DATASET.ids.len() as u64));
    group.measurement_time(Duration::from_secs(10));

    benchmark_rusqlite_direct(&mut group);
    for callers in [1, 8, 64] {
        benchmark_bridge(&mut group, callers);
    }

    group.finish();
}

criterion_group!(benches, bridge_lookup);
criterion_main!(benches);
