//! DuckDB catalog for the bucketed tick store.
//!
//! The catalog owns two tables:
//! - `datasets`: one row per (table, ticker) with the generation currently served.
//! - `partitions`: one row per Parquet bucket with row count, byte size and min/max timestamps.
//!
//! Readers only ever open buckets listed here, so swapping a dataset's partition rows inside
//! one transaction is what makes a ticker replace atomic.

use duckdb::{params, Connection, OptionalExt};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DuckError {
    #[error("duckdb: {0}")]
    Duck(#[from] duckdb::Error),
}

/// Create or reuse a DuckDB connection (file-backed or in-memory).
pub fn connect(db_file: Option<&Path>) -> Result<Connection, DuckError> {
    let conn = match db_file {
        Some(p) => Connection::open(p)?,
        None => Connection::open_in_memory()?,
    };
    Ok(conn)
}

pub fn create_catalog_schema(conn: &Connection) -> duckdb::Result<()> {
    conn.execute_batch(
        r#"
        CREATE SEQUENCE IF NOT EXISTS seq_dataset_id START 1;

        CREATE TABLE IF NOT EXISTS datasets (
            dataset_id   BIGINT  NOT NULL DEFAULT nextval('seq_dataset_id'),
            table_name   TEXT    NOT NULL,
            ticker       TEXT    NOT NULL,
            -- bucket generation currently served; bumped by every ticker replace
            generation   BIGINT  NOT NULL DEFAULT 1
        );

        CREATE TABLE IF NOT EXISTS partitions (
            dataset_id   BIGINT NOT NULL,
            -- path to the parquet bucket
            path         TEXT   NOT NULL,
            generation   BIGINT NOT NULL,

            -- basic stats
            rows         BIGINT NOT NULL,
            bytes        BIGINT NOT NULL,

            -- time range covered by this bucket (nanoseconds since unix epoch, UTC)
            min_ts_ns    BIGINT NOT NULL,
            max_ts_ns    BIGINT NOT NULL
        );
        "#,
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionRow {
    pub path: String,
    pub rows: i64,
    pub bytes: i64,
    pub min_ts_ns: i64,
    pub max_ts_ns: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetRow {
    pub dataset_id: i64,
    pub generation: i64,
}

pub fn resolve_dataset(
    conn: &Connection,
    table: &str,
    ticker: &str,
) -> duckdb::Result<Option<DatasetRow>> {
    conn.query_row(
        "SELECT dataset_id, generation FROM datasets WHERE table_name = ? AND ticker = ?",
        params![table, ticker],
        |r| {
            Ok(DatasetRow {
                dataset_id: r.get(0)?,
                generation: r.get(1)?,
            })
        },
    )
    .optional()
}

/// Resolve or create the dataset row for (table, ticker).
pub fn ensure_dataset(conn: &Connection, table: &str, ticker: &str) -> duckdb::Result<DatasetRow> {
    conn.execute(
        "INSERT INTO datasets (table_name, ticker)
         SELECT ?, ?
         WHERE NOT EXISTS (
           SELECT 1 FROM datasets WHERE table_name = ? AND ticker = ?
         )",
        params![table, ticker, table, ticker],
    )?;
    conn.query_row(
        "SELECT dataset_id, generation FROM datasets WHERE table_name = ? AND ticker = ?",
        params![table, ticker],
        |r| {
            Ok(DatasetRow {
                dataset_id: r.get(0)?,
                generation: r.get(1)?,
            })
        },
    )
}

pub fn insert_partitions(
    conn: &Connection,
    dataset: DatasetRow,
    rows: &[PartitionRow],
) -> duckdb::Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO partitions (dataset_id, path, generation, rows, bytes, min_ts_ns, max_ts_ns)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )?;
    for p in rows {
        stmt.execute(params![
            dataset.dataset_id,
            p.path,
            dataset.generation,
            p.rows,
            p.bytes,
            p.min_ts_ns,
            p.max_ts_ns
        ])?;
    }
    Ok(())
}

/// Bucket paths whose `[min_ts_ns, max_ts_ns]` intersects the inclusive `[start_ns, end_ns]`.
pub fn partition_paths_for_range(
    conn: &Connection,
    dataset_id: i64,
    start_ns: i64,
    end_ns: i64,
) -> duckdb::Result<Vec<String>> {
    let mut q = conn.prepare(
        r#"
        SELECT path
          FROM partitions
         WHERE dataset_id = ?
           AND max_ts_ns >= ?
           AND min_ts_ns <= ?
         ORDER BY min_ts_ns ASC, max_ts_ns ASC
        "#,
    )?;
    let mut rows = q.query(params![dataset_id, start_ns, end_ns])?;
    let mut out = Vec::new();
    while let Some(r) = rows.next()? {
        out.push(r.get::<_, String>(0)?);
    }
    Ok(out)
}

/// `(min_ts_ns, max_ts_ns, rows)` over every catalogued bucket of the dataset.
pub fn dataset_extent(conn: &Connection, dataset_id: i64) -> duckdb::Result<Option<(i64, i64, i64)>> {
    let row: (Option<i64>, Option<i64>, Option<i64>) = conn.query_row(
        "SELECT MIN(min_ts_ns), MAX(max_ts_ns), CAST(SUM(rows) AS BIGINT)
           FROM partitions
          WHERE dataset_id = ? AND rows > 0",
        params![dataset_id],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
    )?;
    Ok(match row {
        (Some(min), Some(max), rows) => Some((min, max, rows.unwrap_or(0))),
        _ => None,
    })
}

/// Replaces every partition of the dataset with `rows` under a new generation in one
/// transaction. Returns the paths that are no longer referenced.
pub fn swap_generation(
    conn: &Connection,
    dataset: DatasetRow,
    new_generation: i64,
    rows: &[PartitionRow],
) -> duckdb::Result<Vec<String>> {
    let tx = conn.unchecked_transaction()?;
    let old = {
        let mut q = tx.prepare("SELECT path FROM partitions WHERE dataset_id = ?")?;
        let mut rs = q.query(params![dataset.dataset_id])?;
        let mut out = Vec::new();
        while let Some(r) = rs.next()? {
            out.push(r.get::<_, String>(0)?);
        }
        out
    };
    tx.execute(
        "DELETE FROM partitions WHERE dataset_id = ?",
        params![dataset.dataset_id],
    )?;
    tx.execute(
        "UPDATE datasets SET generation = ? WHERE dataset_id = ?",
        params![new_generation, dataset.dataset_id],
    )?;
    insert_partitions(
        &tx,
        DatasetRow {
            dataset_id: dataset.dataset_id,
            generation: new_generation,
        },
        rows,
    )?;
    tx.commit()?;
    Ok(old)
}

/// Removes every dataset of `table` from the catalog. Returns how many datasets were dropped.
pub fn drop_table_datasets(conn: &Connection, table: &str) -> duckdb::Result<usize> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM partitions
          WHERE dataset_id IN (SELECT dataset_id FROM datasets WHERE table_name = ?)",
        params![table],
    )?;
    let n = tx.execute("DELETE FROM datasets WHERE table_name = ?", params![table])?;
    tx.commit()?;
    Ok(n)
}

// Prune catalog entries pointing to missing parquet files. Safe to run at startup.
pub fn prune_missing_partitions(conn: &Connection) -> duckdb::Result<usize> {
    let mut stmt = conn.prepare("SELECT path FROM partitions")?;
    let mut rows = stmt.query([])?;
    let mut missing: Vec<String> = Vec::new();
    while let Some(r) = rows.next()? {
        let p: String = r.get(0)?;
        if !Path::new(&p).exists() {
            missing.push(p);
        }
    }
    if missing.is_empty() {
        return Ok(0);
    }

    let tx = conn.unchecked_transaction()?;
    let mut removed = 0usize;
    for p in missing {
        removed += tx.execute("DELETE FROM partitions WHERE path = ?", params![p])?;
    }
    tx.commit()?;
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_conn() -> Connection {
        let conn = connect(None).expect("duckdb mem");
        create_catalog_schema(&conn).expect("init catalog schema");
        conn
    }

    fn part(path: &str, min: i64, max: i64) -> PartitionRow {
        PartitionRow {
            path: path.to_string(),
            rows: 10,
            bytes: 100,
            min_ts_ns: min,
            max_ts_ns: max,
        }
    }

    #[test]
    fn ensure_dataset_is_idempotent() {
        let conn = setup_conn();
        let a = ensure_dataset(&conn, "fx", "EURUSD").expect("first");
        let b = ensure_dataset(&conn, "fx", "EURUSD").expect("second");
        let c = ensure_dataset(&conn, "fx", "GBPUSD").expect("other");
        assert_eq!(a, b);
        assert_ne!(a.dataset_id, c.dataset_id);
        assert_eq!(a.generation, 1);
    }

    #[test]
    fn range_pruning_is_inclusive() {
        let conn = setup_conn();
        let ds = ensure_dataset(&conn, "fx", "EURUSD").expect("dataset");
        insert_partitions(&conn, ds, &[part("/a", 0, 9), part("/b", 10, 19), part("/c", 20, 29)])
            .expect("insert");
        let paths = partition_paths_for_range(&conn, ds.dataset_id, 9, 20).expect("query");
        assert_eq!(paths, vec!["/a", "/b", "/c"]);
        let paths = partition_paths_for_range(&conn, ds.dataset_id, 11, 12).expect("query");
        assert_eq!(paths, vec!["/b"]);
        assert_eq!(
            dataset_extent(&conn, ds.dataset_id).expect("extent"),
            Some((0, 29, 30))
        );
    }

    #[test]
    fn swap_generation_replaces_all_partitions() {
        let conn = setup_conn();
        let ds = ensure_dataset(&conn, "fx", "EURUSD").expect("dataset");
        insert_partitions(&conn, ds, &[part("/a", 0, 9), part("/b", 10, 19)]).expect("insert");
        let old = swap_generation(&conn, ds, 2, &[part("/n", 5, 6)]).expect("swap");
        assert_eq!(old.len(), 2);
        let now = resolve_dataset(&conn, "fx", "EURUSD").expect("resolve").expect("row");
        assert_eq!(now.generation, 2);
        assert_eq!(
            partition_paths_for_range(&conn, ds.dataset_id, i64::MIN, i64::MAX).expect("q"),
            vec!["/n"]
        );
    }

    #[test]
    fn drop_and_prune() {
        let conn = setup_conn();
        let ds = ensure_dataset(&conn, "fx", "EURUSD").expect("dataset");
        insert_partitions(&conn, ds, &[part("/definitely/missing.parquet", 0, 1)]).expect("insert");
        assert_eq!(prune_missing_partitions(&conn).expect("prune"), 1);
        assert_eq!(drop_table_datasets(&conn, "fx").expect("drop"), 1);
        assert!(resolve_dataset(&conn, "fx", "EURUSD").expect("resolve").is_none());
    }
}
