use crate::adapter::{check_field_kinds, BackendAdapter, Capabilities, Extent};
use crate::duck::{self, DatasetRow, PartitionRow};
use crate::layout::{parse_generation_dir_name, retire_dir, LakeLayout};
use crate::parquet::{file_schema, read_series_file, write_series_file};
use duckdb::Connection;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use tc_types::{BackendKind, FieldKind, ResultExt, StoreError, StoreLocation, TickSeries, TimeRange};

pub const CATALOG_FILE: &str = "catalog.duckdb";

/// Append-only tick store: immutable Parquet buckets of bounded size plus a DuckDB
/// catalog of their row counts and min/max timestamps.
///
/// Buckets are never rewritten in place, so there is no native range delete. A ticker
/// replace writes a fresh generation of buckets and swaps the catalog rows in one
/// transaction.
pub struct TickStore {
    layout: LakeLayout,
    catalog: Mutex<Connection>,
    zstd_level: i32,
    bucket_rows: usize,
}

impl TickStore {
    pub fn open(root: impl Into<PathBuf>, zstd_level: i32, bucket_rows: usize) -> Result<Self, StoreError> {
        let layout = LakeLayout::new(root);
        let root_label = layout.root.display().to_string();
        fs::create_dir_all(&layout.root).write_ctx(&root_label, "open")?;
        let conn = duck::connect(Some(&layout.root.join(CATALOG_FILE))).write_ctx(&root_label, "open")?;
        duck::create_catalog_schema(&conn).write_ctx(&root_label, "create_catalog_schema")?;
        let pruned = duck::prune_missing_partitions(&conn).write_ctx(&root_label, "prune_missing_partitions")?;
        if pruned > 0 {
            tracing::warn!(root=%root_label, pruned, "catalog referenced missing buckets; pruned");
        }
        Ok(Self {
            layout,
            catalog: Mutex::new(conn),
            zstd_level,
            bucket_rows: bucket_rows.max(1),
        })
    }

    pub fn root(&self) -> &Path {
        &self.layout.root
    }

    /// Writes `series` as buckets under `generation`; nothing is catalogued yet.
    fn write_buckets(
        &self,
        loc: &StoreLocation,
        generation: i64,
        series: &TickSeries,
    ) -> Result<Vec<PartitionRow>, StoreError> {
        let mut rows = Vec::new();
        for bucket in series.chunks_of(self.bucket_rows) {
            let Some(range) = bucket.extent() else {
                continue;
            };
            let path = self.layout.bucket_path(loc, generation, range.start_ns());
            let bytes = write_series_file(&path, &bucket, self.zstd_level).write_ctx(loc, "write_bucket")?;
            rows.push(PartitionRow {
                path: path.to_string_lossy().into_owned(),
                rows: bucket.len() as i64,
                bytes: bytes as i64,
                min_ts_ns: range.start_ns(),
                max_ts_ns: range.finish_ns(),
            });
        }
        Ok(rows)
    }

    fn remove_files(paths: &[String]) {
        for p in paths {
            if let Err(e) = fs::remove_file(p) {
                tracing::warn!(path=%p, error=%e, "failed to remove bucket");
            }
        }
    }

    /// Best-effort removal of generation directories other than `keep`.
    fn retire_generations(&self, loc: &StoreLocation, keep: i64) {
        let dir = self.layout.ticker_dir(loc);
        let Ok(entries) = fs::read_dir(&dir) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(generation) = name.to_str().and_then(parse_generation_dir_name) else {
                continue;
            };
            if generation != keep {
                if let Err(e) = retire_dir(&entry.path()) {
                    tracing::warn!(location=%loc, generation, error=%e, "failed to retire generation");
                }
            }
        }
    }

    fn dataset(&self, loc: &StoreLocation) -> Result<Option<DatasetRow>, StoreError> {
        let conn = self.catalog.lock();
        duck::resolve_dataset(&conn, &loc.table, &loc.ticker).read_ctx(loc, "resolve_dataset")
    }
}

impl BackendAdapter for TickStore {
    fn kind(&self) -> BackendKind {
        BackendKind::TickStore
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            native_range_delete: false,
        }
    }

    fn drop_table(&self, table: &str) -> Result<(), StoreError> {
        let conn = self.catalog.lock();
        let dropped = duck::drop_table_datasets(&conn, table).write_ctx(table, "drop_table")?;
        let dir = self.layout.table_dir(table);
        if let Err(e) = retire_dir(&dir) {
            tracing::warn!(table, error=%e, "catalog dropped but bucket directory removal failed");
        }
        tracing::info!(table, datasets = dropped, "dropped table");
        Ok(())
    }

    fn replace_ticker(&self, loc: &StoreLocation, series: &TickSeries) -> Result<usize, StoreError> {
        let conn = self.catalog.lock();
        let dataset = duck::ensure_dataset(&conn, &loc.table, &loc.ticker).write_ctx(loc, "ensure_dataset")?;
        let next = dataset.generation + 1;
        let rows = self.write_buckets(loc, next, series)?;
        let old = match duck::swap_generation(&conn, dataset, next, &rows) {
            Ok(old) => old,
            Err(e) => {
                let written: Vec<String> = rows.into_iter().map(|r| r.path).collect();
                Self::remove_files(&written);
                return Err(e).write_ctx(loc, "swap_generation");
            }
        };
        tracing::debug!(location=%loc, generation=next, buckets=rows.len(), retired=old.len(), "swapped generation");
        Self::remove_files(&old);
        self.retire_generations(loc, next);
        drop(conn);
        Ok(series.len())
    }

    fn append_rows(&self, loc: &StoreLocation, series: &TickSeries) -> Result<usize, StoreError> {
        if series.is_empty() {
            let conn = self.catalog.lock();
            duck::ensure_dataset(&conn, &loc.table, &loc.ticker).write_ctx(loc, "ensure_dataset")?;
            return Ok(0);
        }
        let conn = self.catalog.lock();
        let dataset = duck::ensure_dataset(&conn, &loc.table, &loc.ticker).write_ctx(loc, "ensure_dataset")?;
        let stored = duck::partition_paths_for_range(&conn, dataset.dataset_id, i64::MIN, i64::MAX)
            .read_ctx(loc, "partition_paths_for_range")?;
        let mut fields: Vec<(String, FieldKind)> = Vec::new();
        for path in &stored {
            for field in file_schema(Path::new(path)).read_ctx(loc, "bucket_schema")? {
                if !fields.contains(&field) {
                    fields.push(field);
                }
            }
        }
        check_field_kinds(loc, &fields, series)?;
        let rows = self.write_buckets(loc, dataset.generation, series)?;
        let tx = conn.unchecked_transaction().write_ctx(loc, "append_rows")?;
        let inserted = duck::insert_partitions(&tx, dataset, &rows).and_then(|_| tx.commit());
        if let Err(e) = inserted {
            let written: Vec<String> = rows.into_iter().map(|r| r.path).collect();
            Self::remove_files(&written);
            return Err(e).write_ctx(loc, "insert_partitions");
        }
        tracing::debug!(location=%loc, buckets=rows.len(), rows=series.len(), "appended buckets");
        Ok(series.len())
    }

    fn read_range(&self, loc: &StoreLocation, range: &TimeRange) -> Result<TickSeries, StoreError> {
        // Held across the bucket reads so a concurrent replace cannot retire files mid-read.
        let conn = self.catalog.lock();
        let Some(dataset) =
            duck::resolve_dataset(&conn, &loc.table, &loc.ticker).read_ctx(loc, "resolve_dataset")?
        else {
            return Ok(TickSeries::empty());
        };
        let paths =
            duck::partition_paths_for_range(&conn, dataset.dataset_id, range.start_ns(), range.finish_ns())
                .read_ctx(loc, "partition_paths_for_range")?;
        let mut parts = Vec::with_capacity(paths.len());
        for p in &paths {
            let bucket = read_series_file(Path::new(p)).read_ctx(loc, "read_bucket")?;
            parts.push(bucket.within(range));
        }
        drop(conn);
        TickSeries::concat(parts)
    }

    fn extent(&self, loc: &StoreLocation) -> Result<Option<Extent>, StoreError> {
        let Some(dataset) = self.dataset(loc)? else {
            return Ok(None);
        };
        let conn = self.catalog.lock();
        let stats = duck::dataset_extent(&conn, dataset.dataset_id).read_ctx(loc, "dataset_extent")?;
        Ok(stats.map(|(min, max, rows)| Extent {
            min_ts_ns: min,
            max_ts_ns: max,
            rows: rows.max(0) as u64,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tc_types::WritePolicy;

    fn loc(ticker: &str) -> StoreLocation {
        StoreLocation::new(BackendKind::TickStore, "ts", "fx", ticker).expect("loc")
    }

    fn series(ts: std::ops::Range<i64>) -> TickSeries {
        let ts: Vec<i64> = ts.collect();
        let mid = ts.iter().map(|t| *t as f64).collect();
        TickSeries::from_floats(ts, &[("mid", mid)]).expect("series")
    }

    #[test]
    fn buckets_are_bounded_and_pruned_on_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = TickStore::open(dir.path(), 3, 4).expect("open");
        let eur = loc("EURUSD");
        store.write(&eur, series(0..10), WritePolicy::ReplaceTicker).expect("write");

        let conn = store.catalog.lock();
        let ds = duck::resolve_dataset(&conn, "fx", "EURUSD").unwrap().unwrap();
        let all = duck::partition_paths_for_range(&conn, ds.dataset_id, i64::MIN, i64::MAX).unwrap();
        assert_eq!(all.len(), 3);
        let some = duck::partition_paths_for_range(&conn, ds.dataset_id, 4, 5).unwrap();
        assert_eq!(some.len(), 1);
        drop(conn);

        let got = store.read(&eur, Some(&TimeRange::from_ns(3, 8).unwrap())).expect("read");
        assert_eq!(got.timestamps(), &[3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn replace_retires_previous_generation_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = TickStore::open(dir.path(), 3, 4).expect("open");
        let eur = loc("EURUSD");
        store.write(&eur, series(0..10), WritePolicy::ReplaceTicker).expect("first");
        store.write(&eur, series(20..22), WritePolicy::ReplaceTicker).expect("second");

        let ticker_dir = store.layout.ticker_dir(&eur);
        let generations: Vec<String> = fs::read_dir(&ticker_dir)
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(generations, vec!["g000003".to_string()]);
        assert_eq!(store.read(&eur, None).unwrap().timestamps(), &[20, 21]);
    }

    #[test]
    fn catalog_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = TickStore::open(dir.path(), 3, 4).expect("open");
            store.write(&loc("EURUSD"), series(0..6), WritePolicy::ReplaceTicker).expect("write");
        }
        let store = TickStore::open(dir.path(), 3, 4).expect("reopen");
        let ext = store.extent(&loc("EURUSD")).expect("extent").expect("some");
        assert_eq!((ext.min_ts_ns, ext.max_ts_ns, ext.rows), (0, 5, 6));
    }

    #[test]
    fn text_is_refused_for_a_field_only_older_buckets_carry() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = TickStore::open(dir.path(), 3, 4).expect("open");
        let eur = loc("EURUSD");
        let with_bid = TickSeries::from_floats(vec![0, 1], &[("bid", vec![1.0, 1.1]), ("mid", vec![1.0, 1.1])])
            .expect("bid+mid");
        store.write(&eur, with_bid, WritePolicy::ReplaceTicker).expect("first");
        store.write(&eur, series(10..12), WritePolicy::Append).expect("mid only");

        let texty = TickSeries::new(
            vec![20, 21],
            vec![
                tc_types::Column::floats("mid", vec![Some(2.0), Some(2.1)]),
                tc_types::Column::texts("bid", vec![Some("n/a".to_string()), None]),
            ],
        )
        .expect("texty");
        let err = store.write(&eur, texty, WritePolicy::Append).unwrap_err();
        assert!(matches!(err, StoreError::Schema(_)), "{err}");

        let got = store.read(&eur, None).expect("read");
        assert_eq!(got.timestamps(), &[0, 1, 10, 11]);
        assert_eq!(got.column("bid").expect("bid").data.kind(), FieldKind::Float);
    }
}
