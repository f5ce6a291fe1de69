use crate::adapter::{check_field_kinds, BackendAdapter, Capabilities, Extent};
use crate::layout::{parse_version_file_name, retire_dir, LakeLayout};
use crate::parquet::{read_series_file, ts_extent, write_series_file};
use parking_lot::Mutex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tc_types::{BackendKind, ResultExt, StoreError, StoreLocation, TickSeries, TimeRange};

/// Document-style store where every mutation of a ticker commits a new immutable
/// Parquet snapshot. The highest version number is the current state.
pub struct VersionStore {
    layout: LakeLayout,
    zstd_level: i32,
    keep_versions: usize,
    // Serializes commits so two writers cannot claim the same version number.
    commit_lock: Mutex<()>,
}

impl VersionStore {
    pub fn open(root: impl Into<PathBuf>, zstd_level: i32, keep_versions: usize) -> Result<Self, StoreError> {
        let layout = LakeLayout::new(root);
        fs::create_dir_all(&layout.root).write_ctx(layout.root.display(), "open")?;
        Ok(Self {
            layout,
            zstd_level,
            keep_versions: keep_versions.max(1),
            commit_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.layout.root
    }

    /// Committed version numbers of the ticker, oldest first.
    pub fn list_versions(&self, loc: &StoreLocation) -> Result<Vec<u64>, StoreError> {
        list_versions_in(&self.layout.ticker_dir(loc)).read_ctx(loc, "list_versions")
    }

    /// Reads a specific retained snapshot.
    pub fn read_version(&self, loc: &StoreLocation, version: u64) -> Result<TickSeries, StoreError> {
        let path = self.layout.version_path(loc, version);
        if !path.exists() {
            return Err(StoreError::InvalidRequest(format!(
                "version {version} of {loc} is not retained"
            )));
        }
        read_series_file(&path).read_ctx(loc, "read_version")
    }

    fn latest(&self, loc: &StoreLocation) -> Result<Option<(u64, PathBuf)>, StoreError> {
        let versions = self.list_versions(loc)?;
        Ok(versions
            .last()
            .map(|v| (*v, self.layout.version_path(loc, *v))))
    }

    fn read_latest(&self, loc: &StoreLocation) -> Result<TickSeries, StoreError> {
        match self.latest(loc)? {
            Some((_, path)) => read_series_file(&path).read_ctx(loc, "read_snapshot"),
            None => Ok(TickSeries::empty()),
        }
    }

    /// Writes `series` as the next version. Caller holds `commit_lock`.
    fn commit_version(&self, loc: &StoreLocation, series: &TickSeries) -> Result<u64, StoreError> {
        let next = self.latest(loc)?.map_or(1, |(v, _)| v + 1);
        let path = self.layout.version_path(loc, next);
        let bytes = write_series_file(&path, series, self.zstd_level).write_ctx(loc, "commit_version")?;
        tracing::debug!(location=%loc, version=next, rows=series.len(), bytes, "committed snapshot");
        self.prune(loc, next);
        Ok(next)
    }

    fn prune(&self, loc: &StoreLocation, current: u64) {
        let keep_from = current.saturating_sub(self.keep_versions as u64 - 1);
        let versions = match self.list_versions(loc) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(location=%loc, error=%e, "version listing failed; skipping prune");
                return;
            }
        };
        for v in versions.into_iter().filter(|v| *v < keep_from) {
            let path = self.layout.version_path(loc, v);
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(path=%path.display(), error=%e, "failed to prune old version");
            }
        }
    }
}

fn list_versions_in(dir: &Path) -> io::Result<Vec<u64>> {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut out = Vec::new();
    for entry in entries {
        let entry = entry?;
        if let Some(v) = entry.file_name().to_str().and_then(parse_version_file_name) {
            out.push(v);
        }
    }
    out.sort_unstable();
    Ok(out)
}

impl BackendAdapter for VersionStore {
    fn kind(&self) -> BackendKind {
        BackendKind::VersionStore
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            native_range_delete: true,
        }
    }

    fn drop_table(&self, table: &str) -> Result<(), StoreError> {
        let _guard = self.commit_lock.lock();
        let dir = self.layout.table_dir(table);
        if retire_dir(&dir).write_ctx(dir.display(), "drop_table")? {
            tracing::info!(table, root=%self.layout.root.display(), "dropped table");
        }
        Ok(())
    }

    fn replace_ticker(&self, loc: &StoreLocation, series: &TickSeries) -> Result<usize, StoreError> {
        let _guard = self.commit_lock.lock();
        self.commit_version(loc, series)?;
        Ok(series.len())
    }

    fn append_rows(&self, loc: &StoreLocation, series: &TickSeries) -> Result<usize, StoreError> {
        let _guard = self.commit_lock.lock();
        let existing = self.read_latest(loc)?;
        check_field_kinds(loc, &existing.schema(), series)?;
        let merged = TickSeries::concat(vec![existing, series.clone()])?.into_ascending();
        self.commit_version(loc, &merged)?;
        Ok(series.len())
    }

    fn read_range(&self, loc: &StoreLocation, range: &TimeRange) -> Result<TickSeries, StoreError> {
        Ok(self.read_latest(loc)?.within(range))
    }

    fn extent(&self, loc: &StoreLocation) -> Result<Option<Extent>, StoreError> {
        let Some((_, path)) = self.latest(loc)? else {
            return Ok(None);
        };
        let stats = ts_extent(&path).read_ctx(loc, "extent")?;
        Ok(stats.map(|(rows, min, max)| Extent {
            min_ts_ns: min,
            max_ts_ns: max,
            rows: rows as u64,
        }))
    }

    fn delete_range_native(&self, loc: &StoreLocation, range: &TimeRange) -> Result<usize, StoreError> {
        let _guard = self.commit_lock.lock();
        let existing = self.read_latest(loc)?;
        let kept = existing.excluding(range);
        let removed = existing.len() - kept.len();
        if removed > 0 {
            self.commit_version(loc, &kept)?;
        }
        Ok(removed)
    }
}
