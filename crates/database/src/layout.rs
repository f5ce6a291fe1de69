use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tc_types::StoreLocation;

/// Filesystem layout shared by the file-backed stores.
/// Examples:
///   version snapshot: {root}/{table}/{ticker}/v000042.parquet
///   tick bucket:      {root}/{table}/{ticker}/g000003/b{first_ts_ns}-{id}.parquet
#[derive(Debug, Clone)]
pub struct LakeLayout {
    pub root: PathBuf,
}

impl LakeLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn table_dir(&self, table: &str) -> PathBuf {
        self.root.join(table)
    }

    pub fn ticker_dir(&self, loc: &StoreLocation) -> PathBuf {
        self.table_dir(&loc.table).join(&loc.ticker)
    }

    pub fn version_path(&self, loc: &StoreLocation, version: u64) -> PathBuf {
        self.ticker_dir(loc).join(version_file_name(version))
    }

    pub fn generation_dir(&self, loc: &StoreLocation, generation: i64) -> PathBuf {
        self.ticker_dir(loc).join(format!("g{generation:06}"))
    }

    pub fn bucket_path(&self, loc: &StoreLocation, generation: i64, first_ts_ns: i64) -> PathBuf {
        self.generation_dir(loc, generation).join(format!(
            "b{first_ts_ns}-{}.parquet",
            nanoid::nanoid!(8)
        ))
    }
}

pub fn version_file_name(version: u64) -> String {
    format!("v{version:06}.parquet")
}

/// Inverse of [`version_file_name`].
pub fn parse_version_file_name(name: &str) -> Option<u64> {
    name.strip_prefix('v')?
        .strip_suffix(".parquet")?
        .parse()
        .ok()
}

pub fn parse_generation_dir_name(name: &str) -> Option<i64> {
    name.strip_prefix('g')?.parse().ok()
}

/// Moves `dir` out of the way with a single rename, then deletes it.
///
/// Readers racing the removal see either the whole directory or nothing. Returns
/// `false` when there was nothing to remove.
pub fn retire_dir(dir: &Path) -> io::Result<bool> {
    if !dir.exists() {
        return Ok(false);
    }
    let parent = dir.parent().unwrap_or_else(|| Path::new("."));
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let trash = parent.join(format!(".retired-{name}-{}", nanoid::nanoid!(8)));
    match fs::rename(dir, &trash) {
        Ok(()) => fs::remove_dir_all(&trash)?,
        Err(e) => {
            tracing::debug!(dir=%dir.display(), error=%e, "rename before removal failed; removing in place");
            fs::remove_dir_all(dir)?;
        }
    }
    Ok(true)
}
