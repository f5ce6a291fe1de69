use std::str::FromStr;
use strum::IntoEnumIterator;
use tc_types::{BackendKind, StoreError};

/// One configured data store: `id=kind:target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSpec {
    pub id: String,
    pub kind: BackendKind,
    /// Directory, DuckDB file (`:memory:` for in-process) or database URL depending on `kind`.
    pub target: String,
}

impl FromStr for StoreSpec {
    type Err = StoreError;

    fn from_str(entry: &str) -> Result<Self, Self::Err> {
        let bad = |why: &str| StoreError::InvalidRequest(format!("data store entry '{entry}': {why}"));
        let (id, rest) = entry.split_once('=').ok_or_else(|| bad("expected id=kind:target"))?;
        let (kind, target) = rest.split_once(':').ok_or_else(|| bad("expected kind:target"))?;
        let (id, kind, target) = (id.trim(), kind.trim(), target.trim());
        if id.is_empty() || target.is_empty() {
            return Err(bad("empty id or target"));
        }
        let kind = kind.parse::<BackendKind>().map_err(|_| {
            let known: Vec<String> = BackendKind::iter().map(|k| k.to_string()).collect();
            bad(&format!("unknown kind '{kind}' (one of {})", known.join(", ")))
        })?;
        Ok(Self {
            id: id.to_string(),
            kind,
            target: target.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LakeConfig {
    pub stores: Vec<StoreSpec>,
    /// Rows per ingestion chunk; `None` reads the whole source as one chunk.
    pub chunk_size: Option<usize>,
    pub zstd_level: i32,
    pub keep_versions: usize,
    pub bucket_rows: usize,
    pub parallel_tickers: bool,
    pub relational_max_conns: u32,
}

impl Default for LakeConfig {
    fn default() -> Self {
        Self {
            stores: Vec::new(),
            chunk_size: None,
            zstd_level: 9,
            keep_versions: 3,
            bucket_rows: 100_000,
            parallel_tickers: false,
            relational_max_conns: 8,
        }
    }
}

/// Best-effort: load environment variables from .env with a fallback to the example file.
fn load_env_best_effort() {
    let _ = dotenvy::from_filename(".env").or_else(|_| dotenvy::from_filename(".env.example"));
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

pub fn parse_stores(raw: &str) -> Result<Vec<StoreSpec>, StoreError> {
    let mut out: Vec<StoreSpec> = Vec::new();
    for entry in raw.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let spec: StoreSpec = entry.parse()?;
        if out.iter().any(|s| s.id == spec.id) {
            return Err(StoreError::InvalidRequest(format!(
                "data store '{}' configured twice",
                spec.id
            )));
        }
        out.push(spec);
    }
    Ok(out)
}

impl LakeConfig {
    /// Reads `TC_*` variables from the process environment after loading `.env`.
    pub fn from_env() -> Result<Self, StoreError> {
        load_env_best_effort();
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, StoreError> {
        let d = Self::default();
        let stores = match lookup("TC_DATA_STORES") {
            Some(raw) => parse_stores(&raw)?,
            None => Vec::new(),
        };
        let chunk_size = lookup("TC_CHUNK_SIZE")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|n| *n > 0);
        let parallel_tickers = lookup("TC_PARALLEL_TICKERS")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(d.parallel_tickers);
        Ok(Self {
            stores,
            chunk_size,
            zstd_level: parse_or(&lookup, "TC_ZSTD_LEVEL", d.zstd_level),
            keep_versions: parse_or(&lookup, "TC_KEEP_VERSIONS", d.keep_versions).max(1),
            bucket_rows: parse_or(&lookup, "TC_TICK_BUCKET_ROWS", d.bucket_rows).max(1),
            parallel_tickers,
            relational_max_conns: parse_or(&lookup, "TC_DB_MAX_CONNS", d.relational_max_conns).max(1),
        })
    }
}
