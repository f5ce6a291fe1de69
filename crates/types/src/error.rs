use crate::keys::StoreLocation;
use crate::time::TimeRange;
use std::fmt::Display;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("source not found: {0}")]
    SourceNotFound(String),
    #[error("malformed source {path}: {reason}")]
    SourceFormat { path: String, reason: String },
    #[error("append to {location} rejected: incoming {incoming} overlaps stored {stored}")]
    Overlap {
        location: StoreLocation,
        stored: TimeRange,
        incoming: TimeRange,
    },
    #[error("unknown data store '{0}'")]
    UnknownDataStore(String),
    #[error("{op} failed writing {location}: {source}")]
    BackendWrite {
        location: String,
        op: &'static str,
        #[source]
        source: BoxError,
    },
    #[error("{op} failed reading {location}: {source}")]
    BackendRead {
        location: String,
        op: &'static str,
        #[source]
        source: BoxError,
    },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("schema conflict: {0}")]
    Schema(String),
}

impl StoreError {
    pub fn source_format(path: impl Display, reason: impl Into<String>) -> Self {
        StoreError::SourceFormat {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

/// Attaches store location and operation context to driver errors, the way
/// `anyhow::Context` is used in binaries.
pub trait ResultExt<T> {
    fn write_ctx(self, location: impl Display, op: &'static str) -> Result<T, StoreError>;
    fn read_ctx(self, location: impl Display, op: &'static str) -> Result<T, StoreError>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<BoxError>,
{
    fn write_ctx(self, location: impl Display, op: &'static str) -> Result<T, StoreError> {
        self.map_err(|e| StoreError::BackendWrite {
            location: location.to_string(),
            op,
            source: e.into(),
        })
    }

    fn read_ctx(self, location: impl Display, op: &'static str) -> Result<T, StoreError> {
        self.map_err(|e| StoreError::BackendRead {
            location: location.to_string(),
            op,
            source: e.into(),
        })
    }
}
