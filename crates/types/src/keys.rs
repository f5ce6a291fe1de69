use crate::error::StoreError;
use serde::Serialize;
use std::fmt::{Display, Formatter};
use strum_macros::{Display as StrumDisplay, EnumIter, EnumString};

/// The four storage engine families a data store id can resolve to.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    StrumDisplay,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BackendKind {
    /// Versioned document store: every mutation commits a new immutable snapshot.
    VersionStore,
    /// Append-only bucketed tick store with a min/max catalog.
    TickStore,
    /// Embedded columnar time-series database.
    ColumnarDb,
    /// Networked relational database.
    Relational,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, StrumDisplay, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DataKind {
    Market,
    Trade,
}

impl DataKind {
    /// Fields a normalized series of this kind must carry.
    pub const fn required_fields(self) -> &'static [&'static str] {
        match self {
            DataKind::Market => &["mid"],
            DataKind::Trade => &["executed_price", "notional", "side"],
        }
    }
}

/// Triple naming one ticker's series inside a configured data store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct StoreLocation {
    pub backend: BackendKind,
    pub data_store: String,
    pub table: String,
    pub ticker: String,
}

impl StoreLocation {
    pub fn new(
        backend: BackendKind,
        data_store: impl Into<String>,
        table: impl Into<String>,
        ticker: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let loc = Self {
            backend,
            data_store: data_store.into(),
            table: table.into(),
            ticker: ticker.into(),
        };
        validate_name("table", &loc.table)?;
        validate_name("ticker", &loc.ticker)?;
        Ok(loc)
    }
}

impl Display for StoreLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}/{}/{}",
            self.backend, self.data_store, self.table, self.ticker
        )
    }
}

/// Table and ticker names end up as directory names and quoted SQL identifiers.
pub fn validate_name(what: &str, name: &str) -> Result<(), StoreError> {
    let ok = !name.is_empty()
        && name.len() <= 128
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidRequest(format!(
            "{what} name '{name}' must be 1-128 chars of [A-Za-z0-9_.-] and not start with '.'"
        )))
    }
}

/// Stricter rule for names interpolated into SQL as table or column identifiers.
pub fn validate_sql_identifier(name: &str) -> Result<(), StoreError> {
    let mut chars = name.chars();
    let ok = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.len() <= 63;
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidRequest(format!(
            "'{name}' is not a valid SQL identifier"
        )))
    }
}
