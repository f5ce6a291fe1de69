//! Uniform write/read/delete contract over heterogeneous storage engines.
//!
//! Each engine implements a handful of primitives; the policy, overlap and
//! deletion semantics are provided once here so every backend behaves the same.

use crate::overlap;
use crate::range_delete;
use tc_types::series::TICKER_COLUMN;
use tc_types::{
    BackendKind, FieldKind, StoreError, StoreLocation, TickSeries, TimeRange, WritePolicy,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Engine can remove a time range in place.
    pub native_range_delete: bool,
}

/// Stored span of one ticker, taken from catalog stats or engine MIN/MAX.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub min_ts_ns: i64,
    pub max_ts_ns: i64,
    pub rows: u64,
}

impl Extent {
    pub fn range(&self) -> TimeRange {
        TimeRange::from_ns(self.min_ts_ns, self.max_ts_ns).unwrap_or(TimeRange::everything())
    }
}

pub trait BackendAdapter: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn capabilities(&self) -> Capabilities;

    /// Removes every ticker of `table`. Dropping a missing table is not an error.
    fn drop_table(&self, table: &str) -> Result<(), StoreError>;

    /// Atomically swaps the ticker's stored series for `series`; other tickers are untouched.
    fn replace_ticker(&self, loc: &StoreLocation, series: &TickSeries) -> Result<usize, StoreError>;

    /// Adds `series` (ascending, no ticker column) to whatever is stored.
    fn append_rows(&self, loc: &StoreLocation, series: &TickSeries) -> Result<usize, StoreError>;

    /// Rows within the inclusive range; order is not guaranteed.
    fn read_range(&self, loc: &StoreLocation, range: &TimeRange) -> Result<TickSeries, StoreError>;

    /// `None` when the ticker has no rows.
    fn extent(&self, loc: &StoreLocation) -> Result<Option<Extent>, StoreError>;

    fn delete_range_native(
        &self,
        loc: &StoreLocation,
        range: &TimeRange,
    ) -> Result<usize, StoreError> {
        let _ = range;
        Err(StoreError::InvalidRequest(format!(
            "{} has no native range delete ({loc})",
            self.kind()
        )))
    }

    /// Persists `series` under `policy`. Append refuses any overlap with the stored range.
    fn write(
        &self,
        loc: &StoreLocation,
        series: TickSeries,
        policy: WritePolicy,
    ) -> Result<usize, StoreError> {
        commit(self, loc, series, policy, false)
    }

    /// Like [`BackendAdapter::write`], optionally collapsing duplicated instants in the
    /// incoming series to their last row first.
    fn append_range(
        &self,
        loc: &StoreLocation,
        series: TickSeries,
        policy: WritePolicy,
        dedupe: bool,
    ) -> Result<usize, StoreError> {
        commit(self, loc, series, policy, dedupe)
    }

    /// Ascending rows within the inclusive range, or everything when `range` is `None`.
    fn read(&self, loc: &StoreLocation, range: Option<&TimeRange>) -> Result<TickSeries, StoreError> {
        let range = range.copied().unwrap_or(TimeRange::everything());
        let rows = self.read_range(loc, &range)?;
        Ok(rows.within(&range).into_ascending())
    }

    /// Removes `[range.start, range.finish]`, natively when supported, else by rewriting the ticker.
    fn delete_range(&self, loc: &StoreLocation, range: &TimeRange) -> Result<usize, StoreError> {
        range_delete::delete_range(self, loc, range)
    }
}

/// New fields may appear at any time; a stored float field never accepts text.
pub fn check_field_kinds(
    loc: &StoreLocation,
    stored: &[(String, FieldKind)],
    incoming: &TickSeries,
) -> Result<(), StoreError> {
    for col in incoming.columns() {
        let narrowing = stored
            .iter()
            .any(|(n, k)| *n == col.name && *k == FieldKind::Float && col.data.kind() == FieldKind::Text);
        if narrowing {
            return Err(StoreError::Schema(format!(
                "field '{}' of {loc} is stored as float but arrived as text",
                col.name
            )));
        }
    }
    Ok(())
}

fn commit<A: BackendAdapter + ?Sized>(
    adapter: &A,
    loc: &StoreLocation,
    series: TickSeries,
    policy: WritePolicy,
    dedupe: bool,
) -> Result<usize, StoreError> {
    if series.has_column(TICKER_COLUMN) {
        return Err(StoreError::Schema(format!(
            "'{TICKER_COLUMN}' is a storage column and cannot be written as a field ({loc})"
        )));
    }
    let mut series = series.into_ascending();
    if dedupe {
        series = series.dedupe_keep_last();
    }
    match policy {
        WritePolicy::ReplaceTable => {
            tracing::info!(location=%loc, rows=series.len(), "replacing table");
            adapter.drop_table(&loc.table)?;
            adapter.append_rows(loc, &series)
        }
        WritePolicy::ReplaceTicker => {
            tracing::info!(location=%loc, rows=series.len(), "replacing ticker");
            adapter.replace_ticker(loc, &series)
        }
        WritePolicy::Append => {
            overlap::ensure_disjoint(adapter, loc, &series)?;
            if series.is_empty() {
                return Ok(0);
            }
            tracing::debug!(location=%loc, rows=series.len(), "appending");
            adapter.append_rows(loc, &series)
        }
    }
}
