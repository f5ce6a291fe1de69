use crate::registry::StoreRegistry;
use std::sync::Arc;
use tc_types::{DataKind, StoreError, TickSeries, TimeRange};

/// Logical read: which ticker, when, and from which configured store and table.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRequest {
    pub ticker: String,
    pub range: TimeRange,
    pub data_store: String,
    pub table: String,
    pub kind: DataKind,
}

impl DataRequest {
    pub fn new(
        data_store: impl Into<String>,
        table: impl Into<String>,
        ticker: impl Into<String>,
        range: TimeRange,
    ) -> Self {
        Self {
            ticker: ticker.into(),
            range,
            data_store: data_store.into(),
            table: table.into(),
            kind: DataKind::Market,
        }
    }

    /// Builds a request from the textual bounds accepted by the source reader.
    pub fn parse(
        data_store: impl Into<String>,
        table: impl Into<String>,
        ticker: impl Into<String>,
        start: &str,
        finish: &str,
    ) -> Result<Self, StoreError> {
        Ok(Self::new(data_store, table, ticker, TimeRange::parse(start, finish)?))
    }
}

/// Read path: dispatches purely on the data store id and returns what the adapter reads.
pub struct MarketTradeLoader {
    registry: Arc<StoreRegistry>,
}

impl MarketTradeLoader {
    pub fn new(registry: Arc<StoreRegistry>) -> Self {
        Self { registry }
    }

    pub fn get_data(&self, req: &DataRequest) -> Result<TickSeries, StoreError> {
        if req.range.start_ns() > req.range.finish_ns() {
            return Err(StoreError::InvalidRequest(format!(
                "range {} finishes before it starts",
                req.range
            )));
        }
        let (adapter, loc) = self
            .registry
            .locate(&req.data_store, &req.table, &req.ticker)?;
        let out = adapter.read(&loc, Some(&req.range))?;
        tracing::debug!(location=%loc, range=%req.range, kind=%req.kind, rows=out.len(), "loaded");
        Ok(out)
    }

    pub fn get_market_data(&self, req: &DataRequest) -> Result<TickSeries, StoreError> {
        self.get_data(&DataRequest {
            kind: DataKind::Market,
            ..req.clone()
        })
    }

    pub fn get_trade_order_data(&self, req: &DataRequest) -> Result<TickSeries, StoreError> {
        self.get_data(&DataRequest {
            kind: DataKind::Trade,
            ..req.clone()
        })
    }
}
