//! Tick consistency layer
//!
//! This crate ingests, appends, reads and deletes time-ordered tick data across four kinds
//! of storage engine behind one contract:
//! - A versioned document store of immutable Parquet snapshots per ticker.
//! - An append-only tick store of bounded Parquet buckets tracked by a DuckDB catalog.
//! - An embedded DuckDB columnar database.
//! - A relational database (Postgres or SQLite) reached through a `sqlx` Any pool.
//!
//! Appends are refused when the incoming span touches the stored `[min, max]` of the
//! ticker, and range deletes fall back to a ticker rewrite on engines that cannot delete
//! in place.
//!
//! Key modules:
//! - `source`: CSV / gzip CSV / Parquet readers yielding ascending chunks, plus export helpers.
//! - `adapter`: the `BackendAdapter` trait; write policies, overlap and delete semantics live here once.
//! - `stores`: the four engine adapters.
//! - `overlap` / `range_delete`: the append guard and the delete strategy.
//! - `ingest`: whole-source conversion, multi-request fan-out, series append and range delete.
//! - `loader`: the read path keyed by data store id.
//! - `registry` / `config`: data stores opened once from `TC_*` environment variables.
//! - `parquet`, `duck`, `layout`: Parquet codec, catalog SQL and on-disk naming shared by the file stores.
//!
//! To get started, build a `LakeConfig` (usually `LakeConfig::from_env()`), open a
//! `StoreRegistry` from it and hand an `Arc` of the registry to `IngestionController` and
//! `MarketTradeLoader`.

pub mod adapter;
pub mod config;
pub mod duck;
pub mod ingest;
pub mod layout;
pub mod loader;
pub mod overlap;
pub mod parquet;
pub mod range_delete;
pub mod registry;
pub mod source;
pub mod stores;

#[cfg(test)]
mod testing;

pub use adapter::{BackendAdapter, Capabilities, Extent};
pub use config::{LakeConfig, StoreSpec};
pub use ingest::{IngestReport, IngestRequest, IngestionController};
pub use loader::{DataRequest, MarketTradeLoader};
pub use registry::StoreRegistry;
pub use source::{SourceOptions, SourceReader, SourceRef};
