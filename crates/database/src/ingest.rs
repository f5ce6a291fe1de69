//! Ingestion Controller: drives a source through normalisation and the adapter contract.
//!
//! The caller's policy applies to the first written chunk only; every later chunk of the
//! same conversion is appended, so a conversion never deletes what it wrote itself. Rows
//! sharing the last instant of a chunk are held back and written with the next chunk, so
//! chunk boundaries never split a timestamp and the append overlap check between chunks
//! only fires on genuinely overlapping data.

use crate::adapter::BackendAdapter;
use crate::registry::StoreRegistry;
use crate::source::{SourceOptions, SourceReader, SourceRef};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tc_types::series::TICKER_COLUMN;
use tc_types::{
    Column, DataKind, Existence, StoreError, StoreLocation, TickSeries, TimeRange, Value,
    WritePolicy,
};

#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub source: SourceRef,
    pub data_store: String,
    pub table: String,
    pub ticker: String,
    pub table_policy: Existence,
    pub ticker_policy: Existence,
    /// Overrides the controller's default chunk size.
    pub chunk_size: Option<usize>,
    pub reverse: bool,
    /// Collapse rows sharing a timestamp to the last one before writing.
    pub dedupe: bool,
    pub kind: DataKind,
}

impl IngestRequest {
    pub fn new(
        source: impl Into<SourceRef>,
        data_store: impl Into<String>,
        table: impl Into<String>,
        ticker: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            data_store: data_store.into(),
            table: table.into(),
            ticker: ticker.into(),
            table_policy: Existence::Replace,
            ticker_policy: Existence::Replace,
            chunk_size: None,
            reverse: false,
            dedupe: true,
            kind: DataKind::Market,
        }
    }

    pub fn with_policies(mut self, table: Existence, ticker: Existence) -> Self {
        self.table_policy = table;
        self.ticker_policy = ticker;
        self
    }

    pub fn with_chunk_size(mut self, rows: usize) -> Self {
        self.chunk_size = Some(rows);
        self
    }

    pub fn reversed(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    pub fn with_dedupe(mut self, dedupe: bool) -> Self {
        self.dedupe = dedupe;
        self
    }

    pub fn with_kind(mut self, kind: DataKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn policy(&self) -> WritePolicy {
        WritePolicy::from_existence(self.table_policy, self.ticker_policy)
    }

    fn table_key(&self) -> (&str, &str) {
        (&self.data_store, &self.table)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub location: StoreLocation,
    pub chunks: usize,
    pub rows_written: usize,
    /// Span of everything written, `None` when nothing was.
    pub range: Option<TimeRange>,
}

impl IngestReport {
    fn record(&mut self, rows: usize, span: Option<TimeRange>) {
        self.chunks += 1;
        self.rows_written += rows;
        self.range = match (self.range, span) {
            (Some(a), Some(b)) => TimeRange::from_ns(
                a.start_ns().min(b.start_ns()),
                a.finish_ns().max(b.finish_ns()),
            )
            .ok(),
            (a, b) => a.or(b),
        };
    }
}

/// Keeps only the requested ticker's rows when the source carries a ticker column.
fn filter_ticker(series: TickSeries, ticker: &str) -> TickSeries {
    let Some(col) = series.column(TICKER_COLUMN) else {
        return series;
    };
    let keep: Vec<bool> = (0..series.len())
        .map(|i| match col.data.value(i) {
            Value::Text(t) => t == ticker,
            Value::Float(x) => x.to_string() == ticker,
            Value::Null => false,
        })
        .collect();
    let mut kept = series.filter_rows(|i, _| keep[i]);
    kept.drop_column(TICKER_COLUMN);
    kept
}

fn derive_mid(series: TickSeries) -> Result<TickSeries, StoreError> {
    if series.has_column("mid") {
        return Ok(series);
    }
    let (Some(bid), Some(ask)) = (series.floats("bid"), series.floats("ask")) else {
        return Ok(series);
    };
    let mid: Vec<Option<f64>> = bid
        .iter()
        .zip(ask)
        .map(|(b, a)| Some(((*b)? + (*a)?) / 2.0))
        .collect();
    series.with_column(Column::floats("mid", mid))
}

/// Ticker filtering, derived fields and the mandatory field check for one chunk.
pub fn normalize(
    series: TickSeries,
    ticker: &str,
    kind: DataKind,
    source: &SourceRef,
) -> Result<TickSeries, StoreError> {
    let mut series = filter_ticker(series, ticker);
    if kind == DataKind::Market {
        series = derive_mid(series)?;
    }
    let missing: Vec<&str> = kind
        .required_fields()
        .iter()
        .copied()
        .filter(|f| !series.has_column(f))
        .collect();
    if !missing.is_empty() {
        return Err(StoreError::source_format(
            source,
            format!("{kind} data is missing required fields: {}", missing.join(", ")),
        ));
    }
    Ok(series.into_ascending())
}

pub struct IngestionController {
    registry: Arc<StoreRegistry>,
    default_chunk_size: Option<usize>,
    parallel_tickers: bool,
}

impl IngestionController {
    pub fn new(registry: Arc<StoreRegistry>) -> Self {
        Self {
            registry,
            default_chunk_size: None,
            parallel_tickers: false,
        }
    }

    pub fn with_default_chunk_size(mut self, rows: Option<usize>) -> Self {
        self.default_chunk_size = rows.filter(|n| *n > 0);
        self
    }

    pub fn with_parallel_tickers(mut self, on: bool) -> Self {
        self.parallel_tickers = on;
        self
    }

    pub fn registry(&self) -> &Arc<StoreRegistry> {
        &self.registry
    }

    /// Reads the whole source into the target ticker. Chunks already committed stay
    /// committed when a later chunk fails.
    pub fn convert_source_to_table(&self, req: &IngestRequest) -> Result<IngestReport, StoreError> {
        let (adapter, loc) = self
            .registry
            .locate(&req.data_store, &req.table, &req.ticker)?;
        let policy = req.policy();
        let reader = SourceReader::open(
            &req.source,
            SourceOptions {
                chunk_size: req.chunk_size.or(self.default_chunk_size),
                reverse: req.reverse,
                range: None,
            },
        )?;
        tracing::info!(location=%loc, source=%req.source, ?policy, kind=%req.kind, "converting source");

        let mut report = IngestReport {
            location: loc.clone(),
            chunks: 0,
            rows_written: 0,
            range: None,
        };
        let mut carry: Option<TickSeries> = None;
        let mut chunks = reader.chunks().peekable();
        while let Some(chunk) = chunks.next() {
            let chunk = normalize(chunk?, &req.ticker, req.kind, &req.source)?;
            let mut pending = match carry.take() {
                Some(held) => TickSeries::concat(vec![held, chunk])?.into_ascending(),
                None => chunk,
            };
            if chunks.peek().is_some() {
                carry = Some(pending.split_off_trailing_ties());
            }
            if !pending.is_empty() {
                write_chunk(adapter.as_ref(), &loc, pending, policy, req.dedupe, &mut report)?;
            }
        }
        if let Some(held) = carry.filter(|h| !h.is_empty()) {
            write_chunk(adapter.as_ref(), &loc, held, policy, req.dedupe, &mut report)?;
        }
        if report.chunks == 0 && !policy.is_append() {
            // An empty source still clears what the replace policy covers.
            adapter.write(&loc, TickSeries::empty(), policy)?;
        }
        tracing::info!(location=%loc, chunks=report.chunks, rows=report.rows_written, "conversion done");
        Ok(report)
    }

    /// Runs several conversions, one result per request in request order.
    ///
    /// With parallel tickers enabled, distinct `(data store, table, ticker)` targets run on
    /// their own scoped threads; requests for the same target stay sequential. A table
    /// replace anywhere in the batch pins every request for that table to one worker.
    pub fn convert_many(&self, reqs: &[IngestRequest]) -> Vec<Result<IngestReport, StoreError>> {
        if !self.parallel_tickers || reqs.len() < 2 {
            return reqs.iter().map(|r| self.convert_source_to_table(r)).collect();
        }
        let groups = worker_groups(reqs);
        tracing::info!(requests = reqs.len(), workers = groups.len(), "converting in parallel");

        let mut results: Vec<Option<Result<IngestReport, StoreError>>> = (0..reqs.len()).map(|_| None).collect();
        std::thread::scope(|s| {
            let mut handles = Vec::with_capacity(groups.len());
            for (g, idxs) in groups.iter().enumerate() {
                let work = move || {
                    idxs.iter()
                        .map(|&i| (i, self.convert_source_to_table(&reqs[i])))
                        .collect::<Vec<_>>()
                };
                match std::thread::Builder::new()
                    .name(format!("tc-ingest-{g}"))
                    .spawn_scoped(s, work)
                {
                    Ok(h) => handles.push((idxs, h)),
                    Err(e) => {
                        tracing::error!(error=%e, "failed to spawn ingest worker");
                        for &i in idxs {
                            results[i] = Some(Err(worker_error(&reqs[i], e.to_string())));
                        }
                    }
                }
            }
            for (idxs, h) in handles {
                match h.join() {
                    Ok(done) => {
                        for (i, r) in done {
                            results[i] = Some(r);
                        }
                    }
                    Err(_) => {
                        for &i in idxs {
                            results[i] = Some(Err(worker_error(&reqs[i], "worker panicked".into())));
                        }
                    }
                }
            }
        });
        results
            .into_iter()
            .zip(reqs)
            .map(|(r, req)| r.unwrap_or_else(|| Err(worker_error(req, "no result".into()))))
            .collect()
    }

    /// Writes an in-memory series under `policy`.
    pub fn append_series(
        &self,
        data_store: &str,
        table: &str,
        ticker: &str,
        series: TickSeries,
        policy: WritePolicy,
        dedupe: bool,
    ) -> Result<usize, StoreError> {
        let (adapter, loc) = self.registry.locate(data_store, table, ticker)?;
        adapter.append_range(&loc, series, policy, dedupe)
    }

    /// Removes `[range.start, range.finish]` of one ticker; returns the rows removed.
    pub fn delete_range(
        &self,
        data_store: &str,
        table: &str,
        ticker: &str,
        range: &TimeRange,
    ) -> Result<usize, StoreError> {
        let (adapter, loc) = self.registry.locate(data_store, table, ticker)?;
        let removed = adapter.delete_range(&loc, range)?;
        tracing::info!(location=%loc, %range, removed, "deleted range");
        Ok(removed)
    }
}

/// Request indices per worker, each group in request order.
fn worker_groups(reqs: &[IngestRequest]) -> Vec<Vec<usize>> {
    let table_wide: HashSet<(&str, &str)> = reqs
        .iter()
        .filter(|r| r.policy() == WritePolicy::ReplaceTable)
        .map(IngestRequest::table_key)
        .collect();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut by_key: HashMap<(&str, &str, Option<&str>), usize> = HashMap::new();
    for (i, r) in reqs.iter().enumerate() {
        let (store, table) = r.table_key();
        let ticker = (!table_wide.contains(&(store, table))).then_some(r.ticker.as_str());
        let g = *by_key.entry((store, table, ticker)).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[g].push(i);
    }
    groups
}

fn worker_error(req: &IngestRequest, why: String) -> StoreError {
    StoreError::BackendWrite {
        location: format!("{}/{}/{}", req.data_store, req.table, req.ticker),
        op: "convert_many",
        source: why.into(),
    }
}

fn write_chunk(
    adapter: &dyn BackendAdapter,
    loc: &StoreLocation,
    chunk: TickSeries,
    policy: WritePolicy,
    dedupe: bool,
    report: &mut IngestReport,
) -> Result<(), StoreError> {
    let effective = if report.chunks == 0 {
        policy
    } else {
        WritePolicy::Append
    };
    let span = chunk.extent();
    let rows = adapter.append_range(loc, chunk, effective, dedupe)?;
    tracing::debug!(location=%loc, chunk=report.chunks, rows, policy=?effective, "chunk written");
    report.record(rows, span);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::write_csv;
    use crate::testing::{series, MemoryAdapter};
    use rstest::rstest;

    fn controller() -> (IngestionController, Arc<MemoryAdapter>) {
        let mem = Arc::new(MemoryAdapter::new(true));
        let registry = StoreRegistry::builder().with_store("mem", mem.clone()).build();
        (IngestionController::new(Arc::new(registry)), mem)
    }

    fn stored(ctl: &IngestionController, ticker: &str) -> TickSeries {
        let (adapter, loc) = ctl.registry().locate("mem", "fx", ticker).expect("locate");
        adapter.read(&loc, None).expect("read")
    }

    #[rstest]
    #[case(None)]
    #[case(Some(3))]
    #[case(Some(1))]
    fn chunk_boundaries_never_split_an_instant(#[case] chunk: Option<usize>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ties.csv");
        write_csv(&path, &series(&[1, 2, 2, 2, 3, 4, 4, 5])).expect("csv");
        let (ctl, _) = controller();
        let mut req = IngestRequest::new(path.as_path(), "mem", "fx", "EURUSD").with_dedupe(false);
        req.chunk_size = chunk;
        let report = ctl.convert_source_to_table(&req).expect("convert");
        assert_eq!(report.rows_written, 8);
        assert_eq!(report.range, Some(TimeRange::from_ns(1, 5).unwrap()));
        assert_eq!(stored(&ctl, "EURUSD").timestamps(), &[1, 2, 2, 2, 3, 4, 4, 5]);
    }

    #[test]
    fn later_chunks_do_not_replace_earlier_ones() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("a.csv");
        write_csv(&path, &series(&[10, 11, 12, 13, 14])).expect("csv");
        let (ctl, mem) = controller();
        mem.seed(&crate::testing::location("EURUSD"), series(&[1, 2]));
        let req = IngestRequest::new(path.as_path(), "mem", "fx", "EURUSD").with_chunk_size(2);
        let report = ctl.convert_source_to_table(&req).expect("convert");
        assert_eq!(report.chunks, 3);
        assert_eq!(stored(&ctl, "EURUSD").timestamps(), &[10, 11, 12, 13, 14]);
    }

    #[test]
    fn ticker_column_filters_and_mid_is_derived() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("multi.csv");
        std::fs::write(
            &path,
            "date,ticker,bid,ask\n2017-01-01,EURUSD,1.0,1.2\n2017-01-02,GBPUSD,2.0,2.2\n2017-01-03,EURUSD,1.1,\n",
        )
        .expect("write");
        let (ctl, _) = controller();
        ctl.convert_source_to_table(&IngestRequest::new(path.as_path(), "mem", "fx", "EURUSD"))
            .expect("convert");
        let got = stored(&ctl, "EURUSD");
        assert_eq!(got.len(), 2);
        assert!(!got.has_column(TICKER_COLUMN));
        let mid = got.floats("mid").expect("mid");
        assert!((mid[0].expect("mid") - 1.1).abs() < 1e-12);
        assert_eq!(mid[1], None);
    }

    #[test]
    fn trade_sources_need_their_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("trades.csv");
        std::fs::write(&path, "date,executed_price\n2017-01-01,1.0\n").expect("write");
        let (ctl, _) = controller();
        let req = IngestRequest::new(path.as_path(), "mem", "trades", "EURUSD").with_kind(DataKind::Trade);
        let err = ctl.convert_source_to_table(&req).unwrap_err();
        assert!(matches!(err, StoreError::SourceFormat { ref reason, .. } if reason.contains("notional, side")));
    }

    #[test]
    fn empty_source_still_clears_on_replace() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("empty.csv");
        std::fs::write(&path, "date,mid\n").expect("write");
        let (ctl, mem) = controller();
        mem.seed(&crate::testing::location("EURUSD"), series(&[1, 2]));
        let report = ctl
            .convert_source_to_table(&IngestRequest::new(path.as_path(), "mem", "fx", "EURUSD"))
            .expect("convert");
        assert_eq!(report.rows_written, 0);
        assert!(stored(&ctl, "EURUSD").is_empty());
    }

    #[test]
    fn parallel_conversions_keep_request_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("s.csv");
        write_csv(&path, &series(&[1, 2, 3])).expect("csv");
        let later = dir.path().join("t.csv");
        write_csv(&later, &series(&[7, 8])).expect("csv");
        let (ctl, _) = controller();
        let ctl = ctl.with_parallel_tickers(true);
        let reqs = vec![
            IngestRequest::new(path.as_path(), "mem", "fx", "EURUSD")
                .with_policies(Existence::Append, Existence::Replace),
            IngestRequest::new(path.as_path(), "mem", "fx", "GBPUSD")
                .with_policies(Existence::Append, Existence::Replace),
            IngestRequest::new(later.as_path(), "mem", "fx", "EURUSD")
                .with_policies(Existence::Append, Existence::Append),
            IngestRequest::new(path.as_path(), "nope", "fx", "EURUSD"),
        ];
        let results = ctl.convert_many(&reqs);
        assert_eq!(results.len(), 4);
        assert_eq!(results[0].as_ref().expect("eur").rows_written, 3);
        assert_eq!(results[2].as_ref().expect("eur append").rows_written, 2);
        assert!(matches!(results[3], Err(StoreError::UnknownDataStore(_))));
        assert_eq!(stored(&ctl, "EURUSD").timestamps(), &[1, 2, 3, 7, 8]);
        assert_eq!(stored(&ctl, "GBPUSD").timestamps(), &[1, 2, 3]);
    }

    #[test]
    fn table_replace_pins_the_whole_table_to_one_worker() {
        let req = |table: &str, ticker: &str, table_policy: Existence| {
            IngestRequest::new("s.csv", "mem", table, ticker).with_policies(table_policy, Existence::Replace)
        };
        let reqs = vec![
            req("fx", "EURUSD", Existence::Append),
            req("fx", "GBPUSD", Existence::Replace),
            req("rates", "US10Y", Existence::Append),
            req("rates", "DE10Y", Existence::Append),
            req("fx", "USDJPY", Existence::Append),
        ];
        assert_eq!(worker_groups(&reqs), vec![vec![0, 1, 4], vec![2], vec![3]]);
    }

    #[test]
    fn parallel_table_replace_matches_a_sequential_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ts: Vec<i64> = (1..=400).collect();
        let path = dir.path().join("s.csv");
        write_csv(&path, &series(&ts)).expect("csv");
        let reqs: Vec<IngestRequest> = ["EURUSD", "GBPUSD"]
            .into_iter()
            .map(|t| IngestRequest::new(path.as_path(), "mem", "fx", t).with_chunk_size(10))
            .collect();

        let (ctl, _) = controller();
        let ctl = ctl.with_parallel_tickers(true);
        for _ in 0..5 {
            for r in ctl.convert_many(&reqs) {
                assert_eq!(r.expect("convert").rows_written, 400);
            }
            // the later table replace drops the earlier ticker
            assert!(stored(&ctl, "EURUSD").is_empty());
            assert_eq!(stored(&ctl, "GBPUSD").len(), 400);
        }
    }
}
