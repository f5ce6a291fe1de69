use anyhow::{Context, Result, anyhow, bail};
use std::sync::Arc;
use tc_database::ingest::normalize;
use tc_database::source;
use tc_database::{
    DataRequest, IngestReport, IngestRequest, IngestionController, LakeConfig, MarketTradeLoader, SourceRef,
    StoreRegistry,
};
use serde::Serialize;
use tc_types::{DataKind, Existence, FieldKind, TickSeries, TimeRange, Value, WritePolicy};
use tracing::level_filters::LevelFilter;

const TOLERANCE: f64 = 1e-5;
const MAX_FAILURE_LINES: usize = 40; // cap how many mismatches we print

/// Machine-readable outcome, printed as JSON and optionally written to `TC_CHECK_REPORT`.
#[derive(Serialize)]
struct CheckSummary<'a> {
    kind: DataKind,
    policy: WritePolicy,
    ingest: &'a IngestReport,
    compared_range: Option<TimeRange>,
    fields: Vec<(String, FieldKind)>,
    rows_compared: usize,
    tolerance: f64,
    mismatches: usize,
    sample: &'a [String],
}

fn emit(summary: &CheckSummary) -> Result<()> {
    let json = serde_json::to_string_pretty(summary)?;
    println!("{json}");
    if let Ok(path) = std::env::var("TC_CHECK_REPORT") {
        std::fs::write(&path, &json).with_context(|| format!("writing report to {path}"))?;
    }
    Ok(())
}

fn required_env(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| anyhow!("{key} not set. Ensure .env exists or export it."))
}

/// Row-by-row comparison of the fields that define the data kind.
fn mismatches(kind: DataKind, expected: &TickSeries, got: &TickSeries) -> Vec<String> {
    let mut out = Vec::new();
    if expected.timestamps() != got.timestamps() {
        out.push(format!(
            "timestamps differ: expected {} rows, read back {}",
            expected.len(),
            got.len()
        ));
        return out;
    }
    for field in kind.required_fields() {
        for row in 0..expected.len() {
            let (Some(a), Some(b)) = (expected.value(field, row), got.value(field, row)) else {
                out.push(format!("field '{field}' missing"));
                break;
            };
            let same = match (&a, &b) {
                (Value::Float(x), Value::Float(y)) => (x - y).abs() <= TOLERANCE || (x.is_nan() && y.is_nan()),
                _ => a == b,
            };
            if !same {
                out.push(format!(
                    "{field} at ts_ns={}: expected {a:?}, read back {b:?}",
                    expected.timestamps()[row]
                ));
            }
        }
    }
    out
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::INFO)
        .with_target(true)
        .with_thread_names(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true)
        .compact()
        .init();

    // 1) Open every configured data store
    let cfg = LakeConfig::from_env().context("invalid TC_* configuration")?;
    let registry = Arc::new(StoreRegistry::from_config(&cfg).context("failed to open data stores")?);

    // 2) What to check
    let source = SourceRef::from(required_env("TC_CHECK_SOURCE")?);
    let store = required_env("TC_CHECK_STORE")?;
    let table = required_env("TC_CHECK_TABLE")?;
    let ticker = required_env("TC_CHECK_TICKER")?;
    let kind: DataKind = std::env::var("TC_CHECK_KIND")
        .unwrap_or_else(|_| "market".to_string())
        .parse()
        .map_err(|_| anyhow!("TC_CHECK_KIND must be market or trade"))?;

    // 3) Ingest with replace/replace
    let ingest = IngestionController::new(registry.clone())
        .with_default_chunk_size(cfg.chunk_size)
        .with_parallel_tickers(cfg.parallel_tickers);
    let req = IngestRequest::new(source.clone(), &store, &table, &ticker)
        .with_policies(Existence::Replace, Existence::Replace)
        .with_kind(kind);
    let report = ingest
        .convert_source_to_table(&req)
        .with_context(|| format!("ingesting {source} into {store}/{table}/{ticker}"))?;
    println!(
        "ingested {} rows in {} chunks into {}",
        report.rows_written, report.chunks, report.location
    );

    // 4) Direct read of the source, normalised the same way
    let direct = source::read(&source, None).with_context(|| format!("reading {source}"))?;
    let expected = normalize(direct, &ticker, kind, &source)?.dedupe_keep_last();
    let Some(range) = expected.extent() else {
        println!("source is empty; nothing to compare");
        return emit(&CheckSummary {
            kind,
            policy: req.policy(),
            ingest: &report,
            compared_range: None,
            fields: Vec::new(),
            rows_compared: 0,
            tolerance: TOLERANCE,
            mismatches: 0,
            sample: &[],
        });
    };

    // 5) Read back through the loader and compare
    let loader = MarketTradeLoader::new(registry);
    let got = loader.get_data(&DataRequest {
        kind,
        ..DataRequest::new(&store, &table, &ticker, range)
    })?;
    let failures = mismatches(kind, &expected, &got);
    let shown = &failures[..failures.len().min(MAX_FAILURE_LINES)];
    emit(&CheckSummary {
        kind,
        policy: req.policy(),
        ingest: &report,
        compared_range: Some(range),
        fields: got.schema(),
        rows_compared: expected.len(),
        tolerance: TOLERANCE,
        mismatches: failures.len(),
        sample: shown,
    })?;
    if failures.is_empty() {
        println!("OK: {} rows match within {TOLERANCE:e} over {range}", expected.len());
        return Ok(());
    }
    for line in shown {
        eprintln!("MISMATCH {line}");
    }
    if failures.len() > MAX_FAILURE_LINES {
        eprintln!("... and {} more", failures.len() - MAX_FAILURE_LINES);
    }
    bail!("{} mismatches between source and {}", failures.len(), report.location)
}
