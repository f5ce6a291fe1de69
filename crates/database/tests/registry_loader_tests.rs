mod common;

use anyhow::Result;
use common::{assert_close, market_series};
use std::collections::HashMap;
use std::sync::Arc;
use tc_database::source::write_csv;
use tc_database::{
    DataRequest, IngestRequest, IngestionController, LakeConfig, MarketTradeLoader, StoreRegistry,
};
use tc_types::{BackendKind, StoreError, TimeRange, WritePolicy};

fn registry_from(vars: HashMap<&'static str, String>) -> Result<Arc<StoreRegistry>> {
    let cfg = LakeConfig::from_lookup(|k| vars.get(k).cloned())?;
    Ok(Arc::new(StoreRegistry::from_config(&cfg)?))
}

#[test]
fn one_configuration_serves_all_four_backends() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let root = dir.path().display();
    let stores = format!(
        "docs=version_store:{root}/docs;ticks=tick_store:{root}/ticks;duck=columnar_db:{root}/c.duckdb;sql=relational:sqlite://{root}/r.db?mode=rwc"
    );
    let registry = registry_from(HashMap::from([
        ("TC_DATA_STORES", stores),
        ("TC_TICK_BUCKET_ROWS", "50".to_string()),
    ]))?;
    assert_eq!(registry.ids(), vec!["docs", "duck", "sql", "ticks"]);
    assert_eq!(registry.get("sql")?.kind(), BackendKind::Relational);

    let s = market_series(120, (2016, 1, 1), (2016, 1, 10));
    let path = dir.path().join("eurusd.csv");
    write_csv(&path, &s)?;
    let ctl = IngestionController::new(registry.clone()).with_parallel_tickers(true);
    let reqs: Vec<IngestRequest> = registry
        .ids()
        .into_iter()
        .map(|id| IngestRequest::new(path.as_path(), id, "fx", "EURUSD").with_chunk_size(33))
        .collect();
    for result in ctl.convert_many(&reqs) {
        assert_eq!(result?.rows_written, 120);
    }

    let loader = MarketTradeLoader::new(registry.clone());
    let window = TimeRange::from_ns(s.timestamps()[10], s.timestamps()[59])?;
    for id in registry.ids() {
        let got = loader.get_market_data(&DataRequest::new(id, "fx", "EURUSD", window))?;
        assert_close(&s.within(&window), &got);
    }
    Ok(())
}

#[test]
fn unknown_data_store_is_reported_everywhere() -> Result<()> {
    let registry = registry_from(HashMap::from([(
        "TC_DATA_STORES",
        "duck=columnar_db::memory:".to_string(),
    )]))?;
    let loader = MarketTradeLoader::new(registry.clone());
    let ctl = IngestionController::new(registry);

    let req = DataRequest::new("mongo", "fx", "EURUSD", TimeRange::everything());
    assert!(matches!(loader.get_data(&req), Err(StoreError::UnknownDataStore(id)) if id == "mongo"));
    let err = ctl
        .append_series("mongo", "fx", "EURUSD", market_series(3, (2016, 1, 1), (2016, 1, 2)), WritePolicy::Append, true)
        .unwrap_err();
    assert!(matches!(err, StoreError::UnknownDataStore(_)));
    assert!(matches!(
        ctl.delete_range("mongo", "fx", "EURUSD", &TimeRange::everything()),
        Err(StoreError::UnknownDataStore(_))
    ));
    Ok(())
}

#[test]
fn empty_ranges_and_bad_requests() -> Result<()> {
    let registry = registry_from(HashMap::from([(
        "TC_DATA_STORES",
        "duck=columnar_db::memory:".to_string(),
    )]))?;
    let loader = MarketTradeLoader::new(registry.clone());
    let ctl = IngestionController::new(registry);
    ctl.append_series(
        "duck",
        "fx",
        "EURUSD",
        market_series(10, (2016, 1, 1), (2016, 1, 2)),
        WritePolicy::ReplaceTicker,
        true,
    )?;

    let later = DataRequest::parse("duck", "fx", "EURUSD", "2017-01-01", "2017-02-01")?;
    assert!(loader.get_data(&later)?.is_empty());

    assert!(matches!(
        DataRequest::parse("duck", "fx", "EURUSD", "2017-02-01", "2017-01-01"),
        Err(StoreError::InvalidRequest(_))
    ));
    assert!(matches!(
        loader.get_data(&DataRequest::new("duck", "fx", "EUR/USD", TimeRange::everything())),
        Err(StoreError::InvalidRequest(_))
    ));
    Ok(())
}
