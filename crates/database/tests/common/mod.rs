#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use std::sync::Arc;
use tc_database::config::{LakeConfig, StoreSpec};
use tc_database::registry::open_store;
use tc_database::StoreRegistry;
use tc_types::time::dt_to_ns;
use tc_types::{BackendKind, Column, TickSeries};
use tempfile::TempDir;

pub const TOLERANCE: f64 = 1e-5;

/// One backend opened inside its own temp directory.
pub struct Lake {
    pub dir: TempDir,
    pub registry: Arc<StoreRegistry>,
    pub id: &'static str,
}

pub fn lake(kind: BackendKind) -> Lake {
    let dir = tempfile::tempdir().expect("tempdir");
    let target = match kind {
        BackendKind::VersionStore => dir.path().join("vs").display().to_string(),
        BackendKind::TickStore => dir.path().join("ts").display().to_string(),
        BackendKind::ColumnarDb => dir.path().join("columnar.duckdb").display().to_string(),
        BackendKind::Relational => format!("sqlite://{}?mode=rwc", dir.path().join("rel.db").display()),
    };
    let cfg = LakeConfig {
        zstd_level: 3,
        keep_versions: 2,
        bucket_rows: 128,
        relational_max_conns: 2,
        ..LakeConfig::default()
    };
    let id = "store";
    let spec = StoreSpec {
        id: id.to_string(),
        kind,
        target,
    };
    let adapter = open_store(&spec, &cfg).expect("open store");
    let registry = StoreRegistry::builder().with_store(id, adapter).build();
    Lake {
        dir,
        registry: Arc::new(registry),
        id,
    }
}

/// `n` evenly spaced EURUSD-like quotes between two UTC dates.
pub fn market_series(n: usize, from: (i32, u32, u32), to: (i32, u32, u32)) -> TickSeries {
    let start = dt_to_ns(Utc.with_ymd_and_hms(from.0, from.1, from.2, 0, 0, 0).unwrap());
    let finish = dt_to_ns(Utc.with_ymd_and_hms(to.0, to.1, to.2, 0, 0, 0).unwrap());
    let step = (finish - start) / (n.max(2) as i64 - 1);
    let ts: Vec<i64> = (0..n as i64).map(|i| start + i * step).collect();
    let mid: Vec<f64> = (0..n).map(|i| 1.1 + 0.05 * (i as f64 / 37.0).sin()).collect();
    let bid: Vec<f64> = mid.iter().map(|m| m - 0.00012).collect();
    let ask: Vec<f64> = mid.iter().map(|m| m + 0.00012).collect();
    TickSeries::from_floats(ts, &[("bid", bid), ("ask", ask), ("mid", mid)]).unwrap()
}

pub fn trade_series(n: usize) -> TickSeries {
    let base = market_series(n, (2017, 1, 1), (2017, 1, 2));
    let sides: Vec<Option<String>> = (0..n)
        .map(|i| Some(if i % 3 == 0 { "sell" } else { "buy" }.to_string()))
        .collect();
    let price: Vec<Option<f64>> = base.floats("mid").unwrap().to_vec();
    let notional: Vec<Option<f64>> = (0..n).map(|i| Some(1_000_000.0 + i as f64)).collect();
    let (ts, _) = base.into_parts();
    TickSeries::new(
        ts,
        vec![
            Column::floats("executed_price", price),
            Column::floats("notional", notional),
            Column::texts("side", sides),
        ],
    )
    .unwrap()
}

/// Same instants and every column of `expected` present with equal values (floats within tolerance).
pub fn assert_close(expected: &TickSeries, got: &TickSeries) {
    assert_eq!(expected.len(), got.len(), "row count");
    assert_eq!(expected.timestamps(), got.timestamps(), "timestamps");
    for col in expected.columns() {
        let other = got
            .column(&col.name)
            .unwrap_or_else(|| panic!("column {} missing", col.name));
        for row in 0..expected.len() {
            let (a, b) = (col.data.value(row), other.data.value(row));
            match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => assert!(
                    (x - y).abs() <= TOLERANCE,
                    "{} row {row}: {x} vs {y}",
                    col.name
                ),
                _ => assert_eq!(a, b, "{} row {row}", col.name),
            }
        }
    }
}
