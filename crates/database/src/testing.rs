//! In-memory adapter used by unit tests of the shared contract.

use crate::adapter::{BackendAdapter, Capabilities, Extent};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tc_types::{BackendKind, StoreError, StoreLocation, TickSeries, TimeRange};

pub fn location(ticker: &str) -> StoreLocation {
    StoreLocation::new(BackendKind::VersionStore, "mem", "fx", ticker).expect("location")
}

pub fn series(ts: &[i64]) -> TickSeries {
    let mid: Vec<f64> = ts.iter().map(|t| *t as f64 / 10.0).collect();
    TickSeries::from_floats(ts.to_vec(), &[("mid", mid)]).expect("series")
}

pub struct MemoryAdapter {
    native: bool,
    data: Mutex<HashMap<(String, String), TickSeries>>,
    fail_replace: AtomicBool,
    native_deletes: AtomicUsize,
}

impl MemoryAdapter {
    pub fn new(native: bool) -> Self {
        Self {
            native,
            data: Mutex::new(HashMap::new()),
            fail_replace: AtomicBool::new(false),
            native_deletes: AtomicUsize::new(0),
        }
    }

    pub fn seed(&self, loc: &StoreLocation, s: TickSeries) {
        self.data
            .lock()
            .insert((loc.table.clone(), loc.ticker.clone()), s);
    }

    pub fn fail_replace(&self, on: bool) {
        self.fail_replace.store(on, Ordering::SeqCst);
    }

    pub fn native_deletes(&self) -> usize {
        self.native_deletes.load(Ordering::SeqCst)
    }

    fn key(loc: &StoreLocation) -> (String, String) {
        (loc.table.clone(), loc.ticker.clone())
    }
}

impl BackendAdapter for MemoryAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::VersionStore
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            native_range_delete: self.native,
        }
    }

    fn drop_table(&self, table: &str) -> Result<(), StoreError> {
        self.data.lock().retain(|(t, _), _| t != table);
        Ok(())
    }

    fn replace_ticker(&self, loc: &StoreLocation, series: &TickSeries) -> Result<usize, StoreError> {
        if self.fail_replace.load(Ordering::SeqCst) {
            return Err(StoreError::BackendWrite {
                location: loc.to_string(),
                op: "replace_ticker",
                source: "injected failure".into(),
            });
        }
        self.data.lock().insert(Self::key(loc), series.clone());
        Ok(series.len())
    }

    fn append_rows(&self, loc: &StoreLocation, series: &TickSeries) -> Result<usize, StoreError> {
        let mut data = self.data.lock();
        let existing = data.remove(&Self::key(loc)).unwrap_or_default();
        let merged = TickSeries::concat(vec![existing, series.clone()])?;
        data.insert(Self::key(loc), merged);
        Ok(series.len())
    }

    fn read_range(&self, loc: &StoreLocation, range: &TimeRange) -> Result<TickSeries, StoreError> {
        Ok(self
            .data
            .lock()
            .get(&Self::key(loc))
            .map(|s| s.within(range))
            .unwrap_or_default())
    }

    fn extent(&self, loc: &StoreLocation) -> Result<Option<Extent>, StoreError> {
        Ok(self.data.lock().get(&Self::key(loc)).and_then(|s| {
            s.extent().map(|r| Extent {
                min_ts_ns: r.start_ns(),
                max_ts_ns: r.finish_ns(),
                rows: s.len() as u64,
            })
        }))
    }

    fn delete_range_native(&self, loc: &StoreLocation, range: &TimeRange) -> Result<usize, StoreError> {
        self.native_deletes.fetch_add(1, Ordering::SeqCst);
        let mut data = self.data.lock();
        let Some(existing) = data.get(&Self::key(loc)) else {
            return Ok(0);
        };
        let kept = existing.excluding(range);
        let removed = existing.len() - kept.len();
        data.insert(Self::key(loc), kept);
        Ok(removed)
    }
}
