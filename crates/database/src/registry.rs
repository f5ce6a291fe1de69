use crate::adapter::BackendAdapter;
use crate::config::{LakeConfig, StoreSpec};
use crate::stores::{ColumnarStore, RelationalStore, TickStore, VersionStore};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tc_types::{BackendKind, StoreError, StoreLocation};

pub type SharedAdapter = Arc<dyn BackendAdapter>;

/// Data-store id to adapter map. Built once, then only read.
pub struct StoreRegistry {
    stores: HashMap<String, SharedAdapter>,
}

#[derive(Default)]
pub struct StoreRegistryBuilder {
    stores: HashMap<String, SharedAdapter>,
}

impl StoreRegistryBuilder {
    pub fn with_store(mut self, id: impl Into<String>, adapter: SharedAdapter) -> Self {
        self.stores.insert(id.into(), adapter);
        self
    }

    pub fn build(self) -> StoreRegistry {
        StoreRegistry {
            stores: self.stores,
        }
    }
}

pub fn open_store(spec: &StoreSpec, cfg: &LakeConfig) -> Result<SharedAdapter, StoreError> {
    let adapter: SharedAdapter = match spec.kind {
        BackendKind::VersionStore => Arc::new(VersionStore::open(
            &spec.target,
            cfg.zstd_level,
            cfg.keep_versions,
        )?),
        BackendKind::TickStore => Arc::new(TickStore::open(
            &spec.target,
            cfg.zstd_level,
            cfg.bucket_rows,
        )?),
        BackendKind::ColumnarDb => {
            let file = (spec.target != ":memory:").then(|| Path::new(&spec.target));
            Arc::new(ColumnarStore::open(file)?)
        }
        BackendKind::Relational => Arc::new(RelationalStore::connect(
            &spec.target,
            cfg.relational_max_conns,
        )?),
    };
    tracing::info!(id=%spec.id, kind=%spec.kind, "opened data store");
    Ok(adapter)
}

impl StoreRegistry {
    pub fn builder() -> StoreRegistryBuilder {
        StoreRegistryBuilder::default()
    }

    pub fn from_config(cfg: &LakeConfig) -> Result<Self, StoreError> {
        let mut builder = Self::builder();
        for spec in &cfg.stores {
            builder = builder.with_store(spec.id.clone(), open_store(spec, cfg)?);
        }
        Ok(builder.build())
    }

    pub fn get(&self, data_store: &str) -> Result<&SharedAdapter, StoreError> {
        self.stores
            .get(data_store)
            .ok_or_else(|| StoreError::UnknownDataStore(data_store.to_string()))
    }

    /// Resolves the adapter and builds the validated location for one ticker.
    pub fn locate(
        &self,
        data_store: &str,
        table: &str,
        ticker: &str,
    ) -> Result<(SharedAdapter, StoreLocation), StoreError> {
        let adapter = self.get(data_store)?;
        let loc = StoreLocation::new(adapter.kind(), data_store, table, ticker)?;
        Ok((Arc::clone(adapter), loc))
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.stores.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}
