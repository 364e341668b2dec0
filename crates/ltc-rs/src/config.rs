//! Runtime configuration shared by the executor and the active backend.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::backend::BackendImpl;
use crate::device::Device;
use crate::env;
use crate::executor::LazyGraphExecutor;

/// Runtime settings, loadable from the environment or a JSON document.
///
/// [`RuntimeConfig::apply`] is the single coordinated writer of the backend's replication
/// device list and RNG seed; call it before concurrent execution starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub compile_cache_capacity: usize,
    pub replication_devices: Vec<String>,
    pub rng_seed: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            compile_cache_capacity: env::DEFAULT_COMPILE_CACHE_SIZE,
            replication_devices: Vec::new(),
            rng_seed: None,
        }
    }
}

impl RuntimeConfig {
    /// Reads `LTC_COMPILE_CACHE_SIZE`, `LTC_REPLICATION_DEVICES` and `LTC_RNG_SEED`.
    pub fn from_env() -> Self {
        RuntimeConfig {
            compile_cache_capacity: env::compile_cache_size(),
            replication_devices: env::replication_devices(),
            rng_seed: env::rng_seed(),
        }
    }

    pub fn from_json_str(document: &str) -> Result<Self> {
        serde_json::from_str(document).context("failed to parse runtime config")
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize runtime config")
    }

    /// Pushes the replication devices and RNG seed into `backend`.
    ///
    /// Entries that are not `<TYPE>:<ordinal>` device strings are skipped with a warning.
    /// An empty list clears the backend's replication devices.
    pub fn apply(&self, backend: &dyn BackendImpl) {
        let devices: Vec<String> = self
            .replication_devices
            .iter()
            .filter(|entry| {
                let valid = Device::parse_backend_string(entry).is_some();
                if !valid {
                    tracing::warn!(device = %entry, "ignoring malformed replication device");
                }
                valid
            })
            .cloned()
            .collect();
        if devices.is_empty() {
            backend.set_replication_devices(None);
        } else {
            tracing::info!(?devices, "configured replication devices");
            backend.set_replication_devices(Some(Arc::new(devices)));
        }
        if let Some(seed) = self.rng_seed {
            backend.set_rng_seed(seed);
        }
    }

    /// Executor over `backend` sized by this config's compile-cache capacity.
    pub fn build_executor(&self, backend: Arc<dyn BackendImpl>) -> Arc<LazyGraphExecutor> {
        LazyGraphExecutor::with_cache_capacity(backend, self.compile_cache_capacity)
    }
}
