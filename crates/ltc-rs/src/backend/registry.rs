//! Process-wide backend registration.
//!
//! Two layers live here. The active slot holds the single backend every lazy tensor in the
//! process talks to: it is written once at startup and frozen afterwards, so reads from any
//! thread need no further locking. Registering a second backend is a contract violation.
//! The named catalog maps backend names to constructors so that binaries can pick a backend
//! at runtime (`activate_backend("cpu")`) without naming its type.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use anyhow::{anyhow, Result};

use super::interface::BackendImpl;
use crate::error::{fatal, ContractViolation};

/// Factory function that creates a new backend instance.
pub type BackendConstructor = Box<dyn Fn() -> Arc<dyn BackendImpl> + Send + Sync>;

static ACTIVE_BACKEND: OnceLock<Arc<dyn BackendImpl>> = OnceLock::new();

/// Installs `backend` as the process backend. Fatal if one is already installed.
pub fn register_backend(backend: Arc<dyn BackendImpl>) {
    if let Some(existing) = ACTIVE_BACKEND.get() {
        fatal(ContractViolation::BackendAlreadyRegistered {
            existing: existing.backend_name().to_string(),
            attempted: backend.backend_name().to_string(),
        });
    }
    backend.initialize_bindings();
    let name = backend.backend_name().to_string();
    if let Err(rejected) = ACTIVE_BACKEND.set(backend) {
        let existing = ACTIVE_BACKEND
            .get()
            .map(|b| b.backend_name().to_string())
            .unwrap_or_default();
        fatal(ContractViolation::BackendAlreadyRegistered {
            existing,
            attempted: rejected.backend_name().to_string(),
        });
    }
    tracing::info!(backend = %name, "registered lazy tensor backend");
}

/// Returns the process backend. Fatal if none has been registered.
pub fn get_backend() -> Arc<dyn BackendImpl> {
    match ACTIVE_BACKEND.get() {
        Some(backend) => Arc::clone(backend),
        None => fatal(ContractViolation::BackendNotRegistered),
    }
}

/// Returns the process backend if one has been registered.
pub fn try_get_backend() -> Option<Arc<dyn BackendImpl>> {
    ACTIVE_BACKEND.get().cloned()
}

/// Startup helper: constructing one registers the backend.
///
/// ```ignore
/// static REGISTRAR: OnceLock<BackendRegistrar> = OnceLock::new();
/// REGISTRAR.get_or_init(|| BackendRegistrar::new(Arc::new(MyBackend::new())));
/// ```
pub struct BackendRegistrar {
    backend: Arc<dyn BackendImpl>,
}

impl BackendRegistrar {
    pub fn new(backend: Arc<dyn BackendImpl>) -> Self {
        register_backend(Arc::clone(&backend));
        BackendRegistrar { backend }
    }

    pub fn backend(&self) -> &Arc<dyn BackendImpl> {
        &self.backend
    }
}

/// Named backend constructors.
struct BackendCatalog {
    backends: RwLock<HashMap<String, BackendConstructor>>,
}

impl BackendCatalog {
    fn new() -> Self {
        Self {
            backends: RwLock::new(HashMap::new()),
        }
    }

    fn register(&self, name: String, constructor: BackendConstructor) {
        self.backends
            .write()
            .expect("backend catalog poisoned")
            .insert(name, constructor);
    }

    fn create(&self, name: &str) -> Option<Arc<dyn BackendImpl>> {
        let catalog = self.backends.read().expect("backend catalog poisoned");
        let constructor = catalog.get(name)?;
        Some(constructor())
    }

    fn list_backends(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .backends
            .read()
            .expect("backend catalog poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn has_backend(&self, name: &str) -> bool {
        self.backends
            .read()
            .expect("backend catalog poisoned")
            .contains_key(name)
    }
}

static GLOBAL_CATALOG: OnceLock<BackendCatalog> = OnceLock::new();

fn global_catalog() -> &'static BackendCatalog {
    GLOBAL_CATALOG.get_or_init(BackendCatalog::new)
}

/// Registers a backend constructor under `name`. Re-registering a name replaces the factory.
pub fn register_backend_factory<F>(name: impl Into<String>, constructor: F)
where
    F: Fn() -> Arc<dyn BackendImpl> + Send + Sync + 'static,
{
    global_catalog().register(name.into(), Box::new(constructor));
}

/// Creates a fresh backend instance by name, without activating it.
pub fn create_backend(name: &str) -> Option<Arc<dyn BackendImpl>> {
    global_catalog().create(name)
}

/// Sorted list of catalog names.
pub fn list_backends() -> Vec<String> {
    global_catalog().list_backends()
}

pub fn has_backend(name: &str) -> bool {
    global_catalog().has_backend(name)
}

/// Creates the named backend and installs it as the process backend.
pub fn activate_backend(name: &str) -> Result<Arc<dyn BackendImpl>> {
    let backend = create_backend(name).ok_or_else(|| {
        anyhow!(
            "unknown backend '{name}' (registered: {})",
            list_backends().join(", ")
        )
    })?;
    register_backend(Arc::clone(&backend));
    Ok(backend)
}
