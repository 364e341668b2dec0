pub mod cpu;
mod kernels;
mod lowering;

use std::sync::{Arc, OnceLock};

use ltc_rs::backend::registry::{register_backend, register_backend_factory, try_get_backend};
use ltc_rs::BackendImpl;

pub use cpu::{CpuBackend, CpuBuffer, CpuData};
pub use lowering::{CpuComputation, CpuInstruction, CpuLoweringContext, CpuOp};

/// Register the CPU backend constructors with the named backend catalog.
///
/// This function is called automatically via a static initializer on Linux, but can also
/// be called manually to ensure the backend is registered.
/// The backend is registered under both "cpu" and "cpu-ref" names.
pub fn register_cpu_backend() {
    let constructor = || Arc::new(CpuBackend::new()) as Arc<dyn BackendImpl>;

    register_backend_factory("cpu", constructor);
    register_backend_factory("cpu-ref", constructor);
}

/// Makes sure a process backend is active, installing a default [`CpuBackend`] if none is.
///
/// Returns whichever backend ends up active.
pub fn install_cpu_backend() -> Arc<dyn BackendImpl> {
    static INSTALLED: OnceLock<Arc<dyn BackendImpl>> = OnceLock::new();
    Arc::clone(INSTALLED.get_or_init(|| {
        if let Some(active) = try_get_backend() {
            return active;
        }
        let backend: Arc<dyn BackendImpl> = Arc::new(CpuBackend::new());
        register_backend(Arc::clone(&backend));
        backend
    }))
}

// Auto-register on library load
#[cfg(target_os = "linux")]
#[used]
#[link_section = ".init_array"]
static REGISTER_CPU_BACKEND: extern "C" fn() = {
    extern "C" fn register() {
        register_cpu_backend();
    }
    register
};
