use std::any::Any;
use std::sync::Arc;

use super::spec::{BackendResult, TensorSpec};
use crate::device::Device;

/// Opaque, backend-owned reference to a buffer on a specific device.
///
/// A handle produced by `create_data_placeholder` reports `has_value() == false` until
/// the executor assigns an execution result into it.
pub trait BackendData: Send + Sync {
    fn device(&self) -> Device;

    fn spec(&self) -> TensorSpec;

    /// Stable identity of this handle; graph parameters are deduplicated by it.
    fn handle_id(&self) -> u64;

    fn has_value(&self) -> bool;

    /// Takes over the buffer held by `source`, which must come from the same backend.
    fn assign(&self, source: &BackendDataPtr) -> BackendResult<()>;

    fn as_any(&self) -> &dyn Any;
}

pub type BackendDataPtr = Arc<dyn BackendData>;
