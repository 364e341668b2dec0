//! The capability contract every lazy tensor backend implements.

use std::sync::{Arc, RwLock};

use super::computation::{Computation, ComputationPtr};
use super::data::BackendDataPtr;
use super::lowering::LoweringContext;
use super::spec::{BackendResult, TensorSpec};
use crate::device::{BackendDeviceType, Device, DeviceKind};
use crate::ir::{EmissionMap, NodePtr};
use crate::tensor::{DType, HostTensor, Shape};

/// Hardware/compiler backend plugged into the lazy runtime.
///
/// Apart from [`initialize_bindings`](BackendImpl::initialize_bindings) every method is a
/// hard requirement. All methods take `&self`: the only state a backend shares with the
/// runtime is the replication-device list, which implementations keep in a
/// [`ReplicationDevices`] holder.
pub trait BackendImpl: Send + Sync {
    /// Human-readable backend identifier (e.g. `"cpu"`).
    fn backend_name(&self) -> &str;

    /// Extension point invoked once when the backend is registered.
    fn initialize_bindings(&self) {}

    /// Graceful shutdown hook. Must leave the backend able to answer topology queries.
    fn prepare_to_exit(&self);

    fn set_rng_seed(&self, seed: u64);

    /// Stages host tensor contents on `device`. `shape` is the logical shape of the data.
    fn make_computation_data_from_tensor(
        &self,
        tensor: &HostTensor,
        shape: &Shape,
        device: &Device,
    ) -> BackendResult<BackendDataPtr>;

    /// Allocates an uninitialized handle that a later execution result is assigned into.
    fn create_data_placeholder(
        &self,
        device: &Device,
        spec: &TensorSpec,
    ) -> BackendResult<BackendDataPtr>;

    /// Reads backend data back to the host. `logical_dtype` overrides the element type
    /// reported by the handle, for backends whose physical storage type differs.
    fn make_tensor_from_computation_data(
        &self,
        data: &BackendDataPtr,
        logical_dtype: Option<DType>,
    ) -> BackendResult<HostTensor>;

    /// Creates a lowering context and lowers `post_order` into it.
    ///
    /// `emit_status` is the emission map produced while scheduling `post_order`; every node
    /// in the list is expected to be marked emitted in it.
    fn create_lowering_context(
        &self,
        name: &str,
        device: &Device,
        post_order: &[NodePtr],
        emit_status: &EmissionMap,
    ) -> BackendResult<Box<dyn LoweringContext>>;

    fn create_empty_lowering_context(
        &self,
        name: &str,
        device: &Device,
    ) -> BackendResult<Box<dyn LoweringContext>>;

    /// Physical devices a computation targeting `device` must be compiled for.
    fn get_compilation_devices(&self, device: &str, devices: &[String]) -> Vec<String>;

    /// Compiles a batch of computations, returning exactly one result per instance in order.
    fn compile(&self, instances: Vec<ComputationPtr>) -> BackendResult<Vec<ComputationPtr>>;

    /// Runs a compiled computation. `arguments` must match the parameter arity and the
    /// returned handles follow the result order.
    fn execute_computation(
        &self,
        computation: &dyn Computation,
        arguments: &[BackendDataPtr],
        device: &Device,
    ) -> BackendResult<Vec<BackendDataPtr>>;

    /// Default device in `<TYPE>:<ordinal>` form.
    fn get_default_device(&self) -> String;

    fn get_default_device_type(&self) -> BackendDeviceType;

    fn get_num_devices(&self) -> usize;

    fn get_local_devices(&self) -> Vec<String>;

    fn get_all_devices(&self) -> Vec<String>;

    fn set_replication_devices(&self, devices: Option<Arc<Vec<String>>>);

    fn get_replication_devices(&self) -> Option<Arc<Vec<String>>>;

    /// Device kind the host framework should use for eager fallbacks.
    fn hardware_device_type(&self) -> DeviceKind;

    /// Backend-specific textual dump of a computation, for debugging.
    fn get_computation_backend_text(&self, computation: &ComputationPtr) -> BackendResult<String>;
}

/// Process-wide replication-device list shared between configuration and execution.
///
/// Writers are expected to run at a quiescent point (startup or between jobs) before
/// concurrent execution reads the list; readers get a snapshot `Arc`.
#[derive(Debug, Default)]
pub struct ReplicationDevices {
    devices: RwLock<Option<Arc<Vec<String>>>>,
}

impl ReplicationDevices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, devices: Option<Arc<Vec<String>>>) {
        *self.devices.write().expect("replication devices poisoned") = devices;
    }

    pub fn get(&self) -> Option<Arc<Vec<String>>> {
        self.devices
            .read()
            .expect("replication devices poisoned")
            .clone()
    }
}
