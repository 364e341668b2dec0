use std::sync::{Arc, Mutex};

use ltc_rs::backend::{
    BackendDataPtr, BackendImpl, BackendResult, Computation, ComputationPtr, LoweringContext,
    TensorSpec,
};
use ltc_rs::device::{BackendDeviceType, Device, DeviceKind};
use ltc_rs::ir::{EmissionMap, NodePtr};
use ltc_rs::tensor::{DType, HostTensor, Shape};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Recording {
    lowering_names: Vec<String>,
    compile_batches: Vec<usize>,
    executed_arguments: Vec<usize>,
    placeholders: usize,
    uploads: usize,
    readbacks: usize,
    rng_seeds: Vec<u64>,
}

/// Test-only backend wrapper that records every call reaching the wrapped backend.
pub struct RecordingBackend<B: BackendImpl> {
    inner: B,
    recording: Mutex<Recording>,
}

impl<B: BackendImpl> RecordingBackend<B> {
    pub fn new(inner: B) -> Self {
        RecordingBackend {
            inner,
            recording: Mutex::new(Recording::default()),
        }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    fn record<R>(&self, f: impl FnOnce(&mut Recording) -> R) -> R {
        f(&mut self.recording.lock().expect("recording mutex poisoned"))
    }

    /// Names passed to `create_lowering_context`, in call order.
    pub fn lowering_names(&self) -> Vec<String> {
        self.record(|r| r.lowering_names.clone())
    }

    /// Batch size of every `compile` call.
    pub fn compile_batches(&self) -> Vec<usize> {
        self.record(|r| r.compile_batches.clone())
    }

    /// Argument count of every `execute_computation` call.
    pub fn executed_argument_counts(&self) -> Vec<usize> {
        self.record(|r| r.executed_arguments.clone())
    }

    pub fn execute_count(&self) -> usize {
        self.record(|r| r.executed_arguments.len())
    }

    pub fn placeholder_count(&self) -> usize {
        self.record(|r| r.placeholders)
    }

    pub fn upload_count(&self) -> usize {
        self.record(|r| r.uploads)
    }

    pub fn readback_count(&self) -> usize {
        self.record(|r| r.readbacks)
    }

    pub fn rng_seeds(&self) -> Vec<u64> {
        self.record(|r| r.rng_seeds.clone())
    }

    pub fn reset(&self) {
        self.record(|r| *r = Recording::default());
    }
}

impl<B: BackendImpl> BackendImpl for RecordingBackend<B> {
    fn backend_name(&self) -> &str {
        "recording"
    }

    fn initialize_bindings(&self) {
        self.inner.initialize_bindings();
    }

    fn prepare_to_exit(&self) {
        self.inner.prepare_to_exit();
    }

    fn set_rng_seed(&self, seed: u64) {
        self.record(|r| r.rng_seeds.push(seed));
        self.inner.set_rng_seed(seed);
    }

    fn make_computation_data_from_tensor(
        &self,
        tensor: &HostTensor,
        shape: &Shape,
        device: &Device,
    ) -> BackendResult<BackendDataPtr> {
        self.record(|r| r.uploads += 1);
        self.inner
            .make_computation_data_from_tensor(tensor, shape, device)
    }

    fn create_data_placeholder(
        &self,
        device: &Device,
        spec: &TensorSpec,
    ) -> BackendResult<BackendDataPtr> {
        self.record(|r| r.placeholders += 1);
        self.inner.create_data_placeholder(device, spec)
    }

    fn make_tensor_from_computation_data(
        &self,
        data: &BackendDataPtr,
        logical_dtype: Option<DType>,
    ) -> BackendResult<HostTensor> {
        self.record(|r| r.readbacks += 1);
        self.inner.make_tensor_from_computation_data(data, logical_dtype)
    }

    fn create_lowering_context(
        &self,
        name: &str,
        device: &Device,
        post_order: &[NodePtr],
        emit_status: &EmissionMap,
    ) -> BackendResult<Box<dyn LoweringContext>> {
        self.record(|r| r.lowering_names.push(name.to_string()));
        self.inner
            .create_lowering_context(name, device, post_order, emit_status)
    }

    fn create_empty_lowering_context(
        &self,
        name: &str,
        device: &Device,
    ) -> BackendResult<Box<dyn LoweringContext>> {
        self.record(|r| r.lowering_names.push(name.to_string()));
        self.inner.create_empty_lowering_context(name, device)
    }

    fn get_compilation_devices(&self, device: &str, devices: &[String]) -> Vec<String> {
        self.inner.get_compilation_devices(device, devices)
    }

    fn compile(&self, instances: Vec<ComputationPtr>) -> BackendResult<Vec<ComputationPtr>> {
        self.record(|r| r.compile_batches.push(instances.len()));
        self.inner.compile(instances)
    }

    fn execute_computation(
        &self,
        computation: &dyn Computation,
        arguments: &[BackendDataPtr],
        device: &Device,
    ) -> BackendResult<Vec<BackendDataPtr>> {
        self.record(|r| r.executed_arguments.push(arguments.len()));
        self.inner.execute_computation(computation, arguments, device)
    }

    fn get_default_device(&self) -> String {
        self.inner.get_default_device()
    }

    fn get_default_device_type(&self) -> BackendDeviceType {
        self.inner.get_default_device_type()
    }

    fn get_num_devices(&self) -> usize {
        self.inner.get_num_devices()
    }

    fn get_local_devices(&self) -> Vec<String> {
        self.inner.get_local_devices()
    }

    fn get_all_devices(&self) -> Vec<String> {
        self.inner.get_all_devices()
    }

    fn set_replication_devices(&self, devices: Option<Arc<Vec<String>>>) {
        self.inner.set_replication_devices(devices);
    }

    fn get_replication_devices(&self) -> Option<Arc<Vec<String>>> {
        self.inner.get_replication_devices()
    }

    fn hardware_device_type(&self) -> DeviceKind {
        self.inner.hardware_device_type()
    }

    fn get_computation_backend_text(&self, computation: &ComputationPtr) -> BackendResult<String> {
        self.inner.get_computation_backend_text(computation)
    }
}
