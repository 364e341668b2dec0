use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use ltc_rs::backend::{
    BackendData, BackendDataPtr, BackendError, BackendImpl, BackendResult, Computation,
    ComputationPtr, LoweringContext, ReplicationDevices, TensorSpec,
};
use ltc_rs::device::{BackendDeviceType, Device, DeviceKind};
use ltc_rs::ir::{EmissionMap, NodePtr};
use ltc_rs::tensor::{DType, HostTensor, Shape, TensorData};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::kernels;
use crate::lowering::{CpuComputation, CpuLoweringContext, CpuOp};

const DEFAULT_SEED: u64 = 0x5eed;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Physical host storage. `F16`/`BF16` values live in the `F32` variant, already rounded.
#[derive(Clone, Debug, PartialEq)]
pub enum CpuBuffer {
    F32(Arc<[f32]>),
    I32(Arc<[i32]>),
}

impl CpuBuffer {
    pub fn len(&self) -> usize {
        match self {
            CpuBuffer::F32(values) => values.len(),
            CpuBuffer::I32(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Backend data handle of the reference CPU backend.
pub struct CpuData {
    id: u64,
    device: Device,
    spec: TensorSpec,
    buffer: RwLock<Option<CpuBuffer>>,
}

impl CpuData {
    pub(crate) fn new(device: Device, spec: TensorSpec, buffer: Option<CpuBuffer>) -> Arc<Self> {
        Arc::new(CpuData {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            device,
            spec,
            buffer: RwLock::new(buffer),
        })
    }

    pub fn buffer(&self) -> Option<CpuBuffer> {
        self.buffer.read().expect("cpu data poisoned").clone()
    }

    pub(crate) fn downcast(data: &BackendDataPtr) -> BackendResult<&CpuData> {
        data.as_any().downcast_ref::<CpuData>().ok_or_else(|| {
            BackendError::invalid_argument(format!(
                "data handle {} does not belong to the cpu backend",
                data.handle_id()
            ))
        })
    }
}

impl BackendData for CpuData {
    fn device(&self) -> Device {
        self.device
    }

    fn spec(&self) -> TensorSpec {
        self.spec.clone()
    }

    fn handle_id(&self) -> u64 {
        self.id
    }

    fn has_value(&self) -> bool {
        self.buffer.read().expect("cpu data poisoned").is_some()
    }

    fn assign(&self, source: &BackendDataPtr) -> BackendResult<()> {
        let source = CpuData::downcast(source)?;
        if source.spec.shape.num_elements() != self.spec.shape.num_elements() {
            return Err(BackendError::invalid_argument(format!(
                "cannot assign {} elements into placeholder of shape {}",
                source.spec.shape.num_elements(),
                self.spec.shape
            )));
        }
        let buffer = source
            .buffer()
            .ok_or_else(|| BackendError::execution("assign from a placeholder without value"))?;
        *self.buffer.write().expect("cpu data poisoned") = Some(buffer);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Reference backend that interprets lowered graphs over host memory.
pub struct CpuBackend {
    num_devices: usize,
    rng: Mutex<StdRng>,
    replication: ReplicationDevices,
    exiting: AtomicBool,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::with_devices(1)
    }

    /// Backend exposing devices `CPU:0` through `CPU:{num_devices - 1}`.
    pub fn with_devices(num_devices: usize) -> Self {
        CpuBackend {
            num_devices: num_devices.max(1),
            rng: Mutex::new(StdRng::seed_from_u64(DEFAULT_SEED)),
            replication: ReplicationDevices::new(),
            exiting: AtomicBool::new(false),
        }
    }

    pub fn is_exiting(&self) -> bool {
        self.exiting.load(Ordering::Acquire)
    }

    fn check_device(&self, device: &Device) -> BackendResult<()> {
        let in_range = device.ordinal() >= 0 && (device.ordinal() as usize) < self.num_devices;
        if device.device_type() != BackendDeviceType::Cpu || !in_range {
            return Err(BackendError::device_not_found(device.to_backend_string()));
        }
        Ok(())
    }

    fn device_names(&self) -> Vec<String> {
        (0..self.num_devices)
            .map(|ordinal| Device::new(BackendDeviceType::Cpu, ordinal as i64).to_backend_string())
            .collect()
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn host_to_buffer(tensor: &HostTensor) -> CpuBuffer {
    match tensor.payload() {
        TensorData::F32(values) => CpuBuffer::F32(Arc::from(values.as_slice())),
        TensorData::I32(values) => CpuBuffer::I32(Arc::from(values.as_slice())),
    }
}

fn buffer_to_host(buffer: &CpuBuffer, shape: Shape, dtype: DType) -> BackendResult<HostTensor> {
    let host = match (buffer, dtype) {
        (CpuBuffer::I32(values), DType::I32) => HostTensor::from_i32(shape, values.to_vec()),
        (CpuBuffer::I32(values), _) => {
            let widened = values.iter().map(|&v| v as f32).collect();
            HostTensor::from_f32_with_dtype(shape, dtype, widened)
        }
        (CpuBuffer::F32(values), DType::I32) => HostTensor::from_i32(
            shape,
            values
                .iter()
                .map(|&v| kernels::f32_to_i32_trunc_saturating(v))
                .collect(),
        ),
        (CpuBuffer::F32(values), _) => {
            HostTensor::from_f32_with_dtype(shape, dtype, values.to_vec())
        }
    };
    host.map_err(|err| BackendError::execution(err.to_string()))
}

impl BackendImpl for CpuBackend {
    fn backend_name(&self) -> &str {
        "cpu-ref"
    }

    fn initialize_bindings(&self) {
        tracing::debug!(devices = self.num_devices, "cpu backend bindings initialized");
    }

    fn prepare_to_exit(&self) {
        self.exiting.store(true, Ordering::Release);
        tracing::info!("cpu backend preparing to exit");
    }

    fn set_rng_seed(&self, seed: u64) {
        *self.rng.lock().expect("cpu rng poisoned") = StdRng::seed_from_u64(seed);
    }

    fn make_computation_data_from_tensor(
        &self,
        tensor: &HostTensor,
        shape: &Shape,
        device: &Device,
    ) -> BackendResult<BackendDataPtr> {
        self.check_device(device)?;
        if shape.num_elements() != tensor.len() {
            return Err(BackendError::invalid_argument(format!(
                "shape {} does not match host tensor of {} elements",
                shape,
                tensor.len()
            )));
        }
        let spec = TensorSpec::new(tensor.dtype(), shape.clone());
        Ok(CpuData::new(*device, spec, Some(host_to_buffer(tensor))))
    }

    fn create_data_placeholder(
        &self,
        device: &Device,
        spec: &TensorSpec,
    ) -> BackendResult<BackendDataPtr> {
        self.check_device(device)?;
        Ok(CpuData::new(*device, spec.clone(), None))
    }

    fn make_tensor_from_computation_data(
        &self,
        data: &BackendDataPtr,
        logical_dtype: Option<DType>,
    ) -> BackendResult<HostTensor> {
        let data = CpuData::downcast(data)?;
        let buffer = data.buffer().ok_or_else(|| {
            BackendError::execution(format!("data handle {} has no value", data.id))
        })?;
        let dtype = logical_dtype.unwrap_or(data.spec.dtype);
        buffer_to_host(&buffer, data.spec.shape.clone(), dtype)
    }

    fn create_lowering_context(
        &self,
        name: &str,
        device: &Device,
        post_order: &[NodePtr],
        emit_status: &EmissionMap,
    ) -> BackendResult<Box<dyn LoweringContext>> {
        self.check_device(device)?;
        let mut context = CpuLoweringContext::new(name, *device);
        for node in post_order {
            if !emit_status.is_emitted(node.id()) {
                return Err(BackendError::invalid_argument(format!(
                    "node {} was not scheduled before lowering",
                    node.id()
                )));
            }
            context.lower_node(node)?;
        }
        Ok(Box::new(context))
    }

    fn create_empty_lowering_context(
        &self,
        name: &str,
        device: &Device,
    ) -> BackendResult<Box<dyn LoweringContext>> {
        self.check_device(device)?;
        Ok(Box::new(CpuLoweringContext::new(name, *device)))
    }

    fn get_compilation_devices(&self, device: &str, devices: &[String]) -> Vec<String> {
        if devices.is_empty() {
            vec![device.to_string()]
        } else {
            devices.to_vec()
        }
    }

    fn compile(&self, instances: Vec<ComputationPtr>) -> BackendResult<Vec<ComputationPtr>> {
        instances
            .iter()
            .map(|instance| {
                let computation = CpuComputation::downcast(instance.as_ref())?;
                let compiled = computation.compiled()?;
                tracing::debug!(
                    computation = compiled.name(),
                    instructions = compiled.instructions().len(),
                    "compiled cpu computation"
                );
                Ok(Arc::new(compiled) as ComputationPtr)
            })
            .collect()
    }

    fn execute_computation(
        &self,
        computation: &dyn Computation,
        arguments: &[BackendDataPtr],
        device: &Device,
    ) -> BackendResult<Vec<BackendDataPtr>> {
        self.check_device(device)?;
        let computation = CpuComputation::downcast(computation)?;
        if !computation.is_compiled() {
            return Err(BackendError::invalid_argument(format!(
                "computation {} has not been compiled",
                computation.name()
            )));
        }
        let expected = computation.parameter_specs().len();
        if arguments.len() != expected {
            return Err(BackendError::invalid_argument(format!(
                "computation {} expects {expected} arguments, got {}",
                computation.name(),
                arguments.len()
            )));
        }

        let mut values: Vec<CpuBuffer> = Vec::with_capacity(computation.instructions().len());
        for instruction in computation.instructions() {
            let inputs: Vec<&CpuBuffer> =
                instruction.inputs.iter().map(|&slot| &values[slot]).collect();
            let spec = &instruction.spec;
            let value = match instruction.op {
                CpuOp::Parameter(index) => {
                    let argument = CpuData::downcast(&arguments[index])?;
                    if argument.spec.shape.num_elements() != spec.num_elements() {
                        return Err(BackendError::invalid_argument(format!(
                            "argument {index} has shape {}, expected {}",
                            argument.spec.shape, spec.shape
                        )));
                    }
                    argument.buffer().ok_or_else(|| {
                        BackendError::execution(format!("argument {index} has no value"))
                    })?
                }
                CpuOp::Fill(value) => kernels::fill(spec, value),
                CpuOp::Unary(op) => kernels::unary(op, inputs[0], spec.dtype)?,
                CpuOp::Binary(op) => kernels::binary(op, inputs[0], inputs[1], spec)?,
                CpuOp::Cast(dtype) => kernels::cast(inputs[0], dtype),
                CpuOp::Uniform { low, high } => {
                    let mut rng = self.rng.lock().expect("cpu rng poisoned");
                    kernels::uniform(&mut rng, spec, low, high)?
                }
            };
            values.push(value);
        }

        Ok(computation
            .results()
            .iter()
            .map(|&slot| {
                let spec = computation.instructions()[slot].spec.clone();
                CpuData::new(*device, spec, Some(values[slot].clone())) as BackendDataPtr
            })
            .collect())
    }

    fn get_default_device(&self) -> String {
        Device::new(BackendDeviceType::Cpu, 0).to_backend_string()
    }

    fn get_default_device_type(&self) -> BackendDeviceType {
        BackendDeviceType::Cpu
    }

    fn get_num_devices(&self) -> usize {
        self.num_devices
    }

    fn get_local_devices(&self) -> Vec<String> {
        self.device_names()
    }

    fn get_all_devices(&self) -> Vec<String> {
        self.device_names()
    }

    fn set_replication_devices(&self, devices: Option<Arc<Vec<String>>>) {
        self.replication.set(devices);
    }

    fn get_replication_devices(&self) -> Option<Arc<Vec<String>>> {
        self.replication.get()
    }

    fn hardware_device_type(&self) -> DeviceKind {
        DeviceKind::Cpu
    }

    fn get_computation_backend_text(&self, computation: &ComputationPtr) -> BackendResult<String> {
        Ok(CpuComputation::downcast(computation.as_ref())?.to_text())
    }
}
