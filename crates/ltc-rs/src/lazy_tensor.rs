//! Lazy tensor domain object.
//!
//! A [`LazyTensor`] is a cheap-clone handle on shared state. Its value is exactly one of:
//! a pending or ready graph node, materialized backend data, or a host buffer staged for
//! upload. Replacing the value never mutates an aliased buffer; graph-building operations
//! return new tensors whose nodes reference the operands' nodes.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, ensure, Result};

use crate::backend::{BackendDataPtr, TensorSpec};
use crate::device::Device;
use crate::error::{fatal, ContractViolation};
use crate::executor::LazyGraphExecutor;
use crate::ir::{BinaryOp, Node, NodePtr, OpKind, UnaryOp};
use crate::tensor::{DType, HostTensor, Shape};

static NEXT_TENSOR_ID: AtomicU64 = AtomicU64::new(1);

/// Current value of a lazy tensor.
#[derive(Clone)]
pub(crate) enum LazyValue {
    /// Materialized backend buffer.
    Data(BackendDataPtr),
    /// Graph node; pending until the executor syncs it.
    Node(NodePtr),
    /// Host buffer staged for upload on first use.
    Host(HostTensor),
}

impl LazyValue {
    fn spec(&self) -> TensorSpec {
        match self {
            LazyValue::Data(data) => data.spec(),
            LazyValue::Node(node) => node.spec().clone(),
            LazyValue::Host(host) => TensorSpec::new(host.dtype(), host.shape().clone()),
        }
    }
}

struct LazyTensorState {
    id: u64,
    device: Device,
    executor: Arc<LazyGraphExecutor>,
    value: Mutex<LazyValue>,
    cached: Mutex<Option<HostTensor>>,
    generation: AtomicU64,
}

/// Handle to a lazily evaluated tensor. `LazyTensor::default()` is the null tensor.
#[derive(Clone, Default)]
pub struct LazyTensor {
    state: Option<Arc<LazyTensorState>>,
}

impl LazyTensor {
    fn with_value(executor: Arc<LazyGraphExecutor>, device: Device, value: LazyValue) -> Self {
        LazyTensor {
            state: Some(Arc::new(LazyTensorState {
                id: NEXT_TENSOR_ID.fetch_add(1, Ordering::Relaxed),
                device,
                executor,
                value: Mutex::new(value),
                cached: Mutex::new(None),
                generation: AtomicU64::new(0),
            })),
        }
    }

    /// Wraps a host tensor on `device`, using the process executor.
    pub fn create(tensor: HostTensor, device: &Device) -> Self {
        Self::create_in(&LazyGraphExecutor::get(), tensor, device)
    }

    /// Wraps a host tensor on `device`. The data is staged and uploaded on first use.
    pub fn create_in(
        executor: &Arc<LazyGraphExecutor>,
        tensor: HostTensor,
        device: &Device,
    ) -> Self {
        Self::with_value(Arc::clone(executor), *device, LazyValue::Host(tensor))
    }

    pub fn from_node(executor: &Arc<LazyGraphExecutor>, node: NodePtr, device: &Device) -> Self {
        Self::with_value(Arc::clone(executor), *device, LazyValue::Node(node))
    }

    pub fn from_data(executor: &Arc<LazyGraphExecutor>, data: BackendDataPtr) -> Self {
        let device = data.device();
        Self::with_value(Arc::clone(executor), device, LazyValue::Data(data))
    }

    /// Constant tensor recorded as a `Fill` node on the process executor.
    pub fn full(shape: Shape, dtype: DType, value: f32, device: &Device) -> Self {
        Self::full_in(&LazyGraphExecutor::get(), shape, dtype, value, device)
    }

    pub fn full_in(
        executor: &Arc<LazyGraphExecutor>,
        shape: Shape,
        dtype: DType,
        value: f32,
        device: &Device,
    ) -> Self {
        let node = Node::new(
            OpKind::Fill {
                value: dtype.round_f32(value),
            },
            Vec::new(),
            TensorSpec::new(dtype, shape),
        );
        Self::from_node(executor, node, device)
    }

    /// Uniform samples in `[low, high)` drawn from the backend RNG when materialized.
    pub fn uniform(
        shape: Shape,
        dtype: DType,
        low: f32,
        high: f32,
        device: &Device,
    ) -> Result<Self> {
        Self::uniform_in(&LazyGraphExecutor::get(), shape, dtype, low, high, device)
    }

    pub fn uniform_in(
        executor: &Arc<LazyGraphExecutor>,
        shape: Shape,
        dtype: DType,
        low: f32,
        high: f32,
        device: &Device,
    ) -> Result<Self> {
        ensure!(dtype.is_float(), "uniform requires a float dtype, got {dtype:?}");
        ensure!(low < high, "uniform requires low < high (got {low} >= {high})");
        let node = Node::new(
            OpKind::Uniform { low, high },
            Vec::new(),
            TensorSpec::new(dtype, shape),
        );
        Ok(Self::from_node(executor, node, device))
    }

    pub fn is_null(&self) -> bool {
        self.state.is_none()
    }

    /// Process-unique id; `0` for the null tensor.
    pub fn unique_id(&self) -> u64 {
        self.state.as_ref().map(|state| state.id).unwrap_or(0)
    }

    pub fn device(&self) -> Option<Device> {
        self.state.as_ref().map(|state| state.device)
    }

    pub fn spec(&self) -> Option<TensorSpec> {
        self.state.as_ref().map(|state| state.value().spec())
    }

    pub fn shape(&self) -> Option<Shape> {
        self.spec().map(|spec| spec.shape)
    }

    pub fn dtype(&self) -> Option<DType> {
        self.spec().map(|spec| spec.dtype)
    }

    /// Number of times the value was replaced from outside the graph.
    pub fn generation(&self) -> u64 {
        self.state
            .as_ref()
            .map(|state| state.generation.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn executor(&self) -> Option<&Arc<LazyGraphExecutor>> {
        self.state.as_ref().map(|state| &state.executor)
    }

    fn state(&self) -> Result<&Arc<LazyTensorState>> {
        self.state
            .as_ref()
            .ok_or_else(|| anyhow!("operation on a null lazy tensor"))
    }

    pub(crate) fn value(&self) -> Option<LazyValue> {
        self.state.as_ref().map(|state| state.value())
    }

    /// Materialized backend data, if the value has been computed or uploaded.
    pub fn current_data(&self) -> Option<BackendDataPtr> {
        match self.value()? {
            LazyValue::Data(data) => Some(data),
            LazyValue::Node(node) => node.data(),
            LazyValue::Host(_) => None,
        }
    }

    /// Pending graph node, if the value still needs to be computed.
    pub(crate) fn pending_node(&self) -> Option<NodePtr> {
        match self.value()? {
            LazyValue::Node(node) if !node.is_ready() => Some(node),
            _ => None,
        }
    }

    /// Replaces the value with materialized data. The logical value is unchanged.
    pub(crate) fn set_data(&self, data: BackendDataPtr) {
        if let Some(state) = self.state.as_ref() {
            *state.value.lock().expect("lazy tensor value poisoned") = LazyValue::Data(data);
        }
    }

    /// Uploads a staged host buffer, leaving the tensor backed by device data.
    pub(crate) fn upload_staged(&self) -> Result<()> {
        let state = self.state()?;
        let mut value = state.value.lock().expect("lazy tensor value poisoned");
        if let LazyValue::Host(host) = &*value {
            let data = state
                .executor
                .backend()
                .make_computation_data_from_tensor(host, host.shape(), &state.device)?;
            tracing::trace!(
                tensor = state.id,
                handle = data.handle_id(),
                "uploaded staged host tensor"
            );
            *value = LazyValue::Data(data);
        }
        Ok(())
    }

    /// Graph node representing the current value, uploading staged host data if needed.
    pub fn ir_node(&self) -> Result<NodePtr> {
        self.upload_staged()?;
        let state = self.state()?;
        match state.value() {
            LazyValue::Node(node) => Ok(node),
            LazyValue::Data(data) => Ok(Node::device_data(data)),
            LazyValue::Host(_) => {
                bail!("lazy tensor {} still holds host data after upload", state.id)
            }
        }
    }

    /// Materializes the tensor on the host. Unless `detached`, the result is cached so later
    /// reads skip the backend. The returned buffer is always a private copy.
    pub fn to_tensor(&self, detached: bool) -> Result<HostTensor> {
        let state = self.state()?;
        if let LazyValue::Host(host) = state.value() {
            return Ok(host);
        }
        if let Some(cached) = state.cached.lock().expect("lazy tensor cache poisoned").as_ref() {
            return Ok(cached.clone());
        }
        let generation = self.generation();
        let mut tensors = state.executor.get_tensors(std::slice::from_ref(self))?;
        let tensor = tensors
            .pop()
            .ok_or_else(|| anyhow!("executor returned no tensor for lazy tensor {}", state.id))?;
        if !detached && self.generation() == generation {
            *state.cached.lock().expect("lazy tensor cache poisoned") = Some(tensor.clone());
        }
        Ok(tensor)
    }

    /// Replaces the value with a host buffer, dropping any graph history.
    pub fn set_tensor(&self, tensor: HostTensor) -> Result<()> {
        self.state()?.replace(LazyValue::Host(tensor));
        Ok(())
    }

    /// Installs host data as the tensor's value without recording graph work.
    ///
    /// Unlike [`LazyTensor::set_tensor`] this is a metadata refresh: the generation is left
    /// unchanged. Shape and dtype follow the new buffer.
    pub fn set_tensor_data(&self, tensor: HostTensor) -> Result<()> {
        let state = self.state()?;
        *state.value.lock().expect("lazy tensor value poisoned") = LazyValue::Host(tensor.clone());
        *state.cached.lock().expect("lazy tensor cache poisoned") = Some(tensor);
        Ok(())
    }

    /// Updates the value from a host buffer, converting it to this tensor's dtype.
    ///
    /// With `sync` the update counts as a replacement and bumps the generation; without it
    /// the data is installed through [`LazyTensor::set_tensor_data`].
    pub fn update_from_tensor(&self, source: &HostTensor, sync: bool) -> Result<()> {
        let dtype = self.dtype().ok_or_else(|| anyhow!("operation on a null lazy tensor"))?;
        let converted = source.cast(dtype);
        if sync {
            self.set_tensor(converted)
        } else {
            self.set_tensor_data(converted)
        }
    }

    /// Out-variant update from a host source: the converted source becomes the new value.
    pub fn update_from_tensor_out(&self, source: &HostTensor) -> Result<()> {
        self.update_from_tensor(source, true)
    }

    /// Out-variant update from another lazy tensor: adopts its value, casting if the dtypes differ.
    pub fn update_from_lazy_tensor_out(&self, source: &LazyTensor) -> Result<()> {
        let state = self.state()?;
        let source_state = source.state()?;
        if !Arc::ptr_eq(&state.executor, &source_state.executor) {
            fatal(ContractViolation::ForeignExecutor { tensor: source_state.id });
        }
        let dtype = self.dtype().ok_or_else(|| anyhow!("operation on a null lazy tensor"))?;
        let value = if source.dtype() == Some(dtype) {
            source_state.value()
        } else {
            LazyValue::Node(source.cast(dtype)?.ir_node()?)
        };
        state.replace(value);
        Ok(())
    }

    fn derive(&self, op: OpKind, operands: Vec<NodePtr>, spec: TensorSpec) -> Result<LazyTensor> {
        let state = self.state()?;
        let node = Node::new(op, operands, spec);
        Ok(Self::from_node(&state.executor, node, &state.device))
    }

    fn unary(&self, op: UnaryOp) -> Result<LazyTensor> {
        let spec = self.spec().ok_or_else(|| anyhow!("operation on a null lazy tensor"))?;
        if op == UnaryOp::Exp {
            ensure!(spec.dtype.is_float(), "exp requires a float dtype, got {:?}", spec.dtype);
        }
        self.derive(OpKind::Unary(op), vec![self.ir_node()?], spec)
    }

    fn binary(&self, op: BinaryOp, other: &LazyTensor) -> Result<LazyTensor> {
        let state = self.state()?;
        let other_state = other.state()?;
        if !Arc::ptr_eq(&state.executor, &other_state.executor) {
            fatal(ContractViolation::ForeignExecutor { tensor: other_state.id });
        }
        ensure!(
            state.device == other_state.device,
            "{op:?} operands live on different devices ({} vs {})",
            state.device,
            other_state.device
        );
        let lhs = state.value().spec();
        let rhs = other_state.value().spec();
        ensure!(
            lhs.dtype == rhs.dtype,
            "{op:?} dtype mismatch: {:?} vs {:?}",
            lhs.dtype,
            rhs.dtype
        );
        let shape = if lhs.shape == rhs.shape || rhs.shape.rank() == 0 {
            lhs.shape.clone()
        } else if lhs.shape.rank() == 0 {
            rhs.shape.clone()
        } else {
            bail!("{op:?} shape mismatch: {} vs {}", lhs.shape, rhs.shape);
        };
        self.derive(
            OpKind::Binary(op),
            vec![self.ir_node()?, other.ir_node()?],
            TensorSpec::new(lhs.dtype, shape),
        )
    }

    pub fn add(&self, other: &LazyTensor) -> Result<LazyTensor> {
        self.binary(BinaryOp::Add, other)
    }

    pub fn sub(&self, other: &LazyTensor) -> Result<LazyTensor> {
        self.binary(BinaryOp::Sub, other)
    }

    pub fn mul(&self, other: &LazyTensor) -> Result<LazyTensor> {
        self.binary(BinaryOp::Mul, other)
    }

    pub fn div(&self, other: &LazyTensor) -> Result<LazyTensor> {
        self.binary(BinaryOp::Div, other)
    }

    pub fn maximum(&self, other: &LazyTensor) -> Result<LazyTensor> {
        self.binary(BinaryOp::Max, other)
    }

    pub fn neg(&self) -> Result<LazyTensor> {
        self.unary(UnaryOp::Neg)
    }

    pub fn exp(&self) -> Result<LazyTensor> {
        self.unary(UnaryOp::Exp)
    }

    pub fn relu(&self) -> Result<LazyTensor> {
        self.unary(UnaryOp::Relu)
    }

    pub fn abs(&self) -> Result<LazyTensor> {
        self.unary(UnaryOp::Abs)
    }

    pub fn cast(&self, dtype: DType) -> Result<LazyTensor> {
        let spec = self.spec().ok_or_else(|| anyhow!("operation on a null lazy tensor"))?;
        self.derive(
            OpKind::Cast(dtype),
            vec![self.ir_node()?],
            TensorSpec::new(dtype, spec.shape),
        )
    }
}

impl LazyTensorState {
    fn value(&self) -> LazyValue {
        self.value.lock().expect("lazy tensor value poisoned").clone()
    }

    fn replace(&self, value: LazyValue) {
        *self.value.lock().expect("lazy tensor value poisoned") = value;
        *self.cached.lock().expect("lazy tensor cache poisoned") = None;
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

impl PartialEq for LazyTensor {
    fn eq(&self, other: &Self) -> bool {
        match (&self.state, &other.state) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl Eq for LazyTensor {}

impl fmt::Debug for LazyTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(state) = self.state.as_ref() else {
            return f.write_str("LazyTensor(null)");
        };
        let kind = match state.value() {
            LazyValue::Data(_) => "data",
            LazyValue::Node(node) if node.is_ready() => "ready",
            LazyValue::Node(_) => "pending",
            LazyValue::Host(_) => "host",
        };
        let spec = state.value().spec();
        write!(
            f,
            "LazyTensor(id={}, {kind}, shape={}, dtype={:?}, device={})",
            state.id, spec.shape, spec.dtype, state.device
        )
    }
}
