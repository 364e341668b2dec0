use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::backend::{BackendDataPtr, TensorSpec};
use crate::tensor::DType;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl NodeId {
    fn fresh() -> Self {
        NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Exp,
    Relu,
    Abs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Max,
}

/// Operation recorded by a node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpKind {
    /// Leaf wrapping already materialized backend data.
    DeviceData,
    /// Constant-filled tensor of the node's spec.
    Fill { value: f32 },
    Unary(UnaryOp),
    Binary(BinaryOp),
    Cast(DType),
    /// Uniform samples in `[low, high)` drawn from the backend RNG.
    Uniform { low: f32, high: f32 },
}

impl Hash for OpKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            OpKind::DeviceData => {}
            OpKind::Fill { value } => value.to_bits().hash(state),
            OpKind::Unary(op) => op.hash(state),
            OpKind::Binary(op) => op.hash(state),
            OpKind::Cast(dtype) => dtype.hash(state),
            OpKind::Uniform { low, high } => {
                low.to_bits().hash(state);
                high.to_bits().hash(state);
            }
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::DeviceData => f.write_str("device_data"),
            OpKind::Fill { value } => write!(f, "fill[{value}]"),
            OpKind::Unary(op) => write!(f, "{}", format!("{op:?}").to_ascii_lowercase()),
            OpKind::Binary(op) => write!(f, "{}", format!("{op:?}").to_ascii_lowercase()),
            OpKind::Cast(dtype) => write!(f, "cast[{dtype:?}]"),
            OpKind::Uniform { low, high } => write!(f, "uniform[{low}, {high})"),
        }
    }
}

/// Materialization state of a node.
/// Nodes start pending and become ready once the backend has produced their data.
#[derive(Clone)]
pub enum NodeState {
    Pending,
    Ready(BackendDataPtr),
}

/// Immutable graph node; only its materialization state changes after construction.
pub struct Node {
    id: NodeId,
    op: OpKind,
    operands: Vec<NodePtr>,
    spec: TensorSpec,
    state: Mutex<NodeState>,
}

pub type NodePtr = Arc<Node>;

impl Node {
    /// Records a pending node.
    pub fn new(op: OpKind, operands: Vec<NodePtr>, spec: TensorSpec) -> NodePtr {
        Arc::new(Node {
            id: NodeId::fresh(),
            op,
            operands,
            spec,
            state: Mutex::new(NodeState::Pending),
        })
    }

    /// Wraps backend data in a leaf that is ready from the start.
    pub fn device_data(data: BackendDataPtr) -> NodePtr {
        let spec = data.spec();
        Arc::new(Node {
            id: NodeId::fresh(),
            op: OpKind::DeviceData,
            operands: Vec::new(),
            spec,
            state: Mutex::new(NodeState::Ready(data)),
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn op(&self) -> &OpKind {
        &self.op
    }

    pub fn operands(&self) -> &[NodePtr] {
        &self.operands
    }

    pub fn spec(&self) -> &TensorSpec {
        &self.spec
    }

    pub fn state(&self) -> NodeState {
        self.state.lock().expect("node state poisoned").clone()
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.state.lock().expect("node state poisoned"), NodeState::Ready(_))
    }

    /// Backend data of a ready node.
    pub fn data(&self) -> Option<BackendDataPtr> {
        match &*self.state.lock().expect("node state poisoned") {
            NodeState::Ready(data) => Some(Arc::clone(data)),
            NodeState::Pending => None,
        }
    }

    pub(crate) fn mark_ready(&self, data: BackendDataPtr) {
        *self.state.lock().expect("node state poisoned") = NodeState::Ready(data);
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let operands: Vec<NodeId> = self.operands.iter().map(|n| n.id).collect();
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("op", &self.op)
            .field("operands", &operands)
            .field("spec", &self.spec)
            .field("ready", &self.is_ready())
            .finish()
    }
}
