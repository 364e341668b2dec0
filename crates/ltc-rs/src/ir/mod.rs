//! Deferred computation graph nodes and the scheduling helpers the executor lowers them with.

mod node;
mod util;

pub use node::{BinaryOp, Node, NodeId, NodePtr, NodeState, OpKind, UnaryOp};
pub use util::{compute_post_order, graph_fingerprint, EmissionMap, EmitStatus};
