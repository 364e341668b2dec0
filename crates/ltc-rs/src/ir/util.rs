//! Post-order scheduling and structural fingerprints for lazy graphs.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use super::node::{NodeId, NodePtr};
use crate::error::{fatal, ContractViolation};

const FNV1A_OFFSET: u64 = 0xcbf29ce484222325;
const FNV1A_PRIME: u64 = 0x100000001b3;

/// Scheduling state of a node while a post order is being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitStatus {
    NotEmitted,
    Emitting,
    Emitted,
}

/// Tracks which nodes were already scheduled, so shared subgraphs are emitted only once
/// across every root of a sync.
#[derive(Debug, Clone, Default)]
pub struct EmissionMap {
    status: HashMap<NodeId, EmitStatus>,
}

impl EmissionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, id: NodeId) -> EmitStatus {
        self.status
            .get(&id)
            .copied()
            .unwrap_or(EmitStatus::NotEmitted)
    }

    pub fn set(&mut self, id: NodeId, status: EmitStatus) {
        self.status.insert(id, status);
    }

    pub fn is_emitted(&self, id: NodeId) -> bool {
        self.status(id) == EmitStatus::Emitted
    }

    pub fn len(&self) -> usize {
        self.status.len()
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_empty()
    }
}

/// Appends every node reachable from `roots` that `emit_status` has not seen yet, operands
/// first. Ready nodes are emitted as leaves; their history is not walked.
pub fn compute_post_order(roots: &[NodePtr], emit_status: &mut EmissionMap) -> Vec<NodePtr> {
    let mut post_order = Vec::new();
    let mut stack: Vec<(NodePtr, bool)> = Vec::new();
    for root in roots {
        stack.push((root.clone(), false));
        while let Some((node, expanded)) = stack.pop() {
            let id = node.id();
            if expanded {
                emit_status.set(id, EmitStatus::Emitted);
                post_order.push(node);
                continue;
            }
            match emit_status.status(id) {
                EmitStatus::Emitted => continue,
                EmitStatus::Emitting => fatal(ContractViolation::GraphCycle { node: id.0 }),
                EmitStatus::NotEmitted => {}
            }
            if node.is_ready() {
                emit_status.set(id, EmitStatus::Emitted);
                post_order.push(node);
                continue;
            }
            emit_status.set(id, EmitStatus::Emitting);
            let operands: Vec<NodePtr> = node.operands().to_vec();
            stack.push((node, true));
            for operand in operands.into_iter().rev() {
                if emit_status.status(operand.id()) != EmitStatus::Emitted {
                    stack.push((operand, false));
                }
            }
        }
    }
    post_order
}

fn hash_value<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

fn fnv1a_bytes(mut hash: u64, bytes: &[u8]) -> u64 {
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV1A_PRIME);
    }
    hash
}

/// Structural hash of a scheduled graph.
///
/// Node identities and buffer contents do not contribute: ready nodes hash as numbered
/// parameters (two ready nodes over the same buffer share a number), computed nodes hash
/// their op, spec and operand positions. Two syncs that differ only in input data therefore
/// share a fingerprint and a compiled computation.
pub fn graph_fingerprint(post_order: &[NodePtr], roots: &[NodePtr]) -> u64 {
    let mut positions: HashMap<NodeId, usize> = HashMap::with_capacity(post_order.len());
    let mut parameters: HashMap<u64, usize> = HashMap::new();
    let mut hash = FNV1A_OFFSET;
    for (position, node) in post_order.iter().enumerate() {
        positions.insert(node.id(), position);
        let node_hash = match node.data() {
            Some(data) => {
                let next = parameters.len();
                let parameter = *parameters.entry(data.handle_id()).or_insert(next);
                hash_value(&("param", parameter, node.spec()))
            }
            None => {
                let operands: Vec<Option<usize>> = node
                    .operands()
                    .iter()
                    .map(|operand| positions.get(&operand.id()).copied())
                    .collect();
                hash_value(&("node", node.op(), node.spec(), operands))
            }
        };
        hash = fnv1a_bytes(hash, &node_hash.to_le_bytes());
    }
    for root in roots {
        let position = positions.get(&root.id()).copied();
        hash = fnv1a_bytes(hash, &hash_value(&("root", position)).to_le_bytes());
    }
    hash
}
