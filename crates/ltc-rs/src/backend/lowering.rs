use super::computation::ComputationPtr;
use super::data::BackendDataPtr;
use super::spec::BackendResult;
use crate::device::Device;
use crate::ir::NodePtr;

/// Backend-side builder that turns graph nodes into a [`Computation`](super::Computation).
///
/// Ready nodes become computation parameters. Parameters are numbered in the order their
/// nodes are first lowered, and two ready nodes backed by the same buffer (`handle_id`)
/// share one parameter. Lowering a node twice is a no-op.
pub trait LoweringContext: Send {
    fn name(&self) -> &str;

    fn device(&self) -> &Device;

    /// Lowers `node` and, transitively, any operand not lowered yet.
    fn lower_node(&mut self, node: &NodePtr) -> BackendResult<()>;

    /// Registers `node` as the next positional output and returns its output index.
    fn add_result(&mut self, node: &NodePtr) -> BackendResult<usize>;

    /// Data handles to pass as arguments, in parameter order.
    fn parameter_data(&self) -> Vec<BackendDataPtr>;

    /// Finishes lowering and returns the uncompiled computation.
    fn build(self: Box<Self>) -> BackendResult<ComputationPtr>;
}
