//! Backend plugin boundary.
//!
//! Everything a hardware or compiler backend has to provide lives behind
//! [`BackendImpl`](interface::BackendImpl): staging host data, lowering graph nodes into a
//! backend computation, compiling and executing it, and describing the device topology.
//! The runtime never looks inside backend data or computations; it only moves the opaque
//! [`BackendDataPtr`](data::BackendDataPtr) and [`ComputationPtr`](computation::ComputationPtr)
//! handles around. [`registry`] holds the single active backend for the process.

pub mod computation;
pub mod data;
pub mod interface;
pub mod lowering;
pub mod registry;
pub mod spec;

pub use computation::{Computation, ComputationPtr};
pub use data::{BackendData, BackendDataPtr};
pub use interface::{BackendImpl, ReplicationDevices};
pub use lowering::LoweringContext;
pub use spec::{BackendError, BackendResult, TensorSpec};
