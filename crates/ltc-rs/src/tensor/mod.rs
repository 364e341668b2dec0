//! Host-side tensor model shared by the runtime and its backends.
//!
//! [`HostTensor`] is the concrete buffer that materialization produces and that backends
//! stage from. [`Tensor`] is the generic handle the host framework passes around; it may
//! wrap either a dense host buffer or a [`LazyTensor`](crate::lazy_tensor::LazyTensor).

pub mod dtype;
mod frontend;
mod host_tensor;
pub mod shape;

pub use dtype::DType;
pub use frontend::{Tensor, TensorOptions};
pub use host_tensor::{HostTensor, TensorData};
pub use shape::Shape;
