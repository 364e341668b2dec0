extern crate self as ltc_rs;

pub mod backend;
pub mod bridge;
pub mod config;
pub mod device;
mod env;
pub mod error;
pub mod executor;
pub mod ir;
pub mod lazy_tensor;
pub mod logging;
pub mod tensor;

pub use backend::interface::BackendImpl;
pub use config::RuntimeConfig;
pub use error::ContractViolation;
pub use device::{BackendDeviceType, Device, DeviceKind, FrontendDevice};
pub use executor::LazyGraphExecutor;
pub use lazy_tensor::LazyTensor;
pub use tensor::{DType, HostTensor, Shape, Tensor, TensorOptions};
