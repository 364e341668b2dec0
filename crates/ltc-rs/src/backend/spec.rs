use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tensor::{DType, Shape};

/// Logical element type and shape of a backend value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorSpec {
    pub dtype: DType,
    pub shape: Shape,
}

impl TensorSpec {
    pub fn new(dtype: DType, shape: Shape) -> Self {
        TensorSpec { dtype, shape }
    }

    pub fn num_elements(&self) -> usize {
        self.shape.num_elements()
    }
}

/// Recoverable failures reported by backend implementations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("backend execution failure: {message}")]
    Execution { message: String },
    #[error("{op} is not implemented: {reason}")]
    Unimplemented { op: &'static str, reason: String },
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },
    #[error("device {device} not found")]
    DeviceNotFound { device: String },
}

impl BackendError {
    pub fn execution(message: impl Into<String>) -> Self {
        BackendError::Execution {
            message: message.into(),
        }
    }

    pub fn unimplemented(op: &'static str, reason: impl Into<String>) -> Self {
        BackendError::Unimplemented {
            op,
            reason: reason.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        BackendError::InvalidArgument {
            message: message.into(),
        }
    }

    pub fn device_not_found(device: impl Into<String>) -> Self {
        BackendError::DeviceNotFound {
            device: device.into(),
        }
    }
}

/// Convenience alias for results returned by backend routines.
pub type BackendResult<T> = Result<T, BackendError>;
