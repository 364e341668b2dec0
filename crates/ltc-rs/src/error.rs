//! Contract violations raised by the lazy tensor runtime.
//!
//! Two failure classes exist at this layer. Expected absence (a handle that is not
//! lazy-backed, a device that is not lazy-tagged) is reported through `Option` by the
//! `try_*`/`get_*_device` helpers. Contract violations are programming errors: the caller
//! broke an invariant it was required to establish. Those never travel as values; they go
//! through [`fatal`], which logs the violation and panics with its printable form.

use thiserror::Error;

/// Caller-side invariant breaches that terminate the current thread.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractViolation {
    #[error("input tensor is not a lazy tensor: {tensor}")]
    NotLazyTensor { tensor: String },
    #[error("lazy tensor backend not registered")]
    BackendNotRegistered,
    #[error("lazy tensor backend already registered ({existing}); refusing to replace it with {attempted}")]
    BackendAlreadyRegistered { existing: String, attempted: String },
    #[error("expected a lazy device, got {device}")]
    DeviceNotLazy { device: String },
    #[error("cannot materialize a lazy tensor into lazy device {device}")]
    LazyTargetDevice { device: String },
    #[error("metadata update requires a lazy destination: {tensor}")]
    MetaUpdateOnNonLazy { tensor: String },
    #[error("metadata update requires a non-lazy source: {tensor}")]
    MetaUpdateFromLazySource { tensor: String },
    #[error("malformed backend device string '{value}'")]
    InvalidDeviceString { value: String },
    #[error("cycle detected in lazy graph at node {node}")]
    GraphCycle { node: u64 },
    #[error("lazy tensor {tensor} is owned by a different graph executor")]
    ForeignExecutor { tensor: u64 },
    #[error("index {index} out of bounds for tensor list of length {len}")]
    IndexOutOfBounds { index: usize, len: usize },
}

/// Reports a contract violation and aborts the calling thread.
#[track_caller]
pub fn fatal(violation: ContractViolation) -> ! {
    tracing::error!(%violation, "lazy tensor contract violation");
    panic!("{violation}")
}

/// Checks a condition and escalates to [`fatal`] with the provided violation when it fails.
#[macro_export]
macro_rules! ltc_check {
    ($cond:expr, $violation:expr $(,)?) => {
        if !$cond {
            $crate::error::fatal($violation);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violations_render_offending_value() {
        let violation = ContractViolation::NotLazyTensor {
            tensor: "Tensor(dense, shape=[2], dtype=F32, device=cpu)".to_string(),
        };
        assert!(violation.to_string().contains("shape=[2]"));
    }

    #[test]
    #[should_panic(expected = "expected a lazy device, got cpu")]
    fn check_macro_panics_with_display_text() {
        ltc_check!(
            1 + 1 == 3,
            ContractViolation::DeviceNotLazy {
                device: "cpu".to_string()
            }
        );
    }

    #[test]
    fn check_macro_passes_through_on_success() {
        ltc_check!(true, ContractViolation::BackendNotRegistered);
    }
}
