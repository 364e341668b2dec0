use std::any::Any;
use std::sync::Arc;

use super::spec::TensorSpec;

/// A lowered (and possibly compiled) backend program with positional inputs and outputs.
pub trait Computation: Send + Sync {
    fn name(&self) -> &str;

    fn parameter_specs(&self) -> &[TensorSpec];

    fn result_specs(&self) -> &[TensorSpec];

    fn is_compiled(&self) -> bool;

    fn as_any(&self) -> &dyn Any;
}

pub type ComputationPtr = Arc<dyn Computation>;
