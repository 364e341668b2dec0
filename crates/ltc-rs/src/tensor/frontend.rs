//! Generic tensor handle exchanged with the host framework.

use std::fmt;
use std::sync::{Arc, RwLock};

use anyhow::{bail, Result};

use super::{dtype::DType, host_tensor::HostTensor, shape::Shape};
use crate::device::{device_to_frontend, FrontendDevice};
use crate::lazy_tensor::LazyTensor;

/// Cheap-clone handle over a host framework tensor.
///
/// A handle is either undefined (`Tensor::default()`), a dense host buffer, or a
/// lazy-backed implementation that wraps a [`LazyTensor`]. Clones share the same
/// implementation, so replacing the wrapped lazy tensor through one clone is visible
/// through every other clone.
#[derive(Clone, Default)]
pub struct Tensor {
    inner: Option<Arc<TensorCell>>,
}

struct TensorCell {
    storage: TensorStorage,
    wrapped_number: bool,
}

enum TensorStorage {
    Dense(RwLock<HostTensor>),
    Lazy(LazyImpl),
}

/// Lazy-backed implementation: the wrapped lazy tensor plus its cached shape metadata.
pub(crate) struct LazyImpl {
    tensor: RwLock<LazyTensor>,
    sizes: RwLock<Option<Shape>>,
    interop_view: bool,
}

impl LazyImpl {
    fn new(tensor: LazyTensor, interop_view: bool) -> Self {
        let sizes = tensor.shape();
        LazyImpl {
            tensor: RwLock::new(tensor),
            sizes: RwLock::new(sizes),
            interop_view,
        }
    }

    pub(crate) fn tensor(&self) -> LazyTensor {
        self.tensor.read().expect("lazy impl poisoned").clone()
    }

    /// Swaps the wrapped lazy tensor and drops the cached sizes.
    pub(crate) fn set_tensor(&self, tensor: LazyTensor) {
        *self.tensor.write().expect("lazy impl poisoned") = tensor;
        self.mark_sizes_stale();
    }

    pub(crate) fn mark_sizes_stale(&self) {
        *self.sizes.write().expect("lazy impl sizes poisoned") = None;
    }

    fn sizes(&self) -> Option<Shape> {
        if let Some(shape) = self.sizes.read().expect("lazy impl sizes poisoned").as_ref() {
            return Some(shape.clone());
        }
        let shape = self.tensor().shape();
        *self.sizes.write().expect("lazy impl sizes poisoned") = shape.clone();
        shape
    }

    pub(crate) fn is_interop_view(&self) -> bool {
        self.interop_view
    }
}

impl Tensor {
    fn from_storage(storage: TensorStorage, wrapped_number: bool) -> Self {
        Tensor {
            inner: Some(Arc::new(TensorCell {
                storage,
                wrapped_number,
            })),
        }
    }

    /// Wraps a dense host buffer.
    pub fn from_host(tensor: HostTensor) -> Self {
        Self::from_storage(TensorStorage::Dense(RwLock::new(tensor)), false)
    }

    /// Creates the lightweight rank-zero tensor the framework uses for Python-style scalars.
    pub fn wrapped_number(value: f32) -> Self {
        Self::from_storage(
            TensorStorage::Dense(RwLock::new(HostTensor::scalar(value))),
            true,
        )
    }

    /// Rebinds a lazy tensor as a lazy-backed handle.
    pub(crate) fn from_lazy(tensor: LazyTensor) -> Self {
        Self::from_storage(TensorStorage::Lazy(LazyImpl::new(tensor, false)), false)
    }

    /// Rebinds a lazy tensor as an interop view over non-lazy memory.
    pub(crate) fn interop_view(tensor: LazyTensor) -> Self {
        Self::from_storage(TensorStorage::Lazy(LazyImpl::new(tensor, true)), false)
    }

    pub fn is_defined(&self) -> bool {
        self.inner.is_some()
    }

    /// Capability query: does this handle wrap a lazy tensor implementation.
    pub fn is_lazy(&self) -> bool {
        self.lazy_impl().is_some()
    }

    pub fn is_wrapped_number(&self) -> bool {
        self.inner
            .as_ref()
            .map(|cell| cell.wrapped_number)
            .unwrap_or(false)
    }

    pub(crate) fn lazy_impl(&self) -> Option<&LazyImpl> {
        match &self.inner.as_ref()?.storage {
            TensorStorage::Lazy(lazy) => Some(lazy),
            TensorStorage::Dense(_) => None,
        }
    }

    /// Shape of the tensor. Lazy handles serve cached metadata, recomputing it when stale.
    pub fn sizes(&self) -> Option<Shape> {
        match &self.inner.as_ref()?.storage {
            TensorStorage::Dense(host) => {
                Some(host.read().expect("dense tensor poisoned").shape().clone())
            }
            TensorStorage::Lazy(lazy) => lazy.sizes(),
        }
    }

    pub fn dtype(&self) -> Option<DType> {
        match &self.inner.as_ref()?.storage {
            TensorStorage::Dense(host) => Some(host.read().expect("dense tensor poisoned").dtype()),
            TensorStorage::Lazy(lazy) => lazy.tensor().dtype(),
        }
    }

    pub fn device(&self) -> Option<FrontendDevice> {
        match &self.inner.as_ref()?.storage {
            TensorStorage::Dense(_) => Some(FrontendDevice::cpu()),
            TensorStorage::Lazy(lazy) => lazy.tensor().device().map(|d| device_to_frontend(&d)),
        }
    }

    /// Copies out the dense buffer. Returns `None` for undefined or lazy-backed handles.
    pub fn to_host(&self) -> Option<HostTensor> {
        match &self.inner.as_ref()?.storage {
            TensorStorage::Dense(host) => Some(host.read().expect("dense tensor poisoned").clone()),
            TensorStorage::Lazy(_) => None,
        }
    }

    /// Resizes the dense buffer to `source`'s shape and copies its contents in place.
    pub fn resize_as_and_copy(&self, source: &HostTensor) -> Result<()> {
        match self.inner.as_ref().map(|cell| &cell.storage) {
            Some(TensorStorage::Dense(host)) => {
                host.write()
                    .expect("dense tensor poisoned")
                    .resize_as_and_copy(source);
                Ok(())
            }
            Some(TensorStorage::Lazy(_)) => bail!("resize_as_and_copy on lazy tensor {self}"),
            None => bail!("resize_as_and_copy on undefined tensor"),
        }
    }

    /// Reports whether both handles share the same implementation.
    pub fn same_handle(&self, other: &Tensor) -> bool {
        match (&self.inner, &other.inner) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(cell) = self.inner.as_ref() else {
            return f.write_str("Tensor(undefined)");
        };
        match &cell.storage {
            TensorStorage::Dense(host) => {
                let host = host.read().expect("dense tensor poisoned");
                write!(
                    f,
                    "Tensor(dense, shape={}, dtype={:?}, device=cpu)",
                    host.shape(),
                    host.dtype()
                )
            }
            TensorStorage::Lazy(lazy) => {
                let tensor = lazy.tensor();
                let shape = tensor
                    .shape()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "?".to_string());
                let device = tensor
                    .device()
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "none".to_string());
                write!(
                    f,
                    "Tensor(lazy, id={}, shape={}, dtype={:?}, device={})",
                    tensor.unique_id(),
                    shape,
                    tensor.dtype(),
                    device
                )
            }
        }
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Requested element type and placement for a host conversion. Unset fields keep the source's.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TensorOptions {
    pub dtype: Option<DType>,
    pub device: Option<FrontendDevice>,
}

impl TensorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dtype(mut self, dtype: DType) -> Self {
        self.dtype = Some(dtype);
        self
    }

    pub fn device(mut self, device: FrontendDevice) -> Self {
        self.device = Some(device);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undefined_handle_reports_nothing() {
        let tensor = Tensor::default();
        assert!(!tensor.is_defined());
        assert!(!tensor.is_lazy());
        assert!(tensor.sizes().is_none());
        assert!(tensor.device().is_none());
        assert_eq!(tensor.to_string(), "Tensor(undefined)");
    }

    #[test]
    fn dense_handle_copies_in_place() -> Result<()> {
        let tensor = Tensor::from_host(HostTensor::zeros(Shape::new([1]), DType::F32));
        let alias = tensor.clone();
        tensor.resize_as_and_copy(&HostTensor::from_vec(Shape::new([2]), vec![3.0, 4.0])?)?;
        assert!(alias.same_handle(&tensor));
        assert_eq!(alias.to_host().map(|h| h.to_f32_vec()), Some(vec![3.0, 4.0]));
        assert_eq!(
            tensor.to_string(),
            "Tensor(dense, shape=[2], dtype=F32, device=cpu)"
        );
        Ok(())
    }

    #[test]
    fn wrapped_numbers_are_dense_scalars() {
        let tensor = Tensor::wrapped_number(2.5);
        assert!(tensor.is_wrapped_number());
        assert!(!tensor.is_lazy());
        assert_eq!(tensor.sizes(), Some(Shape::scalar()));
    }

    #[test]
    fn options_builder_sets_fields() {
        let options = TensorOptions::new()
            .dtype(DType::BF16)
            .device(FrontendDevice::cpu());
        assert_eq!(options.dtype, Some(DType::BF16));
        assert_eq!(options.device, Some(FrontendDevice::cpu()));
    }
}
