//! Translation between generic [`Tensor`] handles and [`LazyTensor`]s.
//!
//! Every function here checks whether a handle is lazy-backed before treating it as one.
//! The `try_*` and `get_lazy_device*` helpers report absence through `Option`; the plain
//! `get_*`/`replace_*` helpers assume the caller already established that the handle is
//! lazy-backed and treat a violation as fatal.

use anyhow::{anyhow, ensure, Result};

use crate::device::{frontend_to_device, Device, FrontendDevice};
use crate::error::{fatal, ContractViolation};
use crate::executor::TensorMaterializer;
use crate::lazy_tensor::LazyTensor;
use crate::tensor::{Tensor, TensorOptions};

/// Returns the wrapped lazy tensor, or `None` for undefined and non-lazy handles.
pub fn try_get_lazy_tensor(tensor: &Tensor) -> Option<LazyTensor> {
    tensor.lazy_impl().map(|lazy| lazy.tensor())
}

pub fn is_lazy_tensor(tensor: &Tensor) -> bool {
    tensor.is_lazy()
}

/// Returns the wrapped lazy tensor. Fatal if `tensor` is not lazy-backed.
#[track_caller]
pub fn get_lazy_tensor(tensor: &Tensor) -> LazyTensor {
    match try_get_lazy_tensor(tensor) {
        Some(lazy) => lazy,
        None => fatal(ContractViolation::NotLazyTensor {
            tensor: tensor.to_string(),
        }),
    }
}

/// Lazy tensors behind `tensors`; non-lazy entries map to the null tensor.
pub fn get_lazy_tensors(tensors: &[Tensor]) -> Vec<LazyTensor> {
    tensors
        .iter()
        .map(|tensor| try_get_lazy_tensor(tensor).unwrap_or_default())
        .collect()
}

/// Swaps the lazy tensor wrapped by `tensor`. Fatal if `tensor` is not lazy-backed.
#[track_caller]
pub fn replace_lazy_tensor(tensor: &Tensor, new_value: LazyTensor) {
    match tensor.lazy_impl() {
        Some(lazy) => lazy.set_tensor(new_value),
        None => fatal(ContractViolation::NotLazyTensor {
            tensor: tensor.to_string(),
        }),
    }
}

/// Null for undefined handles, the wrapped tensor for lazy handles, a fresh lazy tensor on
/// `device` otherwise.
pub fn get_or_create_lazy_tensor(tensor: &Tensor, device: &Device) -> LazyTensor {
    if !tensor.is_defined() {
        return LazyTensor::default();
    }
    if let Some(lazy) = try_get_lazy_tensor(tensor) {
        return lazy;
    }
    match tensor.to_host() {
        Some(host) => LazyTensor::create(host, device),
        None => LazyTensor::default(),
    }
}

pub fn get_or_create_lazy_tensor_opt(tensor: Option<&Tensor>, device: &Device) -> LazyTensor {
    match tensor {
        Some(tensor) => get_or_create_lazy_tensor(tensor, device),
        None => LazyTensor::default(),
    }
}

/// Wrapped numbers are wrapped on demand; anything else must already be lazy-backed.
#[track_caller]
pub fn get_lazy_tensor_or_create_for_wrapped_number(
    tensor: &Tensor,
    device: &Device,
) -> LazyTensor {
    if tensor.is_wrapped_number() {
        get_or_create_lazy_tensor(tensor, device)
    } else {
        get_lazy_tensor(tensor)
    }
}

/// Materializes every lazy handle in `tensors` with one batch call on the executor that owns
/// the first lazy entry. Undefined entries stay undefined and non-lazy entries pass through.
pub fn create_tensor_list(tensors: &[Tensor]) -> Result<Vec<Tensor>> {
    let executor = tensors
        .iter()
        .find_map(try_get_lazy_tensor)
        .and_then(|lazy| lazy.executor().cloned());
    match executor {
        Some(executor) => create_tensor_list_with(executor.as_ref(), tensors),
        None => Ok(tensors.to_vec()),
    }
}

/// [`create_tensor_list`] against an explicit materializer.
pub fn create_tensor_list_with(
    materializer: &dyn TensorMaterializer,
    tensors: &[Tensor],
) -> Result<Vec<Tensor>> {
    let mut to_translate = Vec::new();
    let mut lazy_mask = vec![false; tensors.len()];
    for (index, tensor) in tensors.iter().enumerate() {
        if let Some(lazy) = try_get_lazy_tensor(tensor) {
            lazy_mask[index] = true;
            to_translate.push(lazy);
        }
    }
    if to_translate.is_empty() {
        return Ok(tensors.to_vec());
    }

    let materialized = materializer.get_tensors(&to_translate)?;
    ensure!(
        materialized.len() == to_translate.len(),
        "materializer returned {} tensors for {} lazy inputs",
        materialized.len(),
        to_translate.len()
    );
    let mut materialized = materialized.into_iter();
    tensors
        .iter()
        .zip(lazy_mask)
        .map(|(tensor, is_lazy)| {
            if !is_lazy {
                return Ok(tensor.clone());
            }
            materialized
                .next()
                .map(Tensor::from_host)
                .ok_or_else(|| anyhow!("materialized tensor list exhausted"))
        })
        .collect()
}

pub fn create_opt_tensor_list(tensors: &[Option<Tensor>]) -> Result<Vec<Option<Tensor>>> {
    let executor = tensors
        .iter()
        .flatten()
        .find_map(try_get_lazy_tensor)
        .and_then(|lazy| lazy.executor().cloned());
    match executor {
        Some(executor) => create_opt_tensor_list_with(executor.as_ref(), tensors),
        None => Ok(tensors.to_vec()),
    }
}

/// Optional-entry variant of [`create_tensor_list_with`]; `None` entries stay `None`.
pub fn create_opt_tensor_list_with(
    materializer: &dyn TensorMaterializer,
    tensors: &[Option<Tensor>],
) -> Result<Vec<Option<Tensor>>> {
    let present: Vec<Tensor> = tensors.iter().flatten().cloned().collect();
    let mut translated = create_tensor_list_with(materializer, &present)?.into_iter();
    Ok(tensors
        .iter()
        .map(|tensor| tensor.as_ref().and_then(|_| translated.next()))
        .collect())
}

fn check_index(index: usize, len: usize) {
    if index >= len {
        fatal(ContractViolation::IndexOutOfBounds { index, len });
    }
}

/// Updates `dest[i]` from `source[i]` for every `i` in `indices`.
///
/// Lazy destinations take the source's value (lazy sources are adopted, host sources are
/// converted to the destination dtype) and have their cached sizes refreshed. Dense
/// destinations are resized to the source shape and overwritten.
pub fn update_tensors(dest: &[Tensor], source: &[Tensor], indices: &[usize]) -> Result<()> {
    for &index in indices {
        check_index(index, dest.len());
        check_index(index, source.len());
        let (dst, src) = (&dest[index], &source[index]);
        match dst.lazy_impl() {
            Some(lazy) => {
                let dst_lazy = lazy.tensor();
                match try_get_lazy_tensor(src) {
                    Some(src_lazy) => dst_lazy.update_from_lazy_tensor_out(&src_lazy)?,
                    None => {
                        let host = src
                            .to_host()
                            .ok_or_else(|| anyhow!("update source {index} is undefined"))?;
                        dst_lazy.update_from_tensor_out(&host)?;
                    }
                }
                lazy.mark_sizes_stale();
            }
            None => {
                let host = match try_get_lazy_tensor(src) {
                    Some(src_lazy) => src_lazy.to_tensor(true)?,
                    None => src
                        .to_host()
                        .ok_or_else(|| anyhow!("update source {index} is undefined"))?,
                };
                dst.resize_as_and_copy(&host)?;
            }
        }
    }
    Ok(())
}

/// Metadata-only update: lazy `dest[i]` takes host `source[i]` as its value without
/// recording graph work, and its cached sizes are refreshed. Fatal on a non-lazy
/// destination or a lazy source.
pub fn update_tensors_meta(dest: &[Tensor], source: &[Tensor], indices: &[usize]) -> Result<()> {
    for &index in indices {
        check_index(index, dest.len());
        check_index(index, source.len());
        let (dst, src) = (&dest[index], &source[index]);
        let Some(lazy) = dst.lazy_impl() else {
            fatal(ContractViolation::MetaUpdateOnNonLazy {
                tensor: dst.to_string(),
            });
        };
        if src.is_lazy() {
            fatal(ContractViolation::MetaUpdateFromLazySource {
                tensor: src.to_string(),
            });
        }
        let host = src
            .to_host()
            .ok_or_else(|| anyhow!("update source {index} is undefined"))?;
        lazy.tensor().update_from_tensor(&host, false)?;
        lazy.mark_sizes_stale();
    }
    Ok(())
}

pub fn get_lazy_device(tensor: &Tensor) -> Option<Device> {
    try_get_lazy_tensor(tensor)?.device()
}

pub fn get_lazy_device_opt(tensor: Option<&Tensor>) -> Option<Device> {
    get_lazy_device(tensor?)
}

/// Device of the first lazy-backed entry.
pub fn get_lazy_device_list(tensors: &[Tensor]) -> Option<Device> {
    tensors.iter().find_map(get_lazy_device)
}

pub fn get_lazy_device_options(options: &TensorOptions) -> Option<Device> {
    get_lazy_device_frontend(options.device.as_ref()?)
}

/// Translates `device` when it carries the lazy tag.
pub fn get_lazy_device_frontend(device: &FrontendDevice) -> Option<Device> {
    device.is_lazy().then(|| frontend_to_device(device))
}

pub fn get_lazy_device_frontend_opt(device: Option<&FrontendDevice>) -> Option<Device> {
    get_lazy_device_frontend(device?)
}

/// Materializes `tensor` and returns a private host copy converted to `options`.
///
/// The copy is never aliased with the lazy tensor's cached value. Fatal if `options` asks
/// for a lazy device.
pub fn lazy_to_host_tensor(tensor: LazyTensor, options: &TensorOptions) -> Result<Tensor> {
    if let Some(device) = options.device.filter(FrontendDevice::is_lazy) {
        fatal(ContractViolation::LazyTargetDevice {
            device: device.to_string(),
        });
    }
    let host = tensor.to_tensor(false)?;
    let dtype = options.dtype.unwrap_or(host.dtype());
    Ok(Tensor::from_host(host.cast(dtype)))
}

/// Wraps `tensor` as a lazy-backed handle. A null tensor yields an undefined handle.
pub fn tensor_from_lazy(tensor: LazyTensor) -> Tensor {
    if tensor.is_null() {
        Tensor::default()
    } else {
        Tensor::from_lazy(tensor)
    }
}

pub fn tensors_from_lazy(tensors: Vec<LazyTensor>) -> Vec<Tensor> {
    tensors.into_iter().map(tensor_from_lazy).collect()
}

/// Rebinds a defined `tensor` as lazy-backed on `device`; otherwise returns it unchanged.
pub fn create_lazy_tensor(tensor: Tensor, device: Option<&Device>) -> Tensor {
    match device {
        Some(device) if tensor.is_defined() => {
            tensor_from_lazy(get_or_create_lazy_tensor(&tensor, device))
        }
        _ => tensor,
    }
}

pub fn create_lazy_tensors(tensors: &[Tensor], device: Option<&Device>) -> Vec<Tensor> {
    tensors
        .iter()
        .map(|tensor| create_lazy_tensor(tensor.clone(), device))
        .collect()
}

/// Wraps `tensor` as a view bridging into non-lazy memory.
pub fn interop_view_from_lazy(tensor: LazyTensor) -> Tensor {
    if tensor.is_null() {
        Tensor::default()
    } else {
        Tensor::interop_view(tensor)
    }
}

pub fn is_interop_view(tensor: &Tensor) -> bool {
    tensor
        .lazy_impl()
        .map(|lazy| lazy.is_interop_view())
        .unwrap_or(false)
}
