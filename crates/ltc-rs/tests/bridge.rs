use std::sync::Mutex;

use anyhow::Result;
use ltc_rs::bridge::*;
use ltc_rs::device::{default_device, BackendDeviceType, Device};
use ltc_rs::executor::TensorMaterializer;
use ltc_rs::tensor::{DType, HostTensor, Shape, Tensor, TensorOptions};
use ltc_rs::{FrontendDevice, LazyGraphExecutor, LazyTensor};
use ltc_rs_backend_ref_cpu::install_cpu_backend;

fn device() -> Device {
    default_device(install_cpu_backend().as_ref())
}

fn dense(values: Vec<f32>) -> Tensor {
    let len = values.len();
    Tensor::from_host(HostTensor::from_vec(Shape::new([len]), values).expect("valid host tensor"))
}

fn lazy(values: Vec<f32>) -> Tensor {
    create_lazy_tensor(dense(values), Some(&device()))
}

/// Materializer that records the ids it was asked for and delegates to the process executor.
#[derive(Default)]
struct RecordingMaterializer {
    calls: Mutex<Vec<Vec<u64>>>,
}

impl RecordingMaterializer {
    fn calls(&self) -> Vec<Vec<u64>> {
        self.calls.lock().expect("calls poisoned").clone()
    }
}

impl TensorMaterializer for RecordingMaterializer {
    fn get_tensors(&self, tensors: &[LazyTensor]) -> Result<Vec<HostTensor>> {
        self.calls
            .lock()
            .expect("calls poisoned")
            .push(tensors.iter().map(LazyTensor::unique_id).collect());
        LazyGraphExecutor::get().get_tensors(tensors)
    }
}

#[test]
fn lookup_succeeds_only_for_lazy_handles() {
    let handles = [Tensor::default(), dense(vec![1.0]), lazy(vec![2.0])];
    for handle in &handles {
        assert_eq!(try_get_lazy_tensor(handle).is_some(), is_lazy_tensor(handle));
    }
    assert!(!is_lazy_tensor(&handles[0]));
    assert!(!is_lazy_tensor(&handles[1]));
    assert!(is_lazy_tensor(&handles[2]));

    let lazies = get_lazy_tensors(&handles);
    assert!(lazies[0].is_null());
    assert!(lazies[1].is_null());
    assert_eq!(lazies[2], get_lazy_tensor(&handles[2]));
}

#[test]
#[should_panic(expected = "input tensor is not a lazy tensor")]
fn get_on_dense_handle_is_fatal() {
    let _ = get_lazy_tensor(&dense(vec![1.0]));
}

#[test]
fn wrapping_round_trips() {
    let lt = LazyTensor::create(HostTensor::scalar(4.0), &device());
    let tensor = tensor_from_lazy(lt.clone());
    assert_eq!(get_lazy_tensor(&tensor), lt);
    assert_eq!(get_lazy_device(&tensor), Some(device()));
    assert!(!tensor_from_lazy(LazyTensor::default()).is_defined());

    let wrapped = tensors_from_lazy(vec![lt.clone(), LazyTensor::default()]);
    assert!(wrapped[0].is_lazy());
    assert!(!wrapped[1].is_defined());
}

#[test]
fn replacement_is_visible_through_clones() -> Result<()> {
    let tensor = lazy(vec![1.0, 2.0]);
    let alias = tensor.clone();
    let values = HostTensor::from_vec(Shape::new([3]), vec![5.0, 6.0, 7.0])?;
    let replacement = LazyTensor::create(values, &device());
    replace_lazy_tensor(&tensor, replacement.clone());
    assert_eq!(get_lazy_tensor(&alias), replacement);
    assert_eq!(alias.sizes(), Some(Shape::new([3])));
    Ok(())
}

#[test]
#[should_panic(expected = "input tensor is not a lazy tensor")]
fn replacing_dense_handle_is_fatal() {
    replace_lazy_tensor(&dense(vec![1.0]), LazyTensor::default());
}

#[test]
fn get_or_create_respects_existing_lazy_tensors() -> Result<()> {
    let device = device();
    assert!(get_or_create_lazy_tensor(&Tensor::default(), &device).is_null());
    assert!(get_or_create_lazy_tensor_opt(None, &device).is_null());

    let existing = lazy(vec![1.0]);
    assert_eq!(get_or_create_lazy_tensor(&existing, &device), get_lazy_tensor(&existing));

    let created = get_or_create_lazy_tensor(&dense(vec![3.0, 4.0]), &device);
    assert_eq!(created.device(), Some(device));
    assert_eq!(created.to_tensor(true)?.data(), &[3.0, 4.0]);
    Ok(())
}

#[test]
fn wrapped_numbers_are_wrapped_on_demand() -> Result<()> {
    let device = device();
    let number = Tensor::wrapped_number(2.5);
    let lt = get_lazy_tensor_or_create_for_wrapped_number(&number, &device);
    assert_eq!(lt.shape(), Some(Shape::scalar()));
    assert_eq!(lt.to_tensor(true)?.data(), &[2.5]);

    let existing = lazy(vec![1.0, 2.0]);
    assert_eq!(
        get_lazy_tensor_or_create_for_wrapped_number(&existing, &device),
        get_lazy_tensor(&existing)
    );
    Ok(())
}

#[test]
#[should_panic(expected = "input tensor is not a lazy tensor")]
fn wrapped_number_path_rejects_dense_scalars() {
    let rank_zero = Tensor::from_host(HostTensor::scalar(1.0));
    let _ = get_lazy_tensor_or_create_for_wrapped_number(&rank_zero, &device());
}

#[test]
#[should_panic(expected = "input tensor is not a lazy tensor")]
fn wrapped_number_path_rejects_dense_vectors() {
    let _ = get_lazy_tensor_or_create_for_wrapped_number(&dense(vec![1.0, 2.0]), &device());
}

#[test]
fn tensor_list_forwards_only_lazy_entries() -> Result<()> {
    let first = lazy(vec![1.0, -1.0]);
    let second = create_lazy_tensor(dense(vec![8.0]), Some(&device()));
    let plain = dense(vec![9.0]);
    let inputs = vec![first.clone(), Tensor::default(), plain.clone(), second.clone()];

    let materializer = RecordingMaterializer::default();
    let outputs = create_tensor_list_with(&materializer, &inputs)?;

    let expected_ids = vec![
        get_lazy_tensor(&first).unique_id(),
        get_lazy_tensor(&second).unique_id(),
    ];
    assert_eq!(materializer.calls(), vec![expected_ids]);
    assert_eq!(outputs.len(), 4);
    assert_eq!(outputs[0].to_host().map(|h| h.to_f32_vec()), Some(vec![1.0, -1.0]));
    assert!(!outputs[1].is_defined());
    assert!(outputs[2].same_handle(&plain));
    assert_eq!(outputs[3].to_host().map(|h| h.to_f32_vec()), Some(vec![8.0]));
    assert!(outputs.iter().all(|t| !t.is_lazy()));
    Ok(())
}

#[test]
fn tensor_list_without_lazy_entries_skips_materializer() -> Result<()> {
    let materializer = RecordingMaterializer::default();
    let inputs = vec![dense(vec![1.0]), Tensor::default()];
    let outputs = create_tensor_list_with(&materializer, &inputs)?;
    assert!(materializer.calls().is_empty());
    assert!(outputs[0].same_handle(&inputs[0]));
    assert!(!outputs[1].is_defined());
    Ok(())
}

#[test]
fn optional_tensor_list_keeps_absent_entries() -> Result<()> {
    let materializer = RecordingMaterializer::default();
    let inputs = vec![None, Some(lazy(vec![3.0])), Some(dense(vec![4.0])), None];
    let outputs = create_opt_tensor_list_with(&materializer, &inputs)?;
    assert_eq!(materializer.calls().len(), 1);
    assert!(outputs[0].is_none() && outputs[3].is_none());
    let values = |entry: &Option<Tensor>| entry.as_ref().and_then(Tensor::to_host);
    assert_eq!(values(&outputs[1]).map(|h| h.to_f32_vec()), Some(vec![3.0]));
    assert_eq!(values(&outputs[2]).map(|h| h.to_f32_vec()), Some(vec![4.0]));

    let through_executor = create_opt_tensor_list(&inputs)?;
    assert!(through_executor.iter().flatten().all(|t| !t.is_lazy()));
    Ok(())
}

#[test]
fn default_tensor_list_uses_owning_executor() -> Result<()> {
    let a = lazy(vec![1.0, 2.0]);
    let doubled = tensor_from_lazy(get_lazy_tensor(&a).add(&get_lazy_tensor(&a))?);
    let outputs = create_tensor_list(&[doubled, dense(vec![0.5])])?;
    assert_eq!(outputs[0].to_host().map(|h| h.to_f32_vec()), Some(vec![2.0, 4.0]));
    assert_eq!(outputs[1].to_host().map(|h| h.to_f32_vec()), Some(vec![0.5]));
    Ok(())
}

#[test]
fn update_replaces_lazy_destinations_and_refreshes_sizes() -> Result<()> {
    let dest = vec![lazy(vec![0.0, 0.0]), dense(vec![0.0])];
    let source = vec![dense(vec![1.0, 2.0, 3.0]), lazy(vec![5.0, 6.0])];
    assert_eq!(dest[0].sizes(), Some(Shape::new([2])));

    update_tensors(&dest, &source, &[0, 1])?;

    assert_eq!(dest[0].sizes(), Some(Shape::new([3])));
    assert_eq!(get_lazy_tensor(&dest[0]).to_tensor(true)?.data(), &[1.0, 2.0, 3.0]);
    assert_eq!(dest[1].to_host().map(|h| h.to_f32_vec()), Some(vec![5.0, 6.0]));
    assert_eq!(dest[1].sizes(), Some(Shape::new([2])));
    Ok(())
}

#[test]
fn update_from_lazy_source_adopts_its_value() -> Result<()> {
    let dest = vec![lazy(vec![0.0])];
    let source_lazy = get_lazy_tensor(&lazy(vec![2.0])).neg()?;
    let source = vec![tensor_from_lazy(source_lazy)];
    update_tensors(&dest, &source, &[0])?;
    assert_eq!(get_lazy_tensor(&dest[0]).to_tensor(true)?.data(), &[-2.0]);
    Ok(())
}

#[test]
fn update_skips_unlisted_indices() -> Result<()> {
    let dest = vec![lazy(vec![0.0]), lazy(vec![0.0])];
    let source = vec![dense(vec![1.0]), dense(vec![2.0])];
    update_tensors(&dest, &source, &[1])?;
    assert_eq!(get_lazy_tensor(&dest[0]).to_tensor(true)?.data(), &[0.0]);
    assert_eq!(get_lazy_tensor(&dest[1]).to_tensor(true)?.data(), &[2.0]);
    Ok(())
}

#[test]
fn host_updates_convert_to_destination_dtype() -> Result<()> {
    let dest = vec![create_lazy_tensor(
        Tensor::from_host(HostTensor::from_i32(Shape::new([2]), vec![0, 0])?),
        Some(&device()),
    )];
    let source = vec![dense(vec![1.9, -2.7])];
    update_tensors(&dest, &source, &[0])?;
    let value = get_lazy_tensor(&dest[0]).to_tensor(true)?;
    assert_eq!(value.dtype(), DType::I32);
    assert_eq!(value.data_i32(), &[1, -2]);
    Ok(())
}

#[test]
#[should_panic(expected = "out of bounds")]
fn update_with_bad_index_is_fatal() {
    let dest = vec![lazy(vec![0.0])];
    let source = vec![dense(vec![1.0])];
    let _ = update_tensors(&dest, &source, &[1]);
}

#[test]
fn meta_update_replaces_value_without_bumping_generation() -> Result<()> {
    let base = get_lazy_tensor(&lazy(vec![1.0, 1.0]));
    let computed = base.add(&base)?;
    let dest = vec![tensor_from_lazy(computed.clone())];
    update_tensors_meta(&dest, &[dense(vec![7.0, 7.0])], &[0])?;

    assert_eq!(computed.generation(), 0);
    assert_eq!(computed.to_tensor(false)?.data(), &[7.0, 7.0]);
    assert_eq!(computed.to_tensor(true)?.data(), &[7.0, 7.0]);
    Ok(())
}

#[test]
fn meta_update_reaches_staged_destinations() -> Result<()> {
    let dest = vec![lazy(vec![1.0, 2.0])];
    update_tensors_meta(&dest, &[dense(vec![5.0, 6.0, 7.0])], &[0])?;

    let updated = get_lazy_tensor(&dest[0]);
    assert_eq!(updated.to_tensor(true)?.data(), &[5.0, 6.0, 7.0]);
    assert_eq!(updated.shape(), Some(Shape::new([3])));
    assert_eq!(dest[0].sizes(), Some(Shape::new([3])));
    assert_eq!(updated.generation(), 0);
    Ok(())
}

#[test]
fn meta_update_on_synced_destination_feeds_later_ops() -> Result<()> {
    let synced = get_lazy_tensor(&lazy(vec![1.0, 2.0])).neg()?;
    assert_eq!(synced.to_tensor(false)?.data(), &[-1.0, -2.0]);
    let dest = vec![tensor_from_lazy(synced.clone())];
    assert_eq!(dest[0].sizes(), Some(Shape::new([2])));

    update_tensors_meta(&dest, &[dense(vec![5.0, 6.0, 7.0])], &[0])?;

    assert_eq!(synced.to_tensor(false)?.data(), &[5.0, 6.0, 7.0]);
    assert_eq!(synced.shape(), Some(Shape::new([3])));
    assert_eq!(dest[0].sizes(), Some(Shape::new([3])));
    let doubled = synced.add(&synced)?;
    assert_eq!(doubled.to_tensor(true)?.data(), &[10.0, 12.0, 14.0]);
    Ok(())
}

#[test]
#[should_panic(expected = "metadata update requires a lazy destination")]
fn meta_update_on_dense_destination_is_fatal() {
    let _ = update_tensors_meta(&[dense(vec![0.0])], &[dense(vec![1.0])], &[0]);
}

#[test]
#[should_panic(expected = "metadata update requires a non-lazy source")]
fn meta_update_from_lazy_source_is_fatal() {
    let _ = update_tensors_meta(&[lazy(vec![0.0])], &[lazy(vec![1.0])], &[0]);
}

#[test]
fn device_queries_report_absence() {
    let device = device();
    let tensor = lazy(vec![1.0]);
    assert_eq!(get_lazy_device(&dense(vec![1.0])), None);
    assert_eq!(get_lazy_device(&Tensor::default()), None);
    assert_eq!(get_lazy_device_opt(None), None);
    assert_eq!(get_lazy_device_opt(Some(&tensor)), Some(device));
    assert_eq!(get_lazy_device_list(&[dense(vec![1.0]), tensor.clone()]), Some(device));
    assert_eq!(get_lazy_device_list(&[dense(vec![1.0])]), None);

    let cpu_options = TensorOptions::new().device(FrontendDevice::cpu());
    assert_eq!(get_lazy_device_options(&cpu_options), None);
    assert_eq!(get_lazy_device_options(&TensorOptions::new()), None);
    let lazy_options = TensorOptions::new().device(FrontendDevice::lazy(Some(0)));
    assert_eq!(
        get_lazy_device_options(&lazy_options),
        Some(Device::new(BackendDeviceType::Cpu, 0))
    );
    assert_eq!(get_lazy_device_frontend(&FrontendDevice::cpu()), None);
    assert_eq!(get_lazy_device_frontend_opt(None), None);
    assert_eq!(
        get_lazy_device_frontend_opt(Some(&FrontendDevice::lazy(Some(0)))),
        Some(device)
    );
}

#[test]
fn host_copies_never_alias_the_cached_value() -> Result<()> {
    let lt = get_lazy_tensor(&lazy(vec![1.0, 2.0])).neg()?;
    let copy = lazy_to_host_tensor(lt.clone(), &TensorOptions::new())?;
    assert_eq!(copy.to_host().map(|h| h.to_f32_vec()), Some(vec![-1.0, -2.0]));

    copy.resize_as_and_copy(&HostTensor::from_vec(Shape::new([2]), vec![100.0, 200.0])?)?;
    assert_eq!(lt.to_tensor(false)?.data(), &[-1.0, -2.0]);

    let as_int = lazy_to_host_tensor(lt, &TensorOptions::new().dtype(DType::I32))?;
    assert_eq!(as_int.dtype(), Some(DType::I32));
    assert_eq!(as_int.to_host().map(|h| h.data_i32().to_vec()), Some(vec![-1, -2]));
    Ok(())
}

#[test]
#[should_panic(expected = "cannot materialize a lazy tensor into lazy device")]
fn host_copy_to_lazy_device_is_fatal() {
    let lt = get_lazy_tensor(&lazy(vec![1.0]));
    let options = TensorOptions::new().device(FrontendDevice::lazy(Some(0)));
    let _ = lazy_to_host_tensor(lt, &options);
}

#[test]
fn create_lazy_tensors_rebinds_defined_entries() {
    let device = device();
    let inputs = vec![dense(vec![1.0]), Tensor::default()];
    let rebound = create_lazy_tensors(&inputs, Some(&device));
    assert!(rebound[0].is_lazy());
    assert!(!rebound[1].is_defined());
    assert_eq!(rebound[0].device(), Some(FrontendDevice::lazy(Some(0))));

    let untouched = create_lazy_tensors(&inputs, None);
    assert!(untouched[0].same_handle(&inputs[0]));
}

#[test]
fn interop_views_are_lazy_backed() {
    let lt = get_lazy_tensor(&lazy(vec![1.0]));
    let view = interop_view_from_lazy(lt.clone());
    assert!(is_interop_view(&view));
    assert!(is_lazy_tensor(&view));
    assert_eq!(get_lazy_tensor(&view), lt);
    assert!(!is_interop_view(&tensor_from_lazy(lt)));
    assert!(!interop_view_from_lazy(LazyTensor::default()).is_defined());
}
