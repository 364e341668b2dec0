use std::sync::Arc;

use anyhow::Result;
use ltc_rs::backend::BackendImpl;
use ltc_rs::device::{BackendDeviceType, Device};
use ltc_rs::tensor::{DType, HostTensor, Shape};
use ltc_rs::{LazyGraphExecutor, LazyTensor, RuntimeConfig};
use ltc_rs_backend_ref_cpu::CpuBackend;
use ltc_rs_backend_tests::RecordingBackend;

fn cpu0() -> Device {
    Device::new(BackendDeviceType::Cpu, 0)
}

fn recording(devices: usize) -> (Arc<RecordingBackend<CpuBackend>>, Arc<LazyGraphExecutor>) {
    let backend = Arc::new(RecordingBackend::new(CpuBackend::with_devices(devices)));
    let executor = LazyGraphExecutor::with_cache_capacity(backend.clone(), 8);
    (backend, executor)
}

fn host(values: Vec<f32>) -> Result<HostTensor> {
    let len = values.len();
    HostTensor::from_vec(Shape::new([len]), values)
}

#[test]
fn repeated_graphs_hit_the_compile_cache() -> Result<()> {
    let (backend, executor) = recording(1);
    let device = cpu0();

    let a = LazyTensor::create_in(&executor, host(vec![1.0, 2.0])?, &device);
    let b = LazyTensor::create_in(&executor, host(vec![10.0, 20.0])?, &device);
    let first = executor.get_tensors(&[a.add(&b)?])?;
    assert_eq!(first[0].data(), &[11.0, 22.0]);

    let c = LazyTensor::create_in(&executor, host(vec![-1.0, -2.0])?, &device);
    let d = LazyTensor::create_in(&executor, host(vec![4.0, 8.0])?, &device);
    let second = executor.get_tensors(&[c.add(&d)?])?;
    assert_eq!(second[0].data(), &[3.0, 6.0]);

    let stats = executor.cache_stats();
    assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
    assert_eq!(backend.compile_batches(), vec![1]);
    assert_eq!(backend.lowering_names().len(), 1);
    assert!(backend.lowering_names()[0].starts_with("SyncTensorsGraph."));
    assert_eq!(backend.execute_count(), 2);

    let _ = executor.get_tensors(&[c.mul(&d)?])?;
    assert_eq!(executor.cache_stats().misses, 2);
    executor.clear_cache();
    assert_eq!(executor.cache_stats().entries, 0);
    Ok(())
}

#[test]
fn shared_roots_are_computed_once() -> Result<()> {
    let (backend, executor) = recording(1);
    let device = cpu0();
    let a = LazyTensor::create_in(&executor, host(vec![1.0, -3.0])?, &device);
    let out = a.abs()?;
    let alias = LazyTensor::from_node(&executor, out.ir_node()?, &device);

    let values = executor.get_tensors(&[out.clone(), alias.clone()])?;
    assert_eq!(values[0].data(), &[1.0, 3.0]);
    assert_eq!(values[1].data(), &[1.0, 3.0]);
    assert_eq!(backend.placeholder_count(), 1);
    assert_eq!(backend.execute_count(), 1);

    let out_data = out.current_data().expect("synced tensor holds data");
    let alias_data = alias.current_data().expect("synced tensor holds data");
    assert_eq!(out_data.handle_id(), alias_data.handle_id());

    backend.reset();
    executor.sync_tensors(&[out, alias])?;
    assert_eq!(backend.execute_count(), 0);
    Ok(())
}

#[test]
fn one_placeholder_per_root() -> Result<()> {
    let (backend, executor) = recording(1);
    let device = cpu0();
    let a = LazyTensor::create_in(&executor, host(vec![2.0, 4.0])?, &device);
    let roots = [a.neg()?, a.exp()?, a.relu()?];
    executor.sync_tensors(&roots)?;
    assert_eq!(backend.placeholder_count(), 3);
    assert_eq!(backend.executed_argument_counts(), vec![1]);
    Ok(())
}

#[test]
fn repeated_operands_share_one_parameter() -> Result<()> {
    let (backend, executor) = recording(1);
    let device = cpu0();
    let a = LazyTensor::create_in(&executor, host(vec![1.5, -2.0])?, &device);
    let doubled = a.add(&a)?;
    let values = executor.get_tensors(&[doubled])?;
    assert_eq!(values[0].data(), &[3.0, -4.0]);
    assert_eq!(backend.executed_argument_counts(), vec![1]);
    assert_eq!(backend.upload_count(), 1);
    Ok(())
}

#[test]
fn roots_are_grouped_by_device() -> Result<()> {
    let (backend, executor) = recording(2);
    let cpu1 = Device::new(BackendDeviceType::Cpu, 1);
    let on0 = LazyTensor::full_in(&executor, Shape::new([2]), DType::F32, 1.0, &cpu0());
    let on1 = LazyTensor::full_in(&executor, Shape::new([2]), DType::F32, 2.0, &cpu1);
    let also_on0 = LazyTensor::full_in(&executor, Shape::new([1]), DType::F32, 3.0, &cpu0());

    let values = executor.get_tensors(&[on0.clone(), on1.clone(), also_on0])?;
    assert_eq!(values[0].data(), &[1.0, 1.0]);
    assert_eq!(values[1].data(), &[2.0, 2.0]);
    assert_eq!(values[2].data(), &[3.0]);
    assert_eq!(backend.execute_count(), 2);
    assert_eq!(on1.current_data().map(|d| d.device()), Some(cpu1));
    assert_eq!(on0.current_data().map(|d| d.device()), Some(cpu0()));
    Ok(())
}

#[test]
fn reduced_precision_reads_back_under_logical_dtype() -> Result<()> {
    let (_backend, executor) = recording(1);
    let value = 0.1_f32;
    let filled = LazyTensor::full_in(&executor, Shape::new([3]), DType::F16, value, &cpu0());
    let doubled = filled.add(&filled)?;
    let host = doubled.to_tensor(true)?;
    assert_eq!(host.dtype(), DType::F16);
    let expected = half::f16::from_f32(value).to_f32() * 2.0;
    assert_eq!(host.to_f32_vec(), vec![expected; 3]);

    let as_i32 = filled.cast(DType::I32)?.to_tensor(true)?;
    assert_eq!(as_i32.data_i32(), &[0, 0, 0]);
    Ok(())
}

#[test]
fn cached_reads_skip_the_backend() -> Result<()> {
    let (backend, executor) = recording(1);
    let a = LazyTensor::create_in(&executor, host(vec![1.0, 2.0])?, &cpu0());
    let out = a.neg()?;

    let first = out.to_tensor(false)?;
    let readbacks = backend.readback_count();
    let second = out.to_tensor(false)?;
    assert_eq!(first, second);
    assert_eq!(backend.readback_count(), readbacks);

    out.set_tensor(host(vec![7.0, 8.0])?)?;
    assert_eq!(out.generation(), 1);
    assert_eq!(out.to_tensor(false)?.data(), &[7.0, 8.0]);
    Ok(())
}

#[test]
fn detached_reads_are_not_cached() -> Result<()> {
    let (backend, executor) = recording(1);
    let a = LazyTensor::create_in(&executor, host(vec![1.0, 2.0])?, &cpu0());
    let out = a.neg()?;
    out.to_tensor(true)?;
    out.to_tensor(true)?;
    assert_eq!(backend.readback_count(), 2);
    Ok(())
}

#[test]
fn seeded_uniform_samples_repeat() -> Result<()> {
    let (backend, executor) = recording(1);
    let config = RuntimeConfig {
        rng_seed: Some(42),
        ..RuntimeConfig::default()
    };

    config.apply(backend.as_ref());
    let first = LazyTensor::uniform_in(&executor, Shape::new([4]), DType::F32, -1.0, 1.0, &cpu0())?
        .to_tensor(true)?;
    config.apply(backend.as_ref());
    let second = LazyTensor::uniform_in(&executor, Shape::new([4]), DType::F32, -1.0, 1.0, &cpu0())?
        .to_tensor(true)?;

    assert_eq!(first, second);
    assert!(first.data().iter().all(|v| (-1.0..1.0).contains(v)));
    assert_eq!(backend.rng_seeds(), vec![42, 42]);
    Ok(())
}

#[test]
fn invalid_operations_are_recoverable_errors() -> Result<()> {
    let (_backend, executor) = recording(2);
    let a = LazyTensor::create_in(&executor, host(vec![1.0, 2.0])?, &cpu0());
    let b = LazyTensor::create_in(&executor, host(vec![1.0, 2.0, 3.0])?, &cpu0());
    assert!(a.add(&b).is_err());

    let cpu1 = Device::new(BackendDeviceType::Cpu, 1);
    let other = LazyTensor::create_in(&executor, host(vec![1.0, 2.0])?, &cpu1);
    assert!(a.add(&other).is_err());

    let ints = LazyTensor::create_in(
        &executor,
        HostTensor::from_i32(Shape::new([2]), vec![1, 2])?,
        &cpu0(),
    );
    assert!(a.add(&ints).is_err());
    assert!(ints.exp().is_err());
    let empty_range =
        LazyTensor::uniform_in(&executor, Shape::new([2]), DType::F32, 1.0, 1.0, &cpu0());
    assert!(empty_range.is_err());
    assert!(LazyTensor::default().neg().is_err());
    Ok(())
}

#[test]
fn scalar_operands_broadcast() -> Result<()> {
    let (_backend, executor) = recording(1);
    let a = LazyTensor::create_in(&executor, host(vec![1.0, 2.0, 3.0])?, &cpu0());
    let two = LazyTensor::create_in(&executor, HostTensor::scalar(2.0), &cpu0());
    assert_eq!(a.mul(&two)?.to_tensor(true)?.data(), &[2.0, 4.0, 6.0]);
    assert_eq!(two.sub(&a)?.to_tensor(true)?.data(), &[1.0, 0.0, -1.0]);
    Ok(())
}

#[test]
#[should_panic(expected = "owned by a different graph executor")]
fn mixing_executors_is_fatal() {
    let (_b1, first) = recording(1);
    let (_b2, second) = recording(1);
    let a = LazyTensor::full_in(&first, Shape::new([1]), DType::F32, 1.0, &cpu0());
    let b = LazyTensor::full_in(&second, Shape::new([1]), DType::F32, 1.0, &cpu0());
    let _ = a.add(&b);
}

#[test]
fn executor_backend_is_the_one_it_was_built_with() {
    let backend: Arc<dyn BackendImpl> = Arc::new(CpuBackend::new());
    let executor = RuntimeConfig::default().build_executor(Arc::clone(&backend));
    assert!(Arc::ptr_eq(executor.backend(), &backend));
}
