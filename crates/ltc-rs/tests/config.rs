use std::sync::Arc;

use anyhow::Result;
use ltc_rs::backend::BackendImpl;
use ltc_rs::device::default_device;
use ltc_rs::tensor::{DType, Shape};
use ltc_rs::{LazyTensor, RuntimeConfig};
use ltc_rs_backend_ref_cpu::CpuBackend;
use ltc_rs_backend_tests::RecordingBackend;

#[test]
fn json_fields_default_when_absent() -> Result<()> {
    let config = RuntimeConfig::from_json_str(r#"{ "rng_seed": 7 }"#)?;
    assert_eq!(config.rng_seed, Some(7));
    assert_eq!(config.compile_cache_capacity, RuntimeConfig::default().compile_cache_capacity);
    assert!(config.replication_devices.is_empty());

    let text = config.to_json_string()?;
    assert_eq!(RuntimeConfig::from_json_str(&text)?, config);
    Ok(())
}

#[test]
fn malformed_json_is_an_error() {
    let err = RuntimeConfig::from_json_str("{ \"rng_seed\": \"seven\" }").unwrap_err();
    assert!(err.to_string().contains("failed to parse runtime config"));
}

#[test]
fn apply_pushes_seed_and_replication_devices() -> Result<()> {
    let backend = RecordingBackend::new(CpuBackend::with_devices(2));
    let config = RuntimeConfig::from_json_str(
        r#"{ "replication_devices": ["CPU:0", "bogus", "CPU:1", "CPU:-3"], "rng_seed": 11 }"#,
    )?;
    config.apply(&backend);

    assert_eq!(backend.rng_seeds(), vec![11]);
    let devices = backend.get_replication_devices().expect("devices were configured");
    assert_eq!(devices.as_slice(), ["CPU:0".to_string(), "CPU:1".to_string()]);
    Ok(())
}

#[test]
fn empty_replication_list_clears_the_backend() {
    let backend = RecordingBackend::new(CpuBackend::new());
    let config = RuntimeConfig {
        replication_devices: vec!["CPU:0".to_string()],
        ..RuntimeConfig::default()
    };
    config.apply(&backend);
    assert!(backend.get_replication_devices().is_some());

    RuntimeConfig::default().apply(&backend);
    assert!(backend.get_replication_devices().is_none());
    assert!(backend.rng_seeds().is_empty());
}

#[test]
fn zero_capacity_is_clamped_to_one_entry() -> Result<()> {
    let config = RuntimeConfig {
        compile_cache_capacity: 0,
        ..RuntimeConfig::default()
    };
    let backend = CpuBackend::new();
    let device = default_device(&backend);
    let executor = config.build_executor(Arc::new(backend));
    let filled = LazyTensor::full_in(&executor, Shape::new([2]), DType::F32, 1.0, &device);
    executor.sync_tensors(&[filled])?;
    assert_eq!(executor.cache_stats().entries, 1);
    Ok(())
}
