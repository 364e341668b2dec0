//! Behaviour every `BackendImpl` must show, independent of its hardware.

use std::sync::Arc;

use anyhow::{anyhow, ensure, Result};
use ltc_rs::backend::{BackendImpl, ComputationPtr, TensorSpec};
use ltc_rs::device::{default_device, Device};
use ltc_rs::ir::{compute_post_order, BinaryOp, EmissionMap, Node, NodePtr, OpKind, UnaryOp};
use ltc_rs::tensor::{DType, HostTensor, Shape};
use ltc_rs::{LazyGraphExecutor, LazyTensor};

fn host(dims: &[usize], values: Vec<f32>) -> Result<HostTensor> {
    HostTensor::from_vec(Shape::from(dims), values)
}

fn upload(backend: &Arc<dyn BackendImpl>, tensor: &HostTensor) -> Result<NodePtr> {
    let device = default_device(backend.as_ref());
    let data = backend.make_computation_data_from_tensor(tensor, tensor.shape(), &device)?;
    Ok(Node::device_data(data))
}

/// Lowers `roots` into a single uncompiled computation.
fn lower(backend: &Arc<dyn BackendImpl>, name: &str, roots: &[NodePtr]) -> Result<ComputationPtr> {
    let device = default_device(backend.as_ref());
    let mut emit_status = EmissionMap::new();
    let post_order = compute_post_order(roots, &mut emit_status);
    let mut context = backend.create_lowering_context(name, &device, &post_order, &emit_status)?;
    for root in roots {
        context.add_result(root)?;
    }
    Ok(context.build()?)
}

fn compile_one(
    backend: &Arc<dyn BackendImpl>,
    computation: ComputationPtr,
) -> Result<ComputationPtr> {
    backend
        .compile(vec![computation])?
        .pop()
        .ok_or_else(|| anyhow!("compile returned no computation"))
}

pub fn data_round_trip(backend: &Arc<dyn BackendImpl>) -> Result<()> {
    let device = default_device(backend.as_ref());
    let tensor = host(&[2, 3], vec![1.0, -2.0, 3.5, 0.0, 5.25, -6.0])?;
    let data = backend.make_computation_data_from_tensor(&tensor, tensor.shape(), &device)?;
    ensure!(data.has_value(), "uploaded data must hold a value");
    ensure!(data.device() == device, "uploaded data lives on {}", data.device());
    ensure!(data.spec() == TensorSpec::new(DType::F32, Shape::new([2, 3])));
    let back = backend.make_tensor_from_computation_data(&data, None)?;
    ensure!(back == tensor, "round trip changed the tensor: {back:?}");

    let half =
        HostTensor::from_f32_with_dtype(Shape::new([2]), DType::F16, vec![0.5, 1.0009765625])?;
    let data = backend.make_computation_data_from_tensor(&half, half.shape(), &device)?;
    let back = backend.make_tensor_from_computation_data(&data, Some(DType::F16))?;
    ensure!(back.dtype() == DType::F16, "logical dtype override ignored");
    ensure!(back.to_f32_vec() == half.to_f32_vec());

    let ints = HostTensor::from_i32(Shape::new([3]), vec![7, -8, 9])?;
    let data = backend.make_computation_data_from_tensor(&ints, ints.shape(), &device)?;
    let back = backend.make_tensor_from_computation_data(&data, None)?;
    ensure!(back.data_i32() == &[7, -8, 9]);
    Ok(())
}

pub fn placeholders_take_assigned_values(backend: &Arc<dyn BackendImpl>) -> Result<()> {
    let device = default_device(backend.as_ref());
    let spec = TensorSpec::new(DType::F32, Shape::new([2]));
    let placeholder = backend.create_data_placeholder(&device, &spec)?;
    ensure!(!placeholder.has_value(), "fresh placeholder must be empty");
    ensure!(placeholder.spec() == spec);
    ensure!(
        backend
            .make_tensor_from_computation_data(&placeholder, None)
            .is_err(),
        "reading an empty placeholder must fail"
    );

    let tensor = host(&[2], vec![4.0, 5.0])?;
    let data = backend.make_computation_data_from_tensor(&tensor, tensor.shape(), &device)?;
    placeholder.assign(&data)?;
    ensure!(placeholder.has_value());
    let back = backend.make_tensor_from_computation_data(&placeholder, None)?;
    ensure!(back.data() == &[4.0, 5.0]);
    Ok(())
}

pub fn compile_is_one_to_one(backend: &Arc<dyn BackendImpl>) -> Result<()> {
    let a = upload(backend, &host(&[2], vec![1.0, 2.0])?)?;
    let spec = a.spec().clone();
    let neg = Node::new(OpKind::Unary(UnaryOp::Neg), vec![a.clone()], spec.clone());
    let add = Node::new(OpKind::Binary(BinaryOp::Add), vec![a.clone(), a], spec);
    let first = lower(backend, "first", &[neg])?;
    let second = lower(backend, "second", &[add])?;

    let compiled = backend.compile(vec![first, second])?;
    ensure!(compiled.len() == 2, "compile returned {} computations", compiled.len());
    ensure!(compiled[0].name() == "first" && compiled[1].name() == "second");
    ensure!(compiled.iter().all(|c| c.is_compiled()));
    Ok(())
}

pub fn execute_honours_arity(backend: &Arc<dyn BackendImpl>) -> Result<()> {
    let device = default_device(backend.as_ref());
    let lhs = upload(backend, &host(&[3], vec![1.0, 2.0, 3.0])?)?;
    let rhs = upload(backend, &host(&[3], vec![10.0, 20.0, 30.0])?)?;
    let spec = lhs.spec().clone();
    let sum = Node::new(
        OpKind::Binary(BinaryOp::Add),
        vec![lhs.clone(), rhs.clone()],
        spec.clone(),
    );
    let product = Node::new(OpKind::Binary(BinaryOp::Mul), vec![lhs.clone(), rhs.clone()], spec);
    let computation = compile_one(backend, lower(backend, "arity", &[sum, product])?)?;
    ensure!(computation.parameter_specs().len() == 2);
    ensure!(computation.result_specs().len() == 2);

    let arguments = vec![
        lhs.data().ok_or_else(|| anyhow!("lhs not ready"))?,
        rhs.data().ok_or_else(|| anyhow!("rhs not ready"))?,
    ];
    ensure!(
        backend
            .execute_computation(computation.as_ref(), &arguments[..1], &device)
            .is_err(),
        "short argument list must be rejected"
    );
    let outputs = backend.execute_computation(computation.as_ref(), &arguments, &device)?;
    ensure!(outputs.len() == 2, "expected 2 outputs, got {}", outputs.len());
    let sum = backend.make_tensor_from_computation_data(&outputs[0], None)?;
    let product = backend.make_tensor_from_computation_data(&outputs[1], None)?;
    ensure!(sum.data() == &[11.0, 22.0, 33.0]);
    ensure!(product.data() == &[10.0, 40.0, 90.0]);
    Ok(())
}

pub fn lowering_dedups_parameters(backend: &Arc<dyn BackendImpl>) -> Result<()> {
    let device = default_device(backend.as_ref());
    let data = backend.make_computation_data_from_tensor(
        &host(&[2], vec![1.0, 2.0])?,
        &Shape::new([2]),
        &device,
    )?;
    let first = Node::device_data(Arc::clone(&data));
    let second = Node::device_data(data);
    let spec = first.spec().clone();
    let add = Node::new(OpKind::Binary(BinaryOp::Add), vec![first, second], spec);

    let mut context = backend.create_empty_lowering_context("dedup", &device)?;
    context.lower_node(&add)?;
    context.lower_node(&add)?;
    ensure!(context.add_result(&add)? == 0);
    ensure!(context.parameter_data().len() == 1, "aliased parameters must collapse");
    Ok(())
}

pub fn topology_is_consistent(backend: &Arc<dyn BackendImpl>) -> Result<()> {
    let default = backend.get_default_device();
    let device = Device::parse_backend_string(&default)
        .ok_or_else(|| anyhow!("default device '{default}' is malformed"))?;
    ensure!(device.device_type() == backend.get_default_device_type());
    ensure!(backend.get_num_devices() >= 1);
    let all = backend.get_all_devices();
    ensure!(all.len() == backend.get_num_devices(), "device count mismatch: {all:?}");
    ensure!(all.contains(&default), "default device missing from {all:?}");
    ensure!(backend.get_local_devices().iter().all(|d| all.contains(d)));
    ensure!(backend.get_compilation_devices(&default, &[]) == vec![default.clone()]);
    let replicas = vec![default.clone(), default.clone()];
    ensure!(backend.get_compilation_devices(&default, &replicas) == replicas);
    Ok(())
}

pub fn prepare_to_exit_keeps_topology(backend: &Arc<dyn BackendImpl>) -> Result<()> {
    let default = backend.get_default_device();
    let all = backend.get_all_devices();
    backend.prepare_to_exit();
    ensure!(backend.get_default_device() == default, "default device changed on exit");
    ensure!(backend.get_all_devices() == all, "device list changed on exit");
    ensure!(backend.get_num_devices() == all.len());
    let device = default_device(backend.as_ref());
    ensure!(backend.get_default_device_type() == device.device_type());
    Ok(())
}

pub fn replication_devices_round_trip(backend: &Arc<dyn BackendImpl>) -> Result<()> {
    backend.set_replication_devices(None);
    ensure!(backend.get_replication_devices().is_none());
    let devices = Arc::new(backend.get_all_devices());
    backend.set_replication_devices(Some(Arc::clone(&devices)));
    ensure!(backend.get_replication_devices().as_deref() == Some(&*devices));
    backend.set_replication_devices(None);
    ensure!(backend.get_replication_devices().is_none());
    Ok(())
}

pub fn rng_seed_is_deterministic(backend: &Arc<dyn BackendImpl>) -> Result<()> {
    let executor = LazyGraphExecutor::new(Arc::clone(backend));
    let device = default_device(backend.as_ref());
    let sample = || -> Result<Vec<f32>> {
        let shape = Shape::new([16]);
        let tensor = LazyTensor::uniform_in(&executor, shape, DType::F32, -2.0, 2.0, &device)?;
        Ok(tensor.to_tensor(true)?.to_f32_vec())
    };
    backend.set_rng_seed(1234);
    let first = sample()?;
    backend.set_rng_seed(1234);
    let second = sample()?;
    ensure!(first == second, "same seed produced different samples");
    ensure!(first.iter().all(|v| (-2.0..2.0).contains(v)));
    Ok(())
}

pub fn backend_text_names_computation(backend: &Arc<dyn BackendImpl>) -> Result<()> {
    let a = upload(backend, &host(&[2], vec![1.0, 2.0])?)?;
    let spec = a.spec().clone();
    let exp = Node::new(OpKind::Unary(UnaryOp::Exp), vec![a], spec);
    let computation = compile_one(backend, lower(backend, "text_dump", &[exp])?)?;
    let text = backend.get_computation_backend_text(&computation)?;
    ensure!(text.contains("text_dump"), "backend text lacks the computation name:\n{text}");
    Ok(())
}

pub fn executor_materializes_graphs(backend: &Arc<dyn BackendImpl>) -> Result<()> {
    let executor = LazyGraphExecutor::new(Arc::clone(backend));
    let device = default_device(backend.as_ref());
    let a = LazyTensor::create_in(&executor, host(&[2, 2], vec![1.0, -2.0, 3.0, -4.0])?, &device);
    let b = LazyTensor::create_in(&executor, host(&[2, 2], vec![0.5, 0.5, 0.5, 0.5])?, &device);
    let out = a.add(&b)?.relu()?.mul(&a)?;
    let values = executor.get_tensors(&[out])?;
    ensure!(values[0].data() == &[1.5, 0.0, 10.5, 0.0], "got {:?}", values[0].data());
    Ok(())
}
