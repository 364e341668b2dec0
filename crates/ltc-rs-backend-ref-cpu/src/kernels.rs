//! Element-wise kernels used by the CPU interpreter.

use std::sync::Arc;

use ltc_rs::backend::{BackendError, BackendResult, TensorSpec};
use ltc_rs::ir::{BinaryOp, UnaryOp};
use ltc_rs::tensor::DType;
use rand::rngs::StdRng;
use rand::Rng;

use crate::cpu::CpuBuffer;

pub(crate) fn f32_to_i32_trunc_saturating(value: f32) -> i32 {
    if value.is_nan() {
        return 0;
    }
    let truncated = value.trunc();
    if truncated > i32::MAX as f32 {
        i32::MAX
    } else if truncated < i32::MIN as f32 {
        i32::MIN
    } else {
        truncated as i32
    }
}

fn rounded(values: Vec<f32>, dtype: DType) -> CpuBuffer {
    match dtype {
        DType::F32 => CpuBuffer::F32(Arc::from(values)),
        DType::I32 => CpuBuffer::I32(
            values
                .into_iter()
                .map(f32_to_i32_trunc_saturating)
                .collect(),
        ),
        _ => CpuBuffer::F32(values.into_iter().map(|v| dtype.round_f32(v)).collect()),
    }
}

pub(crate) fn fill(spec: &TensorSpec, value: f32) -> CpuBuffer {
    rounded(vec![value; spec.num_elements()], spec.dtype)
}

pub(crate) fn unary(op: UnaryOp, input: &CpuBuffer, dtype: DType) -> BackendResult<CpuBuffer> {
    match input {
        CpuBuffer::F32(values) => {
            let result: Vec<f32> = match op {
                UnaryOp::Neg => values.iter().map(|&x| -x).collect(),
                UnaryOp::Exp => values.iter().map(|&x| x.exp()).collect(),
                UnaryOp::Relu => values.iter().map(|&x| x.max(0.0)).collect(),
                UnaryOp::Abs => values.iter().map(|&x| x.abs()).collect(),
            };
            Ok(rounded(result, dtype))
        }
        CpuBuffer::I32(values) => {
            let result: Arc<[i32]> = match op {
                UnaryOp::Neg => values.iter().map(|&x| x.wrapping_neg()).collect(),
                UnaryOp::Relu => values.iter().map(|&x| x.max(0)).collect(),
                UnaryOp::Abs => values.iter().map(|&x| x.wrapping_abs()).collect(),
                UnaryOp::Exp => {
                    return Err(BackendError::unimplemented(
                        "exp",
                        "integer tensors are not supported",
                    ))
                }
            };
            Ok(CpuBuffer::I32(result))
        }
    }
}

/// Index into an operand that is either full-size or a broadcast scalar.
fn at<T: Copy>(values: &[T], index: usize) -> T {
    if values.len() == 1 {
        values[0]
    } else {
        values[index]
    }
}

fn check_operand(len: usize, expected: usize) -> BackendResult<()> {
    if len == expected || len == 1 {
        Ok(())
    } else {
        Err(BackendError::execution(format!(
            "elementwise size mismatch: operand has {len} elements, output has {expected}"
        )))
    }
}

pub(crate) fn binary(
    op: BinaryOp,
    lhs: &CpuBuffer,
    rhs: &CpuBuffer,
    output: &TensorSpec,
) -> BackendResult<CpuBuffer> {
    let len = output.num_elements();
    check_operand(lhs.len(), len)?;
    check_operand(rhs.len(), len)?;
    match (lhs, rhs) {
        (CpuBuffer::F32(a), CpuBuffer::F32(b)) => {
            let result = (0..len)
                .map(|i| {
                    let (x, y) = (at(a, i), at(b, i));
                    match op {
                        BinaryOp::Add => x + y,
                        BinaryOp::Sub => x - y,
                        BinaryOp::Mul => x * y,
                        BinaryOp::Div => x / y,
                        BinaryOp::Max => x.max(y),
                    }
                })
                .collect();
            Ok(rounded(result, output.dtype))
        }
        (CpuBuffer::I32(a), CpuBuffer::I32(b)) => {
            let result = (0..len)
                .map(|i| {
                    let (x, y) = (at(a, i), at(b, i));
                    match op {
                        BinaryOp::Add => Ok(x.wrapping_add(y)),
                        BinaryOp::Sub => Ok(x.wrapping_sub(y)),
                        BinaryOp::Mul => Ok(x.wrapping_mul(y)),
                        BinaryOp::Div => x
                            .checked_div(y)
                            .ok_or_else(|| BackendError::execution("integer division by zero")),
                        BinaryOp::Max => Ok(x.max(y)),
                    }
                })
                .collect::<BackendResult<Arc<[i32]>>>()?;
            Ok(CpuBuffer::I32(result))
        }
        _ => Err(BackendError::execution(
            "elementwise binary operands have different storage types",
        )),
    }
}

pub(crate) fn cast(input: &CpuBuffer, dtype: DType) -> CpuBuffer {
    match input {
        CpuBuffer::F32(values) => rounded(values.to_vec(), dtype),
        CpuBuffer::I32(values) if dtype == DType::I32 => CpuBuffer::I32(values.clone()),
        CpuBuffer::I32(values) => rounded(values.iter().map(|&v| v as f32).collect(), dtype),
    }
}

pub(crate) fn uniform(
    rng: &mut StdRng,
    spec: &TensorSpec,
    low: f32,
    high: f32,
) -> BackendResult<CpuBuffer> {
    if low.is_nan() || high.is_nan() || low >= high {
        return Err(BackendError::invalid_argument(format!(
            "uniform range [{low}, {high}) is empty"
        )));
    }
    let values = (0..spec.num_elements())
        .map(|_| rng.gen_range(low..high))
        .collect();
    Ok(rounded(values, spec.dtype))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ltc_rs::tensor::Shape;

    fn spec(dtype: DType, len: usize) -> TensorSpec {
        TensorSpec::new(dtype, Shape::new([len]))
    }

    #[test]
    fn binary_broadcasts_scalars() {
        let lhs = CpuBuffer::F32(Arc::from(vec![1.0, 2.0, 3.0]));
        let rhs = CpuBuffer::F32(Arc::from(vec![10.0]));
        let out = binary(BinaryOp::Mul, &lhs, &rhs, &spec(DType::F32, 3)).unwrap();
        assert_eq!(out, CpuBuffer::F32(Arc::from(vec![10.0, 20.0, 30.0])));
    }

    #[test]
    fn integer_division_by_zero_is_an_error() {
        let lhs = CpuBuffer::I32(Arc::from(vec![4, 2]));
        let rhs = CpuBuffer::I32(Arc::from(vec![2, 0]));
        let err = binary(BinaryOp::Div, &lhs, &rhs, &spec(DType::I32, 2)).unwrap_err();
        assert!(err.to_string().contains("division by zero"));
    }

    #[test]
    fn casts_saturate_and_round() {
        let input = CpuBuffer::F32(Arc::from(vec![f32::NAN, 3.9, -1.0e12]));
        assert_eq!(
            cast(&input, DType::I32),
            CpuBuffer::I32(Arc::from(vec![0, 3, i32::MIN]))
        );
        let fine = CpuBuffer::F32(Arc::from(vec![1.000_1]));
        assert_eq!(cast(&fine, DType::BF16), CpuBuffer::F32(Arc::from(vec![1.0])));
    }

    #[test]
    fn uniform_stays_in_range() {
        use rand::SeedableRng;
        let mut rng = StdRng::seed_from_u64(7);
        let CpuBuffer::F32(values) = uniform(&mut rng, &spec(DType::F32, 64), -1.0, 1.0).unwrap()
        else {
            panic!("uniform produced integer storage");
        };
        assert!(values.iter().all(|v| (-1.0..1.0).contains(v)));
    }
}
