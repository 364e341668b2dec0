//! Host-backed tensor used as the concrete value of materialized lazy tensors.

use anyhow::{bail, Result};

use super::{dtype::DType, shape::Shape};

/// Physical payload of a [`HostTensor`]. Reduced-precision floats are kept as rounded `f32`.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F32(Vec<f32>),
    I32(Vec<i32>),
}

impl TensorData {
    fn len(&self) -> usize {
        match self {
            TensorData::F32(values) => values.len(),
            TensorData::I32(values) => values.len(),
        }
    }
}

/// Simple host-resident tensor. Cloning deep-copies the buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct HostTensor {
    shape: Shape,
    dtype: DType,
    data: TensorData,
}

impl HostTensor {
    /// Constructs an `F32` tensor from raw values, validating the length against the shape.
    pub fn from_vec(shape: Shape, data: Vec<f32>) -> Result<Self> {
        Self::from_f32_with_dtype(shape, DType::F32, data)
    }

    /// Constructs a float tensor of the given logical dtype, rounding values to its precision.
    pub fn from_f32_with_dtype(shape: Shape, dtype: DType, data: Vec<f32>) -> Result<Self> {
        if data.len() != shape.num_elements() {
            bail!(
                "tensor data length ({}) does not match shape {:?}",
                data.len(),
                shape.dims()
            );
        }
        if dtype == DType::I32 {
            return Ok(HostTensor {
                shape,
                dtype,
                data: TensorData::I32(data.into_iter().map(|v| v as i32).collect()),
            });
        }
        let data = if dtype == DType::F32 {
            data
        } else {
            data.into_iter().map(|v| dtype.round_f32(v)).collect()
        };
        Ok(HostTensor {
            shape,
            dtype,
            data: TensorData::F32(data),
        })
    }

    /// Constructs an `I32` tensor, ensuring the payload matches the expected element count.
    pub fn from_i32(shape: Shape, data: Vec<i32>) -> Result<Self> {
        if data.len() != shape.num_elements() {
            bail!(
                "tensor data length ({}) does not match shape {:?}",
                data.len(),
                shape.dims()
            );
        }
        Ok(HostTensor {
            shape,
            dtype: DType::I32,
            data: TensorData::I32(data),
        })
    }

    /// Rank-zero `F32` tensor holding a single value.
    pub fn scalar(value: f32) -> Self {
        HostTensor {
            shape: Shape::scalar(),
            dtype: DType::F32,
            data: TensorData::F32(vec![value]),
        }
    }

    /// Returns a zero-initialized tensor of the requested shape and dtype.
    pub fn zeros(shape: Shape, dtype: DType) -> Self {
        let len = shape.num_elements();
        let data = match dtype {
            DType::I32 => TensorData::I32(vec![0; len]),
            _ => TensorData::F32(vec![0.0; len]),
        };
        HostTensor { shape, dtype, data }
    }

    /// Returns the total number of elements stored in the tensor.
    pub fn len(&self) -> usize {
        self.shape.num_elements()
    }

    /// Reports whether the tensor contains zero elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Borrows the physical payload.
    pub fn payload(&self) -> &TensorData {
        &self.data
    }

    /// Borrows the float data slice, panicking if the dtype is integral.
    pub fn data(&self) -> &[f32] {
        match &self.data {
            TensorData::F32(values) => values,
            TensorData::I32(_) => panic!("tensor data is not stored as f32"),
        }
    }

    /// Mutably borrows the float data slice, panicking if the dtype is integral.
    pub fn data_mut(&mut self) -> &mut [f32] {
        match &mut self.data {
            TensorData::F32(values) => values,
            TensorData::I32(_) => panic!("tensor data is not stored as mutable f32"),
        }
    }

    /// Borrows the underlying `i32` data slice, panicking if the dtype differs.
    pub fn data_i32(&self) -> &[i32] {
        match &self.data {
            TensorData::I32(values) => values,
            TensorData::F32(_) => panic!("tensor data is not stored as i32"),
        }
    }

    /// Copies every element out as `f32` regardless of the physical payload.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        match &self.data {
            TensorData::F32(values) => values.clone(),
            TensorData::I32(values) => values.iter().map(|&v| v as f32).collect(),
        }
    }

    /// Converts the tensor to another logical dtype, always producing a fresh buffer.
    pub fn cast(&self, dtype: DType) -> HostTensor {
        if dtype == self.dtype {
            return self.clone();
        }
        let data = match dtype {
            DType::I32 => TensorData::I32(match &self.data {
                TensorData::F32(values) => values.iter().map(|&v| v as i32).collect(),
                TensorData::I32(values) => values.clone(),
            }),
            _ => TensorData::F32(
                self.to_f32_vec()
                    .into_iter()
                    .map(|v| dtype.round_f32(v))
                    .collect(),
            ),
        };
        HostTensor {
            shape: self.shape.clone(),
            dtype,
            data,
        }
    }

    /// Resizes `self` to the shape of `source` and copies its contents, keeping `self`'s dtype.
    pub fn resize_as_and_copy(&mut self, source: &HostTensor) {
        let converted = source.cast(self.dtype);
        debug_assert_eq!(converted.data.len(), converted.shape.num_elements());
        self.shape = converted.shape;
        self.data = converted.data;
    }
}
