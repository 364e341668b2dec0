//! Enumerates the logical element types understood by the lazy runtime.

use serde::{Deserialize, Serialize};

/// Logical dtype identifier shared between host tensors and backend data handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    /// 32-bit floating point following IEEE-754 semantics.
    F32,
    /// 16-bit floating point (fp16).
    F16,
    /// 16-bit bfloat16 precision as used by many accelerators.
    BF16,
    /// 32-bit signed integer.
    I32,
}

impl DType {
    /// Returns the number of bytes required per scalar element.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::F32 | DType::I32 => 4,
            DType::F16 | DType::BF16 => 2,
        }
    }

    /// Returns `true` for the floating-point dtypes.
    pub fn is_float(self) -> bool {
        matches!(self, DType::F32 | DType::F16 | DType::BF16)
    }

    /// Rounds an `f32` value to the precision representable by this dtype.
    pub fn round_f32(self, value: f32) -> f32 {
        match self {
            DType::F32 => value,
            DType::F16 => half::f16::from_f32(value).to_f32(),
            DType::BF16 => half::bf16::from_f32(value).to_f32(),
            DType::I32 => value.trunc(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduced_precision_rounding_loses_mantissa_bits() {
        let value = 1.000_1_f32;
        assert_eq!(DType::F32.round_f32(value), value);
        assert_eq!(DType::F16.round_f32(value), 1.0);
        assert_eq!(DType::BF16.round_f32(value), 1.0);
        assert_eq!(DType::I32.round_f32(-2.7), -2.0);
    }
}
