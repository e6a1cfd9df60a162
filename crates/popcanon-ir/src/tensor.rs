//! Compile-time tensors.

use half::f16;

use crate::error::IrError;
use crate::types::ElementType;

/// Literal payload of a [`TensorConstant`].
///
/// The variant is chosen from the declared element type, never from the
/// magnitudes of the values.
#[derive(Clone, Debug, PartialEq)]
pub enum TensorData {
    Bool(Vec<bool>),
    U8(Vec<u8>),
    I8(Vec<i8>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F16(Vec<f16>),
    F32(Vec<f32>),
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            Self::Bool(v) => v.len(),
            Self::U8(v) => v.len(),
            Self::I8(v) => v.len(),
            Self::I32(v) => v.len(),
            Self::I64(v) => v.len(),
            Self::F16(v) => v.len(),
            Self::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Name of the payload encoding, for diagnostics.
    pub fn encoding(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::U8(_) => "u8",
            Self::I8(_) => "i8",
            Self::I32(_) => "i32",
            Self::I64(_) => "i64",
            Self::F16(_) => "f16",
            Self::F32(_) => "f32",
        }
    }

    /// Encoding expected for an element type. `HalfOrFloat` is stored as f32
    /// until its precision is resolved.
    fn expected_encoding(elem: ElementType) -> &'static str {
        match elem {
            ElementType::Bool => "bool",
            ElementType::Uint8 => "u8",
            ElementType::Int8 => "i8",
            ElementType::Int32 => "i32",
            ElementType::Int64 => "i64",
            ElementType::Float16 => "f16",
            ElementType::Float32 | ElementType::HalfOrFloat => "f32",
        }
    }

    /// Encode `values` for `elem`.
    pub fn from_f64(elem: ElementType, values: &[f64]) -> Self {
        match elem {
            ElementType::Bool => Self::Bool(values.iter().map(|&v| v != 0.0).collect()),
            ElementType::Uint8 => Self::U8(values.iter().map(|&v| v as u8).collect()),
            ElementType::Int8 => Self::I8(values.iter().map(|&v| v as i8).collect()),
            ElementType::Int32 => Self::I32(values.iter().map(|&v| v as i32).collect()),
            ElementType::Int64 => Self::I64(values.iter().map(|&v| v as i64).collect()),
            ElementType::Float16 => Self::F16(values.iter().map(|&v| f16::from_f64(v)).collect()),
            ElementType::Float32 | ElementType::HalfOrFloat => {
                Self::F32(values.iter().map(|&v| v as f32).collect())
            }
        }
    }

    /// Encode integer `values` for `elem` without a round trip through f64.
    pub fn from_i64(elem: ElementType, values: &[i64]) -> Self {
        match elem {
            ElementType::Int64 => Self::I64(values.to_vec()),
            ElementType::Int32 => Self::I32(values.iter().map(|&v| v as i32).collect()),
            ElementType::Int8 => Self::I8(values.iter().map(|&v| v as i8).collect()),
            ElementType::Uint8 => Self::U8(values.iter().map(|&v| v as u8).collect()),
            ElementType::Bool => Self::Bool(values.iter().map(|&v| v != 0).collect()),
            _ => {
                let floats: Vec<f64> = values.iter().map(|&v| v as f64).collect();
                Self::from_f64(elem, &floats)
            }
        }
    }

    pub fn to_f64_vec(&self) -> Vec<f64> {
        match self {
            Self::Bool(v) => v.iter().map(|&b| if b { 1.0 } else { 0.0 }).collect(),
            Self::U8(v) => v.iter().map(|&x| f64::from(x)).collect(),
            Self::I8(v) => v.iter().map(|&x| f64::from(x)).collect(),
            Self::I32(v) => v.iter().map(|&x| f64::from(x)).collect(),
            Self::I64(v) => v.iter().map(|&x| x as f64).collect(),
            Self::F16(v) => v.iter().map(|x| x.to_f64()).collect(),
            Self::F32(v) => v.iter().map(|&x| f64::from(x)).collect(),
        }
    }

    /// Integer view of the payload; `None` for float payloads.
    pub fn to_i64_vec(&self) -> Option<Vec<i64>> {
        match self {
            Self::Bool(v) => Some(v.iter().map(|&b| i64::from(b)).collect()),
            Self::U8(v) => Some(v.iter().map(|&x| i64::from(x)).collect()),
            Self::I8(v) => Some(v.iter().map(|&x| i64::from(x)).collect()),
            Self::I32(v) => Some(v.iter().map(|&x| i64::from(x)).collect()),
            Self::I64(v) => Some(v.clone()),
            Self::F16(_) | Self::F32(_) => None,
        }
    }
}

/// An immutable compile-time tensor: element type, shape and payload.
#[derive(Clone, Debug, PartialEq)]
pub struct TensorConstant {
    elem: ElementType,
    shape: Vec<usize>,
    data: TensorData,
}

impl TensorConstant {
    /// Builds a constant, checking that the payload encoding matches the
    /// element type and that its length matches the shape.
    pub fn new(elem: ElementType, shape: Vec<usize>, data: TensorData) -> Result<Self, IrError> {
        let expected = TensorData::expected_encoding(elem);
        if data.encoding() != expected {
            return Err(IrError::PayloadMismatch {
                expected: expected.into(),
                found: data.encoding().into(),
            });
        }
        let numel: usize = shape.iter().product();
        if data.len() != numel {
            return Err(IrError::PayloadLength {
                shape,
                len: data.len(),
            });
        }
        Ok(Self { elem, shape, data })
    }

    pub fn from_f64(elem: ElementType, shape: Vec<usize>, values: &[f64]) -> Result<Self, IrError> {
        Self::new(elem, shape, TensorData::from_f64(elem, values))
    }

    pub fn from_i64(elem: ElementType, shape: Vec<usize>, values: &[i64]) -> Result<Self, IrError> {
        Self::new(elem, shape, TensorData::from_i64(elem, values))
    }

    /// A tensor of `shape` filled with `value`.
    pub fn filled(elem: ElementType, shape: Vec<usize>, value: f64) -> Self {
        let numel: usize = shape.iter().product();
        let data = TensorData::from_f64(elem, &vec![value; numel]);
        Self { elem, shape, data }
    }

    /// Rank-0 tensor holding `value`.
    pub fn scalar(elem: ElementType, value: f64) -> Self {
        Self::filled(elem, Vec::new(), value)
    }

    pub fn elem(&self) -> ElementType {
        self.elem
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &TensorData {
        &self.data
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// The same values re-encoded for `elem`.
    pub fn retype(&self, elem: ElementType) -> Self {
        let data = match self.data.to_i64_vec() {
            Some(ints) => TensorData::from_i64(elem, &ints),
            None => TensorData::from_f64(elem, &self.data.to_f64_vec()),
        };
        Self {
            elem,
            shape: self.shape.clone(),
            data,
        }
    }

    /// The same payload viewed with a new shape of equal element count.
    pub fn reshaped(&self, shape: Vec<usize>) -> Result<Self, IrError> {
        Self::new(self.elem, shape, self.data.clone())
    }
}

/// Type and shape of a concrete host tensor handed to the pipeline.
///
/// Only the metadata is read; used to resolve ambiguous input precision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TensorMeta {
    pub elem: ElementType,
    pub shape: Vec<usize>,
}

impl TensorMeta {
    pub fn new(elem: ElementType, shape: &[usize]) -> Self {
        Self {
            elem,
            shape: shape.to_vec(),
        }
    }
}

impl From<&TensorConstant> for TensorMeta {
    fn from(t: &TensorConstant) -> Self {
        Self::new(t.elem(), t.shape())
    }
}
