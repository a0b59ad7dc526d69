//! Element, tensor and value types of the high-level memory operations.

use std::fmt;

use crate::layout::Layout;
use crate::sir::Ty;

/// Scalar element types a tensor may hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElemType {
    I1,
    I8,
    I16,
    I32,
    I64,
    F16,
    BF16,
    F32,
    F64,
}

impl ElemType {
    pub fn bits(self) -> u32 {
        match self {
            ElemType::I1 => 1,
            ElemType::I8 => 8,
            ElemType::I16 | ElemType::F16 | ElemType::BF16 => 16,
            ElemType::I32 | ElemType::F32 => 32,
            ElemType::I64 | ElemType::F64 => 64,
        }
    }

    /// Bytes occupied in memory; booleans take a full byte.
    pub fn bytes(self) -> u32 {
        self.bits().max(8) / 8
    }

    pub fn is_float(self) -> bool {
        matches!(
            self,
            ElemType::F16 | ElemType::BF16 | ElemType::F32 | ElemType::F64
        )
    }

    /// Register type of one element.
    pub fn ty(self) -> Ty {
        match self {
            ElemType::I1 => Ty::i1(),
            ElemType::I8 => Ty::i8(),
            ElemType::I16 => Ty::i16(),
            ElemType::I32 => Ty::i32(),
            ElemType::I64 => Ty::i64(),
            ElemType::F16 => Ty::F16,
            ElemType::BF16 => Ty::BF16,
            ElemType::F32 => Ty::F32,
            ElemType::F64 => Ty::F64,
        }
    }

    /// Element type as stored in memory: booleans travel as bytes.
    pub fn storage(self) -> ElemType {
        match self {
            ElemType::I1 => ElemType::I8,
            other => other,
        }
    }
}

impl fmt::Display for ElemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ty())
    }
}

/// A ranked tensor distributed over lanes by a layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TensorType {
    pub shape: Vec<u32>,
    pub elem: ElemType,
    pub layout: Layout,
}

impl TensorType {
    pub fn new(shape: Vec<u32>, elem: ElemType, layout: Layout) -> Self {
        Self {
            shape,
            elem,
            layout,
        }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn num_elements(&self) -> u64 {
        self.shape.iter().map(|&d| d as u64).product()
    }

    /// Number of elements each lane holds.
    pub fn elems_per_thread(&self) -> usize {
        self.layout.total_elems_per_thread(&self.shape)
    }
}

impl fmt::Display for TensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.shape.iter().map(|d| d.to_string()).collect();
        write!(f, "tensor<{}x{}, {}>", dims.join("x"), self.elem, self.layout.kind())
    }
}

/// Type of a high-level value: a distributed tensor or a lane-uniform scalar.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValueType {
    Scalar(ElemType),
    Tensor(TensorType),
}

impl ValueType {
    pub fn elem(&self) -> ElemType {
        match self {
            ValueType::Scalar(elem) => *elem,
            ValueType::Tensor(tensor) => tensor.elem,
        }
    }

    pub fn as_tensor(&self) -> Option<&TensorType> {
        match self {
            ValueType::Tensor(tensor) => Some(tensor),
            ValueType::Scalar(_) => None,
        }
    }

    /// Elements each lane holds (1 for scalars).
    pub fn elems_per_thread(&self) -> usize {
        match self {
            ValueType::Scalar(_) => 1,
            ValueType::Tensor(tensor) => tensor.elems_per_thread(),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Scalar(elem) => write!(f, "{}", elem),
            ValueType::Tensor(tensor) => write!(f, "{}", tensor),
        }
    }
}
