//! High-level memory operations as they arrive from the surrounding pipeline.
//!
//! Operands are already unpacked: every value carries one register per
//! element the lane owns, in the layout's canonical order. A block pointer
//! carries its seven descriptor registers instead.

use std::fmt;

use crate::layout::LayoutKind;
use crate::sir::{Reg, RmwKind};
use crate::span::Span;
use crate::types::{ElemType, ValueType};

/// Identity of a high-level SSA value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// A high-level value and the per-lane registers holding it.
///
/// `regs` may be left empty when the value is produced by an earlier op of
/// the same `lower_ops` call; the driver fills it in from that op's results.
#[derive(Clone, Debug, PartialEq)]
pub struct Value {
    pub id: ValueId,
    pub ty: ValueType,
    pub regs: Vec<Reg>,
}

impl Value {
    pub fn new(id: ValueId, ty: ValueType, regs: Vec<Reg>) -> Self {
        Self { id, ty, regs }
    }

    /// A value whose registers come from an earlier op's results.
    pub fn produced_by_earlier(id: ValueId, ty: ValueType) -> Self {
        Self {
            id,
            ty,
            regs: Vec::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PointerKind {
    /// One address per element.
    Linear,
    /// A 2-D block descriptor: (offsetY, offsetX, height, width,
    /// rowStride, colStride, base).
    Block,
}

impl fmt::Display for PointerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointerKind::Linear => write!(f, "linear"),
            PointerKind::Block => write!(f, "block"),
        }
    }
}

/// Pointer operand. `value.ty` describes the pointee: element type, and for
/// tensors the shape and layout the addressed elements are distributed by.
#[derive(Clone, Debug, PartialEq)]
pub struct Pointer {
    pub kind: PointerKind,
    pub value: Value,
}

impl Pointer {
    pub fn linear(value: Value) -> Self {
        Self {
            kind: PointerKind::Linear,
            value,
        }
    }

    pub fn block(value: Value) -> Self {
        Self {
            kind: PointerKind::Block,
            value,
        }
    }

    pub fn elem(&self) -> ElemType {
        self.value.ty.elem()
    }

    /// Layout family of the addressed tensor; `None` for scalars.
    pub fn layout_kind(&self) -> Option<LayoutKind> {
        self.value.ty.as_tensor().map(|t| t.layout.kind())
    }
}

/// Value a masked-off load lane receives.
#[derive(Clone, Debug, PartialEq)]
pub enum Other {
    /// The same constant in every element; `bits` is the raw element pattern.
    Splat { bits: u64 },
    Values(Value),
}

/// A tensor memory operation.
#[derive(Clone, Debug, PartialEq)]
pub enum MemOp {
    Load {
        ptr: Pointer,
        mask: Option<Value>,
        other: Option<Other>,
        result: ValueId,
    },
    Store {
        ptr: Pointer,
        value: Value,
        mask: Option<Value>,
    },
    Prefetch {
        ptr: Pointer,
    },
    AtomicCas {
        ptr: Pointer,
        cmp: Value,
        val: Value,
        result: ValueId,
    },
    AtomicRmw {
        kind: RmwKind,
        ptr: Pointer,
        val: Value,
        mask: Option<Value>,
        result: ValueId,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpKind {
    Load,
    Store,
    Prefetch,
    AtomicCas,
    AtomicRmw,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OpKind::Load => "load",
            OpKind::Store => "store",
            OpKind::Prefetch => "prefetch",
            OpKind::AtomicCas => "atomic_cas",
            OpKind::AtomicRmw => "atomic_rmw",
        };
        write!(f, "{}", s)
    }
}

impl MemOp {
    pub fn kind(&self) -> OpKind {
        match self {
            MemOp::Load { .. } => OpKind::Load,
            MemOp::Store { .. } => OpKind::Store,
            MemOp::Prefetch { .. } => OpKind::Prefetch,
            MemOp::AtomicCas { .. } => OpKind::AtomicCas,
            MemOp::AtomicRmw { .. } => OpKind::AtomicRmw,
        }
    }

    pub fn pointer(&self) -> &Pointer {
        match self {
            MemOp::Load { ptr, .. }
            | MemOp::Store { ptr, .. }
            | MemOp::Prefetch { ptr }
            | MemOp::AtomicCas { ptr, .. }
            | MemOp::AtomicRmw { ptr, .. } => ptr,
        }
    }

    /// The value this op defines, if any.
    pub fn result(&self) -> Option<ValueId> {
        match self {
            MemOp::Load { result, .. }
            | MemOp::AtomicCas { result, .. }
            | MemOp::AtomicRmw { result, .. } => Some(*result),
            MemOp::Store { .. } | MemOp::Prefetch { .. } => None,
        }
    }

    pub fn operands(&self) -> Vec<&Value> {
        let mut out = vec![&self.pointer().value];
        match self {
            MemOp::Load { mask, other, .. } => {
                out.extend(mask.iter());
                if let Some(Other::Values(v)) = other {
                    out.push(v);
                }
            }
            MemOp::Store { value, mask, .. } => {
                out.push(value);
                out.extend(mask.iter());
            }
            MemOp::Prefetch { .. } => {}
            MemOp::AtomicCas { cmp, val, .. } => {
                out.push(cmp);
                out.push(val);
            }
            MemOp::AtomicRmw { val, mask, .. } => {
                out.push(val);
                out.extend(mask.iter());
            }
        }
        out
    }

    pub fn operands_mut(&mut self) -> Vec<&mut Value> {
        match self {
            MemOp::Load {
                ptr, mask, other, ..
            } => {
                let mut out = vec![&mut ptr.value];
                out.extend(mask.iter_mut());
                if let Some(Other::Values(v)) = other {
                    out.push(v);
                }
                out
            }
            MemOp::Store { ptr, value, mask } => {
                let mut out = vec![&mut ptr.value, value];
                out.extend(mask.iter_mut());
                out
            }
            MemOp::Prefetch { ptr } => vec![&mut ptr.value],
            MemOp::AtomicCas { ptr, cmp, val, .. } => vec![&mut ptr.value, cmp, val],
            MemOp::AtomicRmw { ptr, val, mask, .. } => {
                let mut out = vec![&mut ptr.value, val];
                out.extend(mask.iter_mut());
                out
            }
        }
    }
}

/// A memory operation and where it came from.
#[derive(Clone, Debug, PartialEq)]
pub struct HlOp {
    pub op: MemOp,
    pub span: Span,
}

impl HlOp {
    pub fn new(op: MemOp, span: Span) -> Self {
        Self { op, span }
    }

    /// Highest operand register, used to start fresh numbering above it.
    pub fn max_reg(&self) -> Option<u32> {
        self.op
            .operands()
            .iter()
            .flat_map(|v| v.regs.iter())
            .map(|r| r.0)
            .max()
    }
}
