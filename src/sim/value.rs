//! Lane register values and their bit-level encodings.

use std::fmt;

use half::{bf16, f16};

use crate::sir::{AddrSpace, Ty};

/// Contents of one lane register.
///
/// Scalars keep the raw bit pattern at their width, floats included.
/// Vector elements are raw bit patterns of the vector's element type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Val {
    Scalar { width: u32, bits: u64 },
    Ptr { space: AddrSpace, addr: u64 },
    Vector { elem_bits: u32, elems: Vec<u64> },
}

impl Val {
    /// Integer of `width` bits; `bits` is truncated to the width.
    pub fn int(width: u32, bits: u64) -> Self {
        Val::Scalar {
            width,
            bits: mask(bits, width),
        }
    }

    pub fn i1(value: bool) -> Self {
        Val::int(1, value as u64)
    }

    pub fn i32(value: u32) -> Self {
        Val::int(32, value as u64)
    }

    pub fn i64(value: u64) -> Self {
        Val::int(64, value)
    }

    pub fn global(addr: u64) -> Self {
        Val::Ptr {
            space: AddrSpace::Global,
            addr,
        }
    }

    pub fn f32(value: f32) -> Self {
        Val::int(32, value.to_bits() as u64)
    }

    pub fn f16(value: f16) -> Self {
        Val::int(16, value.to_bits() as u64)
    }

    /// Float of type `ty` (f16, bf16, f32 or f64) holding `value`.
    pub fn float(ty: &Ty, value: f64) -> Self {
        Val::int(ty.bits(), encode_float(ty, value))
    }

    /// Zero of any type.
    pub fn zero(ty: &Ty) -> Self {
        match ty {
            Ty::Ptr(space) => Val::Ptr {
                space: *space,
                addr: 0,
            },
            Ty::Vector(elem, len) => Val::Vector {
                elem_bits: elem.bits(),
                elems: vec![0; *len as usize],
            },
            scalar => Val::int(scalar.bits(), 0),
        }
    }

    /// Raw bits of a scalar.
    pub fn bits(&self) -> Option<u64> {
        match self {
            Val::Scalar { bits, .. } => Some(*bits),
            _ => None,
        }
    }

    /// Scalar bits sign-extended from their width.
    pub fn signed(&self) -> Option<i64> {
        match self {
            Val::Scalar { width, bits } => Some(sign_extend(*bits, *width)),
            _ => None,
        }
    }

    /// Little-endian memory image of a value of type `ty`.
    pub fn to_bytes(&self, ty: &Ty) -> Vec<u8> {
        let n = byte_len(ty);
        match self {
            Val::Scalar { bits, .. } => bits.to_le_bytes()[..n.min(8)].to_vec(),
            Val::Ptr { addr, .. } => addr.to_le_bytes()[..n.min(8)].to_vec(),
            Val::Vector { elem_bits, elems } => {
                let elem_bytes = (*elem_bits as usize).div_ceil(8);
                elems
                    .iter()
                    .flat_map(|e| e.to_le_bytes()[..elem_bytes].to_vec())
                    .collect()
            }
        }
    }

    /// Decode a little-endian memory image as type `ty`.
    pub fn from_bytes(ty: &Ty, bytes: &[u8]) -> Self {
        match ty {
            Ty::Ptr(space) => Val::Ptr {
                space: *space,
                addr: le_u64(bytes),
            },
            Ty::Vector(elem, _) => {
                let elem_bytes = (elem.bits() as usize).div_ceil(8);
                Val::Vector {
                    elem_bits: elem.bits(),
                    elems: bytes
                        .chunks(elem_bytes)
                        .map(|chunk| mask(le_u64(chunk), elem.bits()))
                        .collect(),
                }
            }
            scalar => Val::int(scalar.bits(), le_u64(bytes)),
        }
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Scalar { width, bits } => write!(f, "i{} {:#x}", width, bits),
            Val::Ptr { space, addr } => write!(f, "ptr<{}> {:#x}", space, addr),
            Val::Vector { elem_bits, elems } => {
                write!(f, "<{} x i{}> [", elems.len(), elem_bits)?;
                for (i, e) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:#x}", e)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Bytes occupied in memory; `i1` takes a full byte.
pub fn byte_len(ty: &Ty) -> usize {
    match ty {
        Ty::Vector(elem, len) => byte_len(elem) * *len as usize,
        other => (other.bits() as usize).div_ceil(8),
    }
}

pub fn mask(bits: u64, width: u32) -> u64 {
    if width >= 64 {
        bits
    } else {
        bits & ((1u64 << width) - 1)
    }
}

pub fn sign_extend(bits: u64, width: u32) -> i64 {
    if width == 0 || width >= 64 {
        return bits as i64;
    }
    let shift = 64 - width;
    ((bits << shift) as i64) >> shift
}

fn le_u64(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .take(8)
        .enumerate()
        .fold(0u64, |acc, (i, &b)| acc | ((b as u64) << (8 * i)))
}

/// Decode raw float bits of type `ty`. Non-float types yield `None`.
pub fn decode_float(ty: &Ty, bits: u64) -> Option<f64> {
    match ty {
        Ty::F16 => Some(f16::from_bits(bits as u16).to_f64()),
        Ty::BF16 => Some(bf16::from_bits(bits as u16).to_f64()),
        Ty::F32 => Some(f32::from_bits(bits as u32) as f64),
        Ty::F64 => Some(f64::from_bits(bits)),
        _ => None,
    }
}

pub fn encode_float(ty: &Ty, value: f64) -> u64 {
    match ty {
        Ty::F16 => f16::from_f64(value).to_bits() as u64,
        Ty::BF16 => bf16::from_f64(value).to_bits() as u64,
        Ty::F32 => (value as f32).to_bits() as u64,
        _ => value.to_bits(),
    }
}
