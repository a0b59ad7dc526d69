//! Block pointer descriptor.

use crate::sir::{Builder, Reg};

use super::error::LowerError;

/// The seven components of a 2-D block pointer, in operand order.
///
/// Integer components are i32 registers in elements (strides in elements
/// per step); `base` is the pointer to element (0, 0). The hardware
/// transfer checks `height`/`width`, software does not.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockPtr {
    pub offset_y: Reg,
    pub offset_x: Reg,
    pub height: Reg,
    pub width: Reg,
    pub row_stride: Reg,
    pub col_stride: Reg,
    pub base: Reg,
}

/// The addressed 2-D surface in the units block transfers expect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Surface {
    pub width_bytes: Reg,
    pub height: Reg,
    pub pitch_bytes: Reg,
}

impl BlockPtr {
    pub fn unpack(regs: &[Reg]) -> Result<Self, LowerError> {
        match *regs {
            [offset_y, offset_x, height, width, row_stride, col_stride, base] => Ok(Self {
                offset_y,
                offset_x,
                height,
                width,
                row_stride,
                col_stride,
                base,
            }),
            _ => Err(LowerError::MalformedBlockPointer { found: regs.len() }),
        }
    }

    pub fn surface(&self, b: &mut Builder, elem_bytes: u32) -> Surface {
        let width_bytes = b.mul_imm(self.width, elem_bytes);
        let pitch_bytes = b.mul_imm(self.row_stride, elem_bytes);
        Surface {
            width_bytes,
            height: self.height,
            pitch_bytes,
        }
    }

    /// `base + y * rowStride * elemBytes + x * elemBytes`.
    pub fn address(&self, b: &mut Builder, x: Reg, y: Reg, elem_bytes: u32) -> Reg {
        let row = b.mul_i32(y, self.row_stride);
        let elems = b.add_i32(row, x);
        b.gep(self.base, elems, elem_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sir::SirOp;

    fn regs() -> Vec<Reg> {
        (0..7).map(Reg).collect()
    }

    #[test]
    fn test_unpack_order() {
        let ptr = BlockPtr::unpack(&regs()).unwrap();
        assert_eq!(ptr.offset_y, Reg(0));
        assert_eq!(ptr.offset_x, Reg(1));
        assert_eq!(ptr.height, Reg(2));
        assert_eq!(ptr.width, Reg(3));
        assert_eq!(ptr.row_stride, Reg(4));
        assert_eq!(ptr.col_stride, Reg(5));
        assert_eq!(ptr.base, Reg(6));
    }

    #[test]
    fn test_unpack_rejects_wrong_arity() {
        assert_eq!(
            BlockPtr::unpack(&regs()[..5]),
            Err(LowerError::MalformedBlockPointer { found: 5 })
        );
    }

    #[test]
    fn test_address_scales_by_element_size() {
        let ptr = BlockPtr::unpack(&regs()).unwrap();
        let mut b = Builder::new(7, 0);
        let addr = ptr.address(&mut b, ptr.offset_x, ptr.offset_y, 2);
        assert!(matches!(
            b.ops().last(),
            Some(SirOp::Gep { dst, base, elem_bytes: 2, .. }) if *dst == addr && *base == Reg(6)
        ));
    }
}
