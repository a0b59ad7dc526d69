//! Block prefetch: warm the caches for a 2-D region without producing a
//! value.

use tracing::trace;

use crate::sir::{Block2d, CacheControl};

use super::block_ptr::BlockPtr;
use super::dispatch::{DispatchKey, MemLowering};
use super::op::{MemOp, OpKind, PointerKind};
use super::tiling::TilePlan;
use super::{LowerCtx, LowerError, Lowered};

/// Prefetch through a block pointer of any layout. The region is tiled by
/// `TilePlan` over the CTA's warps, independent of the tensor's layout.
pub struct BlockPrefetch;

impl MemLowering for BlockPrefetch {
    fn name(&self) -> &'static str {
        "block_prefetch"
    }

    fn matches(&self, key: &DispatchKey) -> bool {
        key.op == OpKind::Prefetch
    }

    fn lower(&self, op: &MemOp, ctx: &mut LowerCtx) -> Result<Lowered, LowerError> {
        let MemOp::Prefetch { ptr } = op else {
            return Ok(Lowered::Declined);
        };
        if ptr.kind == PointerKind::Linear {
            return Err(LowerError::PrefetchOfLinearPointer);
        }
        let Some(tensor) = ptr.value.ty.as_tensor() else {
            return Err(LowerError::NonTwoDimBlockPointer { rank: 0 });
        };
        if tensor.rank() != 2 {
            return Err(LowerError::NonTwoDimBlockPointer {
                rank: tensor.rank(),
            });
        }
        let desc = BlockPtr::unpack(&ptr.value.regs)?;

        let elem = tensor.elem;
        let elem_bits = elem.bits().max(8);
        let plan = TilePlan::new(
            [tensor.shape[0], tensor.shape[1]],
            elem_bits,
            ctx.config.num_warps,
            ctx.config,
        );
        let transfer_bits = plan.transfer_bits();
        trace!(
            transfer_bits,
            transfer_width = plan.transfer_width(),
            "prefetch transfer"
        );

        let mut b = ctx.builder();
        let tid = b.thread_id();
        let warp = b.udiv_imm(tid, ctx.config.warp_size);
        let row = b.udiv_imm(warp, plan.grid[1]);
        let col = b.urem_imm(warp, plan.grid[1]);
        let row_base = b.mul_imm(row, plan.tile[0]);
        let col_base = b.mul_imm(col, plan.tile[1]);

        let base = desc.address(&mut b, desc.offset_x, desc.offset_y, elem.bytes());
        let surface = desc.surface(&mut b, elem.bytes());

        for r in 0..plan.reps[0] {
            let y = b.add_imm(row_base, r * plan.grid[0] * plan.tile[0]);
            let y = b.urem_imm(y, plan.shape[0]);
            for c in 0..plan.reps[1] {
                let x = b.add_imm(col_base, c * plan.grid[1] * plan.tile[1]);
                let x = b.urem_imm(x, plan.shape[1]);
                let x = if transfer_bits == elem_bits {
                    x
                } else {
                    let bits = b.mul_imm(x, elem_bits);
                    b.udiv_imm(bits, transfer_bits)
                };
                let block = Block2d {
                    base,
                    base_width: surface.width_bytes,
                    base_height: surface.height,
                    base_pitch: surface.pitch_bytes,
                    x,
                    y,
                    elem_bits: transfer_bits,
                    tile_width: plan.transfer_width(),
                    tile_height: plan.tile[0],
                    v_blocks: 1,
                    transpose: false,
                    vnni: false,
                };
                b.block_prefetch(block, CacheControl::L1CachedL3Cached);
            }
        }
        Ok(ctx.replace(b, Vec::new()))
    }
}
