//! Stores: accumulator 2-D block stores and generic vectorized stores.

use tracing::trace;

use crate::layout::{Layout, LayoutKind};
use crate::sir::{Block2d, Ty};

use super::block_ptr::BlockPtr;
use super::dispatch::{DispatchKey, MemLowering};
use super::mask::{conjoin, MaskPlan};
use super::op::{MemOp, OpKind, PointerKind};
use super::vectorize::WordPlan;
use super::{expect_regs, LowerCtx, LowerError, Lowered};

/// Block-pointer store of a matrix-unit accumulator.
///
/// Warp (wm, wn) owns the dense region of `reps × tile` elements starting
/// at (wm · repsM · tileM, wn · repsN · tileN). The value's elements are
/// consumed in (m, n) repetition order, `elems_per_lane` per tile.
pub struct BlockDpasStore;

impl MemLowering for BlockDpasStore {
    fn name(&self) -> &'static str {
        "block_dpas_store"
    }

    fn matches(&self, key: &DispatchKey) -> bool {
        key.op == OpKind::Store && key.ptr == PointerKind::Block && key.layout == Some(LayoutKind::Dpas)
    }

    fn lower(&self, op: &MemOp, ctx: &mut LowerCtx) -> Result<Lowered, LowerError> {
        let MemOp::Store {
            ptr,
            value,
            mask: None,
        } = op
        else {
            return Ok(Lowered::Declined);
        };
        let Some(tensor) = ptr.value.ty.as_tensor() else {
            return Ok(Lowered::Declined);
        };
        let Layout::Dpas(dpas) = &tensor.layout else {
            return Ok(Lowered::Declined);
        };
        if tensor.rank() != 2 {
            return Err(LowerError::NonTwoDimBlockPointer {
                rank: tensor.rank(),
            });
        }
        let desc = BlockPtr::unpack(&ptr.value.regs)?;
        expect_regs("value", value, tensor.elems_per_thread())?;

        let elem = tensor.elem;
        let shape = [tensor.shape[0], tensor.shape[1]];
        let tile = dpas.shape_c();
        let reps = dpas.repetitions(&shape, 2);
        let warp_stride = [reps[0] * tile[0], reps[1] * tile[1]];
        let elems_per_lane = dpas.elems_per_lane(2);
        let value_ty = Ty::vector(elem.ty(), elems_per_lane);
        let store_ty = Ty::vector(Ty::Int(elem.bits()), elems_per_lane);
        trace!(?tile, ?reps, ?warp_stride, "accumulator block store");

        let mut b = ctx.builder();
        let tid = b.thread_id();
        let warp = b.udiv_imm(tid, dpas.threads_per_warp);
        let warp_coords = b.delinearize(warp, &dpas.warps_per_cta, &dpas.order());
        let row_base = b.mul_imm(warp_coords[0], warp_stride[0]);
        let row_base = b.add_i32(row_base, desc.offset_y);
        let col_base = b.mul_imm(warp_coords[1], warp_stride[1]);
        let col_base = b.add_i32(col_base, desc.offset_x);
        let surface = desc.surface(&mut b, elem.bytes());

        let mut values = value.regs.chunks(elems_per_lane as usize);
        for m in 0..reps[0] {
            let y = b.add_imm(row_base, m * tile[0]);
            for n in 0..reps[1] {
                let x = b.add_imm(col_base, n * tile[1]);
                let Some(chunk) = values.next() else {
                    break;
                };
                let packed = b.build_vector(value_ty.clone(), chunk);
                let packed = b.bitcast(packed, value_ty.clone(), store_ty.clone());
                let block = Block2d {
                    base: desc.base,
                    base_width: surface.width_bytes,
                    base_height: surface.height,
                    base_pitch: surface.pitch_bytes,
                    x,
                    y,
                    elem_bits: elem.bits(),
                    tile_width: tile[1],
                    tile_height: tile[0],
                    v_blocks: 1,
                    transpose: false,
                    vnni: false,
                };
                b.block_store(store_ty.clone(), packed, block);
            }
        }
        Ok(ctx.replace(b, Vec::new()))
    }
}

/// Linear-pointer store of tensors and scalars.
///
/// Only unique owners write: every transfer is guarded by the redundancy
/// mask and, when present, the explicit mask.
pub struct GenericStore;

impl MemLowering for GenericStore {
    fn name(&self) -> &'static str {
        "generic_store"
    }

    fn matches(&self, key: &DispatchKey) -> bool {
        key.op == OpKind::Store && key.ptr == PointerKind::Linear
    }

    fn lower(&self, op: &MemOp, ctx: &mut LowerCtx) -> Result<Lowered, LowerError> {
        let MemOp::Store { ptr, value, mask } = op else {
            return Ok(Lowered::Declined);
        };
        let n = value.ty.elems_per_thread();
        expect_regs("pointer", &ptr.value, n)?;
        expect_regs("value", value, n)?;
        if let Some(mask) = mask {
            expect_regs("mask", mask, n)?;
        }

        let group = ctx.vector_size(ptr, mask.as_ref());
        let plan = WordPlan::new(value.ty.elem(), group);
        let mut b = ctx.builder();
        let owner = MaskPlan::for_value(&value.ty).emit(&mut b);

        for g in (0..n).step_by(group as usize) {
            let addr = ptr.value.regs[g];
            let word = plan.pack(&mut b, &value.regs[g..g + group as usize]);
            let explicit = mask.as_ref().map(|m| m.regs[g]);
            let (ty, align) = (plan.ty(), plan.align());
            match conjoin(&mut b, owner, explicit) {
                Some(pred) => {
                    b.guarded(pred, &[], |b| {
                        b.store(ty, word, addr, align);
                        Vec::new()
                    });
                }
                None => b.store(ty, word, addr, align),
            }
        }
        Ok(ctx.replace(b, Vec::new()))
    }
}
