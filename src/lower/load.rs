//! Loads: matrix-operand 2-D block loads and generic vectorized loads.

use tracing::trace;

use crate::layout::{ceil_div, Layout, LayoutKind};
use crate::sir::{Block2d, Ty};

use super::block_ptr::BlockPtr;
use super::dispatch::{DispatchKey, MemLowering};
use super::op::{MemOp, OpKind, Other, PointerKind};
use super::vectorize::WordPlan;
use super::{expect_regs, LowerCtx, LowerError, Lowered};

/// Block-pointer load of a matrix-unit A or B operand.
///
/// Each warp loads the operand tiles it feeds to the matrix unit: for A the
/// rows its warp row owns across all of K, for B the columns its warp
/// column owns across all of K. Results are ordered outer repetition
/// first, then K repetition, then the tile's per-lane elements.
pub struct BlockDotLoad;

impl MemLowering for BlockDotLoad {
    fn name(&self) -> &'static str {
        "block_dot_load"
    }

    fn matches(&self, key: &DispatchKey) -> bool {
        key.op == OpKind::Load
            && key.ptr == PointerKind::Block
            && key.layout == Some(LayoutKind::DotOperand)
    }

    fn lower(&self, op: &MemOp, ctx: &mut LowerCtx) -> Result<Lowered, LowerError> {
        let MemOp::Load {
            ptr,
            mask: None,
            other: None,
            ..
        } = op
        else {
            return Ok(Lowered::Declined);
        };
        let Some(tensor) = ptr.value.ty.as_tensor() else {
            return Ok(Lowered::Declined);
        };
        let Layout::DotOperand { op_idx, parent } = &tensor.layout else {
            return Ok(Lowered::Declined);
        };
        if *op_idx > 1 {
            return Ok(Lowered::Declined);
        }
        if tensor.rank() != 2 {
            return Err(LowerError::NonTwoDimBlockPointer {
                rank: tensor.rank(),
            });
        }
        let desc = BlockPtr::unpack(&ptr.value.regs)?;

        let is_a = *op_idx == 0;
        let dim = *op_idx as usize;
        let elem = tensor.elem;
        let bits = elem.bits();
        let shape = [tensor.shape[0], tensor.shape[1]];
        let tile = parent.operand_shape(*op_idx);
        let reps = parent.repetitions(&shape, *op_idx);
        let (num_outer, num_k) = if is_a {
            (reps[0], reps[1])
        } else {
            (reps[1], reps[0])
        };
        let wpc = &parent.warps_per_cta;
        let outer_warps = wpc[dim].min(ceil_div(shape[dim], tile[dim])).max(1);

        let elems_per_lane = parent.elems_per_lane(*op_idx);
        let (packed_elem, packed_len) = if is_a {
            let word = if bits == 32 { Ty::i32() } else { Ty::i16() };
            let len = if parent.ops_per_channel == 4 {
                elems_per_lane / 2
            } else {
                elems_per_lane
            };
            (word, len)
        } else {
            (Ty::i32(), elems_per_lane / parent.ops_per_channel)
        };
        let packed_ty = Ty::vector(packed_elem, packed_len);
        let elem_ty = Ty::vector(elem.ty(), elems_per_lane);
        let vnni = !is_a && bits != 32;
        trace!(
            op_idx,
            ?tile,
            num_outer,
            num_k,
            outer_warps,
            %packed_ty,
            vnni,
            "dot operand block load"
        );

        let mut b = ctx.builder();
        let tid = b.thread_id();
        let warp = b.udiv_imm(tid, parent.threads_per_warp);
        let warp_coords = b.delinearize(warp, wpc, &parent.order());
        let outer_warp = b.urem_imm(warp_coords[dim], outer_warps);
        let surface = desc.surface(&mut b, elem.bytes());
        let outer_base = b.mul_imm(outer_warp, tile[dim]);

        let mut results = Vec::with_capacity(tensor.elems_per_thread());
        for outer in 0..num_outer {
            let outer_off = b.add_imm(outer_base, outer * outer_warps * tile[dim]);
            for k in 0..num_k {
                let (x, y) = if is_a {
                    let x = b.add_imm(desc.offset_x, k * tile[1]);
                    let y = b.add_i32(desc.offset_y, outer_off);
                    (x, y)
                } else {
                    let x = b.add_i32(desc.offset_x, outer_off);
                    let y = b.add_imm(desc.offset_y, k * tile[0]);
                    (x, y)
                };
                let block = Block2d {
                    base: desc.base,
                    base_width: surface.width_bytes,
                    base_height: surface.height,
                    base_pitch: surface.pitch_bytes,
                    x,
                    y,
                    elem_bits: bits,
                    tile_width: tile[1],
                    tile_height: tile[0],
                    v_blocks: 1,
                    transpose: false,
                    vnni,
                };
                let packed = b.block_load(packed_ty.clone(), block);
                let values = b.bitcast(packed, packed_ty.clone(), elem_ty.clone());
                results.extend(b.split_vector(&elem_ty, values));
            }
        }
        Ok(ctx.replace(b, results))
    }
}

/// Linear-pointer load of tensors and scalars, vectorized and predicated.
pub struct GenericLoad;

impl MemLowering for GenericLoad {
    fn name(&self) -> &'static str {
        "generic_load"
    }

    fn matches(&self, key: &DispatchKey) -> bool {
        key.op == OpKind::Load && key.ptr == PointerKind::Linear
    }

    fn lower(&self, op: &MemOp, ctx: &mut LowerCtx) -> Result<Lowered, LowerError> {
        let MemOp::Load {
            ptr, mask, other, ..
        } = op
        else {
            return Ok(Lowered::Declined);
        };
        let elem = ptr.elem();
        let n = ptr.value.ty.elems_per_thread();
        expect_regs("pointer", &ptr.value, n)?;
        if let Some(mask) = mask {
            expect_regs("mask", mask, n)?;
        }
        if let Some(Other::Values(values)) = other {
            expect_regs("other", values, n)?;
        }

        let group = ctx.vector_size(ptr, mask.as_ref());
        let plan = WordPlan::new(elem, group);
        let mut b = ctx.builder();
        let mut results = Vec::with_capacity(n);

        for g in (0..n).step_by(group as usize) {
            let addr = ptr.value.regs[g];
            let word = match mask {
                None => b.load(plan.ty(), addr, plan.align(), None),
                Some(mask) => {
                    let fallback = match other {
                        None => b.zero(plan.ty()),
                        Some(Other::Splat { bits }) if !elem.is_float() => {
                            plan.splat(&mut b, *bits)
                        }
                        Some(Other::Splat { bits }) => {
                            let value = b.constant(elem.ty(), *bits);
                            plan.pack(&mut b, &vec![value; group as usize])
                        }
                        Some(Other::Values(values)) => {
                            plan.pack(&mut b, &values.regs[g..g + group as usize])
                        }
                    };
                    let ty = plan.ty();
                    let align = plan.align();
                    b.guarded(mask.regs[g], &[fallback], |b| {
                        vec![b.load(ty, addr, align, None)]
                    })[0]
                }
            };
            results.extend(plan.unpack(&mut b, word));
        }

        debug_assert_eq!(results.len(), n);
        Ok(ctx.replace(b, results))
    }
}
