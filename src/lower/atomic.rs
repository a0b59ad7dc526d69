//! Atomics: compare-and-swap and read-modify-write.
//!
//! Tensor atomics are issued one element at a time by the unique owner of
//! each element; replicated lanes get zero. A scalar atomic is issued by
//! thread 0 of CTA 0 and its result broadcast to every lane through
//! scratch memory between two barriers.
//!
//! 32- and 64-bit elements use the native instructions. 16-bit
//! read-modify-write has no native form and is emulated with a
//! compare-and-swap loop on the containing 32-bit word.

use tracing::trace;

use crate::sir::{BinOp, Builder, CmpPred, FBinOp, Idx, Ordering, Reg, RmwKind, SirOp, Ty};
use crate::types::ElemType;

use super::dispatch::{DispatchKey, MemLowering};
use super::mask::{conjoin, MaskPlan};
use super::op::{MemOp, OpKind, PointerKind};
use super::{expect_regs, LowerCtx, LowerError, Lowered};

pub struct AtomicCasLowering;

impl MemLowering for AtomicCasLowering {
    fn name(&self) -> &'static str {
        "atomic_cas"
    }

    fn matches(&self, key: &DispatchKey) -> bool {
        key.op == OpKind::AtomicCas && key.ptr == PointerKind::Linear
    }

    fn lower(&self, op: &MemOp, ctx: &mut LowerCtx) -> Result<Lowered, LowerError> {
        let MemOp::AtomicCas { ptr, cmp, val, .. } = op else {
            return Ok(Lowered::Declined);
        };
        let elem = ptr.elem();
        if !matches!(elem.bits(), 32 | 64) {
            return Err(LowerError::UnsupportedAtomicWidth {
                op: "atomic_cas",
                bits: elem.bits(),
            });
        }
        let n = ptr.value.ty.elems_per_thread();
        expect_regs("pointer", &ptr.value, n)?;
        expect_regs("compare value", cmp, n)?;
        expect_regs("new value", val, n)?;
        let scalar = ptr.value.ty.as_tensor().is_none();
        if scalar {
            single_cta(ctx)?;
        }

        let elem_ty = elem.ty();
        let int_ty = Ty::Int(elem.bits());
        let mut b = ctx.builder();
        let owner = MaskPlan::for_value(&ptr.value.ty).emit(&mut b);

        let mut results = Vec::with_capacity(n);
        for i in 0..n {
            let (addr, expected, desired) = (ptr.value.regs[i], cmp.regs[i], val.regs[i]);
            let swap = |b: &mut Builder| {
                let expected = b.bitcast(expected, elem_ty.clone(), int_ty.clone());
                let desired = b.bitcast(desired, elem_ty.clone(), int_ty.clone());
                let (old, _) = b.cmpxchg(int_ty.clone(), addr, expected, desired);
                b.bitcast(old, int_ty.clone(), elem_ty.clone())
            };
            results.push(run_guarded(&mut b, owner, &elem_ty, swap));
        }

        if let (true, Some(leader)) = (scalar, owner) {
            results = vec![broadcast(&mut b, &elem_ty, results[0], leader)];
        }
        Ok(ctx.replace(b, results))
    }
}

pub struct AtomicRmwLowering;

impl MemLowering for AtomicRmwLowering {
    fn name(&self) -> &'static str {
        "atomic_rmw"
    }

    fn matches(&self, key: &DispatchKey) -> bool {
        key.op == OpKind::AtomicRmw && key.ptr == PointerKind::Linear
    }

    fn lower(&self, op: &MemOp, ctx: &mut LowerCtx) -> Result<Lowered, LowerError> {
        let MemOp::AtomicRmw {
            kind,
            ptr,
            val,
            mask,
            ..
        } = op
        else {
            return Ok(Lowered::Declined);
        };
        let kind = *kind;
        let elem = ptr.elem();
        let emulated = match elem.bits() {
            32 | 64 => None,
            16 => {
                if !ctx.config.allow_emulated_atomics {
                    return Err(LowerError::EmulationDisabled {
                        target: ctx.config.name.clone(),
                    });
                }
                Some(HalfOp::of(kind, elem)?)
            }
            bits => {
                return Err(LowerError::UnsupportedAtomicWidth {
                    op: "atomic_rmw",
                    bits,
                })
            }
        };
        let n = ptr.value.ty.elems_per_thread();
        expect_regs("pointer", &ptr.value, n)?;
        expect_regs("value", val, n)?;
        if let Some(mask) = mask {
            expect_regs("mask", mask, n)?;
        }
        let scalar = ptr.value.ty.as_tensor().is_none();
        if scalar {
            single_cta(ctx)?;
        }
        trace!(%kind, %elem, emulated = emulated.is_some(), "atomic rmw");

        let elem_ty = elem.ty();
        let mut b = ctx.builder();
        let owner = MaskPlan::for_value(&ptr.value.ty).emit(&mut b);

        let mut results = Vec::with_capacity(n);
        for i in 0..n {
            let (addr, operand) = (ptr.value.regs[i], val.regs[i]);
            let explicit = mask.as_ref().map(|m| m.regs[i]);
            let pred = conjoin(&mut b, owner, explicit);
            let update = |b: &mut Builder| match emulated {
                Some(half_op) => emulate_half(b, half_op, elem, addr, operand),
                None => b.atomic_rmw(kind, elem_ty.clone(), addr, operand),
            };
            results.push(run_guarded(&mut b, pred, &elem_ty, update));
        }

        if let (true, Some(leader)) = (scalar, owner) {
            results = vec![broadcast(&mut b, &elem_ty, results[0], leader)];
        }
        if emulated.is_some() {
            ctx.warn(format!(
                "atomic {} on {} has no native instruction; emulated with a 32-bit compare-and-swap loop",
                kind, elem
            ));
        }
        Ok(ctx.replace(b, results))
    }
}

fn single_cta(ctx: &LowerCtx) -> Result<(), LowerError> {
    match ctx.config.num_ctas {
        1 => Ok(()),
        num_ctas => Err(LowerError::ScalarBroadcastAcrossCtas { num_ctas }),
    }
}

/// Run `body` where `pred` holds, yielding zero elsewhere.
fn run_guarded<F>(b: &mut Builder, pred: Option<Reg>, ty: &Ty, body: F) -> Reg
where
    F: FnOnce(&mut Builder) -> Reg,
{
    match pred {
        Some(pred) => {
            let zero = b.zero(ty.clone());
            b.guarded(pred, &[zero], |b| vec![body(b)])[0]
        }
        None => body(b),
    }
}

/// Hand the leader's `value` to every lane of the CTA.
///
/// ```text
///     if leader: store value, [scratch]
///     barrier
///     out = load [scratch]
///     barrier
/// ```
///
/// The second barrier keeps the next scalar atomic from overwriting the
/// scratch slot before every lane has read it.
fn broadcast(b: &mut Builder, ty: &Ty, value: Reg, leader: Reg) -> Reg {
    let align = (ty.bits() / 8).max(1);
    let scratch = b.shared_base();
    b.guarded(leader, &[], |b| {
        b.store(ty.clone(), value, scratch, align);
        Vec::new()
    });
    b.barrier();
    let out = b.load(ty.clone(), scratch, align, None);
    b.barrier();
    out
}

/// Update applied to the 16-bit half inside the emulation loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum HalfOp {
    Add,
    FAdd,
    FMax,
    FMin,
    /// Keep the larger (`keep_larger`) or smaller operand under `pred`.
    Pick { pred: CmpPred, keep_larger: bool },
    Xchg,
}

impl HalfOp {
    fn of(kind: RmwKind, elem: ElemType) -> Result<Self, LowerError> {
        let float = elem.is_float();
        let op = match kind {
            RmwKind::Add if !float => HalfOp::Add,
            RmwKind::Add | RmwKind::FAdd if float => HalfOp::FAdd,
            RmwKind::Max if float => HalfOp::FMax,
            RmwKind::Min if float => HalfOp::FMin,
            RmwKind::Max => HalfOp::Pick {
                pred: CmpPred::Slt,
                keep_larger: true,
            },
            RmwKind::Min => HalfOp::Pick {
                pred: CmpPred::Slt,
                keep_larger: false,
            },
            RmwKind::UMax if !float => HalfOp::Pick {
                pred: CmpPred::Ult,
                keep_larger: true,
            },
            RmwKind::UMin if !float => HalfOp::Pick {
                pred: CmpPred::Ult,
                keep_larger: false,
            },
            RmwKind::Xchg => HalfOp::Xchg,
            _ => return Err(LowerError::UnsupportedEmulatedOp { kind }),
        };
        Ok(op)
    }

    fn apply(self, b: &mut Builder, ty: &Ty, old: Reg, val: Reg) -> Reg {
        match self {
            HalfOp::Add => b.bin(BinOp::Add, ty.clone(), old, val),
            HalfOp::FAdd => b.fbin(FBinOp::Add, ty.clone(), old, val),
            HalfOp::FMax => b.fbin(FBinOp::Maximum, ty.clone(), old, val),
            HalfOp::FMin => b.fbin(FBinOp::Minimum, ty.clone(), old, val),
            HalfOp::Pick { pred, keep_larger } => {
                let take_val = if keep_larger {
                    b.icmp(pred, ty.clone(), old, val)
                } else {
                    b.icmp(pred, ty.clone(), val, old)
                };
                b.guarded(take_val, &[old], |_| vec![val])[0]
            }
            HalfOp::Xchg => val,
        }
    }
}

/// 16-bit read-modify-write through a compare-and-swap on the aligned
/// 32-bit word holding the element. Returns the element's value before the
/// update.
///
/// ```text
///     aligned = addr - (addr & 3)
///     index   = (addr & 3) >> 1
///     word    = load.acquire [aligned]
/// retry:
///     old     = word.half[index]
///     desired = word with half[index] = op(old, val)
///     seen, ok = cmpxchg [aligned], word, desired
///     word    = seen
///     br ok, done, retry
/// done:
/// ```
///
/// The loop has no iteration bound; it exits once a CAS observes the word
/// it last read.
fn emulate_half(b: &mut Builder, op: HalfOp, elem: ElemType, addr: Reg, val: Reg) -> Reg {
    let elem_ty = elem.ty();
    let word_ty = Ty::i32();
    let halves_ty = Ty::vector(Ty::i16(), 2);

    let addr_bits = b.ptr_to_int(addr);
    let low_mask = b.i64(3);
    let low = b.bin(BinOp::And, Ty::i64(), addr_bits, low_mask);
    let zero = b.i64(0);
    let back = b.bin(BinOp::Sub, Ty::i64(), zero, low);
    let aligned = b.gep(addr, back, 1);
    let one = b.i64(1);
    let index = b.bin(BinOp::LShr, Ty::i64(), low, one);
    let index = b.trunc(index, Ty::i32());

    let word = b.fresh_reg();
    let first = b.load(word_ty.clone(), aligned, 4, Some(Ordering::Acquire));
    b.emit(SirOp::Move(word, first));

    let retry = b.fresh_label("rmw16_retry_");
    let done = b.fresh_label("rmw16_done_");
    b.emit(SirOp::LabelDef(retry.clone()));
    let halves = b.bitcast(word, word_ty.clone(), halves_ty.clone());
    let old_half = b.extract_element(halves_ty.clone(), halves, Idx::Reg(index));
    let old = b.bitcast(old_half, Ty::i16(), elem_ty.clone());
    let new = op.apply(b, &elem_ty, old, val);
    let new_half = b.bitcast(new, elem_ty, Ty::i16());
    let spliced = b.insert_element(halves_ty.clone(), halves, new_half, Idx::Reg(index));
    let desired = b.bitcast(spliced, halves_ty, word_ty.clone());
    let (seen, ok) = b.cmpxchg(word_ty, aligned, word, desired);
    b.emit(SirOp::Move(word, seen));
    b.emit(SirOp::Branch {
        cond: ok,
        if_true: done.clone(),
        if_false: retry,
    });
    b.emit(SirOp::LabelDef(done));
    old
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_op_selection() {
        assert_eq!(HalfOp::of(RmwKind::Add, ElemType::I16), Ok(HalfOp::Add));
        assert_eq!(HalfOp::of(RmwKind::FAdd, ElemType::F16), Ok(HalfOp::FAdd));
        assert_eq!(HalfOp::of(RmwKind::Add, ElemType::BF16), Ok(HalfOp::FAdd));
        assert_eq!(HalfOp::of(RmwKind::Max, ElemType::F16), Ok(HalfOp::FMax));
        assert_eq!(
            HalfOp::of(RmwKind::UMin, ElemType::I16),
            Ok(HalfOp::Pick {
                pred: CmpPred::Ult,
                keep_larger: false
            })
        );
        assert_eq!(HalfOp::of(RmwKind::Xchg, ElemType::F16), Ok(HalfOp::Xchg));
    }

    #[test]
    fn test_bitwise_half_ops_are_rejected() {
        for kind in [RmwKind::And, RmwKind::Or, RmwKind::Xor] {
            assert_eq!(
                HalfOp::of(kind, ElemType::I16),
                Err(LowerError::UnsupportedEmulatedOp { kind })
            );
        }
        assert!(HalfOp::of(RmwKind::UMax, ElemType::F16).is_err());
    }

    #[test]
    fn test_emulation_loop_shape() {
        let mut b = Builder::new(2, 0);
        let old = emulate_half(&mut b, HalfOp::Add, ElemType::I16, Reg(0), Reg(1));
        let ops = b.ops();
        let acquire_loads = ops
            .iter()
            .filter(|op| matches!(op, SirOp::Load { ordering: Some(Ordering::Acquire), align: 4, .. }))
            .count();
        assert_eq!(acquire_loads, 1);
        let cas = ops
            .iter()
            .filter(|op| matches!(op, SirOp::CmpXchg { success: Ordering::AcqRel, failure: Ordering::Monotonic, .. }))
            .count();
        assert_eq!(cas, 1);
        assert!(matches!(
            ops.last(),
            Some(SirOp::LabelDef(label)) if label.0.starts_with("rmw16_done_")
        ));
        assert!(ops
            .iter()
            .any(|op| matches!(op, SirOp::Bin { op: BinOp::Add, lhs, rhs, .. } if *lhs == old && *rhs == Reg(1))));
        // The pre-update half is the extracted element, not the sum.
        assert!(ops
            .iter()
            .any(|op| matches!(op, SirOp::ExtractElement { dst, .. } if *dst == old)));
    }

    #[test]
    fn test_broadcast_uses_two_barriers() {
        let mut b = Builder::new(2, 0);
        broadcast(&mut b, &Ty::i32(), Reg(0), Reg(1));
        let barriers = b.ops().iter().filter(|op| matches!(op, SirOp::Barrier)).count();
        assert_eq!(barriers, 2);
        assert!(b.ops().iter().any(|op| matches!(op, SirOp::SharedBase(_))));
    }
}
