//! Builder: allocates registers and labels and appends SIR operations.
//!
//! Lowerings never write into a shared output directly. Each one builds
//! into its own `Builder`, and only a successful lowering hands its ops
//! over, so a declined or failed lowering leaves nothing behind.

use super::{
    AddrSpace, BinOp, Block2d, CacheControl, CmpPred, FBinOp, Idx, Label, Ordering, Reg,
    RmwKind, SirOp, Ty,
};

/// State for emitting one lowering.
#[derive(Debug)]
pub struct Builder {
    /// Next virtual register number.
    next_reg: u32,
    /// Next label counter.
    next_label: u32,
    /// Accumulated output.
    ops: Vec<SirOp>,
}

impl Builder {
    /// Start a builder whose fresh registers and labels begin at the
    /// given counters.
    pub fn new(first_reg: u32, first_label: u32) -> Self {
        Self {
            next_reg: first_reg,
            next_label: first_label,
            ops: Vec::new(),
        }
    }

    /// Allocate a fresh virtual register.
    pub fn fresh_reg(&mut self) -> Reg {
        let r = Reg(self.next_reg);
        self.next_reg += 1;
        r
    }

    /// Generate a fresh label with the given prefix.
    pub fn fresh_label(&mut self, prefix: &str) -> Label {
        self.next_label += 1;
        Label::new(format!("{}{}", prefix, self.next_label))
    }

    /// Emit an operation.
    pub fn emit(&mut self, op: SirOp) {
        self.ops.push(op);
    }

    pub fn ops(&self) -> &[SirOp] {
        &self.ops
    }

    pub fn next_reg(&self) -> u32 {
        self.next_reg
    }

    pub fn next_label(&self) -> u32 {
        self.next_label
    }

    /// Consume the builder: (ops, next register, next label).
    pub fn finish(self) -> (Vec<SirOp>, u32, u32) {
        (self.ops, self.next_reg, self.next_label)
    }

    pub fn comment(&mut self, text: impl Into<String>) {
        self.emit(SirOp::Comment(text.into()));
    }

    // ── Values ──

    pub fn constant(&mut self, ty: Ty, bits: u64) -> Reg {
        let dst = self.fresh_reg();
        self.emit(SirOp::Const { dst, ty, bits });
        dst
    }

    pub fn i32(&mut self, value: u32) -> Reg {
        self.constant(Ty::i32(), value as u64)
    }

    pub fn i64(&mut self, value: u64) -> Reg {
        self.constant(Ty::i64(), value)
    }

    pub fn bool(&mut self, value: bool) -> Reg {
        self.constant(Ty::i1(), value as u64)
    }

    pub fn zero(&mut self, ty: Ty) -> Reg {
        let dst = self.fresh_reg();
        self.emit(SirOp::Zero { dst, ty });
        dst
    }

    pub fn undef(&mut self, ty: Ty) -> Reg {
        let dst = self.fresh_reg();
        self.emit(SirOp::Undef { dst, ty });
        dst
    }

    pub fn thread_id(&mut self) -> Reg {
        let dst = self.fresh_reg();
        self.emit(SirOp::ThreadId(dst));
        dst
    }

    pub fn cluster_cta_id(&mut self) -> Reg {
        let dst = self.fresh_reg();
        self.emit(SirOp::ClusterCtaId(dst));
        dst
    }

    pub fn shared_base(&mut self) -> Reg {
        let dst = self.fresh_reg();
        self.emit(SirOp::SharedBase(dst));
        dst
    }

    // ── Arithmetic ──

    pub fn bin(&mut self, op: BinOp, ty: Ty, lhs: Reg, rhs: Reg) -> Reg {
        let dst = self.fresh_reg();
        self.emit(SirOp::Bin {
            op,
            dst,
            lhs,
            rhs,
            ty,
        });
        dst
    }

    pub fn fbin(&mut self, op: FBinOp, ty: Ty, lhs: Reg, rhs: Reg) -> Reg {
        let dst = self.fresh_reg();
        self.emit(SirOp::FBin {
            op,
            dst,
            lhs,
            rhs,
            ty,
        });
        dst
    }

    pub fn icmp(&mut self, pred: CmpPred, ty: Ty, lhs: Reg, rhs: Reg) -> Reg {
        let dst = self.fresh_reg();
        self.emit(SirOp::ICmp {
            pred,
            dst,
            lhs,
            rhs,
            ty,
        });
        dst
    }

    pub fn add_i32(&mut self, lhs: Reg, rhs: Reg) -> Reg {
        self.bin(BinOp::Add, Ty::i32(), lhs, rhs)
    }

    pub fn mul_i32(&mut self, lhs: Reg, rhs: Reg) -> Reg {
        self.bin(BinOp::Mul, Ty::i32(), lhs, rhs)
    }

    pub fn udiv_i32(&mut self, lhs: Reg, rhs: Reg) -> Reg {
        self.bin(BinOp::UDiv, Ty::i32(), lhs, rhs)
    }

    pub fn urem_i32(&mut self, lhs: Reg, rhs: Reg) -> Reg {
        self.bin(BinOp::URem, Ty::i32(), lhs, rhs)
    }

    /// lhs + imm (i32)
    pub fn add_imm(&mut self, lhs: Reg, imm: u32) -> Reg {
        let c = self.i32(imm);
        self.add_i32(lhs, c)
    }

    /// lhs * imm (i32)
    pub fn mul_imm(&mut self, lhs: Reg, imm: u32) -> Reg {
        let c = self.i32(imm);
        self.mul_i32(lhs, c)
    }

    /// lhs / imm (i32, unsigned)
    pub fn udiv_imm(&mut self, lhs: Reg, imm: u32) -> Reg {
        let c = self.i32(imm);
        self.udiv_i32(lhs, c)
    }

    /// lhs % imm (i32, unsigned)
    pub fn urem_imm(&mut self, lhs: Reg, imm: u32) -> Reg {
        let c = self.i32(imm);
        self.urem_i32(lhs, c)
    }

    /// Logical AND of two i1 values.
    pub fn and_i1(&mut self, lhs: Reg, rhs: Reg) -> Reg {
        self.bin(BinOp::And, Ty::i1(), lhs, rhs)
    }

    // ── Casts ──

    pub fn trunc(&mut self, src: Reg, to: Ty) -> Reg {
        let dst = self.fresh_reg();
        self.emit(SirOp::Trunc { dst, src, to });
        dst
    }

    pub fn sext(&mut self, src: Reg, from: Ty, to: Ty) -> Reg {
        let dst = self.fresh_reg();
        self.emit(SirOp::SExt { dst, src, from, to });
        dst
    }

    pub fn zext(&mut self, src: Reg, from: Ty, to: Ty) -> Reg {
        let dst = self.fresh_reg();
        self.emit(SirOp::ZExt { dst, src, from, to });
        dst
    }

    pub fn bitcast(&mut self, src: Reg, from: Ty, to: Ty) -> Reg {
        if from == to {
            return src;
        }
        let dst = self.fresh_reg();
        self.emit(SirOp::Bitcast { dst, src, from, to });
        dst
    }

    pub fn ptr_to_int(&mut self, src: Reg) -> Reg {
        let dst = self.fresh_reg();
        self.emit(SirOp::PtrToInt { dst, src });
        dst
    }

    pub fn int_to_ptr(&mut self, src: Reg, space: AddrSpace) -> Reg {
        let dst = self.fresh_reg();
        self.emit(SirOp::IntToPtr { dst, src, space });
        dst
    }

    pub fn gep(&mut self, base: Reg, index: Reg, elem_bytes: u32) -> Reg {
        let dst = self.fresh_reg();
        self.emit(SirOp::Gep {
            dst,
            base,
            index,
            elem_bytes,
        });
        dst
    }

    // ── Vectors ──

    pub fn insert_element(&mut self, ty: Ty, vec: Reg, elem: Reg, index: Idx) -> Reg {
        let dst = self.fresh_reg();
        self.emit(SirOp::InsertElement {
            dst,
            vec,
            elem,
            index,
            ty,
        });
        dst
    }

    pub fn extract_element(&mut self, ty: Ty, vec: Reg, index: Idx) -> Reg {
        let dst = self.fresh_reg();
        self.emit(SirOp::ExtractElement {
            dst,
            vec,
            index,
            ty,
        });
        dst
    }

    /// Build a vector of type `ty` from scalar registers.
    pub fn build_vector(&mut self, ty: Ty, elems: &[Reg]) -> Reg {
        debug_assert_eq!(ty.len() as usize, elems.len());
        let mut vec = self.undef(ty.clone());
        for (i, &elem) in elems.iter().enumerate() {
            vec = self.insert_element(ty.clone(), vec, elem, Idx::Const(i as u32));
        }
        vec
    }

    /// Split a vector of type `ty` into scalar registers.
    pub fn split_vector(&mut self, ty: &Ty, vec: Reg) -> Vec<Reg> {
        (0..ty.len())
            .map(|i| self.extract_element(ty.clone(), vec, Idx::Const(i)))
            .collect()
    }

    // ── Memory ──

    pub fn load(&mut self, ty: Ty, addr: Reg, align: u32, ordering: Option<Ordering>) -> Reg {
        let dst = self.fresh_reg();
        self.emit(SirOp::Load {
            dst,
            addr,
            ty,
            align,
            ordering,
        });
        dst
    }

    pub fn store(&mut self, ty: Ty, src: Reg, addr: Reg, align: u32) {
        self.emit(SirOp::Store {
            addr,
            src,
            ty,
            align,
        });
    }

    pub fn atomic_rmw(&mut self, kind: RmwKind, ty: Ty, addr: Reg, val: Reg) -> Reg {
        let dst = self.fresh_reg();
        self.emit(SirOp::AtomicRmw {
            dst,
            kind,
            addr,
            val,
            ty,
            ordering: Ordering::AcqRel,
        });
        dst
    }

    /// Compare-and-swap with acquire-release success and monotonic failure
    /// ordering. Returns (old value, success flag).
    pub fn cmpxchg(&mut self, ty: Ty, addr: Reg, cmp: Reg, new: Reg) -> (Reg, Reg) {
        let dst_old = self.fresh_reg();
        let dst_ok = self.fresh_reg();
        self.emit(SirOp::CmpXchg {
            dst_old,
            dst_ok,
            addr,
            cmp,
            new,
            ty,
            success: Ordering::AcqRel,
            failure: Ordering::Monotonic,
        });
        (dst_old, dst_ok)
    }

    pub fn block_load(&mut self, ty: Ty, block: Block2d) -> Reg {
        let dst = self.fresh_reg();
        self.emit(SirOp::Block2dLoad { dst, ty, block });
        dst
    }

    pub fn block_store(&mut self, ty: Ty, src: Reg, block: Block2d) {
        self.emit(SirOp::Block2dStore { src, ty, block });
    }

    pub fn block_prefetch(&mut self, block: Block2d, cache: CacheControl) {
        self.emit(SirOp::Block2dPrefetch { block, cache });
    }

    pub fn barrier(&mut self) {
        self.emit(SirOp::Barrier);
    }

    // ── Structured helpers ──

    /// Predicated region: run `body` only on lanes where `pred` is true and
    /// merge its results with `defaults` on the other lanes.
    ///
    /// ```text
    ///     br pred, then, else
    /// then:
    ///     <body>
    ///     mv out_i, body_i
    ///     jmp end
    /// else:
    ///     mv out_i, default_i
    /// end:
    /// ```
    ///
    /// `body` must return exactly one register per default. With no
    /// defaults the else path is empty and the region is a pure guard.
    pub fn guarded<F>(&mut self, pred: Reg, defaults: &[Reg], body: F) -> Vec<Reg>
    where
        F: FnOnce(&mut Builder) -> Vec<Reg>,
    {
        let then_label = self.fresh_label("guard_then_");
        let else_label = self.fresh_label("guard_else_");
        let end_label = self.fresh_label("guard_end_");
        let outs: Vec<Reg> = defaults.iter().map(|_| self.fresh_reg()).collect();

        self.emit(SirOp::Branch {
            cond: pred,
            if_true: then_label.clone(),
            if_false: else_label.clone(),
        });

        self.emit(SirOp::LabelDef(then_label));
        let produced = body(self);
        debug_assert_eq!(produced.len(), defaults.len());
        for (&out, &value) in outs.iter().zip(&produced) {
            self.emit(SirOp::Move(out, value));
        }
        self.emit(SirOp::Jump(end_label.clone()));

        self.emit(SirOp::LabelDef(else_label));
        for (&out, &default) in outs.iter().zip(defaults) {
            self.emit(SirOp::Move(out, default));
        }
        self.emit(SirOp::LabelDef(end_label));
        outs
    }

    /// Split a linear index into per-dimension coordinates.
    ///
    /// `order[0]` is the fastest-varying dimension. Every dimension but the
    /// slowest is reduced modulo its extent; the slowest takes the rest.
    pub fn delinearize(&mut self, linear: Reg, shape: &[u32], order: &[u32]) -> Vec<Reg> {
        debug_assert_eq!(shape.len(), order.len());
        let rank = shape.len();
        let mut coords = vec![linear; rank];
        if rank == 0 {
            return coords;
        }
        let mut rest = linear;
        for (i, &dim) in order.iter().enumerate() {
            let dim = dim as usize;
            if i + 1 == rank {
                coords[dim] = rest;
                break;
            }
            let extent = self.i32(shape[dim]);
            coords[dim] = self.urem_i32(rest, extent);
            rest = self.udiv_i32(rest, extent);
        }
        coords
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_reg() {
        let mut b = Builder::new(10, 0);
        assert_eq!(b.fresh_reg(), Reg(10));
        assert_eq!(b.fresh_reg(), Reg(11));
        assert_eq!(b.next_reg(), 12);
    }

    #[test]
    fn test_fresh_label() {
        let mut b = Builder::new(0, 0);
        assert_eq!(b.fresh_label("then_"), Label::new("then_1"));
        assert_eq!(b.fresh_label("else_"), Label::new("else_2"));
        assert_eq!(b.next_label(), 2);
    }

    #[test]
    fn test_bitcast_same_type_is_identity() {
        let mut b = Builder::new(0, 0);
        let r = b.fresh_reg();
        assert_eq!(b.bitcast(r, Ty::i32(), Ty::i32()), r);
        assert!(b.ops().is_empty());
    }

    #[test]
    fn test_guarded_shape() {
        let mut b = Builder::new(0, 0);
        let pred = b.bool(true);
        let default = b.i32(7);
        let outs = b.guarded(pred, &[default], |b| vec![b.i32(9)]);
        assert_eq!(outs.len(), 1);

        let (ops, _, _) = b.finish();
        assert!(matches!(ops[2], SirOp::Branch { cond, .. } if cond == pred));
        let moves: Vec<_> = ops
            .iter()
            .filter_map(|op| match op {
                SirOp::Move(dst, src) => Some((*dst, *src)),
                _ => None,
            })
            .collect();
        assert_eq!(moves.len(), 2);
        assert!(moves.iter().all(|(dst, _)| *dst == outs[0]));
        assert!(moves.iter().any(|(_, src)| *src == default));
        assert!(matches!(ops.last(), Some(SirOp::LabelDef(l)) if l.0.starts_with("guard_end_")));
    }

    #[test]
    fn test_guarded_without_results() {
        let mut b = Builder::new(0, 0);
        let pred = b.bool(false);
        let outs = b.guarded(pred, &[], |b| {
            b.barrier();
            vec![]
        });
        assert!(outs.is_empty());
        assert!(b.ops().iter().any(|op| matches!(op, SirOp::Barrier)));
    }

    #[test]
    fn test_delinearize_op_count() {
        let mut b = Builder::new(0, 0);
        let lin = b.fresh_reg();
        let coords = b.delinearize(lin, &[4, 2, 8], &[2, 1, 0]);
        assert_eq!(coords.len(), 3);
        // Two reducing dimensions: const + urem + udiv each.
        assert_eq!(b.ops().len(), 6);
        assert_eq!(coords[2], Reg(2));
    }

    #[test]
    fn test_delinearize_scalar_rank_one() {
        let mut b = Builder::new(0, 0);
        let lin = b.fresh_reg();
        assert_eq!(b.delinearize(lin, &[16], &[0]), vec![lin]);
        assert!(b.ops().is_empty());
    }
}
