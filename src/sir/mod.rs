//! SIR: SIMT Intermediate Representation.
//!
//! The per-lane instruction stream the memory lowerings produce. Every lane
//! of every warp runs the same stream; lanes differ only in the values of
//! `thread_id`/`cluster_cta_id` and in the operand registers they start
//! with.
//!
//! Shape follows a classic register-machine LIR:
//!   - Explicit virtual registers (`Reg`), mutable per lane (not SSA), so a
//!     merge point is a `Move` into a shared destination on every path
//!   - Flat control flow: `Branch`/`Jump`/`LabelDef`
//!   - Typed operations where the bit layout matters (casts, vectors,
//!     memory), untyped `Move`
//!
//! Besides the generic integer/float/vector/memory ops, SIR carries the
//! target primitives the lowerings need: 2-D block load/store/prefetch,
//! atomic read-modify-write, compare-and-swap and the CTA barrier.

pub mod builder;

use std::fmt;

pub use builder::Builder;

// ─── Virtual Register ─────────────────────────────────────────────

/// A virtual register. Each lane has its own copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Reg(pub u32);

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

// ─── Label ────────────────────────────────────────────────────────

/// A control-flow label for flat branch/jump targets.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label(pub String);

impl Label {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─── Types ────────────────────────────────────────────────────────

/// Memory address space of a pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddrSpace {
    Global,
    /// CTA-local scratch memory.
    Shared,
}

impl fmt::Display for AddrSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddrSpace::Global => write!(f, "global"),
            AddrSpace::Shared => write!(f, "shared"),
        }
    }
}

/// Value types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Ty {
    /// Integer of the given bit width (1, 8, 16, 32, 64).
    Int(u32),
    F16,
    BF16,
    F32,
    F64,
    Ptr(AddrSpace),
    /// Fixed-length vector of scalars.
    Vector(Box<Ty>, u32),
}

impl Ty {
    pub fn i1() -> Self {
        Ty::Int(1)
    }

    pub fn i8() -> Self {
        Ty::Int(8)
    }

    pub fn i16() -> Self {
        Ty::Int(16)
    }

    pub fn i32() -> Self {
        Ty::Int(32)
    }

    pub fn i64() -> Self {
        Ty::Int(64)
    }

    pub fn vector(elem: Ty, len: u32) -> Self {
        Ty::Vector(Box::new(elem), len)
    }

    /// Total width in bits. Pointers are 64-bit.
    pub fn bits(&self) -> u32 {
        match self {
            Ty::Int(bits) => *bits,
            Ty::F16 | Ty::BF16 => 16,
            Ty::F32 => 32,
            Ty::F64 => 64,
            Ty::Ptr(_) => 64,
            Ty::Vector(elem, len) => elem.bits() * len,
        }
    }

    /// Scalar element type (the type itself for scalars).
    pub fn elem(&self) -> &Ty {
        match self {
            Ty::Vector(elem, _) => elem,
            other => other,
        }
    }

    /// Number of scalar lanes (1 for scalars).
    pub fn len(&self) -> u32 {
        match self {
            Ty::Vector(_, len) => *len,
            _ => 1,
        }
    }

    pub fn is_vector(&self) -> bool {
        matches!(self, Ty::Vector(..))
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Ty::F16 | Ty::BF16 | Ty::F32 | Ty::F64)
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Int(bits) => write!(f, "i{}", bits),
            Ty::F16 => write!(f, "f16"),
            Ty::BF16 => write!(f, "bf16"),
            Ty::F32 => write!(f, "f32"),
            Ty::F64 => write!(f, "f64"),
            Ty::Ptr(space) => write!(f, "ptr<{}>", space),
            Ty::Vector(elem, len) => write!(f, "<{} x {}>", len, elem),
        }
    }
}

// ─── Operation kinds ──────────────────────────────────────────────

/// Integer binary operations. Division and shifts are unsigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    UDiv,
    URem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::UDiv => "udiv",
            BinOp::URem => "urem",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
            BinOp::Shl => "shl",
            BinOp::LShr => "lshr",
        };
        write!(f, "{}", s)
    }
}

/// Floating-point binary operations. `Maximum`/`Minimum` propagate NaN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FBinOp {
    Add,
    Maximum,
    Minimum,
}

impl fmt::Display for FBinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FBinOp::Add => "fadd",
            FBinOp::Maximum => "fmaximum",
            FBinOp::Minimum => "fminimum",
        };
        write!(f, "{}", s)
    }
}

/// Integer comparison predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpPred {
    Eq,
    Ne,
    Slt,
    Ult,
}

impl fmt::Display for CmpPred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpPred::Eq => "eq",
            CmpPred::Ne => "ne",
            CmpPred::Slt => "slt",
            CmpPred::Ult => "ult",
        };
        write!(f, "{}", s)
    }
}

/// Atomic memory ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ordering {
    Monotonic,
    Acquire,
    Release,
    AcqRel,
}

impl fmt::Display for Ordering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Ordering::Monotonic => "monotonic",
            Ordering::Acquire => "acquire",
            Ordering::Release => "release",
            Ordering::AcqRel => "acq_rel",
        };
        write!(f, "{}", s)
    }
}

/// Hardware atomic read-modify-write operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RmwKind {
    And,
    Or,
    Xor,
    Add,
    FAdd,
    Max,
    UMax,
    Min,
    UMin,
    Xchg,
}

impl fmt::Display for RmwKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RmwKind::And => "and",
            RmwKind::Or => "or",
            RmwKind::Xor => "xor",
            RmwKind::Add => "add",
            RmwKind::FAdd => "fadd",
            RmwKind::Max => "max",
            RmwKind::UMax => "umax",
            RmwKind::Min => "min",
            RmwKind::UMin => "umin",
            RmwKind::Xchg => "xchg",
        };
        write!(f, "{}", s)
    }
}

/// Vector lane index: compile-time constant or a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Idx {
    Const(u32),
    Reg(Reg),
}

impl fmt::Display for Idx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Idx::Const(i) => write!(f, "{}", i),
            Idx::Reg(r) => write!(f, "{}", r),
        }
    }
}

/// Cache policy of a block prefetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheControl {
    Default,
    /// Cached in L1 and L3.
    L1CachedL3Cached,
}

impl fmt::Display for CacheControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheControl::Default => write!(f, "default"),
            CacheControl::L1CachedL3Cached => write!(f, "l1c_l3c"),
        }
    }
}

/// Payload of a 2-D block transfer. Registers are warp-uniform.
///
/// `base_width` and `base_pitch` are in bytes, `base_height` in rows;
/// `x` is in `elem_bits`-sized elements, `y` in rows. The tile is
/// `tile_height` rows of `tile_width * v_blocks` elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block2d {
    pub base: Reg,
    pub base_width: Reg,
    pub base_height: Reg,
    pub base_pitch: Reg,
    pub x: Reg,
    pub y: Reg,
    pub elem_bits: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub v_blocks: u32,
    pub transpose: bool,
    pub vnni: bool,
}

impl Block2d {
    /// Number of tile elements, over all vertical blocks.
    pub fn tile_elems(&self) -> u32 {
        self.tile_width * self.tile_height * self.v_blocks
    }
}

impl fmt::Display for Block2d {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] w={} h={} pitch={} x={} y={} elem={} tile={}x{} vblocks={}",
            self.base,
            self.base_width,
            self.base_height,
            self.base_pitch,
            self.x,
            self.y,
            self.elem_bits,
            self.tile_width,
            self.tile_height,
            self.v_blocks
        )?;
        if self.transpose {
            write!(f, " transpose")?;
        }
        if self.vnni {
            write!(f, " vnni")?;
        }
        Ok(())
    }
}

// ─── SIR Operations ───────────────────────────────────────────────

/// One SIR operation.
#[derive(Debug, Clone, PartialEq)]
pub enum SirOp {
    // ── Values ──
    /// Scalar constant; `bits` holds the raw bit pattern.
    Const { dst: Reg, ty: Ty, bits: u64 },
    /// All-zero value of any type.
    Zero { dst: Reg, ty: Ty },
    /// Value with unspecified contents, to be filled by `InsertElement`.
    Undef { dst: Reg, ty: Ty },

    // ── Lane identity ──
    /// Linear thread index within the CTA.
    ThreadId(Reg),
    /// Linear CTA index within the cluster.
    ClusterCtaId(Reg),
    /// Base pointer of the CTA's scratch memory.
    SharedBase(Reg),

    // ── Arithmetic ──
    Bin {
        op: BinOp,
        dst: Reg,
        lhs: Reg,
        rhs: Reg,
        ty: Ty,
    },
    FBin {
        op: FBinOp,
        dst: Reg,
        lhs: Reg,
        rhs: Reg,
        ty: Ty,
    },
    /// dst: i1 = lhs <pred> rhs
    ICmp {
        pred: CmpPred,
        dst: Reg,
        lhs: Reg,
        rhs: Reg,
        ty: Ty,
    },

    // ── Casts ──
    Trunc { dst: Reg, src: Reg, to: Ty },
    ZExt { dst: Reg, src: Reg, from: Ty, to: Ty },
    SExt { dst: Reg, src: Reg, from: Ty, to: Ty },
    /// Reinterpret the bits of `src` (equal total width).
    Bitcast { dst: Reg, src: Reg, from: Ty, to: Ty },
    PtrToInt { dst: Reg, src: Reg },
    IntToPtr { dst: Reg, src: Reg, space: AddrSpace },
    /// dst = base + index * elem_bytes
    Gep {
        dst: Reg,
        base: Reg,
        index: Reg,
        elem_bytes: u32,
    },

    // ── Vectors ──
    InsertElement {
        dst: Reg,
        vec: Reg,
        elem: Reg,
        index: Idx,
        ty: Ty,
    },
    ExtractElement {
        dst: Reg,
        vec: Reg,
        index: Idx,
        ty: Ty,
    },

    // ── Memory ──
    /// dst = mem[addr]; atomic when `ordering` is set.
    Load {
        dst: Reg,
        addr: Reg,
        ty: Ty,
        align: u32,
        ordering: Option<Ordering>,
    },
    Store {
        addr: Reg,
        src: Reg,
        ty: Ty,
        align: u32,
    },
    /// dst = old value; mem[addr] = kind(old, val)
    AtomicRmw {
        dst: Reg,
        kind: RmwKind,
        addr: Reg,
        val: Reg,
        ty: Ty,
        ordering: Ordering,
    },
    /// (dst_old, dst_ok) = cmpxchg(mem[addr], cmp, new)
    CmpXchg {
        dst_old: Reg,
        dst_ok: Reg,
        addr: Reg,
        cmp: Reg,
        new: Reg,
        ty: Ty,
        success: Ordering,
        failure: Ordering,
    },

    // ── 2-D block transfers (warp-collective) ──
    Block2dLoad { dst: Reg, ty: Ty, block: Block2d },
    Block2dStore { src: Reg, ty: Ty, block: Block2d },
    Block2dPrefetch { block: Block2d, cache: CacheControl },

    // ── Synchronization ──
    /// CTA-wide barrier.
    Barrier,

    // ── Control flow ──
    Move(Reg, Reg),
    LabelDef(Label),
    /// If `cond` is nonzero jump to `if_true`, else to `if_false`.
    Branch {
        cond: Reg,
        if_true: Label,
        if_false: Label,
    },
    Jump(Label),

    // ── Passthrough ──
    Comment(String),
}

impl SirOp {
    /// True for operations with an externally visible memory effect.
    pub fn has_memory_effect(&self) -> bool {
        matches!(
            self,
            SirOp::Store { .. }
                | SirOp::AtomicRmw { .. }
                | SirOp::CmpXchg { .. }
                | SirOp::Block2dStore { .. }
                | SirOp::Block2dPrefetch { .. }
        )
    }
}

// ─── Display ──────────────────────────────────────────────────────

impl fmt::Display for SirOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SirOp::Const { dst, ty, bits } => write!(f, "{} = const {} {}", dst, ty, bits),
            SirOp::Zero { dst, ty } => write!(f, "{} = zero {}", dst, ty),
            SirOp::Undef { dst, ty } => write!(f, "{} = undef {}", dst, ty),
            SirOp::ThreadId(dst) => write!(f, "{} = thread_id", dst),
            SirOp::ClusterCtaId(dst) => write!(f, "{} = cluster_cta_id", dst),
            SirOp::SharedBase(dst) => write!(f, "{} = shared_base", dst),
            SirOp::Bin {
                op,
                dst,
                lhs,
                rhs,
                ty,
            } => write!(f, "{} = {} {} {}, {}", dst, op, ty, lhs, rhs),
            SirOp::FBin {
                op,
                dst,
                lhs,
                rhs,
                ty,
            } => write!(f, "{} = {} {} {}, {}", dst, op, ty, lhs, rhs),
            SirOp::ICmp {
                pred,
                dst,
                lhs,
                rhs,
                ty,
            } => write!(f, "{} = icmp {} {} {}, {}", dst, pred, ty, lhs, rhs),
            SirOp::Trunc { dst, src, to } => write!(f, "{} = trunc {} to {}", dst, src, to),
            SirOp::ZExt { dst, src, from, to } => {
                write!(f, "{} = zext {} {} to {}", dst, from, src, to)
            }
            SirOp::SExt { dst, src, from, to } => {
                write!(f, "{} = sext {} {} to {}", dst, from, src, to)
            }
            SirOp::Bitcast { dst, src, from, to } => {
                write!(f, "{} = bitcast {} {} to {}", dst, from, src, to)
            }
            SirOp::PtrToInt { dst, src } => write!(f, "{} = ptrtoint {}", dst, src),
            SirOp::IntToPtr { dst, src, space } => {
                write!(f, "{} = inttoptr {} to ptr<{}>", dst, src, space)
            }
            SirOp::Gep {
                dst,
                base,
                index,
                elem_bytes,
            } => write!(f, "{} = gep {}[{} x {}]", dst, base, index, elem_bytes),
            SirOp::InsertElement {
                dst,
                vec,
                elem,
                index,
                ty,
            } => write!(f, "{} = insertelement {} {}, {}[{}]", dst, ty, vec, elem, index),
            SirOp::ExtractElement {
                dst,
                vec,
                index,
                ty,
            } => write!(f, "{} = extractelement {} {}[{}]", dst, ty, vec, index),
            SirOp::Load {
                dst,
                addr,
                ty,
                align,
                ordering,
            } => {
                write!(f, "{} = load {} [{}] align {}", dst, ty, addr, align)?;
                if let Some(ordering) = ordering {
                    write!(f, " {}", ordering)?;
                }
                Ok(())
            }
            SirOp::Store {
                addr,
                src,
                ty,
                align,
            } => write!(f, "store {} {}, [{}] align {}", ty, src, addr, align),
            SirOp::AtomicRmw {
                dst,
                kind,
                addr,
                val,
                ty,
                ordering,
            } => write!(
                f,
                "{} = atomicrmw {} {} [{}], {} {}",
                dst, kind, ty, addr, val, ordering
            ),
            SirOp::CmpXchg {
                dst_old,
                dst_ok,
                addr,
                cmp,
                new,
                ty,
                success,
                failure,
            } => write!(
                f,
                "{}, {} = cmpxchg {} [{}], {}, {} {} {}",
                dst_old, dst_ok, ty, addr, cmp, new, success, failure
            ),
            SirOp::Block2dLoad { dst, ty, block } => {
                write!(f, "{} = block2d.load {} {}", dst, ty, block)
            }
            SirOp::Block2dStore { src, ty, block } => {
                write!(f, "block2d.store {} {}, {}", ty, src, block)
            }
            SirOp::Block2dPrefetch { block, cache } => {
                write!(f, "block2d.prefetch {} cache={}", block, cache)
            }
            SirOp::Barrier => write!(f, "barrier"),
            SirOp::Move(dst, src) => write!(f, "mv {}, {}", dst, src),
            SirOp::LabelDef(label) => write!(f, "{}:", label),
            SirOp::Branch {
                cond,
                if_true,
                if_false,
            } => write!(f, "br {}, {}, {}", cond, if_true, if_false),
            SirOp::Jump(label) => write!(f, "jmp {}", label),
            SirOp::Comment(text) => write!(f, "// {}", text),
        }
    }
}

/// Render a program as text, one op per line; labels flush left.
pub fn to_text(ops: &[SirOp]) -> String {
    let mut out = String::new();
    for op in ops {
        match op {
            SirOp::LabelDef(_) => out.push_str(&format!("{}\n", op)),
            _ => out.push_str(&format!("    {}\n", op)),
        }
    }
    out
}

// ─── Tests ────────────────────────────────────────────────────────
