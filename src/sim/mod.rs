//! Lane-level SIR interpreter.
//!
//! Every lane of every CTA runs the program independently with its own
//! registers and program counter. A picker chooses which runnable lane
//! executes its next instruction, so tests can replay any interleaving of
//! the lanes. Global memory is shared by all CTAs; each CTA has its own
//! shared memory. Barriers hold a lane until every lane of its CTA has
//! arrived.
//!
//! 2-D block transfers are warp-collective in hardware. Here each lane
//! performs its own slice: the tile is flattened column-major and lane `l`
//! of the warp takes the `l`-th equal chunk, so lane `l` holds column `l`
//! whenever the tile is one warp wide.

pub mod memory;
pub mod value;

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;
use tracing::{debug, trace};

use crate::config::TargetConfig;
use crate::sir::{
    AddrSpace, BinOp, Block2d, CacheControl, CmpPred, FBinOp, Idx, Label, Reg, RmwKind, SirOp, Ty,
};

pub use memory::Memory;
pub use value::Val;

use value::{byte_len, decode_float, encode_float, mask, sign_extend};

/// Identity of one lane: CTA index in the cluster and thread index in the
/// CTA.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LaneId {
    pub cta: u32,
    pub tid: u32,
}

impl fmt::Display for LaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cta {} thread {}", self.cta, self.tid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimError {
    #[error("label '{0}' is defined twice")]
    DuplicateLabel(String),

    #[error("jump to undefined label '{0}'")]
    UnknownLabel(String),

    #[error("{lane}: register {reg} read before it was written")]
    UndefinedRegister { lane: LaneId, reg: Reg },

    #[error("{lane}: op {pc} expected {expected}, found {found}")]
    TypeMismatch {
        lane: LaneId,
        pc: usize,
        expected: &'static str,
        found: String,
    },

    #[error("{lane}: {space} address {addr:#x} is not {align}-byte aligned")]
    Misaligned {
        lane: LaneId,
        space: AddrSpace,
        addr: u64,
        align: u32,
    },

    #[error("{lane}: division by zero at op {pc}")]
    DivisionByZero { lane: LaneId, pc: usize },

    #[error("{lane}: vector index {index} out of range for length {len}")]
    IndexOutOfRange { lane: LaneId, index: u64, len: usize },

    #[error("{lane}: block tile gives {expected} bits per lane, value type has {found}")]
    BlockShape {
        lane: LaneId,
        expected: u64,
        found: u64,
    },

    #[error("deadlock: {waiting} lanes wait at a barrier that can never complete")]
    Deadlock { waiting: usize },

    #[error("step limit of {limit} exceeded")]
    StepLimit { limit: u64 },
}

/// A SIR op list with its labels resolved.
#[derive(Clone, Debug)]
pub struct Program {
    ops: Vec<SirOp>,
    labels: HashMap<String, usize>,
}

impl Program {
    pub fn new(ops: Vec<SirOp>) -> Result<Self, SimError> {
        let mut labels = HashMap::new();
        for (pc, op) in ops.iter().enumerate() {
            if let SirOp::LabelDef(label) = op {
                if labels.insert(label.0.clone(), pc).is_some() {
                    return Err(SimError::DuplicateLabel(label.0.clone()));
                }
            }
        }
        for op in &ops {
            let targets: Vec<&Label> = match op {
                SirOp::Branch {
                    if_true, if_false, ..
                } => vec![if_true, if_false],
                SirOp::Jump(label) => vec![label],
                _ => Vec::new(),
            };
            if let Some(missing) = targets.iter().find(|l| !labels.contains_key(&l.0)) {
                return Err(SimError::UnknownLabel(missing.0.clone()));
            }
        }
        Ok(Self { ops, labels })
    }

    pub fn ops(&self) -> &[SirOp] {
        &self.ops
    }

    fn target(&self, label: &Label) -> usize {
        // Every target was checked in `new`.
        self.labels.get(&label.0).copied().unwrap_or(self.ops.len())
    }
}

/// One warp leader's prefetch, with its payload resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrefetchRecord {
    pub cta: u32,
    pub warp: u32,
    pub base: u64,
    pub width_bytes: i64,
    pub height: i64,
    pub pitch_bytes: i64,
    /// In `elem_bits`-sized elements.
    pub x: i64,
    pub y: i64,
    pub elem_bits: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub cache: CacheControl,
}

/// Counters of one run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunStats {
    pub steps: u64,
    /// Barrier completions, summed over CTAs.
    pub barriers: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Status {
    Running,
    AtBarrier,
    Done,
}

#[derive(Clone, Debug)]
struct Lane {
    id: LaneId,
    pc: usize,
    status: Status,
    regs: HashMap<Reg, Val>,
}

/// Resolved 2-D block payload.
struct Tile {
    space: AddrSpace,
    base: u64,
    width: i64,
    height: i64,
    pitch: i64,
    x: i64,
    y: i64,
}

pub struct Machine {
    warp_size: u32,
    threads_per_cta: u32,
    step_limit: u64,
    lanes: Vec<Lane>,
    global: Memory,
    shared: Vec<Memory>,
    prefetches: Vec<PrefetchRecord>,
}

impl Machine {
    /// A machine shaped like one launch on `config`'s target.
    pub fn new(config: &TargetConfig) -> Self {
        let threads_per_cta = config.threads_per_cta();
        let lanes = (0..config.num_ctas)
            .flat_map(|cta| (0..threads_per_cta).map(move |tid| LaneId { cta, tid }))
            .map(|id| Lane {
                id,
                pc: 0,
                status: Status::Running,
                regs: HashMap::new(),
            })
            .collect();
        Self {
            warp_size: config.warp_size,
            threads_per_cta,
            step_limit: 1_000_000,
            lanes,
            global: Memory::new(),
            shared: vec![Memory::new(); config.num_ctas as usize],
            prefetches: Vec::new(),
        }
    }

    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = limit;
        self
    }

    pub fn lane_ids(&self) -> Vec<LaneId> {
        self.lanes.iter().map(|l| l.id).collect()
    }

    fn index(&self, lane: LaneId) -> usize {
        (lane.cta * self.threads_per_cta + lane.tid) as usize
    }

    pub fn set_reg(&mut self, lane: LaneId, reg: Reg, val: Val) {
        let i = self.index(lane);
        if let Some(l) = self.lanes.get_mut(i) {
            l.regs.insert(reg, val);
        }
    }

    /// Set `reg` in every lane to `f(lane)`.
    pub fn set_reg_with<F>(&mut self, reg: Reg, mut f: F)
    where
        F: FnMut(LaneId) -> Val,
    {
        for lane in &mut self.lanes {
            lane.regs.insert(reg, f(lane.id));
        }
    }

    pub fn reg(&self, lane: LaneId, reg: Reg) -> Option<&Val> {
        self.lanes.get(self.index(lane))?.regs.get(&reg)
    }

    pub fn global(&self) -> &Memory {
        &self.global
    }

    pub fn global_mut(&mut self) -> &mut Memory {
        &mut self.global
    }

    pub fn shared(&self, cta: u32) -> Option<&Memory> {
        self.shared.get(cta as usize)
    }

    pub fn prefetches(&self) -> &[PrefetchRecord] {
        &self.prefetches
    }

    /// Run to completion, picking lanes round-robin.
    pub fn run(&mut self, program: &Program) -> Result<RunStats, SimError> {
        let mut turn = 0usize;
        self.run_with(program, |runnable| {
            turn += 1;
            turn % runnable.len()
        })
    }

    /// Run to completion. `pick` receives the runnable lanes and returns
    /// the position of the one that executes next.
    pub fn run_with<F>(&mut self, program: &Program, mut pick: F) -> Result<RunStats, SimError>
    where
        F: FnMut(&[LaneId]) -> usize,
    {
        let end = program.ops.len();
        for lane in &mut self.lanes {
            lane.pc = 0;
            lane.status = if end == 0 {
                Status::Done
            } else {
                Status::Running
            };
        }

        let mut stats = RunStats::default();
        loop {
            let runnable: Vec<usize> = (0..self.lanes.len())
                .filter(|&i| self.lanes[i].status == Status::Running)
                .collect();
            if runnable.is_empty() {
                let waiting = self
                    .lanes
                    .iter()
                    .filter(|l| l.status == Status::AtBarrier)
                    .count();
                if waiting > 0 {
                    return Err(SimError::Deadlock { waiting });
                }
                debug!(steps = stats.steps, barriers = stats.barriers, "run finished");
                return Ok(stats);
            }
            if stats.steps >= self.step_limit {
                return Err(SimError::StepLimit {
                    limit: self.step_limit,
                });
            }

            let ids: Vec<LaneId> = runnable.iter().map(|&i| self.lanes[i].id).collect();
            let li = runnable[pick(&ids) % runnable.len()];
            self.step(program, li)?;
            stats.steps += 1;

            let lane = &mut self.lanes[li];
            if lane.status == Status::Running && lane.pc >= end {
                lane.status = Status::Done;
            }
            let cta = lane.id.cta;
            if lane.status != Status::Running && self.release_barrier(cta, end) {
                stats.barriers += 1;
            }
        }
    }

    /// Release the CTA's barrier once all of its lanes are waiting. Lanes
    /// whose barrier was the program's last op finish on release.
    fn release_barrier(&mut self, cta: u32, end: usize) -> bool {
        let members: Vec<&mut Lane> = self.lanes.iter_mut().filter(|l| l.id.cta == cta).collect();
        if members.is_empty() || !members.iter().all(|l| l.status == Status::AtBarrier) {
            return false;
        }
        for lane in members {
            lane.status = if lane.pc >= end {
                Status::Done
            } else {
                Status::Running
            };
        }
        trace!(cta, "barrier released");
        true
    }

    fn lane_id(&self, li: usize) -> LaneId {
        self.lanes[li].id
    }

    fn get(&self, li: usize, reg: Reg) -> Result<&Val, SimError> {
        self.lanes[li]
            .regs
            .get(&reg)
            .ok_or(SimError::UndefinedRegister {
                lane: self.lane_id(li),
                reg,
            })
    }

    fn set(&mut self, li: usize, reg: Reg, val: Val) {
        self.lanes[li].regs.insert(reg, val);
    }

    fn mismatch(&self, li: usize, expected: &'static str, found: &Val) -> SimError {
        SimError::TypeMismatch {
            lane: self.lane_id(li),
            pc: self.lanes[li].pc,
            expected,
            found: found.to_string(),
        }
    }

    fn scalar(&self, li: usize, reg: Reg) -> Result<(u32, u64), SimError> {
        match self.get(li, reg)? {
            Val::Scalar { width, bits } => Ok((*width, *bits)),
            other => Err(self.mismatch(li, "a scalar", other)),
        }
    }

    fn pointer(&self, li: usize, reg: Reg) -> Result<(AddrSpace, u64), SimError> {
        match self.get(li, reg)? {
            Val::Ptr { space, addr } => Ok((*space, *addr)),
            other => Err(self.mismatch(li, "a pointer", other)),
        }
    }

    fn vector(&self, li: usize, reg: Reg) -> Result<(u32, Vec<u64>), SimError> {
        match self.get(li, reg)? {
            Val::Vector { elem_bits, elems } => Ok((*elem_bits, elems.clone())),
            other => Err(self.mismatch(li, "a vector", other)),
        }
    }

    fn index_of(&self, li: usize, index: Idx, len: usize) -> Result<usize, SimError> {
        let index = match index {
            Idx::Const(i) => i as u64,
            Idx::Reg(reg) => self.scalar(li, reg)?.1,
        };
        if index < len as u64 {
            Ok(index as usize)
        } else {
            Err(SimError::IndexOutOfRange {
                lane: self.lane_id(li),
                index,
                len,
            })
        }
    }

    fn memory(&self, space: AddrSpace, li: usize) -> &Memory {
        match space {
            AddrSpace::Global => &self.global,
            AddrSpace::Shared => &self.shared[self.lanes[li].id.cta as usize],
        }
    }

    fn memory_mut(&mut self, space: AddrSpace, li: usize) -> &mut Memory {
        match space {
            AddrSpace::Global => &mut self.global,
            AddrSpace::Shared => {
                let cta = self.lanes[li].id.cta as usize;
                &mut self.shared[cta]
            }
        }
    }

    /// Resolve an address operand and check its alignment.
    fn address(&self, li: usize, reg: Reg, align: u32) -> Result<(AddrSpace, u64), SimError> {
        let (space, addr) = self.pointer(li, reg)?;
        if align > 1 && addr % align as u64 != 0 {
            return Err(SimError::Misaligned {
                lane: self.lane_id(li),
                space,
                addr,
                align,
            });
        }
        Ok((space, addr))
    }

    fn read(&self, li: usize, space: AddrSpace, addr: u64, ty: &Ty) -> Val {
        Val::from_bytes(ty, &self.memory(space, li).read(addr, byte_len(ty)))
    }

    fn write(&mut self, li: usize, space: AddrSpace, addr: u64, ty: &Ty, val: &Val) {
        let mut bytes = val.to_bytes(ty);
        bytes.resize(byte_len(ty), 0);
        self.memory_mut(space, li).write(addr, &bytes);
    }

    fn step(&mut self, program: &Program, li: usize) -> Result<(), SimError> {
        let pc = self.lanes[li].pc;
        let LaneId { cta, tid } = self.lane_id(li);
        let mut next = pc + 1;

        match &program.ops[pc] {
            SirOp::Const { dst, ty, bits } => {
                let val = match ty {
                    Ty::Ptr(space) => Val::Ptr {
                        space: *space,
                        addr: *bits,
                    },
                    _ => Val::int(ty.bits(), *bits),
                };
                self.set(li, *dst, val);
            }
            SirOp::Zero { dst, ty } | SirOp::Undef { dst, ty } => {
                self.set(li, *dst, Val::zero(ty));
            }
            SirOp::ThreadId(dst) => self.set(li, *dst, Val::i32(tid)),
            SirOp::ClusterCtaId(dst) => self.set(li, *dst, Val::i32(cta)),
            SirOp::SharedBase(dst) => self.set(
                li,
                *dst,
                Val::Ptr {
                    space: AddrSpace::Shared,
                    addr: 0,
                },
            ),
            SirOp::Bin {
                op,
                dst,
                lhs,
                rhs,
                ty,
            } => {
                let (_, a) = self.scalar(li, *lhs)?;
                let (_, b) = self.scalar(li, *rhs)?;
                let r = match op {
                    BinOp::Add => a.wrapping_add(b),
                    BinOp::Sub => a.wrapping_sub(b),
                    BinOp::Mul => a.wrapping_mul(b),
                    BinOp::UDiv | BinOp::URem if b == 0 => {
                        return Err(SimError::DivisionByZero {
                            lane: self.lane_id(li),
                            pc,
                        })
                    }
                    BinOp::UDiv => a / b,
                    BinOp::URem => a % b,
                    BinOp::And => a & b,
                    BinOp::Or => a | b,
                    BinOp::Xor => a ^ b,
                    BinOp::Shl => u32::try_from(b)
                        .ok()
                        .and_then(|s| a.checked_shl(s))
                        .unwrap_or(0),
                    BinOp::LShr => u32::try_from(b)
                        .ok()
                        .and_then(|s| a.checked_shr(s))
                        .unwrap_or(0),
                };
                self.set(li, *dst, Val::int(ty.bits(), r));
            }
            SirOp::FBin {
                op,
                dst,
                lhs,
                rhs,
                ty,
            } => {
                let (_, a) = self.scalar(li, *lhs)?;
                let (_, b) = self.scalar(li, *rhs)?;
                let (a, b) = match (decode_float(ty, a), decode_float(ty, b)) {
                    (Some(a), Some(b)) => (a, b),
                    _ => return Err(self.mismatch(li, "a float type", &Val::zero(ty))),
                };
                self.set(li, *dst, Val::int(ty.bits(), encode_float(ty, fbin(*op, a, b))));
            }
            SirOp::ICmp {
                pred,
                dst,
                lhs,
                rhs,
                ty,
            } => {
                let width = ty.bits();
                let (_, a) = self.scalar(li, *lhs)?;
                let (_, b) = self.scalar(li, *rhs)?;
                let (a, b) = (mask(a, width), mask(b, width));
                let r = match pred {
                    CmpPred::Eq => a == b,
                    CmpPred::Ne => a != b,
                    CmpPred::Ult => a < b,
                    CmpPred::Slt => sign_extend(a, width) < sign_extend(b, width),
                };
                self.set(li, *dst, Val::i1(r));
            }
            SirOp::Trunc { dst, src, to } | SirOp::ZExt { dst, src, to, .. } => {
                let (_, bits) = self.scalar(li, *src)?;
                self.set(li, *dst, Val::int(to.bits(), bits));
            }
            SirOp::SExt { dst, src, from, to } => {
                let (_, bits) = self.scalar(li, *src)?;
                let wide = sign_extend(bits, from.bits()) as u64;
                self.set(li, *dst, Val::int(to.bits(), wide));
            }
            SirOp::Bitcast { dst, src, from, to } => {
                let val = self.get(li, *src)?;
                if byte_len(from) != byte_len(to) {
                    return Err(self.mismatch(li, "a bitcast of equal width", val));
                }
                let cast = Val::from_bytes(to, &val.to_bytes(from));
                self.set(li, *dst, cast);
            }
            SirOp::PtrToInt { dst, src } => {
                let (_, addr) = self.pointer(li, *src)?;
                self.set(li, *dst, Val::i64(addr));
            }
            SirOp::IntToPtr { dst, src, space } => {
                let (_, addr) = self.scalar(li, *src)?;
                self.set(
                    li,
                    *dst,
                    Val::Ptr {
                        space: *space,
                        addr,
                    },
                );
            }
            SirOp::Gep {
                dst,
                base,
                index,
                elem_bytes,
            } => {
                let (space, addr) = self.pointer(li, *base)?;
                let (width, bits) = self.scalar(li, *index)?;
                let offset = sign_extend(bits, width).wrapping_mul(*elem_bytes as i64);
                let addr = addr.wrapping_add(offset as u64);
                self.set(li, *dst, Val::Ptr { space, addr });
            }
            SirOp::InsertElement {
                dst,
                vec,
                elem,
                index,
                ..
            } => {
                let (elem_bits, mut elems) = self.vector(li, *vec)?;
                let (_, bits) = self.scalar(li, *elem)?;
                let i = self.index_of(li, *index, elems.len())?;
                elems[i] = mask(bits, elem_bits);
                self.set(li, *dst, Val::Vector { elem_bits, elems });
            }
            SirOp::ExtractElement {
                dst, vec, index, ..
            } => {
                let (elem_bits, elems) = self.vector(li, *vec)?;
                let i = self.index_of(li, *index, elems.len())?;
                self.set(li, *dst, Val::int(elem_bits, elems[i]));
            }
            SirOp::Load {
                dst,
                addr,
                ty,
                align,
                ..
            } => {
                let (space, at) = self.address(li, *addr, *align)?;
                let val = self.read(li, space, at, ty);
                self.set(li, *dst, val);
            }
            SirOp::Store {
                addr,
                src,
                ty,
                align,
            } => {
                let (space, at) = self.address(li, *addr, *align)?;
                let val = self.get(li, *src)?.clone();
                self.write(li, space, at, ty, &val);
            }
            SirOp::AtomicRmw {
                dst,
                kind,
                addr,
                val,
                ty,
                ..
            } => {
                let (space, at) = self.address(li, *addr, ty.bits() / 8)?;
                let (_, operand) = self.scalar(li, *val)?;
                let old = self.read(li, space, at, ty).bits().unwrap_or(0);
                let new = rmw(*kind, ty, old, mask(operand, ty.bits()));
                self.write(li, space, at, ty, &Val::int(ty.bits(), new));
                self.set(li, *dst, Val::int(ty.bits(), old));
            }
            SirOp::CmpXchg {
                dst_old,
                dst_ok,
                addr,
                cmp,
                new,
                ty,
                ..
            } => {
                let (space, at) = self.address(li, *addr, ty.bits() / 8)?;
                let (_, expected) = self.scalar(li, *cmp)?;
                let (_, desired) = self.scalar(li, *new)?;
                let old = self.read(li, space, at, ty).bits().unwrap_or(0);
                let ok = old == mask(expected, ty.bits());
                if ok {
                    self.write(li, space, at, ty, &Val::int(ty.bits(), desired));
                }
                self.set(li, *dst_old, Val::int(ty.bits(), old));
                self.set(li, *dst_ok, Val::i1(ok));
            }
            SirOp::Block2dLoad { dst, ty, block } => {
                let tile = self.tile(li, block)?;
                let elem_bytes = (block.elem_bits / 8) as usize;
                let mut bytes = Vec::new();
                for (row, col) in self.lane_slice(li, block, ty)? {
                    match tile.element_addr(row, col, elem_bytes) {
                        Some(at) => bytes.extend(self.memory(tile.space, li).read(at, elem_bytes)),
                        None => bytes.resize(bytes.len() + elem_bytes, 0),
                    }
                }
                self.set(li, *dst, Val::from_bytes(ty, &bytes));
            }
            SirOp::Block2dStore { src, ty, block } => {
                let tile = self.tile(li, block)?;
                let elem_bytes = (block.elem_bits / 8) as usize;
                let bytes = self.get(li, *src)?.to_bytes(ty);
                let slice = self.lane_slice(li, block, ty)?;
                for ((row, col), chunk) in slice.into_iter().zip(bytes.chunks(elem_bytes)) {
                    if let Some(at) = tile.element_addr(row, col, elem_bytes) {
                        self.memory_mut(tile.space, li).write(at, chunk);
                    }
                }
            }
            SirOp::Block2dPrefetch { block, cache } => {
                if tid % self.warp_size == 0 {
                    let tile = self.tile(li, block)?;
                    self.prefetches.push(PrefetchRecord {
                        cta,
                        warp: tid / self.warp_size,
                        base: tile.base,
                        width_bytes: tile.width,
                        height: tile.height,
                        pitch_bytes: tile.pitch,
                        x: tile.x,
                        y: tile.y,
                        elem_bits: block.elem_bits,
                        tile_width: block.tile_width,
                        tile_height: block.tile_height,
                        cache: *cache,
                    });
                }
            }
            SirOp::Barrier => {
                self.lanes[li].status = Status::AtBarrier;
            }
            SirOp::Move(dst, src) => {
                let val = self.get(li, *src)?.clone();
                self.set(li, *dst, val);
            }
            SirOp::Branch {
                cond,
                if_true,
                if_false,
            } => {
                let (_, bits) = self.scalar(li, *cond)?;
                next = program.target(if bits != 0 { if_true } else { if_false });
            }
            SirOp::Jump(label) => next = program.target(label),
            SirOp::LabelDef(_) | SirOp::Comment(_) => {}
        }

        self.lanes[li].pc = next;
        Ok(())
    }

    fn tile(&self, li: usize, block: &Block2d) -> Result<Tile, SimError> {
        let (space, base) = self.pointer(li, block.base)?;
        let signed = |reg: Reg| -> Result<i64, SimError> {
            let (width, bits) = self.scalar(li, reg)?;
            Ok(sign_extend(bits, width))
        };
        Ok(Tile {
            space,
            base,
            width: signed(block.base_width)?,
            height: signed(block.base_height)?,
            pitch: signed(block.base_pitch)?,
            x: signed(block.x)?,
            y: signed(block.y)?,
        })
    }

    /// Tile coordinates (row, col) of this lane's elements, in register
    /// order.
    fn lane_slice(&self, li: usize, block: &Block2d, ty: &Ty) -> Result<Vec<(u32, u32)>, SimError> {
        let total = block.tile_elems();
        let per_lane = total / self.warp_size;
        let expected = per_lane as u64 * block.elem_bits as u64;
        let found = byte_len(ty) as u64 * 8;
        if total % self.warp_size != 0 || block.elem_bits % 8 != 0 || expected != found {
            return Err(SimError::BlockShape {
                lane: self.lane_id(li),
                expected,
                found,
            });
        }
        let lane = self.lanes[li].id.tid % self.warp_size;
        let rows = block.tile_height;
        let cols = block.tile_width * block.v_blocks;
        Ok((0..per_lane)
            .map(|k| {
                let e = lane * per_lane + k;
                if block.transpose {
                    (e / cols, e % cols)
                } else {
                    (e % rows, e / rows)
                }
            })
            .collect())
    }
}

impl Tile {
    /// Address of tile element (row, col), or `None` when it falls outside
    /// the surface.
    fn element_addr(&self, row: u32, col: u32, elem_bytes: usize) -> Option<u64> {
        let eb = elem_bytes as i64;
        let y = self.y + row as i64;
        let x = self.x + col as i64;
        if y < 0 || y >= self.height || x < 0 || (x + 1) * eb > self.width {
            return None;
        }
        Some(self.base.wrapping_add((y * self.pitch + x * eb) as u64))
    }
}

fn fbin(op: FBinOp, a: f64, b: f64) -> f64 {
    match op {
        FBinOp::Add => a + b,
        _ if a.is_nan() || b.is_nan() => f64::NAN,
        FBinOp::Maximum => a.max(b),
        FBinOp::Minimum => a.min(b),
    }
}

fn rmw(kind: RmwKind, ty: &Ty, old: u64, val: u64) -> u64 {
    let width = ty.bits();
    let r = match kind {
        RmwKind::And => old & val,
        RmwKind::Or => old | val,
        RmwKind::Xor => old ^ val,
        RmwKind::Add => old.wrapping_add(val),
        RmwKind::FAdd => match (decode_float(ty, old), decode_float(ty, val)) {
            (Some(a), Some(b)) => encode_float(ty, a + b),
            // Integer-typed fadd adds the bit patterns.
            _ => old.wrapping_add(val),
        },
        RmwKind::Max => {
            if sign_extend(val, width) > sign_extend(old, width) {
                val
            } else {
                old
            }
        }
        RmwKind::Min => {
            if sign_extend(val, width) < sign_extend(old, width) {
                val
            } else {
                old
            }
        }
        RmwKind::UMax => old.max(val),
        RmwKind::UMin => old.min(val),
        RmwKind::Xchg => val,
    };
    mask(r, width)
}
