#![allow(dead_code)]

use simt_lower::layout::{BlockedLayout, Layout};
use simt_lower::lower::{HlOp, LoweredModule, MemOp, Value, ValueId};
use simt_lower::sim::{LaneId, Machine, Program, RunStats, Val};
use simt_lower::sir::Reg;
use simt_lower::span::Span;
use simt_lower::types::{ElemType, TensorType, ValueType};

/// Base address of the input region.
pub const SRC: u64 = 0x1_0000;
/// Base address of the output region.
pub const DST: u64 = 0x2_0000;

/// Shape of a 1-D blocked layout.
#[derive(Clone, Copy, Debug)]
pub struct Grid1d {
    pub len: u32,
    pub spt: u32,
    pub tpw: u32,
    pub wpc: u32,
}

impl Grid1d {
    pub fn new(len: u32, spt: u32, tpw: u32, wpc: u32) -> Self {
        Self { len, spt, tpw, wpc }
    }

    pub fn ty(&self, elem: ElemType) -> ValueType {
        let layout = Layout::Blocked(BlockedLayout::new(
            vec![self.spt],
            vec![self.tpw],
            vec![self.wpc],
        ));
        ValueType::Tensor(TensorType::new(vec![self.len], elem, layout))
    }

    /// Logical index of the `k`-th element held by thread `tid`.
    pub fn index(&self, tid: u32, k: usize) -> u64 {
        let k = k as u32;
        let tile = self.spt * self.tpw * self.wpc;
        let (warp, lane) = (tid / self.tpw, tid % self.tpw);
        let idx = (k / self.spt) * tile + (warp * self.tpw + lane) * self.spt + k % self.spt;
        (idx % self.len) as u64
    }
}

/// Registers `first..first + n`.
pub fn regs(first: u32, n: usize) -> Vec<Reg> {
    (first..first + n as u32).map(Reg).collect()
}

pub fn value(id: u32, ty: ValueType, regs: Vec<Reg>) -> Value {
    Value::new(ValueId(id), ty, regs)
}

pub fn op(op: MemOp) -> HlOp {
    HlOp::new(op, Span::dummy())
}

/// Bind `regs` in every lane to `f(lane, element)`.
pub fn bind<F>(m: &mut Machine, regs: &[Reg], mut f: F)
where
    F: FnMut(LaneId, usize) -> Val,
{
    for (k, &reg) in regs.iter().enumerate() {
        m.set_reg_with(reg, |lane| f(lane, k));
    }
}

/// Per-lane element addresses of a 1-D tensor at `base`.
pub fn bind_addresses(m: &mut Machine, regs: &[Reg], grid: Grid1d, base: u64, elem_bytes: u64) {
    bind(m, regs, |lane, k| Val::global(base + grid.index(lane.tid, k) * elem_bytes));
}

/// Execute a lowered module, round-robin.
pub fn run(module: &LoweredModule, m: &mut Machine) -> RunStats {
    let program = Program::new(module.ops.clone()).expect("labels resolve");
    m.run(&program).expect("program runs")
}

/// Execute a lowered module with a caller-supplied lane picker.
pub fn run_with<F>(module: &LoweredModule, m: &mut Machine, pick: F) -> RunStats
where
    F: FnMut(&[LaneId]) -> usize,
{
    let program = Program::new(module.ops.clone()).expect("labels resolve");
    m.run_with(&program, pick).expect("program runs")
}

/// The seven block pointer components of a row-major matrix at `base`.
pub fn bind_block_ptr(
    m: &mut Machine,
    regs: &[Reg],
    offsets: (u32, u32),
    rows: u32,
    cols: u32,
    base: u64,
) {
    let fields = [
        Val::i32(offsets.0),
        Val::i32(offsets.1),
        Val::i32(rows),
        Val::i32(cols),
        Val::i32(cols),
        Val::i32(1),
        Val::global(base),
    ];
    for (reg, field) in regs.iter().zip(fields) {
        m.set_reg_with(*reg, |_| field.clone());
    }
}
