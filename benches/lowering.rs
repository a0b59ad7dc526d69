//! Lowering throughput benchmark.
//!
//! Measures:
//! 1. Generic load/store chains over blocked tensors
//! 2. Matrix-operand block loads and accumulator stores
//! 3. Emulated 16-bit atomics
//! 4. Interpreting a lowered load/store chain

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use simt_lower::layout::{BlockedLayout, DpasLayout, Layout};
use simt_lower::lower::{lower_ops, AxisMap, HlOp, MemOp, Pointer, Value, ValueId};
use simt_lower::sim::{Machine, Program, Val};
use simt_lower::sir::{Reg, RmwKind};
use simt_lower::span::Span;
use simt_lower::types::{ElemType, TensorType, ValueType};
use simt_lower::TargetConfig;

fn blocked(len: u32, spt: u32, elem: ElemType) -> ValueType {
    let layout = Layout::Blocked(BlockedLayout::new(vec![spt], vec![16], vec![4]));
    ValueType::Tensor(TensorType::new(vec![len], elem, layout))
}

fn regs(first: u32, n: usize) -> Vec<Reg> {
    (first..first + n as u32).map(Reg).collect()
}

/// `n` load/store pairs copying f32 tensors of `len` elements.
fn synthetic_copies(n: usize, len: u32) -> (Vec<HlOp>, AxisMap) {
    let ty = blocked(len, 4, ElemType::F32);
    let per_lane = ty.elems_per_thread();
    let mut ops = Vec::with_capacity(2 * n);
    let mut axis = AxisMap::new();
    for i in 0..n as u32 {
        let (src, dst, loaded) = (ValueId(3 * i), ValueId(3 * i + 1), ValueId(3 * i + 2));
        let first = 2 * i * per_lane as u32;
        axis = axis.with_contiguity(src, 4).with_contiguity(dst, 4);
        ops.push(HlOp::new(
            MemOp::Load {
                ptr: Pointer::linear(Value::new(src, ty.clone(), regs(first, per_lane))),
                mask: None,
                other: None,
                result: loaded,
            },
            Span::dummy(),
        ));
        ops.push(HlOp::new(
            MemOp::Store {
                ptr: Pointer::linear(Value::new(dst, ty.clone(), regs(first + per_lane as u32, per_lane))),
                value: Value::produced_by_earlier(loaded, ty.clone()),
                mask: None,
            },
            Span::dummy(),
        ));
    }
    (ops, axis)
}

fn synthetic_matmul_tiles(n: usize) -> Vec<HlOp> {
    let dpas = DpasLayout::for_elem_bits(16, vec![2, 2]);
    let a = ValueType::Tensor(TensorType::new(
        vec![64, 64],
        ElemType::F16,
        Layout::DotOperand {
            op_idx: 0,
            parent: dpas.clone(),
        },
    ));
    let c = ValueType::Tensor(TensorType::new(vec![64, 64], ElemType::F32, Layout::Dpas(dpas)));
    let c_elems = c.elems_per_thread();
    let mut ops = Vec::with_capacity(2 * n);
    for i in 0..n as u32 {
        let base = i * (14 + c_elems as u32);
        ops.push(HlOp::new(
            MemOp::Load {
                ptr: Pointer::block(Value::new(ValueId(3 * i), a.clone(), regs(base, 7))),
                mask: None,
                other: None,
                result: ValueId(3 * i + 1),
            },
            Span::dummy(),
        ));
        ops.push(HlOp::new(
            MemOp::Store {
                ptr: Pointer::block(Value::new(ValueId(3 * i + 2), c.clone(), regs(base + 7, 7))),
                value: Value::new(ValueId(3 * i + 1), c.clone(), regs(base + 14, c_elems)),
                mask: None,
            },
            Span::dummy(),
        ));
    }
    ops
}

fn synthetic_atomics(n: usize) -> Vec<HlOp> {
    let ty = blocked(64, 1, ElemType::F16);
    (0..n as u32)
        .map(|i| {
            HlOp::new(
                MemOp::AtomicRmw {
                    kind: RmwKind::FAdd,
                    ptr: Pointer::linear(Value::new(ValueId(3 * i), ty.clone(), regs(2 * i, 1))),
                    val: Value::new(ValueId(3 * i + 1), ty.clone(), regs(2 * i + 1, 1)),
                    mask: None,
                    result: ValueId(3 * i + 2),
                },
                Span::dummy(),
            )
        })
        .collect()
}

fn bench_generic(c: &mut Criterion) {
    let cfg = TargetConfig::xe();
    let (small, small_axis) = synthetic_copies(10, 256);
    let (large, large_axis) = synthetic_copies(100, 1024);

    let mut group = c.benchmark_group("generic_transfer");
    group.bench_function("10_copies", |b| {
        b.iter(|| lower_ops(black_box(&small), &cfg, &small_axis))
    });
    group.bench_function("100_copies", |b| {
        b.iter(|| lower_ops(black_box(&large), &cfg, &large_axis))
    });
    group.finish();
}

fn bench_block(c: &mut Criterion) {
    let cfg = TargetConfig::xe();
    let ops = synthetic_matmul_tiles(20);
    let axis = AxisMap::new();
    c.bench_function("block_transfer/20_tiles", |b| {
        b.iter(|| lower_ops(black_box(&ops), &cfg, &axis))
    });
}

fn bench_atomics(c: &mut Criterion) {
    let cfg = TargetConfig::xe();
    let ops = synthetic_atomics(20);
    let axis = AxisMap::new();
    c.bench_function("atomics/20_emulated", |b| {
        b.iter(|| lower_ops(black_box(&ops), &cfg, &axis))
    });
}

fn bench_interpret(c: &mut Criterion) {
    let cfg = TargetConfig::xe();
    let (ops, axis) = synthetic_copies(1, 256);
    let module = match lower_ops(&ops, &cfg, &axis) {
        Ok(module) => module,
        Err(diag) => panic!("benchmark input does not lower: {}", diag.message),
    };
    let program = match Program::new(module.ops.clone()) {
        Ok(program) => program,
        Err(err) => panic!("lowered program is malformed: {}", err),
    };
    let per_lane = ops[0].op.pointer().value.regs.clone();
    let stores = ops[1].op.pointer().value.regs.clone();

    c.bench_function("interpret/copy_256", |b| {
        b.iter(|| {
            let mut m = Machine::new(&cfg);
            for (k, (&src, &dst)) in per_lane.iter().zip(&stores).enumerate() {
                m.set_reg_with(src, |lane| Val::global(0x1_0000 + 4 * (lane.tid as u64 * 4 + k as u64)));
                m.set_reg_with(dst, |lane| Val::global(0x2_0000 + 4 * (lane.tid as u64 * 4 + k as u64)));
            }
            black_box(m.run(&program))
        })
    });
}

criterion_group!(
    benches,
    bench_generic,
    bench_block,
    bench_atomics,
    bench_interpret,
);
criterion_main!(benches);
