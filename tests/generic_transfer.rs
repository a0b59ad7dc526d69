//! Vectorized linear loads and stores, executed on the interpreter.

mod common;

use common::*;
use proptest::prelude::*;
use simt_lower::lower::{lower_ops, AxisMap, MemOp, Other, Pointer, Value, ValueId};
use simt_lower::sim::{Machine, Val};
use simt_lower::sir::SirOp;
use simt_lower::types::ElemType;
use simt_lower::TargetConfig;

#[test]
fn test_masked_load_falls_back_then_stores() {
    let grid = Grid1d::new(64, 4, 16, 1);
    let ty = grid.ty(ElemType::F32);
    let mask_ty = grid.ty(ElemType::I1);
    let mask = value(1, mask_ty, regs(4, 4));
    let minus_one = (-1.0f32).to_bits() as u64;

    let ops = [
        op(MemOp::Load {
            ptr: Pointer::linear(value(0, ty.clone(), regs(0, 4))),
            mask: Some(mask.clone()),
            other: Some(Other::Splat { bits: minus_one }),
            result: ValueId(2),
        }),
        op(MemOp::Store {
            ptr: Pointer::linear(value(3, ty.clone(), regs(8, 4))),
            value: Value::produced_by_earlier(ValueId(2), ty),
            mask: Some(mask),
        }),
    ];
    let axis = AxisMap::new()
        .with_contiguity(ValueId(0), 4)
        .with_contiguity(ValueId(3), 4)
        .with_mask_alignment(ValueId(1), 2);
    let cfg = TargetConfig::xe().with_num_warps(1);
    let module = lower_ops(&ops, &cfg, &axis).unwrap();

    // Mask alignment halves the 4-wide vectors into pairs.
    let widths: Vec<u32> = module
        .ops
        .iter()
        .filter_map(|op| match op {
            SirOp::Load { align, .. } | SirOp::Store { align, .. } => Some(*align),
            _ => None,
        })
        .collect();
    assert_eq!(widths, vec![8; 4]);

    let mut m = Machine::new(&cfg);
    let input: Vec<u64> = (0..64).map(|i| (i as f32).to_bits() as u64).collect();
    m.global_mut().write_elems(SRC, 4, &input);
    bind_addresses(&mut m, &regs(0, 4), grid, SRC, 4);
    bind_addresses(&mut m, &regs(8, 4), grid, DST, 4);
    bind(&mut m, &regs(4, 4), |lane, k| Val::i1(grid.index(lane.tid, k) < 50));
    run(&module, &mut m);

    let loaded = module.results_of(ValueId(2)).unwrap();
    for tid in [0, 12, 13, 15] {
        let lane = simt_lower::sim::LaneId { cta: 0, tid };
        for (k, &reg) in loaded.iter().enumerate() {
            let idx = grid.index(tid, k);
            let want = if idx < 50 { idx as f32 } else { -1.0 };
            assert_eq!(m.reg(lane, reg), Some(&Val::f32(want)), "element {}", idx);
        }
    }
    let out = m.global().read_elems(DST, 4, 64);
    for (i, &bits) in out.iter().enumerate() {
        let want = if i < 50 { (i as f32).to_bits() as u64 } else { 0 };
        assert_eq!(bits, want, "element {}", i);
    }
}

#[test]
fn test_integer_splat_fills_masked_elements() {
    let grid = Grid1d::new(64, 4, 16, 1);
    let ty = grid.ty(ElemType::I16);
    let load = op(MemOp::Load {
        ptr: Pointer::linear(value(0, ty, regs(0, 4))),
        mask: Some(value(1, grid.ty(ElemType::I1), regs(4, 4))),
        other: Some(Other::Splat { bits: 0xabcd }),
        result: ValueId(2),
    });
    let axis = AxisMap::new()
        .with_contiguity(ValueId(0), 4)
        .with_mask_alignment(ValueId(1), 4);
    let cfg = TargetConfig::xe().with_num_warps(1);
    let module = lower_ops(&[load], &cfg, &axis).unwrap();
    // Two elements per 32-bit word; the splat is one pre-packed constant.
    assert!(module
        .ops
        .iter()
        .any(|op| matches!(op, SirOp::Const { bits: 0xabcd_abcd, .. })));

    let mut m = Machine::new(&cfg);
    bind_addresses(&mut m, &regs(0, 4), grid, SRC, 2);
    bind(&mut m, &regs(4, 4), |_, _| Val::i1(false));
    run(&module, &mut m);

    for &reg in module.results_of(ValueId(2)).unwrap() {
        for lane in m.lane_ids() {
            assert_eq!(m.reg(lane, reg), Some(&Val::int(16, 0xabcd)));
        }
    }
    assert!(m.global().is_empty());
}

#[test]
fn test_booleans_travel_as_bytes() {
    let grid = Grid1d::new(32, 2, 16, 1);
    let ty = grid.ty(ElemType::I1);
    let ops = [
        op(MemOp::Load {
            ptr: Pointer::linear(value(0, ty.clone(), regs(0, 2))),
            mask: None,
            other: None,
            result: ValueId(1),
        }),
        op(MemOp::Store {
            ptr: Pointer::linear(value(2, ty.clone(), regs(2, 2))),
            value: Value::produced_by_earlier(ValueId(1), ty),
            mask: None,
        }),
    ];
    let axis = AxisMap::new()
        .with_contiguity(ValueId(0), 2)
        .with_contiguity(ValueId(2), 2);
    let cfg = TargetConfig::xe().with_num_warps(1);
    let module = lower_ops(&ops, &cfg, &axis).unwrap();

    let mut m = Machine::new(&cfg);
    let input: Vec<u64> = (0..32).map(|i| (i % 3 == 0) as u64).collect();
    m.global_mut().write_elems(SRC, 1, &input);
    bind_addresses(&mut m, &regs(0, 2), grid, SRC, 1);
    bind_addresses(&mut m, &regs(2, 2), grid, DST, 1);
    run(&module, &mut m);

    let loaded = module.results_of(ValueId(1)).unwrap();
    let lane = simt_lower::sim::LaneId { cta: 0, tid: 1 };
    // Thread 1 holds elements 2 and 3.
    assert_eq!(m.reg(lane, loaded[0]), Some(&Val::i1(false)));
    assert_eq!(m.reg(lane, loaded[1]), Some(&Val::i1(true)));
    // True is written back as an all-ones byte.
    let out = m.global().read_elems(DST, 1, 32);
    let expected: Vec<u64> = input.iter().map(|&b| if b == 1 { 0xff } else { 0 }).collect();
    assert_eq!(out, expected);
}

#[test]
fn test_unmasked_scalar_load_reads_every_lane() {
    let scalar = simt_lower::types::ValueType::Scalar(ElemType::I64);
    let load = op(MemOp::Load {
        ptr: Pointer::linear(value(0, scalar, regs(0, 1))),
        mask: None,
        other: None,
        result: ValueId(1),
    });
    let cfg = TargetConfig::xe().with_num_warps(1);
    let module = lower_ops(&[load], &cfg, &AxisMap::new()).unwrap();

    let mut m = Machine::new(&cfg);
    m.global_mut().write_elems(SRC, 8, &[0x0123_4567_89ab_cdef]);
    m.set_reg_with(regs(0, 1)[0], |_| Val::global(SRC));
    run(&module, &mut m);

    let result = module.results_of(ValueId(1)).unwrap()[0];
    for lane in m.lane_ids() {
        assert_eq!(m.reg(lane, result), Some(&Val::i64(0x0123_4567_89ab_cdef)));
    }
}

fn mask_to(bits: u64, width: u32) -> u64 {
    if width >= 64 {
        bits
    } else {
        bits & ((1u64 << width) - 1)
    }
}

/// Copy a `vec`-per-lane tensor through a lowered load and store and check
/// every element bit for bit, in registers and in memory.
fn copy_round_trip(elem: ElemType, vec: u32, input: &[u64]) -> Result<(), TestCaseError> {
    let grid = Grid1d::new(32 * vec, vec, 16, 1);
    let ty = grid.ty(elem);
    let per_lane = ty.elems_per_thread();
    let ops = [
        op(MemOp::Load {
            ptr: Pointer::linear(value(0, ty.clone(), regs(0, per_lane))),
            mask: None,
            other: None,
            result: ValueId(1),
        }),
        op(MemOp::Store {
            ptr: Pointer::linear(value(2, ty.clone(), regs(per_lane as u32, per_lane))),
            value: Value::produced_by_earlier(ValueId(1), ty),
            mask: None,
        }),
    ];
    let axis = AxisMap::new()
        .with_contiguity(ValueId(0), vec)
        .with_contiguity(ValueId(2), vec);
    let mut cfg = TargetConfig::xe().with_num_warps(1);
    cfg.max_vector_bits = 512;
    let module = lower_ops(&ops, &cfg, &axis).unwrap();

    let bytes = elem.bytes() as u64;
    let stored_bits = elem.bytes() * 8;
    let effective = vec.min(512 / stored_bits);
    let aligns: Vec<u32> = module
        .ops
        .iter()
        .filter_map(|op| match op {
            SirOp::Load { align, .. } => Some(*align),
            _ => None,
        })
        .collect();
    prop_assert_eq!(aligns.len(), per_lane / effective as usize);
    prop_assert!(aligns.iter().all(|&a| a == effective * elem.bytes()));

    let len = (32 * vec) as usize;
    let source: Vec<u64> = input[..len].iter().map(|&b| mask_to(b, stored_bits)).collect();
    let mut m = Machine::new(&cfg);
    m.global_mut().write_elems(SRC, bytes as usize, &source);
    bind_addresses(&mut m, &regs(0, per_lane), grid, SRC, bytes);
    bind_addresses(&mut m, &regs(per_lane as u32, per_lane), grid, DST, bytes);
    run(&module, &mut m);

    let loaded = module.results_of(ValueId(1)).unwrap();
    for lane in m.lane_ids() {
        for (k, &reg) in loaded.iter().enumerate() {
            let idx = grid.index(lane.tid, k) as usize;
            let want = Val::int(elem.bits(), mask_to(source[idx], elem.bits()));
            prop_assert_eq!(m.reg(lane, reg), Some(&want));
        }
    }
    let expected: Vec<u64> = source
        .iter()
        .map(|&b| match elem {
            ElemType::I1 if b & 1 == 1 => 0xff,
            ElemType::I1 => 0,
            _ => b,
        })
        .collect();
    prop_assert_eq!(m.global().read_elems(DST, bytes as usize, len), expected);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_copy_preserves_bits(
        elem in prop::sample::select(vec![
            ElemType::I1,
            ElemType::I8,
            ElemType::I16,
            ElemType::I32,
            ElemType::I64,
            ElemType::F16,
            ElemType::F32,
            ElemType::F64,
        ]),
        vec in prop::sample::select(vec![1u32, 2, 4, 8, 16]),
        input in prop::collection::vec(any::<u64>(), 512),
    ) {
        copy_round_trip(elem, vec, &input)?;
    }
}

#[test]
fn test_copy_every_width_and_vector_length() {
    let input: Vec<u64> = (0..512u64)
        .map(|i| i.wrapping_mul(0x9e37_79b9_7f4a_7c15) ^ (i << 3))
        .collect();
    for elem in [
        ElemType::I1,
        ElemType::I8,
        ElemType::I16,
        ElemType::I32,
        ElemType::I64,
    ] {
        for vec in [1, 2, 4, 8, 16] {
            if let Err(err) = copy_round_trip(elem, vec, &input) {
                panic!("{} x {}: {}", elem, vec, err);
            }
        }
    }
}
