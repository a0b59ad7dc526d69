//! Memory-operation lowering: high-level tensor loads, stores, prefetches
//! and atomics into per-lane SIR.
//!
//! Each op is routed through a `DispatchTable` keyed on
//! {op kind × pointer kind × layout class}. A rule either replaces the op
//! with SIR and per-lane result registers, declines it (the op stays
//! pending for a later pass), or fails with a `LowerError`.
//!
//! Rules build into a private `Builder` obtained from `LowerCtx::builder`.
//! Only `LowerCtx::replace` commits the register and label counters, so a
//! rule that declines or fails leaves no trace.

pub mod atomic;
pub mod axis;
pub mod block_ptr;
pub mod dispatch;
mod error;
pub mod load;
pub mod mask;
pub mod op;
pub mod prefetch;
pub mod store;
pub mod tiling;
pub mod vectorize;

use std::collections::HashMap;

use tracing::debug;

use crate::config::TargetConfig;
use crate::diagnostic::Diagnostic;
use crate::sir::{self, Builder, Reg, SirOp};
use crate::span::Span;

pub use axis::{AxisInfo, AxisMap};
pub use dispatch::{create_rule, DispatchKey, DispatchTable, MemLowering};
pub use error::LowerError;
pub use op::{HlOp, MemOp, OpKind, Other, Pointer, PointerKind, Value, ValueId};

/// Result of applying one rule to one op.
#[derive(Clone, Debug, PartialEq)]
pub enum Lowered {
    /// The op is fully replaced. `results` holds the op's per-lane result
    /// registers in canonical order (empty for ops without a result).
    Replaced { ops: Vec<SirOp>, results: Vec<Reg> },
    /// The rule does not handle this op.
    Declined,
}

/// State shared by every rule of one lowering run.
pub struct LowerCtx<'a> {
    pub config: &'a TargetConfig,
    axis: &'a dyn AxisInfo,
    span: Span,
    warnings: Vec<Diagnostic>,
    next_reg: u32,
    next_label: u32,
}

impl<'a> LowerCtx<'a> {
    /// Fresh registers start at `first_reg`, above every operand register.
    pub fn new(config: &'a TargetConfig, axis: &'a dyn AxisInfo, first_reg: u32) -> Self {
        Self {
            config,
            axis,
            span: Span::dummy(),
            warnings: Vec::new(),
            next_reg: first_reg,
            next_label: 0,
        }
    }

    /// Span of the op being lowered; warnings point at it.
    pub fn set_span(&mut self, span: Span) {
        self.span = span;
    }

    /// A builder continuing the committed register and label numbering.
    pub fn builder(&self) -> Builder {
        Builder::new(self.next_reg, self.next_label)
    }

    /// Commit a finished builder as the replacement of the current op.
    pub fn replace(&mut self, b: Builder, results: Vec<Reg>) -> Lowered {
        let (ops, next_reg, next_label) = b.finish();
        self.next_reg = next_reg;
        self.next_label = next_label;
        Lowered::Replaced { ops, results }
    }

    pub fn warn(&mut self, message: String) {
        self.warnings.push(Diagnostic::warning(message, self.span));
    }

    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.warnings)
    }

    pub fn next_reg(&self) -> u32 {
        self.next_reg
    }

    pub fn contiguity(&self, ptr: &Pointer) -> u32 {
        self.axis.contiguity(ptr.value.id)
    }

    pub fn mask_alignment(&self, mask: &Value) -> u32 {
        self.axis.mask_alignment(mask.id)
    }

    /// Elements per linear transfer: bounded by pointer contiguity, by the
    /// lane's run along the fastest dimension, by the widest vector
    /// transfer and by mask alignment. Always a power of two dividing the
    /// lane's element count; 1 for scalars.
    pub fn vector_size(&self, ptr: &Pointer, mask: Option<&Value>) -> u32 {
        let tensor = match ptr.value.ty.as_tensor() {
            Some(tensor) => tensor,
            None => return 1,
        };
        let layout = &tensor.layout;
        let fastest = layout.order().first().copied().unwrap_or(0) as usize;
        let run = layout.size_per_thread().get(fastest).copied().unwrap_or(1);
        let elem_bits = tensor.elem.storage().bits();

        let mut vec = self
            .contiguity(ptr)
            .min(run)
            .min(self.config.max_vector_bits / elem_bits)
            .max(1);
        if let Some(mask) = mask {
            vec = vec.min(self.mask_alignment(mask));
        }
        vec = 1 << (31 - vec.leading_zeros());
        let elems = tensor.elems_per_thread() as u32;
        while vec > 1 && elems % vec != 0 {
            vec /= 2;
        }
        vec
    }
}

/// Check that an operand carries one register per owned element.
pub(crate) fn expect_regs(
    operand: &'static str,
    value: &Value,
    expected: usize,
) -> Result<(), LowerError> {
    if value.regs.len() == expected {
        Ok(())
    } else {
        Err(LowerError::OperandCountMismatch {
            operand,
            expected,
            found: value.regs.len(),
        })
    }
}

/// Per-op outcome of a lowering run.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Replaced { results: Vec<Reg> },
    /// No rule applied; the op is left for another pass.
    Pending(HlOp),
}

/// Output of `lower_ops`.
#[derive(Clone, Debug, Default)]
pub struct LoweredModule {
    /// One program holding every replaced op, in input order.
    pub ops: Vec<SirOp>,
    /// One entry per input op.
    pub outcomes: Vec<Outcome>,
    pub warnings: Vec<Diagnostic>,
    /// First register number not used by operands or lowered code.
    pub next_reg: u32,
    values: HashMap<ValueId, Vec<Reg>>,
}

impl LoweredModule {
    /// Per-lane registers of a value defined by a replaced op.
    pub fn results_of(&self, id: ValueId) -> Option<&[Reg]> {
        self.values.get(&id).map(Vec::as_slice)
    }

    pub fn pending(&self) -> impl Iterator<Item = &HlOp> {
        self.outcomes.iter().filter_map(|o| match o {
            Outcome::Pending(op) => Some(op),
            Outcome::Replaced { .. } => None,
        })
    }

    pub fn text(&self) -> String {
        sir::to_text(&self.ops)
    }
}

/// Lower `ops` with the standard dispatch table.
pub fn lower_ops(
    ops: &[HlOp],
    config: &TargetConfig,
    axis: &dyn AxisInfo,
) -> Result<LoweredModule, Diagnostic> {
    lower_ops_with(&DispatchTable::standard(), ops, config, axis)
}

/// Lower `ops` through `table`. Operands with no registers are bound to
/// the results of an earlier op defining the same value. Aborts on the
/// first fatal error.
pub fn lower_ops_with(
    table: &DispatchTable,
    ops: &[HlOp],
    config: &TargetConfig,
    axis: &dyn AxisInfo,
) -> Result<LoweredModule, Diagnostic> {
    let first_reg = ops.iter().filter_map(HlOp::max_reg).max().map_or(0, |r| r + 1);
    let mut ctx = LowerCtx::new(config, axis, first_reg);
    let mut module = LoweredModule::default();

    for hl in ops {
        let mut hl = hl.clone();
        for operand in hl.op.operands_mut() {
            if operand.regs.is_empty() {
                if let Some(regs) = module.values.get(&operand.id) {
                    operand.regs = regs.clone();
                }
            }
        }

        ctx.set_span(hl.span);
        match table.lower(&hl.op, &mut ctx) {
            Ok(Lowered::Replaced { ops, results }) => {
                if let Some(id) = hl.op.result() {
                    module.values.insert(id, results.clone());
                }
                module.ops.extend(ops);
                module.outcomes.push(Outcome::Replaced { results });
            }
            Ok(Lowered::Declined) => {
                debug!(op = %hl.op.kind(), "no rule applies, op left pending");
                module.outcomes.push(Outcome::Pending(hl));
            }
            Err(err) => return Err(err.to_diagnostic(hl.span)),
        }
    }

    module.warnings = ctx.take_warnings();
    module.next_reg = ctx.next_reg();
    Ok(module)
}
