use thiserror::Error;

use crate::diagnostic::Diagnostic;
use crate::sir::RmwKind;
use crate::span::Span;

/// A precondition the lowering cannot recover from. Aborts the unit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LowerError {
    #[error("block pointer descriptor has {found} components, expected 7")]
    MalformedBlockPointer { found: usize },

    #[error("block pointer addresses a rank-{rank} tensor; only 2-D blocks are supported")]
    NonTwoDimBlockPointer { rank: usize },

    #[error("prefetch requires a block pointer")]
    PrefetchOfLinearPointer,

    #[error("{op} on {bits}-bit elements is not supported")]
    UnsupportedAtomicWidth { op: &'static str, bits: u32 },

    #[error("atomic {kind} cannot be emulated on 16-bit elements")]
    UnsupportedEmulatedOp { kind: RmwKind },

    #[error("scalar atomic result broadcast needs a single-CTA launch, got {num_ctas} CTAs")]
    ScalarBroadcastAcrossCtas { num_ctas: u32 },

    #[error("{operand} holds {found} registers per lane, expected {expected}")]
    OperandCountMismatch {
        operand: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("16-bit atomics need emulation, which target '{target}' disables")]
    EmulationDisabled { target: String },
}

impl LowerError {
    fn help(&self) -> Option<&'static str> {
        match self {
            LowerError::MalformedBlockPointer { .. } => Some(
                "a block pointer is (offsetY, offsetX, height, width, rowStride, colStride, base)",
            ),
            LowerError::PrefetchOfLinearPointer => {
                Some("rewrite the prefetch through a 2-D block pointer")
            }
            LowerError::UnsupportedAtomicWidth { bits: 16, .. } => {
                Some("compare-and-swap needs 32- or 64-bit elements")
            }
            LowerError::UnsupportedAtomicWidth { .. } => {
                Some("atomics operate on 16-, 32- or 64-bit elements")
            }
            LowerError::UnsupportedEmulatedOp { .. } => Some(
                "16-bit emulation covers add, fadd, max, min, umax, umin and xchg",
            ),
            LowerError::ScalarBroadcastAcrossCtas { .. } => {
                Some("launch with num_ctas = 1 or make the atomic operand a tensor")
            }
            LowerError::EmulationDisabled { .. } => {
                Some("set `atomics.allow_emulation = true` in the target config")
            }
            LowerError::NonTwoDimBlockPointer { .. } | LowerError::OperandCountMismatch { .. } => {
                None
            }
        }
    }

    /// Error diagnostic at the op's span.
    pub fn to_diagnostic(&self, span: Span) -> Diagnostic {
        let diag = Diagnostic::error(self.to_string(), span);
        match self.help() {
            Some(help) => diag.with_help(help.to_string()),
            None => diag,
        }
    }
}
