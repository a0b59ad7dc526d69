//! Rule dispatch: {op kind × pointer kind × layout class} → lowering.

use std::fmt;

use tracing::debug;

use crate::layout::LayoutKind;

use super::atomic::{AtomicCasLowering, AtomicRmwLowering};
use super::load::{BlockDotLoad, GenericLoad};
use super::op::{MemOp, OpKind, PointerKind};
use super::prefetch::BlockPrefetch;
use super::store::{BlockDpasStore, GenericStore};
use super::{LowerCtx, LowerError, Lowered};

/// What a rule is selected on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DispatchKey {
    pub op: OpKind,
    pub ptr: PointerKind,
    /// Layout class of the addressed tensor; `None` for scalars.
    pub layout: Option<LayoutKind>,
}

impl DispatchKey {
    pub fn of(op: &MemOp) -> Self {
        let ptr = op.pointer();
        Self {
            op: op.kind(),
            ptr: ptr.kind,
            layout: ptr.layout_kind(),
        }
    }
}

impl fmt::Display for DispatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.layout {
            Some(layout) => write!(f, "{} × {} × {}", self.op, self.ptr, layout),
            None => write!(f, "{} × {} × scalar", self.op, self.ptr),
        }
    }
}

/// A lowering rule for one family of memory ops.
pub trait MemLowering {
    /// Rule name, as accepted by `create_rule`.
    fn name(&self) -> &'static str;

    /// Whether the rule wants ops with this key.
    fn matches(&self, key: &DispatchKey) -> bool;

    /// Lower one op. `Declined` hands the op to the next matching rule.
    fn lower(&self, op: &MemOp, ctx: &mut LowerCtx) -> Result<Lowered, LowerError>;
}

/// Create a rule by name.
pub fn create_rule(name: &str) -> Option<Box<dyn MemLowering>> {
    match name {
        "block_dot_load" => Some(Box::new(BlockDotLoad)),
        "generic_load" => Some(Box::new(GenericLoad)),
        "block_dpas_store" => Some(Box::new(BlockDpasStore)),
        "generic_store" => Some(Box::new(GenericStore)),
        "block_prefetch" => Some(Box::new(BlockPrefetch)),
        "atomic_cas" => Some(Box::new(AtomicCasLowering)),
        "atomic_rmw" => Some(Box::new(AtomicRmwLowering)),
        _ => None,
    }
}

/// Ordered rule list; the first matching rule that does not decline wins.
pub struct DispatchTable {
    rules: Vec<Box<dyn MemLowering>>,
}

const STANDARD_RULES: &[&str] = &[
    "block_dot_load",
    "block_dpas_store",
    "block_prefetch",
    "generic_load",
    "generic_store",
    "atomic_cas",
    "atomic_rmw",
];

impl DispatchTable {
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Every built-in rule, 2-D block paths first.
    pub fn standard() -> Self {
        STANDARD_RULES
            .iter()
            .filter_map(|name| create_rule(name))
            .fold(Self::empty(), Self::with_rule)
    }

    pub fn with_rule(mut self, rule: Box<dyn MemLowering>) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn lower(&self, op: &MemOp, ctx: &mut LowerCtx) -> Result<Lowered, LowerError> {
        let key = DispatchKey::of(op);
        for rule in self.rules.iter().filter(|r| r.matches(&key)) {
            match rule.lower(op, ctx)? {
                Lowered::Declined => debug!(rule = rule.name(), %key, "rule declined"),
                lowered => {
                    debug!(rule = rule.name(), %key, "rule applied");
                    return Ok(lowered);
                }
            }
        }
        Ok(Lowered::Declined)
    }
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_rule() {
        for name in STANDARD_RULES {
            let rule = create_rule(name).unwrap();
            assert_eq!(rule.name(), *name);
        }
        assert!(create_rule("tma_load").is_none());
    }

    #[test]
    fn test_standard_table_order() {
        let table = DispatchTable::standard();
        assert_eq!(table.rule_names(), STANDARD_RULES.to_vec());
    }

    #[test]
    fn test_rule_keys() {
        let key = |op, ptr, layout| DispatchKey { op, ptr, layout };
        let dot_load = create_rule("block_dot_load").unwrap();
        assert!(dot_load.matches(&key(OpKind::Load, PointerKind::Block, Some(LayoutKind::DotOperand))));
        assert!(!dot_load.matches(&key(OpKind::Load, PointerKind::Linear, Some(LayoutKind::DotOperand))));

        let generic = create_rule("generic_load").unwrap();
        assert!(generic.matches(&key(OpKind::Load, PointerKind::Linear, None)));
        assert!(!generic.matches(&key(OpKind::Load, PointerKind::Block, Some(LayoutKind::Blocked))));

        let prefetch = create_rule("block_prefetch").unwrap();
        assert!(prefetch.matches(&key(OpKind::Prefetch, PointerKind::Linear, None)));

        let rmw = create_rule("atomic_rmw").unwrap();
        assert!(!rmw.matches(&key(OpKind::AtomicRmw, PointerKind::Block, Some(LayoutKind::Blocked))));
    }

    #[test]
    fn test_key_display() {
        let key = DispatchKey {
            op: OpKind::Store,
            ptr: PointerKind::Block,
            layout: Some(LayoutKind::Dpas),
        };
        assert_eq!(key.to_string(), "store × block × dpas");
    }
}
