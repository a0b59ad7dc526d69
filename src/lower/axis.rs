//! Contiguity and alignment facts about pointer and mask values.

use std::collections::HashMap;

use super::op::ValueId;

/// Answers from a pointer/mask analysis run before lowering.
pub trait AxisInfo {
    /// Number of consecutive elements, along the fastest dimension, whose
    /// addresses are contiguous in memory.
    fn contiguity(&self, ptr: ValueId) -> u32;

    /// Number of consecutive elements that share the same mask bit.
    fn mask_alignment(&self, mask: ValueId) -> u32;
}

/// Table-backed `AxisInfo`. Unknown values are assumed to be
/// non-contiguous and element-wise masked.
#[derive(Clone, Debug, Default)]
pub struct AxisMap {
    contiguity: HashMap<ValueId, u32>,
    alignment: HashMap<ValueId, u32>,
}

impl AxisMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contiguity(mut self, ptr: ValueId, elems: u32) -> Self {
        self.contiguity.insert(ptr, elems);
        self
    }

    pub fn with_mask_alignment(mut self, mask: ValueId, elems: u32) -> Self {
        self.alignment.insert(mask, elems);
        self
    }
}

impl AxisInfo for AxisMap {
    fn contiguity(&self, ptr: ValueId) -> u32 {
        self.contiguity.get(&ptr).copied().unwrap_or(1).max(1)
    }

    fn mask_alignment(&self, mask: ValueId) -> u32 {
        self.alignment.get(&mask).copied().unwrap_or(1).max(1)
    }
}
