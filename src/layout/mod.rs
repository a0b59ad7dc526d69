//! Layout query façade.
//!
//! A layout says which lane of which warp of which CTA owns which tensor
//! element. Layout inference happens elsewhere; this module only wraps the
//! resulting descriptors in pure query functions the lowerings consume.
//!
//! Three encodings are understood:
//! - `Blocked`: each lane owns a `size_per_thread` box, lanes tile a warp,
//!   warps tile a CTA, repeated until the tensor is covered.
//! - `Dpas`: the accumulator (C) layout of the matrix-multiply unit.
//! - `DotOperand`: the A (op 0) or B (op 1) operand layout of a `Dpas`
//!   parent.

use std::fmt;

/// Distribution of CTAs within a cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CtaLayout {
    /// CTAs per cluster along each dimension.
    pub ctas_per_cga: Vec<u32>,
    /// Number of distinct tensor blocks along each dimension. Where it is
    /// smaller than `ctas_per_cga` the block is multicast to several CTAs.
    pub cta_split_num: Vec<u32>,
    pub cta_order: Vec<u32>,
}

impl CtaLayout {
    /// One CTA, no split.
    pub fn single(rank: usize) -> Self {
        Self {
            ctas_per_cga: vec![1; rank],
            cta_split_num: vec![1; rank],
            cta_order: default_order(rank),
        }
    }

    pub fn num_ctas(&self) -> u32 {
        self.ctas_per_cga.iter().product()
    }
}

/// Lanes own `size_per_thread` boxes, tiled by lanes, warps and repetitions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockedLayout {
    pub size_per_thread: Vec<u32>,
    pub threads_per_warp: Vec<u32>,
    pub warps_per_cta: Vec<u32>,
    /// Dimensions from fastest to slowest varying.
    pub order: Vec<u32>,
    pub cta: CtaLayout,
}

impl BlockedLayout {
    /// Single-CTA blocked layout with the default row-major order.
    pub fn new(size_per_thread: Vec<u32>, threads_per_warp: Vec<u32>, warps_per_cta: Vec<u32>) -> Self {
        let rank = size_per_thread.len();
        Self {
            size_per_thread,
            threads_per_warp,
            warps_per_cta,
            order: default_order(rank),
            cta: CtaLayout::single(rank),
        }
    }

    pub fn with_order(mut self, order: Vec<u32>) -> Self {
        self.order = order;
        self
    }

    pub fn with_cta(mut self, cta: CtaLayout) -> Self {
        self.cta = cta;
        self
    }
}

/// Accumulator layout of the matrix-multiply (DPAS) unit.
///
/// One instruction computes a `repeat_count × execution_size` tile of C from
/// a `repeat_count × K` tile of A and a `K × execution_size` tile of B, with
/// `K = systolic_depth × ops_per_channel`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DpasLayout {
    pub repeat_count: u32,
    pub systolic_depth: u32,
    pub execution_size: u32,
    /// Elements packed per 32-bit channel: 1 (tf32), 2 (16-bit), 4 (8-bit).
    pub ops_per_channel: u32,
    pub warps_per_cta: Vec<u32>,
    pub threads_per_warp: u32,
    pub cta: CtaLayout,
}

impl DpasLayout {
    /// Layout for `elem_bits`-wide operands on 16-lane sub-groups.
    pub fn for_elem_bits(elem_bits: u32, warps_per_cta: Vec<u32>) -> Self {
        let ops_per_channel = match elem_bits {
            8 => 4,
            16 => 2,
            _ => 1,
        };
        Self {
            repeat_count: 8,
            systolic_depth: 8,
            execution_size: 16,
            ops_per_channel,
            warps_per_cta,
            threads_per_warp: 16,
            cta: CtaLayout::single(2),
        }
    }

    /// Native tile of operand A: [M, K].
    pub fn shape_a(&self) -> [u32; 2] {
        [self.repeat_count, self.systolic_depth * self.ops_per_channel]
    }

    /// Native tile of operand B: [K, N].
    pub fn shape_b(&self) -> [u32; 2] {
        [self.systolic_depth * self.ops_per_channel, self.execution_size]
    }

    /// Native tile of the accumulator C: [M, N].
    pub fn shape_c(&self) -> [u32; 2] {
        [self.repeat_count, self.execution_size]
    }

    /// Native tile of operand `op_idx` (0 = A, 1 = B, 2 = C).
    pub fn operand_shape(&self, op_idx: u32) -> [u32; 2] {
        match op_idx {
            0 => self.shape_a(),
            1 => self.shape_b(),
            _ => self.shape_c(),
        }
    }

    /// Instruction repetitions per warp needed to cover `shape` for operand
    /// `op_idx`. Warps split M for A, N for B, and both for C.
    pub fn repetitions(&self, shape: &[u32], op_idx: u32) -> [u32; 2] {
        let wpc = &self.warps_per_cta;
        match op_idx {
            0 => {
                let [m, k] = self.shape_a();
                [
                    ceil_div(shape[0], m * wpc[0]).max(1),
                    ceil_div(shape[1], k).max(1),
                ]
            }
            1 => {
                let [k, n] = self.shape_b();
                [
                    ceil_div(shape[0], k).max(1),
                    ceil_div(shape[1], n * wpc[1]).max(1),
                ]
            }
            _ => {
                let [m, n] = self.shape_c();
                [
                    ceil_div(shape[0], m * wpc[0]).max(1),
                    ceil_div(shape[1], n * wpc[1]).max(1),
                ]
            }
        }
    }

    /// Elements one lane holds from one instruction tile of `op_idx`.
    pub fn elems_per_lane(&self, op_idx: u32) -> u32 {
        let [rows, cols] = self.operand_shape(op_idx);
        rows * cols / self.threads_per_warp
    }

    pub fn order(&self) -> Vec<u32> {
        vec![1, 0]
    }
}

/// A tensor layout descriptor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Layout {
    Blocked(BlockedLayout),
    Dpas(DpasLayout),
    DotOperand { op_idx: u32, parent: DpasLayout },
}

/// Layout family, used as a dispatch key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LayoutKind {
    Blocked,
    Dpas,
    DotOperand,
}

impl fmt::Display for LayoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutKind::Blocked => write!(f, "blocked"),
            LayoutKind::Dpas => write!(f, "dpas"),
            LayoutKind::DotOperand => write!(f, "dot_op"),
        }
    }
}

impl Layout {
    pub fn kind(&self) -> LayoutKind {
        match self {
            Layout::Blocked(_) => LayoutKind::Blocked,
            Layout::Dpas(_) => LayoutKind::Dpas,
            Layout::DotOperand { .. } => LayoutKind::DotOperand,
        }
    }

    pub fn rank(&self) -> usize {
        match self {
            Layout::Blocked(b) => b.size_per_thread.len(),
            Layout::Dpas(_) | Layout::DotOperand { .. } => 2,
        }
    }

    /// The matrix-unit shape behind this layout, if any.
    pub fn dpas(&self) -> Option<&DpasLayout> {
        match self {
            Layout::Blocked(_) => None,
            Layout::Dpas(d) | Layout::DotOperand { parent: d, .. } => Some(d),
        }
    }

    fn mma_tile(&self) -> Option<(&DpasLayout, [u32; 2])> {
        match self {
            Layout::Blocked(_) => None,
            Layout::Dpas(d) => Some((d, d.shape_c())),
            Layout::DotOperand { op_idx, parent } => Some((parent, parent.operand_shape(*op_idx))),
        }
    }

    /// Lanes per warp along each dimension.
    pub fn threads_per_warp(&self) -> Vec<u32> {
        if let Layout::Blocked(b) = self {
            return b.threads_per_warp.clone();
        }
        match self.mma_tile() {
            Some((d, [_, cols])) => {
                let along_cols = d.threads_per_warp.min(cols);
                vec![d.threads_per_warp / along_cols, along_cols]
            }
            None => Vec::new(),
        }
    }

    /// Elements per lane along each dimension within one CTA tile.
    pub fn size_per_thread(&self) -> Vec<u32> {
        if let Layout::Blocked(b) = self {
            return b.size_per_thread.clone();
        }
        match self.mma_tile() {
            Some((_, [rows, cols])) => {
                let tpw = self.threads_per_warp();
                vec![(rows / tpw[0]).max(1), (cols / tpw[1]).max(1)]
            }
            None => Vec::new(),
        }
    }

    pub fn warps_per_cta(&self) -> Vec<u32> {
        match self {
            Layout::Blocked(b) => b.warps_per_cta.clone(),
            Layout::Dpas(d) | Layout::DotOperand { parent: d, .. } => d.warps_per_cta.clone(),
        }
    }

    /// Dimensions from fastest to slowest varying.
    pub fn order(&self) -> Vec<u32> {
        match self {
            Layout::Blocked(b) => b.order.clone(),
            Layout::Dpas(d) | Layout::DotOperand { parent: d, .. } => d.order(),
        }
    }

    pub fn cta_layout(&self) -> &CtaLayout {
        match self {
            Layout::Blocked(b) => &b.cta,
            Layout::Dpas(d) | Layout::DotOperand { parent: d, .. } => &d.cta,
        }
    }

    pub fn num_ctas(&self) -> u32 {
        self.cta_layout().num_ctas()
    }

    /// Lanes per warp.
    pub fn warp_size(&self) -> u32 {
        self.threads_per_warp().iter().product()
    }

    /// Extent one CTA covers in a single pass: lanes × warps × per-lane box.
    pub fn shape_per_cta_tile(&self) -> Vec<u32> {
        let spt = self.size_per_thread();
        let tpw = self.threads_per_warp();
        let wpc = self.warps_per_cta();
        (0..self.rank())
            .map(|d| spt[d] * tpw[d] * wpc[d])
            .collect()
    }

    /// Elements each lane holds for a tensor of `shape`.
    pub fn total_elems_per_thread(&self, shape: &[u32]) -> usize {
        match self {
            Layout::Blocked(b) => {
                let tile = self.shape_per_cta_tile();
                (0..shape.len())
                    .map(|d| {
                        let per_cta = ceil_div(shape[d], b.cta.cta_split_num[d]);
                        (b.size_per_thread[d] * ceil_div(per_cta, tile[d]).max(1)) as usize
                    })
                    .product()
            }
            Layout::Dpas(d) => {
                let [r0, r1] = d.repetitions(shape, 2);
                (r0 * r1 * d.elems_per_lane(2)) as usize
            }
            Layout::DotOperand { op_idx, parent } => {
                let [r0, r1] = parent.repetitions(shape, *op_idx);
                (r0 * r1 * parent.elems_per_lane(*op_idx)) as usize
            }
        }
    }
}

/// `[rank-1, ..., 1, 0]`: the last dimension varies fastest.
pub fn default_order(rank: usize) -> Vec<u32> {
    (0..rank as u32).rev().collect()
}

pub fn ceil_div(a: u32, b: u32) -> u32 {
    a.div_ceil(b)
}

/// Split a linear index into per-dimension coordinates, `order[0]` fastest.
/// Every dimension but the slowest is reduced modulo its extent.
pub fn delinearize(linear: u32, shape: &[u32], order: &[u32]) -> Vec<u32> {
    let rank = shape.len();
    let mut coords = vec![0; rank];
    let mut rest = linear;
    for (i, &dim) in order.iter().enumerate() {
        let dim = dim as usize;
        if i + 1 == rank {
            coords[dim] = rest;
            break;
        }
        coords[dim] = rest % shape[dim];
        rest /= shape[dim];
    }
    coords
}
