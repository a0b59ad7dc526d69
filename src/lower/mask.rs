//! Redundancy mask: which lanes are the unique owner of the elements they
//! hold.
//!
//! A layout may place the same element in several lanes (a tensor smaller
//! than one CTA tile), in several CTAs (multicast across a cluster) or, for
//! scalars, in every lane. Side-effecting transfers must be issued once per
//! element, so stores and atomics are guarded by this mask.
//!
//! The mask is built as a `MaskPlan`: the list of terms that apply to the
//! value's type. The plan can be evaluated for a concrete (thread, CTA)
//! pair or emitted as SIR.

use tracing::trace;

use crate::layout::{ceil_div, delinearize, Layout};
use crate::sir::{Builder, CmpPred, Reg, Ty};
use crate::types::ValueType;

/// One conjunct of the redundancy mask.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MaskTerm {
    /// `(warpCoord * threadsPerWarp + laneCoord) * sizePerThread < extent`
    /// along `dim`. Applies where the tensor is smaller than the CTA tile.
    Extent {
        dim: usize,
        threads_per_warp: u32,
        size_per_thread: u32,
        extent: u32,
    },
    /// `ctaCoord / divisor == 0` along `dim`: only replica 0 of a block
    /// multicast across the cluster.
    Replica { dim: usize, divisor: u32 },
    /// `threadId == 0 && clusterCtaId == 0`, for scalars.
    Leader,
}

/// Lane/warp/CTA geometry needed to compute coordinates.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Geometry {
    warp_size: u32,
    threads_per_warp: Vec<u32>,
    warps_per_cta: Vec<u32>,
    order: Vec<u32>,
    ctas_per_cga: Vec<u32>,
    cta_order: Vec<u32>,
}

impl Geometry {
    fn of(layout: &Layout) -> Self {
        let cta = layout.cta_layout();
        Self {
            warp_size: layout.warp_size(),
            threads_per_warp: layout.threads_per_warp(),
            warps_per_cta: layout.warps_per_cta(),
            order: layout.order(),
            ctas_per_cga: cta.ctas_per_cga.clone(),
            cta_order: cta.cta_order.clone(),
        }
    }
}

/// The applicable mask terms for one value type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MaskPlan {
    terms: Vec<MaskTerm>,
    geometry: Option<Geometry>,
}

impl MaskPlan {
    pub fn for_value(ty: &ValueType) -> Self {
        let plan = match ty {
            ValueType::Scalar(_) => Self {
                terms: vec![MaskTerm::Leader],
                geometry: None,
            },
            ValueType::Tensor(tensor) => Self::for_tensor(&tensor.shape, &tensor.layout),
        };
        trace!(terms = ?plan.terms, "redundancy mask");
        plan
    }

    fn for_tensor(shape: &[u32], layout: &Layout) -> Self {
        let mut terms = Vec::new();
        let cta = layout.cta_layout();
        let tile = layout.shape_per_cta_tile();
        let spt = layout.size_per_thread();
        let tpw = layout.threads_per_warp();

        for dim in 0..shape.len() {
            let per_cta = ceil_div(shape[dim], cta.cta_split_num[dim]);
            if per_cta < tile[dim] {
                terms.push(MaskTerm::Extent {
                    dim,
                    threads_per_warp: tpw[dim],
                    size_per_thread: spt[dim],
                    extent: per_cta,
                });
            }
        }

        if cta.num_ctas() > 1 {
            for dim in 0..shape.len() {
                let split = cta.cta_split_num[dim];
                if cta.ctas_per_cga[dim] != split {
                    terms.push(MaskTerm::Replica {
                        dim,
                        divisor: shape[dim].min(split).max(1),
                    });
                }
            }
        }

        Self {
            terms,
            geometry: Some(Geometry::of(layout)),
        }
    }

    pub fn terms(&self) -> &[MaskTerm] {
        &self.terms
    }

    /// True when every lane is a unique owner.
    pub fn is_trivial(&self) -> bool {
        self.terms.is_empty()
    }

    /// Mask bit of thread `tid` in cluster CTA `cta`.
    pub fn evaluate(&self, tid: u32, cta: u32) -> bool {
        let coords = self.geometry.as_ref().map(|g| {
            let lane = delinearize(tid % g.warp_size, &g.threads_per_warp, &g.order);
            let warp = delinearize(tid / g.warp_size, &g.warps_per_cta, &g.order);
            let cta = delinearize(cta, &g.ctas_per_cga, &g.cta_order);
            (lane, warp, cta)
        });
        self.terms.iter().all(|term| match (term, &coords) {
            (MaskTerm::Leader, _) => tid == 0 && cta == 0,
            (
                MaskTerm::Extent {
                    dim,
                    threads_per_warp,
                    size_per_thread,
                    extent,
                },
                Some((lane, warp, _)),
            ) => (warp[*dim] * threads_per_warp + lane[*dim]) * size_per_thread < *extent,
            (MaskTerm::Replica { dim, divisor }, Some((_, _, cta))) => cta[*dim] / divisor == 0,
            (_, None) => true,
        })
    }

    /// Emit the mask. `None` stands for the constant `true`.
    pub fn emit(&self, b: &mut Builder) -> Option<Reg> {
        if self.terms.is_empty() {
            return None;
        }
        let needs_lanes = self
            .terms
            .iter()
            .any(|t| matches!(t, MaskTerm::Extent { .. }));
        let needs_ctas = self
            .terms
            .iter()
            .any(|t| matches!(t, MaskTerm::Replica { .. } | MaskTerm::Leader));

        let tid = b.thread_id();
        let cta_id = if needs_ctas {
            Some(b.cluster_cta_id())
        } else {
            None
        };

        let mut lane_coords = Vec::new();
        let mut warp_coords = Vec::new();
        let mut cta_coords = Vec::new();
        if let Some(g) = &self.geometry {
            if needs_lanes {
                let warp_size = b.i32(g.warp_size);
                let lane = b.urem_i32(tid, warp_size);
                let warp = b.udiv_i32(tid, warp_size);
                lane_coords = b.delinearize(lane, &g.threads_per_warp, &g.order);
                warp_coords = b.delinearize(warp, &g.warps_per_cta, &g.order);
            }
            if let (Some(cta), true) = (cta_id, self.has_replica_terms()) {
                cta_coords = b.delinearize(cta, &g.ctas_per_cga, &g.cta_order);
            }
        }

        let mut mask: Option<Reg> = None;
        for term in &self.terms {
            let bit = match term {
                MaskTerm::Extent {
                    dim,
                    threads_per_warp,
                    size_per_thread,
                    extent,
                } => {
                    let owner = b.mul_imm(warp_coords[*dim], *threads_per_warp);
                    let owner = b.add_i32(owner, lane_coords[*dim]);
                    let first = b.mul_imm(owner, *size_per_thread);
                    let bound = b.i32(*extent);
                    b.icmp(CmpPred::Ult, Ty::i32(), first, bound)
                }
                MaskTerm::Replica { dim, divisor } => {
                    let divisor = b.i32(*divisor);
                    let replica = b.udiv_i32(cta_coords[*dim], divisor);
                    let zero = b.i32(0);
                    b.icmp(CmpPred::Eq, Ty::i32(), replica, zero)
                }
                MaskTerm::Leader => {
                    let zero = b.i32(0);
                    let first_thread = b.icmp(CmpPred::Eq, Ty::i32(), tid, zero);
                    let cta = cta_id.unwrap_or(zero);
                    let first_cta = b.icmp(CmpPred::Eq, Ty::i32(), cta, zero);
                    b.and_i1(first_thread, first_cta)
                }
            };
            mask = Some(match mask {
                Some(acc) => b.and_i1(acc, bit),
                None => bit,
            });
        }
        mask
    }

    fn has_replica_terms(&self) -> bool {
        self.terms
            .iter()
            .any(|t| matches!(t, MaskTerm::Replica { .. }))
    }
}

/// AND two optional predicates, `None` being `true`.
pub fn conjoin(b: &mut Builder, lhs: Option<Reg>, rhs: Option<Reg>) -> Option<Reg> {
    match (lhs, rhs) {
        (Some(l), Some(r)) => Some(b.and_i1(l, r)),
        (one, None) | (None, one) => one,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{BlockedLayout, CtaLayout};
    use crate::types::{ElemType, TensorType};

    fn tensor_1d(len: u32, lanes: u32) -> ValueType {
        let layout = Layout::Blocked(BlockedLayout::new(vec![1], vec![lanes], vec![1]));
        ValueType::Tensor(TensorType::new(vec![len], ElemType::F32, layout))
    }

    #[test]
    fn test_tensor_not_smaller_than_tile_is_trivial() {
        let ty = tensor_1d(7, 4);
        let plan = MaskPlan::for_value(&ty);
        assert!(plan.is_trivial());
        assert!((0..4).all(|tid| plan.evaluate(tid, 0)));
        // The second repetition covers elements 4..7 in the same lanes.
        assert_eq!(ty.elems_per_thread(), 2);
    }

    #[test]
    fn test_boundary_lane_is_masked() {
        let plan = MaskPlan::for_value(&tensor_1d(3, 4));
        assert_eq!(plan.terms().len(), 1);
        let bits: Vec<bool> = (0..4).map(|tid| plan.evaluate(tid, 0)).collect();
        assert_eq!(bits, vec![true, true, true, false]);
    }

    #[test]
    fn test_scalar_keeps_only_the_leader() {
        let plan = MaskPlan::for_value(&ValueType::Scalar(ElemType::I32));
        assert_eq!(plan.terms(), &[MaskTerm::Leader]);
        assert!(plan.evaluate(0, 0));
        assert!(!plan.evaluate(1, 0));
        assert!(!plan.evaluate(0, 1));
    }

    #[test]
    fn test_multicast_keeps_replica_zero() {
        let cta = CtaLayout {
            ctas_per_cga: vec![4],
            cta_split_num: vec![2],
            cta_order: vec![0],
        };
        let layout = Layout::Blocked(BlockedLayout::new(vec![1], vec![16], vec![1]).with_cta(cta));
        let ty = ValueType::Tensor(TensorType::new(vec![64], ElemType::I32, layout));
        let plan = MaskPlan::for_value(&ty);
        assert_eq!(plan.terms(), &[MaskTerm::Replica { dim: 0, divisor: 2 }]);
        let ctas: Vec<bool> = (0..4).map(|cta| plan.evaluate(5, cta)).collect();
        assert_eq!(ctas, vec![true, true, false, false]);
    }

    #[test]
    fn test_warp_coordinates_enter_extent() {
        // 2 warps of 4 lanes along one dimension, 6 elements.
        let layout = Layout::Blocked(BlockedLayout::new(vec![1], vec![4], vec![2]));
        let ty = ValueType::Tensor(TensorType::new(vec![6], ElemType::I8, layout));
        let plan = MaskPlan::for_value(&ty);
        let bits: Vec<bool> = (0..8).map(|tid| plan.evaluate(tid, 0)).collect();
        assert_eq!(bits, vec![true, true, true, true, true, true, false, false]);
    }

    #[test]
    fn test_trivial_plan_emits_nothing() {
        let mut b = Builder::new(0, 0);
        assert!(MaskPlan::for_value(&tensor_1d(16, 4)).emit(&mut b).is_none());
        assert!(b.ops().is_empty());
    }

    #[test]
    fn test_conjoin() {
        let mut b = Builder::new(0, 0);
        let p = b.bool(true);
        assert_eq!(conjoin(&mut b, Some(p), None), Some(p));
        assert_eq!(conjoin(&mut b, None, None), None);
        let q = b.bool(false);
        let both = conjoin(&mut b, Some(p), Some(q));
        assert_eq!(both, Some(Reg(2)));
    }
}
