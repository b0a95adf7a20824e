use crate::index_space::IndexSpace;
use crate::int_vector::IntVector;
use crate::patch_data::{Centering, DataSet, PatchData, PatchScalar};
use std::sync::Arc;

/// A variable-specific spatial transfer rule from coarse to fine index
/// space. `refine` writes into the fine destination over a region of fine
/// cells, reading the coarse source.
pub trait RefineOperator: Send + Sync {
    fn name(&self) -> &'static str;

    /// The number of coarse cells the interpolation stencil reaches beyond
    /// the coarsened fill region.
    fn stencil_width(&self, dim: usize) -> IntVector;

    fn refine(
        &self,
        dst: &mut PatchData,
        src: &PatchData,
        fine_region: &IndexSpace,
        ratio: &IntVector,
    );
}

/// A variable-specific spatial transfer rule from fine to coarse index
/// space. `coarsen` writes into the coarse destination over a region of
/// coarse cells, reading the fine source.
pub trait CoarsenOperator: Send + Sync {
    fn name(&self) -> &'static str;

    fn coarsen(
        &self,
        dst: &mut PatchData,
        src: &PatchData,
        coarse_region: &IndexSpace,
        ratio: &IntVector,
    );
}

macro_rules! matched_sets {
    ($dst:expr, $src:expr, |$d:ident, $s:ident| $body:expr) => {
        match ($dst, $src) {
            (PatchData::Int($d), PatchData::Int($s)) => $body,
            (PatchData::Float($d), PatchData::Float($s)) => $body,
            (PatchData::Double($d), PatchData::Double($s)) => $body,
            (PatchData::Complex($d), PatchData::Complex($s)) => $body,
            _ => panic!("scalar kind mismatch in transfer operator"),
        }
    };
}

// ============================================================================
/// Piecewise-constant interpolation of cell data: every fine cell takes the
/// value of the coarse cell containing it. Stencil width zero.
pub struct ConstantRefine;

impl RefineOperator for ConstantRefine {
    fn name(&self) -> &'static str {
        "CONSTANT_REFINE"
    }

    fn stencil_width(&self, dim: usize) -> IntVector {
        IntVector::zero(dim)
    }

    fn refine(
        &self,
        dst: &mut PatchData,
        src: &PatchData,
        fine_region: &IndexSpace,
        ratio: &IntVector,
    ) {
        assert_eq!(dst.centering(), Centering::Cell, "constant refine is cell-centered");
        matched_sets!(dst, src, |d, s| constant_refine_set(d, s, fine_region, ratio));
    }
}

fn constant_refine_set<T: PatchScalar>(
    dst: &mut DataSet<T>,
    src: &DataSet<T>,
    fine_region: &IndexSpace,
    ratio: &IntVector,
) {
    let region = dst.component(0).space().intersect(fine_region);
    let depth = dst.depth();
    for fine in region.iter() {
        let coarse = fine.floor_divide(ratio);
        for d in 0..depth {
            let value = src.component(0).get(&coarse, d);
            dst.component_mut(0).set(&fine, d, value);
        }
    }
}

// ============================================================================
/// Multi-linear interpolation of cell data from coarse cell centers.
/// Stencil width one.
pub struct LinearRefine;

impl RefineOperator for LinearRefine {
    fn name(&self) -> &'static str {
        "LINEAR_REFINE"
    }

    fn stencil_width(&self, dim: usize) -> IntVector {
        IntVector::one(dim)
    }

    fn refine(
        &self,
        dst: &mut PatchData,
        src: &PatchData,
        fine_region: &IndexSpace,
        ratio: &IntVector,
    ) {
        assert_eq!(dst.centering(), Centering::Cell, "linear refine is cell-centered");
        matched_sets!(dst, src, |d, s| linear_refine_set(d, s, fine_region, ratio));
    }
}

fn linear_refine_set<T: PatchScalar>(
    dst: &mut DataSet<T>,
    src: &DataSet<T>,
    fine_region: &IndexSpace,
    ratio: &IntVector,
) {
    let region = dst.component(0).space().intersect(fine_region);
    let dim = region.dim();
    let depth = dst.depth();
    let src_space = src.component(0).space().clone();

    for fine in region.iter() {
        // Position of the fine cell center in coarse cell coordinates,
        // relative to the containing coarse cell center.
        let mut base = IntVector::zero(dim);
        let mut weight = [0.0; crate::int_vector::MAX_DIM];
        for a in 0..dim {
            let r = ratio[a] as f64;
            let x = (fine[a] as f64 + 0.5) / r - 0.5;
            let mut lo = x.floor() as i64;
            let mut w = x - lo as f64;
            // Clamp the stencil inside the stored coarse data.
            if lo < src_space.lower()[a] {
                lo = src_space.lower()[a];
                w = 0.0;
            }
            if lo + 1 > src_space.upper()[a] {
                lo = src_space.upper()[a] - 1;
                w = 1.0;
            }
            base[a] = lo;
            weight[a] = w;
        }
        for d in 0..depth {
            let value = gather_linear(src, &base, &weight, dim, 0, d);
            dst.component_mut(0).set(&fine, d, value);
        }
    }
}

fn gather_linear<T: PatchScalar>(
    src: &DataSet<T>,
    base: &IntVector,
    weight: &[f64],
    dim: usize,
    axis: usize,
    d: usize,
) -> T {
    if axis == dim {
        return src.component(0).get(base, d);
    }
    let mut upper = *base;
    upper[axis] += 1;
    let lo = gather_linear(src, base, weight, dim, axis + 1, d);
    let hi = gather_linear(src, &upper, weight, dim, axis + 1, d);
    T::lerp(lo, hi, weight[axis])
}

// ============================================================================
/// Volume-weighted average of fine cells onto each coarse cell; the
/// conservative choice for cell data on a uniform ratio.
pub struct ConservativeAverageCoarsen;

impl CoarsenOperator for ConservativeAverageCoarsen {
    fn name(&self) -> &'static str {
        "CONSERVATIVE_COARSEN"
    }

    fn coarsen(
        &self,
        dst: &mut PatchData,
        src: &PatchData,
        coarse_region: &IndexSpace,
        ratio: &IntVector,
    ) {
        assert_eq!(dst.centering(), Centering::Cell, "average coarsen is cell-centered");
        matched_sets!(dst, src, |d, s| average_coarsen_set(d, s, coarse_region, ratio));
    }
}

fn average_coarsen_set<T: PatchScalar>(
    dst: &mut DataSet<T>,
    src: &DataSet<T>,
    coarse_region: &IndexSpace,
    ratio: &IntVector,
) {
    let dim = coarse_region.dim();
    let fine_cells: i64 = (0..dim).map(|a| ratio[a]).product();
    let normal = T::from_f64(fine_cells as f64);
    let depth = dst.depth();

    let region = dst.component(0).space().intersect(coarse_region);
    for coarse in region.iter() {
        let fine_box = IndexSpace::new(coarse, coarse).refine(ratio);
        if !src.component(0).space().contains_space(&fine_box) {
            continue;
        }
        for d in 0..depth {
            let mut total = T::zero();
            for fine in fine_box.iter() {
                total += src.component(0).get(&fine, d);
            }
            dst.component_mut(0).set(&coarse, d, total / normal);
        }
    }
}

// ============================================================================
/// Coarsen fine outer-face (or outer-side) flux integrals onto the coarse
/// face- (or side-) centered flux arrays, replacing the coarse values: each
/// coarse face covered by the fine patch boundary takes the tangential-area
/// average of the fine flux integrals across it. With time-integrated
/// fluxes this is exactly the correction refluxing needs.
pub struct OuterSumCoarsen;

impl CoarsenOperator for OuterSumCoarsen {
    fn name(&self) -> &'static str {
        "OUTER_SUM_COARSEN"
    }

    fn coarsen(
        &self,
        dst: &mut PatchData,
        src: &PatchData,
        coarse_region: &IndexSpace,
        ratio: &IntVector,
    ) {
        assert! {
            matches!(src.centering(), Centering::OuterFace | Centering::OuterSide),
            "outer sum coarsen reads outer flux integrals"
        };
        assert! {
            matches!(dst.centering(), Centering::Face | Centering::Side),
            "outer sum coarsen writes face or side fluxes"
        };
        matched_sets!(dst, src, |d, s| outer_sum_coarsen_set(d, s, coarse_region, ratio));
    }
}

fn outer_sum_coarsen_set<T: PatchScalar>(
    dst: &mut DataSet<T>,
    src: &DataSet<T>,
    coarse_region: &IndexSpace,
    ratio: &IntVector,
) {
    let dim = coarse_region.dim();
    let depth = dst.depth();

    for axis in 0..dim {
        let tangential: i64 = (0..dim).filter(|a| *a != axis).map(|a| ratio[a]).product();
        let normal = T::from_f64(tangential as f64);

        for side in 0..2 {
            let src_plane = src.component(2 * axis + side).space().clone();

            // The fine face plane in coarse face indexes. Fine patches abut
            // coarse faces, so the normal face index divides exactly.
            let coarse_plane = src_plane.coarsen(ratio);
            let normal_face = {
                let f = if side == 0 {
                    src_plane.lower()[axis]
                } else {
                    src_plane.upper()[axis]
                };
                assert_eq!(f % ratio[axis], 0, "fine flux plane is not aligned");
                f / ratio[axis]
            };

            // Clip to the coarse faces attached to the requested cells.
            let request = Centering::Face.component_space(coarse_region, axis);
            let target = dst
                .component(axis)
                .space()
                .intersect(&coarse_plane)
                .intersect(&request);
            if target.is_empty() {
                continue;
            }

            for coarse in target.iter() {
                if coarse[axis] != normal_face {
                    continue;
                }
                // The fine faces overlying one coarse face.
                let mut lo = coarse;
                let mut hi = coarse;
                for a in 0..dim {
                    if a == axis {
                        lo[a] = coarse[a] * ratio[a];
                        hi[a] = coarse[a] * ratio[a];
                    } else {
                        lo[a] = coarse[a] * ratio[a];
                        hi[a] = (coarse[a] + 1) * ratio[a] - 1;
                    }
                }
                let fine_faces = IndexSpace::new(lo, hi);
                for d in 0..depth {
                    let mut total = T::zero();
                    for fine in fine_faces.iter() {
                        total += src.component(2 * axis + side).get(&fine, d);
                    }
                    dst.component_mut(axis).set(&coarse, d, total / normal);
                }
            }
        }
    }
}

// ============================================================================
/// Look up a refine operator by name; an empty name means no spatial
/// interpolation. Unknown names are a configuration error.
pub fn lookup_refine_operator(name: &str) -> Option<Arc<dyn RefineOperator>> {
    match name {
        "" | "NO_REFINE" => None,
        "CONSTANT_REFINE" => Some(Arc::new(ConstantRefine)),
        "LINEAR_REFINE" => Some(Arc::new(LinearRefine)),
        _ => panic!("unknown refine operator {:?}", name),
    }
}

/// Look up a coarsen operator by name and source centering.
pub fn lookup_coarsen_operator(name: &str, centering: Centering) -> Option<Arc<dyn CoarsenOperator>> {
    match (name, centering) {
        ("" | "NO_COARSEN", _) => None,
        ("CONSERVATIVE_COARSEN", Centering::Cell) => Some(Arc::new(ConservativeAverageCoarsen)),
        ("CONSERVATIVE_COARSEN", Centering::OuterFace | Centering::OuterSide) => {
            Some(Arc::new(OuterSumCoarsen))
        }
        _ => panic!("unknown coarsen operator {:?} for {:?}", name, centering),
    }
}

// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::patch_data::ScalarKind;

    fn cell_data(lower: [i64; 2], upper: [i64; 2]) -> PatchData {
        PatchData::new(
            ScalarKind::Double,
            Centering::Cell,
            IndexSpace::from_bounds(&lower, &upper),
            IntVector::zero(2),
            1,
        )
    }

    #[test]
    fn constant_refine_injects_coarse_values() {
        let mut src = cell_data([0, 0], [3, 3]);
        for index in IndexSpace::from_bounds(&[0, 0], &[3, 3]).iter() {
            src.as_double_mut()
                .component_mut(0)
                .set(&index, 0, (index[0] * 10 + index[1]) as f64);
        }
        let mut dst = cell_data([0, 0], [7, 7]);
        let ratio = IntVector::uniform(2, 2);
        ConstantRefine.refine(&mut dst, &src, &IndexSpace::from_bounds(&[0, 0], &[7, 7]), &ratio);

        let d = dst.as_double();
        assert_eq!(d.component(0).get(&IntVector::new(&[0, 0]), 0), 0.0);
        assert_eq!(d.component(0).get(&IntVector::new(&[5, 4]), 0), 22.0);
        assert_eq!(d.component(0).get(&IntVector::new(&[7, 7]), 0), 33.0);
    }

    #[test]
    fn linear_refine_reproduces_linear_fields() {
        // A field linear in the cell-center coordinates must be reproduced
        // exactly away from the clamped borders.
        let mut src = cell_data([0, 0], [5, 5]);
        for index in IndexSpace::from_bounds(&[0, 0], &[5, 5]).iter() {
            let x = index[0] as f64 + 0.5;
            let y = index[1] as f64 + 0.5;
            src.as_double_mut()
                .component_mut(0)
                .set(&index, 0, 2.0 * x - y);
        }
        let mut dst = cell_data([2, 2], [9, 9]);
        let ratio = IntVector::uniform(2, 2);
        LinearRefine.refine(&mut dst, &src, &IndexSpace::from_bounds(&[2, 2], &[9, 9]), &ratio);

        for index in IndexSpace::from_bounds(&[2, 2], &[9, 9]).iter() {
            let x = (index[0] as f64 + 0.5) / 2.0;
            let y = (index[1] as f64 + 0.5) / 2.0;
            let got = dst.as_double().component(0).get(&index, 0);
            assert!((got - (2.0 * x - y)).abs() < 1e-12, "at {}: {}", index, got);
        }
    }

    #[test]
    fn average_coarsen_preserves_totals() {
        let mut src = cell_data([0, 0], [7, 7]);
        for (i, index) in IndexSpace::from_bounds(&[0, 0], &[7, 7]).iter().enumerate() {
            src.as_double_mut()
                .component_mut(0)
                .set(&index, 0, i as f64);
        }
        let mut dst = cell_data([0, 0], [3, 3]);
        let ratio = IntVector::uniform(2, 2);
        ConservativeAverageCoarsen.coarsen(
            &mut dst,
            &src,
            &IndexSpace::from_bounds(&[0, 0], &[3, 3]),
            &ratio,
        );

        let fine_total: f64 = (0..64).map(|i| i as f64).sum();
        let coarse_total: f64 = IndexSpace::from_bounds(&[0, 0], &[3, 3])
            .iter()
            .map(|index| dst.as_double().component(0).get(&index, 0))
            .sum();
        // Each coarse value is the average of 4 fine values, so the coarse
        // sum times 4 equals the fine sum.
        assert!((coarse_total * 4.0 - fine_total).abs() < 1e-12);
    }

    #[test]
    fn outer_sum_replaces_coarse_fluxes() {
        let fine_box = IndexSpace::from_bounds(&[4, 4], &[7, 7]);
        let mut src = PatchData::new(
            ScalarKind::Double,
            Centering::OuterFace,
            fine_box,
            IntVector::zero(2),
            1,
        );
        // Lower-x plane of the fine patch: face index 4, cells y = 4..7.
        if let PatchData::Double(set) = &mut src {
            set.component_mut(0).fill(3.0);
        }

        let mut dst = PatchData::new(
            ScalarKind::Double,
            Centering::Face,
            IndexSpace::from_bounds(&[0, 0], &[9, 9]),
            IntVector::zero(2),
            1,
        );
        let ratio = IntVector::uniform(2, 2);
        OuterSumCoarsen.coarsen(&mut dst, &src, &IndexSpace::from_bounds(&[2, 2], &[3, 3]), &ratio);

        // Coarse face (2, 2) on axis 0 covers fine faces (4, 4) and (4, 5),
        // each 3.0, averaged tangentially over ratio 2.
        let d = dst.as_double();
        assert_eq!(d.component(0).get(&IntVector::new(&[2, 2]), 0), 3.0);
        assert_eq!(d.component(0).get(&IntVector::new(&[2, 3]), 0), 3.0);
        assert_eq!(d.component(0).get(&IntVector::new(&[3, 2]), 0), 0.0);
    }
}
