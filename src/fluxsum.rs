use crate::index_space::IndexSpace;
use crate::patch_data::{Centering, DataSet};

/// Add the patch-boundary values of a face- or side-centered flux array
/// into the matching outer flux-integral array, on the selected side of the
/// selected axis. For every boundary face of the patch, the flux value at
/// that face accumulates into the corresponding flux-sum slot; called once
/// per substep, this builds up the time integral the refluxing step needs.
pub fn up_flux_sum(
    flux: &DataSet<f64>,
    fsum: &mut DataSet<f64>,
    patch_box: &IndexSpace,
    axis: usize,
    side: usize,
) {
    assert!(matches!(
        flux.centering(),
        Centering::Face | Centering::Side
    ));
    assert!(matches!(
        fsum.centering(),
        Centering::OuterFace | Centering::OuterSide
    ));
    assert_eq!(flux.depth(), fsum.depth(), "flux and flux-sum depth differ");
    assert!(side < 2);

    let component = 2 * axis + side;
    let plane = fsum.component(component).space().clone();
    debug_assert! {
        flux.component(axis).space().contains_space(&plane),
        "flux array does not reach the {} boundary of axis {}",
        if side == 0 { "lower" } else { "upper" },
        axis
    };
    let _ = patch_box;

    let depth = fsum.depth();
    for index in plane.iter() {
        for d in 0..depth {
            let value = flux.component(axis).get(&index, d);
            let slot = fsum.component(component).get(&index, d);
            fsum.component_mut(component).set(&index, d, slot + value);
        }
    }
}

/// Accumulate every boundary plane of the patch at once: both sides of each
/// axis.
pub fn up_flux_sum_all(flux: &DataSet<f64>, fsum: &mut DataSet<f64>, patch_box: &IndexSpace) {
    for axis in 0..patch_box.dim() {
        for side in 0..2 {
            up_flux_sum(flux, fsum, patch_box, axis, side);
        }
    }
}

// ============================================================================
#[cfg(test)]
mod test {

    use super::{up_flux_sum, up_flux_sum_all};
    use crate::index_space::IndexSpace;
    use crate::int_vector::IntVector;
    use crate::patch_data::{Centering, DataSet};

    #[test]
    fn boundary_fluxes_accumulate_into_the_integrals() {
        let cells = IndexSpace::from_bounds(&[0, 0], &[3, 3]);
        let mut flux = DataSet::<f64>::new(
            Centering::Face,
            cells.clone(),
            IntVector::uniform(2, 1),
            1,
        );
        let mut fsum = DataSet::<f64>::new(Centering::OuterFace, cells.clone(), IntVector::zero(2), 1);

        // Distinguishable values on the lower-x boundary faces.
        for j in 0..4 {
            flux.component_mut(0)
                .set(&IntVector::new(&[0, j]), 0, 10.0 + j as f64);
        }

        up_flux_sum(&flux, &mut fsum, &cells, 0, 0);
        up_flux_sum(&flux, &mut fsum, &cells, 0, 0);

        for j in 0..4 {
            assert_eq!(
                fsum.component(0).get(&IntVector::new(&[0, j]), 0),
                2.0 * (10.0 + j as f64)
            );
        }
        // Upper side untouched.
        assert_eq!(fsum.component(1).get(&IntVector::new(&[4, 2]), 0), 0.0);
    }

    #[test]
    fn all_planes_cover_every_axis_and_side() {
        let cells = IndexSpace::from_bounds(&[2, 2], &[5, 5]);
        let mut flux = DataSet::<f64>::new(
            Centering::Side,
            cells.clone(),
            IntVector::uniform(2, 1),
            1,
        );
        flux.fill_all(1.0);
        let mut fsum = DataSet::<f64>::new(Centering::OuterSide, cells.clone(), IntVector::zero(2), 1);

        up_flux_sum_all(&flux, &mut fsum, &cells);

        let total: f64 = (0..fsum.num_components())
            .map(|c| fsum.component(c).values().iter().sum::<f64>())
            .sum();
        // Four planes of four faces each.
        assert_eq!(total, 16.0);
    }
}
