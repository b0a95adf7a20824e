//! Shared fixture for the hierarchy data-operation tests: a two-level
//! hierarchy on [0,1] x [0,0.5] (x [0,1] in 3D) with two coarse patches and
//! two fine patches at ratio two, plus the control-volume construction for
//! node- and edge-centered data.

use gridquilt::box_level::BoxLevel;
use gridquilt::geometry::BlockGeometry;
use gridquilt::hierarchy::PatchHierarchy;
use gridquilt::index_space::{BlockId, IndexSpace};
use gridquilt::int_vector::IntVector;
use gridquilt::message::comm::SerialCommunicator;
use gridquilt::patch_data::Centering;
use gridquilt::variable::{DescriptorId, VariableDatabase};
use std::sync::Arc;

pub fn coarse_boxes(dim: usize) -> Vec<IndexSpace> {
    if dim == 2 {
        vec![
            IndexSpace::from_bounds(&[0, 0], &[9, 2]),
            IndexSpace::from_bounds(&[0, 3], &[9, 4]),
        ]
    } else {
        vec![
            IndexSpace::from_bounds(&[0, 0, 0], &[9, 2, 9]),
            IndexSpace::from_bounds(&[0, 3, 0], &[9, 4, 9]),
        ]
    }
}

pub fn fine_boxes(dim: usize) -> Vec<IndexSpace> {
    if dim == 2 {
        vec![
            IndexSpace::from_bounds(&[4, 4], &[7, 7]),
            IndexSpace::from_bounds(&[8, 4], &[13, 7]),
        ]
    } else {
        vec![
            IndexSpace::from_bounds(&[4, 4, 4], &[7, 7, 7]),
            IndexSpace::from_bounds(&[8, 4, 4], &[13, 7, 7]),
        ]
    }
}

/// The two-level test hierarchy used throughout the data-ops scenarios.
pub fn build_hierarchy(dim: usize) -> Arc<PatchHierarchy> {
    let (x_lo, x_up): (Vec<f64>, Vec<f64>) = if dim == 2 {
        (vec![0.0, 0.0], vec![1.0, 0.5])
    } else {
        (vec![0.0, 0.0, 0.0], vec![1.0, 0.5, 1.0])
    };
    let geometry = Arc::new(BlockGeometry::cartesian(&x_lo, &x_up, coarse_boxes(dim)));
    let comm: Arc<dyn gridquilt::message::comm::Communicator> = Arc::new(SerialCommunicator);
    let db = VariableDatabase::new();
    let hierarchy = PatchHierarchy::new(geometry.clone(), comm.clone(), db);

    let mut layer0 = BoxLevel::new(IntVector::one(dim), geometry.clone(), comm.clone());
    for space in coarse_boxes(dim) {
        layer0.add_box(space, BlockId(0));
    }
    hierarchy.make_new_level(0, Arc::new(layer0));

    let mut layer1 = BoxLevel::new(IntVector::uniform(dim, 2), geometry, comm);
    for space in fine_boxes(dim) {
        layer1.add_box(space, BlockId(0));
    }
    hierarchy.make_new_level(1, Arc::new(layer1));

    hierarchy
}

/// The node-like axes of one component of a centering.
fn node_axes(centering: Centering, component: usize, dim: usize) -> Vec<usize> {
    match centering {
        Centering::Node => (0..dim).collect(),
        Centering::Edge => (0..dim).filter(|a| *a != component).collect(),
        _ => panic!("control volumes are built for node or edge data here"),
    }
}

/// Whether a data point sits on the boundary of the fine-level footprint
/// along a node-like axis: exactly one side of the point's plane touches a
/// fine cell adjacent to the point.
fn on_fine_boundary(
    point: &IntVector,
    axis: usize,
    axes: &[usize],
    fine: &[IndexSpace],
) -> bool {
    let mut sides = [false, false];
    for (s, cell_a) in [(0, point[axis] - 1), (1, point[axis])] {
        let mut lower = *point;
        let mut upper = *point;
        lower[axis] = cell_a;
        upper[axis] = cell_a;
        for &a in axes {
            if a != axis {
                lower[a] -= 1;
            }
        }
        let probe = IndexSpace::new(lower, upper);
        sides[s] = fine.iter().any(|b| b.intersects(&probe));
    }
    sides[0] != sides[1]
}

/// Fill a node- or edge-centered control-volume entry with the boundary
/// weighting conventions: full cell volume in patch interiors, zero where a
/// finer level covers the cells or where an earlier patch of the same level
/// already owns the point, a factor 1/2 per domain-boundary incidence, and
/// a factor 3/2 per coarse-fine-boundary incidence.
pub fn fill_control_volume(hierarchy: &Arc<PatchHierarchy>, cv_id: DescriptorId) {
    let dim = hierarchy.dim();
    let fine = fine_boxes(dim);
    let coarse_under_fine = {
        let bounding = fine
            .iter()
            .fold(IndexSpace::empty(dim), |b, s| b.bounding(s));
        bounding.coarsen(&IntVector::uniform(dim, 2))
    };
    let domain_extent = hierarchy.geometry().domain_extent();

    for ln in 0..2 {
        let level = hierarchy.level(ln);
        let dx = level.cell_sizes();
        let volume: f64 = dx[..dim].iter().product();
        let patch_spaces: Vec<IndexSpace> = level
            .box_level()
            .boxes()
            .map(|b| b.space().clone())
            .collect();

        for (pi, lock) in level.patches().enumerate() {
            let mut patch = lock.write().unwrap();
            let space = patch.space().clone();
            let data = patch.data_mut(cv_id).as_double_mut();
            let centering = data.centering();
            for c in 0..data.num_components() {
                let axes = node_axes(centering, c, dim);
                let region = data.component(c).space().clone();
                for point in region.iter() {
                    let weight = point_weight(
                        &point,
                        &axes,
                        ln,
                        pi,
                        &space,
                        &patch_spaces,
                        &coarse_under_fine,
                        &domain_extent,
                        &fine,
                        volume,
                        centering,
                        c,
                    );
                    data.component_mut(c).set(&point, 0, weight);
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn point_weight(
    point: &IntVector,
    axes: &[usize],
    ln: usize,
    pi: usize,
    patch_space: &IndexSpace,
    patch_spaces: &[IndexSpace],
    coarse_under_fine: &IndexSpace,
    domain_extent: &IntVector,
    fine: &[IndexSpace],
    volume: f64,
    centering: Centering,
    component: usize,
) -> f64 {
    let contains = |cells: &IndexSpace| {
        let mut data_box = cells.clone();
        for &a in axes {
            data_box = data_box.grow_upper(a, 1);
        }
        data_box.contains(point)
    };

    // Points shared with an earlier patch are counted there.
    for earlier in &patch_spaces[..pi] {
        if contains(earlier) {
            return 0.0;
        }
    }
    // Coarse points under the fine level carry no weight.
    if ln == 0 {
        let under = coarse_under_fine.intersect(patch_space);
        if !under.is_empty() && contains(&under) {
            return 0.0;
        }
    }

    let _ = (centering, component);
    let mut weight = volume;
    for &a in axes {
        if ln == 0 {
            if point[a] == 0 || point[a] == domain_extent[a] {
                weight *= 0.5;
            }
        } else if on_fine_boundary(point, a, axes, fine) {
            weight *= 1.5;
        }
    }
    weight
}

pub fn assert_close(got: f64, expected: f64, what: &str) {
    assert! {
        (got - expected).abs() <= 1e-9 * expected.abs().max(1.0),
        "{}: expected {}, got {}",
        what,
        expected,
        got
    };
}
