//! Node-centered complex hierarchy data operations over the same two-level
//! mesh: complex arithmetic sequences, weighted and unweighted norms, and
//! the conjugating inner product.

mod common;

use common::{assert_close, build_hierarchy, fill_control_volume};
use gridquilt::data_ops::HierarchyDataOps;
use gridquilt::hierarchy::PatchHierarchy;
use gridquilt::int_vector::IntVector;
use gridquilt::patch_data::ScalarKind;
use gridquilt::variable::{ComponentSelector, DescriptorId, Variable};
use num_complex::Complex64;
use std::sync::Arc;

const NVARS: usize = 4;

struct Fixture {
    hierarchy: Arc<PatchHierarchy>,
    v: [DescriptorId; NVARS],
    wgt: DescriptorId,
}

fn node_fixture(dim: usize) -> Fixture {
    let hierarchy = build_hierarchy(dim);
    let db = hierarchy.db().clone();
    let ctx = db.get_context("dummy");
    let no_ghosts = IntVector::zero(dim);

    let mut v = [0; NVARS];
    for (i, id) in v.iter_mut().enumerate() {
        let var = db.add_variable(Variable::node(
            &format!("nvar{}", i),
            ScalarKind::Complex,
            1,
        ));
        *id = db.register_variable_and_context(&var, &ctx, &no_ghosts);
    }
    let wgt_var = db.add_variable(Variable::node("nwgt", ScalarKind::Double, 1));
    let wgt = db.register_variable_and_context(&wgt_var, &ctx, &no_ghosts);

    let selector: ComponentSelector = v.iter().copied().chain([wgt]).collect();
    for ln in 0..2 {
        hierarchy.level(ln).allocate_patch_data(&selector, 0.0);
    }
    fill_control_volume(&hierarchy, wgt);
    Fixture { hierarchy, v, wgt }
}

fn all_equal(hierarchy: &Arc<PatchHierarchy>, id: DescriptorId, value: Complex64) -> bool {
    for ln in 0..2 {
        let level = hierarchy.level(ln);
        for lock in level.patches() {
            let patch = lock.read().unwrap();
            let data = patch.data(id).as_set::<Complex64>();
            for slot in data.component(0).values() {
                if (slot - value).norm() > 1e-9 {
                    return false;
                }
            }
        }
    }
    true
}

fn place_value(
    hierarchy: &Arc<PatchHierarchy>,
    id: DescriptorId,
    node: &IntVector,
    value: Complex64,
) {
    let level = hierarchy.level(0);
    for lock in level.patches() {
        let mut patch = lock.write().unwrap();
        let data = patch.data_mut(id).as_set_mut::<Complex64>();
        if data.component(0).space().contains(node) {
            data.component_mut(0).set(node, 0, value);
            return;
        }
    }
    panic!("node {} not found on the coarse level", node);
}

fn z(re: f64, im: f64) -> Complex64 {
    Complex64::new(re, im)
}

fn run_node_scenario(dim: usize) {
    let Fixture { hierarchy, v, wgt } = node_fixture(dim);
    let ops = HierarchyDataOps::<Complex64>::new(hierarchy.clone(), 0, 1);

    ops.set_to_scalar(v[0], z(2.0, 1.5));
    ops.set_to_scalar(v[1], z(4.0, 3.0));
    ops.copy_data(v[2], v[1]);
    ops.swap_data(v[0], v[1]);
    assert!(all_equal(&hierarchy, v[0], z(4.0, 3.0)));
    assert!(all_equal(&hierarchy, v[1], z(2.0, 1.5)));

    ops.scale(v[2], z(0.25, 0.0), v[2]);
    assert!(all_equal(&hierarchy, v[2], z(1.0, 0.75)));
    ops.add(v[3], v[0], v[1]);
    assert!(all_equal(&hierarchy, v[3], z(6.0, 4.5)));

    ops.set_to_scalar(v[0], z(0.0, 4.5));
    ops.subtract(v[1], v[3], v[0]);
    assert!(all_equal(&hierarchy, v[1], z(6.0, 0.0)));
    ops.add_scalar(v[1], v[1], z(0.0, -4.0));
    assert!(all_equal(&hierarchy, v[1], z(6.0, -4.0)));
    ops.add_scalar(v[2], v[2], z(0.0, 0.25));
    assert!(all_equal(&hierarchy, v[2], z(1.0, 1.0)));
    ops.add_scalar(v[2], v[2], z(3.0, -4.0));
    assert!(all_equal(&hierarchy, v[2], z(4.0, -3.0)));

    ops.set_to_scalar(v[3], z(0.5, 0.0));
    ops.multiply(v[1], v[3], v[1]);
    assert!(all_equal(&hierarchy, v[1], z(3.0, -2.0)));
    ops.divide(v[0], v[2], v[1]);
    assert!(all_equal(
        &hierarchy,
        v[0],
        z(18.0 / 13.0, -1.0 / 13.0)
    ));
    ops.reciprocal(v[1], v[1]);
    assert!(all_equal(&hierarchy, v[1], z(3.0 / 13.0, 2.0 / 13.0)));

    let entries_expected = if dim == 2 { 121 } else { 1001 };
    assert_close(ops.sum_control_volumes(v[0], wgt), 0.5, "sum of control volumes");
    assert_eq!(ops.number_of_entries(v[0], true), entries_expected);

    // Bogus values at two zero-weight coarse nodes.
    ops.set_to_scalar(v[2], z(4.0, -3.0));
    let (node0, node1) = if dim == 2 {
        (IntVector::new(&[2, 2]), IntVector::new(&[6, 4]))
    } else {
        (IntVector::new(&[2, 2, 2]), IntVector::new(&[6, 4, 4]))
    };
    place_value(&hierarchy, v[2], &node0, z(100.0, -50.0));
    place_value(&hierarchy, v[2], &node1, z(-1000.0, 20.0));

    let l1_expected = if dim == 2 {
        1787.0033787552382
    } else {
        6837.003378755238
    };
    assert_close(ops.l1_norm(v[2], None), l1_expected, "unweighted L1 norm");
    assert_close(ops.l1_norm(v[2], Some(wgt)), 2.5, "weighted L1 norm");
    assert_close(
        ops.l2_norm(v[2], Some(wgt)),
        3.5355339059327378,
        "weighted L2 norm",
    );
    assert_close(
        ops.max_norm(v[2], None),
        1000.1999800039992,
        "unweighted max norm",
    );
    assert_close(ops.max_norm(v[2], Some(wgt)), 5.0, "weighted max norm");

    ops.set_to_scalar(v[0], z(1.0, -3.0));
    ops.set_to_scalar(v[1], z(2.5, 3.0));
    ops.set_to_scalar(v[2], z(7.0, 0.0));

    ops.linear_sum(v[3], z(2.0, 0.0), v[1], z(0.0, -1.0), v[0]);
    assert!(all_equal(&hierarchy, v[3], z(2.0, 5.0)));
    ops.axmy(v[3], z(3.0, 0.0), v[1], v[0]);
    assert!(all_equal(&hierarchy, v[3], z(6.5, 12.0)));

    let dot21 = ops.dot(v[2], v[1], Some(wgt));
    assert_close(dot21.re, 8.75, "dot(v2, v1) real part");
    assert_close(dot21.im, -10.5, "dot(v2, v1) imaginary part");
    let dot12 = ops.dot(v[1], v[2], Some(wgt));
    assert_close(dot12.re, 8.75, "dot(v1, v2) real part");
    assert_close(dot12.im, 10.5, "dot(v1, v2) imaginary part");

    // The modulus writes into a double entry of the same centering; the
    // weight array is done serving as a control volume by now.
    ops.set_to_scalar(v[0], z(4.0, -3.0));
    ops.magnitude(wgt, v[0]);
    let level = hierarchy.level(0);
    let lock = level.patches().next().unwrap();
    let patch = lock.read().unwrap();
    let sample = patch
        .data(wgt)
        .as_double()
        .component(0)
        .get(&IntVector::new(&(vec![1; dim])[..]), 0);
    assert_close(sample, 5.0, "pointwise modulus");
}

#[test]
fn node_complex_hierarchy_ops_2d() {
    run_node_scenario(2);
}

#[test]
fn node_complex_hierarchy_ops_3d() {
    run_node_scenario(3);
}
