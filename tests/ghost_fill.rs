//! Ghost-fill round trip on a two-level hierarchy: after executing the
//! advance fill schedule, every interior cell is untouched and every ghost
//! cell holds either a same-level copy, a value refined from the coarser
//! level, or the boundary-condition value, and a second execution is
//! bitwise identical.

use gridquilt::box_level::BoxLevel;
use gridquilt::geometry::BlockGeometry;
use gridquilt::hierarchy::PatchHierarchy;
use gridquilt::hyperbolic::{
    GriddingTags, HyperbolicLevelIntegrator, HyperbolicPatchStrategy, IntegratorConfig,
    TagAndInitStrategy, VariableRole,
};
use gridquilt::index_space::{BlockId, IndexSpace};
use gridquilt::int_vector::IntVector;
use gridquilt::message::comm::SerialCommunicator;
use gridquilt::patch::Patch;
use gridquilt::patch_data::ScalarKind;
use gridquilt::variable::{DataContext, Variable, VariableDatabase};
use std::sync::Arc;

const BC_VALUE: f64 = -7.25;
const GHOSTS: i64 = 2;

/// The analytic field, evaluated at a cell center of the given level.
fn field(index: &IntVector, dx: f64) -> f64 {
    let x = (index[0] as f64 + 0.5) * dx;
    let y = (index[1] as f64 + 0.5) * dx;
    1.0 + x + 2.0 * y
}

struct FieldStrategy {
    u: Variable,
}

impl FieldStrategy {
    fn new() -> Self {
        Self {
            u: Variable::cell("u", ScalarKind::Double, 1),
        }
    }
}

impl HyperbolicPatchStrategy for FieldStrategy {
    fn register_model_variables(&self, integrator: &mut HyperbolicLevelIntegrator) {
        integrator.register_variable(
            self.u.clone(),
            IntVector::uniform(2, GHOSTS),
            VariableRole::TimeDep,
            "CONSERVATIVE_COARSEN",
            "CONSTANT_REFINE",
        );
    }

    fn initialize_data_on_patch(
        &self,
        patch: &mut Patch,
        ctx: &DataContext,
        _time: f64,
        _initial_time: bool,
    ) {
        let id = ctx.id(&self.u);
        let interior = patch.space().clone();
        let dx = patch.cell_sizes()[0];
        let data = patch.data_mut(id).as_double_mut();
        for index in interior.iter() {
            data.component_mut(0).set(&index, 0, field(&index, dx));
        }
    }

    fn compute_stable_dt_on_patch(
        &self,
        _patch: &Patch,
        _ctx: &DataContext,
        _initial_time: bool,
        _time: f64,
    ) -> f64 {
        0.1
    }

    fn compute_fluxes_on_patch(&self, _: &mut Patch, _: &DataContext, _: f64, _: f64) {}

    fn conservative_difference_on_patch(
        &self,
        _: &mut Patch,
        _: &DataContext,
        _: f64,
        _: f64,
        _: bool,
    ) {
    }

    fn set_physical_boundary_conditions(
        &self,
        patch: &mut Patch,
        ctx: &DataContext,
        _fill_time: f64,
        ghost_width: &IntVector,
    ) {
        // Cells beyond the physical domain take the sentinel value.
        let id = ctx.id(&self.u);
        let domain = patch.domain_boxes();
        let ghost_box = patch.space().grow(ghost_width);
        let data = patch.data_mut(id).as_double_mut();
        for index in ghost_box.iter() {
            if !domain.iter().any(|b| b.contains(&index)) {
                data.component_mut(0).set(&index, 0, BC_VALUE);
            }
        }
    }
}

struct Tags;

impl GriddingTags for Tags {
    fn error_coarsen_ratio(&self) -> i32 {
        2
    }

    fn ever_uses_time_integration(&self) -> bool {
        false
    }
}

fn build(strategy: Arc<FieldStrategy>) -> (Arc<PatchHierarchy>, HyperbolicLevelIntegrator) {
    let geometry = Arc::new(BlockGeometry::cartesian(
        &[0.0, 0.0],
        &[1.0, 1.0],
        vec![IndexSpace::from_bounds(&[0, 0], &[9, 9])],
    ));
    let comm: Arc<dyn gridquilt::message::comm::Communicator> = Arc::new(SerialCommunicator);
    let db = VariableDatabase::new();
    let hierarchy = PatchHierarchy::new(geometry.clone(), comm.clone(), db.clone());

    let mut layer0 = BoxLevel::new(IntVector::one(2), geometry.clone(), comm.clone());
    layer0.add_box(IndexSpace::from_bounds(&[0, 0], &[9, 4]), BlockId(0));
    layer0.add_box(IndexSpace::from_bounds(&[0, 5], &[9, 9]), BlockId(0));
    hierarchy.make_new_level(0, Arc::new(layer0));

    // The fine level reaches the lower x boundary so the fill draws on all
    // three sources: sibling patches, the coarser level, and the physical
    // boundary routine.
    let mut layer1 = BoxLevel::new(IntVector::uniform(2, 2), geometry, comm);
    layer1.add_box(IndexSpace::from_bounds(&[0, 4], &[7, 11]), BlockId(0));
    layer1.add_box(IndexSpace::from_bounds(&[8, 4], &[19, 11]), BlockId(0));
    hierarchy.make_new_level(1, Arc::new(layer1));

    let mut integrator = HyperbolicLevelIntegrator::new(
        "GhostFillIntegrator",
        db,
        IntegratorConfig::new(0.9, 0.9),
        strategy,
        true,
    );
    integrator.initialize_level_integrator(&Tags);

    integrator.initialize_level_data(&hierarchy, 0, 0.0, true, true, None, true);
    integrator.initialize_level_data(&hierarchy, 1, 0.0, false, true, None, true);
    integrator.reset_hierarchy_configuration(&hierarchy, 0, 1);

    (hierarchy, integrator)
}

fn scratch_snapshot(
    hierarchy: &Arc<PatchHierarchy>,
    id: usize,
) -> Vec<Vec<f64>> {
    let level = hierarchy.level(1);
    level
        .patches()
        .map(|lock| {
            lock.read()
                .unwrap()
                .data(id)
                .as_double()
                .component(0)
                .values()
                .to_vec()
        })
        .collect()
}

#[test]
fn ghost_fill_round_trip() {
    let strategy = Arc::new(FieldStrategy::new());
    let (hierarchy, integrator) = build(strategy.clone());

    let db = hierarchy.db();
    let u = db.add_variable(strategy.u.clone());
    let scratch_id = db
        .map_variable_and_context(&u, &db.get_context("SCRATCH"))
        .unwrap();

    let fine_level = hierarchy.level(1);
    fine_level.allocate_patch_data(integrator.scratch_data_selector(), 0.0);

    let schedule = integrator.advance_schedule(1).unwrap();
    schedule.fill_data(0.0, true);

    let fine_interiors: Vec<IndexSpace> = fine_level
        .box_level()
        .boxes()
        .map(|b| b.space().clone())
        .collect();
    let domain = IndexSpace::from_bounds(&[0, 0], &[19, 19]);
    let dx_fine = 0.05;
    let dx_coarse = 0.1;

    for lock in fine_level.patches() {
        let patch = lock.read().unwrap();
        let interior = patch.space().clone();
        let data = patch.data(scratch_id).as_double();
        for index in interior.grow_all(GHOSTS).iter() {
            let got = data.component(0).get(&index, 0);
            let expected = if fine_interiors.iter().any(|b| b.contains(&index)) {
                // Interior, or a ghost covered by a sibling patch: the
                // same-level analytic value.
                field(&index, dx_fine)
            } else if !domain.contains(&index) {
                BC_VALUE
            } else {
                // Refined from the coarser level by constant interpolation:
                // the value of the containing coarse cell.
                field(&index.floor_divide(&IntVector::uniform(2, 2)), dx_coarse)
            };
            assert! {
                (got - expected).abs() < 1e-12,
                "fine ghost value at {} is {} (expected {})",
                index,
                got,
                expected
            };
        }
    }

    // Executing the same schedule again must reproduce the data bitwise.
    let before = scratch_snapshot(&hierarchy, scratch_id);
    schedule.fill_data(0.0, true);
    let after = scratch_snapshot(&hierarchy, scratch_id);
    assert_eq!(before, after);

    fine_level.deallocate_patch_data(integrator.scratch_data_selector());
}

#[test]
fn level_dt_scales_by_the_initial_cfl() {
    let strategy = Arc::new(FieldStrategy::new());
    let (hierarchy, integrator) = build(strategy);

    // Every patch reports 0.1; the initial dt applies min(cfl, cfl_init).
    let dt = integrator.get_level_dt(&hierarchy.level(0), 0.0, true);
    assert!((dt - 0.1 * 0.9).abs() < 1e-12);

    // The finer level takes the coarse increment over the largest ratio.
    let finer = integrator.get_max_finer_level_dt(1, dt, &IntVector::uniform(2, 2));
    assert!((finer - dt / 2.0).abs() < 1e-12);
}
