//! Two-level advection of a scalar field, driven through the hyperbolic
//! level integrator: ghost fills with time interpolation, flux-corrected
//! synchronization, and CFL-based timestep control, all on one process.

use clap::Parser;
use gridquilt::box_level::BoxLevel;
use gridquilt::data_ops::HierarchyDataOps;
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
use gridquilt::patch_data::{Centering, ScalarKind};
use gridquilt::variable::{DataContext, Variable, VariableDatabase};
use log::info;
use std::sync::Arc;

#[derive(Parser)]
#[command(about = "Advect a scalar bump on a two-level mesh")]
struct Opts {
    /// Number of coarse timesteps to run
    #[arg(long, default_value_t = 20)]
    steps: usize,

    /// Coarse cells per axis
    #[arg(long, default_value_t = 32)]
    cells: i64,

    /// CFL factor
    #[arg(long, default_value_t = 0.8)]
    cfl: f64,
}

const VELOCITY: [f64; 2] = [1.0, 0.5];

struct Advection {
    u: Variable,
    flux: Variable,
}

impl Advection {
    fn new() -> Self {
        Self {
            u: Variable::cell("u", ScalarKind::Double, 1),
            flux: Variable::face("flux", ScalarKind::Double, 1),
        }
    }
}

impl HyperbolicPatchStrategy for Advection {
    fn register_model_variables(&self, integrator: &mut HyperbolicLevelIntegrator) {
        integrator.register_variable(
            self.u.clone(),
            IntVector::uniform(2, 2),
            VariableRole::TimeDep,
            "CONSERVATIVE_COARSEN",
            "CONSTANT_REFINE",
        );
        integrator.register_variable(
            self.flux.clone(),
            IntVector::zero(2),
            VariableRole::Flux,
            "CONSERVATIVE_COARSEN",
            "",
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
        let dx = patch.cell_sizes();
        let interior = patch.space().clone();
        let data = patch.data_mut(id).as_double_mut();
        for index in interior.iter() {
            let x = (index[0] as f64 + 0.5) * dx[0] - 0.3;
            let y = (index[1] as f64 + 0.5) * dx[1] - 0.3;
            let r2 = x * x + y * y;
            data.component_mut(0).set(&index, 0, (-r2 / 0.005).exp());
        }
    }

    fn compute_stable_dt_on_patch(
        &self,
        patch: &Patch,
        _ctx: &DataContext,
        _initial_time: bool,
        _time: f64,
    ) -> f64 {
        let dx = patch.cell_sizes();
        dx[0].min(dx[1]) / VELOCITY[0].abs().max(VELOCITY[1].abs())
    }

    fn compute_fluxes_on_patch(&self, patch: &mut Patch, ctx: &DataContext, _time: f64, dt: f64) {
        let u_id = ctx.id(&self.u);
        let f_id = ctx.id(&self.flux);
        let interior = patch.space().clone();
        let domain = patch.domain_boxes();

        let (flux_data, u_data) = patch.data_pair_mut(f_id, u_id);
        let u = u_data.as_double();
        let flux = flux_data.as_double_mut();

        for axis in 0..2 {
            let a = VELOCITY[axis];
            for face in Centering::Face.component_space(&interior, axis).iter() {
                let on_boundary = domain
                    .iter()
                    .all(|b| face[axis] == b.lower()[axis] || face[axis] == b.upper()[axis] + 1);
                let value = if on_boundary {
                    0.0
                } else {
                    let mut upwind = face;
                    if a > 0.0 {
                        upwind[axis] -= 1;
                    }
                    a * u.component(0).get(&upwind, 0) * dt
                };
                flux.component_mut(axis).set(&face, 0, value);
            }
        }
    }

    fn conservative_difference_on_patch(
        &self,
        patch: &mut Patch,
        ctx: &DataContext,
        _time: f64,
        _dt: f64,
        _at_synchronization: bool,
    ) {
        let u_id = ctx.id(&self.u);
        let f_id = ctx.id(&self.flux);
        let dx = patch.cell_sizes();
        let interior = patch.space().clone();

        let (u_data, flux_data) = patch.data_pair_mut(u_id, f_id);
        let flux = flux_data.as_double();
        let u = u_data.as_double_mut();

        for index in interior.iter() {
            let mut update = 0.0;
            for axis in 0..2 {
                let mut upper = index;
                upper[axis] += 1;
                update += (flux.component(axis).get(&upper, 0)
                    - flux.component(axis).get(&index, 0))
                    / dx[axis];
            }
            let value = u.component(0).get(&index, 0) - update;
            u.component_mut(0).set(&index, 0, value);
        }
    }

    fn set_physical_boundary_conditions(
        &self,
        patch: &mut Patch,
        ctx: &DataContext,
        _fill_time: f64,
        ghost_width: &IntVector,
    ) {
        let id = ctx.id(&self.u);
        let domain = patch.domain_boxes();
        let ghost_box = patch.space().grow(ghost_width);
        let data = patch.data_mut(id).as_double_mut();
        for index in ghost_box.iter() {
            if !domain.iter().any(|b| b.contains(&index)) {
                data.component_mut(0).set(&index, 0, 0.0);
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

fn main() {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .init()
        .unwrap();
    let opts = Opts::parse();
    let n = opts.cells;

    let geometry = Arc::new(BlockGeometry::cartesian(
        &[0.0, 0.0],
        &[1.0, 1.0],
        vec![IndexSpace::from_bounds(&[0, 0], &[n - 1, n - 1])],
    ));
    let comm: Arc<dyn gridquilt::message::comm::Communicator> = Arc::new(SerialCommunicator);
    let db = VariableDatabase::new();
    let hierarchy = PatchHierarchy::new(geometry.clone(), comm.clone(), db.clone());

    let mut layer0 = BoxLevel::new(IntVector::one(2), geometry.clone(), comm.clone());
    layer0.add_box(IndexSpace::from_bounds(&[0, 0], &[n - 1, n / 2 - 1]), BlockId(0));
    layer0.add_box(IndexSpace::from_bounds(&[0, n / 2], &[n - 1, n - 1]), BlockId(0));
    hierarchy.make_new_level(0, Arc::new(layer0));

    // A static refined window over the initial bump.
    let (flo, fhi) = (n / 4, 3 * n / 4 - 1);
    let mut layer1 = BoxLevel::new(IntVector::uniform(2, 2), geometry, comm);
    layer1.add_box(
        IndexSpace::from_bounds(&[2 * flo, 2 * flo], &[2 * fhi + 1, 2 * fhi + 1]),
        BlockId(0),
    );
    hierarchy.make_new_level(1, Arc::new(layer1));

    let mut integrator = HyperbolicLevelIntegrator::new(
        "Advection",
        db.clone(),
        IntegratorConfig::new(opts.cfl, opts.cfl),
        Arc::new(Advection::new()),
        true,
    );
    integrator.initialize_level_integrator(&Tags);
    integrator.initialize_level_data(&hierarchy, 0, 0.0, true, true, None, true);
    integrator.initialize_level_data(&hierarchy, 1, 0.0, false, true, None, true);
    integrator.reset_hierarchy_configuration(&hierarchy, 0, 1);
    integrator.synchronize_new_levels(&hierarchy, 0, 1, 0.0, true);

    let u = db.add_variable(Variable::cell("u", ScalarKind::Double, 1));
    let cur_id = db
        .map_variable_and_context(&u, &db.get_context("CURRENT"))
        .unwrap();
    let ops = HierarchyDataOps::<f64>::new(hierarchy.clone(), 0, 1);

    let level0 = hierarchy.level(0);
    let level1 = hierarchy.level(1);
    let mut time = 0.0;
    let mut dt = integrator.get_level_dt(&level0, time, true);

    for step in 0..opts.steps {
        let dt_next = integrator.advance_level(&level0, &hierarchy, time, time + dt, true, true, false);

        let half = dt / 2.0;
        integrator.advance_level(&level1, &hierarchy, time, time + half, true, false, false);
        integrator.reset_time_dependent_data(&level1, time + half, false);
        integrator.advance_level(&level1, &hierarchy, time + half, time + dt, false, true, false);

        integrator.standard_level_synchronization_at(&hierarchy, 0, 1, time + dt, time);

        integrator.reset_time_dependent_data(&level1, time + dt, false);
        integrator.reset_time_dependent_data(&level0, time + dt, true);

        time += dt;
        dt = dt_next;

        info!(
            "step {:3}  t = {:.5}  dt = {:.5}  max u = {:.6}",
            step + 1,
            time,
            dt,
            ops.max_norm(cur_id, None)
        );
    }
}
