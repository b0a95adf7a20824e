use crate::coarsen_algorithm::CoarsenAlgorithm;
use crate::fluxsum::up_flux_sum_all;
use crate::hierarchy::PatchHierarchy;
use crate::index_space::IndexSpace;
use crate::int_vector::IntVector;
use crate::message::comm::{Communicator, Reduce};
use crate::patch::Patch;
use crate::patch_data::{Centering, ScalarKind};
use crate::patch_level::PatchLevel;
use crate::refine_algorithm::RefineAlgorithm;
use crate::refine_schedule::{RefinePatchStrategy, RefineSchedule};
use crate::restart::{RestartDatabase, RestartError};
use crate::transfer::{lookup_coarsen_operator, lookup_refine_operator};
use crate::variable::{
    ComponentSelector, DataContext, DescriptorId, Variable, VariableContext, VariableDatabase,
};
use log::{debug, info};
use rayon::prelude::*;
use std::sync::Arc;

const INTEGRATOR_VERSION: i64 = 3;

/// The storage role of a registered variable, deciding which contexts are
/// created and which communication plans the variable joins.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum VariableRole {
    /// Evolves in time: CURRENT, NEW and SCRATCH storage (plus OLD in
    /// three-time-level mode), ghost fill with time interpolation from
    /// coarser levels, conservative synchronization.
    TimeDep,
    /// Set once and never advanced: CURRENT and SCRATCH storage, filled
    /// from CURRENT.
    Input,
    /// User-managed storage: CURRENT (with ghosts) and a SCRATCH used only
    /// when building new levels; never filled by the integrator.
    NoFill,
    /// Face- or side-centered flux storage: SCRATCH only, plus an
    /// automatically created outer flux-integral companion for refluxing.
    Flux,
    /// Work space allocated around single patch kernels: SCRATCH only.
    Temporary,
}

/// The two-method view of the gridding algorithm the integrator needs: the
/// error coarsen ratio and whether time-integrated error estimation is ever
/// used. Three time levels of data are kept exactly when the ratio is 3 and
/// time integration is in play.
pub trait GriddingTags {
    fn error_coarsen_ratio(&self) -> i32;
    fn ever_uses_time_integration(&self) -> bool;
}

/// The capability set the gridding side consumes, implemented by the
/// integrator. Keeping the gridding algorithm behind [`GriddingTags`] and
/// the integrator behind this trait breaks the ownership cycle between the
/// two.
pub trait TagAndInitStrategy {
    #[allow(clippy::too_many_arguments)]
    fn initialize_level_data(
        &mut self,
        hierarchy: &Arc<PatchHierarchy>,
        level_number: i32,
        init_data_time: f64,
        can_be_refined: bool,
        initial_time: bool,
        old_level: Option<&Arc<PatchLevel>>,
        allocate_data: bool,
    );

    fn reset_hierarchy_configuration(
        &mut self,
        hierarchy: &Arc<PatchHierarchy>,
        coarsest_level: i32,
        finest_level: i32,
    );

    #[allow(clippy::too_many_arguments)]
    fn apply_gradient_detector(
        &mut self,
        hierarchy: &Arc<PatchHierarchy>,
        level_number: i32,
        error_data_time: f64,
        tag_index: DescriptorId,
        initial_time: bool,
        uses_richardson_extrapolation_too: bool,
    );

    #[allow(clippy::too_many_arguments)]
    fn apply_richardson_extrapolation(
        &mut self,
        level: &Arc<PatchLevel>,
        error_data_time: f64,
        tag_index: DescriptorId,
        deltat: f64,
        error_coarsen_ratio: i32,
        initial_time: bool,
        uses_gradient_detector_too: bool,
    );

    fn coarsen_data_for_richardson_extrapolation(
        &mut self,
        hierarchy: &Arc<PatchHierarchy>,
        level_number: i32,
        coarse_level: &Arc<PatchLevel>,
        coarsen_data_time: f64,
        before_advance: bool,
    );
}

/// The per-patch numerical kernels and boundary routines supplied by the
/// application. The integrator passes the active storage context to every
/// callback; user code resolves its variables against it rather than
/// assuming which context the framework is operating on.
#[allow(unused_variables)]
pub trait HyperbolicPatchStrategy: Send + Sync {
    /// Enumerate model variables, calling back into
    /// [`HyperbolicLevelIntegrator::register_variable`] for each.
    fn register_model_variables(&self, integrator: &mut HyperbolicLevelIntegrator);

    /// Set CURRENT interior values on a new patch.
    fn initialize_data_on_patch(
        &self,
        patch: &mut Patch,
        ctx: &DataContext,
        time: f64,
        initial_time: bool,
    );

    /// Return the stable timestep for one patch; must be positive.
    fn compute_stable_dt_on_patch(
        &self,
        patch: &Patch,
        ctx: &DataContext,
        initial_time: bool,
        time: f64,
    ) -> f64;

    /// Write the time-integrated fluxes from the ghosted state.
    fn compute_fluxes_on_patch(&self, patch: &mut Patch, ctx: &DataContext, time: f64, dt: f64);

    /// Update the state interior from the fluxes.
    fn conservative_difference_on_patch(
        &self,
        patch: &mut Patch,
        ctx: &DataContext,
        time: f64,
        dt: f64,
        at_synchronization: bool,
    );

    fn preprocess_advance_level_state(
        &self,
        level: &PatchLevel,
        ctx: &DataContext,
        current_time: f64,
        dt: f64,
        first_step: bool,
        last_step: bool,
        regrid_advance: bool,
    ) {
    }

    fn postprocess_advance_level_state(
        &self,
        level: &PatchLevel,
        ctx: &DataContext,
        current_time: f64,
        dt: f64,
        first_step: bool,
        last_step: bool,
        regrid_advance: bool,
    ) {
    }

    /// Populate ghost values at the regular physical boundary.
    fn set_physical_boundary_conditions(
        &self,
        patch: &mut Patch,
        ctx: &DataContext,
        fill_time: f64,
        ghost_width: &IntVector,
    );

    /// Populate ghost values in enhanced-connectivity zones, reading the
    /// auxiliary level filled for that purpose.
    fn fill_singularity_boundary_conditions(
        &self,
        patch: &mut Patch,
        ctx: &DataContext,
        encon_level: &PatchLevel,
        regions: &[IndexSpace],
        fill_time: f64,
    ) {
    }

    /// Mark cells needing refinement based on gradient criteria.
    fn tag_gradient_detector_cells(
        &self,
        patch: &mut Patch,
        ctx: &DataContext,
        error_data_time: f64,
        tag_index: DescriptorId,
        initial_time: bool,
        uses_richardson_extrapolation_too: bool,
    ) {
    }

    /// Mark cells needing refinement by comparing the coarse and fine
    /// advances of the same initial state.
    #[allow(clippy::too_many_arguments)]
    fn tag_richardson_extrapolation_cells(
        &self,
        patch: &mut Patch,
        error_level_number: i32,
        coarsened_fine: &DataContext,
        advanced_coarse: &DataContext,
        error_data_time: f64,
        deltat: f64,
        error_coarsen_ratio: i32,
        initial_time: bool,
        tag_index: DescriptorId,
        uses_gradient_detector_too: bool,
    ) {
    }

    /// The widest stencil the user applies around fill regions.
    fn refine_op_stencil_width(&self, dim: usize) -> IntVector {
        IntVector::zero(dim)
    }
}

/// Scalar configuration of the integrator, normally deserialized from the
/// driver's input. `cfl` scales every timestep after the first; `cfl_init`
/// applies to the first timestep of a level.
#[derive(Clone, Debug, serde::Deserialize)]
pub struct IntegratorConfig {
    pub cfl: f64,
    pub cfl_init: f64,
    #[serde(default = "default_true")]
    pub lag_dt_computation: bool,
    #[serde(default)]
    pub use_ghosts_to_compute_dt: bool,
    #[serde(default = "default_true")]
    pub use_flux_correction: bool,
    #[serde(default, rename = "DEV_distinguish_mpi_reduction_costs")]
    pub distinguish_mpi_reduction_costs: bool,
    #[serde(default, rename = "DEV_barrier_advance_level_sections")]
    pub barrier_advance_level_sections: bool,
    #[serde(default)]
    pub read_on_restart: bool,
}

fn default_true() -> bool {
    true
}

impl IntegratorConfig {
    pub fn new(cfl: f64, cfl_init: f64) -> Self {
        Self {
            cfl,
            cfl_init,
            lag_dt_computation: true,
            use_ghosts_to_compute_dt: false,
            use_flux_correction: true,
            distinguish_mpi_reduction_costs: false,
            barrier_advance_level_sections: false,
            read_on_restart: false,
        }
    }
}

/// Forwards the refine schedule's boundary hooks to the user strategy with
/// the scratch context active.
struct RefineAdapter {
    strategy: Arc<dyn HyperbolicPatchStrategy>,
    ctx: DataContext,
}

impl RefinePatchStrategy for RefineAdapter {
    fn stencil_width(&self, dim: usize) -> IntVector {
        self.strategy.refine_op_stencil_width(dim)
    }

    fn fill_physical_boundary(&self, patch: &mut Patch, time: f64, ghost_width: &IntVector) {
        self.strategy
            .set_physical_boundary_conditions(patch, &self.ctx, time, ghost_width);
    }

    fn fill_singularity_boundary(
        &self,
        patch: &mut Patch,
        encon_level: &PatchLevel,
        regions: &[IndexSpace],
        time: f64,
    ) {
        self.strategy.fill_singularity_boundary_conditions(
            patch,
            &self.ctx,
            encon_level,
            regions,
            time,
        );
    }
}

/// Explicit time integration of hyperbolic conservation laws, one hierarchy
/// level at a time: ghost fill, flux computation, conservative difference,
/// flux synchronization across coarse-fine boundaries, and CFL timestep
/// computation. Supports time refinement with two or three time levels of
/// data per variable.
pub struct HyperbolicLevelIntegrator {
    name: String,
    config: IntegratorConfig,
    strategy: Arc<dyn HyperbolicPatchStrategy>,
    use_time_refinement: bool,
    db: Arc<VariableDatabase>,

    scratch: Arc<VariableContext>,
    current: Arc<VariableContext>,
    new: Arc<VariableContext>,
    old: Option<Arc<VariableContext>>,
    number_time_data_levels: usize,

    flux_is_face: bool,
    flux_face_registered: bool,
    flux_side_registered: bool,
    have_flux_on_level_zero: bool,

    all_variables: Vec<Arc<Variable>>,
    time_dep_variables: Vec<Arc<Variable>>,
    flux_variables: Vec<Arc<Variable>>,
    fluxsum_variables: Vec<Arc<Variable>>,

    temp_var_scratch_data: ComponentSelector,
    saved_var_scratch_data: ComponentSelector,
    new_patch_init_data: ComponentSelector,
    new_time_dep_data: ComponentSelector,
    old_time_dep_data: ComponentSelector,
    flux_var_data: ComponentSelector,
    fluxsum_data: ComponentSelector,

    bdry_fill_advance: RefineAlgorithm,
    bdry_fill_advance_new: RefineAlgorithm,
    bdry_fill_advance_old: RefineAlgorithm,
    fill_new_level: RefineAlgorithm,
    coarsen_fluxsum: CoarsenAlgorithm,
    coarsen_sync_data: CoarsenAlgorithm,
    sync_initial_data: CoarsenAlgorithm,
    coarsen_rich_extrap_init: CoarsenAlgorithm,
    coarsen_rich_extrap_final: CoarsenAlgorithm,

    bdry_sched_advance: Vec<Option<RefineSchedule>>,
    bdry_sched_advance_new: Vec<Option<RefineSchedule>>,
}

// ============================================================================
impl HyperbolicLevelIntegrator {
    pub fn new(
        name: &str,
        db: Arc<VariableDatabase>,
        config: IntegratorConfig,
        strategy: Arc<dyn HyperbolicPatchStrategy>,
        use_time_refinement: bool,
    ) -> Self {
        assert!(!name.is_empty());
        assert!(
            config.cfl.is_finite() && config.cfl_init.is_finite(),
            "{}: cfl and cfl_init are required",
            name
        );
        let scratch = db.get_context("SCRATCH");
        let current = db.get_context("CURRENT");
        let new = db.get_context("NEW");
        Self {
            name: name.to_string(),
            config,
            strategy,
            use_time_refinement,
            db,
            scratch,
            current,
            new,
            old: None,
            number_time_data_levels: 2,
            flux_is_face: true,
            flux_face_registered: false,
            flux_side_registered: false,
            have_flux_on_level_zero: false,
            all_variables: Vec::new(),
            time_dep_variables: Vec::new(),
            flux_variables: Vec::new(),
            fluxsum_variables: Vec::new(),
            temp_var_scratch_data: ComponentSelector::new(),
            saved_var_scratch_data: ComponentSelector::new(),
            new_patch_init_data: ComponentSelector::new(),
            new_time_dep_data: ComponentSelector::new(),
            old_time_dep_data: ComponentSelector::new(),
            flux_var_data: ComponentSelector::new(),
            fluxsum_data: ComponentSelector::new(),
            bdry_fill_advance: RefineAlgorithm::new(),
            bdry_fill_advance_new: RefineAlgorithm::new(),
            bdry_fill_advance_old: RefineAlgorithm::new(),
            fill_new_level: RefineAlgorithm::new(),
            coarsen_fluxsum: CoarsenAlgorithm::new(),
            coarsen_sync_data: CoarsenAlgorithm::new(),
            sync_initial_data: CoarsenAlgorithm::new(),
            coarsen_rich_extrap_init: CoarsenAlgorithm::new(),
            coarsen_rich_extrap_final: CoarsenAlgorithm::new(),
            bdry_sched_advance: Vec::new(),
            bdry_sched_advance_new: Vec::new(),
        }
    }

    /// Restore the scalar state written by [`put_to_restart`]; input values
    /// override the restart records only when `read_on_restart` is set in
    /// the input.
    ///
    /// [`put_to_restart`]: HyperbolicLevelIntegrator::put_to_restart
    pub fn from_restart(
        name: &str,
        db: Arc<VariableDatabase>,
        restart_db: &RestartDatabase,
        input: Option<IntegratorConfig>,
        strategy: Arc<dyn HyperbolicPatchStrategy>,
        use_time_refinement: bool,
    ) -> Result<Self, RestartError> {
        let version = restart_db.get_integer("ALGS_HYPERBOLIC_LEVEL_INTEGRATOR_VERSION")?;
        if version != INTEGRATOR_VERSION {
            return Err(RestartError::VersionMismatch {
                found: version,
                expected: INTEGRATOR_VERSION,
            });
        }
        let mut config = IntegratorConfig::new(
            restart_db.get_double("cfl")?,
            restart_db.get_double("cfl_init")?,
        );
        config.lag_dt_computation = restart_db.get_bool("lag_dt_computation")?;
        config.use_ghosts_to_compute_dt = restart_db.get_bool("use_ghosts_to_compute_dt")?;
        config.use_flux_correction = restart_db.get_bool("use_flux_correction")?;
        config.distinguish_mpi_reduction_costs =
            restart_db.get_bool("DEV_distinguish_mpi_reduction_costs")?;

        if let Some(input) = input {
            if input.read_on_restart {
                config = input;
            }
        }
        Ok(Self::new(name, db, config, strategy, use_time_refinement))
    }

    pub fn put_to_restart(&self, restart_db: &mut RestartDatabase) {
        restart_db.put_integer(
            "ALGS_HYPERBOLIC_LEVEL_INTEGRATOR_VERSION",
            INTEGRATOR_VERSION,
        );
        restart_db.put_double("cfl", self.config.cfl);
        restart_db.put_double("cfl_init", self.config.cfl_init);
        restart_db.put_bool("lag_dt_computation", self.config.lag_dt_computation);
        restart_db.put_bool(
            "use_ghosts_to_compute_dt",
            self.config.use_ghosts_to_compute_dt,
        );
        restart_db.put_bool("use_flux_correction", self.config.use_flux_correction);
        restart_db.put_bool(
            "DEV_distinguish_mpi_reduction_costs",
            self.config.distinguish_mpi_reduction_costs,
        );
    }

    /// Set up the integrator against the gridding algorithm's requirements
    /// and let the user strategy register its variables. Must run before
    /// any level is initialized.
    pub fn initialize_level_integrator(&mut self, gridding: &dyn GriddingTags) {
        let ratio = gridding.error_coarsen_ratio();
        assert! {
            (1..=3).contains(&ratio),
            "{}: gridding algorithm has bad error coarsen ratio {}",
            self.name,
            ratio
        };
        self.number_time_data_levels = 2;
        if gridding.ever_uses_time_integration() && ratio == 3 {
            self.number_time_data_levels = 3;
            self.old = Some(self.db.get_context("OLD"));
        }
        let strategy = self.strategy.clone();
        strategy.register_model_variables(self);
        info!(
            "{}: registered {} variables ({} time levels)",
            self.name,
            self.all_variables.len(),
            self.number_time_data_levels
        );
    }

    pub fn current_context(&self) -> DataContext {
        DataContext::new(self.db.clone(), self.current.clone())
    }

    pub fn scratch_context(&self) -> DataContext {
        DataContext::new(self.db.clone(), self.scratch.clone())
    }

    pub fn new_context(&self) -> DataContext {
        DataContext::new(self.db.clone(), self.new.clone())
    }

    /// The context whose data plotting and diagnostics should read.
    pub fn plot_context(&self) -> DataContext {
        self.current_context()
    }

    pub fn number_time_data_levels(&self) -> usize {
        self.number_time_data_levels
    }

    pub fn uses_flux_correction(&self) -> bool {
        self.config.use_flux_correction
    }

    /// Whether the outer driver advances finer levels with refined
    /// timesteps (as opposed to synchronized stepping).
    pub fn uses_time_refinement(&self) -> bool {
        self.use_time_refinement
    }

    pub fn registered_variables(&self) -> &[Arc<Variable>] {
        &self.all_variables
    }

    pub fn flux_variables(&self) -> &[Arc<Variable>] {
        &self.flux_variables
    }

    pub fn fluxsum_variables(&self) -> &[Arc<Variable>] {
        &self.fluxsum_variables
    }

    /// Register one model variable under the given role. Descriptor ids are
    /// assigned per context, the variable joins the appropriate component
    /// selectors, and every communication plan it participates in learns
    /// about it here.
    pub fn register_variable(
        &mut self,
        variable: Variable,
        ghosts: IntVector,
        role: VariableRole,
        coarsen_name: &str,
        refine_name: &str,
    ) {
        let dim = ghosts.dim();
        let zero_ghosts = IntVector::zero(dim);
        let var = self.db.add_variable(variable);
        self.all_variables.push(var.clone());

        match role {
            VariableRole::TimeDep => {
                self.time_dep_variables.push(var.clone());

                let cur_id =
                    self.db
                        .register_variable_and_context(&var, &self.current, &zero_ghosts);
                let new_id = self
                    .db
                    .register_variable_and_context(&var, &self.new, &zero_ghosts);
                let scr_id = self
                    .db
                    .register_variable_and_context(&var, &self.scratch, &ghosts);

                self.saved_var_scratch_data.set_flag(scr_id);
                self.new_patch_init_data.set_flag(cur_id);
                self.new_time_dep_data.set_flag(new_id);

                // The regular advance fill reads CURRENT on this level and
                // time-interpolates between CURRENT and NEW on coarser
                // levels; the "new" variant reads NEW on this level for
                // post-advance dt computation.
                let refine_op = lookup_refine_operator(refine_name);
                self.bdry_fill_advance.register_refine_with_time(
                    scr_id,
                    cur_id,
                    cur_id,
                    new_id,
                    scr_id,
                    refine_op.clone(),
                );
                self.bdry_fill_advance_new.register_refine_with_time(
                    scr_id,
                    new_id,
                    cur_id,
                    new_id,
                    scr_id,
                    refine_op.clone(),
                );
                self.fill_new_level.register_refine_with_time(
                    cur_id,
                    cur_id,
                    cur_id,
                    new_id,
                    scr_id,
                    refine_op.clone(),
                );

                // Synchronization coarsens NEW onto NEW: coarse data
                // pointers are not rotated until after the sync. Initial
                // consistency coarsens CURRENT onto CURRENT.
                let coarsen_op = lookup_coarsen_operator(coarsen_name, var.centering)
                    .unwrap_or_else(|| {
                        panic!(
                            "{}: time dependent variable {} needs a coarsen operator",
                            self.name, var.name
                        )
                    });
                self.coarsen_sync_data
                    .register_coarsen(new_id, new_id, coarsen_op.clone());
                self.sync_initial_data
                    .register_coarsen(cur_id, cur_id, coarsen_op.clone());

                if self.number_time_data_levels == 3 {
                    let old = self.old.as_ref().unwrap();
                    let old_id = self
                        .db
                        .register_variable_and_context(&var, old, &zero_ghosts);
                    self.old_time_dep_data.set_flag(old_id);

                    self.bdry_fill_advance_old.register_refine_with_time(
                        scr_id,
                        cur_id,
                        old_id,
                        new_id,
                        scr_id,
                        refine_op,
                    );
                    self.coarsen_rich_extrap_init
                        .register_coarsen(cur_id, old_id, coarsen_op.clone());
                } else {
                    self.coarsen_rich_extrap_init
                        .register_coarsen(cur_id, cur_id, coarsen_op.clone());
                }
                self.coarsen_rich_extrap_final
                    .register_coarsen(new_id, new_id, coarsen_op);
            }

            VariableRole::Input => {
                let cur_id =
                    self.db
                        .register_variable_and_context(&var, &self.current, &zero_ghosts);
                let scr_id = self
                    .db
                    .register_variable_and_context(&var, &self.scratch, &ghosts);

                self.saved_var_scratch_data.set_flag(scr_id);
                self.new_patch_init_data.set_flag(cur_id);

                let refine_op = lookup_refine_operator(refine_name);
                self.bdry_fill_advance
                    .register_refine(scr_id, cur_id, scr_id, refine_op.clone());
                self.bdry_fill_advance_new.register_refine(
                    scr_id,
                    cur_id,
                    scr_id,
                    refine_op.clone(),
                );
                self.fill_new_level
                    .register_refine(cur_id, cur_id, scr_id, refine_op);

                if let Some(coarsen_op) = lookup_coarsen_operator(coarsen_name, var.centering) {
                    self.sync_initial_data
                        .register_coarsen(cur_id, cur_id, coarsen_op.clone());
                    self.coarsen_rich_extrap_init
                        .register_coarsen(cur_id, cur_id, coarsen_op);
                }
            }

            VariableRole::NoFill => {
                let cur_id = self
                    .db
                    .register_variable_and_context(&var, &self.current, &ghosts);
                let scr_id = self
                    .db
                    .register_variable_and_context(&var, &self.scratch, &ghosts);

                self.new_patch_init_data.set_flag(cur_id);

                let refine_op = lookup_refine_operator(refine_name);
                self.fill_new_level
                    .register_refine(cur_id, cur_id, scr_id, refine_op);

                if let Some(coarsen_op) = lookup_coarsen_operator(coarsen_name, var.centering) {
                    self.coarsen_rich_extrap_init
                        .register_coarsen(cur_id, cur_id, coarsen_op);
                }
            }

            VariableRole::Flux => {
                match var.centering {
                    Centering::Face => {
                        assert! {
                            !self.flux_side_registered,
                            "{}: attempt to register a face-centered flux when a side-centered flux is already registered",
                            self.name
                        };
                        self.flux_is_face = true;
                        self.flux_face_registered = true;
                    }
                    Centering::Side => {
                        assert! {
                            !self.flux_face_registered,
                            "{}: attempt to register a side-centered flux when a face-centered flux is already registered",
                            self.name
                        };
                        self.flux_is_face = false;
                        self.flux_side_registered = true;
                    }
                    other => panic!(
                        "{}: flux variable {} is {:?}, not face- or side-centered",
                        self.name, var.name, other
                    ),
                }
                assert! {
                    var.kind == ScalarKind::Double,
                    "{}: flux variable {} must hold double precision data",
                    self.name,
                    var.name
                };
                self.flux_variables.push(var.clone());

                let scr_id = self
                    .db
                    .register_variable_and_context(&var, &self.scratch, &ghosts);
                self.flux_var_data.set_flag(scr_id);

                // The companion flux-integral variable accumulates patch
                // boundary fluxes for refluxing.
                let fluxsum_centering = if self.flux_is_face {
                    Centering::OuterFace
                } else {
                    Centering::OuterSide
                };
                let fluxsum = self.db.add_variable(Variable::new(
                    &format!("{}_fluxsum", var.name),
                    fluxsum_centering,
                    ScalarKind::Double,
                    var.depth,
                ));
                self.fluxsum_variables.push(fluxsum.clone());

                let fs_id =
                    self.db
                        .register_variable_and_context(&fluxsum, &self.scratch, &zero_ghosts);
                self.fluxsum_data.set_flag(fs_id);

                let coarsen_op = lookup_coarsen_operator(coarsen_name, fluxsum_centering)
                    .unwrap_or_else(|| {
                        panic!(
                            "{}: flux variable {} needs a coarsen operator",
                            self.name, var.name
                        )
                    });
                self.coarsen_fluxsum
                    .register_coarsen(scr_id, fs_id, coarsen_op);
            }

            VariableRole::Temporary => {
                let scr_id = self
                    .db
                    .register_variable_and_context(&var, &self.scratch, &ghosts);
                self.temp_var_scratch_data.set_flag(scr_id);
            }
        }
    }

    fn refine_adapter(&self) -> Arc<dyn RefinePatchStrategy> {
        Arc::new(RefineAdapter {
            strategy: self.strategy.clone(),
            ctx: self.scratch_context(),
        })
    }

    // ------------------------------------------------------------------
    // Timestep computation.

    /// The CFL-limited timestep for a level: the minimum of the per-patch
    /// stable dt over all ranks, scaled by `min(cfl_init, cfl)`. With
    /// `use_ghosts_to_compute_dt`, ghosts are filled first, and scratch is
    /// copied back to CURRENT afterwards so the fill cannot perturb the
    /// solution state.
    pub fn get_level_dt(&self, level: &Arc<PatchLevel>, dt_time: f64, initial_time: bool) -> f64 {
        let comm = level.comm().clone();
        let strategy = self.strategy.clone();

        let dt = if !self.config.use_ghosts_to_compute_dt {
            let ctx = self.current_context();
            self.patch_minimum(level, dt_time, |patch| {
                strategy.compute_stable_dt_on_patch(patch, &ctx, initial_time, dt_time)
            })
        } else {
            level.allocate_patch_data(&self.saved_var_scratch_data, dt_time);

            let ln = level.level_number();
            self.bdry_sched_advance[ln as usize]
                .as_ref()
                .expect("advance schedule not built; call reset_hierarchy_configuration")
                .fill_data(dt_time, true);

            let ctx = self.scratch_context();
            let dt = self.patch_minimum(level, dt_time, |patch| {
                strategy.compute_stable_dt_on_patch(patch, &ctx, initial_time, dt_time)
            });

            self.copy_time_dependent_data(level, &self.scratch, &self.current);
            level.deallocate_patch_data(&self.saved_var_scratch_data);
            dt
        };

        if self.config.distinguish_mpi_reduction_costs {
            comm.barrier();
        }
        let global_dt = comm.all_reduce_f64(Reduce::Min, dt);
        global_dt * self.config.cfl_init.min(self.config.cfl)
    }

    /// The timestep for the next finer level: the coarse increment divided
    /// by the maximum mesh ratio, independent of level number.
    pub fn get_max_finer_level_dt(
        &self,
        _finer_level_number: i32,
        coarse_dt: f64,
        ratio: &IntVector,
    ) -> f64 {
        assert!(ratio.all_positive());
        coarse_dt / ratio.max_entry() as f64
    }

    fn patch_minimum<F>(&self, level: &Arc<PatchLevel>, time: f64, f: F) -> f64
    where
        F: Fn(&Patch) -> f64 + Send + Sync,
    {
        let locks: Vec<_> = level.patches().collect();
        locks
            .par_iter()
            .map(|lock| {
                let mut patch = lock.write().unwrap();
                for id in self.temp_var_scratch_data.iter() {
                    patch.allocate(id, level.db(), time);
                }
                let dt = f(&patch);
                for id in self.temp_var_scratch_data.iter() {
                    patch.deallocate(id);
                }
                dt
            })
            .reduce(|| f64::MAX, f64::min)
    }

    // ------------------------------------------------------------------
    // The level advance.

    /// Advance all patches of a level from `current_time` to `new_time` in
    /// one step, returning the next stable dt (already scaled by `cfl`).
    /// When `regrid_advance` is set, the advance is a throwaway used for
    /// error estimation: flux storage is discarded and no dt is computed.
    #[allow(clippy::too_many_arguments)]
    pub fn advance_level(
        &mut self,
        level: &Arc<PatchLevel>,
        hierarchy: &Arc<PatchHierarchy>,
        current_time: f64,
        new_time: f64,
        first_step: bool,
        last_step: bool,
        regrid_advance: bool,
    ) -> f64 {
        assert!(current_time <= new_time);
        let comm = level.comm().clone();
        let dt = new_time - current_time;
        let level_number = level.level_number();

        if self.config.barrier_advance_level_sections {
            comm.barrier();
        }

        // (1) Storage for the advance, (2) the ghost fill schedule, (3) the
        // ghost fill itself, (4) flux storage preprocessing.
        level.allocate_patch_data(&self.new_time_dep_data, new_time);
        level.allocate_patch_data(&self.saved_var_scratch_data, current_time);

        let fresh_schedule;
        let fill_schedule: &RefineSchedule = if !level.in_hierarchy() {
            let algorithm = if self.number_time_data_levels == 3 {
                &self.bdry_fill_advance_old
            } else {
                &self.bdry_fill_advance
            };
            fresh_schedule = algorithm.create_schedule_full(
                level,
                None,
                level.next_coarser_level_number(),
                Some(hierarchy),
                Some(self.refine_adapter()),
            );
            &fresh_schedule
        } else {
            self.bdry_sched_advance[level_number as usize]
                .as_ref()
                .expect("advance schedule not built; call reset_hierarchy_configuration")
        };
        fill_schedule.fill_data(current_time, true);

        if self.config.barrier_advance_level_sections {
            comm.barrier();
        }

        self.preprocess_flux_data(level, new_time, regrid_advance, first_step);

        // (5) User preprocessing, (6) fluxes and conservative difference on
        // every patch, (7) commit scratch into NEW, (8) user postprocessing.
        let scratch_ctx = self.scratch_context();
        self.strategy.preprocess_advance_level_state(
            level,
            &scratch_ctx,
            current_time,
            dt,
            first_step,
            last_step,
            regrid_advance,
        );

        {
            let strategy = self.strategy.clone();
            let temp = self.temp_var_scratch_data.clone();
            let db = level.db().clone();
            let locks: Vec<_> = level.patches().collect();
            // The join at the end of the parallel loop is the barrier that
            // orders these kernel writes before the collectives below.
            locks.par_iter().for_each(|lock| {
                let mut patch = lock.write().unwrap();
                for id in temp.iter() {
                    patch.allocate(id, &db, current_time);
                }
                strategy.compute_fluxes_on_patch(&mut patch, &scratch_ctx, current_time, dt);
                strategy.conservative_difference_on_patch(
                    &mut patch,
                    &scratch_ctx,
                    current_time,
                    dt,
                    false,
                );
                for id in temp.iter() {
                    patch.deallocate(id);
                }
            });
        }

        level.set_time(new_time, &self.saved_var_scratch_data);
        level.set_time(new_time, &self.flux_var_data);
        self.copy_time_dependent_data(level, &self.scratch, &self.new);

        self.strategy.postprocess_advance_level_state(
            level,
            &scratch_ctx,
            current_time,
            dt,
            first_step,
            last_step,
            regrid_advance,
        );

        // (9) The next timestep, honoring the lag and ghost flags.
        let mut dt_next = f64::MAX;
        if !regrid_advance {
            let strategy = self.strategy.clone();
            dt_next = if self.config.lag_dt_computation {
                if self.config.use_ghosts_to_compute_dt {
                    self.copy_time_dependent_data(level, &self.current, &self.scratch);
                    let ctx = self.scratch_context();
                    self.patch_minimum(level, new_time, |patch| {
                        strategy.compute_stable_dt_on_patch(patch, &ctx, false, new_time)
                    })
                } else {
                    let ctx = self.current_context();
                    self.patch_minimum(level, new_time, |patch| {
                        strategy.compute_stable_dt_on_patch(patch, &ctx, false, new_time)
                    })
                }
            } else if self.config.use_ghosts_to_compute_dt {
                let schedule = self.bdry_sched_advance_new[level_number as usize]
                    .as_ref()
                    .unwrap_or_else(|| {
                        panic!(
                            "{}: attempt to fill new ghost data for timestep computation, but schedule not defined",
                            self.name
                        )
                    });
                schedule.fill_data(new_time, true);
                let ctx = self.scratch_context();
                self.patch_minimum(level, new_time, |patch| {
                    strategy.compute_stable_dt_on_patch(patch, &ctx, false, new_time)
                })
            } else {
                let ctx = self.new_context();
                self.patch_minimum(level, new_time, |patch| {
                    strategy.compute_stable_dt_on_patch(patch, &ctx, false, new_time)
                })
            };
        }

        level.deallocate_patch_data(&self.saved_var_scratch_data);
        self.postprocess_flux_data(level, regrid_advance, first_step);

        if self.config.distinguish_mpi_reduction_costs {
            comm.barrier();
        }
        let next_dt = comm.all_reduce_f64(Reduce::Min, dt_next) * self.config.cfl;
        debug!(
            "{}: advanced level {} to t = {} (dt next {})",
            self.name, level_number, new_time, next_dt
        );
        next_dt
    }

    /// Allocate flux storage as the substep sequence requires. Flux data on
    /// level zero persists as long as the level does, because the driver
    /// owns that level's step sequence; on finer levels it lives for the
    /// substep group. The flux integrals are zeroed on the first substep
    /// and restamped on later ones.
    fn preprocess_flux_data(
        &mut self,
        level: &Arc<PatchLevel>,
        new_time: f64,
        regrid_advance: bool,
        first_step: bool,
    ) {
        let level_number = level.level_number();

        if !regrid_advance {
            if (level_number > 0 && first_step)
                || (level_number == 0 && !self.have_flux_on_level_zero)
            {
                level.allocate_patch_data(&self.flux_var_data, new_time);
                if level_number == 0 {
                    self.have_flux_on_level_zero = true;
                }
            }
        } else if first_step {
            level.allocate_patch_data(&self.flux_var_data, new_time);
        }

        if !regrid_advance && level_number > 0 {
            if first_step {
                level.allocate_patch_data(&self.fluxsum_data, new_time);
                for lock in level.patches() {
                    let mut patch = lock.write().unwrap();
                    for id in self.fluxsum_data.iter() {
                        patch.data_mut(id).as_double_mut().fill_all(0.0);
                    }
                }
            } else {
                level.set_time(new_time, &self.fluxsum_data);
            }
        }
    }

    /// After the advance: on levels finer than zero, add the patch-boundary
    /// flux values into the flux integrals; on throwaway advances, discard
    /// the flux storage instead.
    fn postprocess_flux_data(
        &self,
        level: &Arc<PatchLevel>,
        regrid_advance: bool,
        first_step: bool,
    ) {
        if regrid_advance && first_step {
            level.deallocate_patch_data(&self.flux_var_data);
        }
        if regrid_advance || level.level_number() == 0 {
            return;
        }

        let flux_ids: Vec<DescriptorId> = self.flux_var_data.iter().collect();
        let fsum_ids: Vec<DescriptorId> = self.fluxsum_data.iter().collect();
        for lock in level.patches() {
            let mut patch = lock.write().unwrap();
            let patch_box = patch.space().clone();
            for (&flux_id, &fsum_id) in flux_ids.iter().zip(&fsum_ids) {
                let (fsum, flux) = patch.data_pair_mut(fsum_id, flux_id);
                up_flux_sum_all(flux.as_double(), fsum.as_double_mut(), &patch_box);
            }
        }
    }

    fn copy_time_dependent_data(
        &self,
        level: &Arc<PatchLevel>,
        src: &Arc<VariableContext>,
        dst: &Arc<VariableContext>,
    ) {
        for lock in level.patches() {
            let mut patch = lock.write().unwrap();
            for var in &self.time_dep_variables {
                let src_id = self.db.map_variable_and_context(var, src).unwrap();
                let dst_id = self.db.map_variable_and_context(var, dst).unwrap();
                let region = patch.data(dst_id).cell_box().grow(&patch.data(dst_id).ghost());
                patch.copy_between(dst_id, src_id, &region);
            }
        }
    }

    // ------------------------------------------------------------------
    // Synchronization.

    /// Flux-correct and conservatively coarsen every fine/coarse pair from
    /// the finest level down.
    pub fn standard_level_synchronization(
        &mut self,
        hierarchy: &Arc<PatchHierarchy>,
        coarsest_level: i32,
        finest_level: i32,
        sync_time: f64,
        old_times: &[f64],
    ) {
        assert!(coarsest_level >= 0 && coarsest_level < finest_level);
        assert!(old_times.len() as i32 >= finest_level);

        for fine_ln in ((coarsest_level + 1)..=finest_level).rev() {
            let coarse_ln = fine_ln - 1;
            let fine_level = hierarchy.level(fine_ln as usize);
            let coarse_level = hierarchy.level(coarse_ln as usize);

            self.synchronize_level_with_coarser(
                &fine_level,
                &coarse_level,
                sync_time,
                old_times[coarse_ln as usize],
            );

            fine_level.deallocate_patch_data(&self.fluxsum_data);
            fine_level.deallocate_patch_data(&self.flux_var_data);
            if coarse_ln > coarsest_level {
                coarse_level.deallocate_patch_data(&self.flux_var_data);
            } else if coarsest_level == 0 {
                coarse_level.deallocate_patch_data(&self.flux_var_data);
                self.have_flux_on_level_zero = false;
            }
        }
    }

    pub fn standard_level_synchronization_at(
        &mut self,
        hierarchy: &Arc<PatchHierarchy>,
        coarsest_level: i32,
        finest_level: i32,
        sync_time: f64,
        old_time: f64,
    ) {
        let old_times = vec![old_time; finest_level as usize + 1];
        self.standard_level_synchronization(
            hierarchy,
            coarsest_level,
            finest_level,
            sync_time,
            &old_times,
        );
    }

    /// One fine/coarse synchronization: replace the coarse flux integrals
    /// along the coarse-fine boundary with the fine flux integrals, repeat
    /// the coarse conservative difference with the corrected fluxes, then
    /// conservatively coarsen the fine solution.
    fn synchronize_level_with_coarser(
        &mut self,
        fine_level: &Arc<PatchLevel>,
        coarse_level: &Arc<PatchLevel>,
        sync_time: f64,
        coarse_sim_time: f64,
    ) {
        assert!(sync_time > coarse_sim_time);
        assert_eq!(
            coarse_level.level_number(),
            fine_level.level_number() - 1
        );

        if self.config.use_flux_correction {
            self.coarsen_fluxsum
                .create_schedule(coarse_level, fine_level)
                .coarsen_data();

            coarse_level.allocate_patch_data(&self.saved_var_scratch_data, coarse_sim_time);
            coarse_level.set_time(coarse_sim_time, &self.flux_var_data);

            self.bdry_sched_advance[coarse_level.level_number() as usize]
                .as_ref()
                .expect("advance schedule not built; call reset_hierarchy_configuration")
                .fill_data(coarse_sim_time, true);

            let reflux_dt = sync_time - coarse_sim_time;
            let strategy = self.strategy.clone();
            let scratch_ctx = self.scratch_context();
            let temp = self.temp_var_scratch_data.clone();
            let db = coarse_level.db().clone();
            let locks: Vec<_> = coarse_level.patches().collect();
            locks.par_iter().for_each(|lock| {
                let mut patch = lock.write().unwrap();
                for id in temp.iter() {
                    patch.allocate(id, &db, coarse_sim_time);
                }
                strategy.conservative_difference_on_patch(
                    &mut patch,
                    &scratch_ctx,
                    coarse_sim_time,
                    reflux_dt,
                    true,
                );
                for id in temp.iter() {
                    patch.deallocate(id);
                }
            });

            self.copy_time_dependent_data(coarse_level, &self.scratch, &self.new);
            coarse_level.deallocate_patch_data(&self.saved_var_scratch_data);
        }

        self.coarsen_sync_data
            .create_schedule(coarse_level, fine_level)
            .coarsen_data();
    }

    /// At the initial time only, coarsen CURRENT down the hierarchy so all
    /// levels agree, giving the user a chance to overwrite the interpolated
    /// values on each coarser level.
    pub fn synchronize_new_levels(
        &mut self,
        hierarchy: &Arc<PatchHierarchy>,
        coarsest_level: i32,
        finest_level: i32,
        sync_time: f64,
        initial_time: bool,
    ) {
        if !initial_time {
            return;
        }
        let ctx = self.current_context();
        for fine_ln in ((coarsest_level + 1)..=finest_level).rev() {
            let fine_level = hierarchy.level(fine_ln as usize);
            let coarse_level = hierarchy.level((fine_ln - 1) as usize);

            self.sync_initial_data
                .create_schedule(&coarse_level, &fine_level)
                .coarsen_data();

            for lock in coarse_level.patches() {
                let mut patch = lock.write().unwrap();
                for id in self.temp_var_scratch_data.iter() {
                    patch.allocate(id, coarse_level.db(), sync_time);
                }
                self.strategy
                    .initialize_data_on_patch(&mut patch, &ctx, sync_time, initial_time);
                for id in self.temp_var_scratch_data.iter() {
                    patch.deallocate(id);
                }
            }
        }
    }

    /// Rotate the time levels at the end of a step: CURRENT takes NEW's
    /// storage (and OLD takes CURRENT's in three-time-level mode), then NEW
    /// is dropped.
    pub fn reset_time_dependent_data(
        &self,
        level: &Arc<PatchLevel>,
        new_time: f64,
        can_be_refined: bool,
    ) {
        let mut cur_time = 0.0;
        for lock in level.patches() {
            let mut patch = lock.write().unwrap();
            for var in &self.time_dep_variables {
                let cur_id = self.db.map_variable_and_context(var, &self.current).unwrap();
                let new_id = self.db.map_variable_and_context(var, &self.new).unwrap();

                cur_time = patch.data(cur_id).time();

                let keep_old = self.number_time_data_levels == 3;
                let old_id = self
                    .old
                    .as_ref()
                    .map(|old| self.db.map_variable_and_context(var, old).unwrap());

                let current = patch.replace_data(cur_id, None);
                if keep_old {
                    // Odd refinement ratios keep a third time level; OLD
                    // takes over CURRENT's storage whether or not the level
                    // can be refined further.
                    let _ = can_be_refined;
                    patch.replace_data(old_id.unwrap(), current);
                } else {
                    drop(current);
                }
                let advanced = patch.replace_data(new_id, None);
                patch.replace_data(cur_id, advanced);
            }
        }

        level.set_time(new_time, &self.new_patch_init_data);
        if self.number_time_data_levels == 3 {
            level.set_time(cur_time, &self.old_time_dep_data);
        }
    }

    /// Discard NEW data, returning the level to its pre-advance state. Used
    /// after error-estimation advances.
    pub fn reset_data_to_preadvance_state(&self, level: &Arc<PatchLevel>) {
        level.deallocate_patch_data(&self.new_time_dep_data);
    }

    /// The cached advance ghost-fill schedule for a level, once
    /// [`reset_hierarchy_configuration`] has built it.
    ///
    /// [`reset_hierarchy_configuration`]: TagAndInitStrategy::reset_hierarchy_configuration
    pub fn advance_schedule(&self, level_number: usize) -> Option<&RefineSchedule> {
        self.bdry_sched_advance
            .get(level_number)
            .and_then(Option::as_ref)
    }

    /// The scratch components of all variables that take part in ghost
    /// fills.
    pub fn scratch_data_selector(&self) -> &ComponentSelector {
        &self.saved_var_scratch_data
    }

    /// The CURRENT components allocated on newly initialized patches.
    pub fn current_data_selector(&self) -> &ComponentSelector {
        &self.new_patch_init_data
    }
}

// ============================================================================
impl TagAndInitStrategy for HyperbolicLevelIntegrator {
    /// (Re)initialize a level's data: allocate CURRENT storage, fill it
    /// from the pre-regrid level and/or coarser levels, then let the user
    /// set interiors. For three time levels on a refinable level, OLD
    /// starts from a copy of CURRENT.
    fn initialize_level_data(
        &mut self,
        hierarchy: &Arc<PatchHierarchy>,
        level_number: i32,
        init_data_time: f64,
        can_be_refined: bool,
        initial_time: bool,
        old_level: Option<&Arc<PatchLevel>>,
        allocate_data: bool,
    ) {
        let level = hierarchy.level(level_number as usize);
        if let Some(old) = old_level {
            assert_eq!(old.level_number(), level_number);
        }

        if allocate_data {
            level.allocate_patch_data(&self.new_patch_init_data, init_data_time);
            level.allocate_patch_data(&self.old_time_dep_data, init_data_time);
        } else {
            level.set_time(init_data_time, &self.new_patch_init_data);
        }

        if level_number > 0 || old_level.is_some() {
            let schedule = self.fill_new_level.create_schedule_full(
                &level,
                old_level,
                level_number - 1,
                Some(hierarchy),
                Some(self.refine_adapter()),
            );
            schedule.fill_data(init_data_time, true);
        }

        if self.number_time_data_levels == 3 && can_be_refined {
            let old = self.old.as_ref().unwrap();
            for lock in level.patches() {
                let mut patch = lock.write().unwrap();
                for var in &self.time_dep_variables {
                    let cur_id = self.db.map_variable_and_context(var, &self.current).unwrap();
                    let old_id = self.db.map_variable_and_context(var, old).unwrap();
                    let snapshot = patch.data(cur_id).clone();
                    patch.replace_data(old_id, Some(snapshot));
                }
            }
        }

        let ctx = self.current_context();
        for lock in level.patches() {
            let mut patch = lock.write().unwrap();
            for id in self.temp_var_scratch_data.iter() {
                patch.allocate(id, level.db(), init_data_time);
            }
            self.strategy
                .initialize_data_on_patch(&mut patch, &ctx, init_data_time, initial_time);
            for id in self.temp_var_scratch_data.iter() {
                patch.deallocate(id);
            }
        }
    }

    /// Rebuild the cached advance ghost-fill schedules for the given level
    /// range; called whenever the hierarchy configuration changes.
    fn reset_hierarchy_configuration(
        &mut self,
        hierarchy: &Arc<PatchHierarchy>,
        coarsest_level: i32,
        finest_level: i32,
    ) {
        assert!(coarsest_level >= 0 && coarsest_level <= finest_level);
        let finest_hierarchy_level = hierarchy.finest_level_number();

        self.bdry_sched_advance
            .resize_with(finest_hierarchy_level as usize + 1, || None);
        self.bdry_sched_advance_new
            .resize_with(finest_hierarchy_level as usize + 1, || None);

        for ln in coarsest_level..=finest_hierarchy_level {
            let level = hierarchy.level(ln as usize);

            self.bdry_sched_advance[ln as usize] =
                Some(self.bdry_fill_advance.create_schedule_with_hierarchy(
                    &level,
                    ln - 1,
                    hierarchy,
                    Some(self.refine_adapter()),
                ));

            if !self.config.lag_dt_computation && self.config.use_ghosts_to_compute_dt {
                self.bdry_sched_advance_new[ln as usize] =
                    Some(self.bdry_fill_advance_new.create_schedule_with_hierarchy(
                        &level,
                        ln - 1,
                        hierarchy,
                        Some(self.refine_adapter()),
                    ));
            }
        }
    }

    /// Fill scratch (including ghosts) at the error time, then let the user
    /// tag cells with large gradients.
    fn apply_gradient_detector(
        &mut self,
        hierarchy: &Arc<PatchHierarchy>,
        level_number: i32,
        error_data_time: f64,
        tag_index: DescriptorId,
        initial_time: bool,
        uses_richardson_extrapolation_too: bool,
    ) {
        let level = hierarchy.level(level_number as usize);
        level.allocate_patch_data(&self.saved_var_scratch_data, error_data_time);

        self.bdry_sched_advance[level_number as usize]
            .as_ref()
            .expect("advance schedule not built; call reset_hierarchy_configuration")
            .fill_data(error_data_time, true);
        level.comm().barrier();

        let ctx = self.scratch_context();
        for lock in level.patches() {
            let mut patch = lock.write().unwrap();
            self.strategy.tag_gradient_detector_cells(
                &mut patch,
                &ctx,
                error_data_time,
                tag_index,
                initial_time,
                uses_richardson_extrapolation_too,
            );
        }

        level.deallocate_patch_data(&self.saved_var_scratch_data);
    }

    /// Compare the solution advanced on this level (NEW) against the
    /// solution advanced on the coarsened version (CURRENT), tagging where
    /// they disagree.
    fn apply_richardson_extrapolation(
        &mut self,
        level: &Arc<PatchLevel>,
        error_data_time: f64,
        tag_index: DescriptorId,
        deltat: f64,
        error_coarsen_ratio: i32,
        initial_time: bool,
        uses_gradient_detector_too: bool,
    ) {
        let error_level_number = level.next_coarser_level_number() + 1;
        let new_ctx = self.new_context();
        let current_ctx = self.current_context();
        for lock in level.patches() {
            let mut patch = lock.write().unwrap();
            self.strategy.tag_richardson_extrapolation_cells(
                &mut patch,
                error_level_number,
                &new_ctx,
                &current_ctx,
                error_data_time,
                deltat,
                error_coarsen_ratio,
                initial_time,
                tag_index,
                uses_gradient_detector_too,
            );
        }
    }

    /// Coarsen data onto the temporary coarse level used by Richardson
    /// extrapolation: before the advance, the oldest maintained solution
    /// coarsens into CURRENT; after it, the advanced solution coarsens into
    /// NEW for the comparison.
    fn coarsen_data_for_richardson_extrapolation(
        &mut self,
        hierarchy: &Arc<PatchHierarchy>,
        level_number: i32,
        coarse_level: &Arc<PatchLevel>,
        coarsen_data_time: f64,
        before_advance: bool,
    ) {
        let level = hierarchy.level(level_number as usize);

        if before_advance {
            coarse_level.allocate_patch_data(&self.new_patch_init_data, coarsen_data_time);
            self.coarsen_rich_extrap_init
                .create_schedule(coarse_level, &level)
                .coarsen_data();
        } else {
            coarse_level.allocate_patch_data(&self.new_time_dep_data, coarsen_data_time);
            self.coarsen_rich_extrap_final
                .create_schedule(coarse_level, &level)
                .coarsen_data();
        }
    }
}

// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::restart::RestartDatabase;

    struct NullStrategy;

    impl HyperbolicPatchStrategy for NullStrategy {
        fn register_model_variables(&self, _: &mut HyperbolicLevelIntegrator) {}
        fn initialize_data_on_patch(&self, _: &mut Patch, _: &DataContext, _: f64, _: bool) {}
        fn compute_stable_dt_on_patch(&self, _: &Patch, _: &DataContext, _: bool, _: f64) -> f64 {
            1.0
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
            _: &mut Patch,
            _: &DataContext,
            _: f64,
            _: &IntVector,
        ) {
        }
    }

    fn integrator(config: IntegratorConfig) -> HyperbolicLevelIntegrator {
        HyperbolicLevelIntegrator::new(
            "TestIntegrator",
            VariableDatabase::new(),
            config,
            Arc::new(NullStrategy),
            true,
        )
    }

    #[test]
    fn restart_records_round_trip() {
        let mut config = IntegratorConfig::new(0.85, 0.4);
        config.lag_dt_computation = false;
        config.use_flux_correction = false;
        let original = integrator(config);

        let mut db = RestartDatabase::new();
        original.put_to_restart(&mut db);

        let restored = HyperbolicLevelIntegrator::from_restart(
            "TestIntegrator",
            VariableDatabase::new(),
            &db,
            None,
            Arc::new(NullStrategy),
            true,
        )
        .unwrap();
        assert_eq!(restored.config.cfl, 0.85);
        assert_eq!(restored.config.cfl_init, 0.4);
        assert!(!restored.config.lag_dt_computation);
        assert!(!restored.config.use_flux_correction);
    }

    #[test]
    fn restart_version_mismatch_is_an_error() {
        let mut db = RestartDatabase::new();
        integrator(IntegratorConfig::new(0.5, 0.5)).put_to_restart(&mut db);
        db.put_integer("ALGS_HYPERBOLIC_LEVEL_INTEGRATOR_VERSION", 2);

        let result = HyperbolicLevelIntegrator::from_restart(
            "TestIntegrator",
            VariableDatabase::new(),
            &db,
            None,
            Arc::new(NullStrategy),
            true,
        );
        assert!(matches!(
            result,
            Err(crate::restart::RestartError::VersionMismatch { found: 2, .. })
        ));
    }

    #[test]
    fn input_overrides_restart_only_when_asked() {
        let mut db = RestartDatabase::new();
        integrator(IntegratorConfig::new(0.5, 0.5)).put_to_restart(&mut db);

        let mut input = IntegratorConfig::new(0.9, 0.9);
        let kept = HyperbolicLevelIntegrator::from_restart(
            "TestIntegrator",
            VariableDatabase::new(),
            &db,
            Some(input.clone()),
            Arc::new(NullStrategy),
            true,
        )
        .unwrap();
        assert_eq!(kept.config.cfl, 0.5);

        input.read_on_restart = true;
        let overridden = HyperbolicLevelIntegrator::from_restart(
            "TestIntegrator",
            VariableDatabase::new(),
            &db,
            Some(input),
            Arc::new(NullStrategy),
            true,
        )
        .unwrap();
        assert_eq!(overridden.config.cfl, 0.9);
    }
}
