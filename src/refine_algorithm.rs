use crate::fill_pattern::FillPattern;
use crate::hierarchy::PatchHierarchy;
use crate::patch_level::PatchLevel;
use crate::refine_schedule::{RefinePatchStrategy, RefineSchedule};
use crate::transfer::RefineOperator;
use crate::variable::DescriptorId;
use std::sync::Arc;

/// Source descriptors for time interpolation on a coarser level: the fill
/// time is bracketed by the time stamps of `old` and `new`.
#[derive(Clone)]
pub struct TimeInterpolant {
    pub old: DescriptorId,
    pub new: DescriptorId,
}

/// One registered transfer: fill `scratch` (and finally `dst`) from `src`
/// on the same level, spatially refining from coarser levels with
/// `refine_op` and time-interpolating there between `time_interp.old` and
/// `time_interp.new` when registered.
#[derive(Clone)]
pub struct RefineItem {
    pub dst: DescriptorId,
    pub src: DescriptorId,
    pub scratch: DescriptorId,
    pub refine_op: Option<Arc<dyn RefineOperator>>,
    pub time_interp: Option<TimeInterpolant>,
}

/// Collects refine items and a fill pattern, then builds executable
/// schedules for concrete level pairs. The algorithm itself holds no level
/// state; one algorithm builds any number of schedules.
pub struct RefineAlgorithm {
    items: Vec<RefineItem>,
    fill_pattern: FillPattern,
}

// ============================================================================
impl RefineAlgorithm {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            fill_pattern: FillPattern::default(),
        }
    }

    pub fn with_fill_pattern(fill_pattern: FillPattern) -> Self {
        Self {
            items: Vec::new(),
            fill_pattern,
        }
    }

    pub fn register_refine(
        &mut self,
        dst: DescriptorId,
        src: DescriptorId,
        scratch: DescriptorId,
        refine_op: Option<Arc<dyn RefineOperator>>,
    ) {
        self.items.push(RefineItem {
            dst,
            src,
            scratch,
            refine_op,
            time_interp: None,
        });
    }

    /// Register a transfer whose coarse-level source is time interpolated
    /// between the `old` and `new` descriptors.
    pub fn register_refine_with_time(
        &mut self,
        dst: DescriptorId,
        src: DescriptorId,
        old: DescriptorId,
        new: DescriptorId,
        scratch: DescriptorId,
        refine_op: Option<Arc<dyn RefineOperator>>,
    ) {
        self.items.push(RefineItem {
            dst,
            src,
            scratch,
            refine_op,
            time_interp: Some(TimeInterpolant { old, new }),
        });
    }

    pub fn num_items(&self) -> usize {
        self.items.len()
    }

    /// Build a schedule filling `dst_level` from itself, with no recourse to
    /// coarser levels.
    pub fn create_schedule(
        &self,
        dst_level: &Arc<PatchLevel>,
        strategy: Option<Arc<dyn RefinePatchStrategy>>,
    ) -> RefineSchedule {
        self.create_schedule_full(dst_level, None, -1, None, strategy)
    }

    /// Build a schedule filling `dst_level` from itself and, where same
    /// level data is unavailable, from coarser levels of `hierarchy`
    /// starting at `next_coarser_ln` (−1 when `dst_level` is coarsest).
    pub fn create_schedule_with_hierarchy(
        &self,
        dst_level: &Arc<PatchLevel>,
        next_coarser_ln: i32,
        hierarchy: &Arc<PatchHierarchy>,
        strategy: Option<Arc<dyn RefinePatchStrategy>>,
    ) -> RefineSchedule {
        self.create_schedule_full(dst_level, None, next_coarser_ln, Some(hierarchy), strategy)
    }

    /// The general form: an optional distinct source level (for example the
    /// pre-regrid level when filling a freshly built one), plus coarser
    /// levels of the hierarchy.
    pub fn create_schedule_full(
        &self,
        dst_level: &Arc<PatchLevel>,
        src_level: Option<&Arc<PatchLevel>>,
        next_coarser_ln: i32,
        hierarchy: Option<&Arc<PatchHierarchy>>,
        strategy: Option<Arc<dyn RefinePatchStrategy>>,
    ) -> RefineSchedule {
        assert!(!self.items.is_empty(), "no refine items registered");
        self.validate(dst_level);
        RefineSchedule::build_top(
            Arc::new(self.items.clone()),
            &self.fill_pattern,
            dst_level.clone(),
            src_level.cloned(),
            next_coarser_ln,
            hierarchy,
            strategy,
        )
    }

    /// Construction-time checks: a refine stencil wider than the scratch
    /// ghost width can never be satisfied and is a configuration error.
    fn validate(&self, dst_level: &Arc<PatchLevel>) {
        let db = dst_level.db();
        let dim = dst_level.dim();
        for item in &self.items {
            let scratch = db.descriptor(item.scratch);
            if let Some(op) = &item.refine_op {
                assert! {
                    scratch.ghost.all_ge(&op.stencil_width(dim)),
                    "refine operator {} stencil {} exceeds scratch ghost width {} of {}",
                    op.name(),
                    op.stencil_width(dim),
                    scratch.ghost,
                    scratch.variable.name
                };
            }
            let dst = db.descriptor(item.dst);
            let src = db.descriptor(item.src);
            assert! {
                dst.variable.kind == src.variable.kind
                    && dst.variable.centering == src.variable.centering
                    && dst.variable.depth == src.variable.depth,
                "refine item joins incompatible variables {} and {}",
                dst.variable.name,
                src.variable.name
            };
        }
    }
}

impl Default for RefineAlgorithm {
    fn default() -> Self {
        Self::new()
    }
}
