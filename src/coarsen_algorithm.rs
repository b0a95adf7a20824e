use crate::coarsen_schedule::CoarsenSchedule;
use crate::patch_level::PatchLevel;
use crate::transfer::CoarsenOperator;
use crate::variable::DescriptorId;
use std::sync::Arc;

/// One registered fine-to-coarse transfer: coarsen `src` on the fine level
/// into `dst` on the coarse level with `op`.
#[derive(Clone)]
pub struct CoarsenItem {
    pub dst: DescriptorId,
    pub src: DescriptorId,
    pub op: Arc<dyn CoarsenOperator>,
}

/// Collects coarsen items, then builds executable schedules for concrete
/// coarse/fine level pairs.
pub struct CoarsenAlgorithm {
    items: Vec<CoarsenItem>,
}

// ============================================================================
impl CoarsenAlgorithm {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn register_coarsen(
        &mut self,
        dst: DescriptorId,
        src: DescriptorId,
        op: Arc<dyn CoarsenOperator>,
    ) {
        self.items.push(CoarsenItem { dst, src, op });
    }

    pub fn num_items(&self) -> usize {
        self.items.len()
    }

    pub fn create_schedule(
        &self,
        crse_level: &Arc<PatchLevel>,
        fine_level: &Arc<PatchLevel>,
    ) -> CoarsenSchedule {
        assert!(!self.items.is_empty(), "no coarsen items registered");
        CoarsenSchedule::build(
            Arc::new(self.items.clone()),
            crse_level.clone(),
            fine_level.clone(),
        )
    }
}

impl Default for CoarsenAlgorithm {
    fn default() -> Self {
        Self::new()
    }
}
