use crate::box_level::BoxLevel;
use crate::geometry::BlockGeometry;
use crate::int_vector::IntVector;
use crate::message::comm::Communicator;
use crate::patch_level::PatchLevel;
use crate::variable::VariableDatabase;
use std::sync::{Arc, RwLock};

/// An ordered list of patch levels, level 0 coarsest. Each finer level must
/// nest spatially inside the next coarser one; the hierarchy carries the
/// block geometry, the communicator, and the variable registry that all of
/// its levels share.
pub struct PatchHierarchy {
    geometry: Arc<BlockGeometry>,
    comm: Arc<dyn Communicator>,
    db: Arc<VariableDatabase>,
    levels: RwLock<Vec<Arc<PatchLevel>>>,
}

// ============================================================================
impl PatchHierarchy {
    pub fn new(
        geometry: Arc<BlockGeometry>,
        comm: Arc<dyn Communicator>,
        db: Arc<VariableDatabase>,
    ) -> Arc<Self> {
        Arc::new(Self {
            geometry,
            comm,
            db,
            levels: RwLock::new(Vec::new()),
        })
    }

    pub fn geometry(&self) -> &Arc<BlockGeometry> {
        &self.geometry
    }

    pub fn comm(&self) -> &Arc<dyn Communicator> {
        &self.comm
    }

    pub fn db(&self) -> &Arc<VariableDatabase> {
        &self.db
    }

    pub fn dim(&self) -> usize {
        self.geometry.dim()
    }

    /// Install a level at position `level_number`, which must either extend
    /// the hierarchy by one or replace an existing level (regridding).
    pub fn make_new_level(&self, level_number: usize, box_level: Arc<BoxLevel>) -> Arc<PatchLevel> {
        if cfg!(debug_assertions) {
            box_level.assert_no_local_overlap();
        }
        let mut level = PatchLevel::new(box_level, self.db.clone());
        level.set_level_number(level_number as i32, true);
        let level = Arc::new(level);

        let mut levels = self.levels.write().unwrap();
        assert! {
            level_number <= levels.len(),
            "level {} would leave a gap in the hierarchy ({} levels exist)",
            level_number,
            levels.len()
        };
        if level_number == levels.len() {
            levels.push(level.clone());
        } else {
            levels[level_number] = level.clone();
        }
        level
    }

    /// Drop every level finer than `level_number`.
    pub fn remove_finer_levels(&self, level_number: usize) {
        let mut levels = self.levels.write().unwrap();
        levels.truncate(level_number + 1);
    }

    pub fn num_levels(&self) -> usize {
        self.levels.read().unwrap().len()
    }

    pub fn finest_level_number(&self) -> i32 {
        self.num_levels() as i32 - 1
    }

    pub fn level(&self, level_number: usize) -> Arc<PatchLevel> {
        self.levels.read().unwrap()[level_number].clone()
    }

    pub fn try_level(&self, level_number: i32) -> Option<Arc<PatchLevel>> {
        if level_number < 0 {
            return None;
        }
        self.levels
            .read()
            .unwrap()
            .get(level_number as usize)
            .cloned()
    }

    pub fn levels(&self) -> Vec<Arc<PatchLevel>> {
        self.levels.read().unwrap().clone()
    }

    /// The per-axis refinement ratio between a level and the next coarser
    /// one.
    pub fn ratio_to_coarser(&self, level_number: usize) -> IntVector {
        assert!(level_number > 0);
        let levels = self.levels.read().unwrap();
        let fine = levels[level_number].ratio();
        let coarse = levels[level_number - 1].ratio();
        let mut ratio = IntVector::one(fine.dim());
        for a in 0..fine.dim() {
            assert_eq!(fine[a] % coarse[a], 0, "levels have incompatible ratios");
            ratio[a] = fine[a] / coarse[a];
        }
        ratio
    }
}
