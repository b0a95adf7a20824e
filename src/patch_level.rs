use crate::box_level::BoxLevel;
use crate::geometry::BlockGeometry;
use crate::index_space::BoxId;
use crate::int_vector::{IntVector, MAX_DIM};
use crate::message::comm::Communicator;
use crate::patch::Patch;
use crate::variable::{ComponentSelector, VariableDatabase};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A box level paired with one [`Patch`] per locally-owned box. Patches sit
/// behind individual locks so that communication schedules and kernel loops
/// can share the level while mutating disjoint patches; schedule execution
/// never holds more than one lock at a time.
pub struct PatchLevel {
    box_level: Arc<BoxLevel>,
    db: Arc<VariableDatabase>,
    patches: BTreeMap<BoxId, RwLock<Patch>>,
    level_number: i32,
    in_hierarchy: bool,
}

// ============================================================================
impl PatchLevel {
    pub fn new(box_level: Arc<BoxLevel>, db: Arc<VariableDatabase>) -> Self {
        let patches = box_level
            .local_boxes()
            .map(|b| {
                let patch = Patch::new(
                    b.clone(),
                    *box_level.ratio(),
                    box_level.geometry().clone(),
                );
                (b.id(), RwLock::new(patch))
            })
            .collect();
        Self {
            box_level,
            db,
            patches,
            level_number: -1,
            in_hierarchy: false,
        }
    }

    pub fn box_level(&self) -> &Arc<BoxLevel> {
        &self.box_level
    }

    pub fn db(&self) -> &Arc<VariableDatabase> {
        &self.db
    }

    pub fn geometry(&self) -> &Arc<BlockGeometry> {
        self.box_level.geometry()
    }

    pub fn comm(&self) -> &Arc<dyn Communicator> {
        self.box_level.comm()
    }

    pub fn ratio(&self) -> &IntVector {
        self.box_level.ratio()
    }

    pub fn dim(&self) -> usize {
        self.box_level.dim()
    }

    /// Physical cell sizes on this level.
    pub fn cell_sizes(&self) -> [f64; MAX_DIM] {
        self.geometry().cell_sizes(self.ratio())
    }

    pub fn level_number(&self) -> i32 {
        self.level_number
    }

    pub fn next_coarser_level_number(&self) -> i32 {
        self.level_number - 1
    }

    pub fn set_level_number(&mut self, level_number: i32, in_hierarchy: bool) {
        self.level_number = level_number;
        self.in_hierarchy = in_hierarchy;
    }

    pub fn in_hierarchy(&self) -> bool {
        self.in_hierarchy
    }

    pub fn local_patch_count(&self) -> usize {
        self.patches.len()
    }

    /// Iterate locks of the local patches in box-id order.
    pub fn patches(&self) -> impl Iterator<Item = &RwLock<Patch>> {
        self.patches.values()
    }

    pub fn patch_ids(&self) -> impl Iterator<Item = &BoxId> {
        self.patches.keys()
    }

    pub fn patch(&self, id: &BoxId) -> RwLockReadGuard<Patch> {
        self.patches
            .get(&id.canonical())
            .unwrap_or_else(|| panic!("no local patch {:?}", id))
            .read()
            .unwrap()
    }

    pub fn patch_mut(&self, id: &BoxId) -> RwLockWriteGuard<Patch> {
        self.patches
            .get(&id.canonical())
            .unwrap_or_else(|| panic!("no local patch {:?}", id))
            .write()
            .unwrap()
    }

    pub fn has_patch(&self, id: &BoxId) -> bool {
        self.patches.contains_key(&id.canonical())
    }

    /// Allocate the selected patch-data entries on every local patch at the
    /// given time.
    pub fn allocate_patch_data(&self, selector: &ComponentSelector, time: f64) {
        for lock in self.patches.values() {
            let mut patch = lock.write().unwrap();
            for id in selector.iter() {
                patch.allocate(id, &self.db, time);
            }
        }
    }

    pub fn deallocate_patch_data(&self, selector: &ComponentSelector) {
        for lock in self.patches.values() {
            let mut patch = lock.write().unwrap();
            for id in selector.iter() {
                patch.deallocate(id);
            }
        }
    }

    /// Restamp the time of the selected entries on every local patch.
    pub fn set_time(&self, time: f64, selector: &ComponentSelector) {
        for lock in self.patches.values() {
            let mut patch = lock.write().unwrap();
            for id in selector.iter() {
                if let Some(data) = patch.try_data_mut(id) {
                    data.set_time(time);
                }
            }
        }
    }
}

// ============================================================================
#[cfg(test)]
mod test {

    use super::PatchLevel;
    use crate::box_level::BoxLevel;
    use crate::geometry::BlockGeometry;
    use crate::index_space::{BlockId, IndexSpace};
    use crate::int_vector::IntVector;
    use crate::message::comm::SerialCommunicator;
    use crate::patch_data::ScalarKind;
    use crate::variable::{ComponentSelector, Variable, VariableDatabase};
    use std::sync::Arc;

    #[test]
    fn allocation_reaches_every_patch() {
        let geometry = Arc::new(BlockGeometry::cartesian(
            &[0.0, 0.0],
            &[1.0, 1.0],
            vec![IndexSpace::from_bounds(&[0, 0], &[9, 9])],
        ));
        let mut box_level = BoxLevel::new(
            IntVector::one(2),
            geometry,
            Arc::new(SerialCommunicator),
        );
        box_level.add_box(IndexSpace::from_bounds(&[0, 0], &[4, 9]), BlockId(0));
        box_level.add_box(IndexSpace::from_bounds(&[5, 0], &[9, 9]), BlockId(0));

        let db = VariableDatabase::new();
        let var = db.add_variable(Variable::cell("u", ScalarKind::Double, 1));
        let ctx = db.get_context("CURRENT");
        let id = db.register_variable_and_context(&var, &ctx, &IntVector::zero(2));

        let level = PatchLevel::new(Arc::new(box_level), db);
        let selector: ComponentSelector = [id].into_iter().collect();
        level.allocate_patch_data(&selector, 2.0);

        for lock in level.patches() {
            let patch = lock.read().unwrap();
            assert!(patch.is_allocated(id));
            assert_eq!(patch.data(id).time(), 2.0);
        }

        level.set_time(3.0, &selector);
        assert_eq!(level.patch(level.patch_ids().next().unwrap()).data(id).time(), 3.0);

        level.deallocate_patch_data(&selector);
        for lock in level.patches() {
            assert!(!lock.read().unwrap().is_allocated(id));
        }
    }
}
