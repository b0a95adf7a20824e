use crate::geometry::BlockGeometry;
use crate::index_space::{BoxId, IndexSpace, MeshBox};
use crate::int_vector::{IntVector, MAX_DIM};
use crate::patch_data::PatchData;
use crate::variable::{DescriptorId, VariableDatabase};
use std::sync::Arc;

/// A box of the mesh plus the patch-data entries allocated on it, indexed by
/// descriptor id. Entries are allocated and deallocated as a group through
/// component selectors on the owning level; an unallocated entry is `None`.
/// The patch knows its level's refinement ratio and the block geometry, so
/// per-patch kernels can ask for physical cell sizes and domain extents
/// without reaching back to the level.
pub struct Patch {
    mesh_box: MeshBox,
    ratio: IntVector,
    geometry: Arc<BlockGeometry>,
    data: Vec<Option<PatchData>>,
}

// ============================================================================
impl Patch {
    pub fn new(mesh_box: MeshBox, ratio: IntVector, geometry: Arc<BlockGeometry>) -> Self {
        Self {
            mesh_box,
            ratio,
            geometry,
            data: Vec::new(),
        }
    }

    pub fn mesh_box(&self) -> &MeshBox {
        &self.mesh_box
    }

    pub fn space(&self) -> &IndexSpace {
        self.mesh_box.space()
    }

    pub fn id(&self) -> BoxId {
        self.mesh_box.id()
    }

    pub fn dim(&self) -> usize {
        self.space().dim()
    }

    pub fn ratio(&self) -> &IntVector {
        &self.ratio
    }

    pub fn geometry(&self) -> &Arc<BlockGeometry> {
        &self.geometry
    }

    /// Physical cell sizes on this patch's level.
    pub fn cell_sizes(&self) -> [f64; MAX_DIM] {
        self.geometry.cell_sizes(&self.ratio)
    }

    /// The physical-domain boxes of this patch's block, at this patch's
    /// refinement ratio.
    pub fn domain_boxes(&self) -> Vec<IndexSpace> {
        self.geometry
            .domain_boxes_at(self.mesh_box.block(), &self.ratio)
    }

    /// Allocate the entry for one descriptor, stamped with `time`. The entry
    /// takes its centering, kind, depth and ghost width from the registry.
    /// Allocating an already-allocated entry restamps its time.
    pub fn allocate(&mut self, id: DescriptorId, db: &VariableDatabase, time: f64) {
        if self.data.len() <= id {
            self.data.resize_with(id + 1, || None);
        }
        let space = self.space().clone();
        match &mut self.data[id] {
            Some(existing) => existing.set_time(time),
            slot => {
                let descriptor = db.descriptor(id);
                let mut data = PatchData::new(
                    descriptor.variable.kind,
                    descriptor.variable.centering,
                    space,
                    descriptor.ghost,
                    descriptor.variable.depth,
                );
                data.set_time(time);
                *slot = Some(data);
            }
        }
    }

    pub fn deallocate(&mut self, id: DescriptorId) {
        if id < self.data.len() {
            self.data[id] = None;
        }
    }

    pub fn is_allocated(&self, id: DescriptorId) -> bool {
        self.data.get(id).map_or(false, Option::is_some)
    }

    pub fn data(&self, id: DescriptorId) -> &PatchData {
        self.try_data(id)
            .unwrap_or_else(|| panic!("patch data {} is not allocated on {:?}", id, self.id()))
    }

    pub fn data_mut(&mut self, id: DescriptorId) -> &mut PatchData {
        let box_id = self.id();
        self.try_data_mut(id)
            .unwrap_or_else(|| panic!("patch data {} is not allocated on {:?}", id, box_id))
    }

    pub fn try_data(&self, id: DescriptorId) -> Option<&PatchData> {
        self.data.get(id).and_then(Option::as_ref)
    }

    pub fn try_data_mut(&mut self, id: DescriptorId) -> Option<&mut PatchData> {
        self.data.get_mut(id).and_then(Option::as_mut)
    }

    /// Replace the entry for a descriptor with another entry (or none),
    /// returning the previous one. This is the pointer-swap primitive behind
    /// the CURRENT <- NEW rotation at the end of a timestep.
    pub fn replace_data(&mut self, id: DescriptorId, data: Option<PatchData>) -> Option<PatchData> {
        if self.data.len() <= id {
            self.data.resize_with(id + 1, || None);
        }
        std::mem::replace(&mut self.data[id], data)
    }

    /// Two distinct entries of this patch, the first mutably. Used by
    /// same-patch copies, which would otherwise alias.
    pub fn data_pair_mut(
        &mut self,
        dst: DescriptorId,
        src: DescriptorId,
    ) -> (&mut PatchData, &PatchData) {
        assert!(dst != src, "data pair must name two distinct entries");
        let (lo, hi) = (dst.min(src), dst.max(src));
        let (head, tail) = self.data.split_at_mut(hi);
        let a = head[lo].as_mut().expect("patch data not allocated");
        let b = tail[0].as_mut().expect("patch data not allocated");
        if dst < src {
            (a, &*b)
        } else {
            (b, &*a)
        }
    }

    /// Copy one entry onto another over a region of cells.
    pub fn copy_between(&mut self, dst: DescriptorId, src: DescriptorId, region: &IndexSpace) {
        let shift = crate::int_vector::IntVector::zero(self.dim());
        let (dst, src) = self.data_pair_mut(dst, src);
        dst.copy_on_cells(src, region, &shift);
    }
}

// ============================================================================
#[cfg(test)]
mod test {

    use super::Patch;
    use crate::index_space::{BlockId, BoxId, IndexSpace, MeshBox};
    use crate::int_vector::IntVector;
    use crate::patch_data::ScalarKind;
    use crate::variable::{Variable, VariableDatabase};

    fn test_patch() -> (Patch, std::sync::Arc<VariableDatabase>, usize, usize) {
        let db = VariableDatabase::new();
        let var = db.add_variable(Variable::cell("u", ScalarKind::Double, 1));
        let current = db.get_context("CURRENT");
        let scratch = db.get_context("SCRATCH");
        let cur_id = db.register_variable_and_context(&var, &current, &IntVector::zero(2));
        let scr_id = db.register_variable_and_context(&var, &scratch, &IntVector::uniform(2, 2));

        let geometry = crate::geometry::BlockGeometry::cartesian(
            &[0.0, 0.0],
            &[1.0, 1.0],
            vec![IndexSpace::from_bounds(&[0, 0], &[7, 7])],
        );
        let patch = Patch::new(
            MeshBox::new(
                IndexSpace::from_bounds(&[0, 0], &[7, 7]),
                BlockId(0),
                BoxId::new(0, 0),
            ),
            IntVector::one(2),
            std::sync::Arc::new(geometry),
        );
        (patch, db, cur_id, scr_id)
    }

    #[test]
    fn allocation_follows_the_descriptor() {
        let (mut patch, db, cur_id, scr_id) = test_patch();
        patch.allocate(cur_id, &db, 1.5);
        patch.allocate(scr_id, &db, 1.5);

        assert_eq!(patch.data(cur_id).time(), 1.5);
        assert_eq!(patch.data(cur_id).ghost(), IntVector::zero(2));
        assert_eq!(patch.data(scr_id).ghost(), IntVector::uniform(2, 2));

        patch.deallocate(scr_id);
        assert!(!patch.is_allocated(scr_id));
        assert!(patch.is_allocated(cur_id));
    }

    #[test]
    fn copy_between_moves_interior_values() {
        let (mut patch, db, cur_id, scr_id) = test_patch();
        patch.allocate(cur_id, &db, 0.0);
        patch.allocate(scr_id, &db, 0.0);

        patch
            .data_mut(scr_id)
            .as_double_mut()
            .fill_all(4.25);
        let interior = patch.space().clone();
        patch.copy_between(cur_id, scr_id, &interior);

        let copied = patch.data(cur_id).as_double();
        assert_eq!(
            copied.component(0).get(&IntVector::new(&[3, 3]), 0),
            4.25
        );
    }
}
