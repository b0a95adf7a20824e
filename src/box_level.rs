use crate::geometry::BlockGeometry;
use crate::index_space::{BlockId, BoxId, IndexSpace, MeshBox};
use crate::int_vector::IntVector;
use crate::message::comm::Communicator;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Whether a [`BoxLevel`] stores only the boxes owned by this rank, or every
/// box in the level.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ParallelState {
    Distributed,
    Globalized,
}

/// A distributed set of boxes at one refinement ratio. Boxes are ordered by
/// [`BoxId`] and partitioned by owner rank; only canonical boxes (periodic
/// shift zero) are stored. In the `Distributed` state each rank holds its own
/// boxes; `globalize` produces a copy in which every rank holds every box.
///
/// Invariants: no two boxes share a `BoxId`, and locally-owned boxes of the
/// same block never overlap spatially.
#[derive(Clone)]
pub struct BoxLevel {
    ratio: IntVector,
    geometry: Arc<BlockGeometry>,
    comm: Arc<dyn Communicator>,
    state: ParallelState,
    boxes: BTreeMap<BoxId, MeshBox>,
}

// ============================================================================
impl BoxLevel {
    pub fn new(
        ratio: IntVector,
        geometry: Arc<BlockGeometry>,
        comm: Arc<dyn Communicator>,
    ) -> Self {
        assert!(ratio.all_positive(), "invalid refinement ratio {}", ratio);
        Self {
            ratio,
            geometry,
            comm,
            state: ParallelState::Distributed,
            boxes: BTreeMap::new(),
        }
    }

    /// Add a box owned by this rank, assigning the next local id.
    pub fn add_box(&mut self, space: IndexSpace, block: BlockId) -> BoxId {
        let local = self
            .boxes
            .keys()
            .filter(|id| id.owner() == self.rank())
            .map(|id| id.local + 1)
            .max()
            .unwrap_or(0);
        let id = BoxId::new(self.rank(), local);
        self.insert(MeshBox::new(space, block, id));
        id
    }

    /// Add a box with an explicit identity; used when the caller controls
    /// the decomposition (test drivers, regridding).
    pub fn add_box_with_id(&mut self, space: IndexSpace, block: BlockId, id: BoxId) {
        self.insert(MeshBox::new(space, block, id));
    }

    fn insert(&mut self, mesh_box: MeshBox) {
        let id = mesh_box.id();
        assert!(!id.is_periodic_image(), "cannot add a periodic image");
        assert! {
            !self.boxes.contains_key(&id),
            "duplicate box id {:?}",
            id
        };
        self.boxes.insert(id, mesh_box);
    }

    /// Check that no two locally-owned boxes of the same block overlap.
    /// Proper mesh levels must satisfy this; supplementary levels (fill
    /// regions, coarse-interpolation work levels) are allowed to overlap.
    pub fn assert_no_local_overlap(&self) {
        let local: Vec<_> = self.local_boxes().collect();
        for (i, a) in local.iter().enumerate() {
            for b in &local[i + 1..] {
                assert! {
                    a.block() != b.block() || !a.space().intersects(b.space()),
                    "boxes {:?} and {:?} overlap",
                    a.id(),
                    b.id()
                };
            }
        }
    }

    pub fn ratio(&self) -> &IntVector {
        &self.ratio
    }

    pub fn dim(&self) -> usize {
        self.ratio.dim()
    }

    pub fn geometry(&self) -> &Arc<BlockGeometry> {
        &self.geometry
    }

    pub fn comm(&self) -> &Arc<dyn Communicator> {
        &self.comm
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn state(&self) -> ParallelState {
        self.state
    }

    pub fn get(&self, id: &BoxId) -> Option<&MeshBox> {
        self.boxes.get(&id.canonical())
    }

    /// Iterate all stored boxes in id order.
    pub fn boxes(&self) -> impl Iterator<Item = &MeshBox> {
        self.boxes.values()
    }

    /// Iterate the boxes owned by this rank, in id order.
    pub fn local_boxes(&self) -> impl Iterator<Item = &MeshBox> + '_ {
        let rank = self.rank();
        self.boxes.values().filter(move |b| b.id().owner() == rank)
    }

    pub fn local_box_count(&self) -> usize {
        self.local_boxes().count()
    }

    pub fn local_cell_count(&self) -> usize {
        self.local_boxes().map(|b| b.space().len()).sum()
    }

    /// The number of boxes in the level across all ranks. Collective in the
    /// distributed state.
    pub fn global_box_count(&self) -> usize {
        match self.state {
            ParallelState::Globalized => self.boxes.len(),
            ParallelState::Distributed => self.comm.all_reduce_sum_usize(self.local_box_count()),
        }
    }

    /// Produce a globalized copy of this level: every rank holds every box.
    /// Collective; the local read of remote boxes is network-sourced.
    pub fn globalize(&self) -> Self {
        if self.state == ParallelState::Globalized || self.comm.size() == 1 {
            return Self {
                state: ParallelState::Globalized,
                ..self.clone()
            };
        }
        let local: Vec<&MeshBox> = self.local_boxes().collect();
        let encoded = rmp_serde::to_vec(&local).unwrap();

        let mut boxes = BTreeMap::new();
        for bytes in self.comm.all_gather(encoded) {
            let remote: Vec<MeshBox> = rmp_serde::from_slice(&bytes).unwrap();
            for b in remote {
                boxes.insert(b.id(), b);
            }
        }
        Self {
            ratio: self.ratio,
            geometry: self.geometry.clone(),
            comm: self.comm.clone(),
            state: ParallelState::Globalized,
            boxes,
        }
    }

    /// All periodic images of a stored box, positioned at this level's
    /// refinement ratio. Yields nothing when the geometry is not periodic.
    pub fn periodic_images<'a>(
        &'a self,
        mesh_box: &'a MeshBox,
    ) -> impl Iterator<Item = MeshBox> + 'a {
        self.geometry
            .shift_catalog()
            .iter()
            .enumerate()
            .skip(1)
            .map(move |(shift_number, _)| {
                let displacement = self
                    .geometry
                    .shift_displacement(shift_number as u16, &self.ratio);
                mesh_box.periodic_image(shift_number as u16, &displacement)
            })
    }
}

// ============================================================================
#[cfg(test)]
mod test {

    use super::BoxLevel;
    use crate::geometry::BlockGeometry;
    use crate::index_space::{BlockId, BoxId, IndexSpace};
    use crate::int_vector::IntVector;
    use crate::message::comm::SerialCommunicator;
    use std::sync::Arc;

    fn serial_level() -> BoxLevel {
        let geometry = BlockGeometry::cartesian(
            &[0.0, 0.0],
            &[1.0, 1.0],
            vec![IndexSpace::from_bounds(&[0, 0], &[9, 9])],
        );
        BoxLevel::new(
            IntVector::one(2),
            Arc::new(geometry),
            Arc::new(SerialCommunicator),
        )
    }

    #[test]
    fn local_ids_are_sequential() {
        let mut level = serial_level();
        let a = level.add_box(IndexSpace::from_bounds(&[0, 0], &[4, 9]), BlockId(0));
        let b = level.add_box(IndexSpace::from_bounds(&[5, 0], &[9, 9]), BlockId(0));
        assert_eq!(a, BoxId::new(0, 0));
        assert_eq!(b, BoxId::new(0, 1));
        assert_eq!(level.local_box_count(), 2);
        assert_eq!(level.local_cell_count(), 100);
        assert_eq!(level.global_box_count(), 2);
    }

    #[test]
    #[should_panic]
    fn duplicate_ids_are_rejected() {
        let mut level = serial_level();
        level.add_box_with_id(
            IndexSpace::from_bounds(&[0, 0], &[4, 9]),
            BlockId(0),
            BoxId::new(0, 0),
        );
        level.add_box_with_id(
            IndexSpace::from_bounds(&[5, 0], &[9, 9]),
            BlockId(0),
            BoxId::new(0, 0),
        );
    }

    #[test]
    fn periodic_images_are_shifted_copies() {
        let geometry = BlockGeometry::cartesian(
            &[0.0, 0.0],
            &[1.0, 1.0],
            vec![IndexSpace::from_bounds(&[0, 0], &[9, 9])],
        )
        .with_periodic(&[true, false]);
        let mut level = BoxLevel::new(
            IntVector::uniform(2, 2),
            Arc::new(geometry),
            Arc::new(SerialCommunicator),
        );
        let id = level.add_box(IndexSpace::from_bounds(&[0, 0], &[19, 19]), BlockId(0));
        let canonical = level.get(&id).unwrap().clone();

        let images: Vec<_> = level.periodic_images(&canonical).collect();
        assert_eq!(images.len(), 2);
        for image in &images {
            assert!(image.id().is_periodic_image());
            assert_eq!(image.space().shape(), canonical.space().shape());
            assert_eq!(image.space().lower()[0].abs(), 20);
        }
    }
}
