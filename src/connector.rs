use crate::box_level::BoxLevel;
use crate::index_space::{BoxId, IndexSpace, MeshBox};
use crate::int_vector::IntVector;
use crate::message::comm::Communicator;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::sync::Arc;

/// Convert a box from one refinement ratio to another, per axis: refine
/// where the target ratio is finer, coarsen (containing) where it is
/// coarser.
pub fn convert_space(space: &IndexSpace, from: &IntVector, to: &IntVector) -> IndexSpace {
    let dim = space.dim();
    let mut refine = IntVector::one(dim);
    let mut coarsen = IntVector::one(dim);
    for a in 0..dim {
        if to[a] > from[a] {
            assert_eq!(to[a] % from[a], 0, "incompatible ratios {} -> {}", from, to);
            refine[a] = to[a] / from[a];
        } else if to[a] < from[a] {
            assert_eq!(from[a] % to[a], 0, "incompatible ratios {} -> {}", from, to);
            coarsen[a] = from[a] / to[a];
        }
    }
    space.refine(&refine).coarsen(&coarsen)
}

/// Convert a width (a non-negative per-axis distance) between ratios,
/// rounding up where it must coarsen so the converted width still covers
/// the original.
pub fn convert_width(width: &IntVector, from: &IntVector, to: &IntVector) -> IntVector {
    let dim = width.dim();
    let mut out = *width;
    for a in 0..dim {
        if to[a] > from[a] {
            out[a] = width[a] * (to[a] / from[a]);
        } else if to[a] < from[a] {
            let r = from[a] / to[a];
            out[a] = -(-width[a]).div_euclid(r);
        }
    }
    out
}

/// A directed neighbor relation from a *base* box level to a *head* box
/// level at a stated connector width `w`, given in the base index space.
/// The overlap contract: for every base box `B` and head box `H`, if
/// `grow(B, w)` intersects `H` in the base index space, then `H` appears as
/// a neighbor of `B`. Extra edges are permitted; missing edges are not
/// (once the connector is complete).
///
/// Periodic edges store the head box as a shifted image; the base box of an
/// edge is always canonical.
#[derive(Clone)]
pub struct Connector {
    base: Arc<BoxLevel>,
    head: Arc<BoxLevel>,
    width: IntVector,
    edges: BTreeMap<BoxId, Vec<MeshBox>>,
    complete: bool,
}

// ============================================================================
impl Connector {
    pub fn new(base: Arc<BoxLevel>, head: Arc<BoxLevel>, width: IntVector) -> Self {
        assert_eq!(base.dim(), head.dim());
        Self {
            base,
            head,
            width,
            edges: BTreeMap::new(),
            complete: false,
        }
    }

    pub fn base(&self) -> &Arc<BoxLevel> {
        &self.base
    }

    pub fn head(&self) -> &Arc<BoxLevel> {
        &self.head
    }

    pub fn width(&self) -> &IntVector {
        &self.width
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn mark_complete(&mut self) {
        self.complete = true;
    }

    /// Whether `head_box` (in head ratio) overlaps `base_box` grown by this
    /// connector's width, in the base index space. Boxes on different blocks
    /// overlap only through a registered block transform.
    pub fn boxes_overlap(&self, base_box: &MeshBox, head_box: &MeshBox) -> bool {
        self.boxes_overlap_at_width(base_box, head_box, &self.width)
    }

    pub fn boxes_overlap_at_width(
        &self,
        base_box: &MeshBox,
        head_box: &MeshBox,
        width: &IntVector,
    ) -> bool {
        let head_space = if head_box.block() == base_box.block() {
            head_box.space().clone()
        } else {
            let geometry = self.base.geometry();
            match geometry.transform(head_box.block(), base_box.block()) {
                Some(t) => t.transform_space(head_box.space()),
                None => return false,
            }
        };
        let head_in_base = convert_space(&head_space, self.head.ratio(), self.base.ratio());
        base_box.space().grow(width).intersects(&head_in_base)
    }

    /// Record `head_box` as a neighbor of the base box `base_id`. Neighbor
    /// lists stay sorted by head id for deterministic iteration.
    pub fn insert_edge(&mut self, base_id: BoxId, head_box: MeshBox) {
        assert!(!base_id.is_periodic_image(), "base of an edge is canonical");
        let neighbors = self.edges.entry(base_id).or_default();
        match neighbors.binary_search_by(|b| b.id().cmp(&head_box.id())) {
            Ok(_) => (),
            Err(at) => neighbors.insert(at, head_box),
        }
    }

    /// The recorded neighbors of one base box, in head-id order.
    pub fn neighbors(&self, base_id: &BoxId) -> &[MeshBox] {
        self.edges
            .get(&base_id.canonical())
            .map_or(&[], Vec::as_slice)
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    /// Iterate `(base id, neighbors)` in base-id order.
    pub fn neighborhoods(&self) -> impl Iterator<Item = (&BoxId, &Vec<MeshBox>)> {
        self.edges.iter()
    }

    /// Build the transpose of this connector from locally-stored edges. Only
    /// meaningful when every edge endpoint is visible on this rank (serial
    /// runs, or globalized levels); the distributed transpose comes out of
    /// the same exchange that builds the forward connector.
    pub fn transpose_local(&self) -> Connector {
        let width = convert_width(&self.width, self.base.ratio(), self.head.ratio());
        let mut transpose = Connector::new(self.head.clone(), self.base.clone(), width);
        for (base_id, neighbors) in &self.edges {
            let base_box = self
                .base
                .get(base_id)
                .expect("edge references a missing base box")
                .clone();
            for head_box in neighbors {
                let mirrored = mirror_base_box(&self.base, &base_box, head_box);
                transpose.insert_edge(head_box.id().canonical(), mirrored);
            }
        }
        transpose.complete = self.complete;
        transpose
    }

    /// Verify that this connector and `other` are mutual transposes: every
    /// edge `(B, H)` here is mirrored as `(H, B)` there and vice versa.
    /// Collective over the communicator; edges whose mirror lives on another
    /// rank are shipped to that rank for checking.
    pub fn check_transpose_consistency(&self, other: &Connector) -> bool {
        self.half_check(other) && other.half_check(self)
    }

    fn half_check(&self, other: &Connector) -> bool {
        let comm = self.base.comm();
        let rank = comm.rank();

        let mut ok = true;
        let mut outgoing: BTreeMap<usize, Vec<(BoxId, BoxId)>> = BTreeMap::new();
        for (base_id, neighbors) in &self.edges {
            if base_id.owner() != rank {
                continue;
            }
            for head_box in neighbors {
                let owner = head_box.id().owner();
                let pair = (head_box.id().canonical(), *base_id);
                if owner == rank {
                    ok &= other.has_edge_to(&pair.0, &pair.1);
                } else {
                    outgoing.entry(owner).or_default().push(pair);
                }
            }
        }

        if comm.size() > 1 {
            // Every rank talks to every other rank once; empty messages keep
            // the exchange deterministic.
            let all_others: BTreeSet<usize> = (0..comm.size()).filter(|&r| r != rank).collect();
            let payloads = all_others
                .iter()
                .map(|&r| {
                    let pairs = outgoing.remove(&r).unwrap_or_default();
                    (r, rmp_serde::to_vec(&pairs).unwrap())
                })
                .collect();
            for (_, bytes) in comm.exchange(payloads, &all_others) {
                let pairs: Vec<(BoxId, BoxId)> = rmp_serde::from_slice(&bytes).unwrap();
                for (head_id, base_id) in pairs {
                    ok &= other.has_edge_to(&head_id, &base_id);
                }
            }
            ok = comm.all_reduce_f64(
                crate::message::comm::Reduce::Min,
                if ok { 1.0 } else { 0.0 },
            ) > 0.5;
        }
        ok
    }

    fn has_edge_to(&self, base_id: &BoxId, head_id: &BoxId) -> bool {
        self.neighbors(base_id)
            .iter()
            .any(|b| b.id().canonical() == head_id.canonical())
    }

    /// Render every neighborhood, for the diagnostic dump attached to fatal
    /// topology errors.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "connector width {} base ratio {} head ratio {} ({} edges)",
            self.width,
            self.base.ratio(),
            self.head.ratio(),
            self.edge_count()
        );
        for (base_id, neighbors) in &self.edges {
            let _ = writeln!(out, "  {:?} ->", base_id);
            for n in neighbors {
                let _ = writeln!(out, "    {:?} {}", n.id(), n.space());
            }
        }
        out
    }
}

/// Mirror the base endpoint of an edge whose head may be a periodic image:
/// the mirrored edge keeps the head canonical and shifts the base by the
/// inverse displacement, never both.
fn mirror_base_box(base_level: &BoxLevel, base_box: &MeshBox, head_box: &MeshBox) -> MeshBox {
    if !head_box.id().is_periodic_image() {
        return base_box.clone();
    }
    let geometry = base_level.geometry();
    let shift = head_box.id().shift;
    let inverse = geometry
        .shift_catalog()
        .iter()
        .position(|s| *s == -geometry.shift_catalog()[shift as usize])
        .expect("shift catalog is closed under negation") as u16;
    let displacement = geometry.shift_displacement(inverse, base_level.ratio());
    base_box.periodic_image(inverse, &displacement)
}

// ============================================================================
#[cfg(test)]
mod test {

    use super::{convert_space, convert_width, Connector};
    use crate::box_level::BoxLevel;
    use crate::geometry::BlockGeometry;
    use crate::index_space::{BlockId, IndexSpace};
    use crate::int_vector::IntVector;
    use crate::message::comm::SerialCommunicator;
    use std::sync::Arc;

    #[test]
    fn ratio_conversions_round_correctly() {
        let fine = IntVector::uniform(2, 4);
        let coarse = IntVector::uniform(2, 2);
        let space = IndexSpace::from_bounds(&[5, 6], &[9, 9]);
        assert_eq!(
            convert_space(&space, &fine, &coarse),
            IndexSpace::from_bounds(&[2, 3], &[4, 4])
        );
        assert_eq!(
            convert_width(&IntVector::new(&[3, 4]), &fine, &coarse),
            IntVector::new(&[2, 2])
        );
        assert_eq!(
            convert_width(&IntVector::new(&[1, 1]), &coarse, &fine),
            IntVector::new(&[2, 2])
        );
    }

    #[test]
    fn transpose_mirrors_every_edge() {
        let geometry = Arc::new(BlockGeometry::cartesian(
            &[0.0, 0.0],
            &[1.0, 1.0],
            vec![IndexSpace::from_bounds(&[0, 0], &[9, 9])],
        ));
        let comm = Arc::new(SerialCommunicator);

        let mut base = BoxLevel::new(IntVector::one(2), geometry.clone(), comm.clone());
        let b0 = base.add_box(IndexSpace::from_bounds(&[0, 0], &[4, 9]), BlockId(0));
        let b1 = base.add_box(IndexSpace::from_bounds(&[5, 0], &[9, 9]), BlockId(0));

        let mut head = BoxLevel::new(IntVector::uniform(2, 2), geometry, comm);
        let h0 = head.add_box(IndexSpace::from_bounds(&[6, 6], &[13, 13]), BlockId(0));

        let base = Arc::new(base);
        let head = Arc::new(head);
        let head_box = head.get(&h0).unwrap().clone();

        let mut forward = Connector::new(base.clone(), head.clone(), IntVector::one(2));
        forward.insert_edge(b0, head_box.clone());
        forward.insert_edge(b1, head_box);

        let transpose = forward.transpose_local();
        assert_eq!(transpose.neighbors(&h0).len(), 2);
        assert!(forward.check_transpose_consistency(&transpose));

        let broken = Connector::new(head, base, *transpose.width());
        assert!(!forward.check_transpose_consistency(&broken));
    }
}
