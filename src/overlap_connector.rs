use crate::box_level::BoxLevel;
use crate::box_tree::BoxTree;
use crate::connector::{convert_space, convert_width, Connector};
use crate::index_space::{BlockId, BoxId, MeshBox};
use crate::int_vector::IntVector;
use crate::message::comm::Communicator;
use log::debug;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Builds and modifies overlap connectors between box levels. `find_overlaps`
/// works against a globalized head; `bridge` computes connectors between two
/// levels that share complete connectors to a common center level, without
/// globalizing either.
pub struct OverlapConnectorAlgorithm;

/// Per-block search trees over a set of boxes, with periodic images
/// included, expressed at a chosen refinement ratio.
struct BlockTrees {
    boxes: Vec<MeshBox>,
    trees: BTreeMap<BlockId, BoxTree>,
}

impl BlockTrees {
    fn build(level: &BoxLevel, at_ratio: &IntVector) -> Self {
        let mut boxes = Vec::new();
        for mesh_box in level.boxes() {
            boxes.push(mesh_box.clone());
            for image in level.periodic_images(mesh_box) {
                boxes.push(image);
            }
        }
        let mut by_block: BTreeMap<BlockId, Vec<(crate::index_space::IndexSpace, usize)>> =
            BTreeMap::new();
        for (i, mesh_box) in boxes.iter().enumerate() {
            let space = convert_space(mesh_box.space(), level.ratio(), at_ratio);
            by_block.entry(mesh_box.block()).or_default().push((space, i));
        }
        let trees = by_block
            .into_iter()
            .map(|(block, entries)| (block, BoxTree::build(entries)))
            .collect();
        Self { boxes, trees }
    }
}

// ============================================================================
impl OverlapConnectorAlgorithm {
    /// Populate a new connector with all edges consistent with the given
    /// width. The head is globalized internally (a collective, network-
    /// sourced read) and searched locally for every locally-owned base box.
    /// When `ignore_self_overlap` is set, edges joining a box to itself
    /// (same `BoxId`, same refinement ratio) are dropped.
    pub fn find_overlaps(
        &self,
        base: &Arc<BoxLevel>,
        head: &Arc<BoxLevel>,
        width: &IntVector,
        ignore_self_overlap: bool,
    ) -> Connector {
        let globalized_head = head.globalize();
        let trees = BlockTrees::build(&globalized_head, base.ratio());
        let geometry = base.geometry();
        let same_ratio = base.ratio() == head.ratio();

        let mut connector = Connector::new(base.clone(), head.clone(), *width);
        for base_box in base.local_boxes() {
            let grown = base_box.space().grow(width);

            let mut hits: Vec<usize> = Vec::new();
            if let Some(tree) = trees.trees.get(&base_box.block()) {
                hits.extend(tree.query(&grown));
            }
            // Neighboring blocks are searched through the geometry's
            // transform into their index space.
            for (&block, tree) in &trees.trees {
                if block == base_box.block() {
                    continue;
                }
                if let Some(t) = geometry.transform(base_box.block(), block) {
                    hits.extend(tree.query(&t.transform_space(&grown)));
                }
            }

            for i in hits {
                let head_box = &trees.boxes[i];
                // A box's periodic images are still its neighbors; only the
                // literal self edge is dropped.
                if ignore_self_overlap && same_ratio && head_box.id() == base_box.id() {
                    continue;
                }
                connector.insert_edge(base_box.id(), head_box.clone());
            }
        }
        connector.mark_complete();
        connector
    }

    /// Produce a narrower connector from `connector` by keeping only the
    /// edges that still overlap at width `narrow` (which must not exceed the
    /// connector's width).
    pub fn extract_neighbors(&self, connector: &Connector, narrow: &IntVector) -> Connector {
        assert! {
            connector.width().all_ge(narrow),
            "extraction width {} exceeds connector width {}",
            narrow,
            connector.width()
        };
        let mut extracted = Connector::new(
            connector.base().clone(),
            connector.head().clone(),
            *narrow,
        );
        for (base_id, neighbors) in connector.neighborhoods() {
            let base_box = connector
                .base()
                .get(base_id)
                .expect("edge references a missing base box");
            for head_box in neighbors {
                if extracted.boxes_overlap(base_box, head_box) {
                    extracted.insert_edge(*base_id, head_box.clone());
                }
            }
        }
        if connector.is_complete() {
            extracted.mark_complete();
        }
        extracted
    }

    /// Compute overlap connectors between `west` and `east` given complete
    /// connectors joining each to a common `center`, without globalizing
    /// either. The output width is the greater of the two center widths,
    /// converted into the coarser of the west/east index spaces, optionally
    /// capped by `width_limit`. Without a nesting proof the outputs may be
    /// short of completeness; see [`bridge_with_nesting`].
    ///
    /// [`bridge_with_nesting`]: OverlapConnectorAlgorithm::bridge_with_nesting
    pub fn bridge(
        &self,
        west_to_center: &Connector,
        center_to_east: &Connector,
        east_to_center: &Connector,
        center_to_west: &Connector,
        width_limit: Option<&IntVector>,
    ) -> (Connector, Connector) {
        self.private_bridge(
            west_to_center,
            center_to_east,
            east_to_center,
            center_to_west,
            None,
            None,
            width_limit,
        )
    }

    /// Bridge with a nesting guarantee on the west side only: the
    /// west-to-east output is complete at width
    /// `width(center_to_east) - center_growth_to_nest_west` (converted);
    /// the east-to-west output carries the same edges with no completeness
    /// claim.
    pub fn bridge_with_west_nesting(
        &self,
        west_to_center: &Connector,
        center_to_east: &Connector,
        east_to_center: &Connector,
        center_to_west: &Connector,
        center_growth_to_nest_west: &IntVector,
        width_limit: Option<&IntVector>,
    ) -> (Connector, Connector) {
        self.private_bridge(
            west_to_center,
            center_to_east,
            east_to_center,
            center_to_west,
            Some(center_growth_to_nest_west),
            None,
            width_limit,
        )
    }

    /// Bridge with nesting guarantees: when the center level grown by
    /// `center_growth_to_nest_west` contains the west level, the west-to-east
    /// output is a complete overlap connector at width
    /// `width(center_to_east) - center_growth_to_nest_west` (converted), and
    /// symmetrically for east.
    pub fn bridge_with_nesting(
        &self,
        west_to_center: &Connector,
        center_to_east: &Connector,
        east_to_center: &Connector,
        center_to_west: &Connector,
        center_growth_to_nest_west: &IntVector,
        center_growth_to_nest_east: &IntVector,
        width_limit: Option<&IntVector>,
    ) -> (Connector, Connector) {
        self.private_bridge(
            west_to_center,
            center_to_east,
            east_to_center,
            center_to_west,
            Some(center_growth_to_nest_west),
            Some(center_growth_to_nest_east),
            width_limit,
        )
    }

    fn private_bridge(
        &self,
        west_to_center: &Connector,
        center_to_east: &Connector,
        east_to_center: &Connector,
        center_to_west: &Connector,
        center_growth_to_nest_west: Option<&IntVector>,
        center_growth_to_nest_east: Option<&IntVector>,
        width_limit: Option<&IntVector>,
    ) -> (Connector, Connector) {
        let center = center_to_west.base().clone();
        let west = center_to_west.head().clone();
        let east = center_to_east.head().clone();

        assert! {
            Arc::ptr_eq(west_to_center.head(), &center)
                && Arc::ptr_eq(east_to_center.head(), &center),
            "bridge inputs do not share a center level"
        };
        debug_assert! {
            west_to_center.check_transpose_consistency(center_to_west),
            "west/center connectors are not mutual transposes"
        };
        debug_assert! {
            east_to_center.check_transpose_consistency(center_to_east),
            "east/center connectors are not mutual transposes"
        };

        // Output widths, in the coarser of the west/east index spaces. A
        // nesting proof lets each direction claim completeness at the
        // corresponding center width reduced by the nesting growth.
        let coarser = west.ratio().min_with(east.ratio());
        let width_of = |connector: &Connector, growth: Option<&IntVector>| {
            let reduced = match growth {
                Some(g) => (*connector.width() - *g).max_with(&IntVector::zero(g.dim())),
                None => *connector.width(),
            };
            convert_width(&reduced, center.ratio(), &coarser)
        };
        let mut out_width = match (center_growth_to_nest_west, center_growth_to_nest_east) {
            (None, None) => width_of(center_to_east, None).max_with(&width_of(center_to_west, None)),
            (Some(gw), None) => width_of(center_to_east, Some(gw)),
            (None, Some(ge)) => width_of(center_to_west, Some(ge)),
            (gw, ge) => width_of(center_to_east, gw).max_with(&width_of(center_to_west, ge)),
        };
        if let Some(limit) = width_limit {
            out_width = out_width.min_with(limit);
        }
        let west_width = convert_width(&out_width, &coarser, west.ratio());
        let east_width = convert_width(&out_width, &coarser, east.ratio());

        let mut west_to_east = Connector::new(west.clone(), east.clone(), west_width);
        let mut east_to_west = Connector::new(east.clone(), west.clone(), east_width);

        // Discover candidate edges among (west, east) neighbor pairs of each
        // locally-owned center box, inserting local edges directly and
        // caching the rest for their owners.
        let comm = center.comm();
        let rank = comm.rank();
        let mut for_west_owner: BTreeMap<usize, Vec<(BoxId, MeshBox)>> = BTreeMap::new();
        let mut for_east_owner: BTreeMap<usize, Vec<(BoxId, MeshBox)>> = BTreeMap::new();

        for center_box in center.local_boxes() {
            let west_nabrs = center_to_west.neighbors(&center_box.id());
            let east_nabrs = center_to_east.neighbors(&center_box.id());
            for w in west_nabrs {
                for e in east_nabrs {
                    if let Some((base_id, head_box)) =
                        canonical_pair(&west, &west_to_east, w, e)
                    {
                        let owner = base_id.owner();
                        if owner == rank {
                            west_to_east.insert_edge(base_id, head_box);
                        } else {
                            for_west_owner.entry(owner).or_default().push((base_id, head_box));
                        }
                    }
                    if let Some((base_id, head_box)) =
                        canonical_pair(&east, &east_to_west, e, w)
                    {
                        let owner = base_id.owner();
                        if owner == rank {
                            east_to_west.insert_edge(base_id, head_box);
                        } else {
                            for_east_owner.entry(owner).or_default().push((base_id, head_box));
                        }
                    }
                }
            }
        }

        // Ship discovered edges to the ranks owning their base boxes. The
        // peers to hear from are the owners of the center neighbors of our
        // west and east boxes; the peers to talk to are the owners of the
        // west and east neighbors of our center boxes. Transpose consistency
        // makes these two views agree, and one (possibly empty) message per
        // peer keeps the exchange deterministic.
        if comm.size() > 1 {
            let mut talk_to: BTreeSet<usize> = BTreeSet::new();
            for center_box in center.local_boxes() {
                for n in center_to_west.neighbors(&center_box.id()) {
                    talk_to.insert(n.id().owner());
                }
                for n in center_to_east.neighbors(&center_box.id()) {
                    talk_to.insert(n.id().owner());
                }
            }
            talk_to.remove(&rank);

            let mut hear_from: BTreeSet<usize> = BTreeSet::new();
            for level_box in west.local_boxes() {
                for n in west_to_center.neighbors(&level_box.id()) {
                    hear_from.insert(n.id().owner());
                }
            }
            for level_box in east.local_boxes() {
                for n in east_to_center.neighbors(&level_box.id()) {
                    hear_from.insert(n.id().owner());
                }
            }
            hear_from.remove(&rank);

            debug!(
                "bridge on rank {}: {} peers to send, {} to receive",
                rank,
                talk_to.len(),
                hear_from.len()
            );

            let payloads = talk_to
                .iter()
                .map(|&peer| {
                    let message = (
                        for_west_owner.remove(&peer).unwrap_or_default(),
                        for_east_owner.remove(&peer).unwrap_or_default(),
                    );
                    (peer, rmp_serde::to_vec(&message).unwrap())
                })
                .collect();
            for (_, bytes) in comm.exchange(payloads, &hear_from) {
                let (west_edges, east_edges): (Vec<(BoxId, MeshBox)>, Vec<(BoxId, MeshBox)>) =
                    rmp_serde::from_slice(&bytes).unwrap();
                for (base_id, head_box) in west_edges {
                    west_to_east.insert_edge(base_id, head_box);
                }
                for (base_id, head_box) in east_edges {
                    east_to_west.insert_edge(base_id, head_box);
                }
            }
        }

        if center_growth_to_nest_west.is_some() {
            west_to_east.mark_complete();
        }
        if center_growth_to_nest_east.is_some() {
            east_to_west.mark_complete();
        }
        (west_to_east, east_to_west)
    }
}

/// Test one candidate `(base, head)` pair for overlap and put it in
/// canonical form: the base box of an edge is never a periodic image. When
/// the base candidate is an image, the head is shifted by the inverse
/// displacement instead; a combined displacement outside the shift catalog
/// drops the pair (a double wrap cannot be represented).
fn canonical_pair(
    base_level: &Arc<BoxLevel>,
    connector: &Connector,
    base_candidate: &MeshBox,
    head_candidate: &MeshBox,
) -> Option<(BoxId, MeshBox)> {
    if !connector.boxes_overlap(base_candidate, head_candidate) {
        return None;
    }
    if !base_candidate.id().is_periodic_image() {
        return Some((base_candidate.id(), head_candidate.clone()));
    }

    let geometry = base_level.geometry();
    let catalog = geometry.shift_catalog();
    let base_shift = catalog[base_candidate.id().shift as usize];
    let head_shift = catalog[head_candidate.id().shift as usize];
    let combined = head_shift - base_shift;
    let shift_number = catalog.iter().position(|s| *s == combined)? as u16;

    // Reposition the head locally; its canonical position is recovered from
    // its own shift, so remote heads need no lookup.
    let head_level = connector.head();
    let head_displacement =
        geometry.shift_displacement(head_candidate.id().shift, head_level.ratio());
    let canonical_space = head_candidate.space().translate(&-head_displacement);
    let moved = if shift_number == 0 {
        MeshBox::new(
            canonical_space,
            head_candidate.block(),
            head_candidate.id().canonical(),
        )
    } else {
        let displacement = geometry.shift_displacement(shift_number, head_level.ratio());
        MeshBox::new(
            canonical_space.translate(&displacement),
            head_candidate.block(),
            head_candidate.id().canonical().shifted(shift_number),
        )
    };
    Some((base_candidate.id().canonical(), moved))
}

// ============================================================================
#[cfg(test)]
mod test {

    use super::OverlapConnectorAlgorithm;
    use crate::box_level::BoxLevel;
    use crate::geometry::BlockGeometry;
    use crate::index_space::{BlockId, IndexSpace};
    use crate::int_vector::IntVector;
    use crate::message::comm::SerialCommunicator;
    use std::sync::Arc;

    fn geometry() -> Arc<BlockGeometry> {
        Arc::new(BlockGeometry::cartesian(
            &[0.0, 0.0],
            &[1.0, 1.0],
            vec![IndexSpace::from_bounds(&[0, 0], &[19, 19])],
        ))
    }

    fn level_with_grid(
        geometry: &Arc<BlockGeometry>,
        ratio: i64,
        n: i64,
        size: i64,
    ) -> Arc<BoxLevel> {
        let mut level = BoxLevel::new(
            IntVector::uniform(2, ratio),
            geometry.clone(),
            Arc::new(SerialCommunicator),
        );
        for i in 0..n {
            for j in 0..n {
                level.add_box(
                    IndexSpace::from_bounds(
                        &[i * size, j * size],
                        &[(i + 1) * size - 1, (j + 1) * size - 1],
                    ),
                    BlockId(0),
                );
            }
        }
        Arc::new(level)
    }

    #[test]
    fn find_overlaps_satisfies_the_contract() {
        let geometry = geometry();
        let base = level_with_grid(&geometry, 1, 4, 5);
        let head = level_with_grid(&geometry, 2, 2, 20);
        let width = IntVector::uniform(2, 2);

        let algorithm = OverlapConnectorAlgorithm;
        let connector = algorithm.find_overlaps(&base, &head, &width, false);
        assert!(connector.is_complete());

        // Every pair that overlaps under the stated width must be present.
        for base_box in base.boxes() {
            let neighbors = connector.neighbors(&base_box.id());
            for head_box in head.boxes() {
                let expected = connector.boxes_overlap(base_box, head_box);
                let present = neighbors.iter().any(|n| n.id() == head_box.id());
                assert_eq!(expected, present);
            }
        }
    }

    #[test]
    fn extract_neighbors_narrows_the_width() {
        let geometry = geometry();
        let base = level_with_grid(&geometry, 1, 4, 5);
        let algorithm = OverlapConnectorAlgorithm;

        let wide = algorithm.find_overlaps(&base, &base, &IntVector::uniform(2, 5), true);
        let narrow = algorithm.extract_neighbors(&wide, &IntVector::uniform(2, 1));
        let direct = algorithm.find_overlaps(&base, &base, &IntVector::uniform(2, 1), true);

        for base_box in base.boxes() {
            assert_eq!(
                narrow.neighbors(&base_box.id()).len(),
                direct.neighbors(&base_box.id()).len()
            );
        }
        assert!(narrow.edge_count() < wide.edge_count());
    }

    #[test]
    fn serial_bridge_matches_direct_search() {
        let geometry = geometry();
        let center = level_with_grid(&geometry, 1, 4, 5);
        let west = level_with_grid(&geometry, 1, 2, 10);
        let east = level_with_grid(&geometry, 2, 2, 20);
        let width = IntVector::uniform(2, 4);

        let algorithm = OverlapConnectorAlgorithm;
        let center_to_west = algorithm.find_overlaps(&center, &west, &width, false);
        let center_to_east = algorithm.find_overlaps(&center, &east, &width, false);
        let west_to_center = center_to_west.transpose_local();
        let east_to_center = center_to_east.transpose_local();

        let zero = IntVector::zero(2);
        let (west_to_east, east_to_west) = algorithm.bridge_with_nesting(
            &west_to_center,
            &center_to_east,
            &east_to_center,
            &center_to_west,
            &zero,
            &zero,
            None,
        );
        assert!(west_to_east.is_complete());
        assert!(east_to_west.is_complete());

        let direct = algorithm.find_overlaps(&west, &east, west_to_east.width(), false);
        for west_box in west.boxes() {
            let bridged: Vec<_> = west_to_east
                .neighbors(&west_box.id())
                .iter()
                .map(|b| b.id())
                .collect();
            for expected in direct.neighbors(&west_box.id()) {
                assert! {
                    bridged.contains(&expected.id()),
                    "bridge missed edge {:?} -> {:?}",
                    west_box.id(),
                    expected.id()
                };
            }
        }
    }
}
