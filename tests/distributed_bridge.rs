//! The bridge construction on genuinely distributed box levels: two ranks
//! run in one process over the channel mesh, each owning part of every
//! level, and the bridged connectors must contain every edge a direct
//! (globalizing) search finds.

use gridquilt::box_level::BoxLevel;
use gridquilt::geometry::BlockGeometry;
use gridquilt::index_space::{BlockId, IndexSpace};
use gridquilt::int_vector::IntVector;
use gridquilt::message::comm::Communicator;
use gridquilt::message::mesh::ChannelMesh;
use gridquilt::overlap_connector::OverlapConnectorAlgorithm;
use std::sync::Arc;

fn geometry() -> Arc<BlockGeometry> {
    Arc::new(BlockGeometry::cartesian(
        &[0.0, 0.0],
        &[1.0, 1.0],
        vec![IndexSpace::from_bounds(&[0, 0], &[19, 19])],
    ))
}

/// Each rank owns the boxes of its half of the domain, on all three levels.
fn build_levels(
    comm: Arc<dyn Communicator>,
    geometry: Arc<BlockGeometry>,
) -> (Arc<BoxLevel>, Arc<BoxLevel>, Arc<BoxLevel>) {
    let rank = comm.rank();
    let y0 = rank as i64 * 10;

    // Center: four 5x5 boxes per rank at ratio one.
    let mut center = BoxLevel::new(IntVector::one(2), geometry.clone(), comm.clone());
    for i in 0..4 {
        center.add_box(
            IndexSpace::from_bounds(&[i * 5, y0], &[(i + 1) * 5 - 1, y0 + 9]),
            BlockId(0),
        );
    }

    // West: two 10x10 boxes per rank at ratio one.
    let mut west = BoxLevel::new(IntVector::one(2), geometry.clone(), comm.clone());
    for i in 0..2 {
        west.add_box(
            IndexSpace::from_bounds(&[i * 10, y0], &[(i + 1) * 10 - 1, y0 + 9]),
            BlockId(0),
        );
    }

    // East: two 20x20 boxes per rank at ratio two.
    let mut east = BoxLevel::new(IntVector::uniform(2, 2), geometry, comm);
    for i in 0..2 {
        east.add_box(
            IndexSpace::from_bounds(&[i * 20, 2 * y0], &[(i + 1) * 20 - 1, 2 * y0 + 19]),
            BlockId(0),
        );
    }

    (Arc::new(center), Arc::new(west), Arc::new(east))
}

#[test]
fn bridged_connectors_match_a_direct_search() {
    let comms = ChannelMesh::new(2);
    let handles: Vec<_> = comms
        .into_iter()
        .map(|comm| {
            let geometry = geometry();
            std::thread::spawn(move || {
                let comm: Arc<dyn Communicator> = Arc::new(comm);
                let (center, west, east) = build_levels(comm.clone(), geometry);
                let width = IntVector::uniform(2, 3);

                let algorithm = OverlapConnectorAlgorithm;
                let center_to_west = algorithm.find_overlaps(&center, &west, &width, false);
                let center_to_east = algorithm.find_overlaps(&center, &east, &width, false);
                let west_to_center = algorithm.find_overlaps(
                    &west,
                    &center,
                    &width,
                    false,
                );
                let east_to_center = algorithm.find_overlaps(
                    &east,
                    &center,
                    &IntVector::uniform(2, 6),
                    false,
                );

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

                // Every edge a direct search finds must be present for the
                // boxes this rank owns.
                let direct = algorithm.find_overlaps(&west, &east, west_to_east.width(), false);
                for west_box in west.local_boxes() {
                    let bridged: Vec<_> = west_to_east
                        .neighbors(&west_box.id())
                        .iter()
                        .map(|b| b.id())
                        .collect();
                    for expected in direct.neighbors(&west_box.id()) {
                        assert! {
                            bridged.contains(&expected.id()),
                            "rank {} missed edge {:?} -> {:?}",
                            comm.rank(),
                            west_box.id(),
                            expected.id()
                        };
                    }
                }

                let direct_reverse =
                    algorithm.find_overlaps(&east, &west, east_to_west.width(), false);
                for east_box in east.local_boxes() {
                    let bridged: Vec<_> = east_to_west
                        .neighbors(&east_box.id())
                        .iter()
                        .map(|b| b.id())
                        .collect();
                    for expected in direct_reverse.neighbors(&east_box.id()) {
                        assert!(bridged.contains(&expected.id()));
                    }
                }

                comm.barrier();
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn globalization_counts_every_rank() {
    let comms = ChannelMesh::new(3);
    let handles: Vec<_> = comms
        .into_iter()
        .map(|comm| {
            let geometry = geometry();
            std::thread::spawn(move || {
                let comm: Arc<dyn Communicator> = Arc::new(comm);
                let rank = comm.rank();
                let mut level = BoxLevel::new(IntVector::one(2), geometry, comm);
                level.add_box(
                    IndexSpace::from_bounds(&[0, 6 * rank as i64], &[19, 6 * rank as i64 + 5]),
                    BlockId(0),
                );

                assert_eq!(level.local_box_count(), 1);
                assert_eq!(level.global_box_count(), 3);

                let globalized = level.globalize();
                assert_eq!(globalized.boxes().count(), 3);
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}
