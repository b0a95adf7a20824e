use crate::coarsen_algorithm::CoarsenItem;
use crate::index_space::{BoxId, IndexSpace};
use crate::int_vector::IntVector;
use crate::message::comm::Communicator;
use crate::overlap_connector::OverlapConnectorAlgorithm;
use crate::patch_data::PatchData;
use crate::patch_level::PatchLevel;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// One planned fine-to-coarse movement: coarsen the source entry of fine
/// patch `src_patch` into the destination entry of coarse patch `dst_patch`
/// over `region` (coarse cells). The fine source entry travels whole to the
/// coarse owner, which applies the operator; outer-centered flux integrals
/// are small, and cell data is shipped at the granularity it would be
/// anyway.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
struct CoarsenTransaction {
    dst_patch: BoxId,
    src_patch: BoxId,
    item: usize,
    region: IndexSpace,
}

/// An executable plan for conservatively transferring data from a fine
/// level onto the next coarser level. Valid as long as the two box levels
/// do not change; may be executed repeatedly.
pub struct CoarsenSchedule {
    crse_level: Arc<PatchLevel>,
    fine_level: Arc<PatchLevel>,
    items: Arc<Vec<CoarsenItem>>,
    ratio: IntVector,
    local: Vec<CoarsenTransaction>,
    send: BTreeMap<usize, Vec<CoarsenTransaction>>,
    recv: BTreeMap<usize, Vec<CoarsenTransaction>>,
}

// ============================================================================
impl CoarsenSchedule {
    pub(crate) fn build(
        items: Arc<Vec<CoarsenItem>>,
        crse_level: Arc<PatchLevel>,
        fine_level: Arc<PatchLevel>,
    ) -> Self {
        let dim = crse_level.dim();
        let comm = crse_level.comm().clone();
        let rank = comm.rank();

        let mut ratio = IntVector::one(dim);
        for a in 0..dim {
            let fine = fine_level.ratio()[a];
            let coarse = crse_level.ratio()[a];
            assert_eq!(fine % coarse, 0, "levels have incompatible ratios");
            ratio[a] = fine / coarse;
        }

        // Width one, so that a fine patch abutting a coarse patch is still a
        // neighbor: the flux integrals on the fine boundary must replace the
        // coarse fluxes on both sides of the shared face plane.
        let oca = OverlapConnectorAlgorithm;
        let width = IntVector::one(dim);
        let crse_to_fine = oca.find_overlaps(
            crse_level.box_level(),
            fine_level.box_level(),
            &width,
            false,
        );
        let fine_to_crse = oca.find_overlaps(
            fine_level.box_level(),
            crse_level.box_level(),
            &width,
            false,
        );

        let mut txns: Vec<CoarsenTransaction> = Vec::new();
        for crse_box in crse_level.box_level().local_boxes() {
            for fine_box in crse_to_fine.neighbors(&crse_box.id()) {
                if fine_box.id().is_periodic_image() {
                    continue;
                }
                let region = crse_box
                    .space()
                    .grow_all(1)
                    .intersect(&fine_box.space().coarsen(&ratio));
                if region.is_empty() {
                    continue;
                }
                for item in 0..items.len() {
                    txns.push(CoarsenTransaction {
                        dst_patch: crse_box.id(),
                        src_patch: fine_box.id(),
                        item,
                        region: region.clone(),
                    });
                }
            }
        }
        txns.sort_by(|a, b| {
            (a.dst_patch, a.src_patch, a.item).cmp(&(b.dst_patch, b.src_patch, b.item))
        });

        let mut local = Vec::new();
        let mut recv: BTreeMap<usize, Vec<CoarsenTransaction>> = BTreeMap::new();
        for txn in txns {
            if txn.src_patch.owner() == rank {
                local.push(txn);
            } else {
                recv.entry(txn.src_patch.owner()).or_default().push(txn);
            }
        }

        // Tell each fine owner what to send, mirroring the refine schedule's
        // construction exchange.
        let mut send: BTreeMap<usize, Vec<CoarsenTransaction>> = BTreeMap::new();
        if comm.size() > 1 {
            let mut talk_to: BTreeSet<usize> = BTreeSet::new();
            for crse_box in crse_level.box_level().local_boxes() {
                for neighbor in crse_to_fine.neighbors(&crse_box.id()) {
                    talk_to.insert(neighbor.id().owner());
                }
            }
            talk_to.remove(&rank);

            let mut hear_from: BTreeSet<usize> = BTreeSet::new();
            for fine_box in fine_level.box_level().local_boxes() {
                for neighbor in fine_to_crse.neighbors(&fine_box.id()) {
                    hear_from.insert(neighbor.id().owner());
                }
            }
            hear_from.remove(&rank);

            let payloads = talk_to
                .iter()
                .map(|&peer| {
                    let txns = recv.get(&peer).cloned().unwrap_or_default();
                    (peer, rmp_serde::to_vec(&txns).unwrap())
                })
                .collect();
            for (peer, bytes) in comm.exchange(payloads, &hear_from) {
                let txns: Vec<CoarsenTransaction> = rmp_serde::from_slice(&bytes).unwrap();
                if !txns.is_empty() {
                    send.insert(peer, txns);
                }
            }
        }

        Self {
            crse_level,
            fine_level,
            items,
            ratio,
            local,
            send,
            recv,
        }
    }

    /// Execute the planned transfers. Collective over the participating
    /// communicator.
    pub fn coarsen_data(&self) {
        let comm = self.crse_level.comm();

        if comm.size() > 1 {
            let outgoing = self
                .send
                .iter()
                .map(|(peer, txns)| {
                    let payloads: Vec<Vec<u8>> = txns
                        .iter()
                        .map(|txn| {
                            let patch = self.fine_level.patch(&txn.src_patch);
                            let data = patch.data(self.items[txn.item].src);
                            rmp_serde::to_vec(data).unwrap()
                        })
                        .collect();
                    (*peer, rmp_serde::to_vec(&payloads).unwrap())
                })
                .collect();
            let incoming: BTreeSet<usize> = self.recv.keys().copied().collect();
            let received = comm.exchange(outgoing, &incoming);

            for txn in &self.local {
                self.execute_local(txn);
            }
            for (peer, txns) in &self.recv {
                let payloads: Vec<Vec<u8>> = rmp_serde::from_slice(&received[peer]).unwrap();
                assert_eq!(payloads.len(), txns.len(), "transaction count mismatch");
                for (txn, payload) in txns.iter().zip(payloads) {
                    let shipped: PatchData = rmp_serde::from_slice(&payload).unwrap();
                    self.apply(txn, &shipped);
                }
            }
        } else {
            for txn in &self.local {
                self.execute_local(txn);
            }
        }
    }

    fn execute_local(&self, txn: &CoarsenTransaction) {
        let src_patch = self.fine_level.patch(&txn.src_patch);
        let src_data = src_patch.data(self.items[txn.item].src);
        self.apply(txn, src_data);
    }

    fn apply(&self, txn: &CoarsenTransaction, src_data: &PatchData) {
        let item = &self.items[txn.item];
        let mut dst_patch = self.crse_level.patch_mut(&txn.dst_patch);
        let dst_data = dst_patch.data_mut(item.dst);
        item.op.coarsen(dst_data, src_data, &txn.region, &self.ratio);
    }
}
