use crate::box_level::BoxLevel;
use crate::connector::{convert_width, Connector};
use crate::fill_pattern::FillPattern;
use crate::hierarchy::PatchHierarchy;
use crate::index_space::{BlockId, BoxId, IndexSpace};
use crate::int_vector::IntVector;
use crate::message::comm::{Communicator, Reduce};
use crate::overlap_connector::OverlapConnectorAlgorithm;
use crate::patch::Patch;
use crate::patch_level::PatchLevel;
use crate::refine_algorithm::RefineItem;
use crate::transaction::{sort_queue, Transaction, TransactionKind};
use crate::variable::ComponentSelector;
use log::debug;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// User hooks a refine schedule needs beyond registered data: ghost fill at
/// the physical domain boundary, ghost fill at enhanced-connectivity
/// singularities, and the stencil width of any user-side interpolation.
pub trait RefinePatchStrategy: Send + Sync {
    /// The widest stencil applied by the user around fill regions.
    fn stencil_width(&self, dim: usize) -> IntVector {
        IntVector::zero(dim)
    }

    /// Populate ghost regions lying outside the physical domain on a patch
    /// touching a regular boundary.
    fn fill_physical_boundary(&self, patch: &mut Patch, time: f64, ghost_width: &IntVector);

    /// Populate ghost regions lying in enhanced-connectivity zones, reading
    /// the auxiliary level that was filled for this purpose.
    fn fill_singularity_boundary(
        &self,
        _patch: &mut Patch,
        _encon_level: &PatchLevel,
        _regions: &[IndexSpace],
        _time: f64,
    ) {
    }
}

/// Where refined coarse data lands on the destination: one record per
/// (coarse-interpolation patch, destination patch) pair, with the fine-space
/// regions that were unfilled by same-level sources.
struct RefineOverlap {
    ci: BoxId,
    dst: BoxId,
    regions: Vec<IndexSpace>,
}

/// One priority class of planned transactions, split by locality. `local`
/// executes in place; `send`/`recv` pair up across ranks, one message per
/// peer per execution, payloads in queue order.
#[derive(Default)]
struct Queue {
    local: Vec<Transaction>,
    send: BTreeMap<usize, Vec<Transaction>>,
    recv: BTreeMap<usize, Vec<Transaction>>,
}

impl Queue {
    fn communicate(
        &self,
        dst_level: &PatchLevel,
        src_level: &PatchLevel,
        comm: &Arc<dyn Communicator>,
        time: f64,
    ) {
        if comm.size() > 1 {
            // Ship one message per peer even when this rank is idle in this
            // phase: every rank must take part in the exchange for the
            // operation tags to stay synchronized.
            let outgoing = self
                .send
                .iter()
                .map(|(peer, txns)| {
                    let payloads: Vec<Vec<u8>> =
                        txns.iter().map(|t| t.pack(src_level, time)).collect();
                    (*peer, rmp_serde::to_vec(&payloads).unwrap())
                })
                .collect();
            let incoming: BTreeSet<usize> = self.recv.keys().copied().collect();
            let received = comm.exchange(outgoing, &incoming);

            for txn in &self.local {
                txn.execute_local(dst_level, src_level, time);
            }
            for (peer, txns) in &self.recv {
                let payloads: Vec<Vec<u8>> = rmp_serde::from_slice(&received[peer]).unwrap();
                assert_eq!(payloads.len(), txns.len(), "transaction count mismatch");
                for (txn, payload) in txns.iter().zip(payloads) {
                    txn.unpack(dst_level, &payload);
                }
            }
        } else {
            for txn in &self.local {
                txn.execute_local(dst_level, src_level, time);
            }
        }
    }
}

/// An executable plan for filling a destination level's scratch data from
/// same-level sources, time-interpolated coarser levels, and user boundary
/// routines, then committing scratch to the destination descriptors. A
/// schedule stays valid as long as the participating box levels do not
/// change and may be executed repeatedly for different times.
pub struct RefineSchedule {
    dst_level: Arc<PatchLevel>,
    src_level: Arc<PatchLevel>,
    items: Arc<Vec<RefineItem>>,
    strategy: Option<Arc<dyn RefinePatchStrategy>>,
    fill_width: IntVector,
    scratch_selector: ComponentSelector,
    coarse_queue: Queue,
    fine_queue: Queue,
    coarse_interp_level: Option<Arc<PatchLevel>>,
    coarse_schedule: Option<Box<RefineSchedule>>,
    refine_overlaps: Vec<RefineOverlap>,
    ratio_to_coarser: IntVector,
    encon_level: Option<Arc<PatchLevel>>,
    encon_schedule: Option<Box<RefineSchedule>>,
    encon_overlaps: Vec<(BoxId, Vec<IndexSpace>)>,
}

// ============================================================================
impl RefineSchedule {
    /// Entry point used by the refine algorithm. Computes the boundary fill
    /// width (the widest scratch ghost or interpolation stencil) and builds
    /// the schedule tree.
    pub(crate) fn build_top(
        items: Arc<Vec<RefineItem>>,
        fill_pattern: &FillPattern,
        dst_level: Arc<PatchLevel>,
        src_level: Option<Arc<PatchLevel>>,
        next_coarser_ln: i32,
        hierarchy: Option<&Arc<PatchHierarchy>>,
        strategy: Option<Arc<dyn RefinePatchStrategy>>,
    ) -> Self {
        let dim = dst_level.dim();
        let db = dst_level.db();

        let mut max_ghost = IntVector::zero(dim);
        let mut max_stencil = IntVector::zero(dim);
        for item in items.iter() {
            max_ghost = max_ghost.max_with(&db.descriptor(item.scratch).ghost);
            if let Some(op) = &item.refine_op {
                max_stencil = max_stencil.max_with(&op.stencil_width(dim));
            }
        }
        if let Some(strategy) = &strategy {
            max_stencil = max_stencil.max_with(&strategy.stencil_width(dim));
        }
        let fill_width = max_ghost.max_with(&max_stencil);

        Self::build(
            items,
            fill_pattern,
            dst_level,
            src_level,
            next_coarser_ln,
            hierarchy,
            strategy,
            false,
            fill_width,
            max_stencil,
            None,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        items: Arc<Vec<RefineItem>>,
        fill_pattern: &FillPattern,
        dst_level: Arc<PatchLevel>,
        src_level: Option<Arc<PatchLevel>>,
        next_coarser_ln: i32,
        hierarchy: Option<&Arc<PatchHierarchy>>,
        strategy: Option<Arc<dyn RefinePatchStrategy>>,
        use_time_interp: bool,
        fill_width: IntVector,
        stencil_width: IntVector,
        connectors: Option<(Connector, Connector)>,
    ) -> Self {
        let src_level = src_level.unwrap_or_else(|| dst_level.clone());
        assert_eq! {
            dst_level.ratio(),
            src_level.ratio(),
            "destination and source levels must share a refinement ratio"
        };
        let dim = dst_level.dim();
        let db = dst_level.db().clone();
        let comm = dst_level.comm().clone();
        let geometry = dst_level.geometry().clone();
        let rank = comm.rank();
        let oca = OverlapConnectorAlgorithm;

        let scratch_selector: ComponentSelector = items.iter().map(|i| i.scratch).collect();

        // Fill boxes: each destination box grown to the fill width, shaped
        // by the fill pattern.
        let mut fill_boxes: BTreeMap<BoxId, Vec<IndexSpace>> = BTreeMap::new();
        for dst_box in dst_level.box_level().local_boxes() {
            fill_boxes.insert(
                dst_box.id(),
                fill_pattern.fill_boxes(dst_box.space(), &fill_width),
            );
        }

        // Neighbor graphs between destination and source, both directions.
        let (dst_to_src, src_to_dst) = match connectors {
            Some(pair) => pair,
            None => {
                let forward = oca.find_overlaps(
                    dst_level.box_level(),
                    src_level.box_level(),
                    &fill_width,
                    false,
                );
                let reverse = oca.find_overlaps(
                    src_level.box_level(),
                    dst_level.box_level(),
                    &fill_width,
                    false,
                );
                (forward, reverse)
            }
        };
        debug_assert! {
            dst_to_src.check_transpose_consistency(&src_to_dst),
            "schedule connectors are not mutual transposes:\n{}\n{}",
            dst_to_src.dump(),
            src_to_dst.dump()
        };

        // Same-level transactions.
        let mut coarse_txns: Vec<Transaction> = Vec::new();
        let mut fine_txns: Vec<Transaction> = Vec::new();

        for dst_box in dst_level.box_level().local_boxes() {
            let boxes = &fill_boxes[&dst_box.id()];
            for src_box in dst_to_src.neighbors(&dst_box.id()) {
                let shift = if src_box.id().is_periodic_image() {
                    geometry.shift_displacement(src_box.id().shift, dst_level.ratio())
                } else {
                    IntVector::zero(dim)
                };
                for fill_box in boxes {
                    let region = fill_box.intersect(src_box.space());
                    if region.is_empty() {
                        continue;
                    }
                    for item in items.iter() {
                        let kind = match (&item.time_interp, use_time_interp) {
                            (Some(interp), true) => TransactionKind::TimeInterp {
                                old: interp.old,
                                new: interp.new,
                            },
                            _ => TransactionKind::Copy { src: item.src },
                        };
                        let txn = Transaction {
                            dst_patch: dst_box.id(),
                            src_patch: src_box.id().canonical(),
                            dst: item.scratch,
                            kind,
                            region: region.clone(),
                            shift,
                        };
                        let centering = db.descriptor(item.scratch).variable.centering;
                        if centering.lives_on_patch_border() {
                            fine_txns.push(txn);
                        } else {
                            coarse_txns.push(txn);
                        }
                    }
                }
            }
        }

        let coarse_queue = Self::distribute_queue(coarse_txns, rank);
        let fine_queue = Self::distribute_queue(fine_txns, rank);
        let (coarse_queue, fine_queue) = Self::exchange_send_lists(
            coarse_queue,
            fine_queue,
            &dst_to_src,
            &src_to_dst,
            &dst_level,
            &src_level,
            &comm,
        );

        // Unfilled regions: the fill boxes minus every same-level source
        // contribution, sheared to the physical domain, with enhanced
        // connectivity zones split off.
        let mut unfilled: BTreeMap<BoxId, Vec<IndexSpace>> = BTreeMap::new();
        let mut unfilled_encon: BTreeMap<BoxId, Vec<IndexSpace>> = BTreeMap::new();

        for dst_box in dst_level.box_level().local_boxes() {
            let cover: Vec<IndexSpace> = dst_to_src
                .neighbors(&dst_box.id())
                .iter()
                .map(|s| s.space().clone())
                .collect();
            let domain = shear_domain(&geometry, dst_box.block(), dst_level.ratio(), &fill_width);

            let mut rest: Vec<IndexSpace> = Vec::new();
            for fill_box in &fill_boxes[&dst_box.id()] {
                for piece in fill_box.remove_intersections(&cover) {
                    for domain_box in &domain {
                        let sheared = piece.intersect(domain_box);
                        if !sheared.is_empty() {
                            rest.push(sheared);
                        }
                    }
                }
            }

            let mut encon_regions: Vec<IndexSpace> = Vec::new();
            for singularity in geometry.singularities(dst_box.block()) {
                let region = singularity.region.refine(dst_level.ratio());
                let mut next = Vec::new();
                for piece in rest {
                    let inside = piece.intersect(&region);
                    if !inside.is_empty() {
                        encon_regions.push(inside);
                    }
                    next.extend(piece.remove_intersection(&region));
                }
                rest = next;
            }

            if !rest.is_empty() {
                unfilled.insert(dst_box.id(), rest);
            }
            if !encon_regions.is_empty() {
                unfilled_encon.insert(dst_box.id(), encon_regions);
            }
        }

        let mut schedule = Self {
            dst_level: dst_level.clone(),
            src_level,
            items: items.clone(),
            strategy: strategy.clone(),
            fill_width,
            scratch_selector,
            coarse_queue,
            fine_queue,
            coarse_interp_level: None,
            coarse_schedule: None,
            refine_overlaps: Vec::new(),
            ratio_to_coarser: IntVector::one(dim),
            encon_level: None,
            encon_schedule: None,
            encon_overlaps: Vec::new(),
        };

        // The decision to recurse is collective: a rank with nothing to fill
        // still takes part in building the coarser stage.
        let any_unfilled = comm.all_reduce_f64(
            Reduce::Max,
            if unfilled.is_empty() { 0.0 } else { 1.0 },
        ) > 0.5;
        if any_unfilled {
            schedule.build_coarse_stage(
                unfilled,
                next_coarser_ln,
                hierarchy,
                &dst_to_src,
                stencil_width,
            );
        }

        let any_encon = geometry.has_enhanced_connectivity()
            && comm.all_reduce_f64(
                Reduce::Max,
                if unfilled_encon.is_empty() { 0.0 } else { 1.0 },
            ) > 0.5;
        if any_encon {
            schedule.build_encon_stage(
                unfilled_encon,
                next_coarser_ln,
                hierarchy,
                use_time_interp,
                stencil_width,
            );
        }

        schedule
    }

    /// Build the recursive coarse-interpolation stage: a work level of
    /// coarsened unfilled boxes, a bridged connector pair joining it to the
    /// next coarser hierarchy level, cached refine overlaps, and the child
    /// schedule that fills the work level.
    fn build_coarse_stage(
        &mut self,
        unfilled: BTreeMap<BoxId, Vec<IndexSpace>>,
        next_coarser_ln: i32,
        hierarchy: Option<&Arc<PatchHierarchy>>,
        dst_to_src: &Connector,
        stencil_width: IntVector,
    ) {
        let dst_level = self.dst_level.clone();
        let dim = dst_level.dim();
        let comm = dst_level.comm().clone();
        let db = dst_level.db().clone();
        let oca = OverlapConnectorAlgorithm;

        let hierarchy = hierarchy.unwrap_or_else(|| {
            panic!(
                "unfilled boxes remain but no hierarchy was given:\n{}",
                dst_to_src.dump()
            )
        });
        assert! {
            next_coarser_ln >= 0,
            "unfilled boxes remain below the coarsest level:\n{}",
            dst_to_src.dump()
        };
        let hiercoarse = hierarchy.level(next_coarser_ln as usize);

        let mut ratio = IntVector::one(dim);
        for a in 0..dim {
            let fine = dst_level.ratio()[a];
            let coarse = hiercoarse.ratio()[a];
            assert_eq!(fine % coarse, 0, "levels have incompatible ratios");
            ratio[a] = fine / coarse;
        }
        self.ratio_to_coarser = ratio;

        // The coarse-interpolation box level: coarsened unfilled regions,
        // made disjoint per destination patch, each knowing which fine
        // regions it must produce.
        let mut ci_box_level = BoxLevel::new(
            *hiercoarse.ratio(),
            dst_level.geometry().clone(),
            comm.clone(),
        );
        let mut pending_edges: Vec<(BoxId, crate::index_space::MeshBox)> = Vec::new();

        for (dst_id, regions) in &unfilled {
            let block = dst_level
                .box_level()
                .get(dst_id)
                .map(|b| b.block())
                .unwrap();
            // Disjoint coarse cover of this patch's unfilled regions.
            let mut cover: Vec<IndexSpace> = Vec::new();
            for u in regions {
                let coarse = u.coarsen(&ratio);
                for piece in coarse.remove_intersections(&cover) {
                    cover.push(piece);
                }
            }
            for ci_space in cover {
                let ci_id = ci_box_level.add_box(ci_space.clone(), block);
                let ci_box = ci_box_level.get(&ci_id).unwrap().clone();
                let fine_cover = ci_space.refine(&ratio);
                let fine_regions: Vec<IndexSpace> = regions
                    .iter()
                    .map(|u| u.intersect(&fine_cover))
                    .filter(|r| !r.is_empty())
                    .collect();
                self.refine_overlaps.push(RefineOverlap {
                    ci: ci_id,
                    dst: *dst_id,
                    regions: fine_regions,
                });
                pending_edges.push((*dst_id, ci_box));
            }
        }

        let ci_box_level = Arc::new(ci_box_level);
        let mut dst_to_ci = Connector::new(
            dst_level.box_level().clone(),
            ci_box_level.clone(),
            self.fill_width,
        );
        for (dst_id, ci_box) in pending_edges {
            dst_to_ci.insert_edge(dst_id, ci_box);
        }
        dst_to_ci.mark_complete();
        let ci_to_dst = dst_to_ci.transpose_local();

        // Bridge the work level to the coarser hierarchy level through the
        // destination level. The search width leaves room for the stencil
        // after the nesting reduction.
        let hc_width = self.fill_width + stencil_width * ratio;
        let dst_to_hc = oca.find_overlaps(
            dst_level.box_level(),
            hiercoarse.box_level(),
            &hc_width,
            false,
        );
        let hc_to_dst = oca.find_overlaps(
            hiercoarse.box_level(),
            dst_level.box_level(),
            &convert_width(&hc_width, dst_level.ratio(), hiercoarse.ratio()),
            false,
        );
        let (ci_to_hc, hc_to_ci) = oca.bridge_with_west_nesting(
            &ci_to_dst,
            &dst_to_hc,
            &hc_to_dst,
            &dst_to_ci,
            &self.fill_width,
            None,
        );
        debug!(
            "coarse interpolation stage: {} work boxes, {} bridged edges",
            ci_box_level.local_box_count(),
            ci_to_hc.edge_count()
        );

        let mut ci_level = PatchLevel::new(ci_box_level, db);
        ci_level.set_level_number(next_coarser_ln, false);
        let ci_level = Arc::new(ci_level);

        // The child schedule fills the work level's scratch (interior plus
        // stencil-wide ghosts) from the coarser level, with time
        // interpolation between the registered old and new sources.
        let child_items: Vec<RefineItem> = self
            .items
            .iter()
            .map(|item| RefineItem {
                dst: item.scratch,
                src: item.src,
                scratch: item.scratch,
                refine_op: item.refine_op.clone(),
                time_interp: item.time_interp.clone(),
            })
            .collect();
        let child = Self::build(
            Arc::new(child_items),
            &FillPattern::InteriorAndGhosts,
            ci_level.clone(),
            Some(hiercoarse),
            next_coarser_ln - 1,
            Some(hierarchy),
            self.strategy.clone(),
            true,
            stencil_width,
            stencil_width,
            Some((ci_to_hc, hc_to_ci)),
        );

        self.coarse_interp_level = Some(ci_level);
        self.coarse_schedule = Some(Box::new(child));
    }

    /// Build the auxiliary stage for enhanced-connectivity zones: ghost
    /// regions at singularities are filled onto a separate level (where
    /// regular neighbor relations still make sense) and handed to the user's
    /// singularity callback rather than copied directly.
    fn build_encon_stage(
        &mut self,
        unfilled_encon: BTreeMap<BoxId, Vec<IndexSpace>>,
        next_coarser_ln: i32,
        hierarchy: Option<&Arc<PatchHierarchy>>,
        use_time_interp: bool,
        stencil_width: IntVector,
    ) {
        let dst_level = self.dst_level.clone();
        let comm = dst_level.comm().clone();
        let db = dst_level.db().clone();

        let mut encon_box_level = BoxLevel::new(
            *dst_level.ratio(),
            dst_level.geometry().clone(),
            comm.clone(),
        );
        for (dst_id, regions) in &unfilled_encon {
            let block = dst_level
                .box_level()
                .get(dst_id)
                .map(|b| b.block())
                .unwrap();
            for region in regions {
                encon_box_level.add_box(region.clone(), block);
            }
            self.encon_overlaps.push((*dst_id, regions.clone()));
        }

        let mut encon_level = PatchLevel::new(Arc::new(encon_box_level), db);
        encon_level.set_level_number(dst_level.level_number(), false);
        let encon_level = Arc::new(encon_level);

        let child_items: Vec<RefineItem> = self
            .items
            .iter()
            .map(|item| RefineItem {
                dst: item.scratch,
                src: item.src,
                scratch: item.scratch,
                refine_op: item.refine_op.clone(),
                time_interp: item.time_interp.clone(),
            })
            .collect();
        let child = Self::build(
            Arc::new(child_items),
            &FillPattern::Interior,
            encon_level.clone(),
            Some(self.src_level.clone()),
            next_coarser_ln,
            hierarchy,
            self.strategy.clone(),
            use_time_interp,
            IntVector::zero(dst_level.dim()),
            stencil_width,
            None,
        );

        self.encon_level = Some(encon_level);
        self.encon_schedule = Some(Box::new(child));
    }

    fn distribute_queue(mut txns: Vec<Transaction>, rank: usize) -> Queue {
        sort_queue(&mut txns);
        let mut queue = Queue::default();
        for txn in txns {
            if txn.src_patch.owner() == rank {
                queue.local.push(txn);
            } else {
                queue.recv.entry(txn.src_patch.owner()).or_default().push(txn);
            }
        }
        queue
    }

    /// Ship each remote transaction's description to the rank that owns its
    /// source, so senders know what to pack. One (possibly empty) message
    /// goes to every rank owning a source neighbor, and one is expected
    /// from every rank owning a destination neighbor; transpose consistency
    /// of the two connectors makes these peer sets mirror each other.
    #[allow(clippy::too_many_arguments)]
    fn exchange_send_lists(
        mut coarse: Queue,
        mut fine: Queue,
        dst_to_src: &Connector,
        src_to_dst: &Connector,
        dst_level: &Arc<PatchLevel>,
        src_level: &Arc<PatchLevel>,
        comm: &Arc<dyn Communicator>,
    ) -> (Queue, Queue) {
        if comm.size() == 1 {
            return (coarse, fine);
        }
        let rank = comm.rank();

        let mut talk_to: BTreeSet<usize> = BTreeSet::new();
        for dst_box in dst_level.box_level().local_boxes() {
            for neighbor in dst_to_src.neighbors(&dst_box.id()) {
                talk_to.insert(neighbor.id().owner());
            }
        }
        talk_to.remove(&rank);

        let mut hear_from: BTreeSet<usize> = BTreeSet::new();
        for src_box in src_level.box_level().local_boxes() {
            for neighbor in src_to_dst.neighbors(&src_box.id()) {
                hear_from.insert(neighbor.id().owner());
            }
        }
        hear_from.remove(&rank);

        let payloads = talk_to
            .iter()
            .map(|&peer| {
                let message = (
                    coarse.recv.get(&peer).cloned().unwrap_or_default(),
                    fine.recv.get(&peer).cloned().unwrap_or_default(),
                );
                (peer, rmp_serde::to_vec(&message).unwrap())
            })
            .collect();

        for (peer, bytes) in comm.exchange(payloads, &hear_from) {
            let (coarse_txns, fine_txns): (Vec<Transaction>, Vec<Transaction>) =
                rmp_serde::from_slice(&bytes).unwrap();
            if !coarse_txns.is_empty() {
                coarse.send.insert(peer, coarse_txns);
            }
            if !fine_txns.is_empty() {
                fine.send.insert(peer, fine_txns);
            }
        }
        (coarse, fine)
    }

    pub fn dst_level(&self) -> &Arc<PatchLevel> {
        &self.dst_level
    }

    /// Execute the schedule at time `t`: on return every destination
    /// descriptor holds, over its fill region, the value of the logical
    /// pipeline (recursive coarse fill, spatial refinement, same-level
    /// copies, boundary routines) evaluated at `t`. Executing twice in a
    /// row yields identical data.
    pub fn fill_data(&self, time: f64, do_physical_boundary_fill: bool) {
        // Allocate whichever scratch components are not already live; they
        // are released on the way out.
        let missing: ComponentSelector = self
            .scratch_selector
            .iter()
            .filter(|&id| {
                self.dst_level
                    .patches()
                    .next()
                    .map_or(false, |lock| !lock.read().unwrap().is_allocated(id))
            })
            .collect();
        self.dst_level.allocate_patch_data(&missing, time);

        self.recursive_fill(time, do_physical_boundary_fill);

        // Commit scratch into the destination descriptors.
        for lock in self.dst_level.patches() {
            let mut patch = lock.write().unwrap();
            for item in self.items.iter() {
                if item.dst == item.scratch {
                    continue;
                }
                let region = patch.data(item.dst).cell_box().grow(&patch.data(item.dst).ghost());
                patch.copy_between(item.dst, item.scratch, &region);
            }
        }

        self.dst_level.deallocate_patch_data(&missing);
    }

    /// The recursive fill of the destination level's scratch space:
    /// coarse-interpolation stage, spatial refinement, the two transaction
    /// queues, then the user's boundary routines.
    fn recursive_fill(&self, time: f64, do_physical_boundary_fill: bool) {
        let comm = self.dst_level.comm();

        if let (Some(child), Some(ci_level)) = (&self.coarse_schedule, &self.coarse_interp_level) {
            ci_level.allocate_patch_data(&child.scratch_selector, time);
            child.recursive_fill(time, do_physical_boundary_fill);
            self.refine_scratch_data(ci_level);
            ci_level.deallocate_patch_data(&child.scratch_selector);
        }

        self.coarse_queue
            .communicate(&self.dst_level, &self.src_level, comm, time);
        self.fine_queue
            .communicate(&self.dst_level, &self.src_level, comm, time);

        if do_physical_boundary_fill {
            self.fill_physical_boundaries(time);
        }

        if let (Some(child), Some(encon_level)) = (&self.encon_schedule, &self.encon_level) {
            encon_level.allocate_patch_data(&child.scratch_selector, time);
            child.recursive_fill(time, do_physical_boundary_fill);
            self.fill_singularity_boundaries(encon_level, time);
            encon_level.deallocate_patch_data(&child.scratch_selector);
        }
    }

    /// Apply each item's refine operator from the filled work level into the
    /// destination scratch, over the cached unfilled regions.
    fn refine_scratch_data(&self, ci_level: &PatchLevel) {
        for overlap in &self.refine_overlaps {
            let ci_patch = ci_level.patch(&overlap.ci);
            let mut dst_patch = self.dst_level.patch_mut(&overlap.dst);
            for item in self.items.iter() {
                let op = match &item.refine_op {
                    Some(op) => op,
                    None => continue,
                };
                let src_data = ci_patch.data(item.scratch);
                let dst_data = dst_patch.data_mut(item.scratch);
                for region in &overlap.regions {
                    op.refine(dst_data, src_data, region, &self.ratio_to_coarser);
                }
            }
        }
    }

    fn fill_physical_boundaries(&self, time: f64) {
        let strategy = match &self.strategy {
            Some(strategy) => strategy,
            None => return,
        };
        let geometry = self.dst_level.geometry();
        let ratio = self.dst_level.ratio();
        for lock in self.dst_level.patches() {
            let mut patch = lock.write().unwrap();
            if touches_physical_boundary(
                geometry,
                patch.mesh_box().block(),
                patch.space(),
                ratio,
                &self.fill_width,
            ) {
                strategy.fill_physical_boundary(&mut patch, time, &self.fill_width);
            }
        }
    }

    fn fill_singularity_boundaries(&self, encon_level: &PatchLevel, time: f64) {
        let strategy = match &self.strategy {
            Some(strategy) => strategy,
            None => return,
        };
        for (dst_id, regions) in &self.encon_overlaps {
            let mut patch = self.dst_level.patch_mut(dst_id);
            strategy.fill_singularity_boundary(&mut patch, encon_level, regions, time);
        }
    }
}

/// The domain boxes used for shearing unfilled regions: ghost zones beyond
/// a periodic boundary wrap around and are legitimate fill targets, so the
/// domain is extended by the fill width along periodic axes.
fn shear_domain(
    geometry: &crate::geometry::BlockGeometry,
    block: BlockId,
    ratio: &IntVector,
    fill_width: &IntVector,
) -> Vec<IndexSpace> {
    let periodic: Vec<bool> = geometry
        .shift_catalog()
        .iter()
        .skip(1)
        .fold(vec![false; ratio.dim()], |mut axes, shift| {
            for a in 0..ratio.dim() {
                if shift[a] != 0 {
                    axes[a] = true;
                }
            }
            axes
        });
    geometry
        .domain_boxes_at(block, ratio)
        .into_iter()
        .map(|space| {
            let mut lower = space.lower();
            let mut upper = space.upper();
            for a in 0..ratio.dim() {
                if periodic[a] {
                    lower[a] -= fill_width[a];
                    upper[a] += fill_width[a];
                }
            }
            IndexSpace::new(lower, upper)
        })
        .collect()
}

/// Whether a patch's ghost region extends beyond the physical domain on a
/// non-periodic axis, in which case the user boundary routine must run.
fn touches_physical_boundary(
    geometry: &crate::geometry::BlockGeometry,
    block: BlockId,
    patch_space: &IndexSpace,
    ratio: &IntVector,
    fill_width: &IntVector,
) -> bool {
    let domain = shear_domain(geometry, block, ratio, fill_width);
    let grown = patch_space.grow(fill_width);
    !grown.remove_intersections(&domain).is_empty()
}
