use crate::index_space::{BoxId, IndexSpace};
use crate::int_vector::IntVector;
use crate::patch_level::PatchLevel;
use crate::variable::DescriptorId;

/// How a transaction moves values: a straight copy from one descriptor, or
/// a blend of an old and a new descriptor evaluated at the fill time. Time
/// interpolation triggers only when the fill time lies strictly between the
/// two source time stamps; at or outside the stamps the nearer source is
/// copied.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub enum TransactionKind {
    Copy {
        src: DescriptorId,
    },
    TimeInterp {
        old: DescriptorId,
        new: DescriptorId,
    },
}

/// One planned data movement: fill `region` (cells, in the destination
/// index space) of descriptor `dst` on patch `dst_patch`, reading from
/// patch `src_patch`. A non-zero `shift` marks a copy from a periodic
/// image: the source is read displaced by `-shift`.
///
/// Transactions order by `(dst_patch, src_patch)` with same-patch
/// transactions first, which fixes the replay order on both the send and
/// the receive side of an exchange.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Transaction {
    pub dst_patch: BoxId,
    pub src_patch: BoxId,
    pub dst: DescriptorId,
    pub kind: TransactionKind,
    pub region: IndexSpace,
    pub shift: IntVector,
}

// ============================================================================
impl Transaction {
    /// The deterministic queue position of this transaction.
    pub fn order_key(&self) -> (BoxId, bool, BoxId, DescriptorId, IntVector) {
        (
            self.dst_patch,
            self.dst_patch != self.src_patch,
            self.src_patch,
            self.dst,
            self.region.lower(),
        )
    }

    /// Read the source values of this transaction from a source level,
    /// producing the wire payload. For time interpolation the blend happens
    /// on the source side, so only the interpolated values travel.
    pub fn pack(&self, src_level: &PatchLevel, time: f64) -> Vec<u8> {
        let patch = src_level.patch(&self.src_patch);
        let src_region = self.region.translate(&-self.shift);
        match &self.kind {
            TransactionKind::Copy { src } => patch.data(*src).pack_on_cells(&src_region),
            TransactionKind::TimeInterp { old, new } => {
                let old_data = patch.data(*old);
                // With only one time level live (initial gridding), the
                // interpolation degrades to a copy of the old source.
                let new_data = match patch.try_data(*new) {
                    Some(data) => data,
                    None => return old_data.pack_on_cells(&src_region),
                };
                let w = interp_weight(time, old_data.time(), new_data.time());
                if w <= 0.0 {
                    old_data.pack_on_cells(&src_region)
                } else if w >= 1.0 {
                    new_data.pack_on_cells(&src_region)
                } else {
                    let mut blended = old_data.clone();
                    blended.time_interpolate_on_cells(
                        old_data,
                        new_data,
                        w,
                        &src_region,
                        &IntVector::zero(self.region.dim()),
                    );
                    blended.pack_on_cells(&src_region)
                }
            }
        }
    }

    /// Write a payload produced by [`Transaction::pack`] into the
    /// destination patch. The payload was packed over the source region;
    /// unpacking shifts it into the destination frame.
    pub fn unpack(&self, dst_level: &PatchLevel, bytes: &[u8]) {
        let mut patch = dst_level.patch_mut(&self.dst_patch);
        let data = patch.data_mut(self.dst);
        if self.shift.all_zero() {
            data.unpack_on_cells(&self.region, bytes);
        } else {
            // Unpack through a staging entry positioned over the source
            // region, then shift-copy into place.
            let src_region = self.region.translate(&-self.shift);
            let mut staged = crate::patch_data::PatchData::new(
                data.kind(),
                data.centering(),
                src_region.clone(),
                IntVector::zero(self.region.dim()),
                data.depth(),
            );
            staged.unpack_on_cells(&src_region, bytes);
            data.copy_on_cells(&staged, &self.region, &self.shift);
        }
    }

    /// Execute this transaction entirely locally, without serializing, when
    /// both patches live on this rank. Same-patch transactions copy between
    /// two entries of one patch.
    pub fn execute_local(&self, dst_level: &PatchLevel, src_level: &PatchLevel, time: f64) {
        if self.dst_patch.canonical() == self.src_patch.canonical()
            && std::ptr::eq(dst_level, src_level)
        {
            let mut patch = dst_level.patch_mut(&self.dst_patch);
            match &self.kind {
                TransactionKind::Copy { src } => {
                    if *src == self.dst {
                        return;
                    }
                    let (dst, src) = patch.data_pair_mut(self.dst, *src);
                    dst.copy_on_cells(src, &self.region, &self.shift);
                }
                TransactionKind::TimeInterp { old, new } => {
                    let w = match patch.try_data(*new) {
                        Some(new_data) => {
                            interp_weight(time, patch.data(*old).time(), new_data.time())
                        }
                        None => 0.0,
                    };
                    self.blend_same_patch(&mut patch, *old, *new, w);
                }
            }
            return;
        }

        let src_patch = src_level.patch(&self.src_patch);
        let mut dst_patch = dst_level.patch_mut(&self.dst_patch);
        let dst_data = dst_patch.data_mut(self.dst);
        match &self.kind {
            TransactionKind::Copy { src } => {
                dst_data.copy_on_cells(src_patch.data(*src), &self.region, &self.shift);
            }
            TransactionKind::TimeInterp { old, new } => {
                let old_data = src_patch.data(*old);
                let new_data = match src_patch.try_data(*new) {
                    Some(data) => data,
                    None => {
                        dst_data.copy_on_cells(old_data, &self.region, &self.shift);
                        return;
                    }
                };
                let w = interp_weight(time, old_data.time(), new_data.time());
                if w <= 0.0 {
                    dst_data.copy_on_cells(old_data, &self.region, &self.shift);
                } else if w >= 1.0 {
                    dst_data.copy_on_cells(new_data, &self.region, &self.shift);
                } else {
                    dst_data.time_interpolate_on_cells(
                        old_data,
                        new_data,
                        w,
                        &self.region,
                        &self.shift,
                    );
                }
            }
        }
    }

    fn blend_same_patch(
        &self,
        patch: &mut crate::patch::Patch,
        old: DescriptorId,
        new: DescriptorId,
        w: f64,
    ) {
        if w <= 0.0 {
            let (dst, src) = patch.data_pair_mut(self.dst, old);
            dst.copy_on_cells(src, &self.region, &self.shift);
        } else if w >= 1.0 {
            let (dst, src) = patch.data_pair_mut(self.dst, new);
            dst.copy_on_cells(src, &self.region, &self.shift);
        } else {
            let old_data = patch.data(old).clone();
            let new_data = patch.data(new).clone();
            patch.data_mut(self.dst).time_interpolate_on_cells(
                &old_data,
                &new_data,
                w,
                &self.region,
                &self.shift,
            );
        }
    }
}

fn interp_weight(time: f64, t_old: f64, t_new: f64) -> f64 {
    if t_new <= t_old {
        return 0.0;
    }
    (time - t_old) / (t_new - t_old)
}

/// Sort a queue into its deterministic replay order.
pub fn sort_queue(queue: &mut [Transaction]) {
    queue.sort_by_key(Transaction::order_key);
}

// ============================================================================
#[cfg(test)]
mod test {

    use super::{sort_queue, Transaction, TransactionKind};
    use crate::index_space::{BoxId, IndexSpace};
    use crate::int_vector::IntVector;

    fn txn(dst: (usize, u32), src: (usize, u32)) -> Transaction {
        Transaction {
            dst_patch: BoxId::new(dst.0, dst.1),
            src_patch: BoxId::new(src.0, src.1),
            dst: 0,
            kind: TransactionKind::Copy { src: 1 },
            region: IndexSpace::from_bounds(&[0, 0], &[1, 1]),
            shift: IntVector::zero(2),
        }
    }

    #[test]
    fn same_patch_transactions_sort_to_the_head() {
        let mut queue = vec![txn((0, 1), (0, 0)), txn((0, 1), (0, 2)), txn((0, 1), (0, 1))];
        sort_queue(&mut queue);
        assert_eq!(queue[0].src_patch, BoxId::new(0, 1));
        assert_eq!(queue[1].src_patch, BoxId::new(0, 0));
        assert_eq!(queue[2].src_patch, BoxId::new(0, 2));
    }
}
