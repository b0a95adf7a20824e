use crate::int_vector::IntVector;
use core::fmt;

/// Identifies one logically-rectangular block of a multi-block mesh.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, serde::Serialize, serde::Deserialize,
)]
pub struct BlockId(pub u32);

/// Globally unique identity of a box within a box level: the owning rank,
/// a rank-local sequence number, and a periodic shift number. Shift zero is
/// the canonical box; a non-zero shift selects a displacement from the
/// geometry's periodic shift catalog. Periodic images share `(owner, local)`
/// with their canonical source and are never independently owned.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct BoxId {
    pub owner: u32,
    pub local: u32,
    pub shift: u16,
}

impl BoxId {
    pub fn new(owner: usize, local: u32) -> Self {
        Self {
            owner: owner as u32,
            local,
            shift: 0,
        }
    }

    pub fn shifted(&self, shift: u16) -> Self {
        Self { shift, ..*self }
    }

    /// The identity of the canonical (unshifted) box.
    pub fn canonical(&self) -> Self {
        self.shifted(0)
    }

    pub fn is_periodic_image(&self) -> bool {
        self.shift != 0
    }

    pub fn owner(&self) -> usize {
        self.owner as usize
    }
}

impl fmt::Debug for BoxId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.shift == 0 {
            write!(f, "{}#{}", self.owner, self.local)
        } else {
            write!(f, "{}#{}~{}", self.owner, self.local, self.shift)
        }
    }
}

/// An axis-aligned box of mesh indexes: the inclusive integer lattice between
/// `lower` and `upper`. A box with any `upper` component less than the
/// corresponding `lower` component is empty. Refining a box multiplies
/// `lower` by the ratio and `upper + 1` by the ratio, then subtracts one;
/// coarsening floor-divides both bounds, so the coarse box always contains
/// the fine one.
#[derive(Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct IndexSpace {
    lower: IntVector,
    upper: IntVector,
}

// ============================================================================
impl IndexSpace {
    pub fn new(lower: IntVector, upper: IntVector) -> Self {
        assert_eq!(lower.dim(), upper.dim());
        Self { lower, upper }
    }

    /// Construct from per-axis inclusive bounds.
    pub fn from_bounds(lower: &[i64], upper: &[i64]) -> Self {
        Self::new(IntVector::new(lower), IntVector::new(upper))
    }

    pub fn empty(dim: usize) -> Self {
        Self::new(IntVector::zero(dim), IntVector::uniform(dim, -1))
    }

    pub fn dim(&self) -> usize {
        self.lower.dim()
    }

    pub fn lower(&self) -> IntVector {
        self.lower
    }

    pub fn upper(&self) -> IntVector {
        self.upper
    }

    pub fn is_empty(&self) -> bool {
        (0..self.dim()).any(|a| self.upper[a] < self.lower[a])
    }

    /// The number of indexes contained.
    pub fn len(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        (0..self.dim())
            .map(|a| (self.upper[a] - self.lower[a] + 1) as usize)
            .product()
    }

    /// The extent on each axis.
    pub fn shape(&self) -> IntVector {
        let mut shape = IntVector::zero(self.dim());
        for a in 0..self.dim() {
            shape[a] = (self.upper[a] - self.lower[a] + 1).max(0);
        }
        shape
    }

    pub fn contains(&self, index: &IntVector) -> bool {
        (0..self.dim()).all(|a| self.lower[a] <= index[a] && index[a] <= self.upper[a])
    }

    pub fn contains_space(&self, other: &Self) -> bool {
        other.is_empty() || (self.contains(&other.lower) && self.contains(&other.upper))
    }

    pub fn intersects(&self, other: &Self) -> bool {
        !self.intersect(other).is_empty()
    }

    pub fn intersect(&self, other: &Self) -> Self {
        Self::new(
            self.lower.max_with(&other.lower),
            self.upper.min_with(&other.upper),
        )
    }

    /// Grow by the given width on every side of every axis.
    pub fn grow(&self, width: &IntVector) -> Self {
        Self::new(self.lower - *width, self.upper + *width)
    }

    pub fn grow_all(&self, delta: i64) -> Self {
        self.grow(&IntVector::uniform(self.dim(), delta))
    }

    /// Grow the upper bound only, on one axis. Useful for obtaining the data
    /// extent of node-like axes.
    pub fn grow_upper(&self, axis: usize, delta: i64) -> Self {
        let mut upper = self.upper;
        upper[axis] += delta;
        Self::new(self.lower, upper)
    }

    /// Grow the upper bound on every axis.
    pub fn grow_upper_all(&self, delta: i64) -> Self {
        Self::new(self.lower, self.upper + IntVector::uniform(self.dim(), delta))
    }

    pub fn translate(&self, shift: &IntVector) -> Self {
        Self::new(self.lower + *shift, self.upper + *shift)
    }

    pub fn refine(&self, ratio: &IntVector) -> Self {
        assert!(ratio.all_positive(), "invalid refinement ratio {}", ratio);
        Self::new(
            self.lower * *ratio,
            (self.upper + IntVector::one(self.dim())) * *ratio - IntVector::one(self.dim()),
        )
    }

    pub fn coarsen(&self, ratio: &IntVector) -> Self {
        assert!(ratio.all_positive(), "invalid refinement ratio {}", ratio);
        Self::new(
            self.lower.floor_divide(ratio),
            self.upper.floor_divide(ratio),
        )
    }

    /// Row-major offset of an index within this space; the last axis varies
    /// fastest. Panics if a memory location would be out of bounds.
    pub fn offset(&self, index: &IntVector) -> usize {
        let mut s = 0usize;
        for a in 0..self.dim() {
            let extent = (self.upper[a] - self.lower[a] + 1) as usize;
            let i = index[a] - self.lower[a];
            assert! {
                i >= 0 && (i as usize) < extent,
                "index {} out of range on box {}",
                index,
                self
            };
            s = s * extent + i as usize;
        }
        s
    }

    /// Iterate the contained indexes in row-major order.
    pub fn iter(&self) -> IndexIter {
        IndexIter {
            space: self.clone(),
            next: if self.is_empty() {
                None
            } else {
                Some(self.lower)
            },
        }
    }

    /// Remove the part of this box covered by `other`, returning the
    /// remainder as disjoint boxes. The remainder is produced by slicing
    /// off one slab per axis, so it contains at most `2 * dim` boxes.
    pub fn remove_intersection(&self, other: &Self) -> Vec<Self> {
        let common = self.intersect(other);
        if common.is_empty() {
            return vec![self.clone()];
        }
        let mut rest = Vec::new();
        let mut core = self.clone();
        for a in 0..self.dim() {
            if core.lower[a] < common.lower[a] {
                let mut slab = core.clone();
                slab.upper[a] = common.lower[a] - 1;
                rest.push(slab);
                core.lower[a] = common.lower[a];
            }
            if core.upper[a] > common.upper[a] {
                let mut slab = core.clone();
                slab.lower[a] = common.upper[a] + 1;
                rest.push(slab);
                core.upper[a] = common.upper[a];
            }
        }
        rest
    }

    /// Remove every box in `cover` from this box.
    pub fn remove_intersections(&self, cover: &[Self]) -> Vec<Self> {
        let mut rest = vec![self.clone()];
        for c in cover {
            rest = rest
                .into_iter()
                .flat_map(|r| r.remove_intersection(c))
                .collect();
        }
        rest
    }

    /// The smallest box containing both operands.
    pub fn bounding(&self, other: &Self) -> Self {
        if self.is_empty() {
            return other.clone();
        }
        if other.is_empty() {
            return self.clone();
        }
        Self::new(
            self.lower.min_with(&other.lower),
            self.upper.max_with(&other.upper),
        )
    }
}

impl fmt::Debug for IndexSpace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}..{}]", self.lower, self.upper)
    }
}

impl fmt::Display for IndexSpace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

pub struct IndexIter {
    space: IndexSpace,
    next: Option<IntVector>,
}

impl Iterator for IndexIter {
    type Item = IntVector;

    fn next(&mut self) -> Option<IntVector> {
        let current = self.next?;
        let mut next = current;
        let dim = self.space.dim();
        for a in (0..dim).rev() {
            next[a] += 1;
            if next[a] <= self.space.upper[a] {
                self.next = Some(next);
                return Some(current);
            }
            next[a] = self.space.lower[a];
        }
        self.next = None;
        Some(current)
    }
}

/// A box together with its block and its identity within a box level.
#[derive(Clone, PartialEq, Eq, Hash, Debug, serde::Serialize, serde::Deserialize)]
pub struct MeshBox {
    space: IndexSpace,
    block: BlockId,
    id: BoxId,
}

// ============================================================================
impl MeshBox {
    pub fn new(space: IndexSpace, block: BlockId, id: BoxId) -> Self {
        Self { space, block, id }
    }

    pub fn space(&self) -> &IndexSpace {
        &self.space
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    pub fn id(&self) -> BoxId {
        self.id
    }

    pub fn with_space(&self, space: IndexSpace) -> Self {
        Self {
            space,
            block: self.block,
            id: self.id,
        }
    }

    /// The periodic image of this box under the given catalog displacement,
    /// expressed at this box's refinement ratio.
    pub fn periodic_image(&self, shift_number: u16, displacement: &IntVector) -> Self {
        assert!(shift_number != 0);
        Self {
            space: self.space.translate(displacement),
            block: self.block,
            id: self.id.shifted(shift_number),
        }
    }

    pub fn refine(&self, ratio: &IntVector) -> Self {
        self.with_space(self.space.refine(ratio))
    }

    pub fn coarsen(&self, ratio: &IntVector) -> Self {
        self.with_space(self.space.coarsen(ratio))
    }
}

// ============================================================================
#[cfg(test)]
mod test {

    use super::{IndexSpace, IntVector};

    fn space2(lower: [i64; 2], upper: [i64; 2]) -> IndexSpace {
        IndexSpace::from_bounds(&lower, &upper)
    }

    #[test]
    fn refine_and_coarsen_are_inverse_on_aligned_boxes() {
        let space = space2([-2, 1], [3, 4]);
        let ratio = IntVector::uniform(2, 2);
        let fine = space.refine(&ratio);
        assert_eq!(fine, space2([-4, 2], [7, 9]));
        assert_eq!(fine.coarsen(&ratio), space);
    }

    #[test]
    fn coarsening_contains_the_original() {
        let space = space2([-3, 1], [5, 5]);
        let ratio = IntVector::uniform(2, 2);
        let coarse = space.coarsen(&ratio);
        assert_eq!(coarse, space2([-2, 0], [2, 2]));
        assert!(coarse.refine(&ratio).contains_space(&space));
    }

    #[test]
    fn iteration_is_row_major() {
        let space = space2([0, 0], [1, 2]);
        let indexes: Vec<_> = space.iter().collect();
        assert_eq!(indexes.len(), 6);
        assert_eq!(indexes[0], IntVector::new(&[0, 0]));
        assert_eq!(indexes[1], IntVector::new(&[0, 1]));
        assert_eq!(indexes[3], IntVector::new(&[1, 0]));
        for index in &indexes {
            assert_eq!(space.iter().nth(space.offset(index)), Some(*index));
        }
    }

    #[test]
    fn remove_intersection_partitions_the_box() {
        let space = space2([0, 0], [9, 9]);
        let hole = space2([3, 3], [6, 12]);
        let rest = space.remove_intersection(&hole);

        let count: usize = rest.iter().map(IndexSpace::len).sum();
        assert_eq!(count + space.intersect(&hole).len(), space.len());
        for r in &rest {
            assert!(!r.intersects(&hole));
        }
    }

    #[test]
    fn intersect_of_disjoint_boxes_is_empty() {
        assert!(space2([0, 0], [1, 1])
            .intersect(&space2([2, 2], [3, 3]))
            .is_empty());
        assert!(space2([0, 0], [1, 1]).intersects(&space2([1, 1], [3, 3])));
    }
}
