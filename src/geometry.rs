use crate::index_space::{BlockId, IndexSpace};
use crate::int_vector::{IntVector, MAX_DIM};

/// An affine map taking indexes of one block into the index space of a
/// neighboring block: an axis permutation with per-axis signs, followed by an
/// offset. Rotations in a multi-block mesh are always quarter turns, so a
/// signed permutation captures all of them.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct BlockTransform {
    pub from: BlockId,
    pub to: BlockId,
    pub permutation: [usize; MAX_DIM],
    pub sign: [i64; MAX_DIM],
    pub offset: IntVector,
}

impl BlockTransform {
    pub fn transform_index(&self, index: &IntVector) -> IntVector {
        let mut out = IntVector::zero(index.dim());
        for a in 0..index.dim() {
            out[a] = self.sign[a] * index[self.permutation[a]];
        }
        out + self.offset
    }

    /// Transform a box; the image of an axis-aligned box under a signed
    /// permutation is axis-aligned, so transforming the two corners and
    /// reordering the bounds suffices.
    pub fn transform_space(&self, space: &IndexSpace) -> IndexSpace {
        let a = self.transform_index(&space.lower());
        let b = self.transform_index(&space.upper());
        IndexSpace::new(a.min_with(&b), a.max_with(&b))
    }
}

/// A region of one block's index space that touches an enhanced-connectivity
/// singularity, where an unusual number of blocks meet and ghost data cannot
/// come from a regular neighbor.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Singularity {
    pub block: BlockId,
    pub region: IndexSpace,
}

/// Describes the block topology of the mesh: the domain extent of each
/// block at the coarsest refinement ratio, the physical bounds used to
/// derive cell sizes, the transformations between neighboring blocks, the
/// enhanced-connectivity singularities, and the periodic shift catalog.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct BlockGeometry {
    domain: Vec<(BlockId, IndexSpace)>,
    x_lo: [f64; MAX_DIM],
    x_up: [f64; MAX_DIM],
    transforms: Vec<BlockTransform>,
    singularities: Vec<Singularity>,
    periodic_axes: [bool; MAX_DIM],
    shift_catalog: Vec<IntVector>,
}

// ============================================================================
impl BlockGeometry {
    /// A single-block Cartesian geometry covering `domain` boxes at ratio
    /// one, with physical bounds `x_lo..x_up`.
    pub fn cartesian(x_lo: &[f64], x_up: &[f64], domain: Vec<IndexSpace>) -> Self {
        assert!(!domain.is_empty());
        let dim = domain[0].dim();
        assert!(x_lo.len() == dim && x_up.len() == dim);

        let mut lo = [0.0; MAX_DIM];
        let mut up = [0.0; MAX_DIM];
        lo[..dim].copy_from_slice(x_lo);
        up[..dim].copy_from_slice(x_up);

        Self {
            domain: domain.into_iter().map(|s| (BlockId(0), s)).collect(),
            x_lo: lo,
            x_up: up,
            transforms: Vec::new(),
            singularities: Vec::new(),
            periodic_axes: [false; MAX_DIM],
            shift_catalog: vec![IntVector::zero(dim)],
        }
    }

    /// Declare periodic axes and rebuild the shift catalog. Catalog entry
    /// zero is always the null shift; the remaining entries enumerate every
    /// non-zero combination of whole-domain displacements along the periodic
    /// axes, at ratio one.
    pub fn with_periodic(mut self, axes: &[bool]) -> Self {
        let dim = self.dim();
        assert_eq!(axes.len(), dim);
        self.periodic_axes = [false; MAX_DIM];
        self.periodic_axes[..dim].copy_from_slice(axes);

        let extent = self.domain_extent();
        let mut catalog = vec![IntVector::zero(dim)];
        let mut options: Vec<Vec<i64>> = Vec::new();
        for a in 0..dim {
            options.push(if axes[a] {
                vec![-extent[a], 0, extent[a]]
            } else {
                vec![0]
            });
        }
        let mut stack = vec![IntVector::zero(dim)];
        for a in 0..dim {
            stack = stack
                .into_iter()
                .flat_map(|partial| {
                    options[a].iter().map(move |&s| {
                        let mut next = partial;
                        next[a] = s;
                        next
                    })
                })
                .collect();
        }
        for shift in stack {
            if !shift.all_zero() {
                catalog.push(shift);
            }
        }
        self.shift_catalog = catalog;
        self
    }

    pub fn add_block(mut self, block: BlockId, domain: Vec<IndexSpace>) -> Self {
        for space in domain {
            self.domain.push((block, space));
        }
        self
    }

    pub fn add_transform(mut self, transform: BlockTransform) -> Self {
        self.transforms.push(transform);
        self
    }

    pub fn add_singularity(mut self, singularity: Singularity) -> Self {
        self.singularities.push(singularity);
        self
    }

    pub fn dim(&self) -> usize {
        self.domain[0].1.dim()
    }

    pub fn num_blocks(&self) -> usize {
        self.domain
            .iter()
            .map(|(b, _)| b.0)
            .max()
            .map_or(0, |b| b as usize + 1)
    }

    pub fn has_enhanced_connectivity(&self) -> bool {
        !self.singularities.is_empty()
    }

    pub fn singularities(&self, block: BlockId) -> impl Iterator<Item = &Singularity> {
        self.singularities.iter().filter(move |s| s.block == block)
    }

    pub fn transform(&self, from: BlockId, to: BlockId) -> Option<&BlockTransform> {
        self.transforms
            .iter()
            .find(|t| t.from == from && t.to == to)
    }

    /// The ratio-one domain boxes belonging to one block.
    pub fn domain_boxes(&self, block: BlockId) -> impl Iterator<Item = &IndexSpace> {
        self.domain
            .iter()
            .filter(move |(b, _)| *b == block)
            .map(|(_, s)| s)
    }

    /// The ratio-one domain boxes of one block, refined to `ratio`.
    pub fn domain_boxes_at(&self, block: BlockId, ratio: &IntVector) -> Vec<IndexSpace> {
        self.domain_boxes(block).map(|s| s.refine(ratio)).collect()
    }

    /// Bounding extent of the whole ratio-one domain, per axis.
    pub fn domain_extent(&self) -> IntVector {
        let bounds = self
            .domain
            .iter()
            .fold(IndexSpace::empty(self.dim()), |b, (_, s)| b.bounding(s));
        bounds.shape()
    }

    pub fn shift_catalog(&self) -> &[IntVector] {
        &self.shift_catalog
    }

    /// The displacement named by a shift number, expressed at the given
    /// refinement ratio.
    pub fn shift_displacement(&self, shift_number: u16, ratio: &IntVector) -> IntVector {
        self.shift_catalog[shift_number as usize] * *ratio
    }

    /// The physical cell sizes of a level at the given refinement ratio.
    pub fn cell_sizes(&self, ratio: &IntVector) -> [f64; MAX_DIM] {
        let extent = self.domain_extent();
        let mut dx = [0.0; MAX_DIM];
        for a in 0..self.dim() {
            dx[a] = (self.x_up[a] - self.x_lo[a]) / (extent[a] * ratio[a]) as f64;
        }
        dx
    }

    pub fn x_lo(&self) -> &[f64] {
        &self.x_lo[..self.dim()]
    }
}

// ============================================================================
#[cfg(test)]
mod test {

    use super::{BlockGeometry, BlockTransform};
    use crate::index_space::{BlockId, IndexSpace};
    use crate::int_vector::IntVector;

    fn two_box_geometry() -> BlockGeometry {
        BlockGeometry::cartesian(
            &[0.0, 0.0],
            &[1.0, 0.5],
            vec![
                IndexSpace::from_bounds(&[0, 0], &[9, 2]),
                IndexSpace::from_bounds(&[0, 3], &[9, 4]),
            ],
        )
    }

    #[test]
    fn cell_sizes_follow_the_ratio() {
        let geometry = two_box_geometry();
        let dx = geometry.cell_sizes(&IntVector::one(2));
        assert!((dx[0] - 0.1).abs() < 1e-12);
        assert!((dx[1] - 0.1).abs() < 1e-12);

        let dx = geometry.cell_sizes(&IntVector::uniform(2, 2));
        assert!((dx[0] - 0.05).abs() < 1e-12);
    }

    #[test]
    fn periodic_catalog_enumerates_images() {
        let geometry = two_box_geometry().with_periodic(&[true, false]);
        let catalog = geometry.shift_catalog();
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog[0], IntVector::zero(2));
        assert!(catalog.contains(&IntVector::new(&[10, 0])));
        assert!(catalog.contains(&IntVector::new(&[-10, 0])));

        let ratio = IntVector::uniform(2, 2);
        let shifted = geometry.shift_displacement(1, &ratio);
        assert_eq!(shifted[0].abs(), 20);
    }

    #[test]
    fn transforms_map_boxes_between_blocks() {
        let transform = BlockTransform {
            from: BlockId(0),
            to: BlockId(1),
            permutation: [1, 0, 2],
            sign: [1, -1, 1],
            offset: IntVector::new(&[0, 10]),
        };
        let space = IndexSpace::from_bounds(&[2, 3], &[4, 5]);
        let image = transform.transform_space(&space);
        assert_eq!(image, IndexSpace::from_bounds(&[3, 6], &[5, 8]));
    }
}
