use crate::index_space::IndexSpace;
use crate::int_vector::IntVector;

/// Selects which parts of a destination patch a refine schedule must fill.
#[derive(Clone, Debug)]
pub enum FillPattern {
    /// The patch interior plus the ghost region out to the fill width.
    InteriorAndGhosts,
    /// Only the ghost region; the interior is assumed valid.
    GhostsOnly,
    /// Only the patch interior.
    Interior,
    /// Caller-specified regions, clipped to the grown patch box.
    Boxes(Vec<IndexSpace>),
}

impl FillPattern {
    /// The fill boxes for one destination patch.
    pub fn fill_boxes(&self, patch_space: &IndexSpace, width: &IntVector) -> Vec<IndexSpace> {
        let grown = patch_space.grow(width);
        match self {
            FillPattern::InteriorAndGhosts => vec![grown],
            FillPattern::GhostsOnly => grown.remove_intersection(patch_space),
            FillPattern::Interior => vec![patch_space.clone()],
            FillPattern::Boxes(boxes) => boxes
                .iter()
                .map(|b| b.intersect(&grown))
                .filter(|b| !b.is_empty())
                .collect(),
        }
    }
}

impl Default for FillPattern {
    fn default() -> Self {
        FillPattern::InteriorAndGhosts
    }
}

// ============================================================================
#[cfg(test)]
mod test {

    use super::FillPattern;
    use crate::index_space::IndexSpace;
    use crate::int_vector::IntVector;

    #[test]
    fn ghost_only_boxes_surround_the_interior() {
        let space = IndexSpace::from_bounds(&[0, 0], &[9, 9]);
        let width = IntVector::uniform(2, 2);

        let boxes = FillPattern::GhostsOnly.fill_boxes(&space, &width);
        let total: usize = boxes.iter().map(IndexSpace::len).sum();
        assert_eq!(total, 14 * 14 - 10 * 10);
        for b in &boxes {
            assert!(!b.intersects(&space));
        }

        let all = FillPattern::InteriorAndGhosts.fill_boxes(&space, &width);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].len(), 14 * 14);
    }
}
