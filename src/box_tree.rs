use crate::index_space::IndexSpace;

/// A static search structure over a set of boxes, answering "which boxes
/// intersect this query box" without a linear scan. The tree recursively
/// splits the bounding box of its entries on the longest axis; entries lying
/// entirely on one side descend into a child, entries straddling the split
/// stay at the node. Entries are `(box, payload)` pairs where the payload is
/// typically an index into the caller's box list.
pub struct BoxTree {
    root: Option<Node>,
}

struct Node {
    bounds: IndexSpace,
    entries: Vec<(IndexSpace, usize)>,
    split_axis: usize,
    split_at: i64,
    left: Option<Box<Node>>,
    right: Option<Box<Node>>,
}

const LEAF_SIZE: usize = 8;

// ============================================================================
impl BoxTree {
    pub fn build<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (IndexSpace, usize)>,
    {
        let entries: Vec<_> = entries
            .into_iter()
            .filter(|(space, _)| !space.is_empty())
            .collect();
        Self {
            root: if entries.is_empty() {
                None
            } else {
                Some(Node::build(entries))
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Collect the payloads of all entries intersecting the query box.
    pub fn query(&self, space: &IndexSpace) -> Vec<usize> {
        let mut found = Vec::new();
        if let Some(root) = &self.root {
            root.query(space, &mut found);
        }
        found
    }
}

impl Node {
    fn build(entries: Vec<(IndexSpace, usize)>) -> Node {
        let bounds = entries
            .iter()
            .fold(IndexSpace::empty(entries[0].0.dim()), |b, (s, _)| {
                b.bounding(s)
            });

        if entries.len() <= LEAF_SIZE {
            return Node {
                bounds,
                entries,
                split_axis: 0,
                split_at: 0,
                left: None,
                right: None,
            };
        }

        let shape = bounds.shape();
        let split_axis = (0..bounds.dim()).max_by_key(|&a| shape[a]).unwrap();
        let split_at = (bounds.lower()[split_axis] + bounds.upper()[split_axis]) / 2;

        let mut straddling = Vec::new();
        let mut below = Vec::new();
        let mut above = Vec::new();
        for (space, payload) in entries {
            if space.upper()[split_axis] <= split_at {
                below.push((space, payload));
            } else if space.lower()[split_axis] > split_at {
                above.push((space, payload));
            } else {
                straddling.push((space, payload));
            }
        }

        // A degenerate split gains nothing; keep everything at this node.
        if below.is_empty() && above.is_empty() {
            return Node {
                bounds,
                entries: straddling,
                split_axis,
                split_at,
                left: None,
                right: None,
            };
        }

        Node {
            bounds,
            entries: straddling,
            split_axis,
            split_at,
            left: if below.is_empty() {
                None
            } else {
                Some(Box::new(Node::build(below)))
            },
            right: if above.is_empty() {
                None
            } else {
                Some(Box::new(Node::build(above)))
            },
        }
    }

    fn query(&self, space: &IndexSpace, found: &mut Vec<usize>) {
        if !self.bounds.intersects(space) {
            return;
        }
        for (entry, payload) in &self.entries {
            if entry.intersects(space) {
                found.push(*payload);
            }
        }
        if space.lower()[self.split_axis] <= self.split_at {
            if let Some(left) = &self.left {
                left.query(space, found);
            }
        }
        if space.upper()[self.split_axis] > self.split_at {
            if let Some(right) = &self.right {
                right.query(space, found);
            }
        }
    }
}

// ============================================================================
#[cfg(test)]
mod test {

    use super::BoxTree;
    use crate::index_space::IndexSpace;

    fn grid_boxes(n: i64, size: i64) -> Vec<IndexSpace> {
        let mut boxes = Vec::new();
        for i in 0..n {
            for j in 0..n {
                boxes.push(IndexSpace::from_bounds(
                    &[i * size, j * size],
                    &[(i + 1) * size - 1, (j + 1) * size - 1],
                ));
            }
        }
        boxes
    }

    #[test]
    fn query_agrees_with_linear_scan() {
        let boxes = grid_boxes(8, 10);
        let tree = BoxTree::build(boxes.iter().cloned().zip(0..));

        for query in [
            IndexSpace::from_bounds(&[5, 5], &[25, 25]),
            IndexSpace::from_bounds(&[-10, -10], &[-1, -1]),
            IndexSpace::from_bounds(&[0, 0], &[79, 79]),
            IndexSpace::from_bounds(&[39, 0], &[40, 79]),
        ] {
            let mut expected: Vec<usize> = boxes
                .iter()
                .enumerate()
                .filter(|(_, b)| b.intersects(&query))
                .map(|(i, _)| i)
                .collect();
            let mut got = tree.query(&query);
            expected.sort_unstable();
            got.sort_unstable();
            assert_eq!(got, expected);
        }
    }

    #[test]
    fn empty_tree_yields_nothing() {
        let tree = BoxTree::build(std::iter::empty());
        assert!(tree.is_empty());
        assert!(tree.query(&IndexSpace::from_bounds(&[0], &[10])).is_empty());
    }
}
