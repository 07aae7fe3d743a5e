//! Bounding volume hierarchy over axis-aligned boxes.
//!
//! Built top-down with a median split on the longest axis of the centroid
//! bounds, so the tree is balanced regardless of size spread. Used for
//! mixed-size particle populations and, always, for static wall triangles.

use crate::aabb::Aabb;

const LEAF_SIZE: usize = 4;

#[derive(Debug, Clone)]
enum NodeKind {
    Leaf { start: usize, count: usize },
    Interior { left: usize, right: usize },
}

#[derive(Debug, Clone)]
struct Node {
    bounds: Aabb,
    kind: NodeKind,
}

/// Balanced box tree answering "which items overlap this box?" queries.
#[derive(Debug, Clone, Default)]
pub struct BoundingVolumeTree {
    nodes: Vec<Node>,
    /// Item indices in leaf order.
    items: Vec<usize>,
    boxes: Vec<Aabb>,
}

impl BoundingVolumeTree {
    /// Build over `boxes`; item `i` is reported as index `i`.
    pub fn build(boxes: &[Aabb]) -> Self {
        let mut tree = Self {
            nodes: Vec::with_capacity(2 * boxes.len() / LEAF_SIZE + 1),
            items: (0..boxes.len()).collect(),
            boxes: boxes.to_vec(),
        };
        if !boxes.is_empty() {
            tree.build_node(0, boxes.len());
        }
        tree
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    /// Whether the tree has no items.
    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    fn build_node(&mut self, start: usize, end: usize) -> usize {
        let bounds = self.items[start..end]
            .iter()
            .fold(Aabb::empty(), |acc, &i| acc.union(&self.boxes[i]));
        let index = self.nodes.len();
        self.nodes.push(Node {
            bounds,
            kind: NodeKind::Leaf {
                start,
                count: end - start,
            },
        });
        if end - start <= LEAF_SIZE {
            return index;
        }

        let centroid_bounds = self.items[start..end]
            .iter()
            .fold(Aabb::empty(), |mut acc, &i| {
                acc.grow(self.boxes[i].center());
                acc
            });
        let axis = centroid_bounds.longest_axis();
        let mid = start + (end - start) / 2;
        let boxes = &self.boxes;
        self.items[start..end].select_nth_unstable_by(mid - start, |&a, &b| {
            boxes[a].center()[axis].total_cmp(&boxes[b].center()[axis])
        });

        let left = self.build_node(start, mid);
        let right = self.build_node(mid, end);
        self.nodes[index].kind = NodeKind::Interior { left, right };
        index
    }

    /// Call `f(i)` for every item whose box overlaps `target`.
    pub fn query<F>(&self, target: &Aabb, mut f: F)
    where
        F: FnMut(usize),
    {
        if self.nodes.is_empty() {
            return;
        }
        let mut stack = Vec::with_capacity(64);
        stack.push(0usize);
        while let Some(n) = stack.pop() {
            let node = &self.nodes[n];
            if !node.bounds.overlaps(target) {
                continue;
            }
            match node.kind {
                NodeKind::Leaf { start, count } => {
                    for &item in &self.items[start..start + count] {
                        if self.boxes[item].overlaps(target) {
                            f(item);
                        }
                    }
                }
                NodeKind::Interior { left, right } => {
                    stack.push(right);
                    stack.push(left);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec3;

    fn brute(boxes: &[Aabb], target: &Aabb) -> Vec<usize> {
        (0..boxes.len()).filter(|&i| boxes[i].overlaps(target)).collect()
    }

    #[test]
    fn empty_tree_reports_nothing() {
        let tree = BoundingVolumeTree::build(&[]);
        let mut hits = 0;
        tree.query(&Aabb::around_sphere(DVec3::ZERO, 1.0), |_| hits += 1);
        assert_eq!(hits, 0);
    }

    #[test]
    fn query_matches_brute_force() {
        let mut boxes = Vec::new();
        for i in 0..10 {
            for j in 0..10 {
                let r = 0.1 + 0.05 * ((i * 7 + j * 3) % 5) as f64;
                boxes.push(Aabb::around_sphere(DVec3::new(i as f64, j as f64 * 0.7, 0.0), r));
            }
        }
        let tree = BoundingVolumeTree::build(&boxes);
        for query_box in [
            Aabb::around_sphere(DVec3::new(3.2, 2.1, 0.0), 0.6),
            Aabb::around_sphere(DVec3::new(-5.0, 0.0, 0.0), 1.0),
            Aabb::new(DVec3::splat(-1.0), DVec3::new(20.0, 0.3, 0.1)),
        ] {
            let mut hits = Vec::new();
            tree.query(&query_box, |i| hits.push(i));
            hits.sort_unstable();
            assert_eq!(hits, brute(&boxes, &query_box));
        }
    }
}
