//! Radius and box queries against a [`Tree`].
//!
//! Queries descend from the root and skip every subtree whose tight extent
//! cannot reach the query region. Results are exact: a particle is reported
//! iff its distance to the query centre is `<= radius` (or it lies inside the
//! query box).

use crate::bbox::BoundingBox;
use crate::particle::distance_sq;
use crate::tree::Tree;

impl<const D: usize> Tree<D> {
    /// Call `f(index)` for every particle within `radius` of `center`.
    ///
    /// `positions` must be the slice the tree was built over.
    pub fn for_each_in_radius<F>(&self, center: &[f64; D], radius: f64, positions: &[[f64; D]], mut f: F)
    where
        F: FnMut(usize),
    {
        debug_assert_eq!(positions.len(), self.entity_count());
        let Some(root) = self.root() else {
            return;
        };
        let radius_sq = radius * radius;
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let node = self.node(id);
            if node.extent.distance_sq_to_point(center) > radius_sq {
                continue;
            }
            if node.is_leaf() {
                for &i in node.entities() {
                    let i = i as usize;
                    if distance_sq(center, &positions[i]) <= radius_sq {
                        f(i);
                    }
                }
            } else {
                stack.extend(node.children().iter().rev().copied());
            }
        }
    }

    /// Indices of every particle within `radius` of `center`, ascending.
    pub fn within_radius(&self, center: &[f64; D], radius: f64, positions: &[[f64; D]]) -> Vec<usize> {
        let mut out = Vec::new();
        self.for_each_in_radius(center, radius, positions, |i| out.push(i));
        out.sort_unstable();
        out
    }

    /// Indices of every particle inside the closed box `query`, ascending.
    pub fn within_box(&self, query: &BoundingBox<D>, positions: &[[f64; D]]) -> Vec<usize> {
        let mut out = Vec::new();
        let Some(root) = self.root() else {
            return out;
        };
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let node = self.node(id);
            if !node.extent.intersects(query) {
                continue;
            }
            if node.is_leaf() {
                out.extend(
                    node.entities()
                        .iter()
                        .map(|&i| i as usize)
                        .filter(|&i| query.contains_point(&positions[i])),
                );
            } else if query.contains_box(&node.extent) {
                let mut all = Vec::new();
                self.collect_entities(id, &mut all);
                out.extend(all.into_iter().map(|i| i as usize));
            } else {
                stack.extend(node.children().iter().rev().copied());
            }
        }
        out.sort_unstable();
        out
    }
}

#[cfg(test)]
mod tests {
    use crate::tree::TreeParams;
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn brute_force(center: &[f64; 3], radius: f64, positions: &[[f64; 3]]) -> Vec<usize> {
        (0..positions.len())
            .filter(|&i| distance_sq(center, &positions[i]) <= radius * radius)
            .collect()
    }

    fn cloud(n: usize, seed: u64) -> Vec<[f64; 3]> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        (0..n)
            .map(|_| [rng.gen::<f64>(), rng.gen::<f64>(), rng.gen::<f64>()])
            .collect()
    }

    #[test]
    fn empty_tree_has_no_neighbors() {
        let tree = Tree::<3>::build(TreeParams::default(), &[], &[]);
        assert!(tree.within_radius(&[0.5; 3], 1.0, &[]).is_empty());
        assert!(tree.within_box(&BoundingBox::new([0.0; 3], [1.0; 3]), &[]).is_empty());
    }

    #[test]
    fn known_small_set() {
        let positions = [
            [0.0, 0.0, 0.0],
            [0.1, 0.0, 0.0],
            [0.0, 0.2, 0.0],
            [0.3, 0.3, 0.3],
            [1.0, 1.0, 1.0],
        ];
        let tree = Tree::build(
            TreeParams { max_depth: 8, leaf_threshold: 1 },
            &positions,
            &[0.1; 5],
        );
        assert_eq!(tree.within_radius(&[0.0; 3], 0.1, &positions), vec![0, 1]);
        assert_eq!(tree.within_radius(&[0.0; 3], 0.25, &positions), vec![0, 1, 2]);
        assert_eq!(tree.within_radius(&[0.3; 3], 0.01, &positions), vec![3]);
        assert_eq!(tree.within_radius(&[5.0; 3], 1.0, &positions), Vec::<usize>::new());
    }

    #[test]
    fn radius_query_matches_brute_force() {
        let positions = cloud(3000, 11);
        let radii = vec![0.05; positions.len()];
        let tree = Tree::build(TreeParams { max_depth: 10, leaf_threshold: 8 }, &positions, &radii);
        let mut rng = ChaCha8Rng::seed_from_u64(12);
        for _ in 0..100 {
            let center = [rng.gen::<f64>(), rng.gen::<f64>(), rng.gen::<f64>()];
            let radius = rng.gen_range(0.0..0.2);
            assert_eq!(
                tree.within_radius(&center, radius, &positions),
                brute_force(&center, radius, &positions)
            );
        }
    }

    #[test]
    fn box_query_matches_brute_force() {
        let positions = cloud(2000, 21);
        let radii = vec![0.05; positions.len()];
        let tree = Tree::build(TreeParams { max_depth: 10, leaf_threshold: 6 }, &positions, &radii);
        let query = BoundingBox::new([0.2, 0.1, 0.4], [0.6, 0.9, 0.55]);
        let expected: Vec<usize> = (0..positions.len())
            .filter(|&i| query.contains_point(&positions[i]))
            .collect();
        assert_eq!(tree.within_box(&query, &positions), expected);
    }

    #[test]
    fn boundary_distance_is_inclusive() {
        let positions = [[0.0, 0.0], [0.5, 0.0]];
        let tree = Tree::build(TreeParams::default(), &positions, &[0.5, 0.5]);
        assert_eq!(tree.within_radius(&[0.0, 0.0], 0.5, &positions), vec![0, 1]);
    }
}
