use nalgebra::Vector3;

use crate::geometry::Aabb;

#[doc = "A KD-Tree over heterogeneous surface elements, supporting ray traversal."]
pub mod elements;

pub use elements::KdTreeElements;

struct KdNode {
    point: Vector3<f64>,
    index: usize,
    axis: usize,
    left: Option<Box<KdNode>>,
    right: Option<Box<KdNode>>,
}

/// A KD-Tree over points, supporting nearest-neighbour, k-nearest and
/// radius queries.
///
/// The tree stores copies of the point coordinates together with their index
/// in the originating container; a transform of that container invalidates
/// the tree, which must then be rebuilt before the next query.
#[derive(Default)]
pub struct KdTreePoints {
    root: Option<Box<KdNode>>,
    size: usize,
}

impl KdTreePoints {
    /// Builds a tree over the provided positions by recursive median
    /// partition on the longest bounding-box axis.
    pub fn build(positions: &[Vector3<f64>]) -> Self {
        let mut entries = positions
            .iter()
            .copied()
            .enumerate()
            .collect::<Vec<(usize, Vector3<f64>)>>();

        Self {
            root: Self::build_recursive(&mut entries),
            size: positions.len(),
        }
    }

    fn build_recursive(entries: &mut [(usize, Vector3<f64>)]) -> Option<Box<KdNode>> {
        if entries.is_empty() {
            return None;
        }

        let aabb = Aabb::from_points(entries.iter().map(|(_, point)| point));
        let axis = aabb.longest_axis();

        let median = entries.len() / 2;
        entries.select_nth_unstable_by(median, |(_, a), (_, b)| a[axis].total_cmp(&b[axis]));
        let (index, point) = entries[median];

        let (left_entries, rest) = entries.split_at_mut(median);
        Some(Box::new(KdNode {
            point,
            index,
            axis,
            left: Self::build_recursive(left_entries),
            right: Self::build_recursive(&mut rest[1..]),
        }))
    }

    /// Returns the number of indexed points.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Attempts to find the nearest indexed point to the target.
    ///
    /// # Returns
    /// [`None`] if the tree is empty, otherwise the index of the closest
    /// point and its squared distance.
    pub fn nearest(&self, target: &Vector3<f64>) -> Option<(usize, f64)> {
        let mut best = None;
        if let Some(root) = self.root.as_deref() {
            Self::nearest_recursive(root, target, &mut best);
        }
        best
    }

    fn nearest_recursive(node: &KdNode, target: &Vector3<f64>, best: &mut Option<(usize, f64)>) {
        let distance = (node.point - target).norm_squared();
        if best.map_or(true, |(_, best_distance)| distance < best_distance) {
            *best = Some((node.index, distance));
        }

        let axis_distance = target[node.axis] - node.point[node.axis];
        let (near, far) = if axis_distance < 0.0 {
            (node.left.as_deref(), node.right.as_deref())
        } else {
            (node.right.as_deref(), node.left.as_deref())
        };

        if let Some(near) = near {
            Self::nearest_recursive(near, target, best);
        }

        // The opposite branch can only improve on the best candidate if the
        // splitting plane is closer than that candidate
        if let Some(far) = far {
            if best.map_or(true, |(_, best_distance)| axis_distance * axis_distance < best_distance)
            {
                Self::nearest_recursive(far, target, best);
            }
        }
    }

    /// Returns the `k` nearest indexed points, sorted by distance.
    ///
    /// # Returns
    /// A [`Vec`] of (distance, index), closest first, with at most `k`
    /// entries.
    pub fn k_nearest(&self, target: &Vector3<f64>, k: usize) -> Vec<(f64, usize)> {
        let mut found = Vec::with_capacity(k + 1);
        if k > 0 {
            if let Some(root) = self.root.as_deref() {
                Self::k_nearest_recursive(root, target, k, &mut found);
            }
        }
        found
    }

    fn k_nearest_recursive(
        node: &KdNode,
        target: &Vector3<f64>,
        k: usize,
        found: &mut Vec<(f64, usize)>,
    ) {
        let distance = (node.point - target).norm_squared();
        let position = found.partition_point(|(d, _)| *d < distance);
        if position < k {
            found.insert(position, (distance, node.index));
            found.truncate(k);
        }

        let axis_distance = target[node.axis] - node.point[node.axis];
        let (near, far) = if axis_distance < 0.0 {
            (node.left.as_deref(), node.right.as_deref())
        } else {
            (node.right.as_deref(), node.left.as_deref())
        };

        if let Some(near) = near {
            Self::k_nearest_recursive(near, target, k, found);
        }

        let worst = found
            .last()
            .filter(|_| found.len() == k)
            .map_or(f64::INFINITY, |(d, _)| *d);
        if let Some(far) = far {
            if axis_distance * axis_distance < worst {
                Self::k_nearest_recursive(far, target, k, found);
            }
        }
    }

    /// Returns the indices of all points within `radius` of the target.
    pub fn radius_neighbors(&self, target: &Vector3<f64>, radius: f64) -> Vec<usize> {
        let mut found = Vec::new();
        if let Some(root) = self.root.as_deref() {
            Self::radius_recursive(root, target, radius * radius, &mut found);
        }
        found
    }

    fn radius_recursive(
        node: &KdNode,
        target: &Vector3<f64>,
        radius_squared: f64,
        found: &mut Vec<usize>,
    ) {
        if (node.point - target).norm_squared() <= radius_squared {
            found.push(node.index);
        }

        let axis_distance = target[node.axis] - node.point[node.axis];
        let (near, far) = if axis_distance < 0.0 {
            (node.left.as_deref(), node.right.as_deref())
        } else {
            (node.right.as_deref(), node.left.as_deref())
        };

        if let Some(near) = near {
            Self::radius_recursive(near, target, radius_squared, found);
        }
        if let Some(far) = far {
            if axis_distance * axis_distance <= radius_squared {
                Self::radius_recursive(far, target, radius_squared, found);
            }
        }
    }
}

impl From<&[Vector3<f64>]> for KdTreePoints {
    fn from(positions: &[Vector3<f64>]) -> Self {
        Self::build(positions)
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::SmallRng, Rng, SeedableRng};

    use super::*;

    fn random_points(count: usize, seed: u64) -> Vec<Vector3<f64>> {
        let mut rng = SmallRng::seed_from_u64(seed);
        (0..count)
            .map(|_| {
                Vector3::new(
                    rng.gen_range(-15.0..=15.0),
                    rng.gen_range(-15.0..=15.0),
                    rng.gen_range(-15.0..=15.0),
                )
            })
            .collect()
    }

    fn nearest_naive(target: &Vector3<f64>, points: &[Vector3<f64>]) -> usize {
        points
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                (*a - target)
                    .norm_squared()
                    .total_cmp(&(*b - target).norm_squared())
            })
            .map(|(idx, _)| idx)
            .expect("no points")
    }

    #[test]
    fn test_empty_tree() {
        let tree = KdTreePoints::default();
        assert!(tree.nearest(&Vector3::zeros()).is_none());
        assert!(tree.k_nearest(&Vector3::zeros(), 3).is_empty());
        assert!(tree.radius_neighbors(&Vector3::zeros(), 1.0).is_empty());
    }

    #[test]
    fn compare_nearest_with_naive_version() {
        let points = random_points(256, 42);
        let queries = random_points(64, 43);
        let tree = KdTreePoints::build(&points);

        for query in &queries {
            let (found, _) = tree.nearest(query).unwrap();
            let expected = nearest_naive(query, &points);
            assert_eq!(
                (points[found] - query).norm_squared(),
                (points[expected] - query).norm_squared()
            );
        }
    }

    #[test]
    fn test_k_nearest_ordering_and_count() {
        let points = random_points(128, 7);
        let tree = KdTreePoints::build(&points);
        let target = Vector3::new(0.5, -0.5, 1.0);

        let found = tree.k_nearest(&target, 5);
        assert_eq!(found.len(), 5);
        assert!(found.windows(2).all(|w| w[0].0 <= w[1].0));

        // Must agree with a sorted naive scan
        let mut naive = points
            .iter()
            .map(|p| (p - target).norm_squared())
            .collect::<Vec<_>>();
        naive.sort_unstable_by(f64::total_cmp);
        for (idx, (distance, _)) in found.iter().enumerate() {
            assert_eq!(*distance, naive[idx]);
        }
    }

    #[test]
    fn test_radius_neighbors() {
        let points = random_points(128, 11);
        let tree = KdTreePoints::build(&points);
        let target = Vector3::zeros();
        let radius = 8.0;

        let mut found = tree.radius_neighbors(&target, radius);
        found.sort_unstable();

        let mut expected = points
            .iter()
            .enumerate()
            .filter(|(_, p)| (*p - target).norm() <= radius)
            .map(|(idx, _)| idx)
            .collect::<Vec<_>>();
        expected.sort_unstable();

        assert_eq!(found, expected);
    }
}
