// SPDX-License-Identifier: MIT
/*
 * Copyright (c) [2023 - Present] Emily Matheys <emilymatt96@gmail.com>
 *
 * Permission is hereby granted, free of charge, to any person obtaining a copy
 * of this software and associated documentation files (the "Software"), to deal
 * in the Software without restriction, including without limitation the rights
 * to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
 * copies of the Software, and to permit persons to whom the Software is
 * furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in all
 * copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
 * AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
 * OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
 * SOFTWARE.
 */

use std::ops::Index;

use nalgebra::{Matrix3, Vector3};

use crate::{features::Descriptor, kd_tree::KdTreePoints};

mod io;
pub use io::PointCloudIoError;

/// An oriented point: a position with an outward surface normal, plus the
/// bookkeeping the registration pipeline hangs off it.
#[derive(Clone, Debug, Default)]
pub struct PointNormal {
    /// Position in the cloud frame.
    pub position: Vector3<f64>,
    /// Outward unit normal in the cloud frame.
    pub normal: Vector3<f64>,
    /// Local rotation-invariant feature descriptor, once computed.
    pub descriptor: Option<Descriptor>,
    /// How many point pairings have included this point.
    pub inclusion_counter: u32,
    /// Whether the descriptor is distinctive enough to be used as a
    /// correspondence hint.
    pub valid_feature: bool,
    /// Weak correspondence to a point of another cloud, by index; a relation
    /// only, never owning.
    pub correspondence: Option<usize>,
}

impl PointNormal {
    /// Creates an oriented point from a position and a normal.
    pub fn new(position: Vector3<f64>, normal: Vector3<f64>) -> Self {
        Self {
            position,
            normal,
            valid_feature: true,
            ..Default::default()
        }
    }
}

/// An owning, ordered container of oriented points, one per lidar flash.
///
/// The cloud owns its KD-tree; a rigid transform invalidates the tree, which
/// must be rebuilt before spatial queries are answered through it (queries on
/// a stale tree fall back to a linear scan).
#[derive(Default)]
pub struct PointCloud {
    points: Vec<PointNormal>,
    label: String,
    kd_tree: Option<KdTreePoints>,
    tree_stale: bool,
    mean_descriptor: Option<Descriptor>,
}

impl PointCloud {
    /// Creates an empty cloud with the given label.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    /// Creates a cloud from pre-built points.
    pub fn from_points(label: impl Into<String>, points: Vec<PointNormal>) -> Self {
        Self {
            points,
            label: label.into(),
            ..Default::default()
        }
    }

    /// Merges `clouds` into a single cloud, uniformly sub-sampling so that at
    /// most `points_retained` points survive.
    ///
    /// # Arguments
    /// * `label`: Label of the combined cloud.
    /// * `clouds`: The clouds to combine, in order.
    /// * `points_retained`: Upper bound on the merged size.
    pub fn merged(
        label: impl Into<String>,
        clouds: &[&PointCloud],
        points_retained: usize,
    ) -> Self {
        let total = clouds.iter().map(|cloud| cloud.size()).sum::<usize>();
        let stride = if points_retained == 0 || total <= points_retained {
            1
        } else {
            total.div_ceil(points_retained)
        };

        let points = clouds
            .iter()
            .flat_map(|cloud| cloud.points.iter())
            .step_by(stride)
            .cloned()
            .collect::<Vec<_>>();
        log::debug!(
            "Merged {} clouds totalling {total} points into {} retained points",
            clouds.len(),
            points.len()
        );

        Self::from_points(label, points)
    }

    /// Returns the number of points in the cloud.
    #[inline]
    pub fn size(&self) -> usize {
        self.points.len()
    }

    /// Returns whether the cloud holds no points.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Returns the cloud label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns the queried point, if the index is in range.
    pub fn get(&self, index: usize) -> Option<&PointNormal> {
        self.points.get(index)
    }

    /// Returns a mutable reference to the queried point.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut PointNormal> {
        self.points.get_mut(index)
    }

    /// Iterates over the points in order.
    pub fn iter(&self) -> impl Iterator<Item = &PointNormal> {
        self.points.iter()
    }

    /// Mutable iteration; invalidates the KD-tree.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PointNormal> {
        self.tree_stale = true;
        self.points.iter_mut()
    }

    /// Adds a point to the cloud; invalidates the KD-tree.
    pub fn push(&mut self, point: PointNormal) {
        self.tree_stale = true;
        self.points.push(point);
    }

    /// Applies a full in-place rigid transform, `p <- rotation * p + translation`,
    /// rotating the normals alongside. Invalidates the KD-tree.
    pub fn transform(&mut self, rotation: &Matrix3<f64>, translation: &Vector3<f64>) {
        self.points.iter_mut().for_each(|point| {
            point.position = rotation * point.position + translation;
            point.normal = rotation * point.normal;
        });
        self.tree_stale = true;
    }

    /// (Re)builds the KD-tree over the current point positions.
    pub fn build_kdtree(&mut self) {
        let positions = self
            .points
            .iter()
            .map(|point| point.position)
            .collect::<Vec<_>>();
        self.kd_tree = Some(KdTreePoints::build(&positions));
        self.tree_stale = false;
    }

    /// Returns whether the KD-tree is built and reflects the current
    /// positions.
    pub fn has_fresh_tree(&self) -> bool {
        self.kd_tree.is_some() && !self.tree_stale
    }

    /// Finds the point closest to `target`.
    ///
    /// Uses the KD-tree when fresh; falls back to a linear scan otherwise.
    ///
    /// # Returns
    /// The index of the closest point and its squared distance, or [`None`]
    /// for an empty cloud.
    pub fn nearest(&self, target: &Vector3<f64>) -> Option<(usize, f64)> {
        if self.has_fresh_tree() {
            return self.kd_tree.as_ref().and_then(|tree| tree.nearest(target));
        }

        self.points
            .iter()
            .enumerate()
            .map(|(idx, point)| (idx, (point.position - target).norm_squared()))
            .min_by(|(_, a), (_, b)| a.total_cmp(b))
    }

    /// Finds the `k` points closest to `target`, sorted by distance.
    ///
    /// # Returns
    /// A [`Vec`] of (squared distance, index) pairs, closest first.
    pub fn k_nearest(&self, target: &Vector3<f64>, k: usize) -> Vec<(f64, usize)> {
        if self.has_fresh_tree() {
            return self
                .kd_tree
                .as_ref()
                .map(|tree| tree.k_nearest(target, k))
                .unwrap_or_default();
        }

        let mut all = self
            .points
            .iter()
            .enumerate()
            .map(|(idx, point)| ((point.position - target).norm_squared(), idx))
            .collect::<Vec<_>>();
        all.sort_unstable_by(|(a, _), (b, _)| a.total_cmp(b));
        all.truncate(k);
        all
    }

    /// Returns the indices of all points within `radius` of `target`.
    pub fn radius_neighbors(&self, target: &Vector3<f64>, radius: f64) -> Vec<usize> {
        if self.has_fresh_tree() {
            return self
                .kd_tree
                .as_ref()
                .map(|tree| tree.radius_neighbors(target, radius))
                .unwrap_or_default();
        }

        self.points
            .iter()
            .enumerate()
            .filter(|(_, point)| (point.position - target).norm() <= radius)
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Returns the mean feature histogram, once descriptors were computed.
    pub fn mean_descriptor(&self) -> Option<&Descriptor> {
        self.mean_descriptor.as_ref()
    }

    pub(crate) fn set_mean_descriptor(&mut self, descriptor: Descriptor) {
        self.mean_descriptor = Some(descriptor);
    }
}

impl Index<usize> for PointCloud {
    type Output = PointNormal;

    fn index(&self, index: usize) -> &Self::Output {
        &self.points[index]
    }
}
