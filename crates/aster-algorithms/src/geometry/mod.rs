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

use nalgebra::Vector3;

/// An axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    /// Minimum corner.
    pub min: Vector3<f64>,
    /// Maximum corner.
    pub max: Vector3<f64>,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}

impl Aabb {
    /// Returns an inverted box that grows to fit the first point it absorbs.
    pub fn empty() -> Self {
        Self {
            min: Vector3::repeat(f64::INFINITY),
            max: Vector3::repeat(f64::NEG_INFINITY),
        }
    }

    /// Builds the tight box around the provided points.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Vector3<f64>>) -> Self {
        points.into_iter().fold(Self::empty(), |mut aabb, point| {
            aabb.grow(point);
            aabb
        })
    }

    /// Expands the box in place so it contains `point`.
    #[inline]
    pub fn grow(&mut self, point: &Vector3<f64>) {
        self.min = self.min.inf(point);
        self.max = self.max.sup(point);
    }

    /// Merges another box into this one.
    #[inline]
    pub fn merge(&mut self, other: &Self) {
        self.min = self.min.inf(&other.min);
        self.max = self.max.sup(&other.max);
    }

    /// Returns the index of the longest axis (0 = x, 1 = y, 2 = z).
    pub fn longest_axis(&self) -> usize {
        let extent = self.max - self.min;
        let mut axis = 0;
        if extent.y > extent[axis] {
            axis = 1;
        }
        if extent.z > extent[axis] {
            axis = 2;
        }
        axis
    }

    /// Returns the box center.
    #[inline]
    pub fn center(&self) -> Vector3<f64> {
        (self.min + self.max) / 2.0
    }

    /// Returns whether the point lies inside the box (boundary included).
    #[inline]
    pub fn contains(&self, point: &Vector3<f64>) -> bool {
        (0..3).all(|axis| point[axis] >= self.min[axis] && point[axis] <= self.max[axis])
    }

    /// Returns the squared distance from `point` to the box, zero if inside.
    pub fn distance_squared(&self, point: &Vector3<f64>) -> f64 {
        (0..3).fold(0.0, |acc, axis| {
            let d = (self.min[axis] - point[axis])
                .max(0.0)
                .max(point[axis] - self.max[axis]);
            acc + d * d
        })
    }

    /// Slab test against a ray.
    ///
    /// Computes the six slab intersection parameters, sorts them, and accepts
    /// the node when the midpoint of the two middle parameters lies inside the
    /// box and the ray's currently-known range exceeds the box's entry
    /// parameter.
    ///
    /// # Arguments
    /// * `ray`: The query ray; its stored range bounds the traversal.
    ///
    /// # Returns
    /// `true` if the box can contain a hit closer than the ray's stored range.
    pub fn intersects_ray(&self, ray: &Ray) -> bool {
        let mut all_t = [0.0f64; 6];
        for axis in 0..3 {
            all_t[2 * axis] = (self.min[axis] - ray.origin[axis]) / ray.direction[axis];
            all_t[2 * axis + 1] = (self.max[axis] - ray.origin[axis]) / ray.direction[axis];
        }
        all_t.sort_unstable_by(f64::total_cmp);

        if ray.range() < all_t[2] {
            return false;
        }

        let t_test = 0.5 * (all_t[2] + all_t[3]);
        self.contains(&(ray.origin + ray.direction * t_test))
    }
}

/// Selects which of a ray's two range slots traversal reads and writes.
///
/// Tracing the reference surface updates the true range; tracing the
/// estimated surface updates the computed range.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum RangeKind {
    /// Range to the reference (truth) surface.
    #[default]
    True,
    /// Range to the estimated surface.
    Computed,
}

/// A ray with an origin, a unit direction, and one range slot per queried
/// surface. Ranges start at infinity and shrink monotonically as closer hits
/// are found.
#[derive(Clone, Debug)]
pub struct Ray {
    /// Ray origin.
    pub origin: Vector3<f64>,
    /// Unit direction.
    pub direction: Vector3<f64>,
    /// Which range slot the current query updates.
    pub kind: RangeKind,
    true_range: f64,
    computed_range: f64,
    /// Index of the last element hit, if any.
    pub hit_element: Option<usize>,
}

impl Ray {
    /// Creates a ray; the direction is normalized.
    pub fn new(origin: Vector3<f64>, direction: Vector3<f64>) -> Self {
        Self {
            origin,
            direction: direction.normalize(),
            kind: RangeKind::default(),
            true_range: f64::INFINITY,
            computed_range: f64::INFINITY,
            hit_element: None,
        }
    }

    /// Returns the currently-known range for the active slot.
    #[inline]
    pub fn range(&self) -> f64 {
        match self.kind {
            RangeKind::True => self.true_range,
            RangeKind::Computed => self.computed_range,
        }
    }

    /// Overwrites the active range slot.
    #[inline]
    pub fn set_range(&mut self, range: f64) {
        match self.kind {
            RangeKind::True => self.true_range = range,
            RangeKind::Computed => self.computed_range = range,
        }
    }

    /// Returns the impact point for the active slot, if any hit was recorded.
    pub fn impact_point(&self) -> Option<Vector3<f64>> {
        let range = self.range();
        range.is_finite().then(|| self.origin + self.direction * range)
    }

    /// Resets both range slots and the hit bookkeeping.
    pub fn reset(&mut self) {
        self.true_range = f64::INFINITY;
        self.computed_range = f64::INFINITY;
        self.hit_element = None;
    }
}

/// Möller–Trumbore ray/triangle intersection.
///
/// # Arguments
/// * `origin`, `direction`: The ray, direction need not be normalized, the
///   returned parameter is in units of `direction`.
/// * `v0`, `v1`, `v2`: Triangle vertices.
///
/// # Returns
/// `Some((t, u, v))` with the ray parameter and the barycentric coordinates
/// of the hit, or [`None`] when the ray misses or runs parallel.
pub fn ray_triangle_intersect(
    origin: &Vector3<f64>,
    direction: &Vector3<f64>,
    v0: &Vector3<f64>,
    v1: &Vector3<f64>,
    v2: &Vector3<f64>,
) -> Option<(f64, f64, f64)> {
    const PARALLEL_EPSILON: f64 = 1e-13;

    let edge1 = v1 - v0;
    let edge2 = v2 - v0;
    let p = direction.cross(&edge2);
    let determinant = edge1.dot(&p);

    if determinant.abs() < PARALLEL_EPSILON {
        return None;
    }

    let inv_determinant = 1.0 / determinant;
    let s = origin - v0;
    let u = s.dot(&p) * inv_determinant;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(&edge1);
    let v = direction.dot(&q) * inv_determinant;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = edge2.dot(&q) * inv_determinant;
    (t > PARALLEL_EPSILON).then_some((t, u, v))
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn test_aabb_growth_and_longest_axis() {
        let points = [
            Vector3::new(-1.0, 0.0, 2.0),
            Vector3::new(3.0, 1.0, -1.0),
            Vector3::new(0.0, -2.0, 0.0),
        ];
        let aabb = Aabb::from_points(points.iter());

        assert_eq!(aabb.min, Vector3::new(-1.0, -2.0, -1.0));
        assert_eq!(aabb.max, Vector3::new(3.0, 1.0, 2.0));
        assert_eq!(aabb.longest_axis(), 0);

        assert_eq!(aabb.distance_squared(&aabb.center()), 0.0);
        assert_eq!(aabb.distance_squared(&Vector3::new(5.0, 0.0, 0.0)), 4.0);
    }

    #[test]
    fn test_aabb_ray_intersection() {
        let aabb = Aabb {
            min: Vector3::new(-1.0, -1.0, -1.0),
            max: Vector3::new(1.0, 1.0, 1.0),
        };

        let hitting = Ray::new(Vector3::new(-5.0, 0.0, 0.0), Vector3::x());
        assert!(aabb.intersects_ray(&hitting));

        let missing = Ray::new(Vector3::new(-5.0, 3.0, 0.0), Vector3::x());
        assert!(!aabb.intersects_ray(&missing));

        // A ray whose known range stops short of the box must be rejected
        let mut short = Ray::new(Vector3::new(-5.0, 0.0, 0.0), Vector3::x());
        short.set_range(1.0);
        assert!(!aabb.intersects_ray(&short));
    }

    #[test]
    fn test_moller_trumbore_hit() {
        let v0 = Vector3::new(0.0, 0.0, 1.0);
        let v1 = Vector3::new(1.0, 0.0, 1.0);
        let v2 = Vector3::new(0.0, 1.0, 1.0);

        let hit = ray_triangle_intersect(
            &Vector3::new(0.25, 0.25, 0.0),
            &Vector3::z(),
            &v0,
            &v1,
            &v2,
        );
        let (t, u, v) = hit.expect("ray should hit the facet");
        assert_abs_diff_eq!(t, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(u, 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(v, 0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_moller_trumbore_miss_and_parallel() {
        let v0 = Vector3::new(0.0, 0.0, 1.0);
        let v1 = Vector3::new(1.0, 0.0, 1.0);
        let v2 = Vector3::new(0.0, 1.0, 1.0);

        // Outside the triangle
        assert!(ray_triangle_intersect(
            &Vector3::new(0.9, 0.9, 0.0),
            &Vector3::z(),
            &v0,
            &v1,
            &v2
        )
        .is_none());

        // Parallel to the plane
        assert!(ray_triangle_intersect(
            &Vector3::new(0.0, 0.0, 0.0),
            &Vector3::x(),
            &v0,
            &v1,
            &v2
        )
        .is_none());

        // Behind the origin
        assert!(ray_triangle_intersect(
            &Vector3::new(0.25, 0.25, 2.0),
            &Vector3::z(),
            &v0,
            &v1,
            &v2
        )
        .is_none());
    }

    #[test]
    fn test_ray_range_slots() {
        let mut ray = Ray::new(Vector3::zeros(), Vector3::x());
        assert_eq!(ray.range(), f64::INFINITY);

        ray.set_range(2.0);
        ray.kind = RangeKind::Computed;
        assert_eq!(ray.range(), f64::INFINITY);
        ray.set_range(3.0);

        ray.kind = RangeKind::True;
        assert_eq!(ray.range(), 2.0);
        assert_abs_diff_eq!(
            ray.impact_point().unwrap(),
            Vector3::new(2.0, 0.0, 0.0),
            epsilon = 1e-15
        );
    }
}
