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

use nalgebra::{Matrix3, Vector3};

use crate::shape::ControlPoint;

#[doc = "The Bezier shape model and its exports."]
pub mod shape;
#[doc = "Index/coefficient tables for polynomial mass properties."]
pub mod tables;
#[doc = "Uncertainty propagation from control-point covariances."]
pub mod uncertainty;

pub use shape::{BezierShapeError, ShapeModelBezier};
pub use tables::MassPropertyTables;

/// Number of control points of a degree-n triangular patch,
/// (n+1)(n+2)/2.
pub const fn lattice_size(degree: usize) -> usize {
    (degree + 1) * (degree + 2) / 2
}

/// Maximum Newton iterations of the patch ray cast.
const RAY_CAST_MAX_ITERATIONS: usize = 10;
/// Convergence threshold on the residual, in meters.
const RAY_CAST_TOLERANCE: f64 = 1e-10;
/// Barycentric slack accepted outside the patch domain.
const DOMAIN_SLACK: f64 = 1e-6;

/// A triangular Bezier patch of uniform degree n: the (n+1)(n+2)/2 control
/// points of the barycentric lattice {(i,j,k) : i+j+k = n}, referenced by
/// index into the owning shape model's control-point arena.
#[derive(Clone, Debug)]
pub struct BezierPatch {
    degree: usize,
    /// Global indices, in the canonical lattice ordering of
    /// [`tables::build_base_index_vector`].
    control_points: Vec<usize>,
}

impl BezierPatch {
    /// Builds a patch from lattice-ordered global control-point indices.
    pub fn new(degree: usize, control_points: Vec<usize>) -> Self {
        debug_assert_eq!(control_points.len(), lattice_size(degree));
        Self {
            degree,
            control_points,
        }
    }

    /// A degree-1 patch straight over a facet's three vertices
    /// (lattice order (1,0,0), (0,1,0), (0,0,1)).
    pub fn from_facet(vertices: [usize; 3]) -> Self {
        Self::new(1, vertices.to_vec())
    }

    /// The patch degree.
    pub fn degree(&self) -> usize {
        self.degree
    }

    /// The lattice-ordered global control-point indices.
    pub fn control_points(&self) -> &[usize] {
        &self.control_points
    }

    /// The corner control points ((n,0,0), (0,n,0), (0,0,n)) of the patch,
    /// spanning its triangulated lower bound.
    pub fn corners(&self) -> [usize; 3] {
        let n = self.degree;
        [
            self.control_points[0],
            self.control_points[lattice_size(n) - n - 1],
            self.control_points[lattice_size(n) - 1],
        ]
    }

    /// Bernstein weights of every lattice point at (u, v).
    fn bernstein_weights(&self, u: f64, v: f64) -> Vec<f64> {
        let w = 1.0 - u - v;
        tables::build_base_index_vector(self.degree)
            .into_iter()
            .map(|[i, j, k]| {
                trinomial_coefficient(self.degree, i, j) * powi(u, i) * powi(v, j) * powi(w, k)
            })
            .collect()
    }

    /// Evaluates the surface point at barycentric (u, v).
    pub fn evaluate(&self, arena: &[ControlPoint], u: f64, v: f64) -> Vector3<f64> {
        self.bernstein_weights(u, v)
            .into_iter()
            .zip(&self.control_points)
            .map(|(weight, index)| arena[*index].coordinates * weight)
            .sum()
    }

    /// The partial derivatives (∂S/∂u, ∂S/∂v) at (u, v).
    pub fn partials(&self, arena: &[ControlPoint], u: f64, v: f64) -> (Vector3<f64>, Vector3<f64>) {
        let w = 1.0 - u - v;
        let n = self.degree;

        let mut du = Vector3::zeros();
        let mut dv = Vector3::zeros();
        for ([i, j, k], index) in tables::build_base_index_vector(n)
            .into_iter()
            .zip(&self.control_points)
        {
            let coefficient = trinomial_coefficient(n, i, j);
            let point = arena[*index].coordinates;

            let mut du_weight = 0.0;
            let mut dv_weight = 0.0;
            if i > 0 {
                du_weight += i as f64 * powi(u, i - 1) * powi(v, j) * powi(w, k);
            }
            if j > 0 {
                dv_weight += j as f64 * powi(u, i) * powi(v, j - 1) * powi(w, k);
            }
            if k > 0 {
                let with_dw = k as f64 * powi(u, i) * powi(v, j) * powi(w, k - 1);
                du_weight -= with_dw;
                dv_weight -= with_dw;
            }

            du += point * (coefficient * du_weight);
            dv += point * (coefficient * dv_weight);
        }

        (du, dv)
    }

    /// The outward normal at (u, v).
    pub fn normal(&self, arena: &[ControlPoint], u: f64, v: f64) -> Vector3<f64> {
        let (du, dv) = self.partials(arena, u, v);
        du.cross(&dv).normalize()
    }

    /// The center of the patch, at the barycentric centroid.
    pub fn center(&self, arena: &[ControlPoint]) -> Vector3<f64> {
        self.evaluate(arena, 1.0 / 3.0, 1.0 / 3.0)
    }

    /// Newton–Raphson intersection of a ray with this patch.
    ///
    /// Solves S(u,v) = origin + t·direction, starting from the triangulated
    /// initialization, in at most 10 iterations to a 10⁻¹⁰ residual.
    ///
    /// # Arguments
    /// * `arena`: The control-point arena.
    /// * `origin`, `direction`: The ray; direction should be normalized so
    ///   `t` is a range.
    /// * `initial`: Starting (u, v, t), usually from the triangulated hit.
    ///
    /// # Returns
    /// `Some((t, u, v))` on convergence inside the (slackened) patch
    /// domain with positive range.
    pub fn ray_cast(
        &self,
        arena: &[ControlPoint],
        origin: &Vector3<f64>,
        direction: &Vector3<f64>,
        initial: (f64, f64, f64),
    ) -> Option<(f64, f64, f64)> {
        let (mut u, mut v, mut t) = (initial.1, initial.2, initial.0);

        for _ in 0..RAY_CAST_MAX_ITERATIONS {
            let residual = self.evaluate(arena, u, v) - origin - direction * t;
            if residual.norm() < RAY_CAST_TOLERANCE {
                let in_domain = u >= -DOMAIN_SLACK
                    && v >= -DOMAIN_SLACK
                    && u + v <= 1.0 + DOMAIN_SLACK
                    && t > 0.0;
                return in_domain.then_some((t, u, v));
            }

            let (du, dv) = self.partials(arena, u, v);
            let jacobian = Matrix3::from_columns(&[du, dv, -direction]);
            let step = jacobian.lu().solve(&(-residual))?;

            u += step[0];
            v += step[1];
            t += step[2];
        }

        None
    }
}

fn trinomial_coefficient(n: usize, i: usize, j: usize) -> f64 {
    let factorial = |m: usize| (1..=m).map(|value| value as f64).product::<f64>();
    factorial(n) / (factorial(i) * factorial(j) * factorial(n - i - j))
}

#[inline]
fn powi(base: f64, exponent: usize) -> f64 {
    base.powi(exponent as i32)
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    fn arena(points: &[[f64; 3]]) -> Vec<ControlPoint> {
        points
            .iter()
            .map(|point| ControlPoint::new(Vector3::new(point[0], point[1], point[2])))
            .collect()
    }

    #[test]
    fn test_degree_one_patch_is_the_facet_plane() {
        let arena = arena(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]);
        let patch = BezierPatch::from_facet([0, 1, 2]);

        // Corners map to the lattice poles (u, v, w)
        assert_abs_diff_eq!(
            patch.evaluate(&arena, 1.0, 0.0),
            Vector3::new(0.0, 0.0, 0.0),
            epsilon = 1e-15
        );
        assert_abs_diff_eq!(
            patch.evaluate(&arena, 0.0, 1.0),
            Vector3::new(1.0, 0.0, 0.0),
            epsilon = 1e-15
        );
        assert_abs_diff_eq!(
            patch.evaluate(&arena, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            epsilon = 1e-15
        );

        // Interior is the barycentric combination
        assert_abs_diff_eq!(
            patch.evaluate(&arena, 0.25, 0.5),
            Vector3::new(0.5, 0.25, 0.0),
            epsilon = 1e-15
        );
    }

    #[test]
    fn test_corners_of_degree_two() {
        let patch = BezierPatch::new(2, (0..6).collect());
        assert_eq!(patch.corners(), [0, 3, 5]);
    }

    #[test]
    fn test_flat_patch_normal() {
        let arena = arena(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]);
        let patch = BezierPatch::from_facet([0, 1, 2]);
        assert_abs_diff_eq!(
            patch.normal(&arena, 0.25, 0.25),
            Vector3::z(),
            epsilon = 1e-14
        );
    }

    #[test]
    fn test_partials_match_finite_differences() {
        let arena = arena(&[
            [0.0, 0.0, 0.0],
            [0.5, 0.1, 0.4],
            [1.0, 0.0, 0.1],
            [0.1, 0.6, 0.3],
            [0.6, 0.5, 0.7],
            [0.0, 1.0, 0.2],
        ]);
        let patch = BezierPatch::new(2, (0..6).collect());

        let (u, v) = (0.3, 0.25);
        let (du, dv) = patch.partials(&arena, u, v);

        let step = 1e-7;
        let du_numeric =
            (patch.evaluate(&arena, u + step, v) - patch.evaluate(&arena, u - step, v))
                / (2.0 * step);
        let dv_numeric =
            (patch.evaluate(&arena, u, v + step) - patch.evaluate(&arena, u, v - step))
                / (2.0 * step);

        assert_abs_diff_eq!(du, du_numeric, epsilon = 1e-6);
        assert_abs_diff_eq!(dv, dv_numeric, epsilon = 1e-6);
    }

    #[test]
    fn test_ray_cast_on_flat_patch() {
        let arena = arena(&[[0.0, 0.0, 1.0], [1.0, 0.0, 1.0], [0.0, 1.0, 1.0]]);
        let patch = BezierPatch::from_facet([0, 1, 2]);

        let origin = Vector3::new(0.2, 0.3, 0.0);
        let direction = Vector3::z();
        let hit = patch
            .ray_cast(&arena, &origin, &direction, (0.5, 0.3, 0.3))
            .expect("flat patch hit");

        assert_abs_diff_eq!(hit.0, 1.0, epsilon = 1e-10);
        let surface = patch.evaluate(&arena, hit.1, hit.2);
        assert_abs_diff_eq!(surface, Vector3::new(0.2, 0.3, 1.0), epsilon = 1e-9);
    }

    #[test]
    fn test_ray_cast_rejects_out_of_domain() {
        let arena = arena(&[[0.0, 0.0, 1.0], [1.0, 0.0, 1.0], [0.0, 1.0, 1.0]]);
        let patch = BezierPatch::from_facet([0, 1, 2]);

        // Aims at the plane but far outside the triangle
        let origin = Vector3::new(5.0, 5.0, 0.0);
        let hit = patch.ray_cast(&arena, &origin, &Vector3::z(), (1.0, 0.3, 0.3));
        assert!(hit.is_none());
    }
}
