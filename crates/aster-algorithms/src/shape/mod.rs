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

use std::collections::HashSet;

use nalgebra::{Matrix3, Vector3};
use rayon::prelude::*;
use thiserror::Error;

use crate::{
    geometry::{ray_triangle_intersect, Aabb, Ray},
    kd_tree::KdTreeElements,
};

mod obj;
pub use obj::{load_obj, save_obj};

/// Errors of the triangular shape model.
#[derive(Debug, Error)]
pub enum ShapeModelError {
    /// Underlying I/O failure.
    #[error("shape model io failure: {0}")]
    Io(#[from] std::io::Error),
    /// A face record referenced more (or fewer) than three vertices.
    #[error("mesh is not triangular at line {line}")]
    NonTriangular {
        /// 1-based line number of the offending face.
        line: usize,
    },
    /// An unparseable vertex or face record.
    #[error("malformed mesh record at line {line}")]
    MalformedRecord {
        /// 1-based line number.
        line: usize,
    },
    /// A facet referenced a vertex that does not exist.
    #[error("facet references vertex {vertex} out of {count}")]
    VertexOutOfRange {
        /// The offending index.
        vertex: usize,
        /// Number of vertices available.
        count: usize,
    },
    /// The facet winding does not produce a consistent outward flux.
    #[error("facet normals are inconsistently oriented (flux ratio {ratio})")]
    InconsistentNormals {
        /// ‖Σ oriented areas‖ over the mean facet area.
        ratio: f64,
    },
    /// A topological operation hit an open edge.
    #[error("facet {facet} has no neighbor across one of its edges")]
    OpenEdge {
        /// The facet whose edge is open.
        facet: usize,
    },
}

/// A shape-model vertex: a position with its 3×3 position covariance,
/// shared across every facet or patch that references it.
#[derive(Clone, Debug)]
pub struct ControlPoint {
    /// Position in the shape frame.
    pub coordinates: Vector3<f64>,
    /// Position covariance, written by the shape-uncertainty routines.
    pub covariance: Matrix3<f64>,
}

impl ControlPoint {
    /// A control point with zero covariance.
    pub fn new(coordinates: Vector3<f64>) -> Self {
        Self {
            coordinates,
            covariance: Matrix3::zeros(),
        }
    }
}

/// A triangular facet referencing the model's control points by index, with
/// recomputable cached geometry.
#[derive(Clone, Debug)]
pub struct Facet {
    /// The three control-point indices, wound counter-clockwise seen from
    /// outside.
    pub vertices: [usize; 3],
    /// Cached outward unit normal.
    pub normal: Vector3<f64>,
    /// Cached surface area.
    pub area: f64,
    /// Cached center.
    pub center: Vector3<f64>,
}

/// A hit record of a ray against the model.
#[derive(Clone, Copy, Debug)]
pub struct RayHit {
    /// Index of the facet hit.
    pub facet: usize,
    /// Ray parameter of the hit (range for a unit direction).
    pub range: f64,
    /// Barycentric u coordinate on the facet.
    pub u: f64,
    /// Barycentric v coordinate on the facet.
    pub v: f64,
}

/// An explicit facet/vertex shape model over a control-point arena.
///
/// Owns the control points, the facets referencing them by stable index, a
/// KD-tree over the facets for ray casting, and the cached mass properties.
pub struct ShapeModelTri {
    control_points: Vec<ControlPoint>,
    facets: Vec<Facet>,
    ref_frame_name: String,
    kd_tree: Option<KdTreeElements>,
    volume: f64,
    surface_area: f64,
    center_of_mass: Vector3<f64>,
    inertia: Matrix3<f64>,
}

impl ShapeModelTri {
    /// Builds a model from raw vertices and index triples.
    ///
    /// Facet caches and mass properties are computed; the KD-tree is not
    /// (call [`ShapeModelTri::construct_kd_tree`]).
    pub fn new(
        vertices: Vec<Vector3<f64>>,
        facets: Vec<[usize; 3]>,
        ref_frame_name: impl Into<String>,
    ) -> Result<Self, ShapeModelError> {
        let count = vertices.len();
        if let Some(offending) = facets
            .iter()
            .flatten()
            .find(|vertex| **vertex >= count)
        {
            return Err(ShapeModelError::VertexOutOfRange {
                vertex: *offending,
                count,
            });
        }

        let mut model = Self {
            control_points: vertices.into_iter().map(ControlPoint::new).collect(),
            facets: facets
                .into_iter()
                .map(|vertices| Facet {
                    vertices,
                    normal: Vector3::zeros(),
                    area: 0.0,
                    center: Vector3::zeros(),
                })
                .collect(),
            ref_frame_name: ref_frame_name.into(),
            kd_tree: None,
            volume: 0.0,
            surface_area: 0.0,
            center_of_mass: Vector3::zeros(),
            inertia: Matrix3::zeros(),
        };
        model.update_facets();
        model.update_mass_properties();
        Ok(model)
    }

    /// Returns the name of the reference frame attached to this model.
    pub fn ref_frame_name(&self) -> &str {
        &self.ref_frame_name
    }

    /// Number of control points.
    pub fn control_point_count(&self) -> usize {
        self.control_points.len()
    }

    /// Number of facets.
    pub fn facet_count(&self) -> usize {
        self.facets.len()
    }

    /// The control points, by stable index.
    pub fn control_points(&self) -> &[ControlPoint] {
        &self.control_points
    }

    /// Mutable access to a control point; facet caches, the KD-tree and mass
    /// properties must be refreshed by the caller afterwards.
    pub fn control_point_mut(&mut self, index: usize) -> &mut ControlPoint {
        self.kd_tree = None;
        &mut self.control_points[index]
    }

    /// The facets, by stable index.
    pub fn facets(&self) -> &[Facet] {
        &self.facets
    }

    fn vertex(&self, facet: &Facet, corner: usize) -> Vector3<f64> {
        self.control_points[facet.vertices[corner]].coordinates
    }

    /// Recomputes every facet's cached normal, area and center from the
    /// current control-point coordinates.
    pub fn update_facets(&mut self) {
        let control_points = &self.control_points;
        self.facets.par_iter_mut().for_each(|facet| {
            let v0 = control_points[facet.vertices[0]].coordinates;
            let v1 = control_points[facet.vertices[1]].coordinates;
            let v2 = control_points[facet.vertices[2]].coordinates;

            let cross = (v1 - v0).cross(&(v2 - v0));
            let cross_norm = cross.norm();
            facet.area = cross_norm / 2.0;
            facet.normal = if cross_norm > 0.0 {
                cross / cross_norm
            } else {
                Vector3::zeros()
            };
            facet.center = (v0 + v1 + v2) / 3.0;
        });
        self.kd_tree = None;
    }

    /// Recomputes the cached volume, surface area, center of mass and
    /// non-dimensional inertia tensor.
    pub fn update_mass_properties(&mut self) {
        self.compute_volume();
        self.compute_surface_area();
        self.compute_center_of_mass();
        self.compute_inertia();
    }

    /// The cached volume.
    pub fn volume(&self) -> f64 {
        self.volume
    }

    /// The cached surface area.
    pub fn surface_area(&self) -> f64 {
        self.surface_area
    }

    /// The cached center of mass.
    pub fn center_of_mass(&self) -> Vector3<f64> {
        self.center_of_mass
    }

    /// The cached non-dimensional inertia tensor (ρ = 1, ℓ = V^(1/3)),
    /// taken about the center of mass.
    pub fn inertia(&self) -> Matrix3<f64> {
        self.inertia
    }

    fn compute_volume(&mut self) {
        self.volume = self
            .facets
            .par_iter()
            .map(|facet| {
                let v0 = self.vertex(facet, 0);
                let v1 = self.vertex(facet, 1);
                let v2 = self.vertex(facet, 2);
                v0.dot(&v1.cross(&v2)) / 6.0
            })
            .sum();
    }

    fn compute_surface_area(&mut self) {
        self.surface_area = self.facets.par_iter().map(|facet| facet.area).sum();
    }

    fn compute_center_of_mass(&mut self) {
        let weighted = self
            .facets
            .par_iter()
            .map(|facet| {
                let v0 = self.vertex(facet, 0);
                let v1 = self.vertex(facet, 1);
                let v2 = self.vertex(facet, 2);
                let tetrahedron_volume = v0.dot(&v1.cross(&v2)) / 6.0;
                (v0 + v1 + v2) / 4.0 * tetrahedron_volume
            })
            .reduce(Vector3::zeros, |a, b| a + b);

        self.center_of_mass = weighted / self.volume;
    }

    fn compute_inertia(&mut self) {
        // Second moment about the origin by signed tetrahedra, shifted to
        // the center of mass before non-dimensionalization
        let second_moment = self
            .facets
            .par_iter()
            .map(|facet| {
                let v0 = self.vertex(facet, 0);
                let v1 = self.vertex(facet, 1);
                let v2 = self.vertex(facet, 2);
                let tetrahedron_volume = v0.dot(&v1.cross(&v2)) / 6.0;
                let edge_sum = v0 + v1 + v2;

                (edge_sum * edge_sum.transpose()
                    + v0 * v0.transpose()
                    + v1 * v1.transpose()
                    + v2 * v2.transpose())
                    * (tetrahedron_volume / 20.0)
            })
            .reduce(Matrix3::zeros, |a, b| a + b);

        let about_com = second_moment
            - (self.center_of_mass * self.center_of_mass.transpose()) * self.volume;
        let inertia = Matrix3::identity() * about_com.trace() - about_com;

        self.inertia = inertia / self.volume.powf(5.0 / 3.0);
    }

    /// Shifts the control points so that the barycenter lands at the origin.
    pub fn shift_to_barycenter(&mut self) {
        let shift = -self.center_of_mass;
        self.translate(&shift);
        self.update_mass_properties();
    }

    /// Translates every control point.
    pub fn translate(&mut self, shift: &Vector3<f64>) {
        self.control_points
            .iter_mut()
            .for_each(|point| point.coordinates += shift);
        self.update_facets();
    }

    /// Rotates every control point about the origin.
    pub fn rotate(&mut self, rotation: &Matrix3<f64>) {
        self.control_points
            .iter_mut()
            .for_each(|point| point.coordinates = rotation * point.coordinates);
        self.update_facets();
    }

    /// The bounding box of the control points expressed in a rotated frame.
    pub fn bounding_box(&self, rotation: &Matrix3<f64>) -> Aabb {
        let mut aabb = Aabb::empty();
        for point in &self.control_points {
            aabb.grow(&(rotation * point.coordinates));
        }
        aabb
    }

    /// Radius of the sphere centered at the center of mass containing every
    /// control point.
    pub fn circumscribing_radius(&self) -> f64 {
        self.control_points
            .iter()
            .map(|point| (point.coordinates - self.center_of_mass).norm())
            .fold(0.0, f64::max)
    }

    /// The principal axes and moments of the cached inertia tensor.
    ///
    /// Moments are sorted ascending. The axes form a proper rotation
    /// (det = +1) and are disambiguated so the longest extent along each of
    /// the first two principal axes lies on its positive side, applying one
    /// of the four canonical sign corrections.
    pub fn principal_axes(&self) -> (Matrix3<f64>, Vector3<f64>) {
        let eigen = self.inertia.symmetric_eigen();

        // Sort moments ascending, reordering the eigenvectors accordingly
        let mut order = [0usize, 1, 2];
        order.sort_by(|a, b| eigen.eigenvalues[*a].total_cmp(&eigen.eigenvalues[*b]));
        let moments = Vector3::new(
            eigen.eigenvalues[order[0]],
            eigen.eigenvalues[order[1]],
            eigen.eigenvalues[order[2]],
        );
        let mut axes = Matrix3::from_columns(&[
            eigen.eigenvectors.column(order[0]).into_owned(),
            eigen.eigenvectors.column(order[1]).into_owned(),
            eigen.eigenvectors.column(order[2]).into_owned(),
        ]);

        if axes.determinant() < 0.0 {
            axes.column_mut(0).neg_mut();
        }

        // Resolve the remaining sign ambiguity from the bounding box in the
        // candidate frame
        let candidate_box = self.bounding_box(&axes.transpose());
        let positive_0 = candidate_box.max[0].abs() > candidate_box.min[0].abs();
        let positive_1 = candidate_box.max[1].abs() > candidate_box.min[1].abs();

        let correction = match (positive_0, positive_1) {
            (true, true) => Matrix3::identity(),
            (true, false) => Matrix3::from_diagonal(&Vector3::new(1.0, -1.0, -1.0)),
            (false, true) => Matrix3::from_diagonal(&Vector3::new(-1.0, 1.0, -1.0)),
            (false, false) => Matrix3::from_diagonal(&Vector3::new(-1.0, -1.0, 1.0)),
        };

        (axes * correction, moments)
    }

    /// Rotates the model so its principal axes align with the frame axes.
    /// Assumes the barycenter was shifted to the origin; the resulting
    /// inertia tensor is diagonal.
    pub fn align_with_principal_axes(&mut self) {
        self.compute_inertia();
        let (axes, _) = self.principal_axes();
        self.rotate(&axes.transpose());
        self.update_mass_properties();
    }

    /// Builds the KD-tree over the facets.
    pub fn construct_kd_tree(&mut self) {
        self.construct_kd_tree_with_depth(crate::kd_tree::elements::DEFAULT_MAX_DEPTH);
    }

    /// Same as [`ShapeModelTri::construct_kd_tree`] with an explicit
    /// subdivision depth cap.
    pub fn construct_kd_tree_with_depth(&mut self, max_depth: usize) {
        let facets = &self.facets;
        let control_points = &self.control_points;
        self.kd_tree = Some(KdTreeElements::build_with_depth(
            facets.len(),
            |index| {
                facets[index]
                    .vertices
                    .iter()
                    .map(|vertex| control_points[*vertex].coordinates)
                    .collect()
            },
            |index| facets[index].center,
            max_depth,
        ));
    }

    /// Finds the closest facet intersection along the ray, if any, updating
    /// the ray's active range slot and hit bookkeeping.
    pub fn ray_trace(&self, ray: &mut Ray) -> Option<RayHit> {
        let mut best: Option<RayHit> = None;

        let test_facet = |index: usize, ray: &mut Ray, best: &mut Option<RayHit>| {
            let facet = &self.facets[index];
            if let Some((t, u, v)) = ray_triangle_intersect(
                &ray.origin,
                &ray.direction,
                &self.vertex(facet, 0),
                &self.vertex(facet, 1),
                &self.vertex(facet, 2),
            ) {
                if t < ray.range() {
                    ray.set_range(t);
                    ray.hit_element = Some(index);
                    *best = Some(RayHit {
                        facet: index,
                        range: t,
                        u,
                        v,
                    });
                    return true;
                }
            }
            false
        };

        match self.kd_tree.as_ref() {
            Some(tree) => {
                tree.traverse(ray, &mut |index, ray| test_facet(index, ray, &mut best));
            }
            None => {
                for index in 0..self.facets.len() {
                    test_facet(index, ray, &mut best);
                }
            }
        }

        best
    }

    /// Whether the point lies inside the closed surface, by the solid-angle
    /// (Gauss flux) test. `tol` guards against points effectively on the
    /// surface being claimed as interior.
    pub fn contains(&self, point: &Vector3<f64>, tol: f64) -> bool {
        let total_solid_angle: f64 = self
            .facets
            .par_iter()
            .map(|facet| {
                let a = self.vertex(facet, 0) - point;
                let b = self.vertex(facet, 1) - point;
                let c = self.vertex(facet, 2) - point;

                let numerator = a.dot(&b.cross(&c));
                let denominator = a.norm() * b.norm() * c.norm()
                    + a.dot(&b) * c.norm()
                    + b.dot(&c) * a.norm()
                    + c.dot(&a) * b.norm();
                2.0 * numerator.atan2(denominator)
            })
            .sum();

        total_solid_angle.abs() / (4.0 * std::f64::consts::PI) > 0.5 + tol
    }

    fn edge_key(a: usize, b: usize) -> (usize, usize) {
        (a.min(b), a.max(b))
    }

    /// Subdivides a facet into its four midpoint children and splits each of
    /// the three neighboring facets in two, adding 3 vertices and a net 10
    /// facets while keeping the surface closed.
    ///
    /// # Arguments
    /// * `facet_index`: The facet to split; its index is reused by one of
    ///   the children.
    /// * `seen_facets`: Set of currently-seen facet indices, edited so that
    ///   it stays valid across the topology change.
    pub fn split_facet(
        &mut self,
        facet_index: usize,
        seen_facets: &mut HashSet<usize>,
    ) -> Result<(), ShapeModelError> {
        let [a, b, c] = self.facets[facet_index].vertices;

        // Locate the neighbors before any mutation
        let mut neighbors = [0usize; 3];
        for (slot, (u, v)) in [(a, b), (b, c), (c, a)].into_iter().enumerate() {
            neighbors[slot] = self
                .facets
                .iter()
                .enumerate()
                .find(|(index, facet)| {
                    *index != facet_index
                        && facet.vertices.contains(&u)
                        && facet.vertices.contains(&v)
                })
                .map(|(index, _)| index)
                .ok_or(ShapeModelError::OpenEdge { facet: facet_index })?;
        }

        // Midpoint vertices
        let midpoint = |u: usize, v: usize| {
            (self.control_points[u].coordinates + self.control_points[v].coordinates) / 2.0
        };
        let (midpoint_ab, midpoint_bc, midpoint_ca) =
            (midpoint(a, b), midpoint(b, c), midpoint(c, a));
        let m_ab = self.push_control_point(midpoint_ab);
        let m_bc = self.push_control_point(midpoint_bc);
        let m_ca = self.push_control_point(midpoint_ca);

        let mut new_indices = Vec::with_capacity(10);

        // The split facet becomes four children; its slot is reused
        self.facets[facet_index].vertices = [m_ab, m_bc, m_ca];
        new_indices.push(facet_index);
        for vertices in [[a, m_ab, m_ca], [m_ab, b, m_bc], [m_ca, m_bc, c]] {
            new_indices.push(self.push_facet(vertices));
        }

        // Each neighbor across (u, v) splits in two through the midpoint
        for (slot, (u, v, midpoint_index)) in
            [(a, b, m_ab), (b, c, m_bc), (c, a, m_ca)].into_iter().enumerate()
        {
            let neighbor_index = neighbors[slot];

            // Keep the neighbor's winding: one half replaces v with the
            // midpoint in place, the other half replaces u
            let mut first = self.facets[neighbor_index].vertices;
            let mut second = self.facets[neighbor_index].vertices;
            for vertex in first.iter_mut() {
                if *vertex == v {
                    *vertex = midpoint_index;
                }
            }
            for vertex in second.iter_mut() {
                if *vertex == u {
                    *vertex = midpoint_index;
                }
            }

            self.facets[neighbor_index].vertices = first;
            new_indices.push(neighbor_index);
            new_indices.push(self.push_facet(second));

            seen_facets.remove(&neighbor_index);
        }

        seen_facets.remove(&facet_index);
        seen_facets.extend(new_indices.iter().copied());

        self.update_facets();
        self.update_mass_properties();
        Ok(())
    }

    fn push_control_point(&mut self, coordinates: Vector3<f64>) -> usize {
        self.control_points.push(ControlPoint::new(coordinates));
        self.control_points.len() - 1
    }

    fn push_facet(&mut self, vertices: [usize; 3]) -> usize {
        self.facets.push(Facet {
            vertices,
            normal: Vector3::zeros(),
            area: 0.0,
            center: Vector3::zeros(),
        });
        self.facets.len() - 1
    }

    /// Collapses a facet along the edge opposite its smallest angle, when
    /// that angle falls below `minimum_angle` (radians). The two edge
    /// vertices merge at their midpoint and the facets sharing the collapsed
    /// edge disappear.
    ///
    /// The collapse is rejected (returning `false`) when it would flip any
    /// surviving facet's normal.
    ///
    /// # Arguments
    /// * `minimum_angle`: Collapse threshold on the facet's smallest angle.
    /// * `facet_index`: The shrunk facet.
    /// * `seen_facets`: Set of currently-seen facet indices, remapped across
    ///   the removal.
    ///
    /// # Returns
    /// `true` if the facet was recycled.
    pub fn merge_shrunk_facet(
        &mut self,
        minimum_angle: f64,
        facet_index: usize,
        seen_facets: &mut HashSet<usize>,
    ) -> bool {
        let [a, b, c] = self.facets[facet_index].vertices;
        let positions = [
            self.control_points[a].coordinates,
            self.control_points[b].coordinates,
            self.control_points[c].coordinates,
        ];

        // The angle at each corner; the smallest angle faces the shortest
        // opposite edge
        let angle_at = |corner: usize| {
            let u = positions[(corner + 1) % 3] - positions[corner];
            let v = positions[(corner + 2) % 3] - positions[corner];
            (u.dot(&v) / (u.norm() * v.norm())).clamp(-1.0, 1.0).acos()
        };
        let angles = [angle_at(0), angle_at(1), angle_at(2)];
        let smallest = (0..3)
            .min_by(|x, y| angles[*x].total_cmp(&angles[*y]))
            .unwrap_or(0);
        if angles[smallest] >= minimum_angle {
            return false;
        }

        // The edge opposite the smallest angle joins the other two corners
        let vertices = [a, b, c];
        let keep = vertices[(smallest + 1) % 3];
        let drop = vertices[(smallest + 2) % 3];

        // Snapshot for rollback
        let saved_points = self.control_points.clone();
        let saved_facets = self.facets.clone();

        let merged_position = (self.control_points[keep].coordinates
            + self.control_points[drop].coordinates)
            / 2.0;
        self.control_points[keep].coordinates = merged_position;

        // Remap the dropped vertex and delete facets that degenerate
        let old_normals: Vec<(Vector3<f64>, [usize; 3])> = self
            .facets
            .iter()
            .map(|facet| (facet.normal, facet.vertices))
            .collect();

        for facet in self.facets.iter_mut() {
            for vertex in facet.vertices.iter_mut() {
                if *vertex == drop {
                    *vertex = keep;
                }
            }
        }

        let mut dying = self
            .facets
            .iter()
            .enumerate()
            .filter(|(_, facet)| {
                facet.vertices[0] == facet.vertices[1]
                    || facet.vertices[1] == facet.vertices[2]
                    || facet.vertices[2] == facet.vertices[0]
            })
            .map(|(index, _)| index)
            .collect::<Vec<_>>();

        self.update_facets();

        // A surviving facet whose normal flipped marks a spurious collapse
        let flipped = self
            .facets
            .iter()
            .zip(old_normals.iter())
            .enumerate()
            .any(|(index, (facet, (old_normal, old_vertices)))| {
                !dying.contains(&index)
                    && old_vertices.iter().any(|vertex| *vertex == drop || *vertex == keep)
                    && facet.normal.dot(old_normal) < 0.0
            });
        if flipped {
            self.control_points = saved_points;
            self.facets = saved_facets;
            self.kd_tree = None;
            return false;
        }

        // Remove the dead facets back-to-front, keeping seen_facets indices
        // valid across the swap-removes
        dying.sort_unstable_by(|x, y| y.cmp(x));
        for dead in dying {
            let last = self.facets.len() - 1;
            seen_facets.remove(&dead);
            self.facets.swap_remove(dead);
            if dead != last && seen_facets.remove(&last) {
                seen_facets.insert(dead);
            }
        }

        self.update_facets();
        self.update_mass_properties();
        true
    }
}
