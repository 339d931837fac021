use std::{
    collections::HashMap,
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use nalgebra::{DMatrix, Matrix3, Vector3};
use rayon::prelude::*;
use thiserror::Error;

use crate::{
    geometry::{ray_triangle_intersect, Ray},
    kd_tree::KdTreeElements,
    shape::{ControlPoint, ShapeModelTri},
};

use super::{lattice_size, tables, BezierPatch, MassPropertyTables};

/// Barycentric sampling resolution used by the surface-area quadrature and
/// the sampled OBJ export.
const SAMPLING_RESOLUTION: usize = 8;

/// Errors of the Bezier shape model.
#[derive(Debug, Error)]
pub enum BezierShapeError {
    /// Degree zero (or otherwise unusable) was requested.
    #[error("unsupported shape degree {degree}")]
    UnsupportedDegree {
        /// The offending degree.
        degree: usize,
    },
    /// Underlying I/O failure.
    #[error("bezier shape io failure: {0}")]
    Io(#[from] std::io::Error),
    /// During Monte-Carlo validation a ray missed every patch.
    #[error("validation ray missed the surface")]
    OutOfDomain,
}

/// A hit of a ray against the Bezier surface.
#[derive(Clone, Copy, Debug)]
pub struct BezierRayHit {
    /// Index of the patch hit.
    pub patch: usize,
    /// Range to the surface point.
    pub range: f64,
    /// Barycentric u at the hit.
    pub u: f64,
    /// Barycentric v at the hit.
    pub v: f64,
}

/// A smooth Bezier-triangulated surface over a shared control-point arena,
/// with polynomial mass properties and analytical uncertainty propagation.
///
/// Constructed from a triangular model by degree elevation: each facet
/// becomes a degree-1 patch, then the whole shape is raised to the working
/// degree. The degree is uniform across the shape.
pub struct ShapeModelBezier {
    control_points: Vec<ControlPoint>,
    patches: Vec<BezierPatch>,
    degree: usize,
    ref_frame_name: String,
    tables: MassPropertyTables,
    info_matrix: DMatrix<f64>,
    kd_tree: Option<KdTreeElements>,
    volume: f64,
    surface_area: f64,
    center_of_mass: Vector3<f64>,
    inertia: Matrix3<f64>,
}

impl ShapeModelBezier {
    /// Lifts a triangular model to a Bezier model of the given degree.
    ///
    /// # Arguments
    /// * `model`: The source polyhedral model; its control points seed the
    ///   arena and every facet becomes a patch.
    /// * `degree`: Target degree, ≥ 1.
    /// * `ref_frame_name`: Reference frame attached to the new model.
    pub fn from_triangular(
        model: &ShapeModelTri,
        degree: usize,
        ref_frame_name: impl Into<String>,
    ) -> Result<Self, BezierShapeError> {
        if degree == 0 {
            return Err(BezierShapeError::UnsupportedDegree { degree });
        }

        let control_points = model.control_points().to_vec();
        let patches = model
            .facets()
            .iter()
            .map(|facet| BezierPatch::from_facet(facet.vertices))
            .collect::<Vec<_>>();

        let mut shape = Self {
            control_points,
            patches,
            degree: 1,
            ref_frame_name: ref_frame_name.into(),
            tables: MassPropertyTables::build(1),
            info_matrix: DMatrix::zeros(0, 0),
            kd_tree: None,
            volume: 0.0,
            surface_area: 0.0,
            center_of_mass: Vector3::zeros(),
            inertia: Matrix3::zeros(),
        };

        while shape.degree < degree {
            shape.elevate_degree(false);
        }

        shape.initialize_info_mat();
        shape.update_mass_properties();
        Ok(shape)
    }

    /// The shape degree.
    pub fn degree(&self) -> usize {
        self.degree
    }

    /// The reference frame name.
    pub fn ref_frame_name(&self) -> &str {
        &self.ref_frame_name
    }

    /// The control-point arena.
    pub fn control_points(&self) -> &[ControlPoint] {
        &self.control_points
    }

    /// Mutable arena access; caches must be refreshed by the caller.
    pub fn control_points_mut(&mut self) -> &mut [ControlPoint] {
        self.kd_tree = None;
        &mut self.control_points
    }

    /// The patches.
    pub fn patches(&self) -> &[BezierPatch] {
        &self.patches
    }

    /// The pre-integrated mass-property tables of the current degree.
    pub fn tables(&self) -> &MassPropertyTables {
        &self.tables
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

    /// The cached non-dimensional inertia tensor about the center of mass.
    pub fn inertia(&self) -> Matrix3<f64> {
        self.inertia
    }

    /// The information matrix over the stacked control-point positions.
    pub fn info_matrix(&self) -> &DMatrix<f64> {
        &self.info_matrix
    }

    /// Mutable access to the information matrix.
    pub fn info_matrix_mut(&mut self) -> &mut DMatrix<f64> {
        &mut self.info_matrix
    }

    /// Resets the information matrix to zeros at the current arena size.
    pub fn initialize_info_mat(&mut self) {
        let size = 3 * self.control_points.len();
        self.info_matrix = DMatrix::zeros(size, size);
    }

    /// Writes the same 3×3 position covariance onto every control point.
    pub fn set_uniform_control_point_covariance(&mut self, covariance: Matrix3<f64>) {
        self.control_points
            .iter_mut()
            .for_each(|point| point.covariance = covariance);
    }

    /// Writes each control point's covariance from the inverse of its 3×3
    /// diagonal block of the information matrix. Blocks that fail to invert
    /// leave the point untouched.
    pub fn apply_control_point_covariances_from_info(&mut self) {
        for index in 0..self.control_points.len() {
            let block = self
                .info_matrix
                .fixed_view::<3, 3>(3 * index, 3 * index)
                .into_owned();
            if let Some(covariance) = block.try_inverse() {
                self.control_points[index].covariance = covariance;
            }
        }
    }

    /// Raises the degree of every patch by one, keeping the surface
    /// pointwise identical. Control points shared between patches stay
    /// shared in the elevated net.
    ///
    /// # Arguments
    /// * `update`: Whether to refresh the mass properties afterwards.
    pub fn elevate_degree(&mut self, update: bool) {
        let old_degree = self.degree;
        let new_degree = old_degree + 1;
        let old_lattice = tables::build_base_index_vector(old_degree);
        let old_index_of: HashMap<[usize; 3], usize> = old_lattice
            .iter()
            .enumerate()
            .map(|(position, triple)| (*triple, position))
            .collect();

        fn intern(
            points: &mut Vec<ControlPoint>,
            dedup: &mut HashMap<[i64; 3], usize>,
            coordinates: Vector3<f64>,
        ) -> usize {
            let key = [
                (coordinates.x * 1e9).round() as i64,
                (coordinates.y * 1e9).round() as i64,
                (coordinates.z * 1e9).round() as i64,
            ];
            *dedup.entry(key).or_insert_with(|| {
                points.push(ControlPoint::new(coordinates));
                points.len() - 1
            })
        }

        let mut new_points: Vec<ControlPoint> = Vec::new();
        let mut dedup: HashMap<[i64; 3], usize> = HashMap::new();
        let mut new_patches = Vec::with_capacity(self.patches.len());
        for patch in &self.patches {
            let old_point = |i: usize, j: usize, k: usize| {
                self.control_points[patch.control_points()[old_index_of[&[i, j, k]]]].coordinates
            };

            let control_points = tables::build_base_index_vector(new_degree)
                .into_iter()
                .map(|[i, j, k]| {
                    // The standard triangular degree-elevation rule
                    let mut elevated = Vector3::zeros();
                    if i > 0 {
                        elevated += old_point(i - 1, j, k) * i as f64;
                    }
                    if j > 0 {
                        elevated += old_point(i, j - 1, k) * j as f64;
                    }
                    if k > 0 {
                        elevated += old_point(i, j, k - 1) * k as f64;
                    }
                    intern(&mut new_points, &mut dedup, elevated / new_degree as f64)
                })
                .collect::<Vec<_>>();

            new_patches.push(BezierPatch::new(new_degree, control_points));
        }

        log::debug!(
            "Elevated shape from degree {old_degree} to {new_degree}: {} control points",
            new_points.len()
        );

        self.control_points = new_points;
        self.patches = new_patches;
        self.degree = new_degree;
        self.tables = MassPropertyTables::build(new_degree);
        self.kd_tree = None;
        self.initialize_info_mat();

        if update {
            self.update_mass_properties();
        }
    }

    /// Recomputes the cached volume, surface area, center of mass and
    /// inertia from the index/coefficient tables.
    pub fn update_mass_properties(&mut self) {
        self.compute_volume();
        self.compute_surface_area();
        self.compute_center_of_mass();
        self.compute_inertia();
    }

    fn patch_coordinates(&self, patch: &BezierPatch) -> Vec<Vector3<f64>> {
        patch
            .control_points()
            .iter()
            .map(|index| self.control_points[*index].coordinates)
            .collect()
    }

    fn compute_volume(&mut self) {
        let tables = &self.tables;
        self.volume = self
            .patches
            .par_iter()
            .map(|patch| {
                let points = self.patch_coordinates(patch);
                tables
                    .volume
                    .iter()
                    .map(|(coef, [a, b, c])| coef * points[*a].dot(&points[*b].cross(&points[*c])))
                    .sum::<f64>()
                    / 3.0
            })
            .sum();
    }

    fn compute_surface_area(&mut self) {
        // Quadrature over a barycentric grid; the area integrand is not
        // polynomial
        let resolution = SAMPLING_RESOLUTION;
        let cell_area = 1.0 / (2.0 * (resolution * resolution) as f64);

        self.surface_area = self
            .patches
            .par_iter()
            .map(|patch| {
                let mut area = 0.0;
                for i in 0..resolution {
                    for j in 0..resolution - i {
                        let u = (i as f64 + 1.0 / 3.0) / resolution as f64;
                        let v = (j as f64 + 1.0 / 3.0) / resolution as f64;
                        let (du, dv) = patch.partials(&self.control_points, u, v);
                        area += du.cross(&dv).norm() * cell_area;

                        if j < resolution - i - 1 {
                            let u = (i as f64 + 2.0 / 3.0) / resolution as f64;
                            let v = (j as f64 + 2.0 / 3.0) / resolution as f64;
                            let (du, dv) = patch.partials(&self.control_points, u, v);
                            area += du.cross(&dv).norm() * cell_area;
                        }
                    }
                }
                area
            })
            .sum();
    }

    fn compute_center_of_mass(&mut self) {
        let tables = &self.tables;
        let gamma = self
            .patches
            .par_iter()
            .map(|patch| {
                let points = self.patch_coordinates(patch);
                let mut gamma = Vector3::zeros();
                for (coef, [a, b, c, d]) in &tables.cm_gamma {
                    let cross = points[*c].cross(&points[*d]);
                    for axis in 0..3 {
                        gamma[axis] += coef * points[*a][axis] * points[*b][axis] * cross[axis];
                    }
                }
                gamma / 2.0
            })
            .reduce(Vector3::zeros, |left, right| left + right);

        self.center_of_mass = gamma / self.volume;
    }

    fn compute_inertia(&mut self) {
        let tables = &self.tables;
        // Second moments about the origin from the quintuple table
        let second_moment = self
            .patches
            .par_iter()
            .map(|patch| {
                let points = self.patch_coordinates(patch);
                let mut moment = Matrix3::zeros();
                for (coef, [a, b, c, d, e]) in &tables.inertia {
                    let cross = points[*d].cross(&points[*e]);
                    for m in 0..3 {
                        let common = coef * points[*a][m] * points[*b][m] * cross[m];
                        // x_m^3/3 flux for the diagonal, x_m^2 x_l/2 for the
                        // off-diagonal terms
                        moment[(m, m)] += common * points[*c][m] / 3.0;
                        for l in 0..3 {
                            if l != m {
                                moment[(m, l)] += common * points[*c][l] / 2.0;
                            }
                        }
                    }
                }
                moment
            })
            .reduce(Matrix3::zeros, |left, right| left + right);

        // Exact symmetry can suffer roundoff across patches
        let symmetric = (second_moment + second_moment.transpose()) / 2.0;
        let about_com = symmetric
            - (self.center_of_mass * self.center_of_mass.transpose()) * self.volume;
        let inertia = Matrix3::identity() * about_com.trace() - about_com;
        self.inertia = inertia / self.volume.powf(5.0 / 3.0);
    }

    /// Builds the KD-tree over the patches; patch bounding boxes come from
    /// the control nets, which enclose the surface.
    pub fn construct_kd_tree(&mut self) {
        self.construct_kd_tree_with_depth(crate::kd_tree::elements::DEFAULT_MAX_DEPTH);
    }

    /// Same as [`ShapeModelBezier::construct_kd_tree`] with an explicit
    /// subdivision depth cap.
    pub fn construct_kd_tree_with_depth(&mut self, max_depth: usize) {
        let patches = &self.patches;
        let control_points = &self.control_points;
        self.kd_tree = Some(KdTreeElements::build_with_depth(
            patches.len(),
            |index| {
                patches[index]
                    .control_points()
                    .iter()
                    .map(|point| control_points[*point].coordinates)
                    .collect()
            },
            |index| patches[index].center(control_points),
            max_depth,
        ));
    }

    /// Casts a ray against the surface: the KD-tree over the triangulated
    /// lower bound proposes patches, the Newton refinement lands on the
    /// smooth surface.
    pub fn ray_trace(&self, ray: &mut Ray) -> Option<BezierRayHit> {
        let mut best: Option<BezierRayHit> = None;

        let mut test_patch = |index: usize, ray: &mut Ray| -> bool {
            let patch = &self.patches[index];
            let [c0, c1, c2] = patch.corners();

            // Triangulated initialization
            let Some((t, u, v)) = ray_triangle_intersect(
                &ray.origin,
                &ray.direction,
                &self.control_points[c0].coordinates,
                &self.control_points[c1].coordinates,
                &self.control_points[c2].coordinates,
            ) else {
                return false;
            };

            // Moller-Trumbore weights (1-u-v, u, v) sit on (c0, c1, c2),
            // which are the patch's (u, v, w) poles
            let initial = (t, 1.0 - u - v, u);
            let Some((range, hit_u, hit_v)) =
                patch.ray_cast(&self.control_points, &ray.origin, &ray.direction, initial)
            else {
                return false;
            };

            if range < ray.range() {
                ray.set_range(range);
                ray.hit_element = Some(index);
                best = Some(BezierRayHit {
                    patch: index,
                    range,
                    u: hit_u,
                    v: hit_v,
                });
                return true;
            }
            false
        };

        match self.kd_tree.as_ref() {
            Some(tree) => {
                tree.traverse(ray, &mut test_patch);
            }
            None => {
                for index in 0..self.patches.len() {
                    test_patch(index, ray);
                }
            }
        }

        best
    }

    /// Saves a sampled triangular representation as a Wavefront OBJ file.
    pub fn save_to_obj(&self, path: impl AsRef<Path>) -> Result<(), BezierShapeError> {
        let mut writer = BufWriter::new(File::create(path)?);
        let resolution = SAMPLING_RESOLUTION;

        let mut vertex_offset = 1usize;
        for patch in &self.patches {
            // Grid samples, then the two triangle families per cell
            let grid_index = |i: usize, j: usize| {
                // Row i holds resolution + 1 - i entries
                let preceding: usize = (0..i).map(|row| resolution + 1 - row).sum();
                preceding + j
            };

            for i in 0..=resolution {
                for j in 0..=resolution - i {
                    let u = i as f64 / resolution as f64;
                    let v = j as f64 / resolution as f64;
                    let point = patch.evaluate(&self.control_points, u, v);
                    writeln!(writer, "v {} {} {}", point.x, point.y, point.z)?;
                }
            }

            for i in 0..resolution {
                for j in 0..resolution - i {
                    let a = vertex_offset + grid_index(i, j);
                    let b = vertex_offset + grid_index(i + 1, j);
                    let c = vertex_offset + grid_index(i, j + 1);
                    writeln!(writer, "f {a} {b} {c}")?;
                    if j < resolution - i - 1 {
                        let d = vertex_offset + grid_index(i + 1, j + 1);
                        writeln!(writer, "f {b} {d} {c}")?;
                    }
                }
            }

            vertex_offset += (0..=resolution).map(|row| resolution + 1 - row).sum::<usize>();
        }

        Ok(())
    }

    /// Saves the Bezier control net in the `.b` format: a `degree
    /// patch_count control_point_count` header, the control points one per
    /// line, then one line of lattice-ordered indices per patch.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), BezierShapeError> {
        let mut writer = BufWriter::new(File::create(path)?);

        writeln!(
            writer,
            "{} {} {}",
            self.degree,
            self.patches.len(),
            self.control_points.len()
        )?;
        for point in &self.control_points {
            writeln!(
                writer,
                "{} {} {}",
                point.coordinates.x, point.coordinates.y, point.coordinates.z
            )?;
        }
        for patch in &self.patches {
            let indices = patch
                .control_points()
                .iter()
                .map(|index| index.to_string())
                .collect::<Vec<_>>()
                .join(" ");
            writeln!(writer, "{indices}")?;
        }

        Ok(())
    }

    /// Shifts the control points so the barycenter lands at the origin.
    pub fn shift_to_barycenter(&mut self) {
        let shift = -self.center_of_mass;
        self.control_points
            .iter_mut()
            .for_each(|point| point.coordinates += shift);
        self.kd_tree = None;
        self.update_mass_properties();
    }

    /// Rotates the model so its principal axes align with the frame axes;
    /// assumes a barycentered model.
    pub fn align_with_principal_axes(&mut self) {
        let eigen = self.inertia.symmetric_eigen();
        let mut order = [0usize, 1, 2];
        order.sort_by(|a, b| eigen.eigenvalues[*a].total_cmp(&eigen.eigenvalues[*b]));
        let mut axes = Matrix3::from_columns(&[
            eigen.eigenvectors.column(order[0]).into_owned(),
            eigen.eigenvectors.column(order[1]).into_owned(),
            eigen.eigenvectors.column(order[2]).into_owned(),
        ]);
        if axes.determinant() < 0.0 {
            axes.column_mut(0).neg_mut();
        }

        let rotation = axes.transpose();
        self.control_points
            .iter_mut()
            .for_each(|point| point.coordinates = rotation * point.coordinates);
        self.kd_tree = None;
        self.update_mass_properties();
    }
}

#[cfg(test)]
mod tests {
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    use crate::testing::{cube_mesh, uv_sphere_mesh};

    use super::*;

    fn tri_cube(edge: f64) -> ShapeModelTri {
        let (vertices, facets) = cube_mesh(edge);
        ShapeModelTri::new(vertices, facets, "B").unwrap()
    }

    #[test]
    fn test_degree_one_matches_triangular_model() {
        let cube = tri_cube(2.0);
        let bezier = ShapeModelBezier::from_triangular(&cube, 1, "E").unwrap();

        assert_relative_eq!(bezier.volume(), cube.volume(), epsilon = 1e-12);
        assert_abs_diff_eq!(bezier.center_of_mass(), cube.center_of_mass(), epsilon = 1e-12);
        assert_relative_eq!(bezier.surface_area(), cube.surface_area(), epsilon = 1e-9);
        assert_abs_diff_eq!(bezier.inertia(), cube.inertia(), epsilon = 1e-11);
    }

    #[test]
    fn test_degree_elevation_preserves_the_surface() {
        let cube = tri_cube(1.0);
        let degree_one = ShapeModelBezier::from_triangular(&cube, 1, "E").unwrap();
        let degree_two = ShapeModelBezier::from_triangular(&cube, 2, "E").unwrap();
        let degree_three = ShapeModelBezier::from_triangular(&cube, 3, "E").unwrap();

        // Elevation is exact: the mass properties must agree to roundoff
        assert_relative_eq!(degree_two.volume(), degree_one.volume(), epsilon = 1e-12);
        assert_relative_eq!(degree_three.volume(), degree_one.volume(), epsilon = 1e-12);
        assert_abs_diff_eq!(
            degree_two.inertia(),
            degree_one.inertia(),
            epsilon = 1e-10
        );
    }

    #[test]
    fn test_degree_elevation_shares_edge_points() {
        let cube = tri_cube(1.0);
        let elevated = ShapeModelBezier::from_triangular(&cube, 2, "E").unwrap();

        // A closed mesh with V vertices and E edges elevates to V + E
        // control points: 8 + 18 for the cube
        assert_eq!(elevated.control_points().len(), 26);
        assert_eq!(elevated.patches().len(), 12);
        assert_eq!(
            elevated.patches()[0].control_points().len(),
            lattice_size(2)
        );
    }

    #[test]
    fn test_ray_trace_smooth_sphere() {
        let (vertices, facets) = uv_sphere_mesh(1.0, 16, 16);
        let tri = ShapeModelTri::new(vertices, facets, "B").unwrap();
        let mut bezier = ShapeModelBezier::from_triangular(&tri, 2, "E").unwrap();
        bezier.construct_kd_tree();

        let mut ray = Ray::new(Vector3::new(0.0, 0.2, 5.0), -Vector3::z());
        let hit = bezier.ray_trace(&mut ray).expect("sphere hit");
        assert!(hit.range > 3.9 && hit.range < 4.2);
        assert_eq!(ray.hit_element, Some(hit.patch));

        let surface = bezier.patches()[hit.patch].evaluate(
            bezier.control_points(),
            hit.u,
            hit.v,
        );
        assert_abs_diff_eq!(
            surface,
            ray.origin + ray.direction * hit.range,
            epsilon = 1e-8
        );

        let mut miss = Ray::new(Vector3::new(3.0, 3.0, 5.0), -Vector3::z());
        assert!(bezier.ray_trace(&mut miss).is_none());
    }

    #[test]
    fn test_rejects_degree_zero() {
        let cube = tri_cube(1.0);
        assert!(matches!(
            ShapeModelBezier::from_triangular(&cube, 0, "E"),
            Err(BezierShapeError::UnsupportedDegree { degree: 0 })
        ));
    }

    #[test]
    fn test_save_formats() {
        let cube = tri_cube(1.0);
        let bezier = ShapeModelBezier::from_triangular(&cube, 2, "E").unwrap();

        let stem = std::env::temp_dir().join(format!("aster_bezier_{}", std::process::id()));
        let b_path = stem.with_extension("b");
        let obj_path = stem.with_extension("obj");

        bezier.save(&b_path).unwrap();
        bezier.save_to_obj(&obj_path).unwrap();

        let header = std::fs::read_to_string(&b_path)
            .unwrap()
            .lines()
            .next()
            .unwrap()
            .to_string();
        assert_eq!(header, "2 12 26");

        let obj = std::fs::read_to_string(&obj_path).unwrap();
        assert!(obj.lines().any(|line| line.starts_with("v ")));
        assert!(obj.lines().any(|line| line.starts_with("f ")));

        std::fs::remove_file(&b_path).ok();
        std::fs::remove_file(&obj_path).ok();
    }

    #[test]
    fn test_info_matrix_covariance_roundtrip() {
        let cube = tri_cube(1.0);
        let mut bezier = ShapeModelBezier::from_triangular(&cube, 2, "E").unwrap();

        let size = 3 * bezier.control_points().len();
        assert_eq!(bezier.info_matrix().nrows(), size);

        // A diagonal information of 1e4 inverts to 1e-4 covariances
        let info = DMatrix::identity(size, size) * 1e4;
        bezier.info_matrix_mut().copy_from(&info);
        bezier.apply_control_point_covariances_from_info();

        for point in bezier.control_points() {
            assert_relative_eq!(point.covariance[(0, 0)], 1e-4, epsilon = 1e-12);
            assert_relative_eq!(point.covariance[(1, 1)], 1e-4, epsilon = 1e-12);
        }
    }
}
