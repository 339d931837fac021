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

use std::path::Path;

use nalgebra::{DVector, Matrix3, Matrix6, SMatrix, Vector3, Vector6};

use aster_algorithms::{
    attitude::{BatchAttitude, BatchAttitudeConfig, BatchAttitudeError, BatchAttitudeSolution},
    bezier::{uncertainty::InertiaStatistics, BezierShapeError, ShapeModelBezier},
    bundle_adjustment::{
        BundleAdjuster, BundleAdjusterConfig, BundleAdjusterError, BundleAdjustment,
    },
    features,
    icp::{self, IcpError},
    iod::{self, IodConfig, IodError, IodFinder, KeplerianElements},
    point_clouds::{PointCloud, PointCloudIoError},
    shape::{ShapeModelError, ShapeModelTri},
    types::{mrp, CancelToken, RigidTransform},
};
use thiserror::Error;

mod artifacts;
mod builder;
mod config;

pub use artifacts::write_state_history;
pub use builder::{EmptyShapeBuilderBuilder, ShapeBuilderBuilder};
pub use config::{LidarSpec, ShapeBuilderConfig};

/// Errors of the reconstruction pipeline. Recoverable component failures
/// are logged and skipped; these are the fatal ones.
#[derive(Debug, Error)]
pub enum ShapeBuilderError {
    /// The run was started without any ingested flash.
    #[error("no flashes were ingested before the run")]
    NoFlashes,
    /// Cooperative abort; ingested state stays consistent.
    #[error("shape reconstruction cancelled")]
    Cancelled,
    /// The a-priori mesh was unusable.
    #[error(transparent)]
    ShapeModel(#[from] ShapeModelError),
    /// Lifting or exporting the Bezier shape failed.
    #[error(transparent)]
    BezierShape(#[from] BezierShapeError),
    /// Persisting a point-cloud artifact failed.
    #[error(transparent)]
    PointCloudIo(#[from] PointCloudIoError),
    /// Artifact persistence failed.
    #[error("artifact io failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything a completed run produces.
pub struct ShapeBuilderOutput {
    /// Absolute rigid transform per cloud with respect to cloud 0, after
    /// pre-alignment and bundle adjustment.
    pub transforms: Vec<RigidTransform>,
    /// The bundle-adjustment result, when it ran.
    pub bundle_adjustment: Option<BundleAdjustment>,
    /// The batch attitude solution, when enough clouds were available.
    pub attitude: Option<BatchAttitudeSolution>,
    /// The initial-orbit estimate, when enough transforms were available.
    pub orbit: Option<KeplerianElements>,
    /// All registered clouds merged under the retention budget; the input
    /// of any downstream surface fitting.
    pub merged_cloud: PointCloud,
    /// The lifted Bezier shape model.
    pub shape: ShapeModelBezier,
    /// Standard deviation of the shape volume.
    pub volume_standard_deviation: f64,
    /// 3×3 covariance of the center of mass.
    pub center_of_mass_covariance: Matrix3<f64>,
    /// Spectral statistics of the inertia tensor.
    pub inertia_statistics: InertiaStatistics,
}

impl ShapeBuilderOutput {
    /// Persists the run artifacts under `directory`: the connectivity
    /// matrices, the attitude state histories, and the shape in both the
    /// sampled OBJ and the `.b` control-net formats.
    pub fn save_artifacts(&self, directory: impl AsRef<Path>) -> Result<(), ShapeBuilderError> {
        let directory = directory.as_ref();

        if let Some(bundle_adjustment) = &self.bundle_adjustment {
            bundle_adjustment
                .connectivity
                .save(directory, "connectivity")?;
        }

        if let Some(attitude) = &self.attitude {
            let states = attitude
                .state_history
                .iter()
                .zip(&attitude.covariance_history)
                .map(|(state, covariance)| {
                    // 12-column rows: the state and its covariance diagonal
                    let mut row = DVector::zeros(12);
                    row.fixed_rows_mut::<6>(0).copy_from(state);
                    for index in 0..6 {
                        row[6 + index] = covariance[(index, index)];
                    }
                    row
                })
                .collect::<Vec<_>>();
            write_state_history(directory.join("attitude_history.txt"), &states)?;
        }

        self.merged_cloud
            .save(directory.join("merged_cloud.txt"), None)?;

        self.shape.save_to_obj(directory.join("shape_sampled.obj"))?;
        self.shape.save(directory.join("shape_control_net.b"))?;

        Ok(())
    }
}

/// Drives the estimation engine across a run: per-flash clouds in, then
/// registration, bundle adjustment, attitude and orbit estimation, and the
/// Bezier lifting with uncertainty, in that order.
///
/// Flashes arrive through [`ShapeBuilder::ingest_flash`]; each new cloud is
/// annotated with feature descriptors and pre-aligned against the previous
/// one by ICP, so the stored sequence lives in the frame of cloud 0.
pub struct ShapeBuilder {
    config: ShapeBuilderConfig,
    clouds: Vec<PointCloud>,
    times: Vec<f64>,
    transforms: Vec<RigidTransform>,
}

impl ShapeBuilder {
    /// Returns the typestate builder.
    pub fn builder() -> EmptyShapeBuilderBuilder {
        EmptyShapeBuilderBuilder::default()
    }

    pub(crate) fn new(config: ShapeBuilderConfig) -> Self {
        Self {
            config,
            clouds: Vec::new(),
            times: Vec::new(),
            transforms: Vec::new(),
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &ShapeBuilderConfig {
        &self.config
    }

    /// The ingested clouds, in the frame of cloud 0.
    pub fn clouds(&self) -> &[PointCloud] {
        &self.clouds
    }

    /// The current absolute transform per cloud.
    pub fn transforms(&self) -> &[RigidTransform] {
        &self.transforms
    }

    /// Ingests one flash: annotates the cloud with FPFH descriptors,
    /// suppresses common features, pre-aligns it against the previous cloud
    /// by ICP and stores it in the frame of cloud 0.
    ///
    /// # Arguments
    /// * `time`: Acquisition time of the flash.
    /// * `cloud`: The flash point cloud, in the instrument frame.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument("Ingest Flash", skip_all, level = "info")
    )]
    pub fn ingest_flash(&mut self, time: f64, mut cloud: PointCloud) {
        cloud.build_kdtree();
        features::compute_fpfh(&mut cloud, self.config.feature_neighborhood);
        if self.config.common_feature_beta > 0.0 {
            features::disable_common_features(&mut cloud, self.config.common_feature_beta);
        }

        let index = self.clouds.len();
        if index == 0 {
            self.transforms.push(RigidTransform::identity(time, 0));
        } else {
            // The previous cloud already lives in the frame of cloud 0, so
            // this single registration yields the absolute pose
            let previous_pose = &self.transforms[index - 1];
            let initial = Some((previous_pose.rotation, previous_pose.translation));

            let (rotation, translation) =
                match icp::icp(&cloud, &self.clouds[index - 1], initial, &self.config.icp) {
                    Ok(success) => {
                        log::info!(
                            "Flash {index} registered: {} pairs, rms {:.3e}",
                            success.accepted_pairs,
                            success.residual_rms
                        );
                        (success.rotation, success.translation)
                    }
                    Err(
                        IcpError::ConvergenceFailed { last, .. } | IcpError::Diverged { last },
                    ) => {
                        log::warn!("Flash {index} registration kept its last consistent pose");
                        (last.rotation, last.translation)
                    }
                    Err(error) => {
                        log::warn!("Flash {index} registration failed: {error}");
                        (previous_pose.rotation, previous_pose.translation)
                    }
                };

            cloud.transform(&rotation, &translation);
            cloud.build_kdtree();

            // Record the surviving correspondences on both clouds
            let pairs = icp::compute_pairs(
                &cloud,
                &self.clouds[index - 1],
                0,
                self.config.icp.rejection_multiplier(),
            );
            if let Some(previous) = self.clouds.last_mut() {
                icp::record_pairs(&mut cloud, previous, &pairs);
            }

            self.transforms.push(RigidTransform {
                t_start: self.times[0],
                t_end: time,
                index_start: 0,
                index_end: index,
                rotation,
                translation,
            });
        }

        self.times.push(time);
        self.clouds.push(cloud);
    }

    /// Runs the estimation pipeline over the ingested flashes.
    ///
    /// # Arguments
    /// * `apriori`: The a-priori triangular mesh the Bezier shape is lifted
    ///   from (produced upstream, outside this crate).
    /// * `mrps_ln`: Optional lidar-to-inertial attitude (MRP) per flash;
    ///   identity when absent.
    /// * `cancel`: Cooperative cancellation, checked between stages.
    ///
    /// # Returns
    /// The refined transforms, the per-component estimates that could be
    /// produced, and the lifted shape with its uncertainty statistics.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument("Shape Reconstruction Run", skip_all, level = "info")
    )]
    pub fn run(
        &mut self,
        apriori: &ShapeModelTri,
        mrps_ln: Option<&[Vector3<f64>]>,
        cancel: &CancelToken,
    ) -> Result<ShapeBuilderOutput, ShapeBuilderError> {
        let cloud_count = self.clouds.len();
        if cloud_count == 0 {
            return Err(ShapeBuilderError::NoFlashes);
        }

        // Bundle adjustment over the pre-aligned sequence
        let mut bundle_adjustment = None;
        if self.config.use_ba {
            if cancel.is_cancelled() {
                return Err(ShapeBuilderError::Cancelled);
            }

            let ba_config = BundleAdjusterConfig::builder()
                .with_iterations(self.config.n_iter_bundle_adjustment)
                .with_loop_closure(self.config.look_for_closure)
                .with_ridge_coef(self.config.ridge_coef)
                .build();

            match BundleAdjuster::new(ba_config).run(&mut self.clouds, &self.times, cancel) {
                Ok(result) => {
                    self.apply_deviations(&result);
                    bundle_adjustment = Some(result);
                }
                Err(BundleAdjusterError::Cancelled { partial }) => {
                    self.apply_deviations(&partial);
                    return Err(ShapeBuilderError::Cancelled);
                }
            }
        }

        // Batch attitude over the absolute rotations
        let mut attitude = None;
        if cloud_count >= 2 {
            if cancel.is_cancelled() {
                return Err(ShapeBuilderError::Cancelled);
            }
            match self.estimate_attitude(apriori, mrps_ln, cancel) {
                Ok(solution) => attitude = Some(solution),
                Err(BatchAttitudeError::Cancelled) => return Err(ShapeBuilderError::Cancelled),
                Err(error) => log::warn!("Batch attitude skipped: {error}"),
            }
        }

        // Initial orbit from the translational parts
        let mut orbit = None;
        if cloud_count >= 3 {
            if cancel.is_cancelled() {
                return Err(ShapeBuilderError::Cancelled);
            }
            let finder = IodFinder::new(
                self.transforms[1..].to_vec(),
                IodConfig {
                    particles: self.config.iod_particles,
                    iterations: self.config.iod_iterations,
                    seed: self.config.iod_seed,
                    ..Default::default()
                },
            );
            match finder.run(None, cancel) {
                Ok(elements) => orbit = Some(elements),
                Err(IodError::Cancelled) => return Err(ShapeBuilderError::Cancelled),
                Err(error) => log::warn!("Initial orbit determination skipped: {error}"),
            }
        }

        // The registered clouds combined under the retention budget feed
        // any downstream surface fit
        let merged_cloud = PointCloud::merged(
            "merged",
            &self.clouds.iter().collect::<Vec<_>>(),
            self.config.points_retained,
        );

        // Bezier lifting with uncertainty
        if cancel.is_cancelled() {
            return Err(ShapeBuilderError::Cancelled);
        }
        let mut shape =
            ShapeModelBezier::from_triangular(apriori, self.config.shape_degree, "E")?;

        // Control-point noise from the instrument figures; a zero baseline
        // under proportional-only mode stays zero
        let surface_sd = self.config.lidar.los_noise_sd_baseline
            * (1.0 + self.config.lidar.los_noise_fraction);
        shape.set_uniform_control_point_covariance(Matrix3::identity() * surface_sd * surface_sd);
        shape.construct_kd_tree_with_depth(self.config.max_kd_tree_depth);
        shape.update_mass_properties();

        let volume_standard_deviation = shape.volume_standard_deviation();
        let center_of_mass_covariance = shape.center_of_mass_covariance();
        let inertia_statistics = shape.inertia_statistics();

        log::info!(
            "Shape lifted at degree {}: volume {:.6e} (sd {:.3e})",
            self.config.shape_degree,
            shape.volume(),
            volume_standard_deviation
        );

        Ok(ShapeBuilderOutput {
            transforms: self.transforms.clone(),
            bundle_adjustment,
            attitude,
            orbit,
            merged_cloud,
            shape,
            volume_standard_deviation,
            center_of_mass_covariance,
            inertia_statistics,
        })
    }

    /// Folds the BA deviations into the stored absolute transforms.
    fn apply_deviations(&mut self, adjustment: &BundleAdjustment) {
        for (transform, deviation) in self.transforms.iter_mut().zip(&adjustment.deviations) {
            *transform = deviation.compose(transform);
        }
    }

    fn estimate_attitude(
        &self,
        apriori: &ShapeModelTri,
        mrps_ln: Option<&[Vector3<f64>]>,
        cancel: &CancelToken,
    ) -> Result<BatchAttitudeSolution, BatchAttitudeError> {
        let rotations = self
            .transforms
            .iter()
            .map(|transform| transform.rotation)
            .collect::<Vec<_>>();
        let mrps_ln = mrps_ln
            .map(<[Vector3<f64>]>::to_vec)
            .unwrap_or_else(|| vec![Vector3::zeros(); self.transforms.len()]);

        // Transform measurement covariances through the relative-pose
        // Jacobians, inflated by the configured process noise
        let pose_sd = self.config.lidar.los_noise_sd_baseline.max(1e-6);
        let p_vtilde = SMatrix::<f64, 12, 12>::identity() * pose_sd * pose_sd;
        let mut process_noise = Matrix6::zeros();
        process_noise
            .fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&(Matrix3::identity() * self.config.process_noise_sigma_vel.powi(2)));
        process_noise.fixed_view_mut::<3, 3>(3, 3).copy_from(
            &(Matrix3::identity() * self.config.process_noise_sigma_omega.powi(2)),
        );

        let covariances = (0..self.transforms.len())
            .map(|k| {
                let current = &self.transforms[k];
                let previous = &self.transforms[k.saturating_sub(1)];
                let ln_k = mrp::mrp_to_dcm(&mrps_ln[k]);
                let ln_km1 = mrp::mrp_to_dcm(&mrps_ln[k.saturating_sub(1)]);
                iod::compute_p_iprime(
                    &p_vtilde,
                    &current.rotation,
                    &current.translation,
                    &previous.rotation,
                    &previous.translation,
                    &ln_k,
                    &ln_km1,
                ) + process_noise
                    + Matrix6::identity() * 1e-12
            })
            .collect::<Vec<_>>();

        // Spin-rate seed from the first relative rotation, through its
        // principal rotation vector
        let omega_guess = if self.transforms.len() > 1 {
            let sigma = mrp::dcm_to_mrp(&self.transforms[1].rotation);
            let dt = self.times[1] - self.times[0];
            let angle = 4.0 * sigma.norm().atan();
            if sigma.norm() > 0.0 && dt > 0.0 {
                sigma.normalize() * (angle / dt)
            } else {
                Vector3::zeros()
            }
        } else {
            Vector3::zeros()
        };

        let mut estimator = BatchAttitude::new(&self.times, &rotations);
        estimator.set_inertia_estimate(apriori.inertia());
        let mut initial = Vector6::zeros();
        initial.fixed_rows_mut::<3>(3).copy_from(&omega_guess);
        estimator.set_a_priori_state(initial);
        estimator.set_config(BatchAttitudeConfig {
            n_iterations: self.config.attitude_iterations,
            ..Default::default()
        });

        estimator.run(&covariances, &mrps_ln, cancel)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use aster_algorithms::point_clouds::PointNormal;

    use super::*;

    fn ellipsoid_cloud(label: &str, rows: usize, cols: usize) -> PointCloud {
        let (a, b, c) = (1.0, 0.7, 0.4);
        let mut cloud = PointCloud::new(label);
        for i in 0..rows {
            let theta = std::f64::consts::PI * (i as f64 + 0.5) / rows as f64;
            for j in 0..cols {
                let phi = 2.0 * std::f64::consts::PI * j as f64 / cols as f64;
                let position = Vector3::new(
                    a * theta.sin() * phi.cos(),
                    b * theta.sin() * phi.sin(),
                    c * theta.cos(),
                );
                let normal = Vector3::new(
                    position.x / (a * a),
                    position.y / (b * b),
                    position.z / (c * c),
                )
                .normalize();
                cloud.push(PointNormal::new(position, normal));
            }
        }
        cloud
    }

    fn apriori_mesh() -> ShapeModelTri {
        // A coarse ellipsoid mesh standing in for the upstream surface
        // reconstruction
        let mut builder_cloud = Vec::new();
        let mut facets = Vec::new();
        let rows = 8;
        let cols = 10;
        builder_cloud.push(Vector3::new(0.0, 0.0, 0.4));
        builder_cloud.push(Vector3::new(0.0, 0.0, -0.4));
        for ring in 1..rows {
            let theta = std::f64::consts::PI * ring as f64 / rows as f64;
            for step in 0..cols {
                let phi = 2.0 * std::f64::consts::PI * step as f64 / cols as f64;
                builder_cloud.push(Vector3::new(
                    theta.sin() * phi.cos(),
                    0.7 * theta.sin() * phi.sin(),
                    0.4 * theta.cos(),
                ));
            }
        }
        let ring_vertex = |ring: usize, step: usize| 2 + (ring - 1) * cols + (step % cols);
        for step in 0..cols {
            facets.push([0, ring_vertex(1, step), ring_vertex(1, step + 1)]);
        }
        for ring in 1..rows - 1 {
            for step in 0..cols {
                let a = ring_vertex(ring, step);
                let b = ring_vertex(ring + 1, step);
                let c = ring_vertex(ring + 1, step + 1);
                let d = ring_vertex(ring, step + 1);
                facets.push([a, b, c]);
                facets.push([a, c, d]);
            }
        }
        for step in 0..cols {
            facets.push([1, ring_vertex(rows - 1, step + 1), ring_vertex(rows - 1, step)]);
        }
        ShapeModelTri::new(builder_cloud, facets, "B").unwrap()
    }

    fn quick_builder() -> ShapeBuilder {
        ShapeBuilder::builder()
            .with_lidar(LidarSpec {
                los_noise_sd_baseline: 1e-2,
                ..Default::default()
            })
            .with_shape_degree(2)
            .with_ba_iterations(5)
            .with_icp_configuration(
                aster_algorithms::icp::IcpConfiguration::builder()
                    .with_max_iterations(200)
                    .with_convergence_threshold(1e-10)
                    .build(),
            )
            .with_iod_particles(50)
            .with_iod_iterations(20)
            .build()
    }

    #[test]
    fn test_single_flash_identity_run() {
        let mut builder = quick_builder();
        builder.ingest_flash(0.0, ellipsoid_cloud("00", 16, 16));

        let output = builder
            .run(&apriori_mesh(), None, &CancelToken::new())
            .unwrap();

        // An empty system: one identity transform, no attitude, no orbit
        assert_eq!(output.transforms.len(), 1);
        assert_abs_diff_eq!(
            output.transforms[0].rotation,
            Matrix3::identity(),
            epsilon = 1e-15
        );
        assert!(output.attitude.is_none());
        assert!(output.orbit.is_none());
        assert!(output.bundle_adjustment.is_some());
        assert!(output.volume_standard_deviation > 0.0);
    }

    #[test]
    fn test_two_flash_registration() {
        let mut builder = quick_builder();

        let rotation = mrp::mrp_to_dcm(&Vector3::new(
            0.0,
            0.0,
            (30.0f64.to_radians() / 4.0).tan(),
        ));
        let translation = Vector3::new(1.0, 0.0, 0.0);

        let cloud_a = ellipsoid_cloud("00", 32, 32);
        let mut cloud_b = ellipsoid_cloud("01", 32, 32);
        cloud_b.transform(&rotation, &translation);

        builder.ingest_flash(0.0, cloud_a);
        builder.ingest_flash(1.0, cloud_b);

        let output = builder
            .run(&apriori_mesh(), None, &CancelToken::new())
            .unwrap();

        // The recovered pose maps cloud B back into cloud A's frame
        assert_abs_diff_eq!(
            output.transforms[1].rotation,
            rotation.transpose(),
            epsilon = 1e-5
        );
        assert_abs_diff_eq!(
            output.transforms[1].translation,
            -(rotation.transpose() * translation),
            epsilon = 1e-5
        );
        assert!(output
            .bundle_adjustment
            .as_ref()
            .is_some_and(|ba| ba.iterations_completed <= 5));
    }

    #[test]
    fn test_three_flash_pipeline_produces_orbit_and_attitude() {
        let mut builder = quick_builder();

        let step_rotation = mrp::mrp_to_dcm(&Vector3::new(
            0.0,
            0.0,
            (5.0f64.to_radians() / 4.0).tan(),
        ));
        let step_translation = Vector3::new(0.05, 0.02, 0.0);

        let mut current_rotation = Matrix3::identity();
        let mut current_translation = Vector3::zeros();
        for index in 0..3 {
            let mut cloud = ellipsoid_cloud(&format!("{index:02}"), 24, 24);
            cloud.transform(&current_rotation, &current_translation);
            builder.ingest_flash(index as f64 * 10.0, cloud);

            current_rotation = step_rotation * current_rotation;
            current_translation = step_rotation * current_translation + step_translation;
        }

        let output = builder
            .run(&apriori_mesh(), None, &CancelToken::new())
            .unwrap();

        assert!(output.attitude.is_some());
        assert!(output.orbit.is_some());
        assert_eq!(output.transforms.len(), 3);
    }

    #[test]
    fn test_cancellation_before_run() {
        let mut builder = quick_builder();
        builder.ingest_flash(0.0, ellipsoid_cloud("00", 8, 8));
        builder.ingest_flash(1.0, ellipsoid_cloud("01", 8, 8));

        let cancel = CancelToken::new();
        cancel.cancel();
        let result = builder.run(&apriori_mesh(), None, &cancel);
        assert!(matches!(result, Err(ShapeBuilderError::Cancelled)));
    }

    #[test]
    fn test_no_flashes_is_fatal() {
        let mut builder = quick_builder();
        let result = builder.run(&apriori_mesh(), None, &CancelToken::new());
        assert!(matches!(result, Err(ShapeBuilderError::NoFlashes)));
    }

    #[test]
    fn test_artifacts_written() {
        let mut builder = quick_builder();
        builder.ingest_flash(0.0, ellipsoid_cloud("00", 12, 12));
        builder.ingest_flash(1.0, ellipsoid_cloud("01", 12, 12));

        let output = builder
            .run(&apriori_mesh(), None, &CancelToken::new())
            .unwrap();

        let directory =
            std::env::temp_dir().join(format!("aster_artifacts_{}", std::process::id()));
        std::fs::create_dir_all(&directory).unwrap();
        output.save_artifacts(&directory).unwrap();

        assert!(directory.join("connectivity_res.txt").exists());
        assert!(directory.join("merged_cloud.txt").exists());
        assert!(directory.join("shape_sampled.obj").exists());
        assert!(directory.join("shape_control_net.b").exists());

        std::fs::remove_dir_all(&directory).ok();
    }
}
