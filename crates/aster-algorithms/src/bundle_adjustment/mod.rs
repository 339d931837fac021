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

use std::collections::BTreeSet;

use nalgebra::{DMatrix, DVector, Vector3};
use rayon::prelude::*;

use crate::{
    icp::{self, IcpConfiguration, IcpError},
    point_clouds::PointCloud,
    types::{mrp, CancelToken, RigidTransform},
};

mod types;
pub use types::{
    BundleAdjusterConfig, BundleAdjusterConfigBuilder, BundleAdjusterError, Connectivity,
    FlyOverMap, PointCloudPair,
};

/// The output of a bundle-adjustment run.
#[derive(Clone, Debug)]
pub struct BundleAdjustment {
    /// Per-cloud correction applied over the run, composed across
    /// iterations; the anchored cloud keeps the identity.
    pub deviations: Vec<RigidTransform>,
    /// Final per-pair diagnostics.
    pub pairs: Vec<PointCloudPair>,
    /// The connectivity artifact built from the final diagnostics.
    pub connectivity: Connectivity,
    /// Iterations fully applied.
    pub iterations_completed: usize,
}

/// Multi-cloud pose refinement over point-to-plane correspondences.
///
/// For Q clouds the state is one rigid transform per non-anchored cloud,
/// 6(Q−1) unknowns in (δx, δσ) blocks; the anchored cloud (index 0 unless
/// configured otherwise) fixes the gauge. Clouds are refined in place: each
/// iteration recomputes correspondences at the current poses, accumulates the
/// per-pair information into a sparse-triplet normal system, solves it by
/// Cholesky and applies the deviations to the clouds.
pub struct BundleAdjuster {
    config: BundleAdjusterConfig,
}

impl BundleAdjuster {
    /// Creates an adjuster with the given configuration.
    pub fn new(config: BundleAdjusterConfig) -> Self {
        Self { config }
    }

    /// Runs the adjustment over the clouds, mutating them in place.
    ///
    /// # Arguments
    /// * `clouds`: The registered clouds, pre-aligned into a common frame;
    ///   KD-trees are rebuilt as poses move.
    /// * `times`: Acquisition time per cloud, used to stamp the returned
    ///   transforms.
    /// * `cancel`: Cooperative cancellation token, checked between
    ///   iterations and between stages inside an iteration.
    ///
    /// # Returns
    /// The per-cloud deviations, pair diagnostics and connectivity artifact.
    /// A cancelled run carries the last consistent state inside the error.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument("Bundle Adjustment", skip_all, level = "info")
    )]
    pub fn run(
        &self,
        clouds: &mut [PointCloud],
        times: &[f64],
        cancel: &CancelToken,
    ) -> Result<BundleAdjustment, BundleAdjusterError> {
        let cloud_count = clouds.len();
        let mut deviations = (0..cloud_count)
            .map(|index| {
                RigidTransform::identity(times.get(index).copied().unwrap_or_default(), index)
            })
            .collect::<Vec<_>>();

        // A single cloud (or none) forms an empty system
        if cloud_count < 2 {
            log::info!("Bundle adjustment over {cloud_count} cloud(s) is an empty system");
            return Ok(BundleAdjustment {
                connectivity: Connectivity::from_pairs(cloud_count, &[]),
                deviations,
                pairs: Vec::new(),
                iterations_completed: 0,
            });
        }

        for cloud in clouds.iter_mut() {
            if !cloud.has_fresh_tree() {
                cloud.build_kdtree();
            }
        }

        log::info!("Creating point cloud pairs");
        let mut pairs = self.create_pairs(clouds);

        // Pre-adjustment residuals for each considered pair
        self.update_point_cloud_pairs(clouds, &mut pairs);

        let mut iterations_completed = 0;
        for iteration in 0..self.config.n_iterations {
            if cancel.is_cancelled() {
                return Err(BundleAdjusterError::Cancelled {
                    partial: Box::new(Self::assemble_output(
                        cloud_count,
                        deviations,
                        pairs,
                        iterations_completed,
                    )),
                });
            }
            log::info!("Iteration: {}/{}", iteration + 1, self.config.n_iterations);

            let state_size = 6 * (cloud_count - 1);
            let mut normal_vector = DVector::<f64>::zeros(state_size);
            let mut triplets: Vec<(usize, usize, f64)> =
                Vec::with_capacity(36 * pairs.len());

            // Per-pair subproblems; the order of accumulation is
            // unspecified, the reduction being associative
            let clouds_snapshot: &[PointCloud] = &*clouds;
            let subproblems = pairs
                .par_iter()
                .map(|pair| {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    Some(self.assemble_subproblem(clouds_snapshot, pair))
                })
                .collect::<Vec<_>>();

            if cancel.is_cancelled() {
                return Err(BundleAdjusterError::Cancelled {
                    partial: Box::new(Self::assemble_output(
                        cloud_count,
                        deviations,
                        pairs,
                        iterations_completed,
                    )),
                });
            }

            for (pair, subproblem) in pairs.iter().zip(subproblems) {
                if let Some((lambda_k, n_k)) = subproblem {
                    self.add_subproblem_to_problem(
                        &mut triplets,
                        &mut normal_vector,
                        &lambda_k,
                        &n_k,
                        pair,
                    );
                }
            }

            let mut lambda = DMatrix::<f64>::zeros(state_size, state_size);
            for (row, col, value) in triplets {
                lambda[(row, col)] += value;
            }
            for diagonal in 0..state_size {
                lambda[(diagonal, diagonal)] += self.config.ridge_coef;
            }

            // The deviation in all of the rigid transforms is computed
            let Some(factorization) = lambda.cholesky() else {
                log::warn!("Normal matrix factorization failed, skipping iteration");
                continue;
            };
            let deviation = factorization.solve(&normal_vector);

            self.apply_deviation(clouds, &deviation, &mut deviations);
            iterations_completed = iteration + 1;

            // The point cloud pairs are updated: their residuals refreshed
            self.update_point_cloud_pairs(clouds, &mut pairs);
        }

        Ok(Self::assemble_output(
            cloud_count,
            deviations,
            pairs,
            iterations_completed,
        ))
    }

    fn assemble_output(
        cloud_count: usize,
        deviations: Vec<RigidTransform>,
        pairs: Vec<PointCloudPair>,
        iterations_completed: usize,
    ) -> BundleAdjustment {
        BundleAdjustment {
            connectivity: Connectivity::from_pairs(cloud_count, &pairs),
            deviations,
            pairs,
            iterations_completed,
        }
    }

    /// Infers the connectivity between the clouds: all sequential pairs,
    /// fly-over pairs when provided, otherwise a single back-scanned loop
    /// closure.
    fn create_pairs(&self, clouds: &[PointCloud]) -> Vec<PointCloudPair> {
        let cloud_count = clouds.len();
        let mut edges = BTreeSet::new();
        for index in 0..cloud_count - 1 {
            edges.insert((index, index + 1));
        }

        let fly_over_pairs = self
            .config
            .fly_over_map
            .as_ref()
            .filter(|map| !map.is_empty());
        if self.config.look_for_closure {
            if let Some(map) = fly_over_pairs {
                for (source, destination) in map.iter() {
                    if destination < cloud_count {
                        log::info!(
                            "Fly-over pair: ({}, {})",
                            clouds[source].label(),
                            clouds[destination].label()
                        );
                        edges.insert((source, destination));
                    }
                }
            }
        }

        let mut pairs = edges
            .into_iter()
            .map(|(source, destination)| {
                self.make_pair_diagnostics(clouds, source, destination, 0)
            })
            .collect::<Vec<_>>();

        // Back-scan: no fly-over knowledge, look for a single closure edge
        // whose acceptance beats the weakest sequential pair
        if self.config.look_for_closure && fly_over_pairs.is_none() && cloud_count > 2 {
            let minimum_overlap = pairs
                .iter()
                .filter(|pair| pair.destination == pair.source + 1)
                .map(|pair| pair.accepted as f64 / pair.attempted.max(1) as f64)
                .min_by(f64::total_cmp)
                .unwrap_or(0.0);

            for candidate in (2..cloud_count).rev() {
                let fraction = match icp::icp(
                    &clouds[candidate],
                    &clouds[0],
                    None,
                    &IcpConfiguration::default(),
                ) {
                    Ok(success) => success.accepted_pairs as f64 / clouds[candidate].size() as f64,
                    Err(IcpError::ConvergenceFailed { last, .. }) => {
                        last.accepted_pairs as f64 / clouds[candidate].size() as f64
                    }
                    Err(_) => continue,
                };

                if fraction > minimum_overlap {
                    log::info!("Back-scan loop closure accepted: (0, {candidate})");
                    pairs.push(self.make_pair_diagnostics(clouds, 0, candidate, 0));
                    break;
                }
            }
        }

        pairs
    }

    fn make_pair_diagnostics(
        &self,
        clouds: &[PointCloud],
        source: usize,
        destination: usize,
        subsample_level: u32,
    ) -> PointCloudPair {
        let stride = 1usize << subsample_level;
        let attempted = clouds[source].size().div_ceil(stride);
        let point_pairs = icp::compute_pairs(
            &clouds[source],
            &clouds[destination],
            subsample_level,
            self.config.rejection_multiplier,
        );

        PointCloudPair {
            source,
            destination,
            attempted,
            accepted: point_pairs.len(),
            residual_rms: icp::compute_rms_residuals(
                &clouds[source],
                &clouds[destination],
                &point_pairs,
            ),
            residual_mean: icp::compute_mean_residuals(
                &clouds[source],
                &clouds[destination],
                &point_pairs,
            )
            .abs(),
        }
    }

    /// Computes the information matrix and normal vector of one pair at the
    /// current poses, at full resolution.
    fn assemble_subproblem(
        &self,
        clouds: &[PointCloud],
        pair: &PointCloudPair,
    ) -> (DMatrix<f64>, DVector<f64>) {
        let ground = self.config.ground_index;
        let (source, destination) = (pair.source, pair.destination);
        let both_states = source != ground && destination != ground;
        let size = if both_states { 12 } else { 6 };

        let point_pairs = icp::compute_pairs(
            &clouds[source],
            &clouds[destination],
            0,
            self.config.rejection_multiplier,
        );

        let mut lambda_k = DMatrix::<f64>::zeros(size, size);
        let mut n_k = DVector::<f64>::zeros(size);
        let mut h_ki = DVector::<f64>::zeros(size);

        for (source_index, dest_index) in point_pairs {
            let source_position = clouds[source][source_index].position;
            let dest_position = clouds[destination][dest_index].position;
            let normal = clouds[destination][dest_index].normal;

            let residual =
                icp::compute_normal_distance(&source_position, &dest_position, &normal);

            let source_rotation_block = mrp::dg_dsigma_multiplicative(&source_position, &normal);
            let dest_rotation_block = ((-normal.transpose()) * mrp::tilde(&dest_position)
                + (source_position - dest_position).transpose() * mrp::tilde(&normal))
                * 4.0;

            if both_states {
                h_ki.fixed_rows_mut::<3>(0).copy_from(&normal);
                h_ki.fixed_rows_mut::<3>(3)
                    .copy_from(&source_rotation_block.transpose());
                h_ki.fixed_rows_mut::<3>(6).copy_from(&(-normal));
                h_ki.fixed_rows_mut::<3>(9)
                    .copy_from(&dest_rotation_block.transpose());
            } else if source != ground {
                h_ki.fixed_rows_mut::<3>(0).copy_from(&normal);
                h_ki.fixed_rows_mut::<3>(3)
                    .copy_from(&source_rotation_block.transpose());
            } else {
                h_ki.fixed_rows_mut::<3>(0).copy_from(&(-normal));
                h_ki.fixed_rows_mut::<3>(3)
                    .copy_from(&dest_rotation_block.transpose());
            }

            // epsilon = y - Hx
            h_ki.neg_mut();

            lambda_k += &h_ki * h_ki.transpose();
            n_k += &h_ki * residual;
        }

        (lambda_k, n_k)
    }

    fn state_offset(&self, cloud_index: usize) -> usize {
        if cloud_index > self.config.ground_index {
            6 * (cloud_index - 1)
        } else {
            6 * cloud_index
        }
    }

    /// Scatters one pair's subproblem into the global triplet buffer and
    /// normal vector, skipping the anchored sub-state.
    fn add_subproblem_to_problem(
        &self,
        triplets: &mut Vec<(usize, usize, f64)>,
        normal_vector: &mut DVector<f64>,
        lambda_k: &DMatrix<f64>,
        n_k: &DVector<f64>,
        pair: &PointCloudPair,
    ) {
        let ground = self.config.ground_index;
        let (source, destination) = (pair.source, pair.destination);
        let offset_source = self.state_offset(source);
        let offset_destination = self.state_offset(destination);

        if source != ground && destination != ground {
            for i in 0..6 {
                for j in 0..6 {
                    triplets.push((offset_source + i, offset_source + j, lambda_k[(i, j)]));
                    triplets.push((
                        offset_destination + i,
                        offset_destination + j,
                        lambda_k[(i + 6, j + 6)],
                    ));
                    // Cross-correlations between the two sub-states
                    triplets.push((offset_source + i, offset_destination + j, lambda_k[(i, j + 6)]));
                    triplets.push((offset_destination + i, offset_source + j, lambda_k[(i + 6, j)]));
                }
                normal_vector[offset_source + i] += n_k[i];
                normal_vector[offset_destination + i] += n_k[i + 6];
            }
        } else {
            let offset = if source != ground {
                offset_source
            } else {
                offset_destination
            };
            for i in 0..6 {
                for j in 0..6 {
                    triplets.push((offset + i, offset + j, lambda_k[(i, j)]));
                }
                normal_vector[offset + i] += n_k[i];
            }
        }
    }

    /// Applies the solved deviation to every non-anchored cloud and composes
    /// it into the running per-cloud corrections.
    fn apply_deviation(
        &self,
        clouds: &mut [PointCloud],
        deviation: &DVector<f64>,
        deviations: &mut [RigidTransform],
    ) {
        let ground = self.config.ground_index;

        for index in 0..clouds.len() {
            if index == ground {
                continue;
            }
            let offset = self.state_offset(index);
            let delta_translation = Vector3::new(
                deviation[offset],
                deviation[offset + 1],
                deviation[offset + 2],
            );
            let delta_sigma = Vector3::new(
                deviation[offset + 3],
                deviation[offset + 4],
                deviation[offset + 5],
            );
            let delta_rotation = mrp::mrp_to_dcm(&delta_sigma);

            clouds[index].transform(&delta_rotation, &delta_translation);

            deviations[index].rotation = delta_rotation * deviations[index].rotation;
            deviations[index].translation =
                delta_rotation * deviations[index].translation + delta_translation;
        }

        // Moved clouds need fresh trees before the next correspondence pass
        clouds.par_iter_mut().for_each(|cloud| {
            if !cloud.has_fresh_tree() {
                cloud.build_kdtree();
            }
        });
    }

    /// Refreshes every pair's residual diagnostics at the configured
    /// sub-sampling level, logging the mean and worst offenders.
    fn update_point_cloud_pairs(&self, clouds: &[PointCloud], pairs: &mut [PointCloudPair]) {
        let refreshed = pairs
            .par_iter()
            .map(|pair| {
                self.make_pair_diagnostics(
                    clouds,
                    pair.source,
                    pair.destination,
                    self.config.diagnostics_subsample_level,
                )
            })
            .collect::<Vec<_>>();
        pairs.clone_from_slice(&refreshed);

        let mut mean_rms = 0.0;
        let mut worst_rms: Option<&PointCloudPair> = None;
        let mut worst_mean: Option<&PointCloudPair> = None;
        for pair in pairs.iter() {
            mean_rms += pair.residual_rms / pairs.len() as f64;
            if worst_rms.map_or(true, |worst| pair.residual_rms > worst.residual_rms) {
                worst_rms = Some(pair);
            }
            if worst_mean.map_or(true, |worst| pair.residual_mean > worst.residual_mean) {
                worst_mean = Some(pair);
            }
            log::debug!(
                "({}, {}): mean {:.3e}, rms {:.3e}",
                clouds[pair.source].label(),
                clouds[pair.destination].label(),
                pair.residual_mean,
                pair.residual_rms
            );
        }

        log::info!("Mean point-cloud pair RMS error: {mean_rms:.3e}");
        if let Some(worst) = worst_rms {
            log::info!(
                "Maximum pair RMS error at ({}, {}): {:.3e}",
                worst.source,
                worst.destination,
                worst.residual_rms
            );
        }
        if let Some(worst) = worst_mean {
            log::info!(
                "Maximum pair mean error at ({}, {}): {:.3e}",
                worst.source,
                worst.destination,
                worst.residual_mean
            );
        }
    }
}
