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

use nalgebra::{Matrix3, Matrix6, RowVector6, Vector3, Vector6};
use rayon::prelude::*;

use crate::{point_clouds::PointCloud, types::mrp};

mod types;
pub use types::{IcpConfiguration, IcpConfigurationBuilder, IcpError, IcpResult, IcpSuccess};

/// A correspondence between a source point index and a destination point
/// index.
pub type PointPair = (usize, usize);

/// The signed point-to-plane distance of a pair: the source-to-destination
/// offset projected on the destination normal.
#[inline]
pub fn compute_normal_distance(
    source_position: &Vector3<f64>,
    destination_position: &Vector3<f64>,
    destination_normal: &Vector3<f64>,
) -> f64 {
    destination_normal.dot(&(source_position - destination_position))
}

/// Forms point pairs between two clouds at their current poses.
///
/// Every 2^h-th source point carrying a usable feature is matched to its
/// nearest destination point; pairs whose point-to-plane residual strays
/// from the median by more than `rejection_multiplier` MAD-sigmas are then
/// rejected.
///
/// # Arguments
/// * `source`: The source cloud, at its current pose.
/// * `destination`: The destination cloud; a fresh KD-tree accelerates the
///   search, a stale one degrades to a linear scan.
/// * `subsample_level`: Hierarchy level h ≥ 0; level 0 uses every point.
/// * `rejection_multiplier`: Robust trim width in MAD-sigmas.
///
/// # Returns
/// The accepted pairs, in source order.
#[cfg_attr(
    feature = "tracing",
    tracing::instrument("Compute Point Pairs", skip_all, level = "debug")
)]
pub fn compute_pairs(
    source: &PointCloud,
    destination: &PointCloud,
    subsample_level: u32,
    rejection_multiplier: f64,
) -> Vec<PointPair> {
    let stride = 1usize << subsample_level;

    let candidates = (0..source.size())
        .into_par_iter()
        .step_by(stride)
        .filter(|index| source[*index].valid_feature)
        .filter_map(|index| {
            destination
                .nearest(&source[index].position)
                .map(|(dest_index, _)| {
                    let residual = compute_normal_distance(
                        &source[index].position,
                        &destination[dest_index].position,
                        &destination[dest_index].normal,
                    );
                    ((index, dest_index), residual)
                })
        })
        .collect::<Vec<_>>();

    reject_outlier_pairs(candidates, rejection_multiplier)
}

/// MAD-based robust trim of candidate pairs.
fn reject_outlier_pairs(
    candidates: Vec<(PointPair, f64)>,
    rejection_multiplier: f64,
) -> Vec<PointPair> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let median_of = |values: &mut Vec<f64>| -> f64 {
        let mid = values.len() / 2;
        *values
            .select_nth_unstable_by(mid, f64::total_cmp)
            .1
    };

    let mut residuals = candidates.iter().map(|(_, r)| *r).collect::<Vec<_>>();
    let median = median_of(&mut residuals);

    let mut deviations = candidates
        .iter()
        .map(|(_, r)| (r - median).abs())
        .collect::<Vec<_>>();
    let mad = median_of(&mut deviations);

    // Consistent MAD-to-sigma factor for a normal distribution
    let threshold = rejection_multiplier * 1.4826 * mad;

    candidates
        .into_iter()
        .filter(|(_, residual)| (residual - median).abs() <= threshold)
        .map(|(pair, _)| pair)
        .collect()
}

/// Root-mean-square point-to-plane residual over the given pairs.
pub fn compute_rms_residuals(
    source: &PointCloud,
    destination: &PointCloud,
    pairs: &[PointPair],
) -> f64 {
    if pairs.is_empty() {
        return 0.0;
    }

    let sum_squared = pairs
        .iter()
        .map(|(source_index, dest_index)| {
            compute_normal_distance(
                &source[*source_index].position,
                &destination[*dest_index].position,
                &destination[*dest_index].normal,
            )
            .powi(2)
        })
        .sum::<f64>();

    (sum_squared / pairs.len() as f64).sqrt()
}

/// Mean signed point-to-plane residual over the given pairs.
pub fn compute_mean_residuals(
    source: &PointCloud,
    destination: &PointCloud,
    pairs: &[PointPair],
) -> f64 {
    if pairs.is_empty() {
        return 0.0;
    }

    pairs
        .iter()
        .map(|(source_index, dest_index)| {
            compute_normal_distance(
                &source[*source_index].position,
                &destination[*dest_index].position,
                &destination[*dest_index].normal,
            )
        })
        .sum::<f64>()
        / pairs.len() as f64
}

/// Records accepted pairs on the clouds: bumps both inclusion counters and
/// stores the weak correspondence on the source points.
pub fn record_pairs(source: &mut PointCloud, destination: &mut PointCloud, pairs: &[PointPair]) {
    for (source_index, dest_index) in pairs {
        if let Some(point) = source.get_mut(*source_index) {
            point.inclusion_counter += 1;
            point.correspondence = Some(*dest_index);
        }
        if let Some(point) = destination.get_mut(*dest_index) {
            point.inclusion_counter += 1;
        }
    }
}

/// One linearized point-to-plane update at the current pose.
///
/// Pairs (p, d, n) carry the transformed source position, destination
/// position and destination normal. The 6-vector solved for is (δx, δσ),
/// applied multiplicatively: `M <- C(δσ)·M`, `X <- C(δσ)·X + δx`.
///
/// # Returns
/// The update 6-vector, or [`None`] when the normal matrix is singular.
fn solve_step(pairs: &[(Vector3<f64>, Vector3<f64>, Vector3<f64>)]) -> Option<Vector6<f64>> {
    let (lambda, normal) = pairs
        .par_iter()
        .fold(
            || (Matrix6::<f64>::zeros(), Vector6::<f64>::zeros()),
            |(mut lambda, mut normal), (position, dest_position, dest_normal)| {
                let residual = dest_normal.dot(&(position - dest_position));

                let mut h = RowVector6::zeros();
                h.fixed_view_mut::<1, 3>(0, 0)
                    .copy_from(&dest_normal.transpose());
                h.fixed_view_mut::<1, 3>(0, 3)
                    .copy_from(&mrp::dg_dsigma_multiplicative(position, dest_normal));
                // epsilon = y - Hx
                h = -h;

                lambda += h.transpose() * h;
                normal += h.transpose() * residual;
                (lambda, normal)
            },
        )
        .reduce(
            || (Matrix6::zeros(), Vector6::zeros()),
            |(lambda_a, normal_a), (lambda_b, normal_b)| (lambda_a + lambda_b, normal_a + normal_b),
        );

    lambda.cholesky().map(|factor| factor.solve(&normal))
}

/// Rigid point-to-plane alignment of two oriented point clouds.
///
/// # Arguments
/// * `source`: The source cloud S; never mutated.
/// * `destination`: The destination cloud D; never mutated. Build its
///   KD-tree beforehand for large clouds.
/// * `initial`: Optional initial (rotation, translation) estimate.
/// * `config`: Algorithm configuration.
///
/// # Returns
/// An [`IcpSuccess`] holding (M, X) such that `M·s + X` lands on D, or an
/// [`IcpError`] naming the failure; interrupted refinements carry the last
/// consistent estimate.
#[cfg_attr(
    feature = "tracing",
    tracing::instrument("Full ICP Algorithm", skip_all, level = "info")
)]
pub fn icp(
    source: &PointCloud,
    destination: &PointCloud,
    initial: Option<(Matrix3<f64>, Vector3<f64>)>,
    config: &IcpConfiguration,
) -> IcpResult {
    if source.is_empty() {
        return Err(IcpError::SourcePointCloudEmpty);
    }
    if destination.is_empty() {
        return Err(IcpError::DestinationPointCloudEmpty);
    }
    if config.max_iterations == 0 {
        return Err(IcpError::IterationCountIsZero);
    }
    if config.convergence_threshold.is_nan() || config.convergence_threshold <= 0.0 {
        return Err(IcpError::InvalidConvergenceThreshold);
    }

    let (mut rotation, mut translation) =
        initial.unwrap_or_else(|| (Matrix3::identity(), Vector3::zeros()));

    let mut last_good = IcpSuccess {
        rotation,
        translation,
        ..IcpSuccess::identity()
    };
    let mut divergence_streak = 0usize;

    for iteration in 0..config.max_iterations {
        // Correspondence search at the current pose
        let stride = 1usize << config.subsample_level;
        let candidates = (0..source.size())
            .into_par_iter()
            .step_by(stride)
            .filter(|index| source[*index].valid_feature)
            .filter_map(|index| {
                let transformed = rotation * source[index].position + translation;
                destination.nearest(&transformed).map(|(dest_index, _)| {
                    let residual = compute_normal_distance(
                        &transformed,
                        &destination[dest_index].position,
                        &destination[dest_index].normal,
                    );
                    ((index, dest_index), residual)
                })
            })
            .collect::<Vec<_>>();

        let pairs = reject_outlier_pairs(candidates, config.rejection_multiplier);
        if pairs.len() < config.minimum_pairs {
            return Err(IcpError::NoPairs {
                found: pairs.len(),
                minimum: config.minimum_pairs,
            });
        }

        // Residual evaluation at the current pose
        let geometry = pairs
            .iter()
            .map(|(source_index, dest_index)| {
                (
                    rotation * source[*source_index].position + translation,
                    destination[*dest_index].position,
                    destination[*dest_index].normal,
                )
            })
            .collect::<Vec<_>>();

        let rms = (geometry
            .iter()
            .map(|(p, d, n)| n.dot(&(p - d)).powi(2))
            .sum::<f64>()
            / geometry.len() as f64)
            .sqrt();
        log::trace!("ICP iteration {iteration}: {} pairs, rms {rms:.3e}", pairs.len());

        if rms > last_good.residual_rms {
            divergence_streak += 1;
            if divergence_streak >= 3 {
                return Err(IcpError::Diverged {
                    last: Box::new(last_good),
                });
            }
        } else {
            divergence_streak = 0;
            last_good = IcpSuccess {
                rotation,
                translation,
                residual_rms: rms,
                accepted_pairs: pairs.len(),
                iterations: iteration,
            };
        }

        // State update
        let Some(deviation) = solve_step(&geometry) else {
            return Err(IcpError::Singular {
                last: Box::new(last_good),
            });
        };

        let delta_translation = deviation.fixed_rows::<3>(0).into_owned();
        let delta_sigma = deviation.fixed_rows::<3>(3).into_owned();
        let delta_rotation = mrp::mrp_to_dcm(&delta_sigma);

        rotation = delta_rotation * rotation;
        translation = delta_rotation * translation + delta_translation;

        if deviation.norm() < config.convergence_threshold {
            log::debug!("ICP converged after {} iterations, rms {rms:.3e}", iteration + 1);
            return Ok(IcpSuccess {
                rotation,
                translation,
                residual_rms: rms,
                accepted_pairs: pairs.len(),
                iterations: iteration + 1,
            });
        }
    }

    Err(IcpError::ConvergenceFailed {
        iterations: config.max_iterations,
        last: Box::new(last_good),
    })
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use crate::point_clouds::PointNormal;

    use super::*;

    // An ellipsoid sampled on an angular grid; anisotropic so that all six
    // degrees of freedom are observable
    pub(crate) fn ellipsoid_cloud(label: &str, rows: usize, cols: usize) -> PointCloud {
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

    #[test]
    fn test_icp_input_validation() {
        let cloud = ellipsoid_cloud("cloud", 8, 8);
        let empty = PointCloud::new("empty");
        let config = IcpConfiguration::default();

        assert!(matches!(
            icp(&empty, &cloud, None, &config),
            Err(IcpError::SourcePointCloudEmpty)
        ));
        assert!(matches!(
            icp(&cloud, &empty, None, &config),
            Err(IcpError::DestinationPointCloudEmpty)
        ));

        let zero_iterations = IcpConfiguration::builder().with_max_iterations(0).build();
        assert!(matches!(
            icp(&cloud, &cloud, None, &zero_iterations),
            Err(IcpError::IterationCountIsZero)
        ));

        let bad_threshold = IcpConfiguration::builder()
            .with_convergence_threshold(0.0)
            .build();
        assert!(matches!(
            icp(&cloud, &cloud, None, &bad_threshold),
            Err(IcpError::InvalidConvergenceThreshold)
        ));
    }

    #[test]
    fn test_icp_identity_on_identical_clouds() {
        let mut cloud = ellipsoid_cloud("identity", 24, 24);
        cloud.build_kdtree();

        let result = icp(&cloud, &cloud, None, &IcpConfiguration::default()).unwrap();
        assert!(result.iterations <= 1);
        assert_abs_diff_eq!(result.rotation, Matrix3::identity(), epsilon = 1e-10);
        assert_abs_diff_eq!(result.translation, Vector3::zeros(), epsilon = 1e-10);
        assert!(result.residual_rms < 1e-10);
    }

    #[test]
    fn test_icp_rigid_transform_roundtrip() {
        let destination = {
            let mut cloud = ellipsoid_cloud("destination", 32, 32);
            cloud.build_kdtree();
            cloud
        };

        // The source is the destination pushed through a rigid transform;
        // ICP must recover the inverse
        let rotation =
            mrp::mrp_to_dcm(&Vector3::new(0.0, 0.0, ((15.0f64).to_radians() / 4.0).tan()));
        let translation = Vector3::new(0.15, -0.1, 0.05);

        let mut source = ellipsoid_cloud("source", 32, 32);
        source.transform(&rotation, &translation);

        let config = IcpConfiguration::builder()
            .with_max_iterations(100)
            .with_convergence_threshold(1e-12)
            .build();
        let result = icp(&source, &destination, None, &config).unwrap();

        assert_abs_diff_eq!(result.rotation, rotation.transpose(), epsilon = 1e-6);
        assert_abs_diff_eq!(
            result.translation,
            -(rotation.transpose() * translation),
            epsilon = 1e-6
        );
        assert!(result.residual_rms < 1e-8);
    }

    #[test]
    fn test_icp_with_initial_guess_converges_faster() {
        let destination = {
            let mut cloud = ellipsoid_cloud("destination", 24, 24);
            cloud.build_kdtree();
            cloud
        };
        let rotation = mrp::mrp_to_dcm(&Vector3::new(0.02, 0.03, 0.1));
        let translation = Vector3::new(0.3, 0.1, -0.2);
        let mut source = ellipsoid_cloud("source", 24, 24);
        source.transform(&rotation, &translation);

        let config = IcpConfiguration::builder().with_max_iterations(100).build();
        let seeded = icp(
            &source,
            &destination,
            Some((rotation.transpose(), -(rotation.transpose() * translation))),
            &config,
        )
        .unwrap();
        assert!(seeded.iterations <= 2);
        assert!(seeded.residual_rms < 1e-9);
    }

    #[test]
    fn test_icp_no_pairs_when_features_disabled() {
        let mut source = ellipsoid_cloud("source", 8, 8);
        let destination = ellipsoid_cloud("destination", 8, 8);
        source.iter_mut().for_each(|point| point.valid_feature = false);

        let result = icp(&source, &destination, None, &IcpConfiguration::default());
        assert!(matches!(result, Err(IcpError::NoPairs { found: 0, .. })));
    }

    #[test]
    fn test_compute_pairs_subsampling() {
        let mut destination = ellipsoid_cloud("destination", 16, 16);
        destination.build_kdtree();
        let source = ellipsoid_cloud("source", 16, 16);

        let full = compute_pairs(&source, &destination, 0, 3.0);
        let halved = compute_pairs(&source, &destination, 1, 3.0);
        assert!(halved.len() <= full.len() / 2 + 1);

        // Identical clouds pair each point with itself
        assert!(full.iter().all(|(s, d)| s == d));
    }

    #[test]
    fn test_record_pairs_updates_counters() {
        let mut source = ellipsoid_cloud("source", 8, 8);
        let mut destination = ellipsoid_cloud("destination", 8, 8);
        let pairs = vec![(0usize, 0usize), (1, 1), (1, 2)];

        record_pairs(&mut source, &mut destination, &pairs);
        assert_eq!(source[0].inclusion_counter, 1);
        assert_eq!(source[1].inclusion_counter, 2);
        assert_eq!(source[1].correspondence, Some(2));
        assert_eq!(destination[2].inclusion_counter, 1);
    }
}
