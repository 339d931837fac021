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

use std::marker::PhantomData;

use aster_algorithms::icp::IcpConfiguration;

use super::{
    config::{LidarSpec, ShapeBuilderConfig},
    ShapeBuilder,
};

/// Typestate markers for the instrument configuration.
pub mod lidar {
    /// The builder still needs a [`super::LidarSpec`].
    pub struct WantsLidarSpec;
    /// The instrument is configured.
    pub struct HasLidarSpec;
}

/// Typestate markers for the shape degree.
pub mod degree {
    /// The builder still needs a shape degree.
    pub struct WantsShapeDegree;
    /// The degree is configured.
    pub struct HasShapeDegree;
}

/// The fully-unconfigured builder type.
pub type EmptyShapeBuilderBuilder =
    ShapeBuilderBuilder<lidar::WantsLidarSpec, degree::WantsShapeDegree>;

/// A typestate builder for [`ShapeBuilder`]: the instrument spec and the
/// shape degree must both be provided before `build` becomes available.
pub struct ShapeBuilderBuilder<MaybeLidar, MaybeDegree> {
    lidar: LidarSpec,
    shape_degree: usize,
    tweaks: Vec<Tweak>,

    _has_lidar: PhantomData<MaybeLidar>,
    _has_degree: PhantomData<MaybeDegree>,
}

/// Deferred configuration edits, applied on build.
enum Tweak {
    PointsRetained(usize),
    UseBa(bool),
    BaIterations(usize),
    LookForClosure(bool),
    RidgeCoef(f64),
    MaxKdTreeDepth(usize),
    Icp(IcpConfiguration),
    FeatureNeighborhood(usize),
    CommonFeatureBeta(f64),
    IodParticles(usize),
    IodIterations(usize),
    IodSeed(u64),
    AttitudeIterations(usize),
    ProcessNoise(f64, f64),
}

impl Default for EmptyShapeBuilderBuilder {
    fn default() -> Self {
        Self {
            lidar: LidarSpec::default(),
            shape_degree: 2,
            tweaks: Vec::new(),
            _has_lidar: PhantomData,
            _has_degree: PhantomData,
        }
    }
}

impl<MaybeDegree> ShapeBuilderBuilder<lidar::WantsLidarSpec, MaybeDegree> {
    /// Provides the instrument figures.
    pub fn with_lidar(
        self,
        lidar: LidarSpec,
    ) -> ShapeBuilderBuilder<lidar::HasLidarSpec, MaybeDegree> {
        ShapeBuilderBuilder {
            lidar,
            shape_degree: self.shape_degree,
            tweaks: self.tweaks,
            _has_lidar: PhantomData,
            _has_degree: PhantomData,
        }
    }
}

impl<MaybeLidar> ShapeBuilderBuilder<MaybeLidar, degree::WantsShapeDegree> {
    /// Provides the Bezier shape degree.
    pub fn with_shape_degree(
        self,
        shape_degree: usize,
    ) -> ShapeBuilderBuilder<MaybeLidar, degree::HasShapeDegree> {
        ShapeBuilderBuilder {
            lidar: self.lidar,
            shape_degree,
            tweaks: self.tweaks,
            _has_lidar: PhantomData,
            _has_degree: PhantomData,
        }
    }
}

impl<MaybeLidar, MaybeDegree> ShapeBuilderBuilder<MaybeLidar, MaybeDegree> {
    fn push(mut self, tweak: Tweak) -> Self {
        self.tweaks.push(tweak);
        self
    }

    /// Budget of the merged-cloud constructor.
    pub fn with_points_retained(self, points_retained: usize) -> Self {
        self.push(Tweak::PointsRetained(points_retained))
    }

    /// Enables or disables bundle adjustment.
    pub fn with_bundle_adjustment(self, use_ba: bool) -> Self {
        self.push(Tweak::UseBa(use_ba))
    }

    /// Bundle-adjustment iterations.
    pub fn with_ba_iterations(self, iterations: usize) -> Self {
        self.push(Tweak::BaIterations(iterations))
    }

    /// Enables the loop-closure search.
    pub fn with_loop_closure(self, look_for_closure: bool) -> Self {
        self.push(Tweak::LookForClosure(look_for_closure))
    }

    /// Ridge coefficient of the BA normal equations.
    pub fn with_ridge_coef(self, ridge_coef: f64) -> Self {
        self.push(Tweak::RidgeCoef(ridge_coef))
    }

    /// Depth cap of the shape KD-trees.
    pub fn with_max_kd_tree_depth(self, depth: usize) -> Self {
        self.push(Tweak::MaxKdTreeDepth(depth))
    }

    /// Pairwise registration configuration.
    pub fn with_icp_configuration(self, icp: IcpConfiguration) -> Self {
        self.push(Tweak::Icp(icp))
    }

    /// Descriptor neighborhood size.
    pub fn with_feature_neighborhood(self, neighborhood: usize) -> Self {
        self.push(Tweak::FeatureNeighborhood(neighborhood))
    }

    /// β of the common-feature suppression; zero disables it.
    pub fn with_common_feature_beta(self, beta: f64) -> Self {
        self.push(Tweak::CommonFeatureBeta(beta))
    }

    /// IOD swarm size.
    pub fn with_iod_particles(self, particles: usize) -> Self {
        self.push(Tweak::IodParticles(particles))
    }

    /// IOD swarm iterations.
    pub fn with_iod_iterations(self, iterations: usize) -> Self {
        self.push(Tweak::IodIterations(iterations))
    }

    /// IOD swarm seed.
    pub fn with_iod_seed(self, seed: u64) -> Self {
        self.push(Tweak::IodSeed(seed))
    }

    /// Batch attitude iterations.
    pub fn with_attitude_iterations(self, iterations: usize) -> Self {
        self.push(Tweak::AttitudeIterations(iterations))
    }

    /// Process-noise standard deviations (velocity, angular velocity).
    pub fn with_process_noise(self, sigma_vel: f64, sigma_omega: f64) -> Self {
        self.push(Tweak::ProcessNoise(sigma_vel, sigma_omega))
    }
}

impl ShapeBuilderBuilder<lidar::HasLidarSpec, degree::HasShapeDegree> {
    /// Assembles the configured [`ShapeBuilder`].
    pub fn build(self) -> ShapeBuilder {
        let mut config = ShapeBuilderConfig::with_defaults(self.lidar, self.shape_degree);
        for tweak in self.tweaks {
            match tweak {
                Tweak::PointsRetained(value) => config.points_retained = value,
                Tweak::UseBa(value) => config.use_ba = value,
                Tweak::BaIterations(value) => config.n_iter_bundle_adjustment = value,
                Tweak::LookForClosure(value) => config.look_for_closure = value,
                Tweak::RidgeCoef(value) => config.ridge_coef = value,
                Tweak::MaxKdTreeDepth(value) => config.max_kd_tree_depth = value,
                Tweak::Icp(value) => config.icp = value,
                Tweak::FeatureNeighborhood(value) => config.feature_neighborhood = value,
                Tweak::CommonFeatureBeta(value) => config.common_feature_beta = value,
                Tweak::IodParticles(value) => config.iod_particles = value,
                Tweak::IodIterations(value) => config.iod_iterations = value,
                Tweak::IodSeed(value) => config.iod_seed = value,
                Tweak::AttitudeIterations(value) => config.attitude_iterations = value,
                Tweak::ProcessNoise(vel, omega) => {
                    config.process_noise_sigma_vel = vel;
                    config.process_noise_sigma_omega = omega;
                }
            }
        }

        ShapeBuilder::new(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_requires_both_stages() {
        let builder = EmptyShapeBuilderBuilder::default()
            .with_points_retained(1000)
            .with_lidar(LidarSpec::default())
            .with_ba_iterations(3)
            .with_shape_degree(2);
        let shape_builder = builder.build();

        assert_eq!(shape_builder.config().shape_degree(), 2);
    }

    #[test]
    fn test_tweaks_apply_in_order() {
        let shape_builder = EmptyShapeBuilderBuilder::default()
            .with_iod_particles(10)
            .with_iod_particles(99)
            .with_lidar(LidarSpec::default())
            .with_shape_degree(1)
            .build();

        assert_eq!(shape_builder.config().iod_particles, 99);
    }
}
