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

use nalgebra::{Matrix3, Matrix6, SMatrix, Vector3, Vector6};
use thiserror::Error;

use crate::types::{mrp, CancelToken, RigidTransform};

#[doc = "Euler rigid-body dynamics with MRP attitude coordinates and STM."]
pub mod dynamics;
#[doc = "Adaptive Runge-Kutta-Cash-Karp 5(4) integration."]
pub mod rkck;

use dynamics::{AttitudeDynamics, AUGMENTED_SIZE};
use rkck::Rkck54;

/// The prior information weight freezing the epoch MRP; the lidar frame
/// defines the body orientation at t₀ up to that gauge.
const EPOCH_MRP_INFORMATION: f64 = 1e10;

/// Errors of the batch attitude estimator.
#[derive(Debug, Error)]
pub enum BatchAttitudeError {
    /// Fewer than two rigid transforms were supplied.
    #[error("batch attitude needs at least two timed rotations, got {got}")]
    TooFewMeasurements {
        /// Measurements supplied.
        got: usize,
    },
    /// The measurement covariance count does not match the transforms.
    #[error("covariance count {covariances} does not match measurement count {measurements}")]
    CovarianceCountMismatch {
        /// Covariances supplied.
        covariances: usize,
        /// Measurements supplied.
        measurements: usize,
    },
    /// The information matrix could not be inverted after the iterations.
    #[error("attitude information matrix is singular")]
    Singular,
    /// Cooperative abort between iterations.
    #[error("batch attitude estimation cancelled")]
    Cancelled,
}

/// Configuration of the batch attitude estimator.
#[derive(Clone, Debug)]
pub struct BatchAttitudeConfig {
    /// Gauss-Newton iterations over the full arc.
    pub n_iterations: usize,
    /// Integrator absolute tolerance.
    pub abs_tol: f64,
    /// Integrator relative tolerance.
    pub rel_tol: f64,
    /// Integrator initial step.
    pub initial_step: f64,
}

impl Default for BatchAttitudeConfig {
    fn default() -> Self {
        Self {
            n_iterations: 5,
            abs_tol: 1e-13,
            rel_tol: 1e-10,
            initial_step: 1e-3,
        }
    }
}

/// The converged estimate and its statistics.
#[derive(Clone, Debug)]
pub struct BatchAttitudeSolution {
    /// (σ₀, ω₀) estimate at the epoch.
    pub state_estimate_at_epoch: Vector6<f64>,
    /// 6×6 covariance of the epoch state.
    pub covariance_at_epoch: Matrix6<f64>,
    /// Propagated state at every measurement time.
    pub state_history: Vec<Vector6<f64>>,
    /// Propagated covariance at every measurement time.
    pub covariance_history: Vec<Matrix6<f64>>,
    /// RMS of the final residual vector.
    pub residual_rms: f64,
}

/// Batch estimation of the epoch attitude state (σ₀, ω₀) from the set of
/// absolute rigid rotations produced by the bundle adjuster.
///
/// Euler's rotational dynamics with the supplied inertia estimate are
/// integrated (state and STM) through all measurement times; the measured
/// body attitude `B_mes = BN(t₀)·LN(t₀)ᵀ·M_k·LN(t_k)` is compared against
/// the propagated attitude through an MRP residual, and the normal equations
/// are accumulated with the epoch MRP frozen by a large prior.
pub struct BatchAttitude {
    transforms: Vec<RigidTransform>,
    state_estimate_at_epoch: Vector6<f64>,
    inertia_estimate: Matrix3<f64>,
    config: BatchAttitudeConfig,
}

impl BatchAttitude {
    /// Creates the estimator from timed absolute rotations; the k = 0 entry
    /// anchors the arc and is given the identity rotation.
    ///
    /// # Arguments
    /// * `times`: Measurement time per index.
    /// * `rotations`: Absolute rotation of cloud k with respect to cloud 0.
    pub fn new(times: &[f64], rotations: &[Matrix3<f64>]) -> Self {
        let transforms = times
            .iter()
            .zip(rotations.iter())
            .enumerate()
            .map(|(index, (time, rotation))| RigidTransform {
                t_start: times[0],
                t_end: *time,
                index_start: 0,
                index_end: index,
                rotation: *rotation,
                translation: Vector3::zeros(),
            })
            .collect();

        Self {
            transforms,
            state_estimate_at_epoch: Vector6::zeros(),
            inertia_estimate: Matrix3::identity(),
            config: BatchAttitudeConfig::default(),
        }
    }

    /// Seeds the epoch state estimate.
    pub fn set_a_priori_state(&mut self, initial_state: Vector6<f64>) {
        self.state_estimate_at_epoch = initial_state;
    }

    /// Sets the inertia tensor driving the propagation.
    pub fn set_inertia_estimate(&mut self, inertia: Matrix3<f64>) {
        self.inertia_estimate = inertia;
    }

    /// Overrides the iteration/integration configuration.
    pub fn set_config(&mut self, config: BatchAttitudeConfig) {
        self.config = config;
    }

    /// Runs the batch refinement.
    ///
    /// # Arguments
    /// * `measurement_covariances`: 6×6 covariance per rigid transform; the
    ///   rotational 3×3 block feeds the measurement noise map.
    /// * `mrps_ln`: Lidar-to-inertial attitude (as an MRP) at each index.
    /// * `cancel`: Cooperative cancellation, checked between iterations.
    ///
    /// # Returns
    /// The epoch estimate, covariance, and per-index propagated histories.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument("Batch Attitude Estimation", skip_all, level = "info")
    )]
    pub fn run(
        &mut self,
        measurement_covariances: &[Matrix6<f64>],
        mrps_ln: &[Vector3<f64>],
        cancel: &CancelToken,
    ) -> Result<BatchAttitudeSolution, BatchAttitudeError> {
        if self.transforms.len() < 2 {
            return Err(BatchAttitudeError::TooFewMeasurements {
                got: self.transforms.len(),
            });
        }
        if measurement_covariances.len() != self.transforms.len() {
            return Err(BatchAttitudeError::CovarianceCountMismatch {
                covariances: measurement_covariances.len(),
                measurements: self.transforms.len(),
            });
        }

        let mut info_mat = Matrix6::<f64>::zeros();
        let mut residual_rms = f64::INFINITY;

        for iteration in 0..self.config.n_iterations {
            if cancel.is_cancelled() {
                return Err(BatchAttitudeError::Cancelled);
            }
            log::debug!("Batch attitude iteration {iteration}");

            let (state_history, stms) = self.compute_state_stms();

            let (info, normal, rms) = self.build_normal_equations(
                &state_history,
                &stms,
                mrps_ln,
                measurement_covariances,
            );
            info_mat = info;
            residual_rms = rms;
            log::debug!("Residuals RMS: {rms:.6e}");

            match info_mat.cholesky() {
                Some(factorization) => {
                    let deviation = factorization.solve(&normal);

                    // Multiplicative update of the epoch MRP, additive for
                    // the epoch rate
                    let sigma = self.state_estimate_at_epoch.fixed_rows::<3>(0).into_owned();
                    let delta_sigma = deviation.fixed_rows::<3>(0).into_owned();
                    let updated_sigma = mrp::dcm_to_mrp(
                        &(mrp::mrp_to_dcm(&sigma) * mrp::mrp_to_dcm(&delta_sigma)),
                    );

                    self.state_estimate_at_epoch
                        .fixed_rows_mut::<3>(0)
                        .copy_from(&updated_sigma);
                    let updated_omega = self.state_estimate_at_epoch.fixed_rows::<3>(3)
                        + deviation.fixed_rows::<3>(3);
                    self.state_estimate_at_epoch
                        .fixed_rows_mut::<3>(3)
                        .copy_from(&updated_omega);
                }
                None => {
                    log::warn!("Attitude normal equations singular, keeping current estimate");
                }
            }
        }

        let covariance_at_epoch = info_mat
            .try_inverse()
            .ok_or(BatchAttitudeError::Singular)?;

        let (state_history, stms) = self.compute_state_stms();
        let covariance_history = stms
            .iter()
            .map(|stm| stm * covariance_at_epoch * stm.transpose())
            .collect();

        Ok(BatchAttitudeSolution {
            state_estimate_at_epoch: self.state_estimate_at_epoch,
            covariance_at_epoch,
            state_history,
            covariance_history,
            residual_rms,
        })
    }

    /// Integrates the state and its STM through all measurement times,
    /// switching to the MRP shadow set (with the matching STM correction)
    /// whenever the attitude leaves the unit sphere.
    fn compute_state_stms(&self) -> (Vec<Vector6<f64>>, Vec<Matrix6<f64>>) {
        let dynamics = AttitudeDynamics::new(self.inertia_estimate);
        let stepper = Rkck54 {
            abs_tol: self.config.abs_tol,
            rel_tol: self.config.rel_tol,
            initial_step: self.config.initial_step,
        };

        let derivative = |_t: f64, x: &nalgebra::DVector<f64>| dynamics.augmented_derivative(x);

        let mut state = self.state_estimate_at_epoch;
        let mut stm = Matrix6::identity();
        let mut state_history = Vec::with_capacity(self.transforms.len());
        let mut stms = Vec::with_capacity(self.transforms.len());
        state_history.push(state);
        stms.push(stm);

        for window in self.transforms.windows(2) {
            let augmented = dynamics::pack_augmented(&state, &stm);
            debug_assert_eq!(augmented.len(), AUGMENTED_SIZE);

            let propagated = stepper.integrate_segment(
                &derivative,
                augmented,
                window[0].t_end,
                window[1].t_end,
            );
            state = dynamics::unpack_state(&propagated);
            stm = dynamics::unpack_stm(&propagated);

            // Shadow switch keeps the MRP bounded over long arcs
            let sigma = state.fixed_rows::<3>(0).into_owned();
            if sigma.norm() > 1.0 {
                let switch = dynamics::shadow_switch_jacobian(&sigma);
                state
                    .fixed_rows_mut::<3>(0)
                    .copy_from(&mrp::shadow(&sigma));
                let mut correction = Matrix6::identity();
                correction.fixed_view_mut::<3, 3>(0, 0).copy_from(&switch);
                stm = correction * stm;
            }

            state_history.push(state);
            stms.push(stm);
        }

        (state_history, stms)
    }

    /// Accumulates the information matrix, normal vector and residual RMS at
    /// the current epoch estimate.
    fn build_normal_equations(
        &self,
        state_history: &[Vector6<f64>],
        stms: &[Matrix6<f64>],
        mrps_ln: &[Vector3<f64>],
        measurement_covariances: &[Matrix6<f64>],
    ) -> (Matrix6<f64>, Vector6<f64>, f64) {
        let mut info_mat = Matrix6::<f64>::zeros();
        // The epoch MRP is frozen: the lidar frame fixes the gauge
        info_mat
            .fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&(Matrix3::identity() * EPOCH_MRP_INFORMATION));
        let mut normal = Vector6::<f64>::zeros();

        let mut h_tilde: SMatrix<f64, 3, 6> = SMatrix::zeros();
        h_tilde
            .fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&Matrix3::identity());

        let epoch_sigma = self.state_estimate_at_epoch.fixed_rows::<3>(0).into_owned();
        let bn_t0 = mrp::mrp_to_dcm(&epoch_sigma);
        let ln_t0 = mrp::mrp_to_dcm(&mrps_ln[0]);

        let mut residual_squared_sum = 0.0;

        for (k, transform) in self.transforms.iter().enumerate() {
            let index = transform.index_end;
            let ln_k = mrp::mrp_to_dcm(&mrps_ln[index]);

            let bn_measured = bn_t0 * ln_t0.transpose() * transform.rotation * ln_k;
            let predicted_sigma = state_history[index].fixed_rows::<3>(0).into_owned();
            let bn_predicted = mrp::mrp_to_dcm(&predicted_sigma);

            let h = h_tilde * stms[index];

            // Maps the rotational measurement covariance into residual space
            let a = bn_predicted.transpose() * bn_t0 * ln_t0.transpose() * transform.rotation;
            let e0 = Vector3::x();
            let e1 = Vector3::y();
            let e2 = Vector3::z();
            let mut partial_mat = Matrix3::<f64>::zeros();
            partial_mat
                .row_mut(0)
                .copy_from(&(-e2.transpose() * a * mrp::tilde(&(ln_k * e1))));
            partial_mat
                .row_mut(1)
                .copy_from(&(-e0.transpose() * a * mrp::tilde(&(ln_k * e2))));
            partial_mat
                .row_mut(2)
                .copy_from(&(-e1.transpose() * a * mrp::tilde(&(ln_k * e0))));

            let rotational_cov = measurement_covariances[k]
                .fixed_view::<3, 3>(3, 3)
                .into_owned();
            let measurement_noise = partial_mat * rotational_cov * partial_mat.transpose();
            let Some(noise_inverse) = measurement_noise.try_inverse() else {
                log::warn!("Singular measurement noise at index {index}, skipping");
                continue;
            };

            let residual = mrp::dcm_to_mrp(&(bn_measured * bn_predicted.transpose()));
            residual_squared_sum += residual.norm_squared();

            info_mat += h.transpose() * noise_inverse * h;
            normal += h.transpose() * noise_inverse * residual;
        }

        let rms = (residual_squared_sum / (3.0 * self.transforms.len() as f64)).sqrt();
        (info_mat, normal, rms)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use nalgebra::DVector;

    use super::*;

    // Truth propagation of the attitude state alone
    fn propagate_truth(
        inertia: Matrix3<f64>,
        initial: Vector6<f64>,
        times: &[f64],
    ) -> Vec<Vector6<f64>> {
        let dynamics = AttitudeDynamics::new(inertia);
        let stepper = Rkck54 {
            abs_tol: 1e-13,
            rel_tol: 1e-12,
            initial_step: 1e-3,
        };
        let derivative = |_t: f64, x: &DVector<f64>| {
            DVector::from_column_slice(
                dynamics
                    .state_derivative(&Vector6::from_column_slice(x.as_slice()))
                    .as_slice(),
            )
        };
        stepper
            .integrate_times(&derivative, DVector::from_column_slice(initial.as_slice()), times)
            .into_iter()
            .map(|x| Vector6::from_column_slice(x.as_slice()))
            .collect()
    }

    #[test]
    fn test_recovers_angular_velocity() {
        let inertia = Matrix3::from_diagonal(&Vector3::new(1.0, 1.4, 2.1));
        let omega_true = Vector3::new(0.004, -0.002, 0.01);
        let initial_truth = Vector6::new(0.0, 0.0, 0.0, omega_true.x, omega_true.y, omega_true.z);

        let times = (0..12).map(|k| k as f64 * 8.0).collect::<Vec<_>>();
        let truth = propagate_truth(inertia, initial_truth, &times);

        // Measured absolute rotations: M_k = BN(t0)^T BN(t_k) with LN = I
        let rotations = truth
            .iter()
            .map(|state| mrp::mrp_to_dcm(&state.fixed_rows::<3>(0).into_owned()))
            .collect::<Vec<_>>();

        let mut estimator = BatchAttitude::new(&times, &rotations);
        estimator.set_inertia_estimate(inertia);
        // Seed with a perturbed rate
        estimator.set_a_priori_state(Vector6::new(
            0.0, 0.0, 0.0, 0.0045, -0.0015, 0.0095,
        ));
        estimator.set_config(BatchAttitudeConfig {
            n_iterations: 25,
            ..Default::default()
        });

        let covariances = vec![Matrix6::identity() * 1e-4; times.len()];
        let mrps_ln = vec![Vector3::zeros(); times.len()];
        let solution = estimator
            .run(&covariances, &mrps_ln, &CancelToken::new())
            .unwrap();

        let omega_estimated = solution
            .state_estimate_at_epoch
            .fixed_rows::<3>(3)
            .into_owned();
        assert_abs_diff_eq!(omega_estimated, omega_true, epsilon = 1e-8);
        assert!(solution.residual_rms < 1e-8);
        assert_eq!(solution.state_history.len(), times.len());
        assert_eq!(solution.covariance_history.len(), times.len());
    }

    #[test]
    fn test_epoch_mrp_stays_frozen() {
        let inertia = Matrix3::from_diagonal(&Vector3::new(1.0, 1.2, 1.5));
        let initial_truth = Vector6::new(0.0, 0.0, 0.0, 0.002, 0.001, 0.008);
        let times = (0..8).map(|k| k as f64 * 10.0).collect::<Vec<_>>();
        let truth = propagate_truth(inertia, initial_truth, &times);
        let rotations = truth
            .iter()
            .map(|state| mrp::mrp_to_dcm(&state.fixed_rows::<3>(0).into_owned()))
            .collect::<Vec<_>>();

        let mut estimator = BatchAttitude::new(&times, &rotations);
        estimator.set_inertia_estimate(inertia);
        estimator.set_a_priori_state(Vector6::new(0.0, 0.0, 0.0, 0.0025, 0.0008, 0.0082));
        estimator.set_config(BatchAttitudeConfig {
            n_iterations: 25,
            ..Default::default()
        });

        let covariances = vec![Matrix6::identity() * 1e-4; times.len()];
        let mrps_ln = vec![Vector3::zeros(); times.len()];
        let solution = estimator
            .run(&covariances, &mrps_ln, &CancelToken::new())
            .unwrap();

        // The gauge prior pins the epoch attitude itself
        assert!(solution
            .state_estimate_at_epoch
            .fixed_rows::<3>(0)
            .norm()
            < 1e-6);
        // And its covariance block reflects the 1e10 information weight
        assert!(solution.covariance_at_epoch[(0, 0)] < 1e-9);
    }

    #[test]
    fn test_input_validation() {
        let mut estimator = BatchAttitude::new(&[0.0], &[Matrix3::identity()]);
        let result = estimator.run(&[], &[], &CancelToken::new());
        assert!(matches!(
            result,
            Err(BatchAttitudeError::TooFewMeasurements { got: 1 })
        ));

        let mut estimator =
            BatchAttitude::new(&[0.0, 1.0], &[Matrix3::identity(), Matrix3::identity()]);
        let result = estimator.run(&[Matrix6::identity()], &[], &CancelToken::new());
        assert!(matches!(
            result,
            Err(BatchAttitudeError::CovarianceCountMismatch { .. })
        ));
    }
}
