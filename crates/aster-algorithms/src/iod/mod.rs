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

use nalgebra::{Matrix3, RowVector3, SMatrix, Vector3};
use thiserror::Error;

use crate::types::{mrp, CancelToken, RigidTransform};

#[doc = "Keplerian elements and two-body propagation."]
pub mod kepler;
#[doc = "Particle swarm optimization with wrap/reflect boundaries."]
pub mod psopt;

pub use kepler::KeplerianElements;
pub use psopt::{BoundaryCondition, PsoConfig};

/// Relative tolerance on the sampling period uniformity.
const UNIFORMITY_TOLERANCE: f64 = 1e-9;

/// Errors of the initial-orbit finder.
#[derive(Debug, Error)]
pub enum IodError {
    /// At least two rigid transforms are needed to infer the sampling
    /// period.
    #[error("initial orbit determination needs at least two transforms, got {got}")]
    TooFewTransforms {
        /// Transforms supplied.
        got: usize,
    },
    /// The transform times are not uniformly spaced.
    #[error("transform times are not uniformly sampled")]
    NonUniformSampling,
    /// Cooperative abort.
    #[error("initial orbit determination cancelled")]
    Cancelled,
}

/// Bounds of the seven-dimensional (a, e, i, Ω, ω, M₀, μ) search box.
///
/// The angular coordinates (i, Ω, ω, M₀) use wrap-around boundary
/// conditions; (a, e, μ) reflect.
#[derive(Clone, Debug)]
pub struct IodBounds {
    /// Lower bounds, element order (a, e, i, Ω, ω, M₀, μ).
    pub lower: [f64; 7],
    /// Upper bounds, same ordering.
    pub upper: [f64; 7],
}

impl Default for IodBounds {
    fn default() -> Self {
        Self {
            lower: [1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1e-3],
            upper: [
                1e5,
                0.9,
                std::f64::consts::PI,
                2.0 * std::f64::consts::PI,
                2.0 * std::f64::consts::PI,
                2.0 * std::f64::consts::PI,
                1e2,
            ],
        }
    }
}

/// Per-coordinate boundary conditions of the IOD search.
pub fn iod_boundary_conditions() -> [BoundaryCondition; 7] {
    [
        BoundaryCondition::Reflective,
        BoundaryCondition::Reflective,
        BoundaryCondition::Wrap,
        BoundaryCondition::Wrap,
        BoundaryCondition::Wrap,
        BoundaryCondition::Wrap,
        BoundaryCondition::Reflective,
    ]
}

/// Configuration of the initial-orbit finder.
#[derive(Clone, Debug)]
pub struct IodConfig {
    /// Swarm size.
    pub particles: usize,
    /// Swarm iterations.
    pub iterations: usize,
    /// Search box.
    pub bounds: IodBounds,
    /// RNG seed for the swarm.
    pub seed: u64,
}

impl Default for IodConfig {
    fn default() -> Self {
        Self {
            particles: 500,
            iterations: 200,
            bounds: IodBounds::default(),
            seed: 0,
        }
    }
}

/// Fits Keplerian elements (and μ) to the translational parts of the rigid
/// transforms produced by the bundle adjuster, by particle-swarm search over
/// the element box.
pub struct IodFinder {
    transforms: Vec<RigidTransform>,
    config: IodConfig,
}

impl IodFinder {
    /// Creates a finder over the BA transform sequence (k = 1..N, with the
    /// k = 0 anchor implied).
    pub fn new(transforms: Vec<RigidTransform>, config: IodConfig) -> Self {
        Self { transforms, config }
    }

    /// The IOD cost: ε = Σ_k ‖r(t_k) − M_k·r(t_{k+1}) + X_k‖, where r is the
    /// Keplerian position propagated from the implicit epoch t₀ = t₁ − Δt.
    ///
    /// # Arguments
    /// * `elements`: Candidate element set (defined at the implicit epoch).
    /// * `transforms`: The BA transform sequence with uniform sampling.
    pub fn cost_function(elements: &KeplerianElements, transforms: &[RigidTransform]) -> f64 {
        let count = transforms.len();
        let dt = transforms[1].t_end - transforms[0].t_end;

        // Grid of N+1 positions starting one period step before the first
        // transform
        let positions = (0..=count)
            .map(|index| elements.position_at(index as f64 * dt))
            .collect::<Vec<_>>();

        transforms
            .iter()
            .enumerate()
            .map(|(k, transform)| {
                (positions[k] - transform.rotation * positions[k + 1] + transform.translation)
                    .norm_squared()
            })
            .sum::<f64>()
            .sqrt()
    }

    /// Runs the swarm search.
    ///
    /// # Arguments
    /// * `guess`: Optional element-set seed; one particle starts there.
    /// * `cancel`: Cooperative cancellation, checked before the search.
    ///
    /// # Returns
    /// The best Keplerian state at the implicit epoch.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument("Initial Orbit Determination", skip_all, level = "info")
    )]
    pub fn run(
        &self,
        guess: Option<KeplerianElements>,
        cancel: &CancelToken,
    ) -> Result<KeplerianElements, IodError> {
        if self.transforms.len() < 2 {
            return Err(IodError::TooFewTransforms {
                got: self.transforms.len(),
            });
        }

        // The epoch is inferred from the sampling period, which must be
        // uniform
        let dt = self.transforms[1].t_end - self.transforms[0].t_end;
        let uniform = self.transforms.windows(2).all(|window| {
            ((window[1].t_end - window[0].t_end) - dt).abs() <= UNIFORMITY_TOLERANCE * dt.abs()
        });
        if !uniform || dt <= 0.0 {
            return Err(IodError::NonUniformSampling);
        }

        if cancel.is_cancelled() {
            return Err(IodError::Cancelled);
        }

        let transforms = &self.transforms;
        let pso_config = PsoConfig {
            particles: self.config.particles,
            iterations: self.config.iterations,
            seed: self.config.seed,
            ..Default::default()
        };

        let guess_vector = guess.map(|elements| elements.to_state_vector());
        let (best, best_cost) = psopt::minimize(
            |state| {
                let elements = KeplerianElements::from_state_slice(state);
                Self::cost_function(&elements, transforms)
            },
            &self.config.bounds.lower,
            &self.config.bounds.upper,
            &iod_boundary_conditions(),
            guess_vector.as_ref().map(|vector| vector.as_slice()),
            &pso_config,
        );

        log::info!("IOD best cost: {best_cost:.6e}");
        Ok(KeplerianElements::from_state_slice(&best))
    }
}

/// Partial of the relative-pose observable I′_k with respect to the stacked
/// 12-vector Ṽ_k = (X̃_k, X̃_{k−1}, σ̃_k, σ̃_{k−1}) carrying the two adjacent
/// pose states.
pub fn compute_diprime_dvtilde(
    m_k: &Matrix3<f64>,
    x_k: &Vector3<f64>,
    m_km1: &Matrix3<f64>,
    x_km1: &Vector3<f64>,
    ln_k: &Matrix3<f64>,
    ln_km1: &Matrix3<f64>,
) -> SMatrix<f64, 6, 12> {
    let a_k_bar = m_km1.transpose() * (x_k - x_km1);
    let u_k_bar = mrp::tilde(&a_k_bar) * -4.0;

    let mut partial: SMatrix<f64, 6, 12> = SMatrix::zeros();

    partial
        .fixed_view_mut::<3, 3>(0, 0)
        .copy_from(&(ln_km1.transpose() * m_km1.transpose()));
    partial
        .fixed_view_mut::<3, 3>(0, 3)
        .copy_from(&(-(ln_km1.transpose() * m_km1.transpose())));
    partial
        .fixed_view_mut::<3, 3>(0, 9)
        .copy_from(&(ln_km1.transpose() * u_k_bar));

    partial
        .fixed_view_mut::<3, 6>(3, 6)
        .copy_from(&compute_dsigmatilde_dz(m_k, m_km1, ln_k, ln_km1));

    partial
}

/// Partial of the relative-attitude MRP observable with respect to the
/// stacked attitude states of the two adjacent poses.
pub fn compute_dsigmatilde_dz(
    m_k: &Matrix3<f64>,
    m_km1: &Matrix3<f64>,
    ln_k: &Matrix3<f64>,
    ln_km1: &Matrix3<f64>,
) -> SMatrix<f64, 3, 6> {
    let a_bar_k = m_km1.transpose() * m_k;
    let left = m_k.transpose() * ln_km1.transpose();

    let e0 = Vector3::x();
    let e1 = Vector3::y();
    let e2 = Vector3::z();

    let mut partial: SMatrix<f64, 3, 6> = SMatrix::zeros();

    let row0: RowVector3<f64> = e2.transpose() * left * a_bar_k * mrp::tilde(&(ln_k * e1));
    partial.fixed_view_mut::<1, 3>(0, 0).copy_from(&(-row0));
    let row1: RowVector3<f64> = e0.transpose() * left * a_bar_k * mrp::tilde(&(ln_k * e2));
    partial.fixed_view_mut::<1, 3>(1, 0).copy_from(&(-row1));
    let row2: RowVector3<f64> = e1.transpose() * left * a_bar_k * mrp::tilde(&(ln_k * e0));
    partial.fixed_view_mut::<1, 3>(2, 0).copy_from(&(-row2));

    partial
        .fixed_view_mut::<1, 3>(0, 3)
        .copy_from(&(e2.transpose() * left * mrp::tilde(&(a_bar_k * ln_k * e1))));
    partial
        .fixed_view_mut::<1, 3>(1, 3)
        .copy_from(&(e0.transpose() * left * mrp::tilde(&(a_bar_k * ln_k * e2))));
    partial
        .fixed_view_mut::<1, 3>(2, 3)
        .copy_from(&(e1.transpose() * left * mrp::tilde(&(a_bar_k * ln_k * e0))));

    partial
}

/// Covariance of the relative-pose observable obtained by pushing the
/// stacked pose covariance through [`compute_diprime_dvtilde`].
#[allow(clippy::too_many_arguments)]
pub fn compute_p_iprime(
    p_vtilde: &SMatrix<f64, 12, 12>,
    m_k: &Matrix3<f64>,
    x_k: &Vector3<f64>,
    m_km1: &Matrix3<f64>,
    x_km1: &Vector3<f64>,
    ln_k: &Matrix3<f64>,
    ln_km1: &Matrix3<f64>,
) -> SMatrix<f64, 6, 6> {
    let partial = compute_diprime_dvtilde(m_k, x_k, m_km1, x_km1, ln_k, ln_km1);
    partial * p_vtilde * partial.transpose()
}

/// The position-block measurement map J_k = [I₃, 4·M̄_{k+1}·tilde(C̄_{k+1})].
pub fn compute_j(m_kp1: &Matrix3<f64>, cl_kp1: &Vector3<f64>) -> SMatrix<f64, 3, 6> {
    let mut j: SMatrix<f64, 3, 6> = SMatrix::zeros();
    j.fixed_view_mut::<3, 3>(0, 0).copy_from(&Matrix3::identity());
    j.fixed_view_mut::<3, 3>(0, 3)
        .copy_from(&(m_kp1 * mrp::tilde(cl_kp1) * 4.0));
    j
}

/// The propagated measurement Jacobian H_k = Φ_k − M̄_{k+1}·Φ_k.
pub fn compute_h(phi_k: &Matrix3<f64>, m_kp1: &Matrix3<f64>) -> Matrix3<f64> {
    phi_k - m_kp1 * phi_k
}

/// The IOD residual y_k = C̄_k − M̄′_{k+1}·C̄_{k+1} + X̄′_{k+1}.
pub fn compute_y(
    cl_k: &Vector3<f64>,
    cl_kp1: &Vector3<f64>,
    m_kp1_prime: &Matrix3<f64>,
    x_kp1_prime: &Vector3<f64>,
) -> Vector3<f64> {
    cl_k - m_kp1_prime * cl_kp1 + x_kp1_prime
}

/// The downstream measurement covariance R_k = J_k·P_{I′_k}·J_kᵀ.
pub fn compute_r(
    m_kp1: &Matrix3<f64>,
    cl_kp1: &Vector3<f64>,
    p_iprime: &SMatrix<f64, 6, 6>,
) -> Matrix3<f64> {
    let j = compute_j(m_kp1, cl_kp1);
    j * p_iprime * j.transpose()
}

#[cfg(test)]
mod tests {
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    use super::*;

    // Transforms synthesized so the cost of the generating orbit is zero:
    // X_k = M_k r(t_{k+1}) − r(t_k)
    fn synthesize_transforms(
        elements: &KeplerianElements,
        count: usize,
        dt: f64,
        rotation_per_step: &Matrix3<f64>,
    ) -> Vec<RigidTransform> {
        (0..count)
            .map(|k| {
                let rotation = *rotation_per_step;
                let translation = rotation * elements.position_at((k + 1) as f64 * dt)
                    - elements.position_at(k as f64 * dt);
                RigidTransform {
                    t_start: 0.0,
                    t_end: (k + 1) as f64 * dt,
                    index_start: 0,
                    index_end: k + 1,
                    rotation,
                    translation,
                }
            })
            .collect()
    }

    fn circular_inclined() -> KeplerianElements {
        KeplerianElements {
            semi_major_axis: 1000.0,
            eccentricity: 0.0,
            inclination: 45.0f64.to_radians(),
            raan: 0.0,
            argument_of_periapsis: 0.0,
            mean_anomaly_at_epoch: 0.0,
            mu: 1.0,
        }
    }

    #[test]
    fn test_cost_is_zero_at_truth() {
        let elements = circular_inclined();
        let dt = elements.period() / 20.0;
        let transforms = synthesize_transforms(&elements, 10, dt, &Matrix3::identity());

        assert_abs_diff_eq!(
            IodFinder::cost_function(&elements, &transforms),
            0.0,
            epsilon = 1e-9
        );

        // And strictly positive away from the truth
        let mut perturbed = elements;
        perturbed.semi_major_axis *= 1.02;
        assert!(IodFinder::cost_function(&perturbed, &transforms) > 1.0);
    }

    #[test]
    fn test_recovers_circular_orbit_with_seeded_guess() {
        let truth = circular_inclined();
        let dt = truth.period() / 10.0;
        let transforms = synthesize_transforms(&truth, 10, dt, &Matrix3::identity());

        let finder = IodFinder::new(
            transforms,
            IodConfig {
                particles: 500,
                iterations: 200,
                seed: 3,
                ..Default::default()
            },
        );
        let recovered = finder.run(Some(truth), &CancelToken::new()).unwrap();

        let truth_vector = truth.to_state_vector();
        let recovered_vector = recovered.to_state_vector();
        for dim in 0..7 {
            let scale = truth_vector[dim].abs().max(1.0);
            assert!(
                (recovered_vector[dim] - truth_vector[dim]).abs() / scale < 1e-3,
                "element {dim} off: {} vs {}",
                recovered_vector[dim],
                truth_vector[dim]
            );
        }
    }

    #[test]
    fn test_swarm_improves_on_perturbed_guess() {
        let truth = KeplerianElements {
            eccentricity: 0.1,
            ..circular_inclined()
        };
        let dt = truth.period() / 12.0;
        let transforms = synthesize_transforms(&truth, 12, dt, &Matrix3::identity());

        let mut guess = truth;
        guess.semi_major_axis *= 1.01;
        guess.eccentricity += 0.02;
        let initial_cost = IodFinder::cost_function(&guess, &transforms);

        let finder = IodFinder::new(
            transforms.clone(),
            IodConfig {
                particles: 120,
                iterations: 120,
                seed: 17,
                ..Default::default()
            },
        );
        let recovered = finder.run(Some(guess), &CancelToken::new()).unwrap();
        let final_cost = IodFinder::cost_function(&recovered, &transforms);

        assert!(
            final_cost <= initial_cost,
            "swarm should never lose the seeded cost ({final_cost} vs {initial_cost})"
        );
    }

    #[test]
    fn test_non_uniform_sampling_rejected() {
        let elements = circular_inclined();
        let dt = elements.period() / 20.0;
        let mut transforms = synthesize_transforms(&elements, 5, dt, &Matrix3::identity());
        transforms[3].t_end += dt * 0.5;

        let finder = IodFinder::new(transforms, IodConfig::default());
        assert!(matches!(
            finder.run(None, &CancelToken::new()),
            Err(IodError::NonUniformSampling)
        ));
    }

    #[test]
    fn test_too_few_transforms_rejected() {
        let finder = IodFinder::new(Vec::new(), IodConfig::default());
        assert!(matches!(
            finder.run(None, &CancelToken::new()),
            Err(IodError::TooFewTransforms { got: 0 })
        ));
    }

    #[test]
    fn test_jacobian_shapes_and_identity_blocks() {
        let identity = Matrix3::identity();
        let x_k = Vector3::new(1.0, 0.0, 0.0);
        let x_km1 = Vector3::zeros();

        let partial =
            compute_diprime_dvtilde(&identity, &x_k, &identity, &x_km1, &identity, &identity);

        // Translation blocks reduce to ±I for identity rotations
        assert_relative_eq!(
            partial.fixed_view::<3, 3>(0, 0).into_owned(),
            Matrix3::identity(),
            epsilon = 1e-14
        );
        assert_relative_eq!(
            partial.fixed_view::<3, 3>(0, 3).into_owned(),
            -Matrix3::identity(),
            epsilon = 1e-14
        );

        // The observable covariance stays symmetric positive semi-definite
        let p_vtilde = SMatrix::<f64, 12, 12>::identity() * 1e-4;
        let p_iprime =
            compute_p_iprime(&p_vtilde, &identity, &x_k, &identity, &x_km1, &identity, &identity);
        assert_relative_eq!(p_iprime, p_iprime.transpose(), epsilon = 1e-18);

        let r = compute_r(&identity, &x_k, &p_iprime);
        assert_relative_eq!(r, r.transpose(), epsilon = 1e-18);

        // H_k vanishes when the relative rotation is the identity
        assert_relative_eq!(
            compute_h(&Matrix3::identity(), &Matrix3::identity()),
            Matrix3::zeros(),
            epsilon = 1e-16
        );
    }
}
