//! Rigid-body rotational dynamics in MRP coordinates, with the state
//! transition matrix propagated alongside for batch estimation.

use nalgebra::{DVector, Matrix3, Matrix6, SMatrix, Vector3, Vector6};

use crate::types::mrp;

/// Length of the (σ, ω) attitude state.
pub const STATE_SIZE: usize = 6;
/// Length of the state augmented with its vectorized STM.
pub const AUGMENTED_SIZE: usize = STATE_SIZE + STATE_SIZE * STATE_SIZE;

/// Euler rotational dynamics of a rigid body with a fixed inertia tensor,
/// attitude parameterized by MRPs.
#[derive(Clone, Debug)]
pub struct AttitudeDynamics {
    inertia: Matrix3<f64>,
    inertia_inverse: Matrix3<f64>,
}

impl AttitudeDynamics {
    /// Creates the dynamics for the given (symmetric positive-definite)
    /// inertia tensor.
    pub fn new(inertia: Matrix3<f64>) -> Self {
        let inertia_inverse = inertia
            .try_inverse()
            .unwrap_or_else(Matrix3::identity);
        Self {
            inertia,
            inertia_inverse,
        }
    }

    /// Returns the configured inertia tensor.
    pub fn inertia(&self) -> &Matrix3<f64> {
        &self.inertia
    }

    /// Time derivative of the (σ, ω) state:
    /// σ̇ = ¼·B(σ)·ω, ω̇ = I⁻¹·(−ω × I·ω).
    pub fn state_derivative(&self, state: &Vector6<f64>) -> Vector6<f64> {
        let sigma = state.fixed_rows::<3>(0).into_owned();
        let omega = state.fixed_rows::<3>(3).into_owned();

        let sigma_dot = mrp::bmat(&sigma) * omega / 4.0;
        let omega_dot = self.inertia_inverse * (-(omega.cross(&(self.inertia * omega))));

        let mut derivative = Vector6::zeros();
        derivative.fixed_rows_mut::<3>(0).copy_from(&sigma_dot);
        derivative.fixed_rows_mut::<3>(3).copy_from(&omega_dot);
        derivative
    }

    /// Jacobian of the state derivative with respect to the state.
    pub fn jacobian(&self, state: &Vector6<f64>) -> Matrix6<f64> {
        let sigma = state.fixed_rows::<3>(0).into_owned();
        let omega = state.fixed_rows::<3>(3).into_owned();

        // d(¼ B(σ) ω)/dσ
        let dsigma_dot_dsigma = (-omega * sigma.transpose() - mrp::tilde(&omega)
            + Matrix3::identity() * sigma.dot(&omega)
            + sigma * omega.transpose())
            / 2.0;
        let dsigma_dot_domega = mrp::bmat(&sigma) / 4.0;

        // d(I⁻¹ (−ω × Iω))/dω
        let domega_dot_domega = self.inertia_inverse
            * (mrp::tilde(&(self.inertia * omega)) - mrp::tilde(&omega) * self.inertia);

        let mut jacobian = Matrix6::zeros();
        jacobian
            .fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&dsigma_dot_dsigma);
        jacobian
            .fixed_view_mut::<3, 3>(0, 3)
            .copy_from(&dsigma_dot_domega);
        jacobian
            .fixed_view_mut::<3, 3>(3, 3)
            .copy_from(&domega_dot_domega);
        jacobian
    }

    /// Derivative of the augmented (state, vectorized STM) vector:
    /// ẋ = f(x), Φ̇ = A(x)·Φ.
    pub fn augmented_derivative(&self, augmented: &DVector<f64>) -> DVector<f64> {
        let state = Vector6::from_iterator(augmented.iter().take(STATE_SIZE).copied());
        let stm = unpack_stm(augmented);

        let state_dot = self.state_derivative(&state);
        let stm_dot = self.jacobian(&state) * stm;

        let mut derivative = DVector::zeros(AUGMENTED_SIZE);
        derivative
            .fixed_rows_mut::<STATE_SIZE>(0)
            .copy_from(&state_dot);
        for col in 0..STATE_SIZE {
            for row in 0..STATE_SIZE {
                derivative[STATE_SIZE + col * STATE_SIZE + row] = stm_dot[(row, col)];
            }
        }
        derivative
    }
}

/// Packs a state and an STM into an augmented vector (STM column-major).
pub fn pack_augmented(state: &Vector6<f64>, stm: &Matrix6<f64>) -> DVector<f64> {
    let mut augmented = DVector::zeros(AUGMENTED_SIZE);
    augmented.fixed_rows_mut::<STATE_SIZE>(0).copy_from(state);
    for col in 0..STATE_SIZE {
        for row in 0..STATE_SIZE {
            augmented[STATE_SIZE + col * STATE_SIZE + row] = stm[(row, col)];
        }
    }
    augmented
}

/// Extracts the state from an augmented vector.
pub fn unpack_state(augmented: &DVector<f64>) -> Vector6<f64> {
    Vector6::from_iterator(augmented.iter().take(STATE_SIZE).copied())
}

/// Extracts the STM from an augmented vector.
pub fn unpack_stm(augmented: &DVector<f64>) -> Matrix6<f64> {
    let mut stm: SMatrix<f64, 6, 6> = Matrix6::zeros();
    for col in 0..STATE_SIZE {
        for row in 0..STATE_SIZE {
            stm[(row, col)] = augmented[STATE_SIZE + col * STATE_SIZE + row];
        }
    }
    stm
}

/// Jacobian of the MRP shadow-set switch σ → −σ/‖σ‖².
pub fn shadow_switch_jacobian(sigma: &Vector3<f64>) -> Matrix3<f64> {
    let s2 = sigma.norm_squared();
    (-Matrix3::identity() + (sigma * sigma.transpose()) * (2.0 / s2)) / s2
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    fn test_dynamics() -> AttitudeDynamics {
        AttitudeDynamics::new(Matrix3::from_diagonal(&Vector3::new(1.0, 2.0, 3.0)))
    }

    #[test]
    fn test_angular_momentum_axis_spin_is_stationary() {
        // A pure spin about a principal axis produces no angular acceleration
        let dynamics = test_dynamics();
        let state = Vector6::new(0.0, 0.0, 0.0, 0.0, 0.0, 0.3);
        let derivative = dynamics.state_derivative(&state);
        assert_abs_diff_eq!(
            derivative.fixed_rows::<3>(3).into_owned(),
            Vector3::zeros(),
            epsilon = 1e-15
        );
        // And at zero attitude the MRP rate is a quarter of omega
        assert_abs_diff_eq!(
            derivative.fixed_rows::<3>(0).into_owned(),
            Vector3::new(0.0, 0.0, 0.075),
            epsilon = 1e-15
        );
    }

    #[test]
    fn test_jacobian_matches_finite_differences() {
        let dynamics = test_dynamics();
        let state = Vector6::new(0.1, -0.2, 0.05, 0.2, -0.1, 0.3);
        let analytic = dynamics.jacobian(&state);

        let step = 1e-7;
        for column in 0..STATE_SIZE {
            let mut plus = state;
            let mut minus = state;
            plus[column] += step;
            minus[column] -= step;
            let numeric =
                (dynamics.state_derivative(&plus) - dynamics.state_derivative(&minus))
                    / (2.0 * step);
            for row in 0..STATE_SIZE {
                assert_abs_diff_eq!(analytic[(row, column)], numeric[row], epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_augmented_roundtrip() {
        let state = Vector6::new(0.1, 0.2, 0.3, 0.4, 0.5, 0.6);
        let mut stm = Matrix6::identity();
        stm[(2, 4)] = 0.5;
        let packed = pack_augmented(&state, &stm);
        assert_eq!(unpack_state(&packed), state);
        assert_eq!(unpack_stm(&packed), stm);
    }

    #[test]
    fn test_shadow_switch_jacobian_finite_differences() {
        let sigma = Vector3::new(1.1, -0.4, 0.3);
        let analytic = shadow_switch_jacobian(&sigma);
        let step = 1e-7;
        for column in 0..3 {
            let mut plus = sigma;
            let mut minus = sigma;
            plus[column] += step;
            minus[column] -= step;
            let numeric = (mrp::shadow(&plus) - mrp::shadow(&minus)) / (2.0 * step);
            for row in 0..3 {
                assert_abs_diff_eq!(analytic[(row, column)], numeric[row], epsilon = 1e-6);
            }
        }
    }
}
