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

//! Modified Rodrigues Parameter attitude kinematics.
//!
//! The MRP set σ = tan(Φ/4)·ê has a geometric singularity at Φ = 2π, handled
//! by switching to the shadow set σ → −σ/‖σ‖² whenever ‖σ‖ exceeds one.
//! Direction cosine matrices produced here map frame-N coordinates into
//! frame-B coordinates for an MRP describing the attitude of B relative to N.

use nalgebra::{Matrix3, RowVector3, Vector3};

/// Returns the skew-symmetric cross-product matrix of `v`, such that
/// `tilde(v) * w == v.cross(&w)`.
#[inline]
pub fn tilde(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Converts an MRP set to the corresponding direction cosine matrix.
///
/// # Arguments
/// * `sigma`: The MRP 3-vector.
///
/// # Returns
/// An orthonormal [`Matrix3`] with determinant +1.
pub fn mrp_to_dcm(sigma: &Vector3<f64>) -> Matrix3<f64> {
    let s2 = sigma.norm_squared();
    let st = tilde(sigma);
    let denominator = (1.0 + s2) * (1.0 + s2);

    Matrix3::identity() + (st * st * 8.0 - st * (4.0 * (1.0 - s2))) / denominator
}

/// Extracts the MRP set from a direction cosine matrix.
///
/// Uses Sheppard's quaternion extraction to stay well-conditioned for any
/// rotation, then maps to the MRP set with a non-negative scalar part, which
/// guarantees ‖σ‖ ≤ 1 (the short rotation).
///
/// # Arguments
/// * `dcm`: An orthonormal rotation matrix.
///
/// # Returns
/// The MRP 3-vector describing the same rotation.
pub fn dcm_to_mrp(dcm: &Matrix3<f64>) -> Vector3<f64> {
    let trace = dcm.trace();

    // Squared quaternion components, Sheppard's method
    let q_squared = [
        (1.0 + trace) / 4.0,
        (1.0 + 2.0 * dcm[(0, 0)] - trace) / 4.0,
        (1.0 + 2.0 * dcm[(1, 1)] - trace) / 4.0,
        (1.0 + 2.0 * dcm[(2, 2)] - trace) / 4.0,
    ];

    let max_index = q_squared
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(idx, _)| idx)
        .unwrap_or(0);

    let mut q = [0.0f64; 4];
    match max_index {
        0 => {
            q[0] = q_squared[0].sqrt();
            q[1] = (dcm[(1, 2)] - dcm[(2, 1)]) / (4.0 * q[0]);
            q[2] = (dcm[(2, 0)] - dcm[(0, 2)]) / (4.0 * q[0]);
            q[3] = (dcm[(0, 1)] - dcm[(1, 0)]) / (4.0 * q[0]);
        }
        1 => {
            q[1] = q_squared[1].sqrt();
            q[0] = (dcm[(1, 2)] - dcm[(2, 1)]) / (4.0 * q[1]);
            q[2] = (dcm[(0, 1)] + dcm[(1, 0)]) / (4.0 * q[1]);
            q[3] = (dcm[(2, 0)] + dcm[(0, 2)]) / (4.0 * q[1]);
        }
        2 => {
            q[2] = q_squared[2].sqrt();
            q[0] = (dcm[(2, 0)] - dcm[(0, 2)]) / (4.0 * q[2]);
            q[1] = (dcm[(0, 1)] + dcm[(1, 0)]) / (4.0 * q[2]);
            q[3] = (dcm[(1, 2)] + dcm[(2, 1)]) / (4.0 * q[2]);
        }
        _ => {
            q[3] = q_squared[3].sqrt();
            q[0] = (dcm[(0, 1)] - dcm[(1, 0)]) / (4.0 * q[3]);
            q[1] = (dcm[(2, 0)] + dcm[(0, 2)]) / (4.0 * q[3]);
            q[2] = (dcm[(1, 2)] + dcm[(2, 1)]) / (4.0 * q[3]);
        }
    }

    // Enforce a non-negative scalar part so the resulting MRP is inside the
    // unit sphere
    if q[0] < 0.0 {
        q.iter_mut().for_each(|component| *component = -*component);
    }

    Vector3::new(q[1], q[2], q[3]) / (1.0 + q[0])
}

/// Maps an MRP set to its shadow counterpart, σ → −σ/‖σ‖².
///
/// The shadow set describes the same physical attitude while avoiding the
/// 2π singularity of the original set.
#[inline]
pub fn shadow(sigma: &Vector3<f64>) -> Vector3<f64> {
    -sigma / sigma.norm_squared()
}

/// Switches `sigma` to its shadow set when it leaves the unit sphere,
/// otherwise returns it unchanged.
#[inline]
pub fn switch_if_needed(sigma: Vector3<f64>) -> Vector3<f64> {
    if sigma.norm() > 1.0 {
        shadow(&sigma)
    } else {
        sigma
    }
}

/// Composes two MRP sets via their direction cosine matrices, returning the
/// MRP of the rotation `second` applied after `first`.
pub fn compose(second: &Vector3<f64>, first: &Vector3<f64>) -> Vector3<f64> {
    dcm_to_mrp(&(mrp_to_dcm(second) * mrp_to_dcm(first)))
}

/// Returns the MRP kinematics matrix B(σ), satisfying σ̇ = ¼·B(σ)·ω.
pub fn bmat(sigma: &Vector3<f64>) -> Matrix3<f64> {
    let s2 = sigma.norm_squared();
    Matrix3::identity() * (1.0 - s2) + tilde(sigma) * 2.0 + (sigma * sigma.transpose()) * 2.0
}

/// Partial derivative of the point-to-plane measurement with respect to a
/// multiplicative MRP perturbation of the pose, evaluated at zero deviation.
///
/// For a residual `n · (C(δσ)·p + δx − d)` the rotational block is
/// `4·nᵀ·tilde(p)`, the translational block being `nᵀ` itself.
///
/// # Arguments
/// * `point`: The transformed source point at the current pose estimate.
/// * `normal`: The destination-point surface normal.
#[inline]
pub fn dg_dsigma_multiplicative(point: &Vector3<f64>, normal: &Vector3<f64>) -> RowVector3<f64> {
    (normal.transpose() * tilde(point)) * 4.0
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    use super::*;

    #[test]
    fn test_mrp_dcm_roundtrip() {
        let sigma = Vector3::new(0.3, -0.1, 0.25);
        let roundtrip = dcm_to_mrp(&mrp_to_dcm(&sigma));
        assert_abs_diff_eq!(sigma, roundtrip, epsilon = 1e-12);
    }

    #[test]
    fn test_mrp_to_dcm_is_orthonormal() {
        let dcm = mrp_to_dcm(&Vector3::new(0.7, 0.2, -0.4));
        assert_abs_diff_eq!(dcm * dcm.transpose(), Matrix3::identity(), epsilon = 1e-12);
        assert_abs_diff_eq!(dcm.determinant(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_known_rotation() {
        // 90 degrees about z: sigma = tan(pi/8) * e_z
        let sigma = Vector3::new(0.0, 0.0, (PI / 8.0).tan());
        let dcm = mrp_to_dcm(&sigma);

        // [BN] maps inertial x onto body coordinates; for a +90deg body
        // rotation about z the inertial x axis reads as -y in body axes
        let mapped = dcm * Vector3::x();
        assert_abs_diff_eq!(mapped, Vector3::new(0.0, -1.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_shadow_set_same_attitude() {
        let sigma = Vector3::new(0.8, 0.3, -0.2);
        assert_abs_diff_eq!(
            mrp_to_dcm(&sigma),
            mrp_to_dcm(&shadow(&sigma)),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_switch_if_needed() {
        let inside = Vector3::new(0.3, 0.1, 0.2);
        assert_eq!(switch_if_needed(inside), inside);

        let outside = Vector3::new(1.2, 0.0, 0.9);
        let switched = switch_if_needed(outside);
        assert!(switched.norm() < 1.0);
        assert_abs_diff_eq!(mrp_to_dcm(&switched), mrp_to_dcm(&outside), epsilon = 1e-12);
    }

    #[test]
    fn test_dcm_to_mrp_stays_in_unit_sphere() {
        // A rotation beyond 180 degrees must come back as the short set
        let long_sigma = Vector3::new(0.0, 0.0, 1.5);
        let recovered = dcm_to_mrp(&mrp_to_dcm(&long_sigma));
        assert!(recovered.norm() <= 1.0);
        assert_abs_diff_eq!(
            mrp_to_dcm(&recovered),
            mrp_to_dcm(&long_sigma),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_compose_matches_dcm_product() {
        let a = Vector3::new(0.1, 0.2, -0.05);
        let b = Vector3::new(-0.3, 0.05, 0.12);
        let composed = compose(&a, &b);
        assert_abs_diff_eq!(
            mrp_to_dcm(&composed),
            mrp_to_dcm(&a) * mrp_to_dcm(&b),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_bmat_kinematics_identity() {
        // At sigma = 0, sigma-dot = omega / 4
        let omega = Vector3::new(0.1, -0.2, 0.3);
        let sigma_dot = bmat(&Vector3::zeros()) * omega / 4.0;
        assert_abs_diff_eq!(sigma_dot, omega / 4.0, epsilon = 1e-15);
    }

    #[test]
    fn test_dg_dsigma_matches_finite_difference() {
        let point = Vector3::new(0.4, -0.7, 1.2);
        let normal = Vector3::new(0.0, 0.6, 0.8);
        let analytic = dg_dsigma_multiplicative(&point, &normal);

        let step = 1e-7;
        for axis in 0..3 {
            let mut sigma = Vector3::zeros();
            sigma[axis] = step;
            let plus = normal.dot(&(mrp_to_dcm(&sigma) * point));
            sigma[axis] = -step;
            let minus = normal.dot(&(mrp_to_dcm(&sigma) * point));
            let numeric = (plus - minus) / (2.0 * step);
            assert_abs_diff_eq!(analytic[axis], numeric, epsilon = 1e-6);
        }
    }
}
