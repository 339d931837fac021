//! Analytical uncertainty propagation from control-point covariances to the
//! derived shape quantities, with Monte-Carlo validation.
//!
//! Control-point position covariances are independent across points (the
//! arena holds one 3×3 block per point). Every derived quantity Q is
//! polynomial in the control points, so its covariance is assembled by
//! accumulating per-point Jacobian blocks from the same index/coefficient
//! tables that produce the nominal values: P_Q = Σ_p J_p·P_p·J_pᵀ.

use nalgebra::{Matrix3, Matrix4, Matrix6, SMatrix, Vector3};
use rand::{rngs::SmallRng, SeedableRng};

use crate::shape::ControlPoint;

use super::shape::{BezierShapeError, ShapeModelBezier};

/// Eigenvalue gap below which the eigenvector partials are skipped.
const MIN_EIGENVALUE_GAP: f64 = 1e-9;

/// The spectral statistics derived from the inertia-tensor covariance.
#[derive(Clone, Debug)]
pub struct InertiaStatistics {
    /// 6×6 covariance of the inertia parameterization
    /// (Ixx, Iyy, Izz, Ixy, Ixz, Iyz).
    pub p_i: Matrix6<f64>,
    /// 4×4 covariance of (λ₁, λ₂, λ₃, V).
    pub p_moments: Matrix4<f64>,
    /// 3×3 covariance of the principal-axis MRP.
    pub p_sigma: Matrix3<f64>,
    /// 9×9 covariance of the stacked principal-axis unit vectors.
    pub p_eigenvectors: SMatrix<f64, 9, 9>,
}

impl ShapeModelBezier {
    /// ∂V/∂C_p for every control point, from the volume triples.
    fn volume_gradients(&self) -> Vec<Vector3<f64>> {
        let mut gradients = vec![Vector3::zeros(); self.control_points().len()];

        for patch in self.patches() {
            let global = patch.control_points();
            let coordinates: Vec<Vector3<f64>> = global
                .iter()
                .map(|index| self.control_points()[*index].coordinates)
                .collect();

            for (coef, [a, b, c]) in &self.tables().volume {
                let scaled = coef / 3.0;
                gradients[global[*a]] += coordinates[*b].cross(&coordinates[*c]) * scaled;
                gradients[global[*b]] += coordinates[*c].cross(&coordinates[*a]) * scaled;
                gradients[global[*c]] += coordinates[*a].cross(&coordinates[*b]) * scaled;
            }
        }

        gradients
    }

    /// The CoM numerator Γ (volume-weighted barycenter) and ∂Γ/∂C_p.
    fn gamma_and_gradients(&self) -> (Vector3<f64>, Vec<Matrix3<f64>>) {
        let mut gamma = Vector3::zeros();
        let mut gradients = vec![Matrix3::zeros(); self.control_points().len()];
        let axes = [Vector3::x(), Vector3::y(), Vector3::z()];

        for patch in self.patches() {
            let global = patch.control_points();
            let coordinates: Vec<Vector3<f64>> = global
                .iter()
                .map(|index| self.control_points()[*index].coordinates)
                .collect();

            for (coef, [a, b, c, d]) in &self.tables().cm_gamma {
                let cross = coordinates[*c].cross(&coordinates[*d]);
                let half = coef / 2.0;
                for m in 0..3 {
                    let pa = coordinates[*a][m];
                    let pb = coordinates[*b][m];
                    gamma[m] += half * pa * pb * cross[m];

                    gradients[global[*a]][(m, m)] += half * pb * cross[m];
                    gradients[global[*b]][(m, m)] += half * pa * cross[m];

                    let d_cross_dc = coordinates[*d].cross(&axes[m]);
                    let d_cross_dd = axes[m].cross(&coordinates[*c]);
                    for s in 0..3 {
                        gradients[global[*c]][(m, s)] += half * pa * pb * d_cross_dc[s];
                        gradients[global[*d]][(m, s)] += half * pa * pb * d_cross_dd[s];
                    }
                }
            }
        }

        (gamma, gradients)
    }

    /// The second moment about the origin and its per-point gradients
    /// (one 3-vector per tensor entry).
    #[allow(clippy::type_complexity)]
    fn second_moment_and_gradients(&self) -> (Matrix3<f64>, Vec<[[Vector3<f64>; 3]; 3]>) {
        let mut moment = Matrix3::zeros();
        let mut gradients =
            vec![[[Vector3::zeros(); 3]; 3]; self.control_points().len()];
        let axes = [Vector3::x(), Vector3::y(), Vector3::z()];

        for patch in self.patches() {
            let global = patch.control_points();
            let coordinates: Vec<Vector3<f64>> = global
                .iter()
                .map(|index| self.control_points()[*index].coordinates)
                .collect();

            for (coef, [a, b, c, d, e]) in &self.tables().inertia {
                let cross = coordinates[*d].cross(&coordinates[*e]);
                for m in 0..3 {
                    let pa = coordinates[*a][m];
                    let pb = coordinates[*b][m];
                    let common = coef * pa * pb * cross[m];
                    let d_cross_dd = coordinates[*e].cross(&axes[m]);
                    let d_cross_de = axes[m].cross(&coordinates[*d]);

                    for l in 0..3 {
                        let (weight, pc) = if l == m {
                            (1.0 / 3.0, coordinates[*c][m])
                        } else {
                            (1.0 / 2.0, coordinates[*c][l])
                        };
                        moment[(m, l)] += weight * common * pc;

                        let grads = &mut gradients[global[*a]];
                        grads[m][l][m] += weight * coef * pb * pc * cross[m];
                        let grads = &mut gradients[global[*b]];
                        grads[m][l][m] += weight * coef * pa * pc * cross[m];
                        // pc multiplies component m (diagonal) or l, which
                        // coincide on the diagonal
                        let grads = &mut gradients[global[*c]];
                        grads[m][l][l] += weight * common;

                        let grads = &mut gradients[global[*d]];
                        for s in 0..3 {
                            grads[m][l][s] += weight * coef * pa * pb * pc * d_cross_dd[s];
                        }
                        let grads = &mut gradients[global[*e]];
                        for s in 0..3 {
                            grads[m][l][s] += weight * coef * pa * pb * pc * d_cross_de[s];
                        }
                    }
                }
            }
        }

        (moment, gradients)
    }

    /// Standard deviation of the volume from the control-point covariances.
    pub fn volume_standard_deviation(&self) -> f64 {
        let gradients = self.volume_gradients();
        self.control_points()
            .iter()
            .zip(gradients)
            .map(|(point, gradient)| (gradient.transpose() * point.covariance * gradient)[(0, 0)])
            .sum::<f64>()
            .sqrt()
    }

    /// 3×3 covariance of the center of mass.
    pub fn center_of_mass_covariance(&self) -> Matrix3<f64> {
        let volume = self.volume();
        let com = self.center_of_mass();
        let volume_gradients = self.volume_gradients();
        let (_, gamma_gradients) = self.gamma_and_gradients();

        let mut covariance = Matrix3::zeros();
        for (index, point) in self.control_points().iter().enumerate() {
            let jacobian =
                (gamma_gradients[index] - com * volume_gradients[index].transpose()) / volume;
            covariance += jacobian * point.covariance * jacobian.transpose();
        }
        covariance
    }

    /// Covariances of the inertia parameterization and its spectral
    /// by-products (principal moments, principal-axis MRP, eigenvectors).
    pub fn inertia_statistics(&self) -> InertiaStatistics {
        let volume = self.volume();
        let scale = volume.powf(5.0 / 3.0);
        let inertia = self.inertia();

        let volume_gradients = self.volume_gradients();
        let (gamma, gamma_gradients) = self.gamma_and_gradients();
        let (moment, moment_gradients) = self.second_moment_and_gradients();
        let moment = (moment + moment.transpose()) / 2.0;

        // Nominal centered tensor and its trace term
        let centered = moment - gamma * gamma.transpose() / volume;
        let j_nominal = Matrix3::identity() * centered.trace() - centered;

        // Per-point 7×3 Jacobian of (I6, V), accumulated into the joint
        // covariance
        let mut joint = SMatrix::<f64, 7, 7>::zeros();
        let pairs = [(0, 0), (1, 1), (2, 2), (0, 1), (0, 2), (1, 2)];

        for (index, point) in self.control_points().iter().enumerate() {
            let dv = volume_gradients[index];
            let dgamma = gamma_gradients[index];
            let dmoment = &moment_gradients[index];

            // dCm for every entry, as gradient vectors
            let mut d_centered = [[Vector3::zeros(); 3]; 3];
            for m in 0..3 {
                for l in 0..3 {
                    let d_symmetric = (dmoment[m][l] + dmoment[l][m]) / 2.0;
                    let d_outer = (dgamma.row(m).transpose() * gamma[l]
                        + dgamma.row(l).transpose() * gamma[m])
                        / volume
                        - dv * (gamma[m] * gamma[l] / (volume * volume));
                    d_centered[m][l] = d_symmetric - d_outer;
                }
            }
            let d_trace = d_centered[0][0] + d_centered[1][1] + d_centered[2][2];

            let mut jacobian = SMatrix::<f64, 7, 3>::zeros();
            for (row, (m, l)) in pairs.iter().enumerate() {
                // J_ml = δ_ml tr(Cm) − Cm_ml, then non-dimensionalized
                let d_j = if m == l {
                    d_trace - d_centered[*m][*l]
                } else {
                    -d_centered[*m][*l]
                };
                let d_nondimensional = d_j / scale
                    - dv * (j_nominal[(*m, *l)] * 5.0 / (3.0 * volume.powf(8.0 / 3.0)));
                jacobian.row_mut(row).copy_from(&d_nondimensional.transpose());
            }
            jacobian.row_mut(6).copy_from(&dv.transpose());

            joint += jacobian * point.covariance * jacobian.transpose();
        }

        let p_i = joint.fixed_view::<6, 6>(0, 0).into_owned();

        // Spectral partials through first-order symmetric eigen-perturbation
        let eigen = inertia.symmetric_eigen();
        let mut order = [0usize, 1, 2];
        order.sort_by(|a, b| eigen.eigenvalues[*a].total_cmp(&eigen.eigenvalues[*b]));
        let lambdas = [
            eigen.eigenvalues[order[0]],
            eigen.eigenvalues[order[1]],
            eigen.eigenvalues[order[2]],
        ];
        let vectors = [
            eigen.eigenvectors.column(order[0]).into_owned(),
            eigen.eigenvectors.column(order[1]).into_owned(),
            eigen.eigenvectors.column(order[2]).into_owned(),
        ];

        // ∂λ_i/∂I6
        let mut j_lambda = SMatrix::<f64, 3, 6>::zeros();
        for i in 0..3 {
            let e = &vectors[i];
            j_lambda.row_mut(i).copy_from(&SMatrix::<f64, 1, 6>::from_row_slice(&[
                e.x * e.x,
                e.y * e.y,
                e.z * e.z,
                2.0 * e.x * e.y,
                2.0 * e.x * e.z,
                2.0 * e.y * e.z,
            ]));
        }

        let mut j_moments_volume = SMatrix::<f64, 4, 7>::zeros();
        j_moments_volume
            .fixed_view_mut::<3, 6>(0, 0)
            .copy_from(&j_lambda);
        j_moments_volume[(3, 6)] = 1.0;
        let p_moments = (j_moments_volume * joint * j_moments_volume.transpose()).into();

        // ∂e_i/∂I6 through the resolvent
        let sensitivity = |i: usize, j: usize| -> SMatrix<f64, 1, 6> {
            let (ei, ej) = (&vectors[i], &vectors[j]);
            SMatrix::<f64, 1, 6>::from_row_slice(&[
                ej.x * ei.x,
                ej.y * ei.y,
                ej.z * ei.z,
                ej.x * ei.y + ej.y * ei.x,
                ej.x * ei.z + ej.z * ei.x,
                ej.y * ei.z + ej.z * ei.y,
            ])
        };

        let mut j_eigenvectors = SMatrix::<f64, 9, 6>::zeros();
        for i in 0..3 {
            let mut block = SMatrix::<f64, 3, 6>::zeros();
            for j in 0..3 {
                if i == j {
                    continue;
                }
                let gap = lambdas[i] - lambdas[j];
                if gap.abs() < MIN_EIGENVALUE_GAP {
                    log::warn!("Near-degenerate principal moments, skipping eigenvector partial");
                    continue;
                }
                block += vectors[j] * (sensitivity(j, i) / gap);
            }
            j_eigenvectors.fixed_view_mut::<3, 6>(3 * i, 0).copy_from(&block);
        }
        let p_eigenvectors = j_eigenvectors * p_i * j_eigenvectors.transpose();

        // Small-rotation vector of the eigenframe: δθ = ½ Σ e_i × δe_i,
        // mapped to an MRP deviation δσ = δθ/4
        let mut j_theta = SMatrix::<f64, 3, 6>::zeros();
        for i in 0..3 {
            let block = j_eigenvectors.fixed_view::<3, 6>(3 * i, 0).into_owned();
            j_theta += crate::types::mrp::tilde(&vectors[i]) * block / 2.0;
        }
        let j_sigma = j_theta / 4.0;
        let p_sigma = (j_sigma * p_i * j_sigma.transpose()).into();

        InertiaStatistics {
            p_i,
            p_moments,
            p_sigma,
            p_eigenvectors,
        }
    }

    /// 3×3 covariance of the surface point of a patch at (u, v), from the
    /// per-control-point covariances pushed through the Bernstein weights.
    pub fn covariance_surface_point(&self, patch_index: usize, u: f64, v: f64) -> Matrix3<f64> {
        let patch = &self.patches()[patch_index];
        let weights = patch.bernstein_weights(u, v);

        weights
            .iter()
            .zip(patch.control_points())
            .map(|(weight, index)| {
                self.control_points()[*index].covariance * (weight * weight)
            })
            .sum()
    }

    /// Variance of the range measured along `direction` to the surface point
    /// at (u, v): dᵀ·P(u,v)·d.
    pub fn range_variance(
        &self,
        patch_index: usize,
        u: f64,
        v: f64,
        direction: &Vector3<f64>,
    ) -> f64 {
        let covariance = self.covariance_surface_point(patch_index, u, v);
        (direction.transpose() * covariance * direction)[(0, 0)]
    }

    /// Monte-Carlo standard deviation of the volume under the control-point
    /// covariances.
    pub fn monte_carlo_volume_sd(&self, samples: usize, seed: u64) -> f64 {
        let mut rng = SmallRng::seed_from_u64(seed);
        let factors = self.covariance_factors();

        let mut sum = 0.0;
        let mut sum_squared = 0.0;
        let mut perturbed: Vec<ControlPoint> = self.control_points().to_vec();

        for _ in 0..samples {
            self.perturb_into(&mut perturbed, &factors, &mut rng);
            let volume = self.volume_of(&perturbed);
            sum += volume;
            sum_squared += volume * volume;
        }

        let mean = sum / samples as f64;
        (sum_squared / samples as f64 - mean * mean).max(0.0).sqrt()
    }

    /// Monte-Carlo standard deviation of the range to the surface along a
    /// fixed ray, re-casting against the nominally-hit patch after each
    /// control-point perturbation.
    ///
    /// # Errors
    /// [`BezierShapeError::OutOfDomain`] when the nominal ray, or any
    /// perturbed re-cast, misses the surface.
    pub fn monte_carlo_range_sd(
        &self,
        origin: &Vector3<f64>,
        direction: &Vector3<f64>,
        samples: usize,
        seed: u64,
    ) -> Result<f64, BezierShapeError> {
        let direction = direction.normalize();

        // Nominal hit
        let mut nominal = None;
        for (index, patch) in self.patches().iter().enumerate() {
            let [c0, c1, c2] = patch.corners();
            if let Some((t, u, v)) = crate::geometry::ray_triangle_intersect(
                origin,
                &direction,
                &self.control_points()[c0].coordinates,
                &self.control_points()[c1].coordinates,
                &self.control_points()[c2].coordinates,
            ) {
                if let Some(hit) = patch.ray_cast(
                    self.control_points(),
                    origin,
                    &direction,
                    (t, 1.0 - u - v, u),
                ) {
                    nominal = Some((index, hit));
                    break;
                }
            }
        }
        let (patch_index, nominal_hit) = nominal.ok_or(BezierShapeError::OutOfDomain)?;
        let patch = &self.patches()[patch_index];

        let mut rng = SmallRng::seed_from_u64(seed);
        let factors = self.covariance_factors();
        let mut perturbed: Vec<ControlPoint> = self.control_points().to_vec();

        let mut sum = 0.0;
        let mut sum_squared = 0.0;
        for _ in 0..samples {
            self.perturb_into(&mut perturbed, &factors, &mut rng);
            let (range, _, _) = patch
                .ray_cast(&perturbed, origin, &direction, nominal_hit)
                .ok_or(BezierShapeError::OutOfDomain)?;
            sum += range;
            sum_squared += range * range;
        }

        let mean = sum / samples as f64;
        Ok((sum_squared / samples as f64 - mean * mean).max(0.0).sqrt())
    }

    /// Lower-triangular factors of every control point's covariance.
    fn covariance_factors(&self) -> Vec<Option<Matrix3<f64>>> {
        self.control_points()
            .iter()
            .map(|point| point.covariance.cholesky().map(|factor| factor.l()))
            .collect()
    }

    fn perturb_into(
        &self,
        perturbed: &mut [ControlPoint],
        factors: &[Option<Matrix3<f64>>],
        rng: &mut SmallRng,
    ) {
        use rand::distributions::Distribution;
        let normal = rand::distributions::Uniform::new(0.0f64, 1.0);
        let mut gauss = || {
            // Box-Muller
            let u1: f64 = normal.sample(rng).max(f64::MIN_POSITIVE);
            let u2: f64 = normal.sample(rng);
            (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
        };

        for ((target, nominal), factor) in perturbed
            .iter_mut()
            .zip(self.control_points())
            .zip(factors)
        {
            target.coordinates = match factor {
                Some(lower) => {
                    nominal.coordinates + lower * Vector3::new(gauss(), gauss(), gauss())
                }
                None => nominal.coordinates,
            };
        }
    }

    /// Volume of the shape with substituted control-point positions.
    fn volume_of(&self, points: &[ControlPoint]) -> f64 {
        let mut volume = 0.0;
        for patch in self.patches() {
            let global = patch.control_points();
            for (coef, [a, b, c]) in &self.tables().volume {
                let pa = points[global[*a]].coordinates;
                let pb = points[global[*b]].coordinates;
                let pc = points[global[*c]].coordinates;
                volume += coef * pa.dot(&pb.cross(&pc)) / 3.0;
            }
        }
        volume
    }
}
