//! Keplerian elements and two-body propagation.

use nalgebra::{Rotation3, Vector3};

/// A Keplerian element set (a, e, i, Ω, ω, M₀) with its gravitational
/// parameter, defined at an implicit epoch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KeplerianElements {
    /// Semi-major axis.
    pub semi_major_axis: f64,
    /// Eccentricity.
    pub eccentricity: f64,
    /// Inclination, radians.
    pub inclination: f64,
    /// Right ascension of the ascending node, radians.
    pub raan: f64,
    /// Argument of periapsis, radians.
    pub argument_of_periapsis: f64,
    /// Mean anomaly at epoch, radians.
    pub mean_anomaly_at_epoch: f64,
    /// Gravitational parameter.
    pub mu: f64,
}

impl KeplerianElements {
    /// Builds an element set from the stacked 7-vector
    /// (a, e, i, Ω, ω, M₀, μ) used by the swarm optimizer.
    pub fn from_state_vector(state: &[f64; 7]) -> Self {
        Self::from_state_slice(state)
    }

    /// Same as [`KeplerianElements::from_state_vector`] over a slice whose
    /// first seven entries are read.
    pub fn from_state_slice(state: &[f64]) -> Self {
        Self {
            semi_major_axis: state[0],
            eccentricity: state[1],
            inclination: state[2],
            raan: state[3],
            argument_of_periapsis: state[4],
            mean_anomaly_at_epoch: state[5],
            mu: state[6],
        }
    }

    /// Returns the stacked 7-vector (a, e, i, Ω, ω, M₀, μ).
    pub fn to_state_vector(&self) -> [f64; 7] {
        [
            self.semi_major_axis,
            self.eccentricity,
            self.inclination,
            self.raan,
            self.argument_of_periapsis,
            self.mean_anomaly_at_epoch,
            self.mu,
        ]
    }

    /// Mean motion n = √(μ/a³).
    pub fn mean_motion(&self) -> f64 {
        (self.mu / self.semi_major_axis.powi(3)).sqrt()
    }

    /// Orbital period.
    pub fn period(&self) -> f64 {
        2.0 * std::f64::consts::PI / self.mean_motion()
    }

    /// Cartesian position at `elapsed` seconds past the epoch.
    pub fn position_at(&self, elapsed: f64) -> Vector3<f64> {
        let mean_anomaly = self.mean_anomaly_at_epoch + self.mean_motion() * elapsed;
        let eccentric_anomaly = solve_kepler(mean_anomaly, self.eccentricity);

        let radius = self.semi_major_axis * (1.0 - self.eccentricity * eccentric_anomaly.cos());
        let true_anomaly = 2.0
            * ((1.0 + self.eccentricity).sqrt() * (eccentric_anomaly / 2.0).sin())
                .atan2((1.0 - self.eccentricity).sqrt() * (eccentric_anomaly / 2.0).cos());

        let perifocal = Vector3::new(
            radius * true_anomaly.cos(),
            radius * true_anomaly.sin(),
            0.0,
        );

        let rotation = Rotation3::from_axis_angle(&Vector3::z_axis(), self.raan)
            * Rotation3::from_axis_angle(&Vector3::x_axis(), self.inclination)
            * Rotation3::from_axis_angle(&Vector3::z_axis(), self.argument_of_periapsis);

        rotation * perifocal
    }
}

/// Solves Kepler's equation E − e·sin E = M by Newton iteration.
pub fn solve_kepler(mean_anomaly: f64, eccentricity: f64) -> f64 {
    let mut eccentric_anomaly = if eccentricity < 0.8 {
        mean_anomaly
    } else {
        std::f64::consts::PI
    };

    for _ in 0..50 {
        let f = eccentric_anomaly - eccentricity * eccentric_anomaly.sin() - mean_anomaly;
        let f_prime = 1.0 - eccentricity * eccentric_anomaly.cos();
        let step = f / f_prime;
        eccentric_anomaly -= step;
        if step.abs() < 1e-14 {
            break;
        }
    }

    eccentric_anomaly
}
