use nalgebra::{Matrix3, Vector3};
use thiserror::Error;

/// Contains the resulting rigid transform and diagnostics of a successful
/// ICP convergence.
#[derive(Clone, Debug)]
pub struct IcpSuccess {
    /// Rotation aligning the source cloud onto the destination cloud.
    pub rotation: Matrix3<f64>,
    /// Translation aligning the source cloud onto the destination cloud.
    pub translation: Vector3<f64>,
    /// Root-mean-square point-to-plane residual over the accepted pairs.
    pub residual_rms: f64,
    /// Number of point pairs accepted in the final iteration.
    pub accepted_pairs: usize,
    /// The amount of iterations passed until convergence.
    pub iterations: usize,
}

impl IcpSuccess {
    pub(crate) fn identity() -> Self {
        Self {
            rotation: Matrix3::identity(),
            translation: Vector3::zeros(),
            residual_rms: f64::INFINITY,
            accepted_pairs: 0,
            iterations: 0,
        }
    }
}

/// The reasons an ICP run can fail. Failure variants that interrupt an
/// ongoing refinement carry the last consistent estimate.
#[derive(Debug, Error)]
pub enum IcpError {
    /// The source point cloud held no points.
    #[error("source point cloud is empty")]
    SourcePointCloudEmpty,
    /// The destination point cloud held no points.
    #[error("destination point cloud is empty")]
    DestinationPointCloudEmpty,
    /// The configured iteration count was zero.
    #[error("iteration count must be greater than zero")]
    IterationCountIsZero,
    /// The convergence threshold was non-positive or NaN.
    #[error("convergence threshold must be a positive number")]
    InvalidConvergenceThreshold,
    /// Fewer valid pairs survived rejection than the configured minimum.
    #[error("too few correspondences survived rejection ({found} < {minimum})")]
    NoPairs {
        /// Pairs that survived rejection.
        found: usize,
        /// Configured minimum.
        minimum: usize,
    },
    /// The normal matrix could not be factorized.
    #[error("normal equations are singular")]
    Singular {
        /// Last consistent estimate before the failure.
        last: Box<IcpSuccess>,
    },
    /// The residual increased three iterations in a row.
    #[error("icp diverged: residual increased three iterations in a row")]
    Diverged {
        /// Last consistent estimate before the divergence streak.
        last: Box<IcpSuccess>,
    },
    /// The iteration cap was reached without meeting the tolerance.
    #[error("icp exceeded {iterations} iterations without converging")]
    ConvergenceFailed {
        /// Iterations spent.
        iterations: usize,
        /// Last consistent estimate at the cap.
        last: Box<IcpSuccess>,
    },
}

/// An alias for the result of an ICP run.
pub type IcpResult = Result<IcpSuccess, IcpError>;

/// A struct specifying configuration options for the ICP algorithm.
#[derive(Clone, Debug)]
pub struct IcpConfiguration {
    /// The amount of iterations before giving up and exiting the algorithm.
    pub(crate) max_iterations: usize,
    /// Convergence is declared once the norm of the 6-vector update falls
    /// below this threshold.
    pub(crate) convergence_threshold: f64,
    /// Robust rejection width: pairs whose point-to-plane residual deviates
    /// from the median by more than this many MAD-sigmas are dropped.
    pub(crate) rejection_multiplier: f64,
    /// Hierarchy level h; every 2^h-th source point takes part in pairing.
    pub(crate) subsample_level: u32,
    /// Minimum accepted pair count below which the run fails.
    pub(crate) minimum_pairs: usize,
}

impl IcpConfiguration {
    /// The configured robust rejection width in MAD-sigmas.
    pub fn rejection_multiplier(&self) -> f64 {
        self.rejection_multiplier
    }

    /// Returns a builder seeded with the default configuration.
    pub fn builder() -> IcpConfigurationBuilder {
        IcpConfigurationBuilder {
            _internal: IcpConfiguration {
                max_iterations: 50,
                convergence_threshold: 1e-8,
                rejection_multiplier: 3.0,
                subsample_level: 0,
                minimum_pairs: 6,
            },
        }
    }
}

impl Default for IcpConfiguration {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// A Builder-pattern struct for safely constructing an [`IcpConfiguration`].
#[derive(Clone, Debug)]
pub struct IcpConfigurationBuilder {
    _internal: IcpConfiguration,
}

impl IcpConfigurationBuilder {
    /// The amount of iterations before giving up and exiting the algorithm.
    pub fn with_max_iterations(&self, max_iterations: usize) -> Self {
        Self {
            _internal: IcpConfiguration {
                max_iterations,
                ..self._internal.clone()
            },
        }
    }

    /// Convergence threshold on the norm of the pose update.
    pub fn with_convergence_threshold(&self, convergence_threshold: f64) -> Self {
        Self {
            _internal: IcpConfiguration {
                convergence_threshold,
                ..self._internal.clone()
            },
        }
    }

    /// Robust rejection width in MAD-sigmas.
    pub fn with_rejection_multiplier(&self, rejection_multiplier: f64) -> Self {
        Self {
            _internal: IcpConfiguration {
                rejection_multiplier,
                ..self._internal.clone()
            },
        }
    }

    /// Hierarchy level; each level halves the participating source points.
    pub fn with_subsample_level(&self, subsample_level: u32) -> Self {
        Self {
            _internal: IcpConfiguration {
                subsample_level,
                ..self._internal.clone()
            },
        }
    }

    /// Minimum accepted pair count below which the run fails with `NoPairs`.
    pub fn with_minimum_pairs(&self, minimum_pairs: usize) -> Self {
        Self {
            _internal: IcpConfiguration {
                minimum_pairs,
                ..self._internal.clone()
            },
        }
    }

    /// Generates an [`IcpConfiguration`] from the current builder state,
    /// leaving the builder intact for another use.
    pub fn build(&self) -> IcpConfiguration {
        self._internal.clone()
    }
}
