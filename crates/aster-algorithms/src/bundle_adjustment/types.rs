use std::{
    collections::BTreeSet,
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use nalgebra::DMatrix;
use thiserror::Error;

use super::BundleAdjustment;

/// A fly-over map: the set of unordered cloud-index pairs known to observe
/// overlapping ground patches, used to seed loop-closure edges.
#[derive(Clone, Debug, Default)]
pub struct FlyOverMap {
    pairs: BTreeSet<(usize, usize)>,
}

impl FlyOverMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an unordered pair of cloud indices.
    pub fn insert(&mut self, a: usize, b: usize) {
        if a != b {
            self.pairs.insert((a.min(b), a.max(b)));
        }
    }

    /// Iterates the registered pairs in (low, high) order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.pairs.iter().copied()
    }

    /// Returns whether no pairs are registered.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Diagnostics of one point-cloud pair inside the adjustment, refreshed at
/// every iteration.
#[derive(Clone, Debug)]
pub struct PointCloudPair {
    /// Source cloud index.
    pub source: usize,
    /// Destination cloud index.
    pub destination: usize,
    /// Number of pairings attempted at the diagnostic sub-sampling level.
    pub attempted: usize,
    /// Number of pairings accepted after rejection.
    pub accepted: usize,
    /// Point-to-plane RMS residual over the accepted pairings.
    pub residual_rms: f64,
    /// Absolute mean point-to-plane residual.
    pub residual_mean: f64,
}

/// The connectivity artifact: three dense Q-by-Q matrices (residual RMS,
/// overlap fraction, pair count), with −1 marking absent edges.
#[derive(Clone, Debug)]
pub struct Connectivity {
    /// Per-edge residual RMS.
    pub residual: DMatrix<f64>,
    /// Per-edge accepted/attempted fraction.
    pub overlap: DMatrix<f64>,
    /// Per-edge attempted pair count.
    pub pair_count: DMatrix<f64>,
}

impl Connectivity {
    /// Builds the artifact from the current pair diagnostics.
    pub fn from_pairs(cloud_count: usize, pairs: &[PointCloudPair]) -> Self {
        let mut residual = DMatrix::repeat(cloud_count, cloud_count, -1.0);
        let mut overlap = DMatrix::repeat(cloud_count, cloud_count, -1.0);
        let mut pair_count = DMatrix::repeat(cloud_count, cloud_count, -1.0);

        for pair in pairs {
            let (s, d) = (pair.source, pair.destination);
            let fraction = if pair.attempted > 0 {
                pair.accepted as f64 / pair.attempted as f64
            } else {
                0.0
            };

            for (row, col) in [(s, d), (d, s)] {
                residual[(row, col)] = pair.residual_rms;
                overlap[(row, col)] = fraction;
                pair_count[(row, col)] = pair.attempted as f64;
            }
        }

        Self {
            residual,
            overlap,
            pair_count,
        }
    }

    /// Saves the three matrices as ASCII files `<stem>_res.txt`,
    /// `<stem>_overlap.txt` and `<stem>_n_pairs.txt` under `directory`.
    pub fn save(&self, directory: impl AsRef<Path>, stem: &str) -> std::io::Result<()> {
        let directory = directory.as_ref();
        for (suffix, matrix) in [
            ("res", &self.residual),
            ("overlap", &self.overlap),
            ("n_pairs", &self.pair_count),
        ] {
            let mut writer =
                BufWriter::new(File::create(directory.join(format!("{stem}_{suffix}.txt")))?);
            for row in 0..matrix.nrows() {
                let formatted = (0..matrix.ncols())
                    .map(|col| format!("{:+.10e}", matrix[(row, col)]))
                    .collect::<Vec<_>>()
                    .join(" ");
                writeln!(writer, "{formatted}")?;
            }
        }
        Ok(())
    }
}

/// The reasons a bundle-adjustment run can fail outright.
#[derive(Debug, Error)]
pub enum BundleAdjusterError {
    /// Cooperative abort; carries the last consistent state.
    #[error("bundle adjustment cancelled")]
    Cancelled {
        /// Output assembled from the last completed iteration.
        partial: Box<BundleAdjustment>,
    },
}

/// Configuration of the bundle adjuster.
#[derive(Clone, Debug)]
pub struct BundleAdjusterConfig {
    /// Number of refinement iterations; zero runs pair discovery and
    /// diagnostics only.
    pub(crate) n_iterations: usize,
    /// Whether loop-closure edges are searched for.
    pub(crate) look_for_closure: bool,
    /// Optional fly-over map seeding loop-closure edges.
    pub(crate) fly_over_map: Option<FlyOverMap>,
    /// Index of the anchored (ground) cloud.
    pub(crate) ground_index: usize,
    /// Ridge coefficient added to the normal-equation diagonal.
    pub(crate) ridge_coef: f64,
    /// Robust rejection width in MAD-sigmas for the pair searches.
    pub(crate) rejection_multiplier: f64,
    /// Sub-sampling level used by the per-iteration diagnostics pass.
    pub(crate) diagnostics_subsample_level: u32,
}

impl BundleAdjusterConfig {
    /// Returns a builder seeded with the default configuration.
    pub fn builder() -> BundleAdjusterConfigBuilder {
        BundleAdjusterConfigBuilder {
            _internal: BundleAdjusterConfig {
                n_iterations: 5,
                look_for_closure: false,
                fly_over_map: None,
                ground_index: 0,
                ridge_coef: 0.0,
                rejection_multiplier: 3.0,
                diagnostics_subsample_level: 4,
            },
        }
    }
}

impl Default for BundleAdjusterConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// A Builder-pattern struct for constructing a [`BundleAdjusterConfig`].
#[derive(Clone, Debug)]
pub struct BundleAdjusterConfigBuilder {
    _internal: BundleAdjusterConfig,
}

impl BundleAdjusterConfigBuilder {
    /// Number of refinement iterations.
    pub fn with_iterations(&self, n_iterations: usize) -> Self {
        Self {
            _internal: BundleAdjusterConfig {
                n_iterations,
                ..self._internal.clone()
            },
        }
    }

    /// Enables or disables the loop-closure search.
    pub fn with_loop_closure(&self, look_for_closure: bool) -> Self {
        Self {
            _internal: BundleAdjusterConfig {
                look_for_closure,
                ..self._internal.clone()
            },
        }
    }

    /// Seeds loop closures from a fly-over map instead of the back-scan.
    pub fn with_fly_over_map(&self, fly_over_map: Option<FlyOverMap>) -> Self {
        Self {
            _internal: BundleAdjusterConfig {
                fly_over_map,
                ..self._internal.clone()
            },
        }
    }

    /// Designates the anchored cloud; its pose is never adjusted.
    pub fn with_ground_index(&self, ground_index: usize) -> Self {
        Self {
            _internal: BundleAdjusterConfig {
                ground_index,
                ..self._internal.clone()
            },
        }
    }

    /// Ridge coefficient regularizing the normal equations.
    pub fn with_ridge_coef(&self, ridge_coef: f64) -> Self {
        Self {
            _internal: BundleAdjusterConfig {
                ridge_coef,
                ..self._internal.clone()
            },
        }
    }

    /// Robust rejection width in MAD-sigmas.
    pub fn with_rejection_multiplier(&self, rejection_multiplier: f64) -> Self {
        Self {
            _internal: BundleAdjusterConfig {
                rejection_multiplier,
                ..self._internal.clone()
            },
        }
    }

    /// Sub-sampling level h of the diagnostics pass.
    pub fn with_diagnostics_subsample_level(&self, diagnostics_subsample_level: u32) -> Self {
        Self {
            _internal: BundleAdjusterConfig {
                diagnostics_subsample_level,
                ..self._internal.clone()
            },
        }
    }

    /// Generates a [`BundleAdjusterConfig`] from the current builder state.
    pub fn build(&self) -> BundleAdjusterConfig {
        self._internal.clone()
    }
}
