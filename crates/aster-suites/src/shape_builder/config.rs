use aster_algorithms::icp::IcpConfiguration;

/// Geometry and noise figures of the range-imaging instrument driving a
/// run. The emulator itself lives outside this crate; the pipeline only
/// needs the figures for noise seeding and bookkeeping.
#[derive(Clone, Debug)]
pub struct LidarSpec {
    /// Focal-plane rows.
    pub row_resolution: usize,
    /// Focal-plane columns.
    pub col_resolution: usize,
    /// Field of view across the rows, degrees.
    pub row_fov_deg: f64,
    /// Field of view across the columns, degrees.
    pub col_fov_deg: f64,
    /// Focal length, meters.
    pub focal_length: f64,
    /// Flash frequency, Hz.
    pub frequency: f64,
    /// Line-of-sight noise standard deviation baseline, meters.
    pub los_noise_sd_baseline: f64,
    /// Noise-proportional fraction of the measured range. A zero baseline
    /// with this engaged yields zero noise.
    pub los_noise_fraction: f64,
}

impl Default for LidarSpec {
    fn default() -> Self {
        Self {
            row_resolution: 128,
            col_resolution: 128,
            row_fov_deg: 20.0,
            col_fov_deg: 20.0,
            focal_length: 10.0,
            frequency: 0.0016,
            los_noise_sd_baseline: 1.0,
            los_noise_fraction: 0.0,
        }
    }
}

/// The full configuration of a shape-reconstruction run; every numeric
/// parameter of the pipeline lives here and is threaded through the
/// constructors.
#[derive(Clone, Debug)]
pub struct ShapeBuilderConfig {
    /// Instrument figures.
    pub(crate) lidar: LidarSpec,
    /// Bezier shape degree.
    pub(crate) shape_degree: usize,
    /// Budget of the merged-cloud constructor.
    pub(crate) points_retained: usize,
    /// Whether bundle adjustment runs at all.
    pub(crate) use_ba: bool,
    /// Bundle-adjustment iterations.
    pub(crate) n_iter_bundle_adjustment: usize,
    /// Whether loop-closure edges are searched for.
    pub(crate) look_for_closure: bool,
    /// Ridge coefficient regularizing the BA normal equations.
    pub(crate) ridge_coef: f64,
    /// Depth cap of the shape KD-trees.
    pub(crate) max_kd_tree_depth: usize,
    /// Pairwise registration configuration.
    pub(crate) icp: IcpConfiguration,
    /// k of the descriptor neighborhood.
    pub(crate) feature_neighborhood: usize,
    /// β of the common-feature suppression.
    pub(crate) common_feature_beta: f64,
    /// IOD swarm size.
    pub(crate) iod_particles: usize,
    /// IOD swarm iterations.
    pub(crate) iod_iterations: usize,
    /// IOD swarm seed.
    pub(crate) iod_seed: u64,
    /// Batch attitude iterations.
    pub(crate) attitude_iterations: usize,
    /// Process-noise standard deviation on velocity, inflating the
    /// transform measurement covariances.
    pub(crate) process_noise_sigma_vel: f64,
    /// Process-noise standard deviation on angular velocity.
    pub(crate) process_noise_sigma_omega: f64,
}

impl ShapeBuilderConfig {
    pub(crate) fn with_defaults(lidar: LidarSpec, shape_degree: usize) -> Self {
        Self {
            lidar,
            shape_degree,
            points_retained: 500_000,
            use_ba: true,
            n_iter_bundle_adjustment: 5,
            look_for_closure: false,
            ridge_coef: 0.0,
            max_kd_tree_depth: 1000,
            icp: IcpConfiguration::builder().with_max_iterations(100).build(),
            feature_neighborhood: 8,
            common_feature_beta: 0.0,
            iod_particles: 500,
            iod_iterations: 200,
            iod_seed: 0,
            attitude_iterations: 5,
            process_noise_sigma_vel: 1e-10,
            process_noise_sigma_omega: 1e-12,
        }
    }

    /// The instrument figures.
    pub fn lidar(&self) -> &LidarSpec {
        &self.lidar
    }

    /// The configured shape degree.
    pub fn shape_degree(&self) -> usize {
        self.shape_degree
    }
}
