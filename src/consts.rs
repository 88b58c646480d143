/// Minimum pixel count (h*w) to use row-level Rayon parallelism for FFT passes.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// Minimum island count to dispatch fitting across the Rayon work-stealing pool
/// rather than fitting sequentially in the calling thread.
pub const PARALLEL_ISLAND_THRESHOLD: usize = 4;

/// Small epsilon to avoid division by zero in floating-point comparisons.
pub const EPSILON: f64 = 1e-10;

/// FWHM = 2*sqrt(2*ln2) * sigma.
pub const FWHM_TO_SIGMA: f64 = 0.42466090014400953; // 1 / (2*sqrt(2*ln2))
pub const SIGMA_TO_FWHM: f64 = 2.3548200450309493; // 2*sqrt(2*ln2)

/// Default seed-clip (inner clip) SNR threshold.
pub const DEFAULT_SEED_CLIP: f64 = 5.0;
/// Default flood-clip (outer clip) SNR threshold.
pub const DEFAULT_FLOOD_CLIP: f64 = 4.0;
/// Default mesh size for the tiled background estimator, in beams.
pub const DEFAULT_MESH_SIZE: f64 = 20.0;
/// Default step size for the FFT background estimator, in pixels per beam.
pub const DEFAULT_STEP_SIZE: i64 = 3;
/// Default box size for the top-hat averaging kernel, in beams.
pub const DEFAULT_BOX_SIZE: i64 = 10;

/// SNR multiple above which a pixel is considered source-contaminated and is
/// replaced by synthetic noise before the second background pass.
pub const BACKGROUND_SOURCE_MASK_SNR: f64 = 5.0;

/// Converts an interquartile range to an equivalent Gaussian standard deviation.
pub const IQR_TO_SIGMA: f64 = 1.34896;

/// Maximum Levenberg-Marquardt iterations before giving up.
pub const LM_MAX_ITERATIONS: usize = 200;
/// Convergence threshold on fractional chi-squared change between iterations.
pub const LM_CHI2_TOLERANCE: f64 = 1e-8;
/// Initial LM damping factor.
pub const LM_INITIAL_LAMBDA: f64 = 1e-3;
/// Factor by which lambda is scaled up/down after a bad/good step.
pub const LM_LAMBDA_FACTOR: f64 = 10.0;
/// Step used for the numerical (forward-difference) Jacobian.
pub const LM_JACOBIAN_EPS: f64 = 1e-6;
