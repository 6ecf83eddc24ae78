// config file
pub const CONFIG_FILE_NAME: &str = "scfmix.toml";
// print level
pub const VERBOSE: i8 = 0;

// MIXER
// one of "linear", "broyden1" or "broyden2"
pub const MIXER_TYPE: &str = "broyden1";
// initial linear mixing factor
pub const MIXER_BETA: f64 = 0.7;
// lower bound of beta when it is increased after a stagnating step
pub const MIXER_BETA0: f64 = 0.15;
// beta is multiplied by this factor if the rms exceeds the average of the history
pub const MIXER_BETA_SCALING_FACTOR: f64 = 1.0;
// number of stored vectors and residuals
pub const MIXER_MAX_HISTORY: usize = 8;
// broyden2 only: the multi-secant update is used once the rms drops below this value
pub const MIXER_LINEAR_MIX_RMS_TOL: f64 = 1.0e6;
// the vector is not mixed if the residual sum of squares is below this value
pub const MIXER_RSS_MIN: f64 = 1.0e-12;
// broyden1 only: smallest accepted reciprocal condition number of the scaled Gram matrix,
// zero disables the check and only singular matrices are rejected
pub const MIXER_RCOND_MIN: f64 = 0.0;
// the linear mixer only needs the current and the previous vector
pub const LINEAR_MIXER_HISTORY: usize = 2;

// SCF ITERATION
// stop SCF calculation after maxiter iterations
pub const MAX_ITER: usize = 250;
// the iteration is converged if the rms deviation drops below this value
pub const SCF_RMS_CONV: f64 = 1.0e-8;

// MODEL PROBLEM
// x -> A.x + b with a symmetric tridiagonal A
pub const MODEL_DIMENSION: usize = 32;
pub const MODEL_LAMBDA_MAX: f64 = 0.95;
pub const MODEL_COUPLING: f64 = 0.02;
pub const MODEL_SHIFT: f64 = 1.0;
