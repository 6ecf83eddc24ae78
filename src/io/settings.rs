use crate::defaults::*;
use crate::error::MixerError;
use crate::mixer::{Element, Mixer, MixerType};
use anyhow::{Context, Result};
use derive_builder::Builder;
use scfmix_comm::Communicator;
use serde::{Deserialize, Serialize};

fn default_verbose() -> i8 {
    VERBOSE
}
fn default_mixer_type() -> String {
    String::from(MIXER_TYPE)
}
fn default_scf_max_cycles() -> usize {
    MAX_ITER
}
fn default_scf_rms_conv() -> f64 {
    SCF_RMS_CONV
}
fn default_model_dimension() -> usize {
    MODEL_DIMENSION
}
fn default_model_lambda_max() -> f64 {
    MODEL_LAMBDA_MAX
}
fn default_model_coupling() -> f64 {
    MODEL_COUPLING
}
fn default_model_shift() -> f64 {
    MODEL_SHIFT
}
fn default_number_of_cores() -> usize {
    1
}
fn default_scf_config() -> SccConfig {
    SccConfig {
        scf_max_cycles: default_scf_max_cycles(),
        scf_rms_conv: default_scf_rms_conv(),
    }
}
fn default_model_config() -> ModelConfig {
    ModelConfig {
        dimension: default_model_dimension(),
        lambda_max: default_model_lambda_max(),
        coupling: default_model_coupling(),
        shift: default_model_shift(),
    }
}
fn default_parallelization_config() -> ParallelizationConfig {
    ParallelizationConfig {
        number_of_cores: default_number_of_cores(),
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Configuration {
    #[serde(default = "default_verbose")]
    pub verbose: i8,
    #[serde(default)]
    pub mixer: MixerConfig,
    #[serde(default = "default_scf_config")]
    pub scf: SccConfig,
    #[serde(default = "default_model_config")]
    pub model: ModelConfig,
    #[serde(default = "default_parallelization_config")]
    pub parallelization: ParallelizationConfig,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            verbose: default_verbose(),
            mixer: MixerConfig::default(),
            scf: default_scf_config(),
            model: default_model_config(),
            parallelization: default_parallelization_config(),
        }
    }
}

/// Options of the self-consistency loop.
#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
pub struct SccConfig {
    #[serde(default = "default_scf_max_cycles")]
    pub scf_max_cycles: usize,
    /// The loop stops once the RMS deviation reported by the mixer is below this value.
    #[serde(default = "default_scf_rms_conv")]
    pub scf_rms_conv: f64,
}

/// Fixed-point problem x = A x + b solved by the driver binary. A is symmetric tridiagonal with
/// the eigenvalue spread `[0, lambda_max]` on the diagonal and `coupling` on the off-diagonals.
#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
pub struct ModelConfig {
    #[serde(default = "default_model_dimension")]
    pub dimension: usize,
    #[serde(default = "default_model_lambda_max")]
    pub lambda_max: f64,
    #[serde(default = "default_model_coupling")]
    pub coupling: f64,
    #[serde(default = "default_model_shift")]
    pub shift: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ParallelizationConfig {
    #[serde(default = "default_number_of_cores")]
    pub number_of_cores: usize,
}

/// Settings of the density mixer, the `[mixer]` table of the configuration file.
#[derive(Serialize, Deserialize, Builder, Clone, Debug, PartialEq)]
#[serde(default)]
#[builder(default)]
pub struct MixerConfig {
    /// One of `linear`, `broyden1` or `broyden2`.
    #[serde(rename = "type")]
    #[builder(setter(into))]
    pub mixer_type: String,
    /// Initial mixing factor.
    pub beta: f64,
    /// Lower bound of beta when it grows after a stagnating step.
    pub beta0: f64,
    pub beta_scaling_factor: f64,
    /// Depth of the history of vectors and residuals (ignored by the linear mixer).
    pub max_history: usize,
    /// broyden2: RMS below which the secant update replaces linear mixing.
    pub linear_mix_rms_tol: f64,
    /// The history is not advanced if the residual sum of squares is below this value.
    pub rss_min: f64,
    /// broyden1: smallest accepted reciprocal condition number of the scaled Gram matrix.
    pub rcond_min: f64,
}

impl MixerConfig {
    /// Initialize a mixer for a vector with `shared_size` replicated and `local_size` rank-owned
    /// elements. This is a collective call over `comm`.
    pub fn build_mixer<T: Element, C: Communicator>(
        &self,
        shared_size: usize,
        local_size: usize,
        comm: C,
    ) -> Result<Mixer<T, C>> {
        Mixer::create(self, shared_size, local_size, comm)
            .with_context(|| format!("Could not initialize the {} mixer", self.mixer_type))
    }

    pub(crate) fn validate(&self, mixer_type: MixerType) -> Result<(), MixerError> {
        if !(self.beta.is_finite() && self.beta > 0.0) {
            return Err(MixerError::Config(format!(
                "beta has to be positive and finite, got {}",
                self.beta
            )));
        }
        if !(self.beta0.is_finite() && self.beta_scaling_factor.is_finite()) {
            return Err(MixerError::Config(String::from(
                "beta0 and beta_scaling_factor have to be finite",
            )));
        }
        if mixer_type != MixerType::Linear && self.max_history < 2 {
            return Err(MixerError::Config(format!(
                "the {} mixer needs a history of at least 2 steps, got {}",
                mixer_type, self.max_history
            )));
        }
        Ok(())
    }
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            mixer_type: String::from(MIXER_TYPE),
            beta: MIXER_BETA,
            beta0: MIXER_BETA0,
            beta_scaling_factor: MIXER_BETA_SCALING_FACTOR,
            max_history: MIXER_MAX_HISTORY,
            linear_mix_rms_tol: MIXER_LINEAR_MIX_RMS_TOL,
            rss_min: MIXER_RSS_MIN,
            rcond_min: MIXER_RCOND_MIN,
        }
    }
}
