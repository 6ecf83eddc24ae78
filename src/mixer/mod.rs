use crate::error::MixerError;
use crate::io::MixerConfig;
use nalgebra::ComplexField;
use ndarray::ArrayView1;
use scfmix_comm::Communicator;
use std::fmt;
use std::str::FromStr;

mod base;
mod broyden1;
mod broyden2;
mod history;
mod linear;
mod partition;
pub(crate) mod precision;

pub use base::MixerBase;
pub use broyden1::Broyden1;
pub use broyden2::Broyden2;
pub use history::History;
pub use linear::LinearMixer;
pub use partition::{Partition, PartitionKind};

/// Numeric type of the mixed vector elements, e.g. `f64` or `nalgebra::Complex<f64>`.
/// All inner products use Re(a^* b).
pub trait Element: ComplexField<RealField = f64> + Copy + Send + Sync {}

impl<T> Element for T where T: ComplexField<RealField = f64> + Copy + Send + Sync {}

/// Interface shared by all mixers. A collaborator writes the new estimate element-wise through
/// the input accessors, calls [Mix::mix] and reads back the mixed vector through the output
/// accessors. `mix` is collective and has to be called in lock-step on all ranks.
pub trait Mix<T: Element, C: Communicator> {
    fn base(&self) -> &MixerBase<T, C>;

    fn base_mut(&mut self) -> &mut MixerBase<T, C>;

    /// Mixes the input buffer with the stored history and returns the RMS deviation between the
    /// input and the previous vector. If the residual sum of squares is below `rss_min` the
    /// history is left untouched.
    fn mix(&mut self, rss_min: f64) -> Result<f64, MixerError>;

    fn input_shared(&mut self, index: usize, value: T) -> Result<(), MixerError> {
        self.base_mut()
            .input(PartitionKind::Shared, index, value, 1.0)
    }

    fn input_shared_weighted(
        &mut self,
        index: usize,
        value: T,
        weight: f64,
    ) -> Result<(), MixerError> {
        self.base_mut()
            .input(PartitionKind::Shared, index, value, weight)
    }

    fn input_local(&mut self, index: usize, value: T) -> Result<(), MixerError> {
        self.base_mut().input(PartitionKind::Local, index, value, 1.0)
    }

    fn input_local_weighted(
        &mut self,
        index: usize,
        value: T,
        weight: f64,
    ) -> Result<(), MixerError> {
        self.base_mut()
            .input(PartitionKind::Local, index, value, weight)
    }

    fn output_shared(&self, index: usize) -> Result<T, MixerError> {
        self.base().output(PartitionKind::Shared, index)
    }

    fn output_local(&self, index: usize) -> Result<T, MixerError> {
        self.base().output(PartitionKind::Local, index)
    }

    fn output_vector<'a>(&'a self) -> Result<ArrayView1<'a, T>, MixerError>
    where
        T: 'a,
        C: 'a,
    {
        self.base().output_vector()
    }

    fn initialize(&mut self) {
        self.base_mut().initialize()
    }

    fn reset(&mut self) -> Result<(), MixerError> {
        self.base_mut().reset()
    }

    fn rms_deviation(&self) -> f64 {
        self.base().rms_deviation()
    }

    fn beta(&self) -> f64 {
        self.base().beta()
    }

    fn count(&self) -> usize {
        self.base().count()
    }

    fn max_history(&self) -> usize {
        self.base().max_history()
    }

    fn local_storage_size(&self) -> usize {
        self.base().partition().local_storage_size()
    }

    fn total_size(&self) -> usize {
        self.base().partition().total_size()
    }

    fn rms_history<'a>(&'a self) -> &'a [f64]
    where
        T: 'a,
        C: 'a,
    {
        self.base().rms_history()
    }

    fn was_short_circuited(&self) -> bool {
        self.base().was_short_circuited()
    }
}

/// Tag of the available mixing schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixerType {
    Linear,
    Broyden1,
    Broyden2,
}

impl FromStr for MixerType {
    type Err = MixerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "linear" => Ok(MixerType::Linear),
            "broyden1" => Ok(MixerType::Broyden1),
            "broyden2" => Ok(MixerType::Broyden2),
            _ => Err(MixerError::UnknownType(s.to_string())),
        }
    }
}

impl fmt::Display for MixerType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name: &str = match self {
            MixerType::Linear => "linear",
            MixerType::Broyden1 => "broyden1",
            MixerType::Broyden2 => "broyden2",
        };
        write!(f, "{}", name)
    }
}

/// Closed set of mixers selected at construction time.
#[derive(Debug, Clone)]
pub enum Mixer<T, C> {
    Linear(LinearMixer<T, C>),
    Broyden1(Broyden1<T, C>),
    Broyden2(Broyden2<T, C>),
}

impl<T: Element, C: Communicator> Mixer<T, C> {
    /// Mixer factory. Collective over `comm`, since the total vector size is reduced.
    pub fn create(
        config: &MixerConfig,
        shared_size: usize,
        local_size: usize,
        comm: C,
    ) -> Result<Self, MixerError> {
        let mixer_type: MixerType = config.mixer_type.parse()?;
        config.validate(mixer_type)?;
        let mixer = match mixer_type {
            MixerType::Linear => {
                Mixer::Linear(LinearMixer::new(shared_size, local_size, config.beta, comm)?)
            }
            MixerType::Broyden1 => Mixer::Broyden1(Broyden1::new(
                shared_size,
                local_size,
                config.max_history,
                config.beta,
                config.beta0,
                config.beta_scaling_factor,
                config.rcond_min,
                comm,
            )?),
            MixerType::Broyden2 => Mixer::Broyden2(Broyden2::new(
                shared_size,
                local_size,
                config.max_history,
                config.beta,
                config.beta0,
                config.linear_mix_rms_tol,
                config.beta_scaling_factor,
                comm,
            )?),
        };
        Ok(mixer)
    }

    pub fn mixer_type(&self) -> MixerType {
        match self {
            Mixer::Linear(_) => MixerType::Linear,
            Mixer::Broyden1(_) => MixerType::Broyden1,
            Mixer::Broyden2(_) => MixerType::Broyden2,
        }
    }
}

impl<T: Element, C: Communicator> Mix<T, C> for Mixer<T, C> {
    fn base(&self) -> &MixerBase<T, C> {
        match self {
            Mixer::Linear(m) => m.base(),
            Mixer::Broyden1(m) => m.base(),
            Mixer::Broyden2(m) => m.base(),
        }
    }

    fn base_mut(&mut self) -> &mut MixerBase<T, C> {
        match self {
            Mixer::Linear(m) => m.base_mut(),
            Mixer::Broyden1(m) => m.base_mut(),
            Mixer::Broyden2(m) => m.base_mut(),
        }
    }

    fn mix(&mut self, rss_min: f64) -> Result<f64, MixerError> {
        match self {
            Mixer::Linear(m) => m.mix(rss_min),
            Mixer::Broyden1(m) => m.mix(rss_min),
            Mixer::Broyden2(m) => m.mix(rss_min),
        }
    }
}
