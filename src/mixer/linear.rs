use crate::defaults;
use crate::error::MixerError;
use crate::mixer::{Element, Mix, MixerBase};
use log::debug;
use scfmix_comm::Communicator;

/// Plain linear mixing x_new = β input + (1 - β) x_old. Only the current and the previous
/// vector are kept.
#[derive(Debug, Clone)]
pub struct LinearMixer<T, C> {
    base: MixerBase<T, C>,
}

impl<T: Element, C: Communicator> LinearMixer<T, C> {
    pub fn new(
        shared_size: usize,
        local_size: usize,
        beta: f64,
        comm: C,
    ) -> Result<Self, MixerError> {
        Ok(Self {
            base: MixerBase::new(
                shared_size,
                local_size,
                defaults::LINEAR_MIXER_HISTORY,
                beta,
                comm,
            )?,
        })
    }
}

impl<T: Element, C: Communicator> Mix<T, C> for LinearMixer<T, C> {
    fn base(&self) -> &MixerBase<T, C> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut MixerBase<T, C> {
        &mut self.base
    }

    /// The `rss_min` threshold is not used by the linear mixer.
    fn mix(&mut self, _rss_min: f64) -> Result<f64, MixerError> {
        self.base.require_initialized()?;
        self.base.set_short_circuited(false);
        let rms: f64 = self.base.rms_deviation();
        self.base.count += 1;
        let beta: f64 = self.base.beta;
        self.base.mix_linear(beta);
        self.base.record_step(rms, beta);
        debug!(
            "linear mixing step {}: rms = {:.6e}, beta = {:.4}",
            self.base.count, rms, beta
        );
        Ok(rms)
    }
}
