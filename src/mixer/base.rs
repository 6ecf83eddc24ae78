use crate::error::MixerError;
use crate::mixer::history::History;
use crate::mixer::partition::{Partition, PartitionKind};
use crate::mixer::Element;
use log::{debug, trace};
use ndarray::parallel::prelude::*;
use ndarray::prelude::*;
use ndarray::{par_azip, Zip};
use scfmix_comm::Communicator;

/// State and primitives shared by all mixers: the distributed layout of the vector, the input
/// buffer with its weights, the history ring buffer and the step counter.
#[derive(Debug, Clone)]
pub struct MixerBase<T, C> {
    pub(crate) partition: Partition,
    pub(crate) history: History<T>,
    /// Storage for the input (unmixed) data, in the local storage layout.
    pub(crate) input_buffer: Array1<T>,
    /// Weights of the vector elements used in all inner products.
    pub(crate) weights: Array1<f64>,
    pub(crate) comm: C,
    /// Number of completed mixing steps since the last (re-)initialization.
    pub(crate) count: usize,
    /// Current linear mixing factor.
    pub(crate) beta: f64,
    pub(crate) rms_history: Vec<f64>,
    initialized: bool,
    short_circuited: bool,
}

impl<T: Element, C: Communicator> MixerBase<T, C> {
    /// Collective, since the total size of the distributed vector is reduced over all ranks.
    pub fn new(
        shared_size: usize,
        local_size: usize,
        max_history: usize,
        beta: f64,
        comm: C,
    ) -> Result<Self, MixerError> {
        if max_history == 0 {
            return Err(MixerError::Config(String::from(
                "the mixer history has to hold at least one vector",
            )));
        }
        let partition: Partition = Partition::new(shared_size, local_size, &comm)?;
        let n: usize = partition.local_storage_size();
        debug!(
            "mixer storage: {} shared + {} local elements, {} in total on {} ranks, history depth {}",
            shared_size,
            local_size,
            partition.total_size(),
            partition.num_ranks(),
            max_history
        );
        Ok(Self {
            partition,
            history: History::new(n, max_history),
            input_buffer: Array1::zeros(n),
            weights: Array1::ones(n),
            comm,
            count: 0,
            beta,
            rms_history: Vec::new(),
            initialized: false,
            short_circuited: false,
        })
    }

    /// Writes one element into the input buffer together with its weight.
    pub fn input(
        &mut self,
        kind: PartitionKind,
        index: usize,
        value: T,
        weight: f64,
    ) -> Result<(), MixerError> {
        let offset: usize = self.partition.offset(kind, index)?;
        if !(weight.is_finite() && weight >= 0.0) {
            return Err(MixerError::InvalidWeight {
                partition: kind,
                index,
                weight,
            });
        }
        self.input_buffer[offset] = value;
        self.weights[offset] = weight;
        Ok(())
    }

    /// Reads one element of the latest mixed vector.
    pub fn output(&self, kind: PartitionKind, index: usize) -> Result<T, MixerError> {
        let offset: usize = self.partition.offset(kind, index)?;
        Ok(self.output_vector()?[offset])
    }

    /// The latest mixed vector in the local storage layout (shared elements first).
    pub fn output_vector(&self) -> Result<ArrayView1<T>, MixerError> {
        if !self.initialized {
            return Err(MixerError::NotInitialized);
        }
        Ok(self.history.vector(self.count))
    }

    /// Copies the input buffer into the first slot of the history and restarts the step counter.
    pub fn initialize(&mut self) {
        self.history.vector_mut(0).assign(&self.input_buffer);
        self.count = 0;
        self.initialized = true;
        self.short_circuited = false;
    }

    /// Discards the secant history: the latest mixed vector becomes step 0 and the RMS history is
    /// cleared. The current mixing factor is kept.
    pub fn reset(&mut self) -> Result<(), MixerError> {
        if !self.initialized {
            return Err(MixerError::NotInitialized);
        }
        if self.history.idx_hist(self.count) != 0 {
            let (mut first, latest) = self.history.vector_pair_mut(0, self.count);
            first.assign(&latest);
        }
        debug!("mixer history reset after {} steps", self.count);
        self.count = 0;
        self.rms_history.clear();
        self.short_circuited = false;
        Ok(())
    }

    pub(crate) fn require_initialized(&self) -> Result<(), MixerError> {
        match self.initialized {
            true => Ok(()),
            false => Err(MixerError::NotInitialized),
        }
    }

    /// Weighted inner product Σ_i w_i lw_i Re(a_i^* b_i) of the local elements. Not reduced.
    pub(crate) fn weighted_inner(&self, a: ArrayView1<T>, b: ArrayView1<T>) -> f64 {
        Zip::from(a)
            .and(b)
            .and(&self.weights)
            .and(self.partition.local_weight())
            .into_par_iter()
            .map(|(&x, &y, &w, &lw)| (x.conjugate() * y).real() * w * lw)
            .sum()
    }

    /// Global RMS deviation between the input buffer and the current vector of the history.
    pub fn rms_deviation(&self) -> f64 {
        let current: ArrayView1<T> = self.history.vector(self.count);
        let mut rms: [f64; 1] = [Zip::from(&self.input_buffer)
            .and(current)
            .and(&self.weights)
            .and(self.partition.local_weight())
            .into_par_iter()
            .map(|(&x, &v, &w, &lw)| (x - v).modulus_squared() * w * lw)
            .sum()];
        self.comm.all_reduce_sum(&mut rms);
        (rms[0] / self.partition.total_size() as f64).sqrt()
    }

    /// Stores the residual |input> - |vector> of the current step and returns the global
    /// (weighted) residual sum of squares.
    pub fn compute_residual(&mut self) -> f64 {
        let slot: usize = self.history.idx_hist(self.count);
        let History {
            vectors, residuals, ..
        } = &mut self.history;
        let mut residual: ArrayViewMut1<T> = residuals.row_mut(slot);
        par_azip!((r in &mut residual, &x in &self.input_buffer, &v in &vectors.row(slot)) {
            *r = x - v;
        });
        let mut rss: [f64; 1] = [Zip::from(&residual)
            .and(&self.weights)
            .and(self.partition.local_weight())
            .into_par_iter()
            .map(|(&r, &w, &lw)| r.modulus_squared() * w * lw)
            .sum()];
        self.comm.all_reduce_sum(&mut rss);
        trace!("residual sum of squares at step {}: {:.6e}", self.count, rss[0]);
        rss[0]
    }

    /// |x_count> = β |input> + (1 - β) |x_(count-1)>
    pub fn mix_linear(&mut self, beta: f64) {
        debug_assert!(self.count > 0, "linear mixing needs a previous vector");
        let b: T = T::from_real(beta);
        let ob: T = T::from_real(1.0 - beta);
        let (mut current, previous) = self.history.vector_pair_mut(self.count, self.count - 1);
        par_azip!((x in &mut current, &inp in &self.input_buffer, &p in &previous) {
            *x = b * inp + ob * p;
        });
    }

    /// Mixing factor of a step with the RMS deviation `rms`: if at least `max_history` RMS values
    /// were recorded and `rms` exceeds their average, β grows to max(β0, β * factor).
    /// The mixer itself is not modified, see [MixerBase::record_step].
    pub(crate) fn adapted_beta(&self, rms: f64, beta0: f64, beta_scaling_factor: f64) -> f64 {
        let depth: usize = self.history.max_history();
        if self.rms_history.len() < depth {
            return self.beta;
        }
        let rms_avg: f64 = self.rms_history[self.rms_history.len() - depth..]
            .iter()
            .sum::<f64>()
            / depth as f64;
        match rms > rms_avg {
            true => beta0.max(self.beta * beta_scaling_factor),
            false => self.beta,
        }
    }

    /// Commits the mixing factor and the RMS deviation of a successful step.
    pub(crate) fn record_step(&mut self, rms: f64, beta: f64) {
        if beta != self.beta {
            debug!(
                "rms {:.6e} above the recent average, beta: {:.4} -> {:.4}",
                rms, self.beta, beta
            );
        }
        self.beta = beta;
        self.rms_history.push(rms);
    }

    pub(crate) fn set_short_circuited(&mut self, value: bool) {
        self.short_circuited = value;
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn max_history(&self) -> usize {
        self.history.max_history()
    }

    pub fn rms_history(&self) -> &[f64] {
        &self.rms_history
    }

    /// True if the last call of `mix` found the residual below `rss_min` and left the history
    /// untouched; the output then still holds the vector of the previous step.
    pub fn was_short_circuited(&self) -> bool {
        self.short_circuited
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn history(&self) -> &History<T> {
        &self.history
    }
}
