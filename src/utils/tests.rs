//! Fixtures shared by the unit tests of the mixers and the driver.
use crate::error::MixerError;
use crate::mixer::{Element, Mix};
use crate::scf::{Evaluator, LinearModel};
use ndarray::prelude::*;
use scfmix_comm::Communicator;

/// Writes `values` into the input buffer of `mixer`, shared elements first.
pub(crate) fn feed<T: Element, C: Communicator, M: Mix<T, C>>(
    mixer: &mut M,
    values: ArrayView1<T>,
) {
    let shared_size: usize = mixer.base().partition().shared_size();
    for (i, v) in values.iter().enumerate() {
        if i < shared_size {
            mixer.input_shared(i, *v).unwrap();
        } else {
            mixer.input_local(i - shared_size, *v).unwrap();
        }
    }
}

/// Plain fixed-point loop on a single rank: starts from the initial estimate of the model,
/// feeds g(x) to the mixer and stops once the reported RMS deviation is below `tol`. Returns the
/// number of `mix` calls.
pub(crate) fn run_fixed_point<T: Element, C: Communicator, M: Mix<T, C>>(
    mixer: &mut M,
    model: &LinearModel<T>,
    tol: f64,
    max_iter: usize,
) -> Result<usize, MixerError> {
    feed(mixer, model.initial_estimate().view());
    mixer.initialize();
    for iter in 1..=max_iter {
        let y: Array1<T> = model.apply(mixer.output_vector()?);
        feed(mixer, y.view());
        if mixer.mix(0.0)? < tol {
            return Ok(iter);
        }
    }
    Err(MixerError::NumericalInstability {
        context: "test fixed-point loop",
        reason: format!("no convergence within {} steps", max_iter),
    })
}
