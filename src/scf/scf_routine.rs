use crate::error::MixerError;
use crate::io::SccConfig;
use crate::mixer::{Element, Mix};
use crate::scf::logging::*;
use crate::utils::Timer;
use log::debug;
use ndarray::prelude::*;
use scfmix_comm::Communicator;
use thiserror::Error;

/// The (expensive) evaluation step of a self-consistent loop. It maps an input estimate to the
/// output estimate, both in the local storage layout of the calling rank: the shared elements
/// first, followed by the elements owned by this rank.
pub trait Evaluator<T> {
    fn initial_estimate(&self) -> Array1<T>;

    fn evaluate(&mut self, input: ArrayView1<T>) -> Array1<T>;

    /// Weights of the elements in the norms of the mixer, `None` for unit weights.
    fn weights(&self) -> Option<Array1<f64>> {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScfResult {
    /// Number of evaluations (and `mix` calls) until convergence.
    pub iterations: usize,
    /// RMS deviation between the last input and output estimate.
    pub rms: f64,
    /// How often the mixer history was discarded after a numerical failure.
    pub resets: usize,
    /// The loop stopped because the residual fell below the threshold of the mixer.
    pub short_circuited: bool,
}

#[derive(Debug, Error)]
pub enum ScfError {
    #[error("SCF not converged after {iterations} iterations, last rms deviation {rms:.6e}")]
    NotConverged { iterations: usize, rms: f64 },
    #[error("the evaluation step returned {found} elements, the mixer stores {expected}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error(transparent)]
    Mixer(#[from] MixerError),
}

/// Writes a full vector in the local storage layout into the input buffer of the mixer.
fn write_input<T, C, M>(
    mixer: &mut M,
    values: ArrayView1<T>,
    weights: Option<ArrayView1<f64>>,
) -> Result<(), ScfError>
where
    T: Element,
    C: Communicator,
    M: Mix<T, C> + ?Sized,
{
    let shared_size: usize = mixer.base().partition().shared_size();
    let expected: usize = mixer.base().partition().local_storage_size();
    if values.len() != expected {
        return Err(ScfError::DimensionMismatch {
            expected,
            found: values.len(),
        });
    }
    for (i, value) in values.iter().enumerate() {
        let weight: f64 = weights.map_or(1.0, |w| w[i]);
        if i < shared_size {
            mixer.input_shared_weighted(i, *value, weight)?;
        } else {
            mixer.input_local_weighted(i - shared_size, *value, weight)?;
        }
    }
    Ok(())
}

/// Self-consistent fixed-point loop driven by a mixer. Has to be called on all ranks of the
/// communicator of the mixer, since every step performs collective reductions.
pub trait ScfRoutine<T: Element, C: Communicator>: Mix<T, C> {
    fn run_scf<E: Evaluator<T>>(
        &mut self,
        evaluator: &mut E,
        config: &SccConfig,
        rss_min: f64,
    ) -> Result<ScfResult, ScfError> {
        let timer: Timer = Timer::start();
        print_scf_init(
            config.scf_max_cycles,
            config.scf_rms_conv,
            self.base().max_history(),
            self.base().partition().total_size(),
        );

        let weights: Option<Array1<f64>> = evaluator.weights();
        if let Some(w) = weights.as_ref() {
            let expected: usize = self.base().partition().local_storage_size();
            if w.len() != expected {
                return Err(ScfError::DimensionMismatch {
                    expected,
                    found: w.len(),
                });
            }
        }
        write_input(
            self,
            evaluator.initial_estimate().view(),
            weights.as_ref().map(|w| w.view()),
        )?;
        self.initialize();

        let mut rms: f64 = f64::INFINITY;
        let mut resets: usize = 0;
        for iter in 0..config.scf_max_cycles {
            let output: Array1<T> = evaluator.evaluate(self.output_vector()?);
            write_input(self, output.view(), weights.as_ref().map(|w| w.view()))?;

            rms = match self.mix(rss_min) {
                Ok(value) => value,
                Err(err @ MixerError::NumericalInstability { .. }) => {
                    print_history_reset(iter, &err.to_string());
                    // without history the mixers fall back to a linear step, which cannot fail
                    self.reset()?;
                    resets += 1;
                    self.mix(rss_min)?
                }
                Err(err) => return Err(err.into()),
            };
            print_iteration(iter, rms, self.beta(), self.count());

            let short_circuited: bool = self.was_short_circuited();
            if rms < config.scf_rms_conv || short_circuited {
                debug!(
                    "rms history of the last steps: {:?}",
                    self.rms_history()
                        .iter()
                        .rev()
                        .take(self.base().max_history())
                        .collect::<Vec<_>>()
                );
                print_scf_end(timer, iter + 1, rms, short_circuited);
                return Ok(ScfResult {
                    iterations: iter + 1,
                    rms,
                    resets,
                    short_circuited,
                });
            }
        }
        Err(ScfError::NotConverged {
            iterations: config.scf_max_cycles,
            rms,
        })
    }
}

impl<T: Element, C: Communicator, M: Mix<T, C>> ScfRoutine<T, C> for M {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MixerConfigBuilder;
    use crate::mixer::Mixer;
    use crate::scf::LinearModel;
    use scfmix_comm::SelfComm;

    fn scc_config(max_cycles: usize) -> SccConfig {
        SccConfig {
            scf_max_cycles: max_cycles,
            scf_rms_conv: 1.0e-8,
        }
    }

    fn mixer(mixer_type: &str, n: usize) -> Mixer<f64, SelfComm> {
        MixerConfigBuilder::default()
            .mixer_type(mixer_type)
            .beta(0.3)
            .beta0(0.3)
            .beta_scaling_factor(1.2)
            .build()
            .unwrap()
            .build_mixer(0, n, SelfComm)
            .unwrap()
    }

    /// Returns g(x) = x + 1 for the first `stalls` evaluations, the model afterwards.
    struct StallingModel {
        model: LinearModel<f64>,
        stalls: usize,
    }

    impl Evaluator<f64> for StallingModel {
        fn initial_estimate(&self) -> Array1<f64> {
            self.model.initial_estimate()
        }

        fn evaluate(&mut self, input: ArrayView1<f64>) -> Array1<f64> {
            if self.stalls > 0 {
                self.stalls -= 1;
                input.mapv(|x| x + 1.0)
            } else {
                self.model.apply(input)
            }
        }
    }

    #[test]
    fn broyden1_loop_converges() {
        let mut model: LinearModel<f64> = LinearModel::model(10);
        let mut mixer = mixer("broyden1", 10);
        let result: ScfResult = mixer.run_scf(&mut model, &scc_config(200), 0.0).unwrap();
        assert!(result.iterations < 60);
        assert!(result.rms < 1.0e-8);
        assert_eq!(result.resets, 0);
        assert!(!result.short_circuited);
    }

    #[test]
    fn linear_loop_runs_out_of_iterations() {
        let mut model: LinearModel<f64> = LinearModel::model(10);
        let mut mixer = mixer("linear", 10);
        match mixer.run_scf(&mut model, &scc_config(50), 0.0) {
            Err(ScfError::NotConverged { iterations, rms }) => {
                assert_eq!(iterations, 50);
                assert!(rms > 1.0e-8);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn numerical_failure_resets_the_history() {
        let mut model = StallingModel {
            model: LinearModel::model(10),
            stalls: 2,
        };
        let mut mixer = mixer("broyden1", 10);
        let result: ScfResult = mixer.run_scf(&mut model, &scc_config(200), 0.0).unwrap();
        assert_eq!(result.resets, 1);
        assert!(result.rms < 1.0e-8);
    }

    #[test]
    fn tiny_residual_stops_the_loop() {
        let mut model: LinearModel<f64> = LinearModel::model(4);
        let mut mixer = mixer("broyden2", 4);
        let result: ScfResult = mixer.run_scf(&mut model, &scc_config(500), 1.0e-6).unwrap();
        assert!(result.short_circuited);
        assert!(result.rms * result.rms * 4.0 < 1.0e-6);
    }

    #[test]
    fn evaluation_with_wrong_length_is_rejected() {
        let mut model: LinearModel<f64> = LinearModel::model(3);
        let mut mixer = mixer("linear", 4);
        assert!(matches!(
            mixer.run_scf(&mut model, &scc_config(10), 0.0),
            Err(ScfError::DimensionMismatch {
                expected: 4,
                found: 3
            })
        ));
    }
}
