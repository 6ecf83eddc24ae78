use crate::error::MixerError;
use crate::mixer::history::History;
use crate::mixer::precision::DoubleDouble;
use crate::mixer::{Element, Mix, MixerBase};
use log::{debug, trace};
use ndarray::parallel::prelude::*;
use ndarray::prelude::*;
use ndarray::{par_azip, Zip};
use scfmix_comm::Communicator;

/// Inverse-free multi-secant Broyden mixing.
///
/// The approximate inverse Jacobian is never formed. Instead the coefficients of the new input
/// in the basis of the stored residuals and vectors are accumulated through a sequence of
/// rank-1 updates driven by the (normalised) Gram matrix of the last N residuals. Both the Gram
/// matrix and the update recursion are evaluated in double-double precision, since the
/// denominators are differences of nearly equal inner products once the residuals get small.
#[derive(Debug, Clone)]
pub struct Broyden2<T, C> {
    base: MixerBase<T, C>,
    beta0: f64,
    beta_scaling_factor: f64,
    /// The secant update is only used once the RMS deviation dropped below this value.
    /// A non-positive value instead enables it as soon as the history is full.
    linear_mix_rms_tol: f64,
}

impl<T: Element, C: Communicator> Broyden2<T, C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        shared_size: usize,
        local_size: usize,
        max_history: usize,
        beta: f64,
        beta0: f64,
        linear_mix_rms_tol: f64,
        beta_scaling_factor: f64,
        comm: C,
    ) -> Result<Self, MixerError> {
        Ok(Self {
            base: MixerBase::new(shared_size, local_size, max_history, beta, comm)?,
            beta0,
            beta_scaling_factor,
            linear_mix_rms_tol,
        })
    }

    fn use_secant_update(&self, rms: f64, step: usize, n: usize) -> bool {
        if self.linear_mix_rms_tol > 0.0 {
            rms < self.linear_mix_rms_tol && n > 1
        } else {
            step > self.base.max_history()
        }
    }

    /// S_ij = Σ lw Re(r_i^* r_j) / total_size over the residuals of the steps
    /// `step - n .. step`, accumulated and reduced in double-double precision.
    fn gram_matrix(&self, step: usize, n: usize) -> Array2<DoubleDouble> {
        let history: &History<T> = &self.base.history;
        let local_weight: ArrayView1<f64> = self.base.partition.local_weight();
        let n_tri: usize = n * (n + 1) / 2;

        let mut partial: Vec<DoubleDouble> = Vec::with_capacity(n_tri);
        for j1 in 0..n {
            let r1: ArrayView1<T> = history.residual(step - n + j1);
            for j2 in 0..=j1 {
                let r2: ArrayView1<T> = history.residual(step - n + j2);
                let sum: DoubleDouble = Zip::from(r1)
                    .and(r2)
                    .and(local_weight)
                    .into_par_iter()
                    .map(|(&a, &b, &lw)| (a.conjugate() * b).real() * lw)
                    .sum();
                partial.push(sum);
            }
        }

        // high and low words are reduced in one collective and recombined exactly afterwards
        let mut buffer: Vec<f64> = partial
            .iter()
            .map(|x| x.hi())
            .chain(partial.iter().map(|x| x.lo()))
            .collect();
        self.base.comm.all_reduce_sum(&mut buffer);

        let total: f64 = self.base.partition.total_size() as f64;
        let mut s: Array2<DoubleDouble> = Array2::zeros((n, n));
        let mut pos: usize = 0;
        for j1 in 0..n {
            for j2 in 0..=j1 {
                let value: DoubleDouble =
                    DoubleDouble::from_sum(buffer[pos], buffer[n_tri + pos]) / total;
                s[[j1, j2]] = value;
                s[[j2, j1]] = value;
                pos += 1;
            }
        }
        s
    }

    /// Coefficients of the new input with respect to the stored residuals (first `n` entries)
    /// and vectors (last `n` entries).
    fn secant_coefficients(&self, step: usize, n: usize) -> Result<Vec<f64>, MixerError> {
        let s: Array2<DoubleDouble> = self.gram_matrix(step, n);
        trace!(
            "broyden2 normalised gram matrix diagonal: {:?}",
            s.diag().iter().map(|x| x.to_f64()).collect::<Vec<f64>>()
        );

        let mut gamma: Array2<DoubleDouble> = Array2::zeros((2 * n, n));
        for i in 0..n {
            gamma[[i, i]] = DoubleDouble::from(0.25);
        }

        let mut v1: Vec<DoubleDouble> = vec![DoubleDouble::ZERO; n];
        let mut v2: Vec<DoubleDouble> = vec![DoubleDouble::ZERO; 2 * n];
        for k in 0..n - 1 {
            let d: DoubleDouble =
                s[[k, k]] + s[[k + 1, k + 1]] - s[[k, k + 1]] - s[[k + 1, k]];
            if !d.is_finite() || d.hi() <= 0.0 {
                return Err(MixerError::NumericalInstability {
                    context: "broyden2",
                    reason: format!(
                        "residuals of steps {} and {} coincide (denominator {})",
                        step - n + k,
                        step - n + k + 1,
                        d
                    ),
                });
            }
            for j in 0..n {
                v1[j] = s[[k + 1, j]] - s[[k, j]];
            }
            for j in 0..2 * n {
                v2[j] = -(gamma[[j, k + 1]] - gamma[[j, k]]);
            }
            v2[n + k] -= 1.0;
            v2[n + k + 1] += 1.0;

            for j1 in 0..n {
                let f: DoubleDouble = v1[j1] / d;
                for j2 in 0..2 * n {
                    gamma[[j2, j1]] += v2[j2] * f;
                }
            }
        }

        for j in 0..2 * n {
            v2[j] = -gamma[[j, n - 1]];
        }
        v2[2 * n - 1] += 1.0;

        let coefficients: Vec<f64> = v2.iter().map(|x| x.to_f64()).collect();
        if coefficients.iter().any(|x| !x.is_finite()) {
            return Err(MixerError::NumericalInstability {
                context: "broyden2",
                reason: String::from("non-finite secant coefficients"),
            });
        }
        Ok(coefficients)
    }

    /// Input vector synthesised from the history. The recursion above treats the residual as
    /// F = x - g(x) while the history stores r = g(x) - x, hence the sign of the residual terms.
    fn secant_input(&self, step: usize, n: usize) -> Result<Array1<T>, MixerError> {
        let coefficients: Vec<f64> = self.secant_coefficients(step, n)?;
        let history: &History<T> = &self.base.history;
        let mut input: Array1<T> = Array1::zeros(self.base.partition.local_storage_size());
        for j in 0..n {
            let a: T = T::from_real(-coefficients[j]);
            let b: T = T::from_real(coefficients[j + n]);
            let (r_j, v_j) = (history.residual(step - n + j), history.vector(step - n + j));
            par_azip!((x in &mut input, &r in &r_j, &v in &v_j) *x = *x + a * r + b * v);
        }
        Ok(input)
    }

    pub fn linear_mix_rms_tol(&self) -> f64 {
        self.linear_mix_rms_tol
    }
}

impl<T: Element, C: Communicator> Mix<T, C> for Broyden2<T, C> {
    fn base(&self) -> &MixerBase<T, C> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut MixerBase<T, C> {
        &mut self.base
    }

    fn mix(&mut self, rss_min: f64) -> Result<f64, MixerError> {
        self.base.require_initialized()?;
        let rss: f64 = self.base.compute_residual();
        if rss < rss_min {
            self.base.set_short_circuited(true);
            let rms: f64 = self.base.rms_deviation();
            debug!(
                "broyden2: rss {:.6e} below {:.6e}, history kept at step {}",
                rss, rss_min, self.base.count
            );
            return Ok(rms);
        }
        self.base.set_short_circuited(false);

        let rms: f64 = self.base.rms_deviation();
        let beta: f64 = self
            .base
            .adapted_beta(rms, self.beta0, self.beta_scaling_factor);

        // the residuals of steps `step - n ..= count` span the secant space
        let step: usize = self.base.count + 1;
        let n: usize = step.min(self.base.max_history());
        let secant: bool = self.use_secant_update(rms, step, n);
        if secant {
            let input: Array1<T> = self.secant_input(step, n)?;
            self.base.input_buffer.assign(&input);
        }

        self.base.count = step;
        self.base.mix_linear(beta);
        self.base.record_step(rms, beta);
        debug!(
            "broyden2 step {}: rms = {:.6e}, beta = {:.4}, {}",
            step,
            rms,
            beta,
            match secant {
                true => format!("secant update over {} residuals", n),
                false => String::from("linear mixing"),
            }
        );
        Ok(rms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mixer::LinearMixer;
    use crate::scf::LinearModel;
    use crate::utils::tests::{feed, run_fixed_point};
    use approx::assert_abs_diff_eq;
    use scfmix_comm::SelfComm;

    fn broyden2(n: usize, max_history: usize, beta: f64, tol: f64) -> Broyden2<f64, SelfComm> {
        Broyden2::new(0, n, max_history, beta, beta, tol, 1.2, SelfComm).unwrap()
    }

    #[test]
    fn linear_until_the_history_is_full() {
        let model: LinearModel<f64> = LinearModel::model(5);
        let mut mixer = broyden2(5, 3, 0.4, 0.0);
        let mut linear: LinearMixer<f64, SelfComm> =
            LinearMixer::new(0, 5, 0.4, SelfComm).unwrap();
        mixer.initialize();
        linear.initialize();
        for _ in 0..3 {
            let y: Array1<f64> = model.apply(mixer.output_vector().unwrap());
            feed(&mut mixer, y.view());
            feed(&mut linear, y.view());
            let rms: f64 = mixer.mix(0.0).unwrap();
            assert_abs_diff_eq!(rms, linear.mix(0.0).unwrap(), epsilon = 1e-14);
            assert_abs_diff_eq!(
                mixer.output_vector().unwrap(),
                linear.output_vector().unwrap(),
                epsilon = 1e-14
            );
        }
        // the fourth step exceeds max_history and switches to the secant update
        let y: Array1<f64> = model.apply(mixer.output_vector().unwrap());
        feed(&mut mixer, y.view());
        feed(&mut linear, y.view());
        mixer.mix(0.0).unwrap();
        linear.mix(0.0).unwrap();
        let difference: f64 = (&mixer.output_vector().unwrap() - &linear.output_vector().unwrap())
            .iter()
            .map(|x| x.abs())
            .fold(0.0, f64::max);
        assert!(difference > 1e-6);
    }

    #[test]
    fn converges_faster_than_linear_mixing() {
        let model: LinearModel<f64> = LinearModel::model(10);
        let mut linear: LinearMixer<f64, SelfComm> =
            LinearMixer::new(0, 10, 0.3, SelfComm).unwrap();
        let linear_iter = run_fixed_point(&mut linear, &model, 1.0e-8, 5000).unwrap();

        for tol in [0.0, 0.1] {
            let mut mixer = broyden2(10, 8, 0.3, tol);
            let iter = run_fixed_point(&mut mixer, &model, 1.0e-8, 5000).unwrap();
            assert!(
                iter < linear_iter / 3,
                "broyden2 (tol = {}) took {} steps, linear mixing {}",
                tol,
                iter,
                linear_iter
            );
            assert_abs_diff_eq!(
                mixer.output_vector().unwrap(),
                model.fixed_point().unwrap().view(),
                epsilon = 1e-6
            );
        }
    }

    #[test]
    fn identical_residuals_are_reported() {
        // g(x) = x + 1: every residual is the same
        let mut mixer = broyden2(2, 2, 0.5, 0.0);
        mixer.initialize();
        let mut failed_at: Option<usize> = None;
        for it in 1..=4 {
            let y: Array1<f64> = mixer.output_vector().unwrap().mapv(|x| x + 1.0);
            feed(&mut mixer, y.view());
            if let Err(err) = mixer.mix(0.0) {
                assert!(matches!(err, MixerError::NumericalInstability { .. }));
                failed_at = Some(it);
                break;
            }
        }
        assert_eq!(failed_at, Some(3));
        assert_eq!(mixer.count(), 2);
    }

    #[test]
    fn short_circuit_leaves_count_and_output() {
        let mut mixer = broyden2(2, 4, 0.5, 1.0);
        feed(&mut mixer, array![2.0, 3.0].view());
        mixer.initialize();
        let rms: f64 = mixer.mix(1.0e-10).unwrap();
        assert!(mixer.was_short_circuited());
        assert_eq!(rms, 0.0);
        assert_eq!(mixer.count(), 0);
        assert_eq!(mixer.output_vector().unwrap(), array![2.0, 3.0]);
    }

    #[test]
    fn failed_step_keeps_beta_and_rms_history() {
        // g(x) = x + shift: residuals 1, 2, 2; the third rms lies above the recorded average
        let mut mixer = broyden2(2, 2, 0.5, 0.0);
        mixer.initialize();
        let mut results: Vec<Result<f64, MixerError>> = Vec::new();
        for shift in [1.0, 2.0, 2.0] {
            let y: Array1<f64> = mixer.output_vector().unwrap().mapv(|x| x + shift);
            feed(&mut mixer, y.view());
            results.push(mixer.mix(0.0));
        }
        assert!(results[..2].iter().all(|r| r.is_ok()));
        assert!(matches!(
            results[2],
            Err(MixerError::NumericalInstability { .. })
        ));
        assert_eq!(mixer.count(), 2);
        assert_eq!(mixer.rms_history(), &[1.0, 2.0]);
        assert_abs_diff_eq!(mixer.beta(), 0.5);
    }

    #[test]
    fn element_weights_do_not_enter_the_gram_matrix() {
        let model: LinearModel<f64> = LinearModel::model(3);
        // constant beta, so the weighted rms cannot change the step either
        let mut unit: Broyden2<f64, SelfComm> =
            Broyden2::new(0, 3, 2, 0.5, 0.5, 0.0, 1.0, SelfComm).unwrap();
        let mut weighted: Broyden2<f64, SelfComm> =
            Broyden2::new(0, 3, 2, 0.5, 0.5, 0.0, 1.0, SelfComm).unwrap();
        let weights: [f64; 3] = [4.0, 0.25, 0.0];
        unit.initialize();
        weighted.initialize();
        for _ in 0..6 {
            let y: Array1<f64> = model.apply(unit.output_vector().unwrap());
            feed(&mut unit, y.view());
            for (i, w) in weights.iter().enumerate() {
                weighted.input_local_weighted(i, y[i], *w).unwrap();
            }
            unit.mix(0.0).unwrap();
            weighted.mix(0.0).unwrap();
            assert_abs_diff_eq!(
                unit.output_vector().unwrap(),
                weighted.output_vector().unwrap(),
                epsilon = 1e-14
            );
        }
        assert_eq!(unit.count(), 6);
        // the weights are in effect for the rms deviation
        assert_abs_diff_eq!(unit.rms_history()[0], 1.0, epsilon = 1e-14);
        assert_abs_diff_eq!(
            weighted.rms_history()[0],
            (4.25_f64 / 3.0).sqrt(),
            epsilon = 1e-14
        );
    }

    #[test]
    fn zero_history_depth_is_rejected() {
        let result = Broyden2::<f64, SelfComm>::new(0, 2, 0, 0.5, 0.5, 0.0, 1.2, SelfComm);
        assert!(matches!(result, Err(MixerError::Config(_))));
    }
}
