use crate::error::MixerError;
use crate::mixer::history::History;
use crate::mixer::{Element, Mix, MixerBase};
use itertools::Itertools;
use log::{debug, trace};
use nalgebra::{DMatrix, DVector};
use ndarray::prelude::*;
use ndarray::par_azip;
use scfmix_comm::Communicator;

/// Multi-secant Broyden mixing with an explicit inverse of the Gram matrix of residual
/// differences.
///
/// With Δr_j = r_(n-j) - r_(n-j-1) and Δx_j = x_(n-j) - x_(n-j-1) for the last N steps the
/// next vector is
///
/// x_(n+1) = x_n + β r_n - Σ_j γ_j (β Δr_j + Δx_j),   γ = S^-1 c,
///
/// where S_ij = <Δr_i|Δr_j> and c_j = <Δr_j|r_n> are weighted inner products over the
/// distributed vector.
#[derive(Debug, Clone)]
pub struct Broyden1<T, C> {
    base: MixerBase<T, C>,
    beta0: f64,
    beta_scaling_factor: f64,
    /// Lower bound of the reciprocal condition number of the Jacobi-scaled Gram matrix.
    /// Zero disables the check, only a singular matrix is rejected then.
    rcond_min: f64,
}

impl<T: Element, C: Communicator> Broyden1<T, C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        shared_size: usize,
        local_size: usize,
        max_history: usize,
        beta: f64,
        beta0: f64,
        beta_scaling_factor: f64,
        rcond_min: f64,
        comm: C,
    ) -> Result<Self, MixerError> {
        Ok(Self {
            base: MixerBase::new(shared_size, local_size, max_history, beta, comm)?,
            beta0,
            beta_scaling_factor,
            rcond_min,
        })
    }

    /// Correction -Σ_j γ_j (β Δr_j + Δx_j) built from the last `n` steps. Does not modify the
    /// mixer; on error only the residual of the current step has been stored.
    fn secant_correction(&self, n: usize, beta: f64) -> Result<Array1<T>, MixerError> {
        let count: usize = self.base.count;
        let len: usize = self.base.partition.local_storage_size();
        let history: &History<T> = &self.base.history;

        let mut dr: Array2<T> = Array2::zeros((n, len));
        let mut dv: Array2<T> = Array2::zeros((n, len));
        for j in 0..n {
            let (r_new, r_old) = (history.residual(count - j), history.residual(count - j - 1));
            let (v_new, v_old) = (history.vector(count - j), history.vector(count - j - 1));
            par_azip!((d in dr.row_mut(j), &a in &r_new, &b in &r_old) *d = a - b);
            par_azip!((d in dv.row_mut(j), &a in &v_new, &b in &v_old) *d = a - b);
        }

        // lower triangle of S followed by c, reduced with a single collective
        let n_tri: usize = n * (n + 1) / 2;
        let mut buffer: Vec<f64> = Vec::with_capacity(n_tri + n);
        for j1 in 0..n {
            for j2 in 0..=j1 {
                buffer.push(self.base.weighted_inner(dr.row(j1), dr.row(j2)));
            }
        }
        let current: ArrayView1<T> = history.residual(count);
        for j in 0..n {
            buffer.push(self.base.weighted_inner(dr.row(j), current.view()));
        }
        self.base.comm.all_reduce_sum(&mut buffer);

        let mut s: DMatrix<f64> = DMatrix::zeros(n, n);
        let mut pos: usize = 0;
        for j1 in 0..n {
            for j2 in 0..=j1 {
                s[(j1, j2)] = buffer[pos];
                s[(j2, j1)] = buffer[pos];
                pos += 1;
            }
        }
        let c: DVector<f64> = DVector::from_column_slice(&buffer[n_tri..]);
        trace!(
            "broyden1 gram matrix diagonal: [{}]",
            s.diagonal().iter().map(|x| format!("{:.4e}", x)).join(", ")
        );

        let s_inv: DMatrix<f64> = self.invert_gram(s)?;
        // S is symmetric, so γ_j = Σ_k c_k S^-1_kj = (S^-1 c)_j
        let gamma: DVector<f64> = s_inv * c;
        if gamma.iter().any(|g| !g.is_finite()) {
            return Err(MixerError::NumericalInstability {
                context: "broyden1",
                reason: String::from("non-finite secant coefficients"),
            });
        }

        let b: T = T::from_real(beta);
        let mut correction: Array1<T> = Array1::zeros(len);
        for (j, g) in gamma.iter().enumerate() {
            let g: T = T::from_real(*g);
            par_azip!((x in &mut correction, &d in &dr.row(j), &v in &dv.row(j)) {
                *x = *x - g * (b * d + v);
            });
        }
        Ok(correction)
    }

    fn invert_gram(&self, s: DMatrix<f64>) -> Result<DMatrix<f64>, MixerError> {
        let n: usize = s.nrows();
        if s.iter().any(|x| !x.is_finite()) {
            return Err(MixerError::NumericalInstability {
                context: "broyden1",
                reason: String::from("non-finite entries in the Gram matrix"),
            });
        }
        if let Some(j) = s.diagonal().iter().position(|&x| x <= 0.0) {
            return Err(MixerError::NumericalInstability {
                context: "broyden1",
                reason: format!(
                    "residual difference {} vanishes, the Gram matrix is singular",
                    j
                ),
            });
        }
        if self.rcond_min > 0.0 {
            // Jacobi scaling D^-1/2 S D^-1/2 removes the trivial dependence on the residual norms
            let scale: DVector<f64> = s.diagonal().map(|x| 1.0 / x.sqrt());
            let scaled: DMatrix<f64> =
                DMatrix::from_fn(n, n, |i, j| s[(i, j)] * scale[i] * scale[j]);
            let eigenvalues: DVector<f64> = scaled.symmetric_eigenvalues();
            let e_max: f64 = eigenvalues.iter().fold(0.0_f64, |acc, e| acc.max(e.abs()));
            let e_min: f64 = eigenvalues.iter().fold(f64::INFINITY, |acc, e| acc.min(e.abs()));
            let rcond: f64 = e_min / e_max;
            if !(rcond >= self.rcond_min) {
                return Err(MixerError::NumericalInstability {
                    context: "broyden1",
                    reason: format!(
                        "reciprocal condition number {:.3e} of the Gram matrix is below {:.3e}",
                        rcond, self.rcond_min
                    ),
                });
            }
        }
        let s_inv: DMatrix<f64> = s.try_inverse().ok_or_else(|| MixerError::NumericalInstability {
            context: "broyden1",
            reason: String::from("the Gram matrix is not invertible"),
        })?;
        if s_inv.iter().any(|x| !x.is_finite()) {
            return Err(MixerError::NumericalInstability {
                context: "broyden1",
                reason: String::from("non-finite entries in the inverse Gram matrix"),
            });
        }
        Ok(s_inv)
    }

    pub fn beta0(&self) -> f64 {
        self.beta0
    }

    pub fn beta_scaling_factor(&self) -> f64 {
        self.beta_scaling_factor
    }
}

impl<T: Element, C: Communicator> Mix<T, C> for Broyden1<T, C> {
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
                "broyden1: rss {:.6e} below {:.6e}, history kept at step {}",
                rss, rss_min, self.base.count
            );
            return Ok(rms);
        }
        self.base.set_short_circuited(false);

        let rms: f64 = self.base.rms_deviation();
        let beta: f64 = self
            .base
            .adapted_beta(rms, self.beta0, self.beta_scaling_factor);

        let count: usize = self.base.count;
        let n: usize = count.min(self.base.max_history() - 1);
        let correction: Array1<T> = if n > 0 {
            self.secant_correction(n, beta)?
        } else {
            Array1::zeros(self.base.partition.local_storage_size())
        };
        self.base.input_buffer.assign(&correction);

        let (i_cur, i_next): (usize, usize) = (
            self.base.history.idx_hist(count),
            self.base.history.idx_hist(count + 1),
        );
        let History {
            vectors, residuals, ..
        } = &mut self.base.history;
        let (mut next, current) = vectors.multi_slice_mut((s![i_next, ..], s![i_cur, ..]));
        let b: T = T::from_real(beta);
        par_azip!((x in &mut next, &v in &current, &r in &residuals.row(i_cur), &inp in &self.base.input_buffer) {
            *x = v + b * r + inp;
        });
        self.base.count += 1;
        self.base.record_step(rms, beta);

        debug!(
            "broyden1 step {}: rms = {:.6e}, beta = {:.4}, secant pairs = {}",
            self.base.count, rms, beta, n
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

    fn broyden1(n: usize, max_history: usize, beta: f64) -> Broyden1<f64, SelfComm> {
        Broyden1::new(0, n, max_history, beta, beta, 1.2, 0.0, SelfComm).unwrap()
    }

    #[test]
    fn first_step_equals_linear_mixing() {
        let model: LinearModel<f64> = LinearModel::model(6);
        let x0: Array1<f64> = Array1::linspace(-1.0, 1.0, 6);
        let mut mixer = broyden1(6, 4, 0.3);
        let mut linear: LinearMixer<f64, SelfComm> =
            LinearMixer::new(0, 6, 0.3, SelfComm).unwrap();
        feed(&mut mixer, x0.view());
        feed(&mut linear, x0.view());
        mixer.initialize();
        linear.initialize();
        let y: Array1<f64> = model.apply(x0.view());
        feed(&mut mixer, y.view());
        feed(&mut linear, y.view());
        let rms: f64 = mixer.mix(0.0).unwrap();
        assert_abs_diff_eq!(rms, linear.mix(0.0).unwrap(), epsilon = 1e-15);
        assert_abs_diff_eq!(
            mixer.output_vector().unwrap(),
            linear.output_vector().unwrap(),
            epsilon = 1e-14
        );
    }

    #[test]
    fn small_residual_keeps_the_history() {
        let mut mixer = broyden1(3, 4, 0.5);
        feed(&mut mixer, array![1.0, 1.0, 1.0].view());
        mixer.initialize();
        mixer.input_local(1, 1.0 + 1.0e-8).unwrap();
        let rms: f64 = mixer.mix(1.0e-12).unwrap();
        assert!(mixer.was_short_circuited());
        assert_eq!(mixer.count(), 0);
        assert_abs_diff_eq!(rms, mixer.rms_deviation());
        assert_abs_diff_eq!(rms, 1.0e-8 / 3.0_f64.sqrt(), epsilon = 1e-15);
        assert_eq!(mixer.output_vector().unwrap(), array![1.0, 1.0, 1.0]);
        assert!(mixer.rms_history().is_empty());
    }

    #[test]
    fn converges_faster_than_linear_mixing() {
        let model: LinearModel<f64> = LinearModel::model(10);
        let mut linear: LinearMixer<f64, SelfComm> =
            LinearMixer::new(0, 10, 0.3, SelfComm).unwrap();
        let mut mixer = broyden1(10, 8, 0.3);
        let linear_iter = run_fixed_point(&mut linear, &model, 1.0e-8, 5000).unwrap();
        let broyden_iter = run_fixed_point(&mut mixer, &model, 1.0e-8, 5000).unwrap();
        assert!(linear_iter > 1000, "linear mixing took {} steps", linear_iter);
        assert!(broyden_iter < 60, "broyden1 took {} steps", broyden_iter);
        assert_abs_diff_eq!(
            mixer.output_vector().unwrap(),
            model.fixed_point().unwrap().view(),
            epsilon = 1e-6
        );
    }

    #[test]
    fn identical_residuals_are_reported() {
        // g(x) = x + 1 has the same residual at every step
        let mut mixer = broyden1(2, 4, 0.5);
        mixer.initialize();
        let mut result: Result<f64, MixerError> = Ok(0.0);
        for _ in 0..2 {
            let y: Array1<f64> = mixer.output_vector().unwrap().mapv(|x| x + 1.0);
            feed(&mut mixer, y.view());
            result = mixer.mix(0.0);
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(
            result,
            Err(MixerError::NumericalInstability { .. })
        ));
        // the failed step did not advance the history
        assert_eq!(mixer.count(), 1);
        assert!(mixer.reset().is_ok());
        assert_eq!(mixer.count(), 0);
    }

    #[test]
    fn rcond_floor_rejects_nearly_parallel_differences() {
        let model: LinearModel<f64> = LinearModel::model(10);
        let mut mixer: Broyden1<f64, SelfComm> =
            Broyden1::new(0, 10, 8, 0.3, 0.3, 1.2, 0.5, SelfComm).unwrap();
        let result = run_fixed_point(&mut mixer, &model, 1.0e-8, 5000);
        assert!(matches!(
            result,
            Err(MixerError::NumericalInstability {
                context: "broyden1",
                ..
            })
        ));
    }

    /// Feeds g(x) = x + shift for each shift and returns the result of the last `mix`.
    fn shifted_steps<M: Mix<f64, SelfComm>>(
        mixer: &mut M,
        shifts: &[f64],
    ) -> Result<f64, MixerError> {
        let mut result: Result<f64, MixerError> = Ok(0.0);
        for shift in shifts {
            let y: Array1<f64> = mixer.output_vector().unwrap().mapv(|x| x + shift);
            feed(mixer, y.view());
            result = mixer.mix(0.0);
        }
        result
    }

    #[test]
    fn failed_step_keeps_beta_and_rms_history() {
        // the residual 2 of the last step equals the one before, while its rms is above the
        // average of the recorded values and would have grown beta
        let mut mixer = broyden1(2, 2, 0.5);
        mixer.initialize();
        shifted_steps(&mut mixer, &[1.0, 2.0]).unwrap();
        assert_eq!(mixer.rms_history(), &[1.0, 2.0]);
        let result = shifted_steps(&mut mixer, &[2.0]);
        assert!(matches!(
            result,
            Err(MixerError::NumericalInstability { .. })
        ));
        assert_eq!(mixer.count(), 2);
        assert_eq!(mixer.rms_history(), &[1.0, 2.0]);
        assert_abs_diff_eq!(mixer.beta(), 0.5);
    }

    #[test]
    fn element_weights_enter_the_gram_matrix() {
        let mut mixer: Broyden1<f64, SelfComm> =
            Broyden1::new(0, 2, 4, 0.5, 0.5, 1.0, 0.0, SelfComm).unwrap();
        mixer.initialize();
        let weights: [f64; 2] = [2.0, 0.5];
        for y in [[1.0, 1.0], [2.0, 0.0]] {
            for i in 0..2 {
                mixer.input_local_weighted(i, y[i], weights[i]).unwrap();
            }
            mixer.mix(0.0).unwrap();
        }
        // x1 = [0.5, 0.5], r1 = [1.5, -0.5], dr = [0.5, -1.5], dx = [0.5, 0.5]
        // S = 2 * 0.25 + 0.5 * 2.25 = 1.625, c = 2 * 0.75 + 0.5 * 0.75 = 1.875
        // x2 = x1 + 0.5 r1 - (c / S) (0.5 dr + dx) = [5/13, 7/13], unit weights give [0.8, 0.4]
        assert_abs_diff_eq!(
            mixer.output_vector().unwrap(),
            array![5.0 / 13.0, 7.0 / 13.0],
            epsilon = 1e-14
        );
        assert_abs_diff_eq!(mixer.rms_history()[1], (4.625_f64 / 2.0).sqrt(), epsilon = 1e-14);
    }

    #[test]
    fn zero_history_depth_is_rejected() {
        let result = Broyden1::<f64, SelfComm>::new(0, 2, 0, 0.5, 0.5, 1.2, 0.0, SelfComm);
        assert!(matches!(result, Err(MixerError::Config(_))));
    }
}
