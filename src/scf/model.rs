use crate::io::ModelConfig;
use crate::mixer::Element;
use crate::scf::Evaluator;
use nalgebra::{DMatrix, DVector};
use ndarray::prelude::*;

/// Affine fixed-point problem g(x) = A x + b with a symmetric tridiagonal A. The diagonal runs
/// linearly from 0 to `lambda_max`, so plain iteration contracts slowly for `lambda_max`
/// close to 1.
#[derive(Debug, Clone)]
pub struct LinearModel<T> {
    diagonal: Array1<f64>,
    coupling: f64,
    shift: T,
}

impl<T: Element> LinearModel<T> {
    pub fn new(dimension: usize, lambda_max: f64, coupling: f64, shift: T) -> Self {
        let diagonal: Array1<f64> = match dimension {
            0 | 1 => Array1::zeros(dimension),
            _ => Array1::linspace(0.0, lambda_max, dimension),
        };
        Self {
            diagonal,
            coupling,
            shift,
        }
    }

    pub fn dimension(&self) -> usize {
        self.diagonal.len()
    }

    pub fn apply(&self, x: ArrayView1<T>) -> Array1<T> {
        let n: usize = self.dimension();
        let c: T = T::from_real(self.coupling);
        Array1::from_shape_fn(n, |i| {
            let mut y: T = T::from_real(self.diagonal[i]) * x[i] + self.shift;
            if i > 0 {
                y += c * x[i - 1];
            }
            if i + 1 < n {
                y += c * x[i + 1];
            }
            y
        })
    }

    /// Solution of (1 - A) x = b, `None` if 1 - A is singular.
    pub fn fixed_point(&self) -> Option<Array1<T>> {
        let n: usize = self.dimension();
        let c: T = T::from_real(self.coupling);
        let m: DMatrix<T> = DMatrix::from_fn(n, n, |i, j| {
            if i == j {
                T::from_real(1.0 - self.diagonal[i])
            } else if i + 1 == j || j + 1 == i {
                -c
            } else {
                T::from_real(0.0)
            }
        });
        let b: DVector<T> = DVector::from_element(n, self.shift);
        m.lu()
            .solve(&b)
            .map(|x| Array1::from_iter(x.iter().copied()))
    }
}

impl LinearModel<f64> {
    pub fn from_config(config: &ModelConfig) -> Self {
        Self::new(
            config.dimension,
            config.lambda_max,
            config.coupling,
            config.shift,
        )
    }
}

#[cfg(test)]
impl<T: Element> LinearModel<T> {
    /// Ill-conditioned test problem: eigenvalues up to 0.95, weak coupling.
    pub fn model_with_shift(dimension: usize, shift: T) -> Self {
        Self::new(dimension, 0.95, 0.02, shift)
    }
}

#[cfg(test)]
impl LinearModel<f64> {
    pub fn model(dimension: usize) -> Self {
        Self::model_with_shift(dimension, 1.0)
    }
}

impl<T: Element> Evaluator<T> for LinearModel<T> {
    fn initial_estimate(&self) -> Array1<T> {
        Array1::zeros(self.dimension())
    }

    fn evaluate(&mut self, input: ArrayView1<T>) -> Array1<T> {
        self.apply(input)
    }
}
