use ndarray::prelude::*;
use num_traits::Zero;

/// Ring buffer of the last `max_history` vectors and residuals.
///
/// Row `idx_hist(step)` of `vectors` holds the vector of mixing step `step`; older steps that
/// map to the same row have been overwritten.
#[derive(Debug, Clone)]
pub struct History<T> {
    max_history: usize,
    /// Shape: (max_history, local storage size).
    pub(crate) vectors: Array2<T>,
    /// |r_step> = |input> - |vector_step>, same layout as `vectors`.
    pub(crate) residuals: Array2<T>,
}

impl<T: Clone + Zero> History<T> {
    pub fn new(len: usize, max_history: usize) -> Self {
        assert!(max_history > 0, "the history has to hold at least one vector");
        Self {
            max_history,
            vectors: Array2::zeros((max_history, len)),
            residuals: Array2::zeros((max_history, len)),
        }
    }
}

impl<T> History<T> {
    /// Position in the ring buffer of the given mixing step.
    #[inline]
    pub fn idx_hist(&self, step: usize) -> usize {
        step % self.max_history
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    pub fn vector(&self, step: usize) -> ArrayView1<T> {
        self.vectors.row(self.idx_hist(step))
    }

    pub fn residual(&self, step: usize) -> ArrayView1<T> {
        self.residuals.row(self.idx_hist(step))
    }

    pub fn vector_mut(&mut self, step: usize) -> ArrayViewMut1<T> {
        let slot: usize = self.idx_hist(step);
        self.vectors.row_mut(slot)
    }

    /// Mutable view of the vector of step `dst` together with the vector of step `src`.
    /// The two steps must not share a slot.
    pub fn vector_pair_mut(
        &mut self,
        dst: usize,
        src: usize,
    ) -> (ArrayViewMut1<T>, ArrayViewMut1<T>) {
        let (i_dst, i_src): (usize, usize) = (self.idx_hist(dst), self.idx_hist(src));
        assert_ne!(
            i_dst, i_src,
            "steps {} and {} occupy the same history slot",
            dst, src
        );
        self.vectors.multi_slice_mut((s![i_dst, ..], s![i_src, ..]))
    }
}
