//! Collective operations for a group of ranks that jointly own a distributed vector.
//!
//! Every collective in this crate is blocking and all-participant: each rank of the group has to
//! call it the same number of times, in the same order and with buffers of equal length.
//! Violating this is a programming error that cannot be detected locally; depending on the
//! backend it deadlocks or yields inconsistent values.
mod serial;
mod threaded;

#[cfg(feature = "mpi")]
mod mpi_comm;

pub use serial::SelfComm;
pub use threaded::ThreadComm;

use std::rc::Rc;
use std::sync::Arc;

/// Minimal communicator interface needed by the mixers.
pub trait Communicator {
    /// Number of ranks in the group.
    fn size(&self) -> usize;

    /// Index of the calling rank, `0 <= rank < size`.
    fn rank(&self) -> usize;

    /// Element-wise sum of `buf` over all ranks. On return every rank holds the same result.
    fn all_reduce_sum(&self, buf: &mut [f64]);

    /// Sum of an integer count over all ranks.
    fn all_reduce_count(&self, value: usize) -> usize {
        let mut buf: [f64; 1] = [value as f64];
        self.all_reduce_sum(&mut buf);
        buf[0].round() as usize
    }
}

impl<C: Communicator + ?Sized> Communicator for &C {
    fn size(&self) -> usize {
        (**self).size()
    }

    fn rank(&self) -> usize {
        (**self).rank()
    }

    fn all_reduce_sum(&self, buf: &mut [f64]) {
        (**self).all_reduce_sum(buf)
    }

    fn all_reduce_count(&self, value: usize) -> usize {
        (**self).all_reduce_count(value)
    }
}

impl<C: Communicator + ?Sized> Communicator for Arc<C> {
    fn size(&self) -> usize {
        (**self).size()
    }

    fn rank(&self) -> usize {
        (**self).rank()
    }

    fn all_reduce_sum(&self, buf: &mut [f64]) {
        (**self).all_reduce_sum(buf)
    }

    fn all_reduce_count(&self, value: usize) -> usize {
        (**self).all_reduce_count(value)
    }
}

impl<C: Communicator + ?Sized> Communicator for Rc<C> {
    fn size(&self) -> usize {
        (**self).size()
    }

    fn rank(&self) -> usize {
        (**self).rank()
    }

    fn all_reduce_sum(&self, buf: &mut [f64]) {
        (**self).all_reduce_sum(buf)
    }

    fn all_reduce_count(&self, value: usize) -> usize {
        (**self).all_reduce_count(value)
    }
}
