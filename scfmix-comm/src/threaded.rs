use crate::Communicator;
use log::trace;
use std::sync::{Arc, Condvar, Mutex};

/// In-process communicator where every rank is a thread of the same program.
///
/// A group is created once with [ThreadComm::group] and each handle is moved into the thread
/// that plays the corresponding rank. The reduction is a generation-counting barrier: the last
/// rank to arrive publishes the sum, so all ranks observe bit-identical results independent of
/// the arrival order.
#[derive(Debug, Clone)]
pub struct ThreadComm {
    rank: usize,
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    size: usize,
    state: Mutex<ReductionState>,
    released: Condvar,
}

#[derive(Debug, Default)]
struct ReductionState {
    // partial sum of the reduction in progress
    acc: Vec<f64>,
    // number of ranks that contributed to `acc`
    arrived: usize,
    // incremented each time a reduction completes
    generation: u64,
    // result of the last completed reduction
    result: Vec<f64>,
}

impl ThreadComm {
    /// Creates the handles of a group with `size` ranks, ordered by rank.
    pub fn group(size: usize) -> Vec<ThreadComm> {
        assert!(size > 0, "a communicator group needs at least one rank");
        let shared = Arc::new(Shared {
            size,
            state: Mutex::new(ReductionState::default()),
            released: Condvar::new(),
        });
        (0..size)
            .map(|rank| ThreadComm {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }
}

impl Communicator for ThreadComm {
    fn size(&self) -> usize {
        self.shared.size
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn all_reduce_sum(&self, buf: &mut [f64]) {
        let mut state = self
            .shared
            .state
            .lock()
            .expect("communicator state poisoned by a panicking rank");

        if state.arrived == 0 {
            state.acc.clear();
            state.acc.resize(buf.len(), 0.0);
        }
        assert_eq!(
            state.acc.len(),
            buf.len(),
            "rank {} entered a reduction with a buffer of different length",
            self.rank
        );
        for (a, b) in state.acc.iter_mut().zip(buf.iter()) {
            *a += *b;
        }
        state.arrived += 1;

        let generation: u64 = state.generation;
        if state.arrived == self.shared.size {
            state.result = std::mem::take(&mut state.acc);
            state.arrived = 0;
            state.generation += 1;
            trace!(
                "reduction {} of length {} completed",
                generation,
                buf.len()
            );
            self.shared.released.notify_all();
        } else {
            while state.generation == generation {
                state = self
                    .shared
                    .released
                    .wait(state)
                    .expect("communicator state poisoned by a panicking rank");
            }
        }
        buf.copy_from_slice(&state.result);
    }
}
