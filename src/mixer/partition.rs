use crate::error::MixerError;
use ndarray::prelude::*;
use scfmix_comm::Communicator;
use std::fmt;

/// The two parts of a distributed vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionKind {
    /// Replicated identically on all ranks.
    Shared,
    /// Owned exclusively by one rank.
    Local,
}

impl fmt::Display for PartitionKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PartitionKind::Shared => write!(f, "shared"),
            PartitionKind::Local => write!(f, "local"),
        }
    }
}

/// Bookkeeping of the shared and local elements of a vector distributed over a group of ranks.
///
/// On every rank the shared elements occupy the first `shared_size` slots of the local storage,
/// followed by the `local_size` elements owned by that rank.
#[derive(Debug, Clone)]
pub struct Partition {
    shared_size: usize,
    local_size: usize,
    total_size: usize,
    num_ranks: usize,
    /// 1/num_ranks for shared elements, 1 for local ones. Summing a shared contribution over all
    /// ranks then counts it exactly once.
    local_weight: Array1<f64>,
}

impl Partition {
    /// Collective: the local sizes of all ranks are summed to obtain the total size.
    pub fn new<C: Communicator>(
        shared_size: usize,
        local_size: usize,
        comm: &C,
    ) -> Result<Self, MixerError> {
        let num_ranks: usize = comm.size();
        let total_size: usize = shared_size + comm.all_reduce_count(local_size);
        if total_size == 0 {
            return Err(MixerError::Config(String::from(
                "the mixed vector has no elements on any rank",
            )));
        }
        let shared_weight: f64 = 1.0 / num_ranks as f64;
        let local_weight: Array1<f64> = Array1::from_shape_fn(shared_size + local_size, |i| {
            if i < shared_size {
                shared_weight
            } else {
                1.0
            }
        });

        Ok(Self {
            shared_size,
            local_size,
            total_size,
            num_ranks,
            local_weight,
        })
    }

    pub fn shared_size(&self) -> usize {
        self.shared_size
    }

    pub fn local_size(&self) -> usize {
        self.local_size
    }

    /// Number of elements stored on this rank: shared plus local.
    pub fn local_storage_size(&self) -> usize {
        self.shared_size + self.local_size
    }

    /// Number of distinct elements of the whole distributed vector.
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn num_ranks(&self) -> usize {
        self.num_ranks
    }

    pub fn local_weight(&self) -> ArrayView1<f64> {
        self.local_weight.view()
    }

    /// Position of an element in the local storage.
    pub fn offset(&self, kind: PartitionKind, index: usize) -> Result<usize, MixerError> {
        let (size, start): (usize, usize) = match kind {
            PartitionKind::Shared => (self.shared_size, 0),
            PartitionKind::Local => (self.local_size, self.shared_size),
        };
        if index >= size {
            return Err(MixerError::OutOfRange {
                partition: kind,
                index,
                size,
            });
        }
        Ok(start + index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scfmix_comm::{SelfComm, ThreadComm};
    use std::thread;

    #[test]
    fn single_rank_layout() {
        let partition = Partition::new(3, 2, &SelfComm).unwrap();
        assert_eq!(partition.local_storage_size(), 5);
        assert_eq!(partition.total_size(), 5);
        assert_eq!(partition.offset(PartitionKind::Shared, 2).unwrap(), 2);
        assert_eq!(partition.offset(PartitionKind::Local, 0).unwrap(), 3);
        assert!(partition.local_weight().iter().all(|&w| w == 1.0));
    }

    #[test]
    fn out_of_range_indices_are_rejected() {
        let partition = Partition::new(3, 2, &SelfComm).unwrap();
        assert_eq!(
            partition.offset(PartitionKind::Local, 2),
            Err(MixerError::OutOfRange {
                partition: PartitionKind::Local,
                index: 2,
                size: 2
            })
        );
        assert!(partition.offset(PartitionKind::Shared, 3).is_err());
    }

    #[test]
    fn empty_vector_is_a_configuration_error() {
        assert!(matches!(
            Partition::new(0, 0, &SelfComm),
            Err(MixerError::Config(_))
        ));
    }

    #[test]
    fn shared_elements_are_weighted_by_the_number_of_ranks() {
        let group = ThreadComm::group(2);
        let partitions: Vec<Partition> = thread::scope(|scope| {
            let handles: Vec<_> = group
                .into_iter()
                .map(|comm| {
                    scope.spawn(move || {
                        // rank 0 owns 4 local elements, rank 1 owns 1
                        let local: usize = if comm.rank() == 0 { 4 } else { 1 };
                        Partition::new(2, local, &comm).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for partition in partitions.iter() {
            assert_eq!(partition.total_size(), 7);
            assert_eq!(partition.num_ranks(), 2);
            assert_eq!(partition.local_weight()[0], 0.5);
            assert_eq!(partition.local_weight()[2], 1.0);
        }
        assert_eq!(partitions[0].local_storage_size(), 6);
        assert_eq!(partitions[1].local_storage_size(), 3);
    }
}
