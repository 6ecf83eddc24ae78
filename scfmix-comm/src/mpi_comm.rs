use crate::Communicator;
use mpi::collective::SystemOperation;
use mpi::topology::SimpleCommunicator;
use mpi::traits::CommunicatorCollectives;

impl Communicator for SimpleCommunicator {
    fn size(&self) -> usize {
        mpi::traits::Communicator::size(self) as usize
    }

    fn rank(&self) -> usize {
        mpi::traits::Communicator::rank(self) as usize
    }

    fn all_reduce_sum(&self, buf: &mut [f64]) {
        let local: Vec<f64> = buf.to_vec();
        self.all_reduce_into(&local[..], buf, SystemOperation::sum());
    }

    fn all_reduce_count(&self, value: usize) -> usize {
        let local: u64 = value as u64;
        let mut global: u64 = 0;
        self.all_reduce_into(&local, &mut global, SystemOperation::sum());
        global as usize
    }
}
