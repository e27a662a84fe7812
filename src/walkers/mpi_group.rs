/* ************************************************************************ **
** This file is part of vesfit, and is licensed under EITHER the MIT        **
** license or the Apache 2.0 license, at your option.                       **
**                                                                          **
**     http://www.apache.org/licenses/LICENSE-2.0                           **
**     http://opensource.org/licenses/MIT                                   **
** ************************************************************************ */

//! MPI-backed replica group, one walker per process.
//!
//! Compiled only with the `mpi-support` feature.  The caller is responsible
//! for keeping the `mpi::environment::Universe` alive for the duration of
//! the run.

use crate::ReplicaGroup;

/// A replica group spanning `MPI_COMM_WORLD`.
#[derive(Clone)]
pub struct MpiWorld {
    world: mpi::SystemCommunicator,
}

impl MpiWorld {
    /// MPI must already be initialized (`mpi::initialize()`).
    pub fn world() -> MpiWorld {
        MpiWorld { world: mpi::SystemCommunicator::world() }
    }
}

impl ReplicaGroup for MpiWorld {
    fn size(&self) -> usize {
        mpi::Communicator::size(&self.world) as usize
    }

    fn rank(&self) -> usize {
        mpi::Communicator::rank(&self.world) as usize
    }

    fn sum(&self, buf: &mut [f64]) {
        let send = buf.to_vec();
        mpi::CommunicatorCollectives::all_reduce_into(
            &self.world,
            &send[..],
            &mut buf[..],
            &mpi::SystemOperation::sum(),
        );
    }

    fn broadcast(&self, buf: &mut [f64], root: usize) {
        let root = mpi::Communicator::process_at_rank(&self.world, root as i32);
        mpi::Root::broadcast_into(&root, &mut buf[..]);
    }
}
