/* ************************************************************************ **
** This file is part of vesfit, and is licensed under EITHER the MIT        **
** license or the Apache 2.0 license, at your option.                       **
**                                                                          **
**     http://www.apache.org/licenses/LICENSE-2.0                           **
**     http://opensource.org/licenses/MIT                                   **
** ************************************************************************ */

//! Collectives over a group of cooperating simulation replicas ("walkers").
//!
//! The optimizer only ever needs two operations on a group: an element-wise
//! `sum` whose result is visible to every member, and a `broadcast` from a
//! designated member. Both are blocking: no participant returns until every
//! participant has entered the call. A walker that never arrives stalls its
//! whole group; there is no timeout.

#[macro_use] extern crate log;
#[macro_use] extern crate failure;

use std::sync::{Arc, Barrier, Mutex};

pub type FailResult<T> = Result<T, failure::Error>;

#[cfg(feature = "mpi-support")]
mod mpi_group;
#[cfg(feature = "mpi-support")]
pub use crate::mpi_group::MpiWorld;

/// A group of cooperating replicas.
///
/// Ranks run from `0` to `size() - 1`.  `sum` and `broadcast` must be called
/// in the same order with same-length buffers on every member of the group.
pub trait ReplicaGroup {
    fn size(&self) -> usize;
    fn rank(&self) -> usize;

    /// Replace `buf` on every member with the element-wise sum over the group.
    fn sum(&self, buf: &mut [f64]);

    /// Replace `buf` on every member with `root`'s `buf`.
    fn broadcast(&self, buf: &mut [f64], root: usize);
}

#[derive(Debug, Fail)]
#[fail(display = "walker averaging requested with a replica group of size 1 \
                  (running without a second replica?)")]
pub struct LonelyWalkerError;

/// Sum-then-broadcast averaging over a replica group.
///
/// Every member ends up with the identical array: the sum is divided by the
/// group size, and the result is then broadcast from rank 0 so that no member
/// can diverge even in the last bit.
pub fn average_over_group(group: &dyn ReplicaGroup, buf: &mut [f64]) -> FailResult<()> {
    if group.size() == 1 {
        return Err(LonelyWalkerError.into());
    }
    group.sum(buf);
    let scale = 1.0 / group.size() as f64;
    for x in buf.iter_mut() {
        *x *= scale;
    }
    group.broadcast(buf, 0);
    Ok(())
}

/// The trivial group for non-distributed runs.  Both collectives are no-ops.
#[derive(Debug, Default, Copy, Clone)]
pub struct SingleReplica;

impl ReplicaGroup for SingleReplica {
    fn size(&self) -> usize { 1 }
    fn rank(&self) -> usize { 0 }

    fn sum(&self, _buf: &mut [f64]) {}

    fn broadcast(&self, _buf: &mut [f64], root: usize) {
        assert_eq!(root, 0, "SingleReplica has no rank {}", root);
    }
}

/// An in-process replica group over OS threads.
///
/// `ThreadGroup::new(n)` hands out one handle per rank; each handle must be
/// moved onto its own thread.  Used by the tests and by the demo driver to
/// exercise real all-participants-blocking semantics without MPI.
#[derive(Debug)]
pub struct ThreadGroup {
    shared: Arc<ThreadGroupShared>,
    rank: usize,
}

#[derive(Debug)]
struct ThreadGroupShared {
    size: usize,
    barrier: Barrier,
    scratch: Mutex<Vec<f64>>,
}

impl ThreadGroup {
    pub fn new(size: usize) -> Vec<ThreadGroup> {
        assert!(size > 0, "a replica group must have at least one member");
        let shared = Arc::new(ThreadGroupShared {
            size,
            barrier: Barrier::new(size),
            scratch: Mutex::new(vec![]),
        });
        (0..size)
            .map(|rank| ThreadGroup { shared: Arc::clone(&shared), rank })
            .collect()
    }

    // Scratch lifecycle: enter together, mutate, leave together, then one
    // member wipes the scratch before anybody can start the next collective.
    fn collective(
        &self,
        buf: &mut [f64],
        write: impl FnOnce(&mut Vec<f64>, &[f64]),
        read: impl FnOnce(&[f64], &mut [f64]),
    ) {
        let shared = &self.shared;
        shared.barrier.wait();
        write(&mut shared.scratch.lock().unwrap(), buf);
        shared.barrier.wait();
        read(&shared.scratch.lock().unwrap(), buf);
        if shared.barrier.wait().is_leader() {
            shared.scratch.lock().unwrap().clear();
        }
        shared.barrier.wait();
    }
}

impl ReplicaGroup for ThreadGroup {
    fn size(&self) -> usize { self.shared.size }
    fn rank(&self) -> usize { self.rank }

    fn sum(&self, buf: &mut [f64]) {
        trace!("walker {}: entering sum over {} replicas", self.rank, self.size());
        self.collective(
            buf,
            |scratch, buf| {
                if scratch.is_empty() {
                    scratch.extend_from_slice(buf);
                } else {
                    assert_eq!(scratch.len(), buf.len(), "replica buffers differ in length");
                    for (acc, x) in scratch.iter_mut().zip(buf.iter()) {
                        *acc += *x;
                    }
                }
            },
            |scratch, buf| buf.copy_from_slice(scratch),
        );
    }

    fn broadcast(&self, buf: &mut [f64], root: usize) {
        assert!(root < self.shared.size, "no rank {} in a group of {}", root, self.shared.size);
        trace!("walker {}: entering broadcast from {}", self.rank, root);
        let rank = self.rank;
        self.collective(
            buf,
            |scratch, buf| {
                if rank == root {
                    scratch.extend_from_slice(buf);
                }
            },
            |scratch, buf| {
                if rank != root {
                    assert_eq!(scratch.len(), buf.len(), "replica buffers differ in length");
                    buf.copy_from_slice(scratch);
                }
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn on_each_walker<F>(size: usize, func: F) -> Vec<Vec<f64>>
    where F: Fn(ThreadGroup) -> Vec<f64> + Send + Sync + 'static,
    {
        let func = Arc::new(func);
        let handles: Vec<_> = ThreadGroup::new(size).into_iter()
            .map(|group| {
                let func = Arc::clone(&func);
                thread::spawn(move || func(group))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    #[test]
    fn averaging_three_walkers() {
        let results = on_each_walker(3, |group| {
            let mut buf = vec![group.rank() as f64 + 1.0, 10.0 * (group.rank() as f64 + 1.0)];
            average_over_group(&group, &mut buf).unwrap();
            buf
        });
        for buf in results {
            assert_eq!(buf, vec![2.0, 20.0]);
        }
    }

    #[test]
    fn broadcast_overwrites_non_roots() {
        let results = on_each_walker(4, |group| {
            let mut buf = vec![group.rank() as f64; 3];
            group.broadcast(&mut buf, 2);
            buf
        });
        for buf in results {
            assert_eq!(buf, vec![2.0; 3]);
        }
    }

    #[test]
    fn back_to_back_collectives_do_not_mix() {
        let results = on_each_walker(2, |group| {
            let mut a = vec![1.0];
            let mut b = vec![3.0];
            group.sum(&mut a);
            group.sum(&mut b);
            vec![a[0], b[0]]
        });
        for buf in results {
            assert_eq!(buf, vec![2.0, 6.0]);
        }
    }

    #[test]
    fn lonely_walker_is_an_error() {
        let mut buf = vec![1.0];
        assert!(average_over_group(&SingleReplica, &mut buf).is_err());
        // untouched on failure
        assert_eq!(buf, vec![1.0]);
    }

    #[test]
    fn single_replica_collectives_are_noops() {
        let mut buf = vec![1.0, 2.0];
        SingleReplica.sum(&mut buf);
        SingleReplica.broadcast(&mut buf, 0);
        assert_eq!(buf, vec![1.0, 2.0]);
    }
}
