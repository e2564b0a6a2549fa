//! MPI ranks behind [`Communicator`]. The exchange is one `MPI_Alltoall` of
//! buffer lengths followed by an `MPI_Alltoallv` of the payload.

use super::Communicator;
use crate::error::{HpfError, Result};
use mpi::datatype::{Partition, PartitionMut};
use mpi::topology::SimpleCommunicator;
use mpi::traits::{Communicator as _, CommunicatorCollectives as _};
use mpi::Count;

/// One MPI process of the world communicator.
pub struct MpiComm {
    world: SimpleCommunicator,
}

impl MpiComm {
    pub fn new(world: SimpleCommunicator) -> Self {
        MpiComm { world }
    }

    /// Terminate every process of the world with `code`.
    pub fn abort(&self, code: i32) -> ! {
        self.world.abort(code)
    }
}

impl Communicator for MpiComm {
    fn rank(&self) -> usize {
        self.world.rank() as usize
    }

    fn size(&self) -> usize {
        self.world.size() as usize
    }

    fn exchange(&self, send: Vec<Vec<f64>>) -> Result<Vec<Vec<f64>>> {
        let size = self.size();
        if send.len() != size {
            return Err(HpfError::Collective {
                rank: self.rank(),
                reason: format!("exchange expects {size} buffers, got {}", send.len()),
            });
        }

        let send_counts = send
            .iter()
            .map(|buffer| {
                Count::try_from(buffer.len()).map_err(|_| HpfError::Collective {
                    rank: self.rank(),
                    reason: format!("buffer of {} values exceeds an MPI count", buffer.len()),
                })
            })
            .collect::<Result<Vec<Count>>>()?;
        let mut recv_counts = vec![0 as Count; size];
        self.world
            .all_to_all_into(&send_counts[..], &mut recv_counts[..]);

        let send_displs = displacements(&send_counts);
        let recv_displs = displacements(&recv_counts);
        let flat = send.concat();
        let mut received = vec![0.0; recv_counts.iter().map(|&c| c as usize).sum()];
        {
            let outgoing = Partition::new(&flat[..], &send_counts[..], &send_displs[..]);
            let mut incoming =
                PartitionMut::new(&mut received[..], &recv_counts[..], &recv_displs[..]);
            self.world.all_to_all_varcount_into(&outgoing, &mut incoming);
        }
        Ok(split(received, &recv_counts))
    }
}

fn displacements(counts: &[Count]) -> Vec<Count> {
    counts
        .iter()
        .scan(0, |offset, &count| {
            let start = *offset;
            *offset += count;
            Some(start)
        })
        .collect()
}

fn split(flat: Vec<f64>, counts: &[Count]) -> Vec<Vec<f64>> {
    let mut rest = flat.as_slice();
    counts
        .iter()
        .map(|&count| {
            let (head, tail) = rest.split_at(count as usize);
            rest = tail;
            head.to_vec()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displacements_are_exclusive_prefix_sums() {
        assert_eq!(displacements(&[3, 0, 2, 1]), vec![0, 3, 3, 5]);
        assert!(displacements(&[]).is_empty());
    }

    #[test]
    fn flat_receive_buffer_splits_by_source() {
        let parts = split(vec![1.0, 2.0, 3.0, 4.0], &[1, 0, 3]);
        assert_eq!(parts, vec![vec![1.0], vec![], vec![2.0, 3.0, 4.0]]);
    }

    // A test binary started without mpirun runs as a singleton world.
    #[test]
    fn singleton_world_behaves_like_a_single_process() {
        let universe = mpi::initialize().unwrap();
        let comm = MpiComm::new(universe.world());
        assert_eq!((comm.rank(), comm.size()), (0, 1));

        let received = comm.exchange(vec![vec![1.0, -2.0, 0.5]]).unwrap();
        assert_eq!(received, vec![vec![1.0, -2.0, 0.5]]);
        assert_eq!(comm.exchange(vec![Vec::new()]).unwrap(), vec![Vec::<f64>::new()]);
        assert_eq!(comm.all_reduce_sum(&[1.5, 2.0]).unwrap(), vec![1.5, 2.0]);
        assert_eq!(comm.broadcast(0, &[4.0]).unwrap(), vec![4.0]);
        assert!(comm.exchange(vec![Vec::new(), Vec::new()]).is_err());
    }
}
