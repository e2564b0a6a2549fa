//! Cooperating ranks and the collectives they synchronize on.
//!
//! Every collective is built on a single all-to-all [`Communicator::exchange`].
//! Reductions combine contributions in rank order, so all ranks observe
//! bit-identical results.

use crate::error::{HpfError, Result};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

#[cfg(feature = "mpi")]
mod mpi_backend;
#[cfg(feature = "mpi")]
pub use mpi_backend::MpiComm;

pub trait Communicator {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// All-to-all exchange: `send[q]` goes to rank `q`, the result holds at
    /// index `p` whatever rank `p` addressed to this rank.
    fn exchange(&self, send: Vec<Vec<f64>>) -> Result<Vec<Vec<f64>>>;

    fn is_root(&self) -> bool {
        self.rank() == 0
    }

    fn all_reduce_sum(&self, values: &[f64]) -> Result<Vec<f64>> {
        let send = vec![values.to_vec(); self.size()];
        let received = self.exchange(send)?;
        let mut total = vec![0.0; values.len()];
        for contribution in &received {
            if contribution.len() != values.len() {
                return Err(HpfError::Collective {
                    rank: self.rank(),
                    reason: format!(
                        "all-reduce length mismatch: expected {}, got {}",
                        values.len(),
                        contribution.len()
                    ),
                });
            }
            for (acc, v) in total.iter_mut().zip(contribution) {
                *acc += v;
            }
        }
        Ok(total)
    }

    fn all_reduce_scalar(&self, value: f64) -> Result<f64> {
        Ok(self.all_reduce_sum(&[value])?[0])
    }

    /// Every rank receives the root's `values`; other ranks' arguments are ignored.
    fn broadcast(&self, root: usize, values: &[f64]) -> Result<Vec<f64>> {
        let send = if self.rank() == root {
            vec![values.to_vec(); self.size()]
        } else {
            vec![Vec::new(); self.size()]
        };
        let mut received = self.exchange(send)?;
        if root >= received.len() {
            return Err(HpfError::Collective {
                rank: self.rank(),
                reason: format!("broadcast root {root} out of range"),
            });
        }
        Ok(std::mem::take(&mut received[root]))
    }

    /// Collect every rank's buffer on `root`, indexed by source rank.
    fn gather(&self, root: usize, values: Vec<f64>) -> Result<Option<Vec<Vec<f64>>>> {
        let mut send = vec![Vec::new(); self.size()];
        if root >= send.len() {
            return Err(HpfError::Collective {
                rank: self.rank(),
                reason: format!("gather root {root} out of range"),
            });
        }
        send[root] = values;
        let received = self.exchange(send)?;
        Ok((self.rank() == root).then_some(received))
    }
}

/// The trivial communicator of a run with one rank.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl Communicator for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn exchange(&self, mut send: Vec<Vec<f64>>) -> Result<Vec<Vec<f64>>> {
        if send.len() != 1 {
            return Err(HpfError::Collective {
                rank: 0,
                reason: format!("exchange expects 1 buffer, got {}", send.len()),
            });
        }
        Ok(vec![send.remove(0)])
    }
}

struct MailboxState {
    // slots[dst][src]
    slots: Vec<Vec<Option<Vec<f64>>>>,
    arrived: usize,
    generation: u64,
    aborted: bool,
}

struct Mailbox {
    size: usize,
    state: Mutex<MailboxState>,
    released: Condvar,
}

impl Mailbox {
    fn lock(&self) -> MutexGuard<'_, MailboxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn abort(&self) {
        let mut state = self.lock();
        state.aborted = true;
        self.released.notify_all();
    }

    /// Block until all ranks arrive; fails as soon as any rank aborts.
    fn wait<'a>(
        &'a self,
        mut state: MutexGuard<'a, MailboxState>,
        rank: usize,
    ) -> Result<MutexGuard<'a, MailboxState>> {
        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == self.size {
            state.arrived = 0;
            state.generation += 1;
            self.released.notify_all();
        } else {
            while state.generation == generation && !state.aborted {
                state = self
                    .released
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
        if state.aborted {
            return Err(aborted(rank));
        }
        Ok(state)
    }
}

fn aborted(rank: usize) -> HpfError {
    HpfError::Collective {
        rank,
        reason: "another rank aborted the run".to_string(),
    }
}

/// One rank of an in-process group; each rank runs on its own thread.
pub struct ThreadComm {
    rank: usize,
    mailbox: Arc<Mailbox>,
}

impl ThreadComm {
    /// Mark the group as failed and release every rank blocked in a collective.
    pub fn abort(&self) {
        self.mailbox.abort();
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.mailbox.size
    }

    fn exchange(&self, send: Vec<Vec<f64>>) -> Result<Vec<Vec<f64>>> {
        let size = self.mailbox.size;
        if send.len() != size {
            return Err(HpfError::Collective {
                rank: self.rank,
                reason: format!("exchange expects {size} buffers, got {}", send.len()),
            });
        }

        let mut state = self.mailbox.lock();
        if state.aborted {
            return Err(aborted(self.rank));
        }
        for (dst, buffer) in send.into_iter().enumerate() {
            state.slots[dst][self.rank] = Some(buffer);
        }
        let mut state = self.mailbox.wait(state, self.rank)?;

        let mut received = Vec::with_capacity(size);
        for src in 0..size {
            match state.slots[self.rank][src].take() {
                Some(buffer) => received.push(buffer),
                None => {
                    drop(state);
                    self.mailbox.abort();
                    return Err(HpfError::Collective {
                        rank: self.rank,
                        reason: format!("missing message from rank {src}"),
                    });
                }
            }
        }
        // nobody may deposit the next round before every rank has drained this one
        self.mailbox.wait(state, self.rank)?;
        Ok(received)
    }
}

/// Factory for a fixed set of cooperating in-process ranks.
pub struct ProcessGroup;

impl ProcessGroup {
    pub fn communicators(size: usize) -> Vec<ThreadComm> {
        let mailbox = Arc::new(Mailbox {
            size,
            state: Mutex::new(MailboxState {
                slots: vec![vec![None; size]; size],
                arrived: 0,
                generation: 0,
                aborted: false,
            }),
            released: Condvar::new(),
        });
        (0..size)
            .map(|rank| ThreadComm {
                rank,
                mailbox: Arc::clone(&mailbox),
            })
            .collect()
    }

    /// Run `body` once per rank, each on its own thread, and collect the
    /// per-rank results in rank order.
    ///
    /// A rank that returns an error or panics aborts the group. The error
    /// reported is the root cause rather than the echoes it produced on the
    /// other ranks.
    pub fn run<T, F>(size: usize, body: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(&ThreadComm) -> Result<T> + Sync,
    {
        if size == 0 {
            return Err(HpfError::config("process group needs at least one rank"));
        }
        let comms = ProcessGroup::communicators(size);
        let body = &body;

        let outcomes: Vec<Result<T>> = thread::scope(|scope| {
            let handles: Vec<_> = comms
                .iter()
                .map(|comm| {
                    scope.spawn(move || {
                        let guard = AbortOnUnwind(comm);
                        let outcome = body(comm);
                        if outcome.is_err() {
                            comm.abort();
                        }
                        std::mem::forget(guard);
                        outcome
                    })
                })
                .collect();
            handles
                .into_iter()
                .enumerate()
                .map(|(rank, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        Err(HpfError::Collective {
                            rank,
                            reason: "rank panicked".to_string(),
                        })
                    })
                })
                .collect()
        });

        let mut results = Vec::with_capacity(size);
        let mut first_echo = None;
        for outcome in outcomes {
            match outcome {
                Ok(value) => results.push(value),
                Err(err) if err.is_collective() => {
                    first_echo.get_or_insert(err);
                }
                Err(err) => return Err(err),
            }
        }
        match first_echo {
            Some(err) => Err(err),
            None => Ok(results),
        }
    }
}

struct AbortOnUnwind<'a>(&'a ThreadComm);

impl Drop for AbortOnUnwind<'_> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_process_collectives_are_identity() {
        let comm = SingleProcess;
        assert_eq!(comm.all_reduce_sum(&[1.0, 2.0]).unwrap(), vec![1.0, 2.0]);
        assert_eq!(comm.broadcast(0, &[3.0]).unwrap(), vec![3.0]);
        assert_eq!(
            comm.gather(0, vec![4.0]).unwrap(),
            Some(vec![vec![4.0]])
        );
    }

    #[test]
    fn all_reduce_matches_on_every_rank() {
        let sums = ProcessGroup::run(3, |comm| {
            comm.all_reduce_sum(&[comm.rank() as f64, 1.0])
        })
        .unwrap();
        for sum in sums {
            assert_eq!(sum, vec![3.0, 3.0]);
        }
    }

    #[test]
    fn exchange_routes_by_destination() {
        let received = ProcessGroup::run(2, |comm| {
            let send = (0..comm.size())
                .map(|dst| vec![(10 * comm.rank() + dst) as f64])
                .collect();
            comm.exchange(send)
        })
        .unwrap();
        assert_eq!(received[0], vec![vec![0.0], vec![10.0]]);
        assert_eq!(received[1], vec![vec![1.0], vec![11.0]]);
    }

    #[test]
    fn broadcast_uses_root_value() {
        let values = ProcessGroup::run(4, |comm| {
            let mine = [comm.rank() as f64 + 0.5];
            comm.broadcast(0, &mine)
        })
        .unwrap();
        assert!(values.iter().all(|v| v == &vec![0.5]));
    }

    #[test]
    fn failing_rank_aborts_group_with_root_cause() {
        let outcome: Result<Vec<f64>> = ProcessGroup::run(3, |comm| {
            if comm.rank() == 1 {
                return Err(HpfError::config("rank 1 refuses"));
            }
            comm.all_reduce_scalar(1.0)
        });
        match outcome {
            Err(HpfError::Config(msg)) => assert_eq!(msg, "rank 1 refuses"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
