//! Loopback execution mesh: one thread per worker over an in-process
//! channel matrix.
//!
//! This is the reference implementation of the [`Collective`] contract,
//! meant for tests and single-machine runs. Payloads travel wire-encoded
//! exactly as they would over a network transport. The all-reduce folds up
//! a binomial tree and mirrors it back down, so each worker touches
//! `O(log n)` messages.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread;

use crate::flow::{Collective, FlowError};
use crate::wire::Wire;

/// One worker's endpoint in the mesh.
pub struct LoopbackChannel {
    rank: usize,
    tx: Vec<Sender<Vec<u8>>>,
    rx: Vec<Receiver<Vec<u8>>>,
}

impl LoopbackChannel {
    fn send(&self, dest: usize, payload: Vec<u8>) -> Result<(), FlowError> {
        self.tx[dest]
            .send(payload)
            .map_err(|_| FlowError::Disconnected { rank: dest })
    }

    fn recv(&self, src: usize) -> Result<Vec<u8>, FlowError> {
        self.rx[src]
            .recv()
            .map_err(|_| FlowError::Disconnected { rank: src })
    }
}

impl Collective for LoopbackChannel {
    fn rank(&self) -> usize {
        self.rank
    }

    fn peers(&self) -> usize {
        self.tx.len()
    }

    fn all_reduce<T, F>(&mut self, local: T, mut combine: F) -> Result<T, FlowError>
    where
        T: Wire,
        F: FnMut(T, T) -> T,
    {
        let n = self.peers();
        let rank = self.rank;
        let mut acc = local;

        // Fold towards rank 0: at mask m, ranks with bit m set hand their
        // accumulator to the partner below and drop out of the fold.
        let mut mask = 1usize;
        let mut sent_at = 0usize;
        while mask < n {
            if rank & mask != 0 {
                self.send(rank & !mask, acc.to_wire())?;
                sent_at = mask;
                break;
            }
            let src = rank | mask;
            if src < n {
                let other = T::from_wire(&self.recv(src)?)?;
                acc = combine(acc, other);
            }
            mask <<= 1;
        }

        // Mirror the tree: everyone receives the full reduction from the
        // partner they folded into, then relays it to their own subtree.
        let mut down = if sent_at == 0 {
            n.next_power_of_two()
        } else {
            acc = T::from_wire(&self.recv(rank & !sent_at)?)?;
            sent_at
        };
        let payload = acc.to_wire();
        down >>= 1;
        while down > 0 {
            let dest = rank | down;
            if dest != rank && dest < n {
                self.send(dest, payload.clone())?;
            }
            down >>= 1;
        }
        Ok(acc)
    }

    fn broadcast(&mut self, value: f64, root: usize) -> Result<f64, FlowError> {
        if self.rank == root {
            for dest in 0..self.peers() {
                if dest != root {
                    self.send(dest, value.to_le_bytes().to_vec())?;
                }
            }
            return Ok(value);
        }
        let bytes = self.recv(root)?;
        let raw: [u8; 8] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| FlowError::BadScalar(bytes.len()))?;
        Ok(f64::from_le_bytes(raw))
    }
}

/// Spawns `workers` threads, each owning one [`LoopbackChannel`], runs `job`
/// on every worker and returns the results in rank order. A panicking worker
/// panics the calling thread.
pub fn run_loopback<R, F>(workers: usize, job: F) -> Vec<R>
where
    F: Fn(LoopbackChannel) -> R + Send + Sync,
    R: Send,
{
    assert!(workers > 0, "mesh needs at least one worker");
    tracing::debug!(workers, "starting loopback mesh");

    let mut txs: Vec<Vec<Sender<Vec<u8>>>> =
        (0..workers).map(|_| Vec::with_capacity(workers)).collect();
    let mut rxs: Vec<Vec<Receiver<Vec<u8>>>> =
        (0..workers).map(|_| Vec::with_capacity(workers)).collect();
    for dest in 0..workers {
        for src in 0..workers {
            let (tx, rx) = channel();
            txs[src].push(tx);
            rxs[dest].push(rx);
        }
    }

    let endpoints: Vec<LoopbackChannel> = txs
        .into_iter()
        .zip(rxs)
        .enumerate()
        .map(|(rank, (tx, rx))| LoopbackChannel { rank, tx, rx })
        .collect();

    thread::scope(|scope| {
        let job = &job;
        let handles: Vec<_> = endpoints
            .into_iter()
            .map(|endpoint| scope.spawn(move || job(endpoint)))
            .collect();
        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(result) => result,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::WireError;

    /// Minimal payload for exercising the reduction topology: summing is
    /// associative and commutative, and the expected total is exact.
    struct Total(u64);

    impl Wire for Total {
        fn to_wire(&self) -> Vec<u8> {
            self.0.to_le_bytes().to_vec()
        }

        fn from_wire(bytes: &[u8]) -> Result<Self, WireError> {
            let raw: [u8; 8] = bytes.try_into().map_err(|_| WireError::Empty)?;
            Ok(Total(u64::from_le_bytes(raw)))
        }
    }

    #[test]
    fn all_reduce_reaches_every_worker() {
        for workers in [1, 2, 3, 4, 5, 7, 8] {
            let totals = run_loopback(workers, |mut net| {
                let local = Total(1 + net.rank() as u64);
                net.all_reduce(local, |a, b| Total(a.0 + b.0)).unwrap().0
            });
            let expected = (workers * (workers + 1) / 2) as u64;
            assert_eq!(totals, vec![expected; workers], "{workers} workers");
        }
    }

    #[test]
    fn broadcast_distributes_the_root_scalar() {
        for workers in [1, 2, 3, 6] {
            let got = run_loopback(workers, |mut net| {
                let value = if net.rank() == 0 { 42.5 } else { f64::NAN };
                net.broadcast(value, 0).unwrap()
            });
            assert!(got.iter().all(|&v| v == 42.5), "{workers} workers");
        }
    }

    #[test]
    fn consecutive_collectives_stay_ordered() {
        let got = run_loopback(4, |mut net| {
            let first = net
                .all_reduce(Total(net.rank() as u64), |a, b| Total(a.0 + b.0))
                .unwrap();
            let second = net
                .all_reduce(Total(10), |a, b| Total(a.0 + b.0))
                .unwrap();
            (first.0, second.0)
        });
        assert_eq!(got, vec![(6, 40); 4]);
    }
}
