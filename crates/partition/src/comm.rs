//! Rank-to-rank message passing.
//!
//! [`Communicator`] is the seam between the partitioning protocol and the
//! transport. Every operation is a collective: all ranks call the same
//! operations in the same order.
//!
//! [`LocalCluster`] runs one thread per rank inside the current process and
//! connects them with `crossbeam-channel` mailboxes. It is a drop-in stand-in
//! for a network transport: a later MPI or socket backend only has to
//! implement [`Communicator`].

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::error::{CommError, PartitionError};

/// Collective communication between a fixed set of ranks.
pub trait Communicator {
    /// Index of this rank in `0..size()`.
    fn rank(&self) -> usize;

    /// Number of ranks.
    fn size(&self) -> usize;

    /// Every rank contributes one value; every rank receives all values in
    /// rank order.
    fn all_gather<T>(&self, value: T) -> Result<Vec<T>, CommError>
    where
        T: Clone + Send + 'static;

    /// `outgoing[r]` is delivered to rank `r`; the result holds at index `r`
    /// what rank `r` sent to this rank.
    fn all_to_all<T>(&self, outgoing: Vec<Vec<T>>) -> Result<Vec<Vec<T>>, CommError>
    where
        T: Send + 'static;

    /// Signal every rank to stop. Pending and future collectives on all
    /// ranks return [`CommError::Aborted`].
    fn abort(&self);

    /// Bound every later wait for a peer by `timeout`.
    fn set_timeout(&mut self, timeout: Duration);

    /// Combine one value per rank with `op`, in rank order. Every rank gets
    /// the same result.
    fn all_reduce<T, F>(&self, value: T, op: F) -> Result<T, CommError>
    where
        T: Clone + Send + 'static,
        F: Fn(T, T) -> T,
    {
        let mut values = self.all_gather(value)?.into_iter();
        let first = values.next().ok_or(CommError::UnexpectedPayload {
            rank: self.rank(),
            peer: self.rank(),
        })?;
        Ok(values.fold(first, op))
    }

    /// Block until every rank has reached the barrier.
    fn barrier(&self) -> Result<(), CommError> {
        self.all_gather(())?;
        Ok(())
    }
}

/// All-to-all in two rounds: every rank first announces how many items it
/// will send to each peer, then sends them. Received lengths that disagree
/// with the announcement are a [`CommError::SizeMismatch`].
pub fn all_to_all_announced<C, T>(comm: &C, outgoing: Vec<Vec<T>>) -> Result<Vec<Vec<T>>, CommError>
where
    C: Communicator,
    T: Send + 'static,
{
    let announced = comm.all_to_all(outgoing.iter().map(|items| vec![items.len()]).collect())?;
    let incoming = comm.all_to_all(outgoing)?;
    for (peer, (items, announcement)) in incoming.iter().zip(&announced).enumerate() {
        let expected = match announcement.as_slice() {
            [n] => *n,
            _ => return Err(CommError::UnexpectedPayload { rank: comm.rank(), peer }),
        };
        if items.len() != expected {
            return Err(CommError::SizeMismatch {
                rank: comm.rank(),
                peer,
                expected,
                got: items.len(),
            });
        }
    }
    Ok(incoming)
}

/// Default bound on a single receive.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// Receives wake up this often to notice a cluster-wide abort
const POLL_INTERVAL: Duration = Duration::from_millis(5);

struct Envelope {
    seq: u64,
    source: usize,
    payload: Box<dyn Any + Send>,
}

/// State shared by every rank of a cluster.
#[derive(Debug)]
struct ClusterState {
    aborted: AtomicBool,
    first_failure: AtomicUsize,
}

impl ClusterState {
    fn new() -> Self {
        Self {
            aborted: AtomicBool::new(false),
            first_failure: AtomicUsize::new(usize::MAX),
        }
    }

    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Raise the abort flag, remembering `rank` if it is the first to fail.
    fn fail(&self, rank: usize) {
        let _ = self
            .first_failure
            .compare_exchange(usize::MAX, rank, Ordering::SeqCst, Ordering::SeqCst);
        self.aborted.store(true, Ordering::SeqCst);
    }

    fn first_failure(&self) -> Option<usize> {
        match self.first_failure.load(Ordering::SeqCst) {
            usize::MAX => None,
            rank => Some(rank),
        }
    }
}

/// In-process [`Communicator`] backed by crossbeam channels.
///
/// Messages carry the sequence number of the collective that produced them
/// and their source rank, so messages from a rank that already moved on to
/// the next collective are buffered until they are asked for.
pub struct LocalCommunicator {
    rank: usize,
    senders: Vec<Sender<Envelope>>,
    inbox: Receiver<Envelope>,
    // Every inbox stays open until the last communicator is dropped
    _mailboxes: Arc<Vec<Receiver<Envelope>>>,
    pending: RefCell<HashMap<(u64, usize), Box<dyn Any + Send>>>,
    seq: Cell<u64>,
    timeout: Duration,
    state: Arc<ClusterState>,
}

impl std::fmt::Debug for LocalCommunicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCommunicator")
            .field("rank", &self.rank)
            .field("size", &self.senders.len())
            .field("seq", &self.seq.get())
            .finish()
    }
}

impl LocalCommunicator {
    fn next_seq(&self) -> u64 {
        let seq = self.seq.get();
        self.seq.set(seq + 1);
        seq
    }

    fn send(&self, peer: usize, seq: u64, payload: Box<dyn Any + Send>) -> Result<(), CommError> {
        if self.state.is_aborted() {
            return Err(CommError::Aborted { rank: self.rank });
        }
        let envelope = Envelope {
            seq,
            source: self.rank,
            payload,
        };
        self.senders[peer]
            .send(envelope)
            .map_err(|_| CommError::Disconnected { rank: self.rank, peer })
    }

    fn recv(&self, peer: usize, seq: u64) -> Result<Box<dyn Any + Send>, CommError> {
        if let Some(payload) = self.pending.borrow_mut().remove(&(seq, peer)) {
            return Ok(payload);
        }
        let start = Instant::now();
        let deadline = start + self.timeout;
        loop {
            if self.state.is_aborted() {
                return Err(CommError::Aborted { rank: self.rank });
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(CommError::Timeout {
                    rank: self.rank,
                    peer,
                    waited_ms: start.elapsed().as_millis() as u64,
                });
            }
            match self.inbox.recv_timeout(POLL_INTERVAL.min(deadline - now)) {
                Ok(envelope) if envelope.seq == seq && envelope.source == peer => {
                    return Ok(envelope.payload);
                }
                Ok(envelope) => {
                    self.pending
                        .borrow_mut()
                        .insert((envelope.seq, envelope.source), envelope.payload);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(CommError::Disconnected { rank: self.rank, peer });
                }
            }
        }
    }

    fn recv_typed<T: 'static>(&self, peer: usize, seq: u64) -> Result<T, CommError> {
        self.recv(peer, seq)?
            .downcast::<T>()
            .map(|boxed| *boxed)
            .map_err(|_| CommError::UnexpectedPayload { rank: self.rank, peer })
    }
}

impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.senders.len()
    }

    fn all_gather<T>(&self, value: T) -> Result<Vec<T>, CommError>
    where
        T: Clone + Send + 'static,
    {
        let seq = self.next_seq();
        for peer in (0..self.size()).filter(|&p| p != self.rank) {
            self.send(peer, seq, Box::new(value.clone()))?;
        }
        let mut gathered = Vec::with_capacity(self.size());
        for peer in 0..self.size() {
            if peer == self.rank {
                gathered.push(value.clone());
            } else {
                gathered.push(self.recv_typed::<T>(peer, seq)?);
            }
        }
        Ok(gathered)
    }

    fn all_to_all<T>(&self, outgoing: Vec<Vec<T>>) -> Result<Vec<Vec<T>>, CommError>
    where
        T: Send + 'static,
    {
        if outgoing.len() != self.size() {
            return Err(CommError::SizeMismatch {
                rank: self.rank,
                peer: self.rank,
                expected: self.size(),
                got: outgoing.len(),
            });
        }
        let seq = self.next_seq();
        let mut own = Vec::new();
        for (peer, items) in outgoing.into_iter().enumerate() {
            if peer == self.rank {
                own = items;
            } else {
                self.send(peer, seq, Box::new(items))?;
            }
        }
        let mut incoming = Vec::with_capacity(self.size());
        for peer in 0..self.size() {
            if peer == self.rank {
                incoming.push(std::mem::take(&mut own));
            } else {
                incoming.push(self.recv_typed::<Vec<T>>(peer, seq)?);
            }
        }
        Ok(incoming)
    }

    fn abort(&self) {
        self.state.fail(self.rank);
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
}

/// A set of ranks running as threads of the current process.
#[derive(Debug, Clone)]
pub struct LocalCluster {
    size: usize,
    timeout: Duration,
}

impl LocalCluster {
    /// Cluster of `size` ranks with the default receive timeout.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the bound on a single receive. A [`BodySystem`] replaces it
    /// with its configured `comm_timeout_ms`.
    ///
    /// [`BodySystem`]: crate::BodySystem
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Number of ranks.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Connected communicators, one per rank, in rank order.
    ///
    /// Useful when the caller manages its own threads; [`LocalCluster::run`]
    /// covers the common case.
    pub fn communicators(&self) -> Vec<LocalCommunicator> {
        self.connect(Arc::new(ClusterState::new()))
    }

    fn connect(&self, state: Arc<ClusterState>) -> Vec<LocalCommunicator> {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..self.size).map(|_| unbounded()).unzip();
        let mailboxes = Arc::new(receivers);
        (0..self.size)
            .map(|rank| LocalCommunicator {
                rank,
                senders: senders.clone(),
                inbox: mailboxes[rank].clone(),
                _mailboxes: Arc::clone(&mailboxes),
                pending: RefCell::new(HashMap::new()),
                seq: Cell::new(0),
                timeout: self.timeout,
                state: Arc::clone(&state),
            })
            .collect()
    }

    /// Run `f` once per rank, each on its own thread, and collect the
    /// results in rank order.
    ///
    /// If any rank fails or panics, every other rank is aborted and the
    /// error of the first rank to fail is returned.
    pub fn run<F, R>(&self, f: F) -> Result<Vec<R>, PartitionError>
    where
        F: Fn(LocalCommunicator) -> Result<R, PartitionError> + Sync,
        R: Send,
    {
        if self.size == 0 {
            return Err(PartitionError::InvalidConfig(
                "a cluster needs at least one rank".to_string(),
            ));
        }
        tracing::debug!("Starting local cluster with {} ranks", self.size);

        let state = Arc::new(ClusterState::new());
        let communicators = self.connect(Arc::clone(&state));

        let results: Vec<Result<R, PartitionError>> = thread::scope(|scope| {
            let handles: Vec<_> = communicators
                .into_iter()
                .map(|comm| {
                    let f = &f;
                    let state = Arc::clone(&state);
                    scope.spawn(move || {
                        let rank = comm.rank();
                        let result = match panic::catch_unwind(AssertUnwindSafe(|| f(comm))) {
                            Ok(result) => result,
                            Err(_) => Err(PartitionError::RankPanicked { rank }),
                        };
                        if let Err(e) = &result {
                            if !e.is_secondary() {
                                tracing::warn!("Rank {} failed: {}", rank, e);
                            }
                            state.fail(rank);
                        }
                        result
                    })
                })
                .collect();

            handles
                .into_iter()
                .enumerate()
                .map(|(rank, handle)| {
                    handle
                        .join()
                        .unwrap_or(Err(PartitionError::RankPanicked { rank }))
                })
                .collect()
        });

        let Some(root) = state.first_failure() else {
            return results.into_iter().collect();
        };
        let mut errors: Vec<(usize, PartitionError)> = results
            .into_iter()
            .enumerate()
            .filter_map(|(rank, r)| r.err().map(|e| (rank, e)))
            .collect();
        if errors.is_empty() {
            // Abort raised through `Communicator::abort` while every rank returned Ok
            return Err(CommError::Aborted { rank: root }.into());
        }
        let position = errors
            .iter()
            .position(|(rank, _)| *rank == root)
            .or_else(|| errors.iter().position(|(_, e)| !e.is_secondary()))
            .unwrap_or(0);
        let (_, root_error) = errors.swap_remove(position);
        tracing::warn!("Local cluster aborted, root cause on rank {}: {}", root, root_error);
        Err(root_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_gather_is_in_rank_order() {
        let gathered = LocalCluster::new(4)
            .run(|comm| Ok(comm.all_gather(comm.rank() * 10)?))
            .unwrap();
        for per_rank in gathered {
            assert_eq!(per_rank, vec![0, 10, 20, 30]);
        }
    }

    #[test]
    fn test_all_to_all_routes_by_destination() {
        let received = LocalCluster::new(3)
            .run(|comm| {
                let me = comm.rank();
                let outgoing = (0..comm.size()).map(|dest| vec![(me, dest); me + 1]).collect();
                Ok(comm.all_to_all(outgoing)?)
            })
            .unwrap();
        for (me, incoming) in received.iter().enumerate() {
            for (src, items) in incoming.iter().enumerate() {
                assert_eq!(items.len(), src + 1, "rank {me} from {src}");
                assert!(items.iter().all(|&(s, d)| s == src && d == me));
            }
        }
    }

    #[test]
    fn test_all_reduce_and_barrier() {
        let sums = LocalCluster::new(5)
            .run(|comm| {
                comm.barrier()?;
                Ok(comm.all_reduce(comm.rank() as u64 + 1, |a, b| a + b)?)
            })
            .unwrap();
        assert!(sums.iter().all(|&s| s == 15));
    }

    #[test]
    fn test_consecutive_collectives_do_not_mix() {
        // Rank 0 is slow, the others race ahead into the next collective
        let results = LocalCluster::new(3)
            .run(|comm| {
                if comm.rank() == 0 {
                    thread::sleep(Duration::from_millis(20));
                }
                let first = comm.all_gather(comm.rank())?;
                let second = comm.all_gather(100 + comm.rank())?;
                Ok((first, second))
            })
            .unwrap();
        for (first, second) in results {
            assert_eq!(first, vec![0, 1, 2]);
            assert_eq!(second, vec![100, 101, 102]);
        }
    }

    #[test]
    fn test_single_rank_needs_no_peers() {
        let results = LocalCluster::new(1)
            .with_timeout(Duration::from_millis(10))
            .run(|comm| {
                let gathered = comm.all_gather(7)?;
                let exchanged = comm.all_to_all(vec![vec![1, 2, 3]])?;
                Ok((gathered, exchanged))
            })
            .unwrap();
        assert_eq!(results, vec![(vec![7], vec![vec![1, 2, 3]])]);
    }

    #[test]
    fn test_failure_on_one_rank_aborts_cluster() {
        let err = LocalCluster::new(3)
            .run(|comm| {
                if comm.rank() == 1 {
                    return Err(PartitionError::InvalidConfig("boom".to_string()));
                }
                comm.barrier()?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, PartitionError::InvalidConfig(ref m) if m == "boom"), "{err}");
    }

    #[test]
    fn test_panic_on_one_rank_is_reported() {
        let err = LocalCluster::new(2)
            .run(|comm| {
                if comm.rank() == 0 {
                    panic!("rank 0 exploded");
                }
                comm.barrier()?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, PartitionError::RankPanicked { rank: 0 }), "{err}");
    }

    #[test]
    fn test_silent_peer_times_out() {
        let comms = LocalCluster::new(2)
            .with_timeout(Duration::from_millis(30))
            .communicators();
        let err = comms[0].all_gather(1u8).unwrap_err();
        assert!(matches!(err, CommError::Timeout { rank: 0, peer: 1, .. }), "{err}");
    }

    #[test]
    fn test_set_timeout_overrides_cluster_default() {
        let mut comms = LocalCluster::new(2).communicators();
        comms[0].set_timeout(Duration::from_millis(20));
        let started = Instant::now();
        let err = comms[0].all_gather(1u8).unwrap_err();
        assert!(matches!(err, CommError::Timeout { rank: 0, peer: 1, .. }), "{err}");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_wrong_payload_type_is_detected() {
        let results = LocalCluster::new(2)
            .with_timeout(Duration::from_millis(200))
            .run(|comm| {
                if comm.rank() == 0 {
                    comm.all_gather(1u32)?;
                } else {
                    comm.all_gather(1.0f64)?;
                }
                Ok(())
            });
        assert!(matches!(
            results,
            Err(PartitionError::Communication(CommError::UnexpectedPayload { .. }))
        ));
    }

    #[test]
    fn test_announced_all_to_all_delivers_payloads() {
        let received = LocalCluster::new(2)
            .run(|comm| {
                let outgoing = vec![vec![comm.rank(); 2], vec![comm.rank(); 3]];
                Ok(all_to_all_announced(&comm, outgoing)?)
            })
            .unwrap();
        assert_eq!(received[0], vec![vec![0, 0], vec![1, 1]]);
        assert_eq!(received[1], vec![vec![0, 0, 0], vec![1, 1, 1]]);
    }

    #[test]
    fn test_all_to_all_rejects_wrong_fan_out() {
        let comms = LocalCluster::new(2).communicators();
        let err = comms[0].all_to_all(vec![vec![1]]).unwrap_err();
        assert!(matches!(err, CommError::SizeMismatch { expected: 2, got: 1, .. }));
    }
}
