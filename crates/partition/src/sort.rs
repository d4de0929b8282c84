//! Distributed sort of keyed particles.
//!
//! Sample sort with regular sampling:
//! 1. sort locally by `(key, origin_rank, origin_index)`;
//! 2. pick evenly spaced samples on every rank, gather them and choose
//!    `ranks - 1` splitters at regular quantiles;
//! 3. cut the local list at the splitters, announce bucket sizes, then ship
//!    the buckets;
//! 4. merge the received (already sorted) buckets.
//!
//! After the sort rank `i` holds a contiguous slice of the global order and
//! every key on rank `i` is `<=` every key on rank `i + 1`.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use spatial::{KeyedParticle, Particle, SortOrdering, SpatialKey};

use crate::comm::{all_to_all_announced, Communicator};
use crate::config::PartitionConfig;
use crate::error::CommError;
use crate::range::GlobalRange;

/// Load statistics of one sort, as seen by one rank.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SortOutcome {
    /// Particles held after the sort
    pub local_count: usize,
    /// Particles on all ranks
    pub total: u64,
    /// Ideal share, `total / ranks`
    pub target: f64,
    /// `|local_count - target| / target`, zero when there is nothing to sort
    pub imbalance: f64,
    /// Particles shipped to other ranks
    pub sent: usize,
    /// Particles received from other ranks
    pub received: usize,
}

impl SortOutcome {
    fn new(local_count: usize, total: u64, ranks: usize, sent: usize, received: usize) -> Self {
        let target = total as f64 / ranks.max(1) as f64;
        let imbalance = if target > 0.0 {
            (local_count as f64 - target).abs() / target
        } else {
            0.0
        };
        Self {
            local_count,
            total,
            target,
            imbalance,
            sent,
            received,
        }
    }
}

/// Tag every particle with its key and its current `(rank, index)` origin.
pub fn assign_keys<const D: usize>(
    rank: usize,
    particles: Vec<Particle<D>>,
    range: &GlobalRange<D>,
    depth: u32,
) -> Vec<KeyedParticle<D>> {
    particles
        .into_iter()
        .enumerate()
        .map(|(index, p)| {
            let key = SpatialKey::encode(&p.position, &range.bbox, depth);
            KeyedParticle::new(key, rank as u32, index as u64, p)
        })
        .collect()
}

/// Collective: redistribute `keyed` so that the concatenation of every
/// rank's result, in rank order, is globally sorted.
pub fn distributed_sort<C: Communicator, const D: usize>(
    comm: &C,
    mut keyed: Vec<KeyedParticle<D>>,
    config: &PartitionConfig,
) -> Result<(Vec<KeyedParticle<D>>, SortOutcome), CommError> {
    keyed.sort_unstable_by_key(|k| k.ordering);

    let ranks = comm.size();
    if ranks == 1 {
        let outcome = SortOutcome::new(keyed.len(), keyed.len() as u64, 1, 0, 0);
        return Ok((keyed, outcome));
    }

    let counts = comm.all_gather(keyed.len() as u64)?;
    let total: u64 = counts.iter().sum();
    if total == 0 {
        tracing::debug!("Rank {}: nothing to sort", comm.rank());
        return Ok((keyed, SortOutcome::new(0, 0, ranks, 0, 0)));
    }

    let stride = (total / (ranks as u64 * config.sample_oversampling as u64)).max(1) as usize;
    let samples: Vec<SortOrdering> = (stride / 2..keyed.len())
        .step_by(stride)
        .map(|i| keyed[i].ordering)
        .collect();
    let mut all_samples: Vec<SortOrdering> = comm.all_gather(samples)?.into_iter().flatten().collect();
    all_samples.sort_unstable();
    let splitters = choose_splitters(&all_samples, ranks);
    tracing::debug!(
        "Rank {}: {} samples (stride {}), {} splitters",
        comm.rank(),
        all_samples.len(),
        stride,
        splitters.len()
    );

    let buckets = cut_buckets(keyed, &splitters, ranks);
    let sent = buckets
        .iter()
        .enumerate()
        .filter(|(dest, _)| *dest != comm.rank())
        .map(|(_, b)| b.len())
        .sum();

    let received_buckets = all_to_all_announced(comm, buckets)?;
    let received = received_buckets
        .iter()
        .enumerate()
        .filter(|(src, _)| *src != comm.rank())
        .map(|(_, b)| b.len())
        .sum();

    let sorted = merge_sorted_runs(received_buckets);
    let outcome = SortOutcome::new(sorted.len(), total, ranks, sent, received);
    if outcome.imbalance > config.load_balance_slack {
        tracing::warn!(
            "Rank {}: load imbalance {:.1}% ({} particles, target {:.1})",
            comm.rank(),
            outcome.imbalance * 100.0,
            outcome.local_count,
            outcome.target
        );
    }
    tracing::debug!(
        "Rank {}: sorted {} particles (sent {}, received {})",
        comm.rank(),
        sorted.len(),
        sent,
        received
    );
    Ok((sorted, outcome))
}

/// `ranks - 1` splitters at regular quantiles of the sorted sample.
fn choose_splitters(samples: &[SortOrdering], ranks: usize) -> Vec<SortOrdering> {
    if samples.is_empty() {
        return Vec::new();
    }
    (1..ranks).map(|i| samples[i * samples.len() / ranks]).collect()
}

/// Split a sorted list into one bucket per rank. Bucket `r` holds the
/// orderings in `[splitters[r - 1], splitters[r])`.
fn cut_buckets<const D: usize>(
    mut sorted: Vec<KeyedParticle<D>>,
    splitters: &[SortOrdering],
    ranks: usize,
) -> Vec<Vec<KeyedParticle<D>>> {
    let mut buckets = Vec::with_capacity(ranks);
    let mut bounds: Vec<usize> = splitters
        .iter()
        .map(|s| sorted.partition_point(|k| k.ordering < *s))
        .collect();
    bounds.resize(ranks - 1, sorted.len());
    for &bound in bounds.iter().rev() {
        buckets.push(sorted.split_off(bound));
    }
    buckets.push(sorted);
    buckets.reverse();
    buckets
}

/// K-way merge of individually sorted runs.
fn merge_sorted_runs<const D: usize>(runs: Vec<Vec<KeyedParticle<D>>>) -> Vec<KeyedParticle<D>> {
    let total = runs.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(total);
    let mut runs: Vec<_> = runs.into_iter().map(|r| r.into_iter().peekable()).collect();
    let mut heap = BinaryHeap::with_capacity(runs.len());
    for (i, run) in runs.iter_mut().enumerate() {
        if let Some(k) = run.peek() {
            heap.push(Reverse((k.ordering, i)));
        }
    }
    while let Some(Reverse((_, i))) = heap.pop() {
        if let Some(k) = runs[i].next() {
            out.push(k);
        }
        if let Some(k) = runs[i].peek() {
            heap.push(Reverse((k.ordering, i)));
        }
    }
    out
}
