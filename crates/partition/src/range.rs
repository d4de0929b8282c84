//! Global range reduction.
//!
//! Every rank contributes the bounding box, largest smoothing length and
//! count of its particles; every rank receives the same union. The union box
//! is padded so particles on its faces still get keys strictly inside it.

use spatial::{BoundingBox, Particle};

use crate::comm::Communicator;
use crate::error::CommError;

// Padding for boxes whose extent is zero, relative to the coordinate scale
const MIN_MARGIN: f64 = 1.0e-9;

/// Bounds shared by all ranks for one iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlobalRange<const D: usize> {
    /// Padded union of every particle position
    pub bbox: BoundingBox<D>,
    /// Largest smoothing length of any particle
    pub max_smoothing_length: f64,
    /// Number of particles on all ranks
    pub count: u64,
}

#[derive(Debug, Clone, Copy)]
struct LocalSummary<const D: usize> {
    bbox: BoundingBox<D>,
    max_smoothing_length: f64,
    count: u64,
}

impl<const D: usize> LocalSummary<D> {
    fn of(particles: &[Particle<D>]) -> Self {
        Self {
            bbox: BoundingBox::from_points(particles.iter().map(|p| &p.position)),
            max_smoothing_length: local_max_smoothing_length(particles),
            count: particles.len() as u64,
        }
    }
}

/// Largest smoothing length among `particles`, zero when empty.
pub fn local_max_smoothing_length<const D: usize>(particles: &[Particle<D>]) -> f64 {
    particles
        .iter()
        .map(|p| p.smoothing_length)
        .fold(0.0, f64::max)
}

impl<const D: usize> GlobalRange<D> {
    /// Collective: reduce the local particle sets of every rank.
    ///
    /// `margin_factor` pads the union by that fraction of its largest extent.
    pub fn reduce<C: Communicator>(
        comm: &C,
        particles: &[Particle<D>],
        margin_factor: f64,
    ) -> Result<Self, CommError> {
        if particles.is_empty() {
            tracing::warn!("Rank {} holds no particles", comm.rank());
        }
        let summaries = comm.all_gather(LocalSummary::of(particles))?;
        let range = Self::combine(&summaries, margin_factor);
        tracing::debug!(
            "Rank {}: global range {:?}..{:?}, max h {}, {} particles",
            comm.rank(),
            range.bbox.min,
            range.bbox.max,
            range.max_smoothing_length,
            range.count
        );
        Ok(range)
    }

    fn combine(summaries: &[LocalSummary<D>], margin_factor: f64) -> Self {
        let mut bbox = BoundingBox::empty();
        let mut max_smoothing_length: f64 = 0.0;
        let mut count = 0;
        for summary in summaries {
            bbox = bbox.union(&summary.bbox);
            max_smoothing_length = max_smoothing_length.max(summary.max_smoothing_length);
            count += summary.count;
        }
        if bbox.is_empty() {
            tracing::warn!("Global particle set is empty");
            bbox = BoundingBox::new([0.0; D], [0.0; D]);
        }
        let scale = bbox
            .min
            .iter()
            .chain(bbox.max.iter())
            .fold(1.0_f64, |acc, x| acc.max(x.abs()));
        let margin = (margin_factor * bbox.max_extent()).max(MIN_MARGIN * scale);
        Self {
            bbox: bbox.expanded(margin),
            max_smoothing_length,
            count,
        }
    }

    /// `true` when no rank holds a particle.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Collective: global maximum smoothing length.
pub fn reduce_max_smoothing_length<C: Communicator, const D: usize>(
    comm: &C,
    particles: &[Particle<D>],
) -> Result<f64, CommError> {
    comm.all_reduce(local_max_smoothing_length(particles), f64::max)
}

/// Collective: total number of particles on all ranks.
pub fn reduce_count<C: Communicator>(comm: &C, local: usize) -> Result<u64, CommError> {
    comm.all_reduce(local as u64, |a, b| a + b)
}
