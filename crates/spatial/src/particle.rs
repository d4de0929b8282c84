//! Particle records exchanged between ranks.
//!
//! Particles are stored array-of-structs: the distributed sort and the ghost
//! exchange move whole records between ranks, and the physics callbacks see
//! one particle plus its neighbours at a time.

use crate::key::SpatialKey;

/// One SPH particle in `D` dimensions.
///
/// `id` is the global identity and survives migration between ranks. The
/// physics fields are opaque to the partitioning core; they are carried along
/// and handed to the physics callbacks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Particle<const D: usize> {
    /// Global particle identity
    pub id: u64,
    /// Position
    pub position: [f64; D],
    /// Velocity
    pub velocity: [f64; D],
    /// Acceleration
    pub acceleration: [f64; D],
    /// Smoothing length, i.e. the neighbour search radius (>= 0)
    pub smoothing_length: f64,
    /// Mass
    pub mass: f64,
    /// Density
    pub density: f64,
    /// Pressure
    pub pressure: f64,
    /// Sound speed
    pub sound_speed: f64,
    /// Specific internal energy
    pub internal_energy: f64,
    /// Time derivative of the internal energy
    pub dudt: f64,
}

impl<const D: usize> Particle<D> {
    /// Create a particle at rest. Every physics field other than mass and
    /// smoothing length starts at zero.
    pub fn new(id: u64, position: [f64; D], mass: f64, smoothing_length: f64) -> Self {
        Self {
            id,
            position,
            velocity: [0.0; D],
            acceleration: [0.0; D],
            smoothing_length,
            mass,
            density: 0.0,
            pressure: 0.0,
            sound_speed: 0.0,
            internal_energy: 0.0,
            dudt: 0.0,
        }
    }

    /// Builder-style velocity setter.
    pub fn with_velocity(mut self, velocity: [f64; D]) -> Self {
        self.velocity = velocity;
        self
    }

    /// Builder-style internal energy setter.
    pub fn with_internal_energy(mut self, internal_energy: f64) -> Self {
        self.internal_energy = internal_energy;
        self
    }

    /// Squared distance between the two particle positions.
    pub fn distance_sq(&self, other: &Self) -> f64 {
        distance_sq(&self.position, &other.position)
    }
}

/// Squared Euclidean distance between two points.
#[inline]
pub fn distance_sq<const D: usize>(a: &[f64; D], b: &[f64; D]) -> f64 {
    let mut d2 = 0.0;
    for axis in 0..D {
        let d = a[axis] - b[axis];
        d2 += d * d;
    }
    d2
}

/// Total order used by the distributed sort.
///
/// Equal keys are broken by the rank and local index the particle had when
/// the sort started, which makes the global order reproducible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SortOrdering {
    /// Morton key
    pub key: SpatialKey,
    /// Rank holding the particle before the sort
    pub origin_rank: u32,
    /// Index on `origin_rank` before the sort
    pub origin_index: u64,
}

/// A particle tagged with its key and origin, the unit of distributed sorting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyedParticle<const D: usize> {
    /// Sort position
    pub ordering: SortOrdering,
    /// Payload
    pub particle: Particle<D>,
}

impl<const D: usize> KeyedParticle<D> {
    /// Tag `particle` with its key and origin.
    pub fn new(key: SpatialKey, origin_rank: u32, origin_index: u64, particle: Particle<D>) -> Self {
        Self {
            ordering: SortOrdering {
                key,
                origin_rank,
                origin_index,
            },
            particle,
        }
    }

    /// Morton key of the particle.
    pub fn key(&self) -> SpatialKey {
        self.ordering.key
    }
}

/// Whether a particle seen by a rank is its own or a read-only remote copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Locality {
    /// Owned by this rank; physics updates apply to it
    Owned,
    /// Shadow copy of a particle owned by another rank
    Ghost,
}

/// Read-only copy of a particle owned by `owner_rank`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ghost<const D: usize> {
    /// Rank that owns the original particle
    pub owner_rank: usize,
    /// Snapshot of the particle at exchange time
    pub particle: Particle<D>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_particle_is_at_rest() {
        let p = Particle::new(7, [1.0, 2.0, 3.0], 0.5, 0.1);
        assert_eq!(p.id, 7);
        assert_eq!(p.velocity, [0.0; 3]);
        assert_eq!(p.density, 0.0);
        assert_eq!(p.smoothing_length, 0.1);
    }

    #[test]
    fn ordering_breaks_ties_by_origin() {
        let p = Particle::new(0, [0.0; 2], 1.0, 0.1);
        let key = SpatialKey::from_raw(42);
        let a = KeyedParticle::new(key, 0, 5, p);
        let b = KeyedParticle::new(key, 1, 0, p);
        let c = KeyedParticle::new(key, 1, 3, p);
        let d = KeyedParticle::new(SpatialKey::from_raw(41), 3, 9, p);
        let mut all = [c, a, d, b];
        all.sort_by_key(|k| k.ordering);
        let origins: Vec<_> = all.iter().map(|k| (k.ordering.origin_rank, k.ordering.origin_index)).collect();
        assert_eq!(origins, vec![(3, 9), (0, 5), (1, 0), (1, 3)]);
    }

    #[test]
    fn distance_between_particles() {
        let a = Particle::new(0, [0.0, 0.0], 1.0, 0.1);
        let b = Particle::new(1, [3.0, 4.0], 1.0, 0.1);
        assert!((a.distance_sq(&b) - 25.0).abs() < 1e-12);
    }
}
