//! Per-rank driver surface.
//!
//! A [`BodySystem`] owns the particles of one rank and runs the partitioning
//! pipeline on demand:
//!
//! ```text
//! update_iteration:  range -> keys -> sort -> owned tree -> exchange -> merged tree
//! update_neighbors:  max h -> owned tree -> exchange -> merged tree
//! ```
//!
//! Between updates the physics layer reads neighbourhoods through
//! [`BodySystem::apply_in_smoothing_length`] and mutates owned particles
//! through [`BodySystem::apply_all`].

use rayon::prelude::*;

use spatial::{Ghost, Locality, Particle, SpatialKey, Tree};

use crate::comm::Communicator;
use crate::config::PartitionConfig;
use crate::error::PartitionError;
use crate::exchange::{exchange_ghosts, ExchangeReport};
use crate::range::{reduce_count, reduce_max_smoothing_length, GlobalRange};
use crate::sort::{assign_keys, distributed_sort, SortOutcome};

/// Summary of one [`BodySystem::update_iteration`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationReport<const D: usize> {
    /// Number of completed iterations, this one included
    pub iteration: u64,
    /// Global bounds used for the keys
    pub range: GlobalRange<D>,
    /// Load statistics of the sort
    pub sort: SortOutcome,
    /// Ghost exchange counters
    pub exchange: ExchangeReport,
}

/// Particles of one rank plus the structures needed to find their
/// neighbours.
#[derive(Debug)]
pub struct BodySystem<C: Communicator, const D: usize> {
    comm: C,
    config: PartitionConfig,
    owned: Vec<Particle<D>>,
    keys: Vec<SpatialKey>,
    ghosts: Vec<Ghost<D>>,
    owned_tree: Tree<D>,
    tree: Tree<D>,
    // Positions indexed like `tree`: owned first, then ghosts
    positions: Vec<[f64; D]>,
    range: Option<GlobalRange<D>>,
    halo_radius: f64,
    iteration: u64,
}

impl<C: Communicator, const D: usize> BodySystem<C, D> {
    /// Take ownership of this rank's initial particles.
    ///
    /// Nothing is communicated until the first update. Every later wait for
    /// a peer is bounded by `config.comm_timeout_ms`.
    pub fn new(mut comm: C, config: PartitionConfig, particles: Vec<Particle<D>>) -> Result<Self, PartitionError> {
        config.validate_for_dimension(D)?;
        comm.set_timeout(config.comm_timeout());
        let params = config.tree_params();
        Ok(Self {
            comm,
            config,
            owned: particles,
            keys: Vec::new(),
            ghosts: Vec::new(),
            owned_tree: Tree::new(params),
            tree: Tree::new(params),
            positions: Vec::new(),
            range: None,
            halo_radius: 0.0,
            iteration: 0,
        })
    }

    /// Collective: recompute the global range, re-key and redistribute every
    /// particle, then rebuild trees and ghosts.
    pub fn update_iteration(&mut self) -> Result<IterationReport<D>, PartitionError> {
        let rank = self.comm.rank();
        let range = GlobalRange::reduce(&self.comm, &self.owned, self.config.boundary_margin_factor)?;

        let particles = std::mem::take(&mut self.owned);
        self.ghosts.clear();
        let keyed = assign_keys(rank, particles, &range, self.config.max_depth);
        let (sorted, sort) = distributed_sort(&self.comm, keyed, &self.config)?;
        self.keys = sorted.iter().map(|k| k.key()).collect();
        self.owned = sorted.into_iter().map(|k| k.particle).collect();
        self.range = Some(range);

        let exchange = self.refresh(range.max_smoothing_length)?;
        self.iteration += 1;

        tracing::info!(
            "Rank {} iteration {}: {} owned, {} ghosts, imbalance {:.1}%",
            rank,
            self.iteration,
            self.owned.len(),
            self.ghosts.len(),
            sort.imbalance * 100.0
        );
        Ok(IterationReport {
            iteration: self.iteration,
            range,
            sort,
            exchange,
        })
    }

    /// Collective: refresh ghosts and trees without moving ownership.
    ///
    /// Call after the physics changed positions, smoothing lengths or any
    /// field that neighbours read. Particles keep their rank and order.
    pub fn update_neighbors(&mut self) -> Result<ExchangeReport, PartitionError> {
        let halo_radius = reduce_max_smoothing_length(&self.comm, &self.owned)?;
        let report = self.refresh(halo_radius)?;
        tracing::debug!(
            "Rank {}: neighbours refreshed, {} ghosts",
            self.comm.rank(),
            self.ghosts.len()
        );
        Ok(report)
    }

    fn refresh(&mut self, halo_radius: f64) -> Result<ExchangeReport, PartitionError> {
        self.halo_radius = halo_radius;

        let owned_positions: Vec<[f64; D]> = self.owned.iter().map(|p| p.position).collect();
        let owned_radii: Vec<f64> = self.owned.iter().map(|p| p.smoothing_length).collect();
        self.owned_tree.rebuild(&owned_positions, &owned_radii);

        let (ghosts, report) = exchange_ghosts(
            &self.comm,
            &self.owned,
            &self.owned_tree,
            self.config.branch_depth,
            halo_radius,
        )?;
        self.ghosts = ghosts;

        let mut positions = owned_positions;
        let mut radii = owned_radii;
        positions.extend(self.ghosts.iter().map(|g| g.particle.position));
        radii.extend(self.ghosts.iter().map(|g| g.particle.smoothing_length));
        self.tree.rebuild(&positions, &radii);
        self.positions = positions;
        Ok(report)
    }

    /// Run `f` on every owned particle with its neighbours.
    ///
    /// The neighbours of a particle are all owned and ghost particles within
    /// its smoothing length, itself included, sorted by id. Every call of `f`
    /// sees the state from before this method was entered; updates are
    /// written back once all particles are done.
    pub fn apply_in_smoothing_length<F>(&mut self, f: F)
    where
        F: Fn(&mut Particle<D>, &[&Particle<D>]) + Sync,
    {
        let owned = &self.owned;
        let ghosts = &self.ghosts;
        let tree = &self.tree;
        let positions = &self.positions;
        let updated: Vec<Particle<D>> = owned
            .par_iter()
            .map(|p| {
                let mut neighbors: Vec<&Particle<D>> = Vec::new();
                tree.for_each_in_radius(&p.position, p.smoothing_length, positions, |i| {
                    neighbors.push(lookup(owned, ghosts, i));
                });
                neighbors.sort_unstable_by_key(|n| n.id);
                let mut next = *p;
                f(&mut next, &neighbors);
                next
            })
            .collect();
        self.owned = updated;
    }

    /// Run `f` on every owned particle.
    pub fn apply_all<F>(&mut self, f: F)
    where
        F: Fn(&mut Particle<D>) + Sync + Send,
    {
        self.owned.par_iter_mut().for_each(|p| f(p));
    }

    /// Owned and ghost particles within `radius` of `position`, in index
    /// order (owned first).
    pub fn neighbors_within(&self, position: &[f64; D], radius: f64) -> Vec<&Particle<D>> {
        self.tree
            .within_radius(position, radius, &self.positions)
            .into_iter()
            .map(|i| self.particle(i))
            .collect()
    }

    /// Collective: number of particles on all ranks.
    pub fn global_count(&self) -> Result<u64, PartitionError> {
        Ok(reduce_count(&self.comm, self.owned.len())?)
    }

    /// Particle at `index` of the merged tree (owned first, then ghosts).
    pub fn particle(&self, index: usize) -> &Particle<D> {
        lookup(&self.owned, &self.ghosts, index)
    }

    /// Whether `index` of the merged tree is owned or a ghost.
    pub fn locality(&self, index: usize) -> Locality {
        if index < self.owned.len() {
            Locality::Owned
        } else {
            Locality::Ghost
        }
    }

    /// Particles owned by this rank, in key order after an iteration update.
    pub fn owned(&self) -> &[Particle<D>] {
        &self.owned
    }

    /// Keys of the owned particles from the last iteration update.
    pub fn keys(&self) -> &[SpatialKey] {
        &self.keys
    }

    /// Read-only copies of neighbouring ranks' particles.
    pub fn ghosts(&self) -> &[Ghost<D>] {
        &self.ghosts
    }

    /// Tree over owned particles only.
    pub fn owned_tree(&self) -> &Tree<D> {
        &self.owned_tree
    }

    /// Tree over owned and ghost particles.
    pub fn tree(&self) -> &Tree<D> {
        &self.tree
    }

    /// Global range of the last iteration update.
    pub fn range(&self) -> Option<&GlobalRange<D>> {
        self.range.as_ref()
    }

    /// Halo radius used by the last exchange.
    pub fn halo_radius(&self) -> f64 {
        self.halo_radius
    }

    /// Completed iteration updates.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// This rank.
    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    /// Number of ranks.
    pub fn ranks(&self) -> usize {
        self.comm.size()
    }

    /// Configuration in use.
    pub fn config(&self) -> &PartitionConfig {
        &self.config
    }

    /// Communicator of this rank.
    pub fn communicator(&self) -> &C {
        &self.comm
    }

    /// Give the owned particles back, e.g. for output.
    pub fn into_particles(self) -> Vec<Particle<D>> {
        self.owned
    }
}

fn lookup<'a, const D: usize>(owned: &'a [Particle<D>], ghosts: &'a [Ghost<D>], index: usize) -> &'a Particle<D> {
    match index.checked_sub(owned.len()) {
        None => &owned[index],
        Some(g) => &ghosts[g].particle,
    }
}
