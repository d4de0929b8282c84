//! Branch and ghost exchange.
//!
//! After the sort every rank owns a compact slice of the Z-curve, but the
//! neighbours of particles near the edge of that slice live on other ranks.
//! Each rank publishes the tight boxes of its top-level tree nodes
//! (branches); every rank then copies to each peer the particles lying within
//! the halo radius of one of that peer's branches. Ownership never changes.

use spatial::{BoundingBox, Ghost, Particle, Tree};

use crate::comm::{all_to_all_announced, Communicator};
use crate::error::CommError;

/// Compact description of one top-level tree node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BranchDescriptor<const D: usize> {
    /// Tight box around the particles of the branch
    pub extent: BoundingBox<D>,
    /// Number of particles below the branch
    pub count: usize,
    /// Largest smoothing length below the branch
    pub max_smoothing_length: f64,
}

/// Everything a rank tells its peers about the space it owns.
#[derive(Debug, Clone, PartialEq)]
pub struct RankDescriptor<const D: usize> {
    /// Publishing rank
    pub rank: usize,
    /// Tight box around every owned particle (empty when none)
    pub region: BoundingBox<D>,
    /// Top-level branches, covering every owned particle once
    pub branches: Vec<BranchDescriptor<D>>,
}

impl<const D: usize> RankDescriptor<D> {
    /// Describe the owned tree of `rank`.
    pub fn describe(rank: usize, tree: &Tree<D>, branch_depth: u32) -> Self {
        let branches = tree
            .branches(branch_depth)
            .into_iter()
            .map(|id| {
                let node = tree.node(id);
                BranchDescriptor {
                    extent: node.extent,
                    count: node.count,
                    max_smoothing_length: node.max_smoothing_length,
                }
            })
            .collect();
        Self {
            rank,
            region: tree.extent(),
            branches,
        }
    }

    /// `true` when the rank owns no particle.
    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    /// `true` if some branch extent lies within `radius` of `bbox`.
    pub fn is_near_box(&self, bbox: &BoundingBox<D>, radius: f64) -> bool {
        let radius_sq = radius * radius;
        if self.region.distance_sq_to_box(bbox) > radius_sq {
            return false;
        }
        self.branches
            .iter()
            .any(|b| b.extent.distance_sq_to_box(bbox) <= radius_sq)
    }

    /// `true` if some branch extent lies within `radius` of `point`.
    pub fn is_near_point(&self, point: &[f64; D], radius: f64) -> bool {
        let radius_sq = radius * radius;
        self.branches
            .iter()
            .any(|b| b.extent.distance_sq_to_point(point) <= radius_sq)
    }
}

/// Counters of one exchange, as seen by one rank.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExchangeReport {
    /// Ghost copies shipped to other ranks
    pub sent: usize,
    /// Ghost copies received from other ranks
    pub received: usize,
    /// Other ranks this rank sent to or received from
    pub neighbor_ranks: usize,
}

/// Indices of owned particles within `halo_radius` of `peer`'s branches,
/// ascending.
///
/// `tree` must be built over `owned`; the descent starts at this rank's own
/// branches and prunes every node whose extent is too far from the peer.
///
/// Distance is measured to the tight extents of the peer's branches, not to
/// the part of key space the peer owns: a particle close to the split plane
/// but farther than `halo_radius` from every peer particle stays home, since
/// no peer particle can reach it.
pub fn select_ghosts<const D: usize>(
    owned: &[Particle<D>],
    tree: &Tree<D>,
    branch_depth: u32,
    peer: &RankDescriptor<D>,
    halo_radius: f64,
) -> Vec<usize> {
    let mut selected = Vec::new();
    if peer.is_empty() {
        return selected;
    }
    let mut stack = tree.branches(branch_depth);
    while let Some(id) = stack.pop() {
        let node = tree.node(id);
        if !peer.is_near_box(&node.extent, halo_radius) {
            continue;
        }
        if node.is_leaf() {
            selected.extend(
                node.entities()
                    .iter()
                    .map(|&i| i as usize)
                    .filter(|&i| peer.is_near_point(&owned[i].position, halo_radius)),
            );
        } else {
            stack.extend_from_slice(node.children());
        }
    }
    selected.sort_unstable();
    selected
}

/// Collective: send every peer the owned particles it may need as
/// neighbours and receive the ghosts this rank needs.
///
/// Ghosts come back ordered by owner rank, then by index on the owner (key
/// order right after a sort).
pub fn exchange_ghosts<C: Communicator, const D: usize>(
    comm: &C,
    owned: &[Particle<D>],
    tree: &Tree<D>,
    branch_depth: u32,
    halo_radius: f64,
) -> Result<(Vec<Ghost<D>>, ExchangeReport), CommError> {
    if comm.size() == 1 {
        return Ok((Vec::new(), ExchangeReport::default()));
    }

    let me = comm.rank();
    let descriptors = comm.all_gather(RankDescriptor::describe(me, tree, branch_depth))?;

    let outgoing: Vec<Vec<Particle<D>>> = descriptors
        .iter()
        .map(|peer| {
            if peer.rank == me {
                return Vec::new();
            }
            select_ghosts(owned, tree, branch_depth, peer, halo_radius)
                .into_iter()
                .map(|i| owned[i])
                .collect()
        })
        .collect();

    let sent: usize = outgoing.iter().map(Vec::len).sum();
    let sends_to: Vec<bool> = outgoing.iter().map(|v| !v.is_empty()).collect();

    let incoming = all_to_all_announced(comm, outgoing)?;

    let neighbor_ranks = incoming
        .iter()
        .zip(&sends_to)
        .enumerate()
        .filter(|(peer, (received, sends))| *peer != me && (**sends || !received.is_empty()))
        .count();
    let ghosts: Vec<Ghost<D>> = incoming
        .into_iter()
        .enumerate()
        .flat_map(|(owner_rank, particles)| {
            particles
                .into_iter()
                .map(move |particle| Ghost { owner_rank, particle })
        })
        .collect();

    let report = ExchangeReport {
        sent,
        received: ghosts.len(),
        neighbor_ranks,
    };
    tracing::debug!(
        "Rank {}: ghost exchange sent {}, received {}, {} neighbouring ranks",
        me,
        report.sent,
        report.received,
        report.neighbor_ranks
    );
    Ok((ghosts, report))
}
