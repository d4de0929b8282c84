//! Distributed partitioning for SPH
//!
//! This crate spreads particles over a set of ranks and gives every rank the
//! neighbourhood information its physics needs:
//! - [`comm`] -- Collective message passing and the in-process [`LocalCluster`].
//! - [`range`] -- Global bounding box, maximum smoothing length and count.
//! - [`sort`] -- Distributed sample sort along the Morton curve.
//! - [`exchange`] -- Branch descriptors and ghost particle exchange.
//! - [`body_system`] -- The per-rank driver: `update_iteration`,
//!   `update_neighbors`, `apply_in_smoothing_length` and `apply_all`.
//! - [`config`] -- JSON configuration with validation.
//!
//! # Example
//! ```no_run
//! use partition::{BodySystem, LocalCluster, PartitionConfig};
//! use spatial::Particle;
//!
//! let densities = LocalCluster::new(4).run(|comm| {
//!     let particles: Vec<Particle<3>> = Vec::new(); // this rank's share
//!     let mut system = BodySystem::new(comm, PartitionConfig::default(), particles)?;
//!     system.update_iteration()?;
//!     system.apply_in_smoothing_length(spatial::compute_density_pressure_soundspeed);
//!     Ok(system.into_particles())
//! })?;
//! # Ok::<(), partition::PartitionError>(())
//! ```

#![warn(missing_docs)]

pub mod body_system;
pub mod comm;
pub mod config;
pub mod error;
pub mod exchange;
pub mod range;
pub mod sort;

pub use body_system::{BodySystem, IterationReport};
pub use comm::{Communicator, LocalCluster, LocalCommunicator};
pub use config::PartitionConfig;
pub use error::{CommError, PartitionError};
pub use exchange::{BranchDescriptor, ExchangeReport, RankDescriptor};
pub use range::GlobalRange;
pub use sort::SortOutcome;
