//! Spatial building blocks for distributed SPH.
//!
//! This crate holds everything a single rank needs to reason about space,
//! independent of how ranks talk to each other.
//!
//! # Modules
//! - [`bbox`] -- Axis-aligned bounding boxes.
//! - [`key`] -- Morton (Z-order) spatial keys.
//! - [`particle`] -- Particle records, sort ordering and ghost copies.
//! - [`tree`] -- Arena-backed 2^D-ary tree over particle positions.
//! - [`neighbor`] -- Radius and box queries against a tree.
//! - [`sph`] -- Cubic-spline kernel and density summation callbacks.
//! - [`eos`] -- Ideal-gas equation of state.

#![warn(missing_docs)]

pub mod bbox;
pub mod eos;
pub mod key;
pub mod neighbor;
pub mod particle;
pub mod sph;
pub mod tree;

pub use bbox::BoundingBox;
pub use key::{SpatialKey, KEY_BITS};
pub use particle::{distance_sq, Ghost, KeyedParticle, Locality, Particle, SortOrdering};
pub use sph::{compute_density_pressure_soundspeed, cubic_spline, density_summation};
pub use tree::{NodeId, Tree, TreeNode, TreeParams};
