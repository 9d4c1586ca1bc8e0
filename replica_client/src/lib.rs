//! `replica_client`
//!
//! Client-side reconciliation of replicated entities:
//! - Object pool of render surfaces (arena + generation handles)
//! - Interpolation model (instant, smoothed + extrapolated, animated)
//! - Entity registry driving the per-frame tick
//! - Distance culling of effects and tick diagnostics
//! - Mailbox for hosts that receive on another task

pub mod culling;
pub mod interp;
pub mod mailbox;
pub mod pool;
pub mod registry;

pub use registry::{EntityRegistry, EventOutcome, TickStats};
