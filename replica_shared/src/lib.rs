//! `replica_shared`
//!
//! Shared libraries used by both the authoritative feed and the client.
//!
//! Design goals:
//! - One set of significance epsilons for both directions.
//! - Strongly typed snapshots past the wire boundary.
//! - Traits for the render side so the core stays headless.
//! - No `unsafe`.

pub mod config;
pub mod entity;
pub mod event;
pub mod math;
pub mod net;
pub mod render;
pub mod resources;
pub mod significance;
pub mod snapshot;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::entity::*;
    pub use crate::event::*;
    pub use crate::math::*;
    pub use crate::net::*;
    pub use crate::render::*;
    pub use crate::significance::*;
    pub use crate::snapshot::*;
}
