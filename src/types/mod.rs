//! Value types shared across the crate.
//!
//! - [`status`] - [`TaskStatus`] and the probe's [`ObservedStatus`]
//! - [`params`] - [`TaskParams`] and the params-section [`TaskPayload`]
//! - [`snapshot`] - [`StatusSnapshot`] with its file-timestamp evidence

pub mod params;
pub mod snapshot;
pub mod status;

pub use params::*;
pub use snapshot::*;
pub use status::*;
