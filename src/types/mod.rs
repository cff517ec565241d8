//! Type definitions shared across the allocator.

/// Error types and the crate-wide `Result` alias.
pub mod error;

/// Small identifier newtypes (`OwnerId`, `ObjectId`).
pub mod ids;

/// Caller-supplied allocation flags.
pub mod flags;

pub use error::{AllocError, Result};
pub use flags::AllocFlags;
pub use ids::{ObjectId, OwnerId};
