//! Fieldform stores
//!
//! The persistence layer of the form-filling core.
//!
//! # Core Concepts
//!
//! - [`InstanceStore`]: embedded repository of instance rows with edit-chain
//!   referential integrity and lifecycle timestamp rules
//! - [`SavepointStore`]: first-writer-wins registry of recovery snapshots
//! - [`FormDefinitionCache`]: two-level content-addressed cache of parsed
//!   form definitions
//! - [`fsutil`]: atomic file write and best-effort removal helpers shared by
//!   the stores and the session layer
//!
//! Every store mutation runs its invariant checks before any byte reaches
//! disk, and the backing documents are replaced atomically, so a crash at any
//! point leaves either the old state or the new state, never a torn one.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod cache;
mod error;
pub mod fsutil;
mod instances;
mod savepoints;

pub use cache::FormDefinitionCache;
pub use error::{CacheError, InstanceStoreError, IntegrityError, SavepointError};
pub use instances::{DeleteMode, InstanceStore};
pub use savepoints::SavepointStore;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
