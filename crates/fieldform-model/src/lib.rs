//! Fieldform value types
//!
//! Typed records for the form-filling persistence core.
//!
//! # Core Concepts
//!
//! - [`Instance`]: an immutable record of one form-filling session, built and
//!   rebuilt through [`InstanceBuilder`]
//! - [`InstanceStatus`]: lifecycle status with a well-defined finalized set
//! - [`Savepoint`]: pointer to a recovery snapshot newer than the last flush
//! - [`FormRecord`]: reference to an externally owned form definition
//! - [`Clock`]: injected time source so every timestamp is deterministic
//!   under test

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod clock;
mod form;
mod instance;
mod savepoint;

pub use clock::{Clock, SystemClock};
pub use form::FormRecord;
pub use instance::{Instance, InstanceBuilder, InstanceStatus};
pub use savepoint::Savepoint;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
