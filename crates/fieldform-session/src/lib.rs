//! Fieldform session pipeline
//!
//! Orchestrates one form-filling session end to end: obtain a parsed form
//! definition (through the cache or the engine), create or restore a working
//! copy, and run the draft-save and finalize operations against the stores.
//!
//! # Core Concepts
//!
//! - [`SessionPipeline`]: the orchestrator; one per app process
//! - [`FormSession`]: a live session bound to an instance file
//! - [`FormEngine`]: seam to the external form parser/runtime
//! - [`FormsProvider`] / [`EntitiesSink`]: narrow collaborator contracts
//! - [`AnswerResolver`]: explicit answer-resolution strategy passed into the
//!   merge call instead of installed as process-wide engine state
//!
//! The pipeline guarantees that no partial or inconsistent row is ever
//! committed; user-visible failure behavior belongs to the caller.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod collaborators;
mod engine;
mod error;
mod pipeline;
mod session;

pub use collaborators::{EntitiesSink, Entity, FormsProvider};
pub use engine::{AnswerResolver, FinalizeOutcome, FormEngine, SavedTree, ValidationOutcome};
pub use error::{EngineError, EntityError, PipelineError};
pub use pipeline::{FormSource, PipelineConfig, SessionPipeline};
pub use session::FormSession;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
