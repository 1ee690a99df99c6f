//! Form engine seam
//!
//! [`FormEngine`] is the boundary to the external form parser/runtime. The
//! pipeline never inspects definitions or answer trees; it moves them between
//! the engine, the cache, and the instance files.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

use crate::error::EngineError;

/// Answer-resolution strategy for merging a saved instance into a template
///
/// Passed explicitly into [`FormEngine::populate`] rather than installed as
/// process-wide engine state, so the caller controls exactly how long the
/// non-default strategy is in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnswerResolver {
    /// The engine's stock resolver
    #[default]
    Default,

    /// Resolver that understands answers referencing external datasets;
    /// required while restoring a saved draft
    ExternalDataAware,
}

/// Result of running full-form validation
///
/// Failure is data, not an error: callers branch on it and the pipeline
/// records `Invalid` status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// Every constraint and required answer passed
    Passed,

    /// At least one answer failed
    Failed {
        /// Reference to the failing question
        reference: String,
        /// Engine-provided failure text
        message: String,
    },
}

/// What the engine produced when a form was finalized
#[derive(Debug, Clone)]
pub struct FinalizeOutcome {
    /// Serialized submission payload to flush to the instance file
    pub payload: Vec<u8>,

    /// Entities extracted from the answers
    pub entities: Vec<crate::Entity>,

    /// Submission name from the form's metadata, if provided
    pub submission_name: Option<String>,

    /// Whether the whole form (not a subset) was submitted
    pub whole_form: bool,
}

/// A saved answer tree decoded from instance XML, with the header fields the
/// pipeline needs to decide whether it can be merged into a template
#[derive(Debug)]
pub struct SavedTree<T> {
    /// The decoded answer tree
    pub tree: T,

    /// Root element name of the saved document
    pub root_name: String,

    /// Multiplicity of the saved root; anything but 0 cannot be merged
    pub root_multiplicity: u32,

    /// Display language recorded in the saved session, if any
    pub language: Option<String>,
}

/// Boundary to the external form parser/runtime
///
/// # Type Parameters
/// - `Definition`: the parsed form definition; serde-bound so the
///   form-definition cache can persist it as an artifact
/// - `Tree`: the runtime answer tree for one session
///
/// Implementations may hold process-wide mutable state; the pipeline wraps
/// [`FormEngine::populate`] in an exclusive critical section accordingly.
pub trait FormEngine: Send + Sync {
    /// Parsed form definition
    type Definition: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    /// Runtime answer tree
    type Tree: Send;

    /// Parse a form definition from XML
    ///
    /// `media_dir` is the reference-resolution context for the form's media
    /// attachments; `last_saved_src` overrides the engine's notion of the
    /// last-saved source document when restoring.
    ///
    /// # Errors
    /// Returns [`EngineError::Parse`] when the XML is not a usable form.
    fn parse(
        &self,
        form_file: &Path,
        media_dir: &Path,
        last_saved_src: Option<&Path>,
    ) -> Result<Self::Definition, EngineError>;

    /// Build a fresh, unanswered tree from a definition
    fn template_tree(&self, definition: &Self::Definition) -> Self::Tree;

    /// Root element name a template tree from this definition will carry
    fn template_root_name(&self, definition: &Self::Definition) -> String;

    /// Decode a previously serialized answer tree
    ///
    /// # Errors
    /// Returns [`EngineError::Deserialize`] when the bytes are not a saved
    /// instance document.
    fn read_saved(&self, bytes: &[u8]) -> Result<SavedTree<Self::Tree>, EngineError>;

    /// Merge a saved tree's answers into a template tree
    ///
    /// # Errors
    /// Returns an engine error when an answer cannot be applied.
    fn populate(
        &self,
        definition: &Self::Definition,
        template: &mut Self::Tree,
        saved: Self::Tree,
        resolver: AnswerResolver,
    ) -> Result<(), EngineError>;

    /// Restore the display language on a tree
    fn set_language(&self, tree: &mut Self::Tree, language: &str);

    /// Serialize the current answers for flushing to the instance file
    ///
    /// # Errors
    /// Returns an engine error when the tree cannot be serialized.
    fn serialize_tree(&self, tree: &Self::Tree) -> Result<Vec<u8>, EngineError>;

    /// Run full-form validation
    fn validate(&self, tree: &Self::Tree, strict: bool) -> ValidationOutcome;

    /// Finalize the form: seal answers, extract entities, produce the
    /// submission payload
    ///
    /// # Errors
    /// Returns an engine error when finalization fails mid-way.
    fn finalize(&self, tree: &mut Self::Tree) -> Result<FinalizeOutcome, EngineError>;
}
