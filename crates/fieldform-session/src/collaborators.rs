//! Narrow collaborator contracts
//!
//! The surrounding application supplies these; the core consumes them and
//! nothing more. There is no observation or notification surface; callers
//! poll the stores through plain queries.

use fieldform_model::FormRecord;

use crate::error::EntityError;

/// Source of form definitions
///
/// The forms repository itself (downloads, versioning, media sync) is out of
/// scope; the pipeline only resolves `(form_id, version)` to a record.
pub trait FormsProvider: Send + Sync {
    /// Resolve a form by identifier and exact version
    fn get_by_id_and_version(&self, form_id: &str, version: Option<&str>) -> Option<FormRecord>;
}

/// A structured record extracted from form answers at finalize time
///
/// Persisted independently of the instance so later sessions across forms can
/// reuse it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    /// Dataset (entity list) the entity belongs to
    pub dataset: String,

    /// Stable entity identifier within the dataset
    pub id: String,

    /// Human-readable label, if the form produced one
    pub label: Option<String>,

    /// Property name/value pairs
    pub properties: Vec<(String, String)>,
}

/// Sink for entities produced during finalization
pub trait EntitiesSink: Send + Sync {
    /// Persist one extracted entity
    ///
    /// # Errors
    /// Returns [`EntityError`] when the entity cannot be stored; finalize
    /// propagates it.
    fn save(&self, entity: &Entity) -> Result<(), EntityError>;
}
