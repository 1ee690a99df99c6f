//! Instance records
//!
//! An [`Instance`] is the persisted record of one form-filling session. It is
//! an immutable value type: every change goes through [`InstanceBuilder`]
//! (create) or [`Instance::to_builder`] (copy with changed fields), and the
//! store hands back a fresh value with the assigned fields filled in.
//!
//! # Invariants
//! - `db_id` is assigned by the store on first save and never changes
//! - `edit_of` and `edit_number` are both absent or both present
//! - `finalization_date`, once set, is never overwritten

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Lifecycle status of an [`Instance`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Freshly created edit copy, not yet saved with answers
    NewEdit,

    /// Draft in progress; the default status on creation
    Incomplete,

    /// Finalized successfully and ready to send
    Complete,

    /// Finalization attempted but validation failed
    Invalid,

    /// Validated by an external collaborator
    Valid,

    /// Accepted by the submission endpoint
    Submitted,

    /// Rejected or failed at the submission endpoint
    SubmissionFailed,
}

impl InstanceStatus {
    /// Whether this status belongs to the finalized set
    ///
    /// Entering the finalized set for the first time is what stamps
    /// `finalization_date` on a save.
    #[inline]
    #[must_use]
    pub fn is_finalized(self) -> bool {
        matches!(
            self,
            Self::Complete | Self::Valid | Self::Invalid | Self::Submitted | Self::SubmissionFailed
        )
    }
}

/// Persisted record of one form-filling session
///
/// Fields are private; read through getters, change through
/// [`Instance::to_builder`]. Equality is structural, which makes store tests
/// straightforward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    db_id: Option<i64>,
    form_id: String,
    form_version: Option<String>,
    instance_file_path: PathBuf,
    status: Option<InstanceStatus>,
    display_name: Option<String>,
    geometry: Option<String>,
    geometry_type: Option<String>,
    last_status_change_date: Option<DateTime<Utc>>,
    finalization_date: Option<DateTime<Utc>>,
    deleted_date: Option<DateTime<Utc>>,
    can_edit_when_complete: bool,
    can_delete_before_send: bool,
    edit_of: Option<i64>,
    edit_number: Option<i64>,
}

impl Instance {
    /// Start building an instance record
    ///
    /// `form_id` and `instance_file_path` are the only fields every record
    /// must carry before its first save.
    #[inline]
    #[must_use]
    pub fn builder(form_id: impl Into<String>, instance_file_path: impl Into<PathBuf>) -> InstanceBuilder {
        InstanceBuilder::new(form_id, instance_file_path)
    }

    /// Copy this record into a builder for a changed-field update
    #[inline]
    #[must_use]
    pub fn to_builder(&self) -> InstanceBuilder {
        InstanceBuilder {
            inner: self.clone(),
        }
    }

    /// Store-assigned row id; absent until the first save
    #[inline]
    #[must_use]
    pub fn db_id(&self) -> Option<i64> {
        self.db_id
    }

    /// Identifier of the form this instance was filled against
    #[inline]
    #[must_use]
    pub fn form_id(&self) -> &str {
        &self.form_id
    }

    /// Version of the form this instance was filled against
    #[inline]
    #[must_use]
    pub fn form_version(&self) -> Option<&str> {
        self.form_version.as_deref()
    }

    /// Path to the serialized answer data owned by this instance
    #[inline]
    #[must_use]
    pub fn instance_file_path(&self) -> &Path {
        &self.instance_file_path
    }

    /// Lifecycle status; the store substitutes `Incomplete` when absent
    #[inline]
    #[must_use]
    pub fn status(&self) -> Option<InstanceStatus> {
        self.status
    }

    /// Human-readable name shown in instance lists
    #[inline]
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Geometry answer extracted for mapping, if any
    #[inline]
    #[must_use]
    pub fn geometry(&self) -> Option<&str> {
        self.geometry.as_deref()
    }

    /// Geometry kind accompanying [`Instance::geometry`]
    #[inline]
    #[must_use]
    pub fn geometry_type(&self) -> Option<&str> {
        self.geometry_type.as_deref()
    }

    /// When the status last changed; maintained by the store
    #[inline]
    #[must_use]
    pub fn last_status_change_date(&self) -> Option<DateTime<Utc>> {
        self.last_status_change_date
    }

    /// When the instance first entered the finalized set; set once
    #[inline]
    #[must_use]
    pub fn finalization_date(&self) -> Option<DateTime<Utc>> {
        self.finalization_date
    }

    /// Soft-delete tombstone; absent while the instance is live
    #[inline]
    #[must_use]
    pub fn deleted_date(&self) -> Option<DateTime<Utc>> {
        self.deleted_date
    }

    /// Whether the form allowed editing after completion at finalize time
    #[inline]
    #[must_use]
    pub fn can_edit_when_complete(&self) -> bool {
        self.can_edit_when_complete
    }

    /// Whether the form allowed deletion before sending at finalize time
    #[inline]
    #[must_use]
    pub fn can_delete_before_send(&self) -> bool {
        self.can_delete_before_send
    }

    /// Row id of the instance this record is an edited copy of
    #[inline]
    #[must_use]
    pub fn edit_of(&self) -> Option<i64> {
        self.edit_of
    }

    /// Position of this record in its edit chain
    #[inline]
    #[must_use]
    pub fn edit_number(&self) -> Option<i64> {
        self.edit_number
    }

    /// Whether this record has been soft-deleted
    #[inline]
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted_date.is_some()
    }
}

/// Builder for [`Instance`]
///
/// Consuming field-name setters in the workspace's usual builder style.
#[derive(Debug, Clone)]
pub struct InstanceBuilder {
    inner: Instance,
}

impl InstanceBuilder {
    /// Create a builder with the required fields
    #[inline]
    #[must_use]
    pub fn new(form_id: impl Into<String>, instance_file_path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Instance {
                db_id: None,
                form_id: form_id.into(),
                form_version: None,
                instance_file_path: instance_file_path.into(),
                status: None,
                display_name: None,
                geometry: None,
                geometry_type: None,
                last_status_change_date: None,
                finalization_date: None,
                deleted_date: None,
                can_edit_when_complete: true,
                can_delete_before_send: true,
                edit_of: None,
                edit_number: None,
            },
        }
    }

    /// Set the store-assigned row id
    #[inline]
    #[must_use]
    pub fn db_id(mut self, db_id: i64) -> Self {
        self.inner.db_id = Some(db_id);
        self
    }

    /// Set the form version
    #[inline]
    #[must_use]
    pub fn form_version(mut self, version: Option<String>) -> Self {
        self.inner.form_version = version;
        self
    }

    /// Replace the bound instance file path
    #[inline]
    #[must_use]
    pub fn instance_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.inner.instance_file_path = path.into();
        self
    }

    /// Set the lifecycle status
    #[inline]
    #[must_use]
    pub fn status(mut self, status: Option<InstanceStatus>) -> Self {
        self.inner.status = status;
        self
    }

    /// Set the display name
    #[inline]
    #[must_use]
    pub fn display_name(mut self, name: Option<String>) -> Self {
        self.inner.display_name = name;
        self
    }

    /// Set the geometry answer and its kind
    #[inline]
    #[must_use]
    pub fn geometry(mut self, geometry: Option<String>, geometry_type: Option<String>) -> Self {
        self.inner.geometry = geometry;
        self.inner.geometry_type = geometry_type;
        self
    }

    /// Set the last status change timestamp
    #[inline]
    #[must_use]
    pub fn last_status_change_date(mut self, date: Option<DateTime<Utc>>) -> Self {
        self.inner.last_status_change_date = date;
        self
    }

    /// Set the finalization timestamp
    #[inline]
    #[must_use]
    pub fn finalization_date(mut self, date: Option<DateTime<Utc>>) -> Self {
        self.inner.finalization_date = date;
        self
    }

    /// Set the soft-delete tombstone
    #[inline]
    #[must_use]
    pub fn deleted_date(mut self, date: Option<DateTime<Utc>>) -> Self {
        self.inner.deleted_date = date;
        self
    }

    /// Set the edit-after-complete capability flag
    #[inline]
    #[must_use]
    pub fn can_edit_when_complete(mut self, can_edit: bool) -> Self {
        self.inner.can_edit_when_complete = can_edit;
        self
    }

    /// Set the delete-before-send capability flag
    #[inline]
    #[must_use]
    pub fn can_delete_before_send(mut self, can_delete: bool) -> Self {
        self.inner.can_delete_before_send = can_delete;
        self
    }

    /// Link this record into an edit chain
    #[inline]
    #[must_use]
    pub fn edit_of(mut self, edit_of: Option<i64>, edit_number: Option<i64>) -> Self {
        self.inner.edit_of = edit_of;
        self.inner.edit_number = edit_number;
        self
    }

    /// Build the record
    #[inline]
    #[must_use]
    pub fn build(self) -> Instance {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn builder_defaults() {
        let instance = Instance::builder("f1", "/data/instances/f1_1/f1_1.xml").build();

        assert_eq!(instance.db_id(), None);
        assert_eq!(instance.form_id(), "f1");
        assert_eq!(instance.status(), None);
        assert!(instance.can_edit_when_complete());
        assert!(instance.can_delete_before_send());
        assert!(!instance.is_deleted());
    }

    #[test]
    fn to_builder_round_trip_preserves_fields() {
        let original = Instance::builder("f1", "/data/instances/a/a.xml")
            .db_id(7)
            .form_version(Some("3".to_string()))
            .status(Some(InstanceStatus::Complete))
            .display_name(Some("Site visit".to_string()))
            .edit_of(Some(3), Some(1))
            .build();

        let copy = original.to_builder().build();
        assert_eq!(original, copy);

        let renamed = original
            .to_builder()
            .display_name(Some("Site visit 2".to_string()))
            .build();
        assert_eq!(renamed.display_name(), Some("Site visit 2"));
        assert_eq!(renamed.db_id(), Some(7));
        assert_eq!(renamed.status(), Some(InstanceStatus::Complete));
    }

    #[test]
    fn finalized_set_membership() {
        assert!(InstanceStatus::Complete.is_finalized());
        assert!(InstanceStatus::Valid.is_finalized());
        assert!(InstanceStatus::Invalid.is_finalized());
        assert!(InstanceStatus::Submitted.is_finalized());
        assert!(InstanceStatus::SubmissionFailed.is_finalized());

        assert!(!InstanceStatus::Incomplete.is_finalized());
        assert!(!InstanceStatus::NewEdit.is_finalized());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&InstanceStatus::SubmissionFailed).unwrap();
        assert_eq!(json, "\"submission_failed\"");
    }
}
