//! Live session state
//!
//! A [`FormSession`] is one in-progress form-filling session: the parsed
//! definition, the runtime answer tree, and the instance file the answers
//! flush to. The file and its directory are exclusively owned by this session
//! for its lifetime (single writer per instance).

use fieldform_model::FormRecord;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::engine::FormEngine;

/// One in-progress form-filling session
pub struct FormSession<E: FormEngine> {
    form: FormRecord,
    definition: Arc<E::Definition>,
    tree: E::Tree,
    instance_file_path: PathBuf,
}

impl<E: FormEngine> std::fmt::Debug for FormSession<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormSession")
            .field("form_id", &self.form.form_id())
            .field("instance_file_path", &self.instance_file_path)
            .finish_non_exhaustive()
    }
}

impl<E: FormEngine> FormSession<E> {
    pub(crate) fn new(
        form: FormRecord,
        definition: Arc<E::Definition>,
        tree: E::Tree,
        instance_file_path: PathBuf,
    ) -> Self {
        Self {
            form,
            definition,
            tree,
            instance_file_path,
        }
    }

    /// The form this session fills
    #[inline]
    #[must_use]
    pub fn form(&self) -> &FormRecord {
        &self.form
    }

    /// The parsed definition the session runs against
    #[inline]
    #[must_use]
    pub fn definition(&self) -> &Arc<E::Definition> {
        &self.definition
    }

    /// The runtime answer tree
    #[inline]
    #[must_use]
    pub fn tree(&self) -> &E::Tree {
        &self.tree
    }

    /// Mutable access for the UI/answer layer
    #[inline]
    pub fn tree_mut(&mut self) -> &mut E::Tree {
        &mut self.tree
    }

    /// The instance file this session's answers flush to
    #[inline]
    #[must_use]
    pub fn instance_file_path(&self) -> &Path {
        &self.instance_file_path
    }
}
