//! Testing utilities for the fieldform workspace
//!
//! Shared fakes and fixtures: a controllable clock, a scripted form engine,
//! and in-memory collaborators.

#![allow(missing_docs)]

use chrono::{DateTime, TimeZone, Utc};
use fieldform_model::{Clock, FormRecord};
use fieldform_session::{
    AnswerResolver, EngineError, EntitiesSink, Entity, EntityError, FinalizeOutcome, FormEngine,
    FormsProvider, SavedTree, ValidationOutcome,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Clock fixed at a settable instant.
pub struct FakeClock {
    now: Mutex<DateTime<Utc>>,
}

impl FakeClock {
    pub fn at_millis(millis: i64) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(Utc.timestamp_millis_opt(millis).unwrap()),
        })
    }

    pub fn set_millis(&self, millis: i64) {
        *self.now.lock() = Utc.timestamp_millis_opt(millis).unwrap();
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Parsed-definition stand-in produced by [`ScriptedEngine`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptedDefinition {
    pub root_name: String,
    pub source: String,
}

/// Answer-tree stand-in used by [`ScriptedEngine`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptedTree {
    pub root_name: String,
    pub answers: BTreeMap<String, String>,
    pub language: Option<String>,
    pub finalized: bool,
}

/// On-disk shape of a serialized [`ScriptedTree`].
#[derive(Debug, Serialize, Deserialize)]
struct SavedDoc {
    root_name: String,
    multiplicity: u32,
    language: Option<String>,
    answers: BTreeMap<String, String>,
    finalized: bool,
}

/// Encode a saved-instance document directly, bypassing the engine.
///
/// Lets tests fabricate saved data with arbitrary root names and
/// multiplicities.
pub fn encode_saved_doc(
    root_name: &str,
    multiplicity: u32,
    answers: &[(&str, &str)],
    language: Option<&str>,
) -> Vec<u8> {
    let doc = SavedDoc {
        root_name: root_name.to_string(),
        multiplicity,
        language: language.map(str::to_string),
        answers: answers
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect(),
        finalized: false,
    };
    serde_json::to_vec_pretty(&doc).unwrap()
}

/// Deterministic [`FormEngine`] for tests.
///
/// Parsing succeeds for any readable file unless its content contains the
/// marker `unparseable`. Validation fails whenever an answer is recorded
/// under the key `blocker`. Finalization emits the entities and submission
/// name the engine was scripted with.
pub struct ScriptedEngine {
    root_name: String,
    submission_name: Option<String>,
    whole_form: bool,
    entities: Vec<Entity>,
    parse_count: AtomicUsize,
    last_resolver: Mutex<Option<AnswerResolver>>,
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedEngine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            root_name: "data".to_string(),
            submission_name: None,
            whole_form: true,
            entities: Vec::new(),
            parse_count: AtomicUsize::new(0),
            last_resolver: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_root_name(mut self, root_name: impl Into<String>) -> Self {
        self.root_name = root_name.into();
        self
    }

    #[must_use]
    pub fn with_submission_name(mut self, name: impl Into<String>) -> Self {
        self.submission_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_whole_form(mut self, whole_form: bool) -> Self {
        self.whole_form = whole_form;
        self
    }

    #[must_use]
    pub fn with_entities(mut self, entities: Vec<Entity>) -> Self {
        self.entities = entities;
        self
    }

    /// How many times `parse` ran (cache-hit assertions).
    pub fn parse_count(&self) -> usize {
        self.parse_count.load(Ordering::SeqCst)
    }

    /// Resolver passed into the most recent `populate` call.
    pub fn last_resolver(&self) -> Option<AnswerResolver> {
        *self.last_resolver.lock()
    }
}

impl FormEngine for ScriptedEngine {
    type Definition = ScriptedDefinition;
    type Tree = ScriptedTree;

    fn parse(
        &self,
        form_file: &Path,
        _media_dir: &Path,
        _last_saved_src: Option<&Path>,
    ) -> Result<Self::Definition, EngineError> {
        let bytes =
            fs::read(form_file).map_err(|err| EngineError::Parse(err.to_string()))?;
        if bytes.windows(b"unparseable".len()).any(|w| w == b"unparseable") {
            return Err(EngineError::Parse("scripted parse failure".to_string()));
        }

        self.parse_count.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedDefinition {
            root_name: self.root_name.clone(),
            source: form_file.display().to_string(),
        })
    }

    fn template_tree(&self, definition: &Self::Definition) -> Self::Tree {
        ScriptedTree {
            root_name: definition.root_name.clone(),
            answers: BTreeMap::new(),
            language: None,
            finalized: false,
        }
    }

    fn template_root_name(&self, definition: &Self::Definition) -> String {
        definition.root_name.clone()
    }

    fn read_saved(&self, bytes: &[u8]) -> Result<SavedTree<Self::Tree>, EngineError> {
        let doc: SavedDoc = serde_json::from_slice(bytes)
            .map_err(|err| EngineError::Deserialize(err.to_string()))?;
        Ok(SavedTree {
            tree: ScriptedTree {
                root_name: doc.root_name.clone(),
                answers: doc.answers,
                language: doc.language.clone(),
                finalized: doc.finalized,
            },
            root_name: doc.root_name,
            root_multiplicity: doc.multiplicity,
            language: doc.language,
        })
    }

    fn populate(
        &self,
        _definition: &Self::Definition,
        template: &mut Self::Tree,
        saved: Self::Tree,
        resolver: AnswerResolver,
    ) -> Result<(), EngineError> {
        *self.last_resolver.lock() = Some(resolver);
        template.answers = saved.answers;
        Ok(())
    }

    fn set_language(&self, tree: &mut Self::Tree, language: &str) {
        tree.language = Some(language.to_string());
    }

    fn serialize_tree(&self, tree: &Self::Tree) -> Result<Vec<u8>, EngineError> {
        let doc = SavedDoc {
            root_name: tree.root_name.clone(),
            multiplicity: 0,
            language: tree.language.clone(),
            answers: tree.answers.clone(),
            finalized: tree.finalized,
        };
        serde_json::to_vec_pretty(&doc).map_err(|err| EngineError::Other(err.to_string()))
    }

    fn validate(&self, tree: &Self::Tree, _strict: bool) -> ValidationOutcome {
        if tree.answers.contains_key("blocker") {
            ValidationOutcome::Failed {
                reference: format!("/{}/blocker", tree.root_name),
                message: "required answer missing".to_string(),
            }
        } else {
            ValidationOutcome::Passed
        }
    }

    fn finalize(&self, tree: &mut Self::Tree) -> Result<FinalizeOutcome, EngineError> {
        tree.finalized = true;
        let payload = self.serialize_tree(tree)?;
        Ok(FinalizeOutcome {
            payload,
            entities: self.entities.clone(),
            submission_name: self.submission_name.clone(),
            whole_form: self.whole_form,
        })
    }
}

/// In-memory [`FormsProvider`].
#[derive(Default)]
pub struct MemoryFormsProvider {
    forms: Mutex<Vec<FormRecord>>,
}

impl MemoryFormsProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, form: FormRecord) {
        self.forms.lock().push(form);
    }
}

impl FormsProvider for MemoryFormsProvider {
    fn get_by_id_and_version(&self, form_id: &str, version: Option<&str>) -> Option<FormRecord> {
        self.forms
            .lock()
            .iter()
            .find(|form| form.form_id() == form_id && form.version() == version)
            .cloned()
    }
}

/// In-memory [`EntitiesSink`] that records what finalize persisted.
#[derive(Default)]
pub struct MemoryEntitiesSink {
    saved: Mutex<Vec<Entity>>,
    failing: AtomicBool,
}

impl MemoryEntitiesSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved(&self) -> Vec<Entity> {
        self.saved.lock().clone()
    }

    /// Make every subsequent save fail, for error-propagation tests.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl EntitiesSink for MemoryEntitiesSink {
    fn save(&self, entity: &Entity) -> Result<(), EntityError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(EntityError {
                dataset: entity.dataset.clone(),
                message: "scripted sink failure".to_string(),
            });
        }
        self.saved.lock().push(entity.clone());
        Ok(())
    }
}

/// Write a parseable form definition file and build its [`FormRecord`].
pub fn form_on_disk(dir: &Path, db_id: i64, form_id: &str, version: Option<&str>) -> FormRecord {
    let form_file = dir.join(format!("{form_id}.xml"));
    let media_dir = dir.join(format!("{form_id}-media"));
    fs::write(&form_file, format!("<form id=\"{form_id}\"/>")).unwrap();
    fs::create_dir_all(&media_dir).unwrap();

    FormRecord::new(
        db_id,
        form_id,
        version.map(str::to_string),
        form_file,
        media_dir,
    )
}
