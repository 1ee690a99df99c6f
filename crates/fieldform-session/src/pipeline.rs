//! Session pipeline
//!
//! [`SessionPipeline`] ties the cache, the stores, and the engine together
//! for loading, drafting, and finalizing a session. It owns no UI concerns
//! and no scheduling: callers invoke it from their own worker context, one
//! writer per instance.

use fieldform_model::{Clock, FormRecord, Instance, InstanceStatus};
use fieldform_store::{fsutil, FormDefinitionCache, InstanceStore, SavepointStore};
use parking_lot::Mutex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use fieldform_model::Savepoint;

use crate::collaborators::{EntitiesSink, FormsProvider};
use crate::engine::{AnswerResolver, FormEngine, SavedTree, ValidationOutcome};
use crate::error::PipelineError;
use crate::session::FormSession;

/// The engine's answer-resolution machinery is process-wide mutable state, so
/// only one merge may run with the non-default resolver at a time.
static MERGE_SECTION: Mutex<()> = Mutex::new(());

/// Filesystem roots the pipeline works under
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory that holds one sub-directory per instance
    pub instances_root: PathBuf,

    /// Cache area for definition artifacts and savepoint files
    pub cache_dir: PathBuf,
}

/// What to resolve a form definition from
#[derive(Debug, Clone, Copy)]
pub enum FormSource<'a> {
    /// An explicit `(form_id, version)` pair
    Form {
        /// Form identifier
        form_id: &'a str,
        /// Exact version to resolve
        version: Option<&'a str>,
    },

    /// The form an existing instance was filled against
    Instance(&'a Instance),
}

/// Orchestrates form-filling sessions end to end
pub struct SessionPipeline<E: FormEngine> {
    engine: E,
    config: PipelineConfig,
    forms: Arc<dyn FormsProvider>,
    entities: Arc<dyn EntitiesSink>,
    instances: Arc<InstanceStore>,
    savepoints: Arc<SavepointStore>,
    cache: FormDefinitionCache<E::Definition>,
    clock: Arc<dyn Clock>,
}

impl<E: FormEngine> std::fmt::Debug for SessionPipeline<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<E: FormEngine> SessionPipeline<E> {
    /// Create a pipeline over the given collaborators.
    ///
    /// # Errors
    /// Returns an error when the definition-cache directory cannot be
    /// created.
    pub fn new(
        engine: E,
        config: PipelineConfig,
        forms: Arc<dyn FormsProvider>,
        entities: Arc<dyn EntitiesSink>,
        instances: Arc<InstanceStore>,
        savepoints: Arc<SavepointStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, PipelineError> {
        let cache = FormDefinitionCache::new(config.cache_dir.join("formdefs"))?;

        Ok(Self {
            engine,
            config,
            forms,
            entities,
            instances,
            savepoints,
            cache,
            clock,
        })
    }

    /// The engine this pipeline drives
    #[inline]
    #[must_use]
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// The definition cache (exposed for maintenance: `clear`)
    #[inline]
    #[must_use]
    pub fn definition_cache(&self) -> &FormDefinitionCache<E::Definition> {
        &self.cache
    }

    /// Resolve and parse a form definition, using the cache when possible.
    ///
    /// Returns `Ok(None)` when the form row or its XML source file is
    /// missing, so the caller can show a "form unavailable" state. Cache
    /// failures degrade to parsing fresh and never block the pipeline.
    ///
    /// # Errors
    /// Propagates engine parse failures.
    pub fn load_form_definition(
        &self,
        source: FormSource<'_>,
    ) -> Result<Option<Arc<E::Definition>>, PipelineError> {
        let (form_id, version) = match source {
            FormSource::Form { form_id, version } => (form_id, version),
            FormSource::Instance(instance) => (instance.form_id(), instance.form_version()),
        };

        let Some(form) = self.forms.get_by_id_and_version(form_id, version) else {
            tracing::info!(form_id, ?version, "form not found in forms repository");
            return Ok(None);
        };

        self.definition_for(&form)
    }

    /// Start a brand-new session against `form`.
    ///
    /// The bound instance file is freshly allocated (its directory is created
    /// and thereby claimed) but not yet a store row; the first
    /// [`SessionPipeline::save_draft`] creates the row.
    ///
    /// # Errors
    /// [`PipelineError::FormUnavailable`] when no usable definition exists,
    /// or an I/O error when the instance directory cannot be created.
    pub fn load_blank_form(&self, form: &FormRecord) -> Result<FormSession<E>, PipelineError> {
        let definition = self.require_definition(form)?;
        let tree = self.engine.template_tree(&definition);
        let instance_file = self.allocate_instance_file(form)?;

        tracing::info!(
            form_id = form.form_id(),
            instance_file = %instance_file.display(),
            "blank session started"
        );
        Ok(FormSession::new(
            form.clone(),
            definition,
            tree,
            instance_file,
        ))
    }

    /// Resume an existing draft.
    ///
    /// The saved answers are merged into a fresh template tree when the saved
    /// root element matches the template root and the saved root multiplicity
    /// is 0. A mismatch means the saved data cannot be mapped onto this
    /// definition; the session continues with an unpopulated template rather
    /// than failing.
    ///
    /// # Errors
    /// [`PipelineError::FormUnavailable`] when no usable definition exists,
    /// an I/O error when the saved instance file cannot be read, or an engine
    /// error from decoding/merging.
    pub fn load_draft(
        &self,
        form: &FormRecord,
        instance: &Instance,
    ) -> Result<FormSession<E>, PipelineError> {
        let definition = self.require_definition(form)?;

        let saved_path = instance.instance_file_path();
        let bytes = fs::read(saved_path).map_err(|source| PipelineError::Io {
            path: saved_path.to_path_buf(),
            source,
        })?;
        let SavedTree {
            tree: saved_tree,
            root_name,
            root_multiplicity,
            language,
        } = self.engine.read_saved(&bytes)?;

        let mut tree = self.engine.template_tree(&definition);
        let template_root = self.engine.template_root_name(&definition);

        if root_name == template_root && root_multiplicity == 0 {
            // The external-data-aware resolver must only be in effect for
            // this one merge; the engine's resolution state is shared.
            let _guard = MERGE_SECTION.lock();
            self.engine.populate(
                &definition,
                &mut tree,
                saved_tree,
                AnswerResolver::ExternalDataAware,
            )?;
        } else {
            tracing::warn!(
                saved_root = %root_name,
                template_root = %template_root,
                root_multiplicity,
                "saved instance does not match template; leaving tree unpopulated"
            );
        }

        if let Some(language) = language {
            self.engine.set_language(&mut tree, &language);
        }

        tracing::info!(
            form_id = form.form_id(),
            instance_file = %saved_path.display(),
            "draft session restored"
        );
        Ok(FormSession::new(
            form.clone(),
            definition,
            tree,
            saved_path.to_path_buf(),
        ))
    }

    /// Snapshot the session's current answers to a savepoint file.
    ///
    /// The file lands in the cache area, named `<instanceFileName>.save`, and
    /// is registered first-writer-wins: if the key is already claimed, the
    /// existing pointer stays.
    ///
    /// # Errors
    /// Engine serialization failures, I/O failures, or registry failures.
    pub fn save_savepoint(
        &self,
        session: &FormSession<E>,
        instance_db_id: Option<i64>,
    ) -> Result<PathBuf, PipelineError> {
        let bytes = self.engine.serialize_tree(session.tree())?;
        let savepoint_path = self.savepoint_path_for(session.instance_file_path());

        fsutil::write_atomic(&savepoint_path, &bytes).map_err(|source| PipelineError::Io {
            path: savepoint_path.clone(),
            source,
        })?;

        self.savepoints.save(&Savepoint::new(
            session.form().db_id(),
            instance_db_id,
            savepoint_path.clone(),
            session.instance_file_path(),
        ))?;

        Ok(savepoint_path)
    }

    /// Release the savepoint for a cleanly completed session.
    ///
    /// # Errors
    /// Registry or file-removal failures.
    pub fn release_savepoint(
        &self,
        form_db_id: i64,
        instance_db_id: Option<i64>,
    ) -> Result<(), PipelineError> {
        self.savepoints.delete(form_db_id, instance_db_id)?;
        Ok(())
    }

    /// Find a recovery candidate for this session.
    ///
    /// A savepoint qualifies only if its file exists and its modification
    /// time is strictly newer than the bound instance file's. Stale or absent
    /// savepoints are ignored here, never deleted.
    ///
    /// # Errors
    /// I/O failures reading file metadata.
    pub fn savepoint_for(
        &self,
        session: &FormSession<E>,
        instance_db_id: Option<i64>,
    ) -> Result<Option<PathBuf>, PipelineError> {
        let Some(savepoint) = self
            .savepoints
            .get(session.form().db_id(), instance_db_id)
        else {
            return Ok(None);
        };

        let Some(savepoint_mtime) = mtime(savepoint.savepoint_file_path())
            .map_err(|source| PipelineError::Io {
                path: savepoint.savepoint_file_path().to_path_buf(),
                source,
            })?
        else {
            return Ok(None);
        };

        let instance_mtime = mtime(session.instance_file_path()).map_err(|source| {
            PipelineError::Io {
                path: session.instance_file_path().to_path_buf(),
                source,
            }
        })?;

        // A never-flushed instance file makes any savepoint newer.
        let newer = instance_mtime.map_or(true, |flushed| savepoint_mtime > flushed);
        Ok(newer.then(|| savepoint.savepoint_file_path().to_path_buf()))
    }

    /// Flush the session's answers and persist the draft row.
    ///
    /// Creates the row with status [`InstanceStatus::Incomplete`] on first
    /// save, updates it in place afterwards.
    ///
    /// # Errors
    /// Engine serialization failures, I/O failures, or store failures.
    pub fn save_draft(&self, session: &FormSession<E>) -> Result<Instance, PipelineError> {
        let bytes = self.engine.serialize_tree(session.tree())?;
        let path = session.instance_file_path();

        fsutil::write_atomic(path, &bytes).map_err(|source| PipelineError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let form = session.form();
        let builder = match self.instances.get_by_path(path) {
            Some(row) => row.to_builder(),
            None => Instance::builder(form.form_id(), path)
                .form_version(form.version().map(str::to_string)),
        };
        let row = self
            .instances
            .save(&builder.status(Some(InstanceStatus::Incomplete)).build())?;

        tracing::info!(
            db_id = row.db_id(),
            instance_file = %path.display(),
            "draft saved"
        );
        Ok(row)
    }

    /// Validate and, on success, finalize the session.
    ///
    /// A validation failure is an expected outcome, not an error: the row is
    /// persisted with status [`InstanceStatus::Invalid`] and `Ok(None)` comes
    /// back for the caller to branch on. On success the submission payload is
    /// flushed, extracted entities are persisted, and the row lands in
    /// [`InstanceStatus::Complete`] with its capability flags stamped from
    /// the finalize outcome and the form's auto-send setting.
    ///
    /// # Errors
    /// [`PipelineError::DraftNotFound`] when no row exists for the bound
    /// instance file, plus engine, entity-sink, I/O, and store failures.
    pub fn finalize_draft(
        &self,
        session: &mut FormSession<E>,
    ) -> Result<Option<Instance>, PipelineError> {
        let path = session.instance_file_path().to_path_buf();
        let Some(row) = self.instances.get_by_path(&path) else {
            return Err(PipelineError::DraftNotFound { path });
        };

        if let ValidationOutcome::Failed { reference, message } =
            self.engine.validate(session.tree(), true)
        {
            tracing::warn!(
                db_id = row.db_id(),
                reference = %reference,
                message = %message,
                "validation failed; marking instance invalid"
            );
            self.instances
                .save(&row.to_builder().status(Some(InstanceStatus::Invalid)).build())?;
            return Ok(None);
        }

        let outcome = self.engine.finalize(session.tree_mut())?;

        for entity in &outcome.entities {
            self.entities.save(entity)?;
        }

        fsutil::write_atomic(&path, &outcome.payload).map_err(|source| PipelineError::Io {
            path: path.clone(),
            source,
        })?;

        let display_name = outcome
            .submission_name
            .clone()
            .or_else(|| row.display_name().map(str::to_string));
        // An auto-send form hands the payload to the sender as soon as it is
        // complete, so the user may not delete it first.
        let finalized = self.instances.save(
            &row.to_builder()
                .status(Some(InstanceStatus::Complete))
                .can_edit_when_complete(outcome.whole_form)
                .can_delete_before_send(!session.form().auto_send().unwrap_or(false))
                .display_name(display_name)
                .build(),
        )?;

        tracing::info!(
            db_id = finalized.db_id(),
            entities = outcome.entities.len(),
            "instance finalized"
        );
        Ok(Some(finalized))
    }

    /// Resolve `form`'s definition or fail with `FormUnavailable`.
    fn require_definition(&self, form: &FormRecord) -> Result<Arc<E::Definition>, PipelineError> {
        self.definition_for(form)?
            .ok_or_else(|| PipelineError::FormUnavailable {
                form_id: form.form_id().to_string(),
                version: form.version().map(str::to_string),
            })
    }

    fn definition_for(
        &self,
        form: &FormRecord,
    ) -> Result<Option<Arc<E::Definition>>, PipelineError> {
        let form_file = form.form_file_path();
        if !form_file.exists() {
            tracing::warn!(
                form_id = form.form_id(),
                form_file = %form_file.display(),
                "form definition source file missing"
            );
            return Ok(None);
        }

        match self.cache.read(form_file) {
            Ok(Some(definition)) => return Ok(Some(definition)),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(error = %err, "definition cache read failed; parsing fresh");
            }
        }

        let definition = self
            .engine
            .parse(form_file, form.form_media_path(), None)?;

        if let Err(err) = self.cache.write(definition.clone(), form_file) {
            tracing::warn!(error = %err, "definition cache write failed; continuing uncached");
        }

        Ok(Some(Arc::new(definition)))
    }

    /// One directory per instance, named after the form and the start time.
    ///
    /// The directory is created here, not at first flush, so choosing a name
    /// claims it: a second session started within the same clock second fails
    /// the `create_dir` and moves on to a suffixed name.
    fn allocate_instance_file(&self, form: &FormRecord) -> Result<PathBuf, PipelineError> {
        let stamp = self.clock.now().format("%Y-%m-%d_%H-%M-%S");
        let base = format!("{}_{stamp}", sanitize_component(form.form_id()));

        fs::create_dir_all(&self.config.instances_root).map_err(|source| PipelineError::Io {
            path: self.config.instances_root.clone(),
            source,
        })?;

        let mut name = base.clone();
        let mut suffix = 2;
        loop {
            let dir = self.config.instances_root.join(&name);
            match fs::create_dir(&dir) {
                Ok(()) => return Ok(dir.join(format!("{name}.xml"))),
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    name = format!("{base}_{suffix}");
                    suffix += 1;
                }
                Err(source) => return Err(PipelineError::Io { path: dir, source }),
            }
        }
    }

    fn savepoint_path_for(&self, instance_file: &Path) -> PathBuf {
        let file_name = instance_file
            .file_name()
            .map_or_else(|| "instance.xml".to_string(), |n| n.to_string_lossy().into_owned());
        self.config.cache_dir.join(format!("{file_name}.save"))
    }
}

fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

fn mtime(path: &Path) -> io::Result<Option<SystemTime>> {
    match fs::metadata(path) {
        Ok(meta) => meta.modified().map(Some),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}
