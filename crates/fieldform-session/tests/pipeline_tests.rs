//! Functional tests for the session pipeline.
//!
//! Exercised end to end against the real stores on a temporary filesystem,
//! with the form engine and collaborators scripted.

use fieldform_model::{Clock, FormRecord, Instance, InstanceStatus};
use fieldform_session::{
    AnswerResolver, Entity, FormSource, PipelineConfig, PipelineError, SessionPipeline,
};
use fieldform_store::{InstanceStore, SavepointStore};
use fieldform_test_utils::{
    encode_saved_doc, form_on_disk, FakeClock, MemoryEntitiesSink, MemoryFormsProvider,
    ScriptedEngine,
};
use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
    pipeline: SessionPipeline<ScriptedEngine>,
    forms: Arc<MemoryFormsProvider>,
    entities: Arc<MemoryEntitiesSink>,
    instances: Arc<InstanceStore>,
    savepoints: Arc<SavepointStore>,
    clock: Arc<FakeClock>,
    root: PathBuf,
    _dir: tempfile::TempDir,
}

fn fixture() -> Fixture {
    fixture_with_engine(ScriptedEngine::new())
}

fn fixture_with_engine(engine: ScriptedEngine) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();

    let clock = FakeClock::at_millis(1_700_000_000_000);
    let instances = Arc::new(
        InstanceStore::open(
            root.join("metadata/instances.json"),
            clock.clone() as Arc<dyn Clock>,
        )
        .unwrap(),
    );
    let savepoints = Arc::new(SavepointStore::open(root.join("metadata/savepoints.json")).unwrap());
    let forms = Arc::new(MemoryFormsProvider::new());
    let entities = Arc::new(MemoryEntitiesSink::new());

    let pipeline = SessionPipeline::new(
        engine,
        PipelineConfig {
            instances_root: root.join("instances"),
            cache_dir: root.join(".cache"),
        },
        forms.clone(),
        entities.clone(),
        instances.clone(),
        savepoints.clone(),
        clock.clone(),
    )
    .unwrap();

    Fixture {
        pipeline,
        forms,
        entities,
        instances,
        savepoints,
        clock,
        root,
        _dir: dir,
    }
}

fn registered_form(fx: &Fixture) -> FormRecord {
    let form = form_on_disk(&fx.root, 1, "f1", Some("1"));
    fx.forms.add(form.clone());
    form
}

#[test]
fn unknown_form_resolves_to_none() {
    let fx = fixture();

    let definition = fx
        .pipeline
        .load_form_definition(FormSource::Form {
            form_id: "missing",
            version: None,
        })
        .unwrap();

    assert!(definition.is_none());
}

#[test]
fn missing_source_file_resolves_to_none() {
    let fx = fixture();
    let form = FormRecord::new(
        1,
        "f1",
        Some("1".to_string()),
        fx.root.join("never-written.xml"),
        fx.root.join("f1-media"),
    );
    fx.forms.add(form);

    let definition = fx
        .pipeline
        .load_form_definition(FormSource::Form {
            form_id: "f1",
            version: Some("1"),
        })
        .unwrap();

    assert!(definition.is_none());
}

#[test]
fn repeated_loads_hit_the_definition_cache() {
    let fx = fixture();
    registered_form(&fx);
    let source = FormSource::Form {
        form_id: "f1",
        version: Some("1"),
    };

    assert!(fx.pipeline.load_form_definition(source).unwrap().is_some());
    assert!(fx.pipeline.load_form_definition(source).unwrap().is_some());

    assert_eq!(fx.pipeline.engine().parse_count(), 1);
}

#[test]
fn definition_resolves_from_an_instance() {
    let fx = fixture();
    registered_form(&fx);

    let instance = Instance::builder("f1", fx.root.join("whatever.xml"))
        .form_version(Some("1".to_string()))
        .build();
    let definition = fx
        .pipeline
        .load_form_definition(FormSource::Instance(&instance))
        .unwrap();

    assert!(definition.is_some());
}

#[test]
fn blank_sessions_get_distinct_instance_files() {
    let fx = fixture();
    let form = registered_form(&fx);

    // Same form, same clock second: allocation itself must claim the name.
    let first = fx.pipeline.load_blank_form(&form).unwrap();
    let second = fx.pipeline.load_blank_form(&form).unwrap();

    assert_ne!(first.instance_file_path(), second.instance_file_path());
    assert!(first.tree().answers.is_empty());
}

#[test]
fn concurrent_blank_sessions_never_share_a_row() {
    let fx = fixture();
    let form = registered_form(&fx);

    let mut first = fx.pipeline.load_blank_form(&form).unwrap();
    let mut second = fx.pipeline.load_blank_form(&form).unwrap();
    first
        .tree_mut()
        .answers
        .insert("q1".to_string(), "from first".to_string());
    second
        .tree_mut()
        .answers
        .insert("q1".to_string(), "from second".to_string());

    let row_a = fx.pipeline.save_draft(&first).unwrap();
    let row_b = fx.pipeline.save_draft(&second).unwrap();

    assert_ne!(row_a.db_id(), row_b.db_id());
    assert_eq!(fx.instances.get_all().len(), 2);

    // Neither flush overwrote the other session's answers.
    let flushed = std::fs::read_to_string(first.instance_file_path()).unwrap();
    assert!(flushed.contains("from first"));
}

#[test]
fn load_blank_form_without_definition_is_an_error() {
    let fx = fixture();
    let form = FormRecord::new(
        1,
        "f1",
        None,
        fx.root.join("never-written.xml"),
        fx.root.join("f1-media"),
    );
    fx.forms.add(form.clone());

    let err = fx.pipeline.load_blank_form(&form).unwrap_err();
    assert!(matches!(err, PipelineError::FormUnavailable { .. }));
}

#[test]
fn save_draft_creates_then_updates_one_row() {
    let fx = fixture();
    let form = registered_form(&fx);
    let mut session = fx.pipeline.load_blank_form(&form).unwrap();

    session
        .tree_mut()
        .answers
        .insert("q1".to_string(), "yes".to_string());
    let first = fx.pipeline.save_draft(&session).unwrap();

    assert_eq!(first.status(), Some(InstanceStatus::Incomplete));
    assert_eq!(first.form_version(), Some("1"));
    assert!(session.instance_file_path().exists());

    session
        .tree_mut()
        .answers
        .insert("q2".to_string(), "no".to_string());
    let second = fx.pipeline.save_draft(&session).unwrap();

    assert_eq!(second.db_id(), first.db_id());
    assert_eq!(fx.instances.get_all().len(), 1);
}

#[test]
fn load_draft_merges_saved_answers_with_external_resolver() {
    let fx = fixture();
    let form = registered_form(&fx);

    let mut session = fx.pipeline.load_blank_form(&form).unwrap();
    session
        .tree_mut()
        .answers
        .insert("q1".to_string(), "42".to_string());
    let row = fx.pipeline.save_draft(&session).unwrap();

    let restored = fx.pipeline.load_draft(&form, &row).unwrap();

    assert_eq!(restored.tree().answers.get("q1").map(String::as_str), Some("42"));
    assert_eq!(restored.instance_file_path(), row.instance_file_path());
    assert_eq!(
        fx.pipeline.engine().last_resolver(),
        Some(AnswerResolver::ExternalDataAware)
    );
}

#[test]
fn load_draft_with_mismatched_root_leaves_tree_unpopulated() {
    let fx = fixture();
    let form = registered_form(&fx);

    let saved_path = fx.root.join("instances/f1_old/f1_old.xml");
    std::fs::create_dir_all(saved_path.parent().unwrap()).unwrap();
    std::fs::write(
        &saved_path,
        encode_saved_doc("legacy_root", 0, &[("q1", "stale")], None),
    )
    .unwrap();
    let instance = Instance::builder("f1", &saved_path)
        .form_version(Some("1".to_string()))
        .build();

    let restored = fx.pipeline.load_draft(&form, &instance).unwrap();

    assert!(restored.tree().answers.is_empty());
}

#[test]
fn load_draft_with_nonzero_multiplicity_leaves_tree_unpopulated() {
    let fx = fixture();
    let form = registered_form(&fx);

    let saved_path = fx.root.join("instances/f1_rep/f1_rep.xml");
    std::fs::create_dir_all(saved_path.parent().unwrap()).unwrap();
    std::fs::write(
        &saved_path,
        encode_saved_doc("data", 1, &[("q1", "stale")], None),
    )
    .unwrap();
    let instance = Instance::builder("f1", &saved_path)
        .form_version(Some("1".to_string()))
        .build();

    let restored = fx.pipeline.load_draft(&form, &instance).unwrap();

    assert!(restored.tree().answers.is_empty());
}

#[test]
fn load_draft_restores_saved_language() {
    let fx = fixture();
    let form = registered_form(&fx);

    let saved_path = fx.root.join("instances/f1_es/f1_es.xml");
    std::fs::create_dir_all(saved_path.parent().unwrap()).unwrap();
    std::fs::write(
        &saved_path,
        encode_saved_doc("data", 0, &[("q1", "si")], Some("es")),
    )
    .unwrap();
    let instance = Instance::builder("f1", &saved_path)
        .form_version(Some("1".to_string()))
        .build();

    let restored = fx.pipeline.load_draft(&form, &instance).unwrap();

    assert_eq!(restored.tree().language.as_deref(), Some("es"));
}

#[test]
fn finalize_completes_row_and_persists_entities() {
    let engine = ScriptedEngine::new()
        .with_submission_name("Visit 12")
        .with_whole_form(true)
        .with_entities(vec![Entity {
            dataset: "sites".to_string(),
            id: "site-9".to_string(),
            label: Some("North field".to_string()),
            properties: vec![("status".to_string(), "surveyed".to_string())],
        }]);
    let fx = fixture_with_engine(engine);
    let form = registered_form(&fx);

    let mut session = fx.pipeline.load_blank_form(&form).unwrap();
    session
        .tree_mut()
        .answers
        .insert("q1".to_string(), "done".to_string());
    fx.pipeline.save_draft(&session).unwrap();

    let finalized = fx.pipeline.finalize_draft(&mut session).unwrap().unwrap();

    assert_eq!(finalized.status(), Some(InstanceStatus::Complete));
    assert_eq!(finalized.display_name(), Some("Visit 12"));
    assert!(finalized.can_edit_when_complete());
    // No auto-send configured, so the draft stays deletable before sending.
    assert!(finalized.can_delete_before_send());
    assert!(finalized.finalization_date().is_some());

    let flushed = std::fs::read_to_string(session.instance_file_path()).unwrap();
    assert!(flushed.contains("\"finalized\": true"));

    let saved_entities = fx.entities.saved();
    assert_eq!(saved_entities.len(), 1);
    assert_eq!(saved_entities[0].dataset, "sites");
}

#[test]
fn finalize_on_auto_send_form_blocks_delete_before_send() {
    let fx = fixture();
    let form = form_on_disk(&fx.root, 1, "f1", Some("1")).with_auto_send(true);
    fx.forms.add(form.clone());

    let mut session = fx.pipeline.load_blank_form(&form).unwrap();
    fx.pipeline.save_draft(&session).unwrap();

    let finalized = fx.pipeline.finalize_draft(&mut session).unwrap().unwrap();

    assert!(!finalized.can_delete_before_send());
}

#[test]
fn finalize_of_partial_submission_blocks_later_editing() {
    let fx = fixture_with_engine(ScriptedEngine::new().with_whole_form(false));
    let form = registered_form(&fx);

    let mut session = fx.pipeline.load_blank_form(&form).unwrap();
    fx.pipeline.save_draft(&session).unwrap();

    let finalized = fx.pipeline.finalize_draft(&mut session).unwrap().unwrap();

    assert!(!finalized.can_edit_when_complete());
}

#[test]
fn validation_failure_marks_invalid_and_returns_none() {
    let fx = fixture();
    let form = registered_form(&fx);

    let mut session = fx.pipeline.load_blank_form(&form).unwrap();
    session
        .tree_mut()
        .answers
        .insert("blocker".to_string(), String::new());
    let row = fx.pipeline.save_draft(&session).unwrap();

    let outcome = fx.pipeline.finalize_draft(&mut session).unwrap();

    assert!(outcome.is_none());
    let stored = fx.instances.get(row.db_id().unwrap()).unwrap();
    assert_eq!(stored.status(), Some(InstanceStatus::Invalid));
    assert!(fx.entities.saved().is_empty());
}

#[test]
fn finalize_without_a_draft_row_is_an_error() {
    let fx = fixture();
    let form = registered_form(&fx);
    let mut session = fx.pipeline.load_blank_form(&form).unwrap();

    let err = fx.pipeline.finalize_draft(&mut session).unwrap_err();

    assert!(matches!(err, PipelineError::DraftNotFound { .. }));
}

#[test]
fn entity_sink_failure_propagates_and_leaves_draft_incomplete() {
    let engine = ScriptedEngine::new().with_entities(vec![Entity {
        dataset: "sites".to_string(),
        id: "site-1".to_string(),
        label: None,
        properties: vec![],
    }]);
    let fx = fixture_with_engine(engine);
    let form = registered_form(&fx);

    let mut session = fx.pipeline.load_blank_form(&form).unwrap();
    let row = fx.pipeline.save_draft(&session).unwrap();

    fx.entities.set_failing(true);
    let err = fx.pipeline.finalize_draft(&mut session).unwrap_err();

    assert!(matches!(err, PipelineError::Entities(_)));
    let stored = fx.instances.get(row.db_id().unwrap()).unwrap();
    assert_eq!(stored.status(), Some(InstanceStatus::Incomplete));
}

#[test]
fn savepoint_newer_than_flush_is_a_recovery_candidate() {
    let fx = fixture();
    let form = registered_form(&fx);

    let session = fx.pipeline.load_blank_form(&form).unwrap();
    let row = fx.pipeline.save_draft(&session).unwrap();

    // Ensure the savepoint's mtime lands strictly after the flush.
    std::thread::sleep(Duration::from_millis(50));
    let savepoint_path = fx
        .pipeline
        .save_savepoint(&session, row.db_id())
        .unwrap();

    let candidate = fx.pipeline.savepoint_for(&session, row.db_id()).unwrap();
    assert_eq!(candidate, Some(savepoint_path));
}

#[test]
fn savepoint_older_than_flush_is_ignored() {
    let fx = fixture();
    let form = registered_form(&fx);

    let session = fx.pipeline.load_blank_form(&form).unwrap();
    let row = fx.pipeline.save_draft(&session).unwrap();
    fx.pipeline.save_savepoint(&session, row.db_id()).unwrap();

    // A later flush makes the savepoint stale.
    std::thread::sleep(Duration::from_millis(50));
    fx.pipeline.save_draft(&session).unwrap();

    let candidate = fx.pipeline.savepoint_for(&session, row.db_id()).unwrap();
    assert_eq!(candidate, None);
    // Stale savepoints are ignored, not deleted.
    assert_eq!(fx.savepoints.get_all().len(), 1);
}

#[test]
fn savepoint_for_never_flushed_session_always_qualifies() {
    let fx = fixture();
    let form = registered_form(&fx);

    let session = fx.pipeline.load_blank_form(&form).unwrap();
    let savepoint_path = fx.pipeline.save_savepoint(&session, None).unwrap();

    let candidate = fx.pipeline.savepoint_for(&session, None).unwrap();
    assert_eq!(candidate, Some(savepoint_path));
}

#[test]
fn repeated_savepoints_keep_the_first_snapshot_pointer() {
    let fx = fixture();
    let form = registered_form(&fx);

    let session = fx.pipeline.load_blank_form(&form).unwrap();
    let first = fx.pipeline.save_savepoint(&session, None).unwrap();
    let second = fx.pipeline.save_savepoint(&session, None).unwrap();

    // The snapshot path is derived from the bound instance file, so a repeat
    // save rewrites the same file and the registry keeps its single row.
    assert_eq!(second, first);
    let rows = fx.savepoints.get_all();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].savepoint_file_path(), first.as_path());
}

#[test]
fn release_savepoint_removes_row_and_file() {
    let fx = fixture();
    let form = registered_form(&fx);

    let session = fx.pipeline.load_blank_form(&form).unwrap();
    let savepoint_path = fx.pipeline.save_savepoint(&session, None).unwrap();
    assert!(savepoint_path.exists());

    fx.pipeline
        .release_savepoint(form.db_id(), None)
        .unwrap();

    assert!(!savepoint_path.exists());
    assert_eq!(fx.pipeline.savepoint_for(&session, None).unwrap(), None);
}

#[test]
fn store_timestamps_follow_the_injected_clock() {
    let fx = fixture();
    let form = registered_form(&fx);

    let mut session = fx.pipeline.load_blank_form(&form).unwrap();
    let drafted = fx.pipeline.save_draft(&session).unwrap();
    assert_eq!(
        drafted.last_status_change_date(),
        Some(Utc.timestamp_millis_opt(1_700_000_000_000).unwrap())
    );
    assert_eq!(drafted.finalization_date(), None);

    fx.clock.set_millis(1_700_000_060_000);
    let finalized = fx.pipeline.finalize_draft(&mut session).unwrap().unwrap();

    assert_eq!(
        finalized.finalization_date(),
        Some(Utc.timestamp_millis_opt(1_700_000_060_000).unwrap())
    );
    assert_eq!(
        finalized.last_status_change_date(),
        Some(Utc.timestamp_millis_opt(1_700_000_060_000).unwrap())
    );
}
