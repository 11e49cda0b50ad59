mod common;

use common::{journal_stack, store_path, write_model, JOURNAL_MODEL};
use objstack_core::{
    ContextError, ModelError, PersistenceStack, SaveOutcome, StackConfig, StackError, StackPhase,
    StoreError, StoreType,
};
use std::rc::Rc;
use std::sync::Arc;

#[test]
fn construction_builds_no_handles() {
    let dir = tempfile::tempdir().unwrap();
    let stack = journal_stack(dir.path());

    assert_eq!(stack.phase(), StackPhase::Uninitialized);
    assert_eq!(stack.generation(), 0);
    assert!(!store_path(dir.path()).exists());
}

#[test]
fn model_access_does_not_touch_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let mut stack = journal_stack(dir.path());

    let model = stack.model().unwrap();
    assert_eq!(model.name(), Some("Journal"));
    assert_eq!(stack.phase(), StackPhase::Ready);
    assert!(!store_path(dir.path()).exists());
}

#[test]
fn handles_are_built_once_and_stay_identical() {
    let dir = tempfile::tempdir().unwrap();
    let mut stack = journal_stack(dir.path());

    let model = stack.model().unwrap();
    let coordinator = stack.coordinator().unwrap();
    let context = stack.context().unwrap();

    assert!(Arc::ptr_eq(&model, &stack.model().unwrap()));
    assert!(Rc::ptr_eq(&coordinator, &stack.coordinator().unwrap()));
    assert!(Rc::ptr_eq(&context, &stack.context().unwrap()));
    assert!(Rc::ptr_eq(context.coordinator(), &coordinator));
    assert!(Arc::ptr_eq(coordinator.model(), &model));
    assert_eq!(stack.generation(), 1);
    assert!(store_path(dir.path()).exists());
}

#[test]
fn context_access_builds_the_whole_chain() {
    let dir = tempfile::tempdir().unwrap();
    let mut stack = journal_stack(dir.path());

    let context = stack.context().unwrap();
    assert!(Rc::ptr_eq(context.coordinator(), &stack.coordinator().unwrap()));
    assert_eq!(
        context.coordinator().store_path(),
        Some(store_path(dir.path()).as_path())
    );
}

#[test]
fn delete_stack_removes_file_and_rebuilds_new_instances() {
    let dir = tempfile::tempdir().unwrap();
    let mut stack = journal_stack(dir.path());

    let model = stack.model().unwrap();
    let coordinator = stack.coordinator().unwrap();
    let context = stack.context().unwrap();
    assert!(store_path(dir.path()).exists());

    stack.delete_stack().unwrap();
    assert_eq!(stack.phase(), StackPhase::Deleted);
    assert!(!store_path(dir.path()).exists());
    assert!(!coordinator.is_attached());

    let rebuilt_context = stack.context().unwrap();
    assert_eq!(stack.phase(), StackPhase::Ready);
    assert_eq!(stack.generation(), 2);
    assert!(!Arc::ptr_eq(&model, &stack.model().unwrap()));
    assert!(!Rc::ptr_eq(&coordinator, &stack.coordinator().unwrap()));
    assert!(!Rc::ptr_eq(&context, &rebuilt_context));
    assert!(store_path(dir.path()).exists());
}

#[test]
fn delete_stack_without_store_file_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let mut stack = journal_stack(dir.path());

    stack.delete_stack().unwrap();
    stack.delete_stack().unwrap();
    assert_eq!(stack.phase(), StackPhase::Deleted);
}

#[test]
fn saving_without_changes_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let mut stack = journal_stack(dir.path());
    let context = stack.context().unwrap();

    let before = std::fs::metadata(store_path(dir.path())).unwrap().len();
    assert_eq!(stack.save_context(&context).unwrap(), SaveOutcome::NoChanges);
    let after = std::fs::metadata(store_path(dir.path())).unwrap().len();
    assert_eq!(before, after);
}

#[test]
fn saved_changes_are_visible_to_a_fresh_stack() {
    let dir = tempfile::tempdir().unwrap();
    let mut stack = journal_stack(dir.path());
    let context = stack.context().unwrap();

    let id = context.insert("Note").unwrap();
    context.set(id, "title", "groceries").unwrap();
    let outcome = stack.save_context(&context).unwrap();
    assert!(matches!(outcome, SaveOutcome::Saved(counts) if counts.inserted == 1));
    drop(context);
    drop(stack);

    let mut reopened = journal_stack(dir.path());
    let loaded = reopened.context().unwrap().get(id).unwrap().unwrap();
    assert_eq!(loaded.text("title"), Some("groceries"));
    assert_eq!(loaded.boolean("pinned"), Some(false));
}

#[test]
fn deleted_stack_loses_saved_records() {
    let dir = tempfile::tempdir().unwrap();
    let mut stack = journal_stack(dir.path());
    let context = stack.context().unwrap();

    let id = context.insert("Note").unwrap();
    context.set(id, "title", "ephemeral").unwrap();
    stack.save_context(&context).unwrap();
    stack.delete_stack().unwrap();
    drop(stack);

    let mut reopened = journal_stack(dir.path());
    let context = reopened.context().unwrap();
    assert!(context.get(id).unwrap().is_none());
    assert!(context.fetch_all("Note").unwrap().is_empty());
}

#[test]
fn delete_stack_discards_unsaved_changes_and_detaches_old_handles() {
    let dir = tempfile::tempdir().unwrap();
    let mut stack = journal_stack(dir.path());
    let stale = stack.context().unwrap();
    let id = stale.insert("Note").unwrap();
    stale.set(id, "title", "never saved").unwrap();

    stack.delete_stack().unwrap();
    assert!(!stale.has_changes());

    let late = stale.insert("Note").unwrap();
    stale.set(late, "title", "late").unwrap();
    let err = stack.save_context(&stale).unwrap_err();
    assert!(matches!(
        err,
        StackError::Context(ContextError::Store(StoreError::Detached))
    ));
    assert!(stale.has_changes());
}

#[test]
fn missing_model_file_is_reported_on_access() {
    let dir = tempfile::tempdir().unwrap();
    let config = StackConfig::builder(dir.path().join("absent.json"), dir.path())
        .build()
        .unwrap();
    let mut stack = PersistenceStack::new(config);

    let err = stack.model().unwrap_err();
    assert!(matches!(err, StackError::Model(ModelError::Io { .. })));
    assert_eq!(stack.phase(), StackPhase::Uninitialized);
    assert_eq!(stack.generation(), 0);

    assert!(matches!(
        stack.context().unwrap_err(),
        StackError::Model(ModelError::Io { .. })
    ));
}

#[test]
fn invalid_model_file_is_reported_on_access() {
    let dir = tempfile::tempdir().unwrap();
    let model_path = write_model(dir.path(), "broken.json", "{ not json");
    let config = StackConfig::builder(&model_path, dir.path()).build().unwrap();
    let mut stack = PersistenceStack::new(config);

    assert!(matches!(
        stack.model().unwrap_err(),
        StackError::Model(ModelError::Parse { path: Some(_), .. })
    ));
}

#[test]
fn open_accepts_file_urls() {
    let dir = tempfile::tempdir().unwrap();
    let model_path = write_model(dir.path(), "Journal.json", JOURNAL_MODEL);
    let url = format!("file://{}", model_path.display());

    let mut stack = PersistenceStack::open(&url, dir.path(), "App.sqlite").unwrap();
    stack.coordinator().unwrap();
    assert_eq!(stack.store_path(), Some(dir.path().join("App.sqlite")));
    assert!(dir.path().join("App.sqlite").exists());
}

#[test]
fn in_memory_stack_never_touches_disk() {
    let dir = tempfile::tempdir().unwrap();
    let model_path = write_model(dir.path(), "Journal.json", JOURNAL_MODEL);
    let store_dir = dir.path().join("store");
    let config = StackConfig::builder(&model_path, &store_dir)
        .store_type(StoreType::InMemory)
        .build()
        .unwrap();
    let mut stack = PersistenceStack::new(config);

    let context = stack.context().unwrap();
    let id = context.insert("Tag").unwrap();
    context.set(id, "label", "memory").unwrap();
    stack.save_context(&context).unwrap();
    assert_eq!(stack.coordinator().unwrap().count("Tag").unwrap(), 1);
    assert!(stack.store_path().is_none());
    assert!(!store_dir.exists());

    stack.delete_stack().unwrap();
    assert_eq!(stack.coordinator().unwrap().count("Tag").unwrap(), 0);
}

#[test]
fn failed_rebuild_after_delete_keeps_deleted_phase() {
    let dir = tempfile::tempdir().unwrap();
    let mut stack = journal_stack(dir.path());
    stack.context().unwrap();
    stack.delete_stack().unwrap();

    std::fs::remove_file(dir.path().join("Journal.json")).unwrap();
    assert!(matches!(
        stack.coordinator().unwrap_err(),
        StackError::Model(ModelError::Io { .. })
    ));
    assert_eq!(stack.phase(), StackPhase::Deleted);
    assert_eq!(stack.generation(), 1);

    write_model(dir.path(), "Journal.json", JOURNAL_MODEL);
    stack.coordinator().unwrap();
    assert_eq!(stack.phase(), StackPhase::Ready);
    assert_eq!(stack.generation(), 2);
}
