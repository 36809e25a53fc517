use super::*;
use crate::events::{EventStatus, TableAction, topic};
use crate::query::{Condition, FieldOperator, SortConfig};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};

fn pdf(uuid: &str, title: &str, tags: &[&str]) -> Value {
    json!({
        "uuid": uuid,
        "filename": format!("{uuid}.pdf"),
        "title": title,
        "tags": tags,
    })
}

#[test]
fn open_enables_every_table_in_dependency_order() {
    let store = Store::in_memory().expect("failed to open store");

    let enabled = store.registry().enabled_plugins();

    assert_eq!(enabled.len(), 5);
    assert_eq!(enabled[0], "pdf_info", "parent table must be created first");
    assert_eq!(
        store.registry().installed_version("pdf_annotation").unwrap(),
        Some("1.0.0".to_string())
    );
}

#[test]
fn child_tables_follow_pdf_deletes() {
    let store = Store::in_memory().unwrap();
    let delete_topic = topic("pdf_info", TableAction::Delete, EventStatus::Completed);

    assert_eq!(store.events().listener_count(&delete_topic), 3);
}

#[test]
fn drop_unsubscribes_plugin_handlers() {
    let events = {
        let store = Store::in_memory().unwrap();
        Arc::clone(store.events())
    };
    let delete_topic = topic("pdf_info", TableAction::Delete, EventStatus::Completed);

    assert_eq!(events.listener_count(&delete_topic), 0);
}

#[test]
fn insert_emits_create_event_with_record() {
    let store = Store::in_memory().unwrap();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    store.events().on(
        &topic("pdf_info", TableAction::Create, EventStatus::Completed),
        "test",
        move |event| {
            assert_eq!(event.record_id, "0c251de0e2ac");
            assert_eq!(event.data.as_ref().unwrap()["title"], "Sample");
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
    );

    store
        .pdf_info()
        .insert(&pdf("0c251de0e2ac", "Sample", &["test"]))
        .unwrap();

    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[test]
fn run_saved_search_applies_filter_sort_and_counts_use() {
    let store = Store::in_memory().unwrap();
    store.pdf_info().insert(&pdf("aaaaaaaaaaa1", "One", &["math"])).unwrap();
    store
        .pdf_info()
        .insert(&pdf("aaaaaaaaaaa2", "Two", &["math", "ai", "stats"]))
        .unwrap();
    store.pdf_info().insert(&pdf("aaaaaaaaaaa3", "Three", &["art"])).unwrap();

    let uuid = store
        .search_conditions()
        .insert(&json!({
            "name": "math papers",
            "condition": Condition::field("tags", FieldOperator::HasAny, json!(["math"])),
            "sort_config": SortConfig::Weighted {
                formula: "tags_length()".into(),
                direction: Default::default(),
            },
        }))
        .unwrap();

    let results = store.run_saved_search(&uuid).unwrap();

    let ids: Vec<&str> = results.records.iter().map(|r| r.uuid.as_str()).collect();
    assert_eq!(ids, vec!["aaaaaaaaaaa2", "aaaaaaaaaaa1"]);
    assert_eq!(results.total, 2);
    let saved = store.search_conditions().query_by_id(&uuid).unwrap().unwrap();
    assert_eq!(saved.use_count, 1);
    assert!(saved.last_used_at.is_some());
}

#[test]
fn disabled_saved_search_is_refused() {
    let store = Store::in_memory().unwrap();
    let uuid = store
        .search_conditions()
        .insert(&json!({
            "name": "everything",
            "condition": {"type": "composite", "operator": "AND", "conditions": []},
            "enabled": false
        }))
        .unwrap();

    assert!(matches!(
        store.run_saved_search(&uuid),
        Err(StoreError::Validation(_))
    ));
    assert!(store.run_saved_search("missing").is_err());
}

#[test]
fn table_counts_cover_every_table() {
    let store = Store::in_memory().unwrap();
    store.pdf_info().insert(&pdf("0c251de0e2ac", "Sample", &[])).unwrap();

    let counts = store.table_counts().unwrap();

    assert_eq!(counts.len(), 5);
    assert!(counts.contains(&("pdf_info".to_string(), 1)));
    assert!(counts.contains(&("search_condition".to_string(), 0)));
}

#[test]
fn close_makes_later_calls_fail_with_connection_error() {
    let store = Store::in_memory().unwrap();
    store.close().unwrap();

    assert!(matches!(
        store.pdf_info().count(),
        Err(StoreError::Connection(_))
    ));
}

#[test]
fn open_fails_fast_when_directory_cannot_be_created() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"file").unwrap();

    let result = Store::open(StoreConfig::new(blocker.join("store.db")));

    assert!(matches!(result, Err(StoreError::Connection(_))));
}
