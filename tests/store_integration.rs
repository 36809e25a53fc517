/// Integration tests for the store against real SQLite files and in-memory
/// databases.
///
/// These tests verify:
/// - Record round-trips through the scalar columns and the JSON payload
/// - Validation failures never reach storage
/// - Child rows disappear with their PDF
/// - Nested transactions and save-points
///
/// To run locally:
/// ```bash
/// cargo test --test store_integration
/// ```
use anyhow::Result;
use pdfstore::{RecordTable, Store, StoreConfig, StoreError, TablePlugin};
use serde_json::{Value, json};
use tempfile::tempdir;

fn sample_pdf() -> Value {
    json!({
        "uuid": "0c251de0e2ac",
        "filename": "0c251de0e2ac.pdf",
        "title": "Sample",
        "author": "A. Writer",
        "page_count": 42,
        "tags": ["test", "python", "sqlite", "machine learning"],
        "rating": 4,
        "notes": "chapter 3 is the interesting one",
        "due_date": 1_700_000_000_123_i64
    })
}

#[test]
fn insert_then_query_round_trips_columns_and_payload() -> Result<()> {
    let store = Store::in_memory()?;

    let uuid = store.pdf_info().insert(&sample_pdf())?;
    let record = store
        .pdf_info()
        .query_by_id(&uuid)?
        .expect("record should exist");

    assert_eq!(record.uuid, "0c251de0e2ac");
    assert_eq!(record.title, "Sample");
    assert_eq!(record.author, "A. Writer");
    assert_eq!(record.page_count, 42);
    assert_eq!(record.tags, vec!["test", "python", "sqlite", "machine learning"]);
    assert_eq!(record.rating, 4);
    assert_eq!(record.notes, "chapter 3 is the interesting one");
    assert_eq!(record.due_date, Some(1_700_000_000_123));
    assert_eq!(record.version, 1);
    // Millisecond timestamps
    assert!(record.created_at > 1_000_000_000_000);
    assert_eq!(record.created_at, record.updated_at);
    Ok(())
}

#[test]
fn malformed_payloads_are_rejected_before_any_write() -> Result<()> {
    let store = Store::in_memory()?;

    let mut missing_filename = sample_pdf();
    missing_filename.as_object_mut().unwrap().remove("filename");
    let mut bad_rating = sample_pdf();
    bad_rating["rating"] = json!(6);
    let mut bad_uuid = sample_pdf();
    bad_uuid["uuid"] = json!("NOT-HEX-UUID");
    bad_uuid["filename"] = json!("NOT-HEX-UUID.pdf");
    let mut empty_tag = sample_pdf();
    empty_tag["tags"] = json!(["ok", ""]);
    let mut padded_tag = sample_pdf();
    padded_tag["tags"] = json!([" a"]);

    for raw in [missing_filename, bad_rating, bad_uuid, empty_tag, padded_tag] {
        let err = store.pdf_info().insert(&raw).unwrap_err();
        assert!(
            matches!(err, StoreError::Validation(_)),
            "expected validation error for {raw}, got {err:?}"
        );
    }

    assert_eq!(store.table_counts()?[0], ("pdf_info".to_string(), 0));
    Ok(())
}

#[test]
fn duplicate_uuid_is_a_constraint_error() -> Result<()> {
    let store = Store::in_memory()?;
    store.pdf_info().insert(&sample_pdf())?;

    let err = store.pdf_info().insert(&sample_pdf()).unwrap_err();

    assert!(matches!(err, StoreError::Constraint { .. }), "got {err:?}");
    assert!(err.is_caller_error());
    Ok(())
}

#[test]
fn update_bumps_version_and_keeps_identity() -> Result<()> {
    let store = Store::in_memory()?;
    let uuid = store.pdf_info().insert(&sample_pdf())?;
    let before = store.pdf_info().query_by_id(&uuid)?.unwrap();

    let after = store
        .pdf_info()
        .update(&uuid, &json!({"title": "Renamed", "rating": 5}))?;

    assert_eq!(after.title, "Renamed");
    assert_eq!(after.rating, 5);
    assert_eq!(after.version, before.version + 1);
    assert_eq!(after.created_at, before.created_at);
    assert!(after.updated_at >= before.updated_at);
    assert_eq!(after.tags, before.tags);

    let rejected = store.pdf_info().update(&uuid, &json!({"rating": 9}));
    assert!(matches!(rejected, Err(StoreError::Validation(_))));
    assert_eq!(store.pdf_info().query_by_id(&uuid)?.unwrap().rating, 5);
    Ok(())
}

#[test]
fn deleting_a_pdf_removes_every_child_row() -> Result<()> {
    let store = Store::in_memory()?;
    let uuid = store.pdf_info().insert(&sample_pdf())?;

    store.annotations().insert(&json!({
        "pdf_uuid": uuid,
        "page_number": 3,
        "type": "text-highlight",
        "data": {
            "selectedText": "ownership",
            "textRanges": [{"start": 10, "end": 19}],
            "highlightColor": "#ffcc00"
        }
    }))?;
    store.annotations().insert(&json!({
        "pdf_uuid": uuid,
        "page_number": 1,
        "type": "comment",
        "data": {"position": {"x": 12, "y": 40}, "content": "check this"}
    }))?;
    store.bookmarks().save_bookmarks(
        &uuid,
        &[json!({
            "name": "Part I",
            "type": "page",
            "pageNumber": 1,
            "children": [{"name": "Chapter 1", "type": "page", "pageNumber": 2}]
        })],
    )?;
    store.bookanchors().insert(&json!({
        "pdf_uuid": uuid,
        "page_at": 7,
        "position": 0.25,
        "name": "resume here"
    }))?;

    assert_eq!(store.annotations().count_by_pdf(&uuid)?, 2);
    assert_eq!(store.bookmarks().query_by_pdf(&uuid)?.len(), 2);
    assert_eq!(store.bookanchors().query_by_pdf(&uuid)?.len(), 1);

    assert!(store.pdf_info().delete(&uuid)?);

    assert_eq!(store.annotations().count()?, 0);
    assert_eq!(store.bookmarks().count()?, 0);
    assert_eq!(store.bookanchors().count()?, 0);
    assert!(!store.pdf_info().delete(&uuid)?);
    Ok(())
}

#[test]
fn delete_events_clean_up_children_without_foreign_keys() -> Result<()> {
    let store = Store::in_memory()?;
    store
        .connections()
        .execute_pragma("foreign_keys", Some("OFF".into()))?;
    assert_eq!(
        store.connections().execute_pragma("foreign_keys", None)?,
        Some(json!(0))
    );
    let uuid = store.pdf_info().insert(&sample_pdf())?;

    store.annotations().insert(&json!({
        "pdf_uuid": uuid,
        "page_number": 1,
        "type": "comment",
        "data": {"position": {"x": 12, "y": 40}, "content": "check this"}
    }))?;
    store.bookmarks().save_bookmarks(
        &uuid,
        &[json!({
            "name": "Part I",
            "type": "page",
            "pageNumber": 1,
            "children": [{"name": "Chapter 1", "type": "page", "pageNumber": 2}]
        })],
    )?;
    store.bookanchors().insert(&json!({
        "pdf_uuid": uuid,
        "page_at": 7,
        "name": "resume here"
    }))?;

    assert!(store.pdf_info().delete(&uuid)?);

    assert_eq!(store.annotations().count()?, 0);
    assert_eq!(store.bookmarks().count()?, 0);
    assert_eq!(store.bookanchors().count()?, 0);
    Ok(())
}

#[test]
fn child_rows_require_an_existing_pdf() -> Result<()> {
    let store = Store::in_memory()?;

    let err = store
        .bookanchors()
        .insert(&json!({"pdf_uuid": "ffffffffffff", "page_at": 1, "name": "orphan"}))
        .unwrap_err();

    assert!(matches!(err, StoreError::Constraint { .. }), "got {err:?}");
    Ok(())
}

#[test]
fn inner_rollback_discards_only_the_savepoint() -> Result<()> {
    let store = Store::in_memory()?;
    let tx = store.transactions();

    tx.begin()?;
    tx.begin()?;
    store.pdf_info().insert(&json!({"uuid": "aaaaaaaaaaaa", "filename": "aaaaaaaaaaaa.pdf"}))?;
    tx.rollback();
    store.pdf_info().insert(&json!({"uuid": "bbbbbbbbbbbb", "filename": "bbbbbbbbbbbb.pdf"}))?;
    tx.commit()?;
    tx.commit()?;

    let ids: Vec<String> = store
        .pdf_info()
        .query_all()?
        .into_iter()
        .map(|r| r.uuid)
        .collect();
    assert_eq!(ids, vec!["bbbbbbbbbbbb"]);
    assert!(!tx.in_transaction());
    Ok(())
}

#[test]
fn failed_closure_rolls_back_the_whole_transaction() -> Result<()> {
    let store = Store::in_memory()?;

    let outcome: pdfstore::Result<()> = store.transactions().transaction(|| {
        store.pdf_info().insert(&sample_pdf())?;
        Err(StoreError::validation("abort"))
    });

    assert!(outcome.is_err());
    assert_eq!(store.pdf_info().count()?, 0);
    Ok(())
}

#[test]
fn file_backed_store_persists_across_reopen() -> Result<()> {
    let temp_dir = tempdir()?;
    let db_path = temp_dir.path().join("nested").join("library.db");

    {
        let store = Store::open(StoreConfig::new(&db_path))?;
        store.pdf_info().insert(&sample_pdf())?;
        store.pdf_info().add_tag("0c251de0e2ac", "rust")?;
        store.close()?;
    }
    assert!(db_path.exists(), "database file should be created with its directory");

    let store = Store::open(StoreConfig::new(&db_path))?;
    let record = store.pdf_info().query_by_id("0c251de0e2ac")?.unwrap();
    assert_eq!(record.tags, vec!["test", "python", "sqlite", "machine learning", "rust"]);
    assert_eq!(
        store.registry().installed_version("pdf_info")?,
        Some("1.0.0".to_string())
    );
    Ok(())
}
