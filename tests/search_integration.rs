/// Integration tests for PDF search: keyword tokens, tag-set filters,
/// composite conditions, sorting and paging.
///
/// To run locally:
/// ```bash
/// cargo test --test search_integration
/// ```
use anyhow::Result;
use pdfstore::query::{FieldOperator, LogicalOperator, SortDirection, SortField};
use pdfstore::{Condition, RecordTable, SearchRequest, SortConfig, Store};
use serde_json::json;

fn add_pdf(store: &Store, uuid: &str, title: &str, tags: &[&str], rating: i64) -> Result<()> {
    store.pdf_info().insert(&json!({
        "uuid": uuid,
        "filename": format!("{uuid}.pdf"),
        "title": title,
        "tags": tags,
        "rating": rating,
    }))?;
    Ok(())
}

fn ids(store: &Store, request: &SearchRequest) -> Result<Vec<String>> {
    Ok(store
        .pdf_info()
        .search(request)?
        .records
        .into_iter()
        .map(|r| r.uuid)
        .collect())
}

fn sorted(mut ids: Vec<String>) -> Vec<String> {
    ids.sort();
    ids
}

fn tag_library() -> Result<Store> {
    let store = Store::in_memory()?;
    add_pdf(&store, "aaaaaaaaaaa1", "Linear Algebra", &["math"], 3)?;
    add_pdf(&store, "aaaaaaaaaaa2", "Learning Theory", &["math", "ai", "stats"], 5)?;
    add_pdf(&store, "aaaaaaaaaaa3", "Deep Nets", &["ai", "math"], 4)?;
    add_pdf(&store, "aaaaaaaaaaa4", "Painting", &["art"], 1)?;
    Ok(store)
}

#[test]
fn keyword_search_finds_tagged_sample() -> Result<()> {
    let store = Store::in_memory()?;
    add_pdf(&store, "0c251de0e2ac", "Sample", &["test", "python"], 0)?;

    let hits = store.pdf_info().search_records(&["test"])?;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].uuid, "0c251de0e2ac");
    assert_eq!(hits[0].title, "Sample");

    assert!(store.pdf_info().search_records(&["missing"])?.is_empty());
    Ok(())
}

#[test]
fn every_token_must_match_some_field() -> Result<()> {
    let store = tag_library()?;

    assert_eq!(
        store.pdf_info().search_records(&["learning", "stats"])?.len(),
        1
    );
    assert!(store.pdf_info().search_records(&["learning", "art"])?.is_empty());
    // Case-insensitive
    assert_eq!(store.pdf_info().search_records(&["DEEP"])?.len(), 1);
    Ok(())
}

#[test]
fn like_wildcards_in_tokens_are_literal() -> Result<()> {
    let store = Store::in_memory()?;
    add_pdf(&store, "bbbbbbbbbbb1", "100% Rust", &[], 0)?;
    add_pdf(&store, "bbbbbbbbbbb2", "Rust in Action", &[], 0)?;

    let hits = store.pdf_info().search_records(&["100%"])?;
    assert_eq!(hits.len(), 1);
    assert!(store.pdf_info().search_records(&["_"])?.is_empty());
    Ok(())
}

#[test]
fn has_all_requires_a_superset() -> Result<()> {
    let store = tag_library()?;

    let request = SearchRequest::default().with_filter(Condition::field(
        "tags",
        FieldOperator::HasAll,
        json!(["ai", "math"]),
    ));

    assert_eq!(
        sorted(ids(&store, &request)?),
        vec!["aaaaaaaaaaa2", "aaaaaaaaaaa3"]
    );
    Ok(())
}

#[test]
fn has_any_requires_a_shared_tag() -> Result<()> {
    let store = tag_library()?;

    let request = SearchRequest::default().with_filter(Condition::field(
        "tags",
        FieldOperator::HasAny,
        json!(["art", "stats"]),
    ));

    assert_eq!(
        sorted(ids(&store, &request)?),
        vec!["aaaaaaaaaaa2", "aaaaaaaaaaa4"]
    );

    let nothing = SearchRequest::default().with_filter(Condition::field(
        "tags",
        FieldOperator::HasAny,
        json!([]),
    ));
    assert!(ids(&store, &nothing)?.is_empty());
    Ok(())
}

#[test]
fn eq_on_tags_is_set_equality() -> Result<()> {
    let store = tag_library()?;

    let request = SearchRequest::default().with_filter(Condition::field(
        "tags",
        FieldOperator::Eq,
        json!(["math", "ai"]),
    ));

    assert_eq!(ids(&store, &request)?, vec!["aaaaaaaaaaa3"]);
    Ok(())
}

#[test]
fn not_has_all_excludes_supersets() -> Result<()> {
    let store = tag_library()?;

    let request = SearchRequest::default().with_filter(Condition::field(
        "tags",
        FieldOperator::NotHasAll,
        json!(["ai", "math"]),
    ));

    assert_eq!(
        sorted(ids(&store, &request)?),
        vec!["aaaaaaaaaaa1", "aaaaaaaaaaa4"]
    );
    Ok(())
}

#[test]
fn composite_conditions_combine_tokens_and_filters() -> Result<()> {
    let store = tag_library()?;

    let filter = Condition::composite(
        LogicalOperator::And,
        vec![
            Condition::field("tags", FieldOperator::HasAny, json!(["math"])),
            Condition::composite(
                LogicalOperator::Not,
                vec![Condition::field("rating", FieldOperator::Lt, json!(4))],
            ),
        ],
    );
    let request = SearchRequest::default().with_filter(filter);
    assert_eq!(
        sorted(ids(&store, &request)?),
        vec!["aaaaaaaaaaa2", "aaaaaaaaaaa3"]
    );

    let narrowed = SearchRequest {
        tokens: vec!["deep".into()],
        ..request
    };
    assert_eq!(ids(&store, &narrowed)?, vec!["aaaaaaaaaaa3"]);
    Ok(())
}

#[test]
fn weighted_tag_count_sorts_descending() -> Result<()> {
    let store = Store::in_memory()?;
    add_pdf(&store, "ccccccccccc1", "One", &["a"], 0)?;
    add_pdf(&store, "ccccccccccc3", "Three", &["a", "b", "c"], 0)?;
    add_pdf(&store, "ccccccccccc2", "Two", &["a", "b"], 0)?;

    let request = SearchRequest::default().with_sort(SortConfig::Weighted {
        formula: "tags_length()".into(),
        direction: SortDirection::Desc,
    });

    assert_eq!(
        ids(&store, &request)?,
        vec!["ccccccccccc3", "ccccccccccc2", "ccccccccccc1"]
    );
    Ok(())
}

#[test]
fn malformed_weighted_formula_is_rejected() -> Result<()> {
    let store = tag_library()?;

    let request = SearchRequest::default().with_sort(SortConfig::Weighted {
        formula: "rating; DROP TABLE pdf_info".into(),
        direction: SortDirection::Desc,
    });

    assert!(matches!(
        store.pdf_info().search(&request),
        Err(pdfstore::StoreError::Validation(_))
    ));
    assert_eq!(store.pdf_info().query_all()?.len(), 4);
    Ok(())
}

#[test]
fn weighted_formula_with_unlisted_names_returns_rows_unranked() -> Result<()> {
    let store = Store::in_memory()?;
    add_pdf(&store, "ddddddddddd1", "One", &["a"], 0)?;
    add_pdf(&store, "ddddddddddd2", "Two", &["a", "b"], 0)?;
    let fetch_order = ids(&store, &SearchRequest::default())?;

    let request = SearchRequest::default().with_sort(SortConfig::Weighted {
        formula: "secret + tags_length()".into(),
        direction: SortDirection::Desc,
    });
    let results = store.pdf_info().search(&request)?;

    let got: Vec<String> = results.records.into_iter().map(|r| r.uuid).collect();
    assert_eq!(got, fetch_order);
    assert_eq!(results.total, 2);
    Ok(())
}

#[test]
fn multi_field_sort_with_paging() -> Result<()> {
    let store = tag_library()?;

    let request = SearchRequest {
        sort: SortConfig::MultiField {
            fields: vec![SortField {
                field: "rating".into(),
                direction: SortDirection::Desc,
            }],
        },
        limit: Some(2),
        offset: 1,
        ..SearchRequest::default()
    };
    let results = store.pdf_info().search(&request)?;

    let got: Vec<&str> = results.records.iter().map(|r| r.uuid.as_str()).collect();
    assert_eq!(got, vec!["aaaaaaaaaaa3", "aaaaaaaaaaa1"]);
    assert_eq!(results.total, 4);
    Ok(())
}

#[test]
fn manual_order_puts_listed_ids_first() -> Result<()> {
    let store = tag_library()?;

    let request = SearchRequest::default().with_sort(SortConfig::Manual {
        order: vec!["aaaaaaaaaaa4".into(), "aaaaaaaaaaa1".into()],
    });
    let got = ids(&store, &request)?;

    assert_eq!(got.len(), 4);
    assert_eq!(&got[..2], ["aaaaaaaaaaa4", "aaaaaaaaaaa1"]);
    Ok(())
}

#[test]
fn unknown_filter_field_is_a_validation_error() -> Result<()> {
    let store = tag_library()?;

    let request = SearchRequest::default().with_filter(Condition::field(
        "1=1; --",
        FieldOperator::Eq,
        json!(1),
    ));

    assert!(matches!(
        store.pdf_info().search(&request),
        Err(pdfstore::StoreError::Validation(_))
    ));
    Ok(())
}
