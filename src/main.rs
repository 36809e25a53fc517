use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use pdfstore::query::{FieldOperator, LogicalOperator};
use pdfstore::{Condition, RecordTable, SearchRequest, Store, StoreConfig, StoreError};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

/// pdfstore - embedded PDF metadata store
#[derive(Parser)]
#[command(name = "pdfstore")]
#[command(about = "Manage PDF metadata, tags and saved searches in a local store")]
#[command(version)]
struct Cli {
    /// Database file (defaults to PDFSTORE_DB_PATH or the data directory)
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Register a PDF by its uuid
    Add(AddCommand),
    /// Print one PDF record
    Show {
        /// 12-character hex uuid
        uuid: String,
    },
    /// List stored PDFs, most recently updated first
    List {
        /// Maximum number of records to print
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Search PDFs by keywords and filters
    Search(SearchCommand),
    /// Delete a PDF and everything attached to it
    Delete {
        uuid: String,
    },
    /// Add or remove tags
    #[command(subcommand)]
    Tag(TagCommand),
    /// Print row counts per table
    Stats,
}

/// Register a PDF
#[derive(Args)]
struct AddCommand {
    /// 12-character hex uuid; the file is expected to be `<uuid>.pdf`
    #[arg(value_name = "UUID")]
    uuid: String,

    #[arg(long)]
    title: Option<String>,

    #[arg(long)]
    author: Option<String>,

    /// Comma-separated tags
    #[arg(short, long, value_name = "TAGS")]
    tags: Option<String>,

    #[arg(long)]
    pages: Option<i64>,

    /// Rating from 0 to 5
    #[arg(long)]
    rating: Option<i64>,
}

/// Search PDFs
#[derive(Args)]
struct SearchCommand {
    /// Keywords; each must match title, author, filename, notes, subject,
    /// keywords or a tag
    #[arg(value_name = "TOKENS")]
    tokens: Vec<String>,

    /// Comma-separated tags that must all be present
    #[arg(long, value_name = "TAGS")]
    tags_all: Option<String>,

    #[arg(long)]
    min_rating: Option<i64>,

    #[arg(short, long)]
    limit: Option<usize>,
}

#[derive(Subcommand)]
enum TagCommand {
    /// Attach a tag to a PDF
    Add { uuid: String, tag: String },
    /// Detach a tag from a PDF
    Remove { uuid: String, tag: String },
}

fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        // Determine exit code based on error type
        let exit_code = if is_user_error(&e) { 1 } else { 2 };
        eprintln!("Error: {e:#}");
        std::process::exit(exit_code);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = match cli.db {
        Some(path) => StoreConfig {
            path,
            ..StoreConfig::from_env()
        },
        None => StoreConfig::from_env(),
    };
    let store = Store::open(config).context("Failed to open store")?;

    match cli.command {
        Commands::Add(cmd) => handle_add(&store, &cmd),
        Commands::Show { uuid } => {
            let record = store
                .pdf_info()
                .query_by_id(&uuid)?
                .ok_or_else(|| StoreError::validation(format!("no PDF with uuid {uuid}")))?;
            print_json(&record)
        }
        Commands::List { limit } => {
            let request = SearchRequest {
                limit,
                ..SearchRequest::default()
            };
            print_json(&store.pdf_info().search(&request)?.records)
        }
        Commands::Search(cmd) => handle_search(&store, &cmd),
        Commands::Delete { uuid } => {
            if !store.pdf_info().delete(&uuid)? {
                return Err(StoreError::validation(format!("no PDF with uuid {uuid}")).into());
            }
            println!("Deleted {uuid}");
            Ok(())
        }
        Commands::Tag(TagCommand::Add { uuid, tag }) => {
            print_json(&store.pdf_info().add_tag(&uuid, &tag)?.tags)
        }
        Commands::Tag(TagCommand::Remove { uuid, tag }) => {
            print_json(&store.pdf_info().remove_tag(&uuid, &tag)?.tags)
        }
        Commands::Stats => {
            let counts: Map<String, Value> = store
                .table_counts()?
                .into_iter()
                .map(|(table, count)| (table, Value::from(count)))
                .collect();
            print_json(&counts)
        }
    }
}

/// Handles the add command by inserting a new PDF record.
fn handle_add(store: &Store, cmd: &AddCommand) -> Result<()> {
    let mut raw = json!({
        "uuid": cmd.uuid,
        "filename": format!("{}.pdf", cmd.uuid),
        "tags": cmd.tags.as_deref().map(parse_tags).unwrap_or_default(),
    });
    if let Some(title) = &cmd.title {
        raw["title"] = json!(title);
    }
    if let Some(author) = &cmd.author {
        raw["author"] = json!(author);
    }
    if let Some(pages) = cmd.pages {
        raw["page_count"] = json!(pages);
    }
    if let Some(rating) = cmd.rating {
        raw["rating"] = json!(rating);
    }

    let uuid = store
        .pdf_info()
        .insert(&raw)
        .context("Failed to add PDF")?;
    println!("PDF added (uuid: {uuid})");
    Ok(())
}

/// Builds a search request from CLI flags and prints the matches.
fn handle_search(store: &Store, cmd: &SearchCommand) -> Result<()> {
    let mut filters = Vec::new();
    if let Some(tags) = cmd.tags_all.as_deref() {
        filters.push(Condition::field("tags", FieldOperator::HasAll, json!(parse_tags(tags))));
    }
    if let Some(min) = cmd.min_rating {
        filters.push(Condition::field("rating", FieldOperator::Gte, json!(min)));
    }

    let request = SearchRequest {
        tokens: cmd.tokens.clone(),
        filter: (!filters.is_empty()).then(|| Condition::composite(LogicalOperator::And, filters)),
        limit: cmd.limit,
        ..SearchRequest::default()
    };
    let results = store.pdf_info().search(&request).context("Search failed")?;
    eprintln!("{} match(es)", results.total);
    print_json(&results.records)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Determines if an error is a user error (vs internal error).
///
/// User errors are validation failures and constraint conflicts.
/// Internal errors include database failures and I/O errors.
fn is_user_error(error: &anyhow::Error) -> bool {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<StoreError>())
        .is_some_and(StoreError::is_caller_error)
}

/// Parses comma-separated tags from a string.
///
/// Splits on commas, trims whitespace from each tag, and filters out empty strings.
fn parse_tags(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tags_with_whitespace_and_empty_elements() {
        assert_eq!(parse_tags(" rust ,, learning, "), vec!["rust", "learning"]);
        assert!(parse_tags("  ,  ").is_empty());
    }

    #[test]
    fn validation_errors_are_user_errors() {
        let err = anyhow::Error::from(StoreError::validation("bad rating")).context("Failed to add PDF");
        assert!(is_user_error(&err));

        let err = anyhow::Error::from(StoreError::Query("no such table".into()));
        assert!(!is_user_error(&err));
    }

    #[test]
    fn add_then_search_by_tag() {
        let store = Store::in_memory().unwrap();
        let cmd = AddCommand {
            uuid: "0c251de0e2ac".into(),
            title: Some("Sample".into()),
            author: None,
            tags: Some("test, python".into()),
            pages: Some(12),
            rating: Some(4),
        };
        handle_add(&store, &cmd).unwrap();

        let search = SearchCommand {
            tokens: vec![],
            tags_all: Some("python,test".into()),
            min_rating: Some(3),
            limit: None,
        };
        assert!(handle_search(&store, &search).is_ok());
        assert_eq!(store.pdf_info().search_records(&["python"]).unwrap().len(), 1);
    }

    #[test]
    fn add_rejects_bad_rating() {
        let store = Store::in_memory().unwrap();
        let cmd = AddCommand {
            uuid: "0c251de0e2ac".into(),
            title: None,
            author: None,
            tags: None,
            pages: None,
            rating: Some(9),
        };
        let err = handle_add(&store, &cmd).unwrap_err();
        assert!(is_user_error(&err));
    }
}
