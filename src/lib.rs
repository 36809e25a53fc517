//! Embedded storage for PDF metadata, annotations, bookmarks, reading
//! anchors and saved searches on a single SQLite file.

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod models;
pub mod plugin;
pub mod query;
pub mod registry;
pub mod store;
pub mod tables;
pub mod utils;

pub use config::StoreConfig;
pub use error::{ConstraintKind, Result, StoreError};
pub use events::{EventBus, EventStatus, TableAction, TableEvent};
pub use models::{Annotation, Bookanchor, Bookmark, FlatBookmark, IdKind, PdfInfo, SearchCondition};
pub use plugin::{RecordTable, TablePlugin};
pub use query::{Condition, SearchRequest, SortConfig};
pub use store::Store;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_accessible_from_crate_root() {
        let store = Store::in_memory();
        assert!(store.is_ok());
    }

    #[test]
    fn types_accessible_from_crate_root() {
        let config = StoreConfig::memory();
        assert!(config.is_memory());

        let err = StoreError::validation("bad");
        assert!(err.is_caller_error());

        assert!(IdKind::PdfUuid.matches("0c251de0e2ac"));
        assert_eq!(SortConfig::default(), SortConfig::Unsorted);
    }
}
