//! Composition root: one connection, the shared managers, and every table
//! plugin wired together.

use std::sync::Arc;

use tracing::info;

use crate::config::StoreConfig;
use crate::db::{ConnectionManager, SqlExecutor, TransactionManager};
use crate::error::{Result, StoreError};
use crate::events::EventBus;
use crate::plugin::{PluginContext, RecordTable, TablePlugin};
use crate::query::SearchRequest;
use crate::registry::TablePluginRegistry;
use crate::tables::{
    AnnotationTable, BookanchorTable, BookmarkTable, PdfInfoTable, SearchConditionTable,
    SearchResults,
};

/// An open PDF metadata store.
///
/// Every plugin is enabled on open. Dropping the store unsubscribes the
/// plugins' event handlers; the connection closes with the last handle.
///
/// # Examples
///
/// ```
/// use pdfstore::{RecordTable, Store};
/// use serde_json::json;
///
/// let store = Store::in_memory().unwrap();
/// store.pdf_info().insert(&json!({
///     "uuid": "0c251de0e2ac",
///     "filename": "0c251de0e2ac.pdf",
///     "title": "Sample",
///     "tags": ["test", "python"]
/// })).unwrap();
///
/// let hits = store.pdf_info().search_records(&["test"]).unwrap();
/// assert_eq!(hits.len(), 1);
/// ```
pub struct Store {
    connections: Arc<ConnectionManager>,
    transactions: Arc<TransactionManager>,
    events: Arc<EventBus>,
    registry: TablePluginRegistry,
    pdf_info: PdfInfoTable,
    annotations: AnnotationTable,
    bookmarks: BookmarkTable,
    bookanchors: BookanchorTable,
    search_conditions: SearchConditionTable,
}

impl Store {
    /// Opens (creating if needed) the store described by `config`.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let connections = Arc::new(ConnectionManager::new(config));
        // Fail fast on a bad path instead of on first use
        connections.with_connection(|_| Ok(()))?;

        let executor = SqlExecutor::new(Arc::clone(&connections));
        let transactions = Arc::new(TransactionManager::new(executor.clone()));
        let events = Arc::new(EventBus::new());
        let ctx = PluginContext::new(executor.clone(), Arc::clone(&transactions), Arc::clone(&events));

        let store = Self {
            registry: TablePluginRegistry::new(executor),
            pdf_info: PdfInfoTable::new(ctx.clone()),
            annotations: AnnotationTable::new(ctx.clone()),
            bookmarks: BookmarkTable::new(ctx.clone()),
            bookanchors: BookanchorTable::new(ctx.clone()),
            search_conditions: SearchConditionTable::new(ctx),
            connections,
            transactions,
            events,
        };

        let plugins: [Arc<dyn TablePlugin>; 5] = [
            Arc::new(store.annotations.clone()),
            Arc::new(store.bookmarks.clone()),
            Arc::new(store.bookanchors.clone()),
            Arc::new(store.search_conditions.clone()),
            Arc::new(store.pdf_info.clone()),
        ];
        for plugin in plugins {
            store.registry.register(plugin)?;
        }
        let enabled = store.registry.enable_all()?;
        info!(path = %store.connections.config().path.display(), tables = enabled.len(), "store opened");
        Ok(store)
    }

    /// A private in-memory store.
    pub fn in_memory() -> Result<Self> {
        Self::open(StoreConfig::memory())
    }

    pub fn pdf_info(&self) -> &PdfInfoTable {
        &self.pdf_info
    }

    pub fn annotations(&self) -> &AnnotationTable {
        &self.annotations
    }

    pub fn bookmarks(&self) -> &BookmarkTable {
        &self.bookmarks
    }

    pub fn bookanchors(&self) -> &BookanchorTable {
        &self.bookanchors
    }

    pub fn search_conditions(&self) -> &SearchConditionTable {
        &self.search_conditions
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn transactions(&self) -> &Arc<TransactionManager> {
        &self.transactions
    }

    pub fn registry(&self) -> &TablePluginRegistry {
        &self.registry
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Runs a saved search against the PDF table and counts the use.
    pub fn run_saved_search(&self, uuid: &str) -> Result<SearchResults> {
        let saved = self
            .search_conditions
            .query_by_id(uuid)?
            .ok_or_else(|| StoreError::validation(format!("search condition not found: {uuid}")))?;
        if !saved.enabled {
            return Err(StoreError::validation(format!(
                "search condition is disabled: {}",
                saved.name
            )));
        }

        let request = SearchRequest {
            filter: Some(saved.condition),
            sort: saved.sort_config.unwrap_or_default(),
            ..SearchRequest::default()
        };
        let results = self.pdf_info.search(&request)?;
        self.search_conditions.record_use(uuid)?;
        Ok(results)
    }

    /// Row counts of every enabled table, in enable order.
    pub fn table_counts(&self) -> Result<Vec<(String, i64)>> {
        self.registry
            .enabled_plugins()
            .into_iter()
            .filter_map(|name| self.registry.get(&name).map(|plugin| (name, plugin)))
            .map(|(name, plugin)| Ok((name, plugin.count()?)))
            .collect()
    }

    /// Unsubscribes every plugin and closes the connection.
    pub fn close(&self) -> Result<()> {
        self.registry.disable_all();
        self.connections.close_all()
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        self.registry.disable_all();
    }
}

#[cfg(test)]
#[path = "store/tests.rs"]
mod tests;
