//! The table plugins.

mod annotation;
mod bookanchor;
mod bookmark;
mod pdf_info;
mod search_condition;

pub use annotation::AnnotationTable;
pub use bookanchor::BookanchorTable;
pub use bookmark::BookmarkTable;
pub use pdf_info::{PdfInfoTable, SearchResults};
pub use search_condition::SearchConditionTable;

use crate::db::SqlValue;
use crate::events::{EventStatus, TableAction, topic};
use crate::plugin::PluginContext;

pub(crate) fn text(value: impl Into<String>) -> SqlValue {
    SqlValue::Text(value.into())
}

pub(crate) fn optional_int(value: Option<i64>) -> SqlValue {
    value.map_or(SqlValue::Null, SqlValue::Integer)
}

/// Subscribes a child table's `delete_by_pdf` to PDF deletions.
pub(crate) fn follow_pdf_deletes<F>(ctx: &PluginContext, subscriber: &str, cleanup: F)
where
    F: Fn(&str) -> crate::error::Result<usize> + Send + Sync + 'static,
{
    let subscriber_name = subscriber.to_string();
    ctx.events.on(
        &pdf_delete_topic(),
        subscriber,
        move |event| {
            let removed = cleanup(&event.record_id)?;
            if removed > 0 {
                tracing::info!(table = %subscriber_name, pdf_uuid = %event.record_id, removed, "cascade cleanup");
            }
            Ok(())
        },
    );
}

pub(crate) fn pdf_delete_topic() -> String {
    topic(pdf_info::TABLE, TableAction::Delete, EventStatus::Completed)
}
