//! Shared helpers for paths, timestamps and SQL text handling.

use std::path::{Path, PathBuf};

use time::OffsetDateTime;

use crate::error::{Result, StoreError};

/// Gets the cross-platform default database path.
///
/// Returns `{data_dir}/pdfstore/pdfstore.db` where `data_dir` is:
/// - Linux: `~/.local/share`
/// - macOS: `~/Library/Application Support`
/// - Windows: `C:\Users\<user>\AppData\Roaming`
///
/// Falls back to `./pdfstore.db` when no data directory can be determined.
pub fn default_database_path() -> PathBuf {
    match dirs::data_dir() {
        Some(data_dir) => data_dir.join("pdfstore").join("pdfstore.db"),
        None => PathBuf::from("pdfstore.db"),
    }
}

/// Ensures the parent directory of the database file exists.
///
/// # Errors
///
/// Returns a connection error if directory creation fails.
pub fn ensure_database_directory(db_path: &Path) -> Result<()> {
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            StoreError::Connection(format!(
                "Failed to create database directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }
    Ok(())
}

/// Current wall-clock time as milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Escapes LIKE wildcards so user text only ever matches literally.
///
/// Must be paired with `ESCAPE '\'` in the SQL.
pub fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_database_path_names_the_store() {
        let path = default_database_path();
        assert!(path.to_string_lossy().contains("pdfstore"));
        assert!(path.to_string_lossy().ends_with("pdfstore.db"));
    }

    #[test]
    fn ensure_database_directory_creates_nested_parents() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("a").join("b").join("store.db");

        ensure_database_directory(&db_path).unwrap();

        assert!(db_path.parent().unwrap().is_dir());
    }

    #[test]
    fn ensure_database_directory_accepts_bare_file_name() {
        assert!(ensure_database_directory(Path::new("store.db")).is_ok());
    }

    #[test]
    fn now_ms_is_in_milliseconds() {
        let now = now_ms();
        // 2020-01-01 in ms; seconds would be three orders of magnitude smaller
        assert!(now > 1_577_836_800_000);
    }

    #[test]
    fn escape_like_escapes_wildcards_and_backslash() {
        assert_eq!(escape_like("50%_off"), "50\\%\\_off");
        assert_eq!(escape_like("a\\b"), "a\\\\b");
        assert_eq!(escape_like("plain"), "plain");
    }
}
