//! Connection, transaction and statement layers.

mod connection;
mod executor;
mod transaction;

pub use connection::{ConnectionManager, PragmaValue};
pub use executor::{Row, SqlExecutor, SqlValue};
pub use transaction::TransactionManager;
