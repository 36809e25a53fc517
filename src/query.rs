//! PDF search: filter trees, the SQL compiler, in-memory sorting and the
//! weighted-sort formula language.

mod compiler;
pub mod fields;
mod filter;
mod formula;
mod sort;

pub use compiler::{
    CompiledQuery, DEFAULT_ORDER_BY, SearchRequest, check_condition, compile, compile_condition,
    order_by_sql,
};
pub use filter::{
    CompositeCondition, Condition, FieldCondition, FieldOperator, FuzzyCondition,
    LogicalOperator, MatchMode, SortConfig, SortDirection, SortField,
};
pub use formula::{ALLOWED_IDENTIFIERS, Formula, FormulaError};
pub use sort::sort_records;
