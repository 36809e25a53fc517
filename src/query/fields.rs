//! Catalog of PDF record fields the query layer may touch.
//!
//! Every SQL fragment that names a column comes from this table, so user
//! input never reaches the statement text.

/// How a field is stored and compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Number,
    Boolean,
    Text,
    /// JSON array of strings
    Tags,
}

/// One queryable field.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    /// SQL expression producing the field's value
    pub sql: &'static str,
    pub kind: FieldKind,
    /// Can be used in a SQL `ORDER BY`
    pub orderable: bool,
    /// Can be matched by free-text tokens
    pub searchable: bool,
}

const fn field(
    name: &'static str,
    sql: &'static str,
    kind: FieldKind,
    orderable: bool,
    searchable: bool,
) -> FieldSpec {
    FieldSpec {
        name,
        sql,
        kind,
        orderable,
        searchable,
    }
}

/// Path of the tags array inside the payload column.
pub const TAGS_PATH: &str = "$.tags";

pub const PDF_FIELDS: &[FieldSpec] = &[
    field("uuid", "pdf_info.uuid", FieldKind::Text, true, false),
    field("title", "pdf_info.title", FieldKind::Text, true, true),
    field("author", "pdf_info.author", FieldKind::Text, true, true),
    field("page_count", "pdf_info.page_count", FieldKind::Number, true, false),
    field("file_size", "pdf_info.file_size", FieldKind::Number, true, false),
    field("created_at", "pdf_info.created_at", FieldKind::Number, true, false),
    field("updated_at", "pdf_info.updated_at", FieldKind::Number, true, false),
    field("visited_at", "pdf_info.visited_at", FieldKind::Number, true, false),
    field("version", "pdf_info.version", FieldKind::Number, true, false),
    field(
        "filename",
        "json_extract(pdf_info.json_data, '$.filename')",
        FieldKind::Text,
        true,
        true,
    ),
    field(
        "filepath",
        "json_extract(pdf_info.json_data, '$.filepath')",
        FieldKind::Text,
        true,
        false,
    ),
    field(
        "subject",
        "json_extract(pdf_info.json_data, '$.subject')",
        FieldKind::Text,
        true,
        true,
    ),
    field(
        "keywords",
        "json_extract(pdf_info.json_data, '$.keywords')",
        FieldKind::Text,
        true,
        true,
    ),
    field(
        "notes",
        "json_extract(pdf_info.json_data, '$.notes')",
        FieldKind::Text,
        true,
        true,
    ),
    field(
        "rating",
        "json_extract(pdf_info.json_data, '$.rating')",
        FieldKind::Number,
        true,
        false,
    ),
    field(
        "is_visible",
        "json_extract(pdf_info.json_data, '$.is_visible')",
        FieldKind::Boolean,
        true,
        false,
    ),
    field(
        "total_reading_time",
        "json_extract(pdf_info.json_data, '$.total_reading_time')",
        FieldKind::Number,
        true,
        false,
    ),
    field(
        "review_count",
        "json_extract(pdf_info.json_data, '$.review_count')",
        FieldKind::Number,
        true,
        false,
    ),
    field(
        "due_date",
        "json_extract(pdf_info.json_data, '$.due_date')",
        FieldKind::Number,
        true,
        false,
    ),
    field(
        "last_accessed_at",
        "json_extract(pdf_info.json_data, '$.last_accessed_at')",
        FieldKind::Number,
        true,
        false,
    ),
    field("tags", "pdf_info.json_data", FieldKind::Tags, false, true),
];

/// Looks up a field by name.
pub fn lookup(name: &str) -> Option<&'static FieldSpec> {
    PDF_FIELDS.iter().find(|f| f.name == name)
}

/// Fields free-text tokens are matched against when no allow-list is given.
pub fn default_search_fields() -> Vec<&'static FieldSpec> {
    PDF_FIELDS.iter().filter(|f| f.searchable).collect()
}
