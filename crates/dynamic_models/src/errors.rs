#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Field {field} allows NULL and cannot be changed to NOT NULL")]
    NullFieldChanged { field: String },

    #[error("{0:?} is not a valid field name")]
    InvalidFieldName(String),

    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("{0:?} is not a valid model name")]
    InvalidModelName(String),

    /// A dynamic model was requested from a schema which was never saved.
    #[error("Model schema {0:?} has not been saved")]
    UnsavedSchema(String),

    /// The definition behind a model changed after the model was declared.
    #[error("Model {0} has changed since it was declared")]
    OutdatedModel(String),

    #[error("Model {app_label}.{model_name} is not registered")]
    NotRegistered {
        app_label: String,
        model_name: String,
    },

    #[error("No model schema with id {0}")]
    ModelSchemaNotFound(i64),

    #[error("No field schema with id {0}")]
    FieldSchemaNotFound(i64),

    /// Another model schema of the app already has this table or model name.
    #[error("A model schema already uses the name or table {0}")]
    DuplicateModel(String),

    /// A table no model schema owns is in the way, and adopting it would drop these columns.
    #[error("Table {table} already exists with columns the model doesn't have: {columns:?}")]
    UnmanagedTable { table: String, columns: Vec<String> },

    #[error("Model {model} already has a column named {column}")]
    DuplicateField { model: String, column: String },

    #[error("{column}: {reason}")]
    InvalidValue { column: String, reason: String },

    #[error("Sqlite error: {}", _0)]
    Sqlite(#[from] rusqlite::Error),

    #[error("Template error: {}", _0)]
    Template(#[from] tera::Error),

    #[error("JSON error: {}", _0)]
    Json(#[from] serde_json::Error),

    #[error("Could not format a timestamp: {}", _0)]
    TimeFormat(#[from] time::error::Format),

    #[error("Could not parse a timestamp: {}", _0)]
    TimeParse(#[from] time::error::Parse),

    #[error("Callback failed: {}", _0)]
    Callback(#[from] anyhow::Error),
}

impl Error {
    pub(crate) fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Error {
        Error::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_value(column: impl Into<String>, reason: impl Into<String>) -> Error {
        Error::InvalidValue {
            column: column.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
