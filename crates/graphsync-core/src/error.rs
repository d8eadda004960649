use thiserror::Error;

/// Errors raised before anything is sent to the graph.
///
/// None of these are retryable: they describe a malformed schema or a
/// malformed call, and the same input will fail the same way every time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Schema definition error: {0}")]
    Definition(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Record {index} is missing required field '{field}'")]
    MissingField { field: String, index: usize },

    #[error("Constant '{0}' referenced by the schema was not supplied")]
    MissingConstant(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SchemaError>;
