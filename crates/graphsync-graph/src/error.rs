use graphsync_core::SchemaError;

use crate::session::StoreError;

/// Errors from engine operations.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Neo4j connection error: {0}")]
    Connection(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Network or transient server failures outlasted the retry budget.
    #[error("Transient failure persisted after {attempts} attempts: {source}")]
    Transient { attempts: u32, source: StoreError },

    /// EntityNotFound races outlasted the retry budget.
    #[error("Concurrent write conflict persisted after {attempts} attempts: {source}")]
    ConcurrentWrite { attempts: u32, source: StoreError },

    #[error("Query failed: {0}")]
    PermanentQuery(#[source] StoreError),

    #[error("Session unavailable: {0}")]
    SessionUnavailable(#[source] StoreError),
}

impl GraphError {
    /// The underlying database failure, if this error came from one.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            Self::Transient { source, .. } | Self::ConcurrentWrite { source, .. } => Some(source),
            Self::PermanentQuery(e) | Self::SessionUnavailable(e) => Some(e),
            Self::Connection(_) | Self::Schema(_) => None,
        }
    }
}
