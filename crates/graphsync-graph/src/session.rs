//! The seam between the engine and the database.

use async_trait::async_trait;

use graphsync_core::Statement;

/// A database failure, reduced to what the retry policy needs to know.
///
/// Raw driver errors are converted into this at the session boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Database unavailable: {0}")]
    Unavailable(String),

    #[error("{code}: {message}")]
    Server { code: String, message: String },

    #[error("Session is no longer usable: {0}")]
    SessionClosed(String),

    #[error("Driver error: {0}")]
    Driver(String),
}

impl StoreError {
    pub fn server(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Server {
            code: code.into(),
            message: message.into(),
        }
    }

    /// The Neo4j status code, for errors reported by the server.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Server { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// Result of one statement inside a write transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Sum of the `affected` column over the rows returned, 0 if none.
    pub affected: i64,
}

/// A live connection the engine can write through.
///
/// Sessions are owned by the caller and passed into every engine call; the
/// engine never pools or caches them.
#[async_trait]
pub trait GraphSession: Send + Sync {
    /// Run `statements` in order inside one write transaction, committing
    /// only if all of them succeed.
    async fn run_in_write_tx(&self, statements: &[Statement]) -> Result<Vec<WriteOutcome>, StoreError>;

    /// Run one statement in its own auto-commit transaction.
    async fn run_autocommit(&self, statement: &Statement) -> Result<(), StoreError>;
}
