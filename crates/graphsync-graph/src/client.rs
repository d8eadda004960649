//! Neo4j connection management and the neo4rs-backed session.

use std::sync::OnceLock;

use async_trait::async_trait;
use neo4rs::{ConfigBuilder, Graph, Query, Txn};
use regex::Regex;
use serde::Deserialize;

use graphsync_core::Statement;

use crate::bolt::to_query;
use crate::error::GraphError;
use crate::session::{GraphSession, StoreError, WriteOutcome};

/// Configuration for connecting to Neo4j.
///
/// Loaded from the `[neo4j]` section of `graphsync.toml` or
/// `GRAPHSYNC__NEO4J__*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphConfig {
    #[serde(default = "default_uri")]
    pub uri: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_password")]
    pub password: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_fetch_size")]
    pub fetch_size: usize,
}

fn default_uri() -> String {
    "bolt://localhost:7687".to_string()
}

fn default_user() -> String {
    "neo4j".to_string()
}

fn default_password() -> String {
    "graphsync-dev".to_string()
}

fn default_max_connections() -> u32 {
    16
}

fn default_fetch_size() -> usize {
    256
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            user: default_user(),
            password: default_password(),
            max_connections: default_max_connections(),
            fetch_size: default_fetch_size(),
        }
    }
}

/// Thread-safe Neo4j client with connection pooling.
///
/// Implements [`GraphSession`], so it can be handed straight to the
/// [`Ingestor`](crate::Ingestor). Clone is cheap (inner Arc).
#[derive(Clone)]
pub struct GraphClient {
    graph: Graph,
}

impl GraphClient {
    /// Connect to Neo4j with the given configuration.
    pub async fn connect(config: &GraphConfig) -> Result<Self, GraphError> {
        let neo_config = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.user)
            .password(&config.password)
            .max_connections(config.max_connections as usize)
            .fetch_size(config.fetch_size)
            .build()
            .map_err(|e| GraphError::Connection(e.to_string()))?;

        let graph = Graph::connect(neo_config)
            .await
            .map_err(|e| GraphError::Connection(e.to_string()))?;

        tracing::info!(uri = %config.uri, "Connected to Neo4j");
        Ok(Self { graph })
    }

    /// Get a reference to the underlying neo4rs Graph for direct operations.
    pub fn inner(&self) -> &Graph {
        &self.graph
    }

    /// Execute a query, discarding any result.
    pub async fn run(&self, query: Query) -> Result<(), StoreError> {
        self.graph.run(query).await?;
        Ok(())
    }

    /// Execute a read query and return the first row, if any.
    pub async fn query_one(&self, query: Query) -> Result<Option<neo4rs::Row>, StoreError> {
        let mut stream = self.graph.execute(query).await?;
        Ok(stream.next().await?)
    }

    /// Execute a read query and collect all rows.
    pub async fn query_rows(&self, query: Query) -> Result<Vec<neo4rs::Row>, StoreError> {
        let mut stream = self.graph.execute(query).await?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }
}

#[async_trait]
impl GraphSession for GraphClient {
    async fn run_in_write_tx(&self, statements: &[Statement]) -> Result<Vec<WriteOutcome>, StoreError> {
        let mut txn = self.graph.start_txn().await?;
        let mut outcomes = Vec::with_capacity(statements.len());

        for statement in statements {
            match execute_in_txn(&mut txn, statement).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    if let Err(rollback) = txn.rollback().await {
                        tracing::debug!(error = %rollback, "Rollback after failed statement also failed");
                    }
                    return Err(e);
                }
            }
        }

        txn.commit().await?;
        Ok(outcomes)
    }

    async fn run_autocommit(&self, statement: &Statement) -> Result<(), StoreError> {
        self.run(to_query(statement)).await
    }
}

async fn execute_in_txn(txn: &mut Txn, statement: &Statement) -> Result<WriteOutcome, StoreError> {
    let mut stream = txn.execute(to_query(statement)).await?;
    let mut affected = 0;
    while let Some(row) = stream.next(txn.handle()).await? {
        affected += row.get::<i64>("affected").unwrap_or(0);
    }
    Ok(WriteOutcome { affected })
}

// ── Error mapping ────────────────────────────────────────────────

fn status_code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"Neo\.[A-Za-z]+Error\.[A-Za-z]+\.[A-Za-z]+").expect("status code pattern is valid")
    })
}

/// Reduce a driver error to the engine's view of it.
///
/// Server failures carry their Neo4j status code. Anything else that
/// mentions one in its message (a failure relayed through another variant)
/// is classified by it too.
impl From<neo4rs::Error> for StoreError {
    fn from(error: neo4rs::Error) -> Self {
        match error {
            neo4rs::Error::Neo4j(server) => StoreError::Server {
                code: server.code().to_string(),
                message: server.message().to_string(),
            },
            neo4rs::Error::IOError { .. } => StoreError::Io(error.to_string()),
            neo4rs::Error::ConnectionError => StoreError::Unavailable(error.to_string()),
            neo4rs::Error::AuthenticationError { .. } => StoreError::SessionClosed(error.to_string()),
            other => from_message(other.to_string()),
        }
    }
}

/// Fallback for errors without a structured status code.
fn from_message(message: String) -> StoreError {
    match status_code_pattern().find(&message) {
        Some(code) => StoreError::Server {
            code: code.as_str().to_string(),
            message,
        },
        None => StoreError::Driver(message),
    }
}
