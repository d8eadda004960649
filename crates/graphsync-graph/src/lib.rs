//! graphsync-graph: everything that talks to Neo4j.
//!
//! The [`Ingestor`] is the single write path into the graph. It takes schemas
//! and records from `graphsync-core`, compiles and batches them, and runs the
//! resulting transactions through a [`GraphSession`] with failure-class aware
//! retries. [`GraphClient`] is the neo4rs-backed session; tests substitute
//! their own.

pub mod bolt;
pub mod cleanup;
pub mod client;
pub mod error;
pub mod executor;
pub mod indexes;
pub mod metrics;
pub mod queries;
pub mod retry;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use cleanup::{CleanupJob, CleanupSummary, StatementCleanup};
pub use client::{GraphClient, GraphConfig};
pub use error::GraphError;
pub use executor::{Ingestor, LoadSummary};
pub use metrics::{MetricsSink, NoopMetrics, TracingMetrics};
pub use retry::{classify, BackoffPolicy, ExponentialBackoff, FailureClass};
pub use session::{GraphSession, StoreError, WriteOutcome};
