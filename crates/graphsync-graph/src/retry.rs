//! Failure classification and the retry loop every write goes through.
//!
//! Network failures and EntityNotFound races keep separate attempt counters
//! and separate backoff curves, so a transaction that hits one of each does
//! not burn the other's budget.

use std::future::Future;
use std::time::Duration;

use graphsync_core::RetryConfig;

use crate::error::GraphError;
use crate::metrics::{self, MetricsSink};
use crate::session::StoreError;

/// Raised by the server when a concurrent transaction deleted or changed a
/// node this one was about to touch.
pub const ENTITY_NOT_FOUND: &str = "Neo.ClientError.Statement.EntityNotFound";

/// Raised when another process created the same index first.
pub const EQUIVALENT_SCHEMA_RULE: &str = "Neo.ClientError.Schema.EquivalentSchemaRuleAlreadyExists";

const TRANSIENT_PREFIX: &str = "Neo.TransientError.";

/// Codes the server uses when the routing table is stale; the next attempt
/// may reach a different member.
const CLUSTER_CODES: &[&str] = &[
    "Neo.ClientError.Cluster.NotALeader",
    "Neo.ClientError.General.ForbiddenOnReadOnlyDatabase",
];

const SESSION_CODES: &[&str] = &[
    "Neo.ClientError.Security.Unauthorized",
    "Neo.ClientError.Security.AuthenticationRateLimit",
];

const FALLBACK_WAIT: Duration = Duration::from_secs(1);

/// How the engine reacts to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Retry with the network budget.
    Network,
    /// Retry with the EntityNotFound budget.
    ConcurrentWrite,
    /// Another process won an index creation race; success for the index manager.
    SchemaRace,
    /// Surface immediately.
    Permanent,
    /// The session cannot be used again; surface immediately.
    SessionUnusable,
}

pub fn classify(error: &StoreError) -> FailureClass {
    match error {
        StoreError::Io(_) | StoreError::Unavailable(_) => FailureClass::Network,
        StoreError::SessionClosed(_) => FailureClass::SessionUnusable,
        StoreError::Driver(_) => FailureClass::Permanent,
        StoreError::Server { code, .. } => classify_code(code),
    }
}

fn classify_code(code: &str) -> FailureClass {
    if code == ENTITY_NOT_FOUND {
        FailureClass::ConcurrentWrite
    } else if code == EQUIVALENT_SCHEMA_RULE {
        FailureClass::SchemaRace
    } else if code.starts_with(TRANSIENT_PREFIX) || CLUSTER_CODES.contains(&code) {
        FailureClass::Network
    } else if SESSION_CODES.contains(&code) {
        FailureClass::SessionUnusable
    } else {
        FailureClass::Permanent
    }
}

// ── Backoff ──────────────────────────────────────────────────────

/// Source of waits between attempts. One instance per retry loop.
pub trait BackoffPolicy: Send {
    /// The wait before the next attempt, or `None` if the policy has nothing
    /// to offer.
    fn next_wait(&mut self) -> Option<Duration>;
}

/// `initial * multiplier^n`, capped at `max`, optionally with full jitter.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial_secs: f64,
    multiplier: f64,
    max_secs: f64,
    jitter: bool,
    step: i32,
}

impl ExponentialBackoff {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            initial_secs: config.initial_delay_secs,
            multiplier: config.multiplier,
            max_secs: config.max_delay_secs,
            jitter: config.jitter,
            step: 0,
        }
    }
}

impl BackoffPolicy for ExponentialBackoff {
    fn next_wait(&mut self) -> Option<Duration> {
        let secs = (self.initial_secs * self.multiplier.powi(self.step)).min(self.max_secs);
        self.step = self.step.saturating_add(1);
        let secs = if self.jitter { secs * fastrand::f64() } else { secs };
        Duration::try_from_secs_f64(secs).ok()
    }
}

fn wait_or_fallback(backoff: &mut dyn BackoffPolicy, target: &str) -> Duration {
    backoff.next_wait().unwrap_or_else(|| {
        tracing::error!(
            target_name = target,
            fallback_secs = FALLBACK_WAIT.as_secs_f64(),
            "Backoff policy produced no wait, using fallback"
        );
        FALLBACK_WAIT
    })
}

// ── Retry loop ───────────────────────────────────────────────────

/// Attempt limit plus the backoff for one failure class.
pub struct RetryBudget {
    max_attempts: u32,
    backoff: Box<dyn BackoffPolicy>,
}

impl RetryBudget {
    pub fn new(max_attempts: u32, backoff: impl BackoffPolicy + 'static) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Box::new(backoff),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, ExponentialBackoff::new(config))
    }
}

/// Runs an operation until it succeeds or its failure class gives up.
///
/// Without a concurrent-write budget, EntityNotFound is permanent.
pub struct Retrier<'a> {
    target: &'a str,
    network: RetryBudget,
    concurrent_write: Option<RetryBudget>,
    metrics: &'a dyn MetricsSink,
}

impl<'a> Retrier<'a> {
    pub fn new(target: &'a str, network: RetryBudget, metrics: &'a dyn MetricsSink) -> Self {
        Self {
            target,
            network,
            concurrent_write: None,
            metrics,
        }
    }

    pub fn retry_concurrent_writes(mut self, budget: RetryBudget) -> Self {
        self.concurrent_write = Some(budget);
        self
    }

    pub async fn run<T, F, Fut>(mut self, mut op: F) -> Result<T, GraphError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let target = self.target;
        let mut network_retries: u32 = 0;
        let mut entity_retries: u32 = 0;

        loop {
            let error = match op().await {
                Ok(value) => {
                    self.report_recovery(network_retries, entity_retries);
                    return Ok(value);
                }
                Err(e) => e,
            };

            let wait = match classify(&error) {
                FailureClass::Network => {
                    let max = self.network.max_attempts;
                    if network_retries + 1 >= max {
                        tracing::error!(
                            target_name = target,
                            attempts = network_retries + 1,
                            error = %error,
                            "Giving up after repeated network errors"
                        );
                        return Err(GraphError::Transient {
                            attempts: network_retries + 1,
                            source: error,
                        });
                    }
                    network_retries += 1;
                    let wait = wait_or_fallback(self.network.backoff.as_mut(), target);
                    tracing::warn!(
                        target_name = target,
                        attempt = network_retries,
                        max_attempts = max,
                        wait_secs = wait.as_secs_f64(),
                        error = %error,
                        "Network error, retrying"
                    );
                    self.metrics.incr(metrics::RETRY_NETWORK, 1);
                    wait
                }
                FailureClass::ConcurrentWrite => {
                    let Some(budget) = self.concurrent_write.as_mut() else {
                        return Err(GraphError::PermanentQuery(error));
                    };
                    let max = budget.max_attempts;
                    if entity_retries + 1 >= max {
                        tracing::error!(
                            target_name = target,
                            attempts = entity_retries + 1,
                            error = %error,
                            "EntityNotFound persisted after retries"
                        );
                        return Err(GraphError::ConcurrentWrite {
                            attempts: entity_retries + 1,
                            source: error,
                        });
                    }
                    entity_retries += 1;
                    let wait = wait_or_fallback(budget.backoff.as_mut(), target);
                    if entity_retries == 1 {
                        tracing::warn!(
                            target_name = target,
                            wait_secs = wait.as_secs_f64(),
                            "Encountered EntityNotFound error (attempt 1/{max}). This is expected \
                             during concurrent write operations; retrying"
                        );
                    } else {
                        tracing::warn!(
                            target_name = target,
                            wait_secs = wait.as_secs_f64(),
                            "EntityNotFound retry {entity_retries}/{max}"
                        );
                    }
                    self.metrics.incr(metrics::RETRY_ENTITY_NOT_FOUND, 1);
                    wait
                }
                FailureClass::SessionUnusable => {
                    tracing::error!(target_name = target, error = %error, "Session unusable, not retrying");
                    return Err(GraphError::SessionUnavailable(error));
                }
                FailureClass::SchemaRace | FailureClass::Permanent => {
                    return Err(GraphError::PermanentQuery(error));
                }
            };

            tokio::time::sleep(wait).await;
        }
    }

    fn report_recovery(&self, network_retries: u32, entity_retries: u32) {
        if network_retries > 0 {
            tracing::info!(
                target_name = self.target,
                retries = network_retries,
                "Recovered from network error after {network_retries} retries"
            );
            self.metrics.incr(metrics::RECOVERED_NETWORK, 1);
        }
        if entity_retries > 0 {
            tracing::info!(
                target_name = self.target,
                retries = entity_retries,
                "Recovered from EntityNotFound error after {entity_retries} retries"
            );
            self.metrics.incr(metrics::RECOVERED_ENTITY_NOT_FOUND, 1);
        }
    }
}
