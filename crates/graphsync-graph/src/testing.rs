//! In-memory doubles for unit tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use graphsync_core::Statement;

use crate::metrics::MetricsSink;
use crate::session::{GraphSession, StoreError, WriteOutcome};

/// Records every call and replays scripted failures and row counts.
#[derive(Default)]
pub(crate) struct MockSession {
    tx_failures: Mutex<VecDeque<StoreError>>,
    autocommit_failures: Mutex<VecDeque<StoreError>>,
    affected: Mutex<VecDeque<i64>>,
    transactions: Mutex<Vec<Vec<Statement>>>,
    autocommits: Mutex<Vec<Statement>>,
}

impl MockSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next write transactions fail with these errors, in order.
    pub fn fail_tx_with(self, errors: impl IntoIterator<Item = StoreError>) -> Self {
        self.tx_failures.lock().unwrap().extend(errors);
        self
    }

    pub fn fail_autocommit_with(self, errors: impl IntoIterator<Item = StoreError>) -> Self {
        self.autocommit_failures.lock().unwrap().extend(errors);
        self
    }

    /// `affected` values reported by successive statements; 0 once exhausted.
    pub fn affected(self, counts: impl IntoIterator<Item = i64>) -> Self {
        self.affected.lock().unwrap().extend(counts);
        self
    }

    /// Every write transaction attempted, failed ones included.
    pub fn transactions(&self) -> Vec<Vec<Statement>> {
        self.transactions.lock().unwrap().clone()
    }

    pub fn autocommits(&self) -> Vec<Statement> {
        self.autocommits.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.transactions.lock().unwrap().len() + self.autocommits.lock().unwrap().len()
    }
}

#[async_trait]
impl GraphSession for MockSession {
    async fn run_in_write_tx(&self, statements: &[Statement]) -> Result<Vec<WriteOutcome>, StoreError> {
        self.transactions.lock().unwrap().push(statements.to_vec());
        if let Some(error) = self.tx_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        let mut affected = self.affected.lock().unwrap();
        Ok(statements
            .iter()
            .map(|_| WriteOutcome {
                affected: affected.pop_front().unwrap_or(0),
            })
            .collect())
    }

    async fn run_autocommit(&self, statement: &Statement) -> Result<(), StoreError> {
        self.autocommits.lock().unwrap().push(statement.clone());
        match self.autocommit_failures.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Sums counters by key.
#[derive(Default)]
pub(crate) struct RecordingMetrics {
    counters: Mutex<BTreeMap<String, u64>>,
}

impl RecordingMetrics {
    pub fn count(&self, key: &str) -> u64 {
        self.counters.lock().unwrap().get(key).copied().unwrap_or(0)
    }
}

impl MetricsSink for RecordingMetrics {
    fn incr(&self, key: &str, by: u64) {
        *self.counters.lock().unwrap().entry(key.to_string()).or_default() += by;
    }
}
