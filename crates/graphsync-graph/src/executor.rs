//! The write executor: batched, retried loads of schema-described records.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use graphsync_core::property::resolve;
use graphsync_core::querybuilder;
use graphsync_core::record::{SUB_RESOURCE_ID, SUB_RESOURCE_LABEL};
use graphsync_core::schema::ID_PROPERTY;
use graphsync_core::{
    Constants, EngineConfig, MatchLinkSchema, NodeSchema, PropertyRef, Record, RelSchema,
    SchemaError, Statement,
};

use crate::error::GraphError;
use crate::metrics::{self, MetricsSink, NoopMetrics};
use crate::retry::{RetryBudget, Retrier};
use crate::session::{GraphSession, StoreError, WriteOutcome};

/// What a load wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub records: usize,
    pub batches: usize,
}

/// Entry point for writing into the graph.
///
/// Holds configuration and the metrics sink only; sessions are passed per
/// call, so one `Ingestor` can serve any number of concurrent loads.
#[derive(Clone)]
pub struct Ingestor {
    config: EngineConfig,
    metrics: Arc<dyn MetricsSink>,
}

impl Default for Ingestor {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Ingestor {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn metrics(&self) -> &dyn MetricsSink {
        self.metrics.as_ref()
    }

    // ── Node loads ───────────────────────────────────────────────

    /// Upsert `records` as nodes of `schema`, with their relationships.
    ///
    /// Every record is checked against the schema before anything is sent, so
    /// a malformed record fails the call without writing any batch. Indexes
    /// are ensured first, then records are written `batch_size` at a time,
    /// one transaction per batch, in order. Conditional labels are re-derived
    /// once the last batch is in.
    pub async fn load<S>(
        &self,
        session: &S,
        schema: &NodeSchema,
        records: &[Record],
        batch_size: usize,
        constants: &Constants,
    ) -> Result<LoadSummary, GraphError>
    where
        S: GraphSession + ?Sized,
    {
        check_batch_size(batch_size)?;
        if records.is_empty() {
            tracing::debug!(label = %schema.label(), "No records to load");
            return Ok(LoadSummary::default());
        }

        let query = querybuilder::ingestion_query(schema)?;
        let relationships = schema.relationships().collect();
        self.write_nodes(session, schema, query, relationships, records, batch_size, constants)
            .await
    }

    /// [`load`](Self::load) with `engine.batch_size`.
    pub async fn load_with_default_batch<S>(
        &self,
        session: &S,
        schema: &NodeSchema,
        records: &[Record],
        constants: &Constants,
    ) -> Result<LoadSummary, GraphError>
    where
        S: GraphSession + ?Sized,
    {
        self.load(session, schema, records, self.config.batch_size, constants)
            .await
    }

    /// Upsert nodes attaching only the `selected` relationships.
    ///
    /// Fields referenced solely by unselected relationships need not be
    /// present on the records. An empty selection writes the nodes alone.
    pub async fn load_relationships<S>(
        &self,
        session: &S,
        schema: &NodeSchema,
        selected: &[&RelSchema],
        records: &[Record],
        batch_size: usize,
        constants: &Constants,
    ) -> Result<LoadSummary, GraphError>
    where
        S: GraphSession + ?Sized,
    {
        check_batch_size(batch_size)?;
        if records.is_empty() {
            tracing::debug!(label = %schema.label(), "No records to load");
            return Ok(LoadSummary::default());
        }

        let query = querybuilder::build_ingestion_query_for_relationships(schema, selected)?;
        let (sub_resource, others) = schema.select_relationships(selected)?;
        let relationships = sub_resource.into_iter().chain(others).collect();
        self.write_nodes(session, schema, &query, relationships, records, batch_size, constants)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_nodes<S>(
        &self,
        session: &S,
        schema: &NodeSchema,
        query: &str,
        relationships: Vec<&RelSchema>,
        records: &[Record],
        batch_size: usize,
        constants: &Constants,
    ) -> Result<LoadSummary, GraphError>
    where
        S: GraphSession + ?Sized,
    {
        let label_queries = querybuilder::conditional_label_queries(schema)?;
        let label_scope = schema
            .sub_resource_relationship()
            .filter(|_| !label_queries.is_empty())
            .into_iter()
            .flat_map(|sub| sub.target_matcher().iter().map(|(_, p)| p));
        let refs = schema
            .properties()
            .iter()
            .map(|(_, p)| p)
            .chain(relationships.iter().copied().flat_map(|rel| {
                rel.target_matcher()
                    .iter()
                    .chain(rel.properties().iter())
                    .map(|(_, p)| p)
            }))
            .chain(label_scope);
        preflight(refs, records, constants)?;
        check_merge_key(schema, records, constants)?;

        self.ensure_indexes(session, schema).await?;
        let summary = self
            .write_batches(session, schema.label(), query, records, batch_size, constants)
            .await?;
        self.apply_conditional_labels(session, schema.label(), label_queries, constants)
            .await?;
        Ok(summary)
    }

    /// Run every conditional label statement in one transaction, so no
    /// reader sees a label removed but not yet re-applied.
    async fn apply_conditional_labels<S>(
        &self,
        session: &S,
        target: &str,
        queries: &[String],
        constants: &Constants,
    ) -> Result<(), GraphError>
    where
        S: GraphSession + ?Sized,
    {
        if queries.is_empty() {
            return Ok(());
        }
        let statements: Vec<Statement> = queries
            .iter()
            .map(|text| Statement::new(text.as_str()).constants(constants))
            .collect();
        self.write_with_retry(session, target, &statements).await?;
        tracing::debug!(
            target_name = target,
            statements = statements.len(),
            "Applied conditional labels"
        );
        Ok(())
    }

    // ── MatchLink loads ──────────────────────────────────────────

    /// Link pairs of existing nodes, one relationship per record.
    ///
    /// `constants` must carry `_sub_resource_label` and `_sub_resource_id`;
    /// they scope both this write and the matching cleanup. They are checked
    /// ahead of the empty-input shortcut on purpose: a call missing them
    /// fails even when it has no records to write.
    pub async fn load_matchlinks<S>(
        &self,
        session: &S,
        schema: &MatchLinkSchema,
        records: &[Record],
        batch_size: usize,
        constants: &Constants,
    ) -> Result<LoadSummary, GraphError>
    where
        S: GraphSession + ?Sized,
    {
        check_batch_size(batch_size)?;
        for required in [SUB_RESOURCE_LABEL, SUB_RESOURCE_ID] {
            if !constants.contains(required) {
                return Err(SchemaError::InvalidArgument(format!(
                    "load_matchlinks requires the '{required}' constant"
                ))
                .into());
            }
        }
        if records.is_empty() {
            tracing::debug!(rel = %schema.rel_label(), "No matchlinks to load");
            return Ok(LoadSummary::default());
        }

        let query = querybuilder::matchlink_query(schema)?;
        let refs = schema
            .source_matcher()
            .iter()
            .chain(schema.target_matcher().iter())
            .chain(schema.properties().iter())
            .map(|(_, p)| p);
        preflight(refs, records, constants)?;

        self.ensure_indexes_for_matchlinks(session, schema).await?;
        self.write_batches(session, schema.rel_label(), query, records, batch_size, constants)
            .await
    }

    /// [`load_matchlinks`](Self::load_matchlinks) with `engine.batch_size`.
    pub async fn load_matchlinks_with_default_batch<S>(
        &self,
        session: &S,
        schema: &MatchLinkSchema,
        records: &[Record],
        constants: &Constants,
    ) -> Result<LoadSummary, GraphError>
    where
        S: GraphSession + ?Sized,
    {
        self.load_matchlinks(session, schema, records, self.config.batch_size, constants)
            .await
    }

    async fn write_batches<S>(
        &self,
        session: &S,
        target: &str,
        query: &str,
        records: &[Record],
        batch_size: usize,
        constants: &Constants,
    ) -> Result<LoadSummary, GraphError>
    where
        S: GraphSession + ?Sized,
    {
        let started = Instant::now();
        let mut summary = LoadSummary::default();

        for chunk in records.chunks(batch_size) {
            let statement = Statement::new(query).constants(constants).batch(chunk);
            self.write_with_retry(session, target, std::slice::from_ref(&statement))
                .await?;
            summary.batches += 1;
            summary.records += chunk.len();
            self.metrics.incr(metrics::BATCHES_WRITTEN, 1);
            self.metrics.incr(metrics::RECORDS_WRITTEN, chunk.len() as u64);
        }

        self.metrics.timing(metrics::LOAD_TIME, started.elapsed());
        tracing::info!(
            target_name = target,
            records = summary.records,
            batches = summary.batches,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Loaded records"
        );
        Ok(summary)
    }

    // ── Retried execution ────────────────────────────────────────

    /// Run `statements` as one write transaction, retrying the whole
    /// transaction on network failures and EntityNotFound races.
    pub async fn execute_write_with_retry<S>(
        &self,
        session: &S,
        statements: &[Statement],
    ) -> Result<Vec<WriteOutcome>, GraphError>
    where
        S: GraphSession + ?Sized,
    {
        self.write_with_retry(session, "transaction", statements).await
    }

    /// Run any store operation under the write retry policy.
    pub async fn run_with_retry<T, F, Fut>(&self, target: &str, op: F) -> Result<T, GraphError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        self.write_retrier(target).run(op).await
    }

    pub(crate) async fn write_with_retry<S>(
        &self,
        session: &S,
        target: &str,
        statements: &[Statement],
    ) -> Result<Vec<WriteOutcome>, GraphError>
    where
        S: GraphSession + ?Sized,
    {
        self.write_retrier(target)
            .run(|| session.run_in_write_tx(statements))
            .await
    }

    fn write_retrier<'a>(&'a self, target: &'a str) -> Retrier<'a> {
        Retrier::new(
            target,
            RetryBudget::from_config(&self.config.network_retry),
            self.metrics(),
        )
        .retry_concurrent_writes(RetryBudget::from_config(&self.config.entity_retry))
    }
}

fn check_batch_size(batch_size: usize) -> Result<(), SchemaError> {
    if batch_size == 0 {
        return Err(SchemaError::InvalidArgument(
            "batch_size must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

/// Resolve every constant reference once and every field reference against
/// every record.
fn preflight<'a>(
    refs: impl Iterator<Item = &'a PropertyRef>,
    records: &[Record],
    constants: &Constants,
) -> Result<(), SchemaError> {
    let (consts, fields): (Vec<&PropertyRef>, Vec<&PropertyRef>) = refs.partition(|p| p.is_const());
    let empty = Record::new();
    for property in consts {
        resolve(property, &empty, 0, constants)?;
    }
    for (index, record) in records.iter().enumerate() {
        for property in &fields {
            resolve(property, record, index, constants)?;
        }
    }
    Ok(())
}

/// Nodes are merged on `id`; a null there fails on the server mid-load.
fn check_merge_key(schema: &NodeSchema, records: &[Record], constants: &Constants) -> Result<(), SchemaError> {
    let Some(id) = schema.properties().get(ID_PROPERTY) else {
        return Ok(());
    };
    for (index, record) in records.iter().enumerate() {
        if resolve(id, record, index, constants)?.is_null() {
            return Err(SchemaError::MissingField {
                field: id.name().to_string(),
                index,
            });
        }
    }
    Ok(())
}
