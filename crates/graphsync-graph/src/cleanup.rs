//! Removal of stale nodes and relationships after a sync pass.
//!
//! Each cleanup statement deletes at most `cleanup_batch_size` elements per
//! execution and is re-run until it reports nothing left to delete, which
//! keeps every transaction small regardless of how much went stale.

use serde_json::Value;

use graphsync_core::cleanupbuilder::{self, LIMIT_SIZE, UPDATE_TAG};
use graphsync_core::{Constants, MatchLinkSchema, NodeSchema, RelSchema, SchemaError, Statement, UpdateTag};

use crate::error::GraphError;
use crate::executor::Ingestor;
use crate::metrics;
use crate::session::GraphSession;

/// A compiled cleanup for one schema and scope.
#[derive(Debug, Clone)]
pub struct CleanupJob {
    target: String,
    statements: Vec<String>,
    constants: Constants,
}

impl CleanupJob {
    /// Clean up after a load of `schema` with the same `constants`.
    ///
    /// The constants must carry every value the sub-resource matcher refers
    /// to, and the watermark of the pass whose data is kept.
    pub fn for_node_schema(schema: &NodeSchema, constants: &Constants) -> Result<Self, SchemaError> {
        let statements = cleanupbuilder::cleanup_queries(schema)?.to_vec();
        Self::scoped(schema, statements, constants)
    }

    /// Clean up only what the `selected` relationships of `schema` cover.
    pub fn for_node_schema_relationships(
        schema: &NodeSchema,
        selected: &[&RelSchema],
        constants: &Constants,
    ) -> Result<Self, SchemaError> {
        let statements = cleanupbuilder::build_cleanup_queries_for_relationships(schema, selected)?;
        Self::scoped(schema, statements, constants)
    }

    fn scoped(schema: &NodeSchema, statements: Vec<String>, constants: &Constants) -> Result<Self, SchemaError> {
        if let Some(sub) = schema.sub_resource_relationship() {
            for (_, property) in sub.target_matcher().iter() {
                if !constants.contains(property.name()) {
                    return Err(SchemaError::MissingConstant(property.name().to_string()));
                }
            }
        }
        Ok(Self {
            target: schema.label().to_string(),
            statements,
            constants: constants.clone(),
        })
    }

    /// Clean up MatchLinks written under one sub-resource.
    pub fn for_matchlink(
        schema: &MatchLinkSchema,
        sub_resource_label: &str,
        sub_resource_id: impl Into<Value>,
        update_tag: UpdateTag,
    ) -> Result<Self, SchemaError> {
        let statement = cleanupbuilder::matchlink_cleanup_query(schema)?.to_string();
        Ok(Self {
            target: schema.rel_label().to_string(),
            statements: vec![statement],
            constants: Constants::new(update_tag).with_sub_resource(sub_resource_label, sub_resource_id),
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    pub fn update_tag(&self) -> UpdateTag {
        self.constants.update_tag()
    }
}

/// Totals for one cleanup statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatementCleanup {
    pub deleted: i64,
    pub iterations: u32,
}

/// What a cleanup job removed, per statement in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupSummary {
    pub statements: Vec<StatementCleanup>,
}

impl CleanupSummary {
    pub fn total_deleted(&self) -> i64 {
        self.statements.iter().map(|s| s.deleted).sum()
    }
}

impl Ingestor {
    pub async fn cleanup<S>(&self, session: &S, job: &CleanupJob) -> Result<CleanupSummary, GraphError>
    where
        S: GraphSession + ?Sized,
    {
        let limit = i64::try_from(self.config().cleanup_batch_size).unwrap_or(i64::MAX);
        let mut summary = CleanupSummary::default();

        for text in job.statements() {
            let statement = Statement::new(text.as_str())
                .constants(&job.constants)
                .param(UPDATE_TAG, job.update_tag())
                .param(LIMIT_SIZE, limit);

            let mut totals = StatementCleanup::default();
            loop {
                let outcomes = self
                    .write_with_retry(session, job.target(), std::slice::from_ref(&statement))
                    .await?;
                let affected: i64 = outcomes.iter().map(|o| o.affected).sum();
                totals.iterations += 1;
                if affected <= 0 {
                    break;
                }
                totals.deleted += affected;
            }
            summary.statements.push(totals);
        }

        let deleted = summary.total_deleted();
        self.metrics()
            .incr(metrics::CLEANUP_DELETED, u64::try_from(deleted).unwrap_or(0));
        tracing::info!(
            target_name = job.target(),
            update_tag = job.update_tag(),
            deleted,
            statements = summary.statements.len(),
            "Cleanup complete"
        );
        Ok(summary)
    }

    /// Build and run the cleanup for a node schema.
    pub async fn cleanup_node_schema<S>(
        &self,
        session: &S,
        schema: &NodeSchema,
        constants: &Constants,
    ) -> Result<CleanupSummary, GraphError>
    where
        S: GraphSession + ?Sized,
    {
        let job = CleanupJob::for_node_schema(schema, constants)?;
        self.cleanup(session, &job).await
    }

    pub async fn cleanup_node_schema_relationships<S>(
        &self,
        session: &S,
        schema: &NodeSchema,
        selected: &[&RelSchema],
        constants: &Constants,
    ) -> Result<CleanupSummary, GraphError>
    where
        S: GraphSession + ?Sized,
    {
        let job = CleanupJob::for_node_schema_relationships(schema, selected, constants)?;
        self.cleanup(session, &job).await
    }

    /// Build and run the cleanup for MatchLinks under one sub-resource.
    pub async fn cleanup_matchlinks<S>(
        &self,
        session: &S,
        schema: &MatchLinkSchema,
        sub_resource_label: &str,
        sub_resource_id: impl Into<Value> + Send,
        update_tag: UpdateTag,
    ) -> Result<CleanupSummary, GraphError>
    where
        S: GraphSession + ?Sized,
    {
        let job = CleanupJob::for_matchlink(schema, sub_resource_label, sub_resource_id, update_tag)?;
        self.cleanup(session, &job).await
    }
}
