//! Idempotent index creation.
//!
//! Other processes may be creating the same indexes at the same time, so a
//! lost creation race counts as success.

use graphsync_core::querybuilder;
use graphsync_core::{MatchLinkSchema, NodeSchema, Statement};

use crate::error::GraphError;
use crate::executor::Ingestor;
use crate::retry::{classify, FailureClass, RetryBudget, Retrier};
use crate::session::GraphSession;

impl Ingestor {
    /// Create every index the schema's queries rely on, if missing.
    pub async fn ensure_indexes<S>(&self, session: &S, schema: &NodeSchema) -> Result<(), GraphError>
    where
        S: GraphSession + ?Sized,
    {
        let statements = querybuilder::index_queries(schema)?;
        self.run_index_statements(session, schema.label(), statements)
            .await
    }

    pub async fn ensure_indexes_for_matchlinks<S>(
        &self,
        session: &S,
        schema: &MatchLinkSchema,
    ) -> Result<(), GraphError>
    where
        S: GraphSession + ?Sized,
    {
        let statements = querybuilder::matchlink_index_queries(schema)?;
        self.run_index_statements(session, schema.rel_label(), statements)
            .await
    }

    async fn run_index_statements<S>(
        &self,
        session: &S,
        target: &str,
        statements: &[String],
    ) -> Result<(), GraphError>
    where
        S: GraphSession + ?Sized,
    {
        for text in statements {
            querybuilder::check_index_statement(text)?;
            let statement = Statement::new(text.as_str());

            let result = Retrier::new(
                target,
                RetryBudget::from_config(&self.config().index_retry),
                self.metrics(),
            )
            .run(|| session.run_autocommit(&statement))
            .await;

            match result {
                Ok(()) => {}
                Err(GraphError::PermanentQuery(e)) if classify(&e) == FailureClass::SchemaRace => {
                    tracing::debug!(statement = %text, "Index already created concurrently");
                }
                Err(e) => return Err(e),
            }
        }
        tracing::debug!(target_name = target, count = statements.len(), "Indexes ensured");
        Ok(())
    }
}
