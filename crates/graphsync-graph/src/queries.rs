//! Read helpers for inspecting what a sync pass wrote.
//!
//! Labels are spliced into the query text, so they are validated with the
//! same identifier rule the schemas use.

use neo4rs::query;

use graphsync_core::schema::is_valid_identifier;
use graphsync_core::SchemaError;

use crate::client::GraphClient;
use crate::error::GraphError;
use crate::session::StoreError;

fn checked(label: &str) -> Result<&str, GraphError> {
    if is_valid_identifier(label) {
        Ok(label)
    } else {
        Err(SchemaError::InvalidArgument(format!("'{label}' is not a valid label")).into())
    }
}

fn read_failed(e: StoreError) -> GraphError {
    GraphError::PermanentQuery(e)
}

impl GraphClient {
    // ── Counts ───────────────────────────────────────────────────

    /// Count nodes with `label`.
    pub async fn count_nodes(&self, label: &str) -> Result<i64, GraphError> {
        let cypher = format!("MATCH (n:{}) RETURN count(n) AS cnt", checked(label)?);
        match self.query_one(query(&cypher)).await.map_err(read_failed)? {
            Some(row) => Ok(row.get::<i64>("cnt").unwrap_or(0)),
            None => Ok(0),
        }
    }

    /// Count relationships of type `rel_label`.
    pub async fn count_relationships(&self, rel_label: &str) -> Result<i64, GraphError> {
        let cypher = format!("MATCH ()-[r:{}]->() RETURN count(r) AS cnt", checked(rel_label)?);
        match self.query_one(query(&cypher)).await.map_err(read_failed)? {
            Some(row) => Ok(row.get::<i64>("cnt").unwrap_or(0)),
            None => Ok(0),
        }
    }

    // ── Single node lookups ──────────────────────────────────────

    /// The `lastupdated` watermark of the node with `label` and `id`.
    pub async fn node_lastupdated(&self, label: &str, id: &str) -> Result<Option<i64>, GraphError> {
        let cypher = format!(
            "MATCH (n:{} {{id: $id}}) RETURN n.lastupdated AS lastupdated",
            checked(label)?
        );
        let row = self
            .query_one(query(&cypher).param("id", id))
            .await
            .map_err(read_failed)?;
        Ok(row.and_then(|r| r.get::<i64>("lastupdated").ok()))
    }

    /// Ids of nodes reachable from `(label {id})` over one `rel_label` edge,
    /// in either direction, sorted.
    pub async fn neighbor_ids(&self, label: &str, id: &str, rel_label: &str) -> Result<Vec<String>, GraphError> {
        let cypher = format!(
            "MATCH (n:{} {{id: $id}})-[:{}]-(m)
             RETURN m.id AS id
             ORDER BY id",
            checked(label)?,
            checked(rel_label)?
        );
        let rows = self
            .query_rows(query(&cypher).param("id", id))
            .await
            .map_err(read_failed)?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get::<String>("id").ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_check() {
        assert!(checked("Widget").is_ok());
        assert!(checked("_Internal2").is_ok());
        assert!(checked("").is_err());
        assert!(checked("Widget) DETACH DELETE (n").is_err());
    }
}
