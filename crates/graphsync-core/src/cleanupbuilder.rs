//! Compiles schemas into batched deletion statements for stale data.
//!
//! A stale element is one whose `lastupdated` differs from the current
//! pass's watermark. Every statement deletes at most `$LIMIT_SIZE` elements
//! and returns how many it removed as `affected`, so the runner can loop
//! until nothing is left.

use crate::error::Result;
use crate::querybuilder::cached;
use crate::schema::{LinkDirection, MatchLinkSchema, NodeSchema, RelSchema};
use crate::record::{LASTUPDATED, SUB_RESOURCE_ID, SUB_RESOURCE_LABEL};

/// Parameter carrying the watermark of the pass being cleaned up after.
pub const UPDATE_TAG: &str = "UPDATE_TAG";

/// Parameter carrying the per-statement deletion limit.
pub const LIMIT_SIZE: &str = "LIMIT_SIZE";

pub fn cleanup_queries(schema: &NodeSchema) -> Result<&[String]> {
    cached(&schema.cache.cleanup, || build_cleanup_queries(schema)).map(Vec::as_slice)
}

pub fn matchlink_cleanup_query(schema: &MatchLinkSchema) -> Result<&str> {
    cached(&schema.cache.cleanup, || build_matchlink_cleanup_query(schema)).map(String::as_str)
}

/// Build the cleanup statements for a node schema, in execution order.
///
/// With a sub-resource, stale nodes attached to it are detach-deleted first,
/// then stale sub-resource edges, then stale edges of every other
/// relationship. Without one, nodes are never deleted; only stale edges of
/// the other relationships are.
pub fn build_cleanup_queries(schema: &NodeSchema) -> Result<Vec<String>> {
    schema.validate()?;

    let Some(sub) = schema.sub_resource_relationship() else {
        return Ok(schema
            .other_relationships()
            .iter()
            .map(|rel| {
                let scope = format!("MATCH (n:{})", schema.label());
                delete_stale_rel(&scope, rel)
            })
            .collect());
    };

    let scope = sub_resource_scope(schema, sub)?;
    let mut queries = vec![delete_stale_nodes(&scope, None), delete_stale_sub_resource_edges(&scope)];
    queries.extend(
        schema
            .other_relationships()
            .iter()
            .map(|rel| delete_stale_rel(&scope, rel)),
    );
    Ok(queries)
}

/// Build cleanup statements for only the `selected` relationships.
///
/// Per selected relationship, in schema order:
/// - the sub-resource yields the stale-node and stale-edge deletes of
///   [`build_cleanup_queries`];
/// - another relationship on a scoped schema yields a stale-node delete
///   limited to nodes carrying that relationship, then its stale-edge delete;
/// - another relationship on an unscoped schema yields its stale-edge delete.
pub fn build_cleanup_queries_for_relationships(
    schema: &NodeSchema,
    selected: &[&RelSchema],
) -> Result<Vec<String>> {
    schema.validate()?;
    let (sub_selected, others) = schema.select_relationships(selected)?;

    let Some(sub) = schema.sub_resource_relationship() else {
        let scope = format!("MATCH (n:{})", schema.label());
        return Ok(others.iter().map(|rel| delete_stale_rel(&scope, rel)).collect());
    };

    let scope = sub_resource_scope(schema, sub)?;
    let mut queries = Vec::new();
    if sub_selected.is_some() {
        queries.push(delete_stale_nodes(&scope, None));
        queries.push(delete_stale_sub_resource_edges(&scope));
    }
    for rel in others {
        queries.push(delete_stale_nodes(&scope, Some(rel)));
        queries.push(delete_stale_rel(&scope, rel));
    }
    Ok(queries)
}

fn sub_resource_scope(schema: &NodeSchema, sub: &RelSchema) -> Result<String> {
    let target = format!(":{}{{{}}}", sub.target_label(), sub.const_matcher(schema.label())?);
    Ok(format!(
        "MATCH {}",
        edge("n", schema.label(), "s", sub.rel_label(), &target, sub.direction())
    ))
}

/// Stale nodes in `scope`, optionally only those carrying `via`.
fn delete_stale_nodes(scope: &str, via: Option<&RelSchema>) -> String {
    match via {
        None => format!(
            "{scope}\n\
             WHERE n.{LASTUPDATED} <> ${UPDATE_TAG}\n\
             WITH n LIMIT ${LIMIT_SIZE}\n\
             DETACH DELETE n\n\
             RETURN count(n) AS affected"
        ),
        Some(rel) => format!(
            "{scope}\n\
             MATCH {hop}\n\
             WHERE n.{LASTUPDATED} <> ${UPDATE_TAG}\n\
             WITH DISTINCT n LIMIT ${LIMIT_SIZE}\n\
             DETACH DELETE n\n\
             RETURN count(n) AS affected",
            hop = edge_from_bound("n", "r", rel.rel_label(), &format!(":{}", rel.target_label()), rel.direction()),
        ),
    }
}

fn delete_stale_sub_resource_edges(scope: &str) -> String {
    format!(
        "{scope}\n\
         WHERE s.{LASTUPDATED} <> ${UPDATE_TAG}\n\
         WITH s LIMIT ${LIMIT_SIZE}\n\
         DELETE s\n\
         RETURN count(s) AS affected"
    )
}

/// Build the cleanup statement for a MatchLink, scoped by the
/// `_sub_resource_label` / `_sub_resource_id` stamped on each edge.
pub fn build_matchlink_cleanup_query(schema: &MatchLinkSchema) -> Result<String> {
    schema.validate()?;
    let pattern = edge(
        "",
        schema.source_label(),
        "r",
        schema.rel_label(),
        &format!(":{}", schema.target_label()),
        schema.direction(),
    );
    Ok(format!(
        "MATCH {pattern}\n\
         WHERE r.{LASTUPDATED} <> ${UPDATE_TAG}\n\
         \x20   AND r.{SUB_RESOURCE_LABEL} = ${SUB_RESOURCE_LABEL}\n\
         \x20   AND r.{SUB_RESOURCE_ID} = ${SUB_RESOURCE_ID}\n\
         WITH r LIMIT ${LIMIT_SIZE}\n\
         DELETE r\n\
         RETURN count(r) AS affected"
    ))
}

fn delete_stale_rel(scope: &str, rel: &RelSchema) -> String {
    let hop = edge_from_bound("n", "r", rel.rel_label(), &format!(":{}", rel.target_label()), rel.direction());
    format!(
        "{scope}\n\
         MATCH {hop}\n\
         WHERE r.{LASTUPDATED} <> ${UPDATE_TAG}\n\
         WITH r LIMIT ${LIMIT_SIZE}\n\
         DELETE r\n\
         RETURN count(r) AS affected"
    )
}

/// `(var:Label)-[rel_var:REL]->(target)` oriented by `direction`.
fn edge(var: &str, label: &str, rel_var: &str, rel_label: &str, target: &str, direction: LinkDirection) -> String {
    let from = format!("({var}:{label})");
    match direction {
        LinkDirection::Inward => format!("{from}<-[{rel_var}:{rel_label}]-({target})"),
        LinkDirection::Outward => format!("{from}-[{rel_var}:{rel_label}]->({target})"),
    }
}

/// Same as [`edge`] for a variable already bound by an earlier MATCH.
fn edge_from_bound(var: &str, rel_var: &str, rel_label: &str, target: &str, direction: LinkDirection) -> String {
    match direction {
        LinkDirection::Inward => format!("({var})<-[{rel_var}:{rel_label}]-({target})"),
        LinkDirection::Outward => format!("({var})-[{rel_var}:{rel_label}]->({target})"),
    }
}
