//! Compiles schemas into Cypher.
//!
//! Every `build_*` function is pure and deterministic. The matching
//! accessors without the prefix (`ingestion_query`, `index_queries`, ...)
//! validate the schema once and cache the result on the schema instance.
//!
//! Generated writes use the UNWIND + MERGE pattern: a whole batch of
//! records is bound to `$DictList` and iterated server-side as `item`.

use std::collections::HashSet;
use std::sync::OnceLock;

use crate::error::{Result, SchemaError};
use crate::property::PropertyMap;
use crate::schema::{ConditionalLabel, LinkDirection, MatchLinkSchema, NodeSchema, RelSchema, ID_PROPERTY};
use crate::record::{LASTUPDATED, SUB_RESOURCE_ID, SUB_RESOURCE_LABEL};

/// Every index statement must start with this, so re-running it is harmless.
pub const INDEX_PREFIX: &str = "CREATE INDEX IF NOT EXISTS";

/// Stamped as `_module_version` on everything written.
pub const MODULE_VERSION: &str = env!("CARGO_PKG_VERSION");

const UNKNOWN_MODULE: &str = "unknown";

// ── Cached accessors ─────────────────────────────────────────────

pub(crate) fn cached<'a, T>(cell: &'a OnceLock<T>, build: impl FnOnce() -> Result<T>) -> Result<&'a T> {
    if let Some(value) = cell.get() {
        return Ok(value);
    }
    let value = build()?;
    Ok(cell.get_or_init(|| value))
}

/// The upsert query for `schema`, compiled on first use.
pub fn ingestion_query(schema: &NodeSchema) -> Result<&str> {
    cached(&schema.cache.ingest, || {
        let query = build_ingestion_query(schema)?;
        tracing::debug!(label = %schema.label(), "Compiled ingestion query");
        Ok(query)
    })
    .map(String::as_str)
}

/// The index statements for `schema`, compiled on first use.
pub fn index_queries(schema: &NodeSchema) -> Result<&[String]> {
    cached(&schema.cache.indexes, || build_create_index_queries(schema)).map(Vec::as_slice)
}

/// The conditional label statements for `schema`, compiled on first use.
pub fn conditional_label_queries(schema: &NodeSchema) -> Result<&[String]> {
    cached(&schema.cache.conditional_labels, || build_conditional_label_queries(schema))
        .map(Vec::as_slice)
}

pub fn matchlink_query(schema: &MatchLinkSchema) -> Result<&str> {
    cached(&schema.cache.link, || {
        let query = build_matchlink_query(schema)?;
        tracing::debug!(rel = %schema.rel_label(), "Compiled matchlink query");
        Ok(query)
    })
    .map(String::as_str)
}

pub fn matchlink_index_queries(schema: &MatchLinkSchema) -> Result<&[String]> {
    cached(&schema.cache.indexes, || {
        build_create_index_queries_for_matchlink(schema)
    })
    .map(Vec::as_slice)
}

// ── Ingestion ────────────────────────────────────────────────────

/// Build the batched upsert for a node schema and all of its relationships.
///
/// Relationship targets are only matched. A record whose target is not in
/// the graph yet simply produces no edge; a later pass that loads the
/// target's schema plus a re-run of this one will converge.
pub fn build_ingestion_query(schema: &NodeSchema) -> Result<String> {
    schema.validate()?;
    let others: Vec<&RelSchema> = schema.other_relationships().iter().collect();
    compile_ingestion(schema, schema.sub_resource_relationship(), &others)
}

/// Build the upsert attaching only the `selected` relationships.
///
/// An empty selection writes the nodes alone. The result is not cached on
/// the schema, since it depends on the selection.
pub fn build_ingestion_query_for_relationships(
    schema: &NodeSchema,
    selected: &[&RelSchema],
) -> Result<String> {
    schema.validate()?;
    let (sub, others) = schema.select_relationships(selected)?;
    compile_ingestion(schema, sub, &others)
}

fn compile_ingestion(
    schema: &NodeSchema,
    sub_resource: Option<&RelSchema>,
    others: &[&RelSchema],
) -> Result<String> {
    let id = schema
        .properties()
        .get(ID_PROPERTY)
        .ok_or_else(|| SchemaError::Definition(format!("{} has no id", schema.label())))?;

    let mut set_lines = module_stamps("i", schema.module());
    set_lines.extend(
        schema
            .properties()
            .iter()
            .filter(|(name, _)| *name != ID_PROPERTY)
            .map(|(name, property)| format!("i.{name} = {property}")),
    );
    if !schema.extra_labels().is_empty() {
        set_lines.push(format!("i:{}", schema.extra_labels().join(":")));
    }

    let mut query = format!(
        "UNWIND $DictList AS item\n\
         \x20   MERGE (i:{label}{{{ID_PROPERTY}: {id}}})\n\
         \x20   ON CREATE SET i.firstseen = timestamp()\n\
         \x20   SET\n\
         {set}",
        label = schema.label(),
        set = indent(&set_lines.join(",\n"), 8),
    );

    let branches: Vec<String> = sub_resource
        .map(|rel| attach_branch(rel, "j", "r", schema.module()))
        .into_iter()
        .chain(
            others
                .iter()
                .enumerate()
                .map(|(n, rel)| attach_branch(rel, &format!("n{n}"), &format!("r{n}"), schema.module())),
        )
        .collect();

    if !branches.is_empty() {
        let body = branches
            .iter()
            .map(|b| indent(b, 8))
            .collect::<Vec<_>>()
            .join("\n    UNION\n");
        query.push_str(&format!("\n    WITH i, item\n    CALL {{\n{body}\n    }}"));
    }
    Ok(query)
}

/// One `CALL {}` branch attaching the node `i` to an existing target.
fn attach_branch(rel: &RelSchema, node_var: &str, rel_var: &str, module: Option<&str>) -> String {
    let (pattern, filter) = match_pattern(node_var, rel.target_label(), rel.target_matcher());
    let mut lines = vec![
        "WITH i, item".to_string(),
        format!("OPTIONAL MATCH {pattern}"),
    ];
    if let Some(filter) = filter {
        lines.push(format!("WHERE {filter}"));
    }
    lines.push(format!("WITH i, item, {node_var} WHERE {node_var} IS NOT NULL"));
    lines.push(format!(
        "MERGE {}",
        rel_pattern("i", rel_var, rel.rel_label(), node_var, rel.direction())
    ));
    lines.push(format!("ON CREATE SET {rel_var}.firstseen = timestamp()"));
    lines.push("SET".to_string());
    lines.push(indent(&rel_set_lines(rel_var, rel.properties(), module).join(",\n"), 4));
    lines.join("\n")
}

// ── MatchLinks ───────────────────────────────────────────────────

/// Build the batched query linking two existing nodes per record.
pub fn build_matchlink_query(schema: &MatchLinkSchema) -> Result<String> {
    schema.validate()?;

    let mut lines = vec!["UNWIND $DictList AS item".to_string()];
    for (var, label, matcher) in [
        ("from", schema.source_label(), schema.source_matcher()),
        ("to", schema.target_label(), schema.target_matcher()),
    ] {
        let (pattern, filter) = match_pattern(var, label, matcher);
        lines.push(format!("    MATCH {pattern}"));
        if let Some(filter) = filter {
            lines.push(format!("    WHERE {filter}"));
        }
    }
    lines.push(format!(
        "    MERGE {}",
        rel_pattern("from", "r", schema.rel_label(), "to", schema.direction())
    ));
    lines.push("    ON CREATE SET r.firstseen = timestamp()".to_string());
    lines.push("    SET".to_string());
    lines.push(indent(
        &rel_set_lines("r", schema.properties(), schema.module()).join(",\n"),
        8,
    ));
    Ok(lines.join("\n"))
}

// ── Conditional labels ───────────────────────────────────────────

/// Statements re-deriving the schema's conditional labels, two per label in
/// declaration order: remove the label from every node in scope, then set it
/// on those matching all of its conditions.
///
/// With a sub-resource both statements are confined to nodes attached to it.
/// Labels declared without conditions produce nothing.
pub fn build_conditional_label_queries(schema: &NodeSchema) -> Result<Vec<String>> {
    schema.validate()?;
    let labels: Vec<&ConditionalLabel> = schema
        .conditional_labels()
        .iter()
        .filter(|c| !c.conditions().is_empty())
        .collect();
    if labels.is_empty() {
        return Ok(Vec::new());
    }

    let scope = match schema.sub_resource_relationship() {
        Some(sub) => {
            let target = format!(
                "(sub:{}{{{}}})",
                sub.target_label(),
                sub.const_matcher(schema.label())?
            );
            match sub.direction() {
                LinkDirection::Inward => format!("<-[:{}]-{target}", sub.rel_label()),
                LinkDirection::Outward => format!("-[:{}]->{target}", sub.rel_label()),
            }
        }
        None => String::new(),
    };

    let label = schema.label();
    let mut queries = Vec::with_capacity(labels.len() * 2);
    for conditional in labels {
        let extra = conditional.label();
        let conditions = conditional
            .conditions()
            .iter()
            .map(|(field, value)| format!("n.{field} = \"{}\"", escape_cypher_string(value)))
            .collect::<Vec<_>>()
            .join(" AND ");
        queries.push(format!("MATCH (n:{label}:{extra}){scope}\nREMOVE n:{extra}"));
        queries.push(format!(
            "MATCH (n:{label}){scope}\nWHERE {conditions}\nSET n:{extra}"
        ));
    }
    Ok(queries)
}

// ── Indexes ──────────────────────────────────────────────────────

/// Index statements for everything a node schema merges or matches on.
///
/// Covers the node's `id` and `lastupdated`, `id` on each extra and
/// conditional label, each condition field, every relationship target key,
/// and properties flagged `extra_index`.
pub fn build_create_index_queries(schema: &NodeSchema) -> Result<Vec<String>> {
    schema.validate()?;
    let mut indexes = IndexSet::default();

    indexes.node(schema.label(), ID_PROPERTY);
    indexes.node(schema.label(), LASTUPDATED);
    for label in schema.extra_labels() {
        indexes.node(label, ID_PROPERTY);
    }
    for conditional in schema.conditional_labels() {
        indexes.node(conditional.label(), ID_PROPERTY);
        for (field, _) in conditional.conditions() {
            indexes.node(schema.label(), field);
        }
    }
    for rel in schema.relationships() {
        for key in rel.target_matcher().keys() {
            indexes.node(rel.target_label(), key);
        }
    }
    for (name, property) in schema.properties().iter() {
        if property.is_extra_index() {
            indexes.node(schema.label(), name);
        }
    }
    Ok(indexes.statements)
}

/// Index statements for a MatchLink's source and target keys, plus a
/// composite relationship index backing its scoped cleanup.
pub fn build_create_index_queries_for_matchlink(schema: &MatchLinkSchema) -> Result<Vec<String>> {
    schema.validate()?;
    let mut indexes = IndexSet::default();

    for key in schema.source_matcher().keys() {
        indexes.node(schema.source_label(), key);
    }
    for key in schema.target_matcher().keys() {
        indexes.node(schema.target_label(), key);
    }
    indexes.statements.push(format!(
        "{INDEX_PREFIX} FOR ()-[r:{rel}]-() ON (r.{LASTUPDATED}, r.{SUB_RESOURCE_LABEL}, r.{SUB_RESOURCE_ID})",
        rel = schema.rel_label(),
    ));
    Ok(indexes.statements)
}

/// Fail if a statement would not be idempotent to re-run.
pub fn check_index_statement(statement: &str) -> Result<()> {
    if statement.starts_with(INDEX_PREFIX) {
        Ok(())
    } else {
        Err(SchemaError::Definition(format!(
            "index statement does not start with \"{INDEX_PREFIX}\": {statement}"
        )))
    }
}

#[derive(Default)]
struct IndexSet {
    seen: HashSet<(String, String)>,
    statements: Vec<String>,
}

impl IndexSet {
    fn node(&mut self, label: &str, attribute: &str) {
        if self.seen.insert((label.to_string(), attribute.to_string())) {
            self.statements
                .push(format!("{INDEX_PREFIX} FOR (n:{label}) ON (n.{attribute})"));
        }
    }
}

// ── Fragments ────────────────────────────────────────────────────

/// A node pattern for `matcher`: an inline property map when every key is an
/// exact match, otherwise a bare pattern plus a WHERE condition.
fn match_pattern(var: &str, label: &str, matcher: &PropertyMap) -> (String, Option<String>) {
    let exact = matcher
        .iter()
        .all(|(_, p)| !p.is_one_to_many() && !p.is_ignore_case() && !p.is_fuzzy_and_ignore_case());
    if exact {
        let keys = matcher
            .iter()
            .map(|(key, property)| format!("{key}: {property}"))
            .collect::<Vec<_>>()
            .join(", ");
        return (format!("({var}:{label}{{{keys}}})"), None);
    }

    let conditions = matcher
        .iter()
        .map(|(key, property)| {
            if property.is_ignore_case() {
                format!("toLower({var}.{key}) = toLower({property})")
            } else if property.is_fuzzy_and_ignore_case() {
                format!("toLower({var}.{key}) CONTAINS toLower({property})")
            } else if property.is_one_to_many() {
                format!("{var}.{key} IN {property}")
            } else {
                format!("{var}.{key} = {property}")
            }
        })
        .collect::<Vec<_>>()
        .join(" AND ");
    (format!("({var}:{label})"), Some(conditions))
}

fn rel_pattern(from: &str, rel_var: &str, rel_label: &str, to: &str, direction: LinkDirection) -> String {
    match direction {
        LinkDirection::Inward => format!("({from})<-[{rel_var}:{rel_label}]-({to})"),
        LinkDirection::Outward => format!("({from})-[{rel_var}:{rel_label}]->({to})"),
    }
}

fn rel_set_lines(rel_var: &str, properties: &PropertyMap, module: Option<&str>) -> Vec<String> {
    let mut lines = module_stamps(rel_var, module);
    lines.extend(
        properties
            .iter()
            .map(|(name, property)| format!("{rel_var}.{name} = {property}")),
    );
    lines
}

fn module_stamps(var: &str, module: Option<&str>) -> Vec<String> {
    vec![
        format!(
            "{var}._module_name = \"{}\"",
            escape_cypher_string(module.unwrap_or(UNKNOWN_MODULE))
        ),
        format!("{var}._module_version = \"{MODULE_VERSION}\""),
    ]
}

/// Escape a value for use inside a double-quoted Cypher string literal.
pub fn escape_cypher_string(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn indent(text: &str, width: usize) -> String {
    let pad = " ".repeat(width);
    text.lines()
        .map(|line| format!("{pad}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
pub(crate) fn normalize(query: &str) -> String {
    query
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
