//! Declarative node and relationship schemas.
//!
//! Schemas are built once (typically stored in a `OnceLock` or behind an
//! `Arc`) and never mutated. Each instance caches the Cypher compiled from
//! it, so reusing the same instance across calls compiles only once.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Result, SchemaError};
use crate::property::{PropertyMap, PropertyRef};
use crate::record::{LASTUPDATED, SUB_RESOURCE_ID, SUB_RESOURCE_LABEL};

/// Attribute every node schema must declare; nodes are merged on it.
pub const ID_PROPERTY: &str = "id";

/// Direction of a relationship, relative to the node that owns it
/// (or to the source node, for a MatchLink).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum LinkDirection {
    /// `(node)<-[r]-(target)`
    Inward,
    /// `(node)-[r]->(target)`
    #[default]
    Outward,
}

/// A relationship created together with the node that owns it.
///
/// The target node is only ever matched, never created.
#[derive(Debug, Clone, PartialEq)]
pub struct RelSchema {
    target_label: String,
    target_matcher: PropertyMap,
    direction: LinkDirection,
    rel_label: String,
    properties: PropertyMap,
}

impl RelSchema {
    pub fn builder(target_label: impl Into<String>, rel_label: impl Into<String>) -> RelSchemaBuilder {
        RelSchemaBuilder {
            inner: RelSchema {
                target_label: target_label.into(),
                target_matcher: PropertyMap::new(),
                direction: LinkDirection::default(),
                rel_label: rel_label.into(),
                properties: PropertyMap::new(),
            },
        }
    }

    pub fn target_label(&self) -> &str {
        &self.target_label
    }

    pub fn target_matcher(&self) -> &PropertyMap {
        &self.target_matcher
    }

    pub fn direction(&self) -> LinkDirection {
        self.direction
    }

    pub fn rel_label(&self) -> &str {
        &self.rel_label
    }

    pub fn properties(&self) -> &PropertyMap {
        &self.properties
    }

    pub(crate) fn validate(&self, owner: &str) -> Result<()> {
        let context = format!("{owner}-[{}]-{}", self.rel_label, self.target_label);
        check_identifier(&self.target_label, &context)?;
        check_identifier(&self.rel_label, &context)?;
        check_matcher(&self.target_matcher, &context)?;
        check_properties(&self.properties, &context)?;
        require_const(&self.properties, LASTUPDATED, &context)
    }

    /// The target matcher as an inline map (`id: $ACCOUNT_ID`), for queries
    /// scoped by this relationship without any record in hand.
    pub(crate) fn const_matcher(&self, owner: &str) -> Result<String> {
        if let Some((key, _)) = self.target_matcher.iter().find(|(_, p)| !p.is_const()) {
            return Err(SchemaError::Definition(format!(
                "{owner}: sub-resource key '{key}' must reference a constant to scope statements run without records"
            )));
        }
        Ok(self
            .target_matcher
            .iter()
            .map(|(key, property)| format!("{key}: {property}"))
            .collect::<Vec<_>>()
            .join(", "))
    }
}

pub struct RelSchemaBuilder {
    inner: RelSchema,
}

impl RelSchemaBuilder {
    pub fn direction(mut self, direction: LinkDirection) -> Self {
        self.inner.direction = direction;
        self
    }

    /// Add a key the target node is matched on.
    pub fn target_key(mut self, key: impl Into<String>, property: PropertyRef) -> Self {
        self.inner.target_matcher.insert(key, property);
        self
    }

    pub fn property(mut self, name: impl Into<String>, property: PropertyRef) -> Self {
        self.inner.properties.insert(name, property);
        self
    }

    pub fn build(self) -> RelSchema {
        self.inner
    }
}

/// An extra label applied only to nodes whose properties match every condition.
///
/// Conditions compare a node property to a string literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalLabel {
    label: String,
    conditions: Vec<(String, String)>,
}

impl ConditionalLabel {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            conditions: Vec::new(),
        }
    }

    /// Require `node.<field> = "<value>"`.
    pub fn when(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.conditions.push((field.into(), value.into()));
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn conditions(&self) -> &[(String, String)] {
        &self.conditions
    }
}

#[derive(Debug, Default)]
pub(crate) struct NodeQueryCache {
    pub(crate) ingest: OnceLock<String>,
    pub(crate) indexes: OnceLock<Vec<String>>,
    pub(crate) cleanup: OnceLock<Vec<String>>,
    pub(crate) conditional_labels: OnceLock<Vec<String>>,
}

impl Clone for NodeQueryCache {
    fn clone(&self) -> Self {
        Self::default()
    }
}

/// A node label, its properties, and the relationships loaded with it.
#[derive(Debug, Clone)]
pub struct NodeSchema {
    label: String,
    properties: PropertyMap,
    sub_resource_relationship: Option<RelSchema>,
    other_relationships: Vec<RelSchema>,
    extra_labels: Vec<String>,
    conditional_labels: Vec<ConditionalLabel>,
    module: Option<String>,
    pub(crate) cache: NodeQueryCache,
}

impl NodeSchema {
    pub fn builder(label: impl Into<String>) -> NodeSchemaBuilder {
        NodeSchemaBuilder {
            inner: NodeSchema {
                label: label.into(),
                properties: PropertyMap::new(),
                sub_resource_relationship: None,
                other_relationships: Vec::new(),
                extra_labels: Vec::new(),
                conditional_labels: Vec::new(),
                module: None,
                cache: NodeQueryCache::default(),
            },
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn properties(&self) -> &PropertyMap {
        &self.properties
    }

    pub fn sub_resource_relationship(&self) -> Option<&RelSchema> {
        self.sub_resource_relationship.as_ref()
    }

    pub fn other_relationships(&self) -> &[RelSchema] {
        &self.other_relationships
    }

    pub fn extra_labels(&self) -> &[String] {
        &self.extra_labels
    }

    pub fn conditional_labels(&self) -> &[ConditionalLabel] {
        &self.conditional_labels
    }

    pub fn module(&self) -> Option<&str> {
        self.module.as_deref()
    }

    /// Every relationship on the schema, sub-resource first.
    pub fn relationships(&self) -> impl Iterator<Item = &RelSchema> {
        self.sub_resource_relationship
            .iter()
            .chain(self.other_relationships.iter())
    }

    /// Narrow the schema's relationships to `selected`, keeping schema order.
    ///
    /// Returns the sub-resource (if selected) and the selected other
    /// relationships. Selecting a relationship the schema does not declare
    /// is an error.
    pub fn select_relationships(
        &self,
        selected: &[&RelSchema],
    ) -> Result<(Option<&RelSchema>, Vec<&RelSchema>)> {
        if let Some(unknown) = selected
            .iter()
            .find(|rel| !self.relationships().any(|own| own == **rel))
        {
            return Err(SchemaError::InvalidArgument(format!(
                "relationship ({})-[{}]-({}) is not defined on {}",
                self.label,
                unknown.rel_label(),
                unknown.target_label(),
                self.label
            )));
        }
        let sub = self
            .sub_resource_relationship
            .as_ref()
            .filter(|sub| selected.contains(sub));
        let others = self
            .other_relationships
            .iter()
            .filter(|rel| selected.contains(rel))
            .collect();
        Ok((sub, others))
    }

    /// Check the schema is well-formed enough to compile.
    pub fn validate(&self) -> Result<()> {
        let context = self.label.as_str();
        check_identifier(&self.label, context)?;
        for label in &self.extra_labels {
            check_identifier(label, context)?;
        }
        for conditional in &self.conditional_labels {
            check_identifier(&conditional.label, context)?;
            for (field, _) in &conditional.conditions {
                check_identifier(field, context)?;
            }
        }
        if self.properties.is_empty() {
            return Err(SchemaError::Definition(format!(
                "{context} declares no properties"
            )));
        }
        check_properties(&self.properties, context)?;

        let id = self.properties.get(ID_PROPERTY).ok_or_else(|| {
            SchemaError::Definition(format!(
                "{context} must declare a unique '{ID_PROPERTY}' property"
            ))
        })?;
        if id.is_one_to_many() {
            return Err(SchemaError::Definition(format!(
                "{context}.{ID_PROPERTY} cannot be one-to-many"
            )));
        }
        if id.is_optional() {
            return Err(SchemaError::Definition(format!(
                "{context}.{ID_PROPERTY} cannot be optional; nodes are merged on it"
            )));
        }
        require_const(&self.properties, LASTUPDATED, context)?;

        if let Some(sub) = &self.sub_resource_relationship {
            sub.validate(context)?;
            if sub.target_matcher.iter().any(|(_, p)| p.is_one_to_many()) {
                return Err(SchemaError::Definition(format!(
                    "{context}: the sub-resource matcher cannot be one-to-many"
                )));
            }
        }
        for rel in &self.other_relationships {
            rel.validate(context)?;
        }
        Ok(())
    }
}

pub struct NodeSchemaBuilder {
    inner: NodeSchema,
}

impl NodeSchemaBuilder {
    pub fn property(mut self, name: impl Into<String>, property: PropertyRef) -> Self {
        self.inner.properties.insert(name, property);
        self
    }

    pub fn sub_resource(mut self, rel: RelSchema) -> Self {
        self.inner.sub_resource_relationship = Some(rel);
        self
    }

    pub fn other_relationship(mut self, rel: RelSchema) -> Self {
        self.inner.other_relationships.push(rel);
        self
    }

    pub fn extra_label(mut self, label: impl Into<String>) -> Self {
        self.inner.extra_labels.push(label.into());
        self
    }

    pub fn conditional_label(mut self, label: ConditionalLabel) -> Self {
        self.inner.conditional_labels.push(label);
        self
    }

    /// Name of the collector module stamped as `_module_name`.
    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.inner.module = Some(module.into());
        self
    }

    pub fn build(self) -> NodeSchema {
        self.inner
    }
}

#[derive(Debug, Default)]
pub(crate) struct MatchLinkQueryCache {
    pub(crate) link: OnceLock<String>,
    pub(crate) indexes: OnceLock<Vec<String>>,
    pub(crate) cleanup: OnceLock<String>,
}

impl Clone for MatchLinkQueryCache {
    fn clone(&self) -> Self {
        Self::default()
    }
}

/// A relationship between two nodes that already exist.
///
/// MatchLinks own neither endpoint; their writes and cleanup are scoped by
/// the `_sub_resource_label` / `_sub_resource_id` properties stamped on the
/// relationship itself.
#[derive(Debug, Clone)]
pub struct MatchLinkSchema {
    source_label: String,
    source_matcher: PropertyMap,
    target_label: String,
    target_matcher: PropertyMap,
    direction: LinkDirection,
    rel_label: String,
    properties: PropertyMap,
    module: Option<String>,
    pub(crate) cache: MatchLinkQueryCache,
}

impl MatchLinkSchema {
    pub fn builder(
        source_label: impl Into<String>,
        rel_label: impl Into<String>,
        target_label: impl Into<String>,
    ) -> MatchLinkSchemaBuilder {
        MatchLinkSchemaBuilder {
            inner: MatchLinkSchema {
                source_label: source_label.into(),
                source_matcher: PropertyMap::new(),
                target_label: target_label.into(),
                target_matcher: PropertyMap::new(),
                direction: LinkDirection::default(),
                rel_label: rel_label.into(),
                properties: PropertyMap::new(),
                module: None,
                cache: MatchLinkQueryCache::default(),
            },
        }
    }

    pub fn source_label(&self) -> &str {
        &self.source_label
    }

    pub fn source_matcher(&self) -> &PropertyMap {
        &self.source_matcher
    }

    pub fn target_label(&self) -> &str {
        &self.target_label
    }

    pub fn target_matcher(&self) -> &PropertyMap {
        &self.target_matcher
    }

    pub fn direction(&self) -> LinkDirection {
        self.direction
    }

    pub fn rel_label(&self) -> &str {
        &self.rel_label
    }

    pub fn properties(&self) -> &PropertyMap {
        &self.properties
    }

    pub fn module(&self) -> Option<&str> {
        self.module.as_deref()
    }

    pub fn validate(&self) -> Result<()> {
        let context = format!(
            "({})-[{}]-({})",
            self.source_label, self.rel_label, self.target_label
        );
        check_identifier(&self.source_label, &context)?;
        check_identifier(&self.target_label, &context)?;
        check_identifier(&self.rel_label, &context)?;
        check_matcher(&self.source_matcher, &context)?;
        check_matcher(&self.target_matcher, &context)?;
        if self.source_matcher.iter().any(|(_, p)| p.is_one_to_many()) {
            return Err(SchemaError::Definition(format!(
                "{context}: a source matcher cannot be one-to-many"
            )));
        }
        check_properties(&self.properties, &context)?;
        for required in [LASTUPDATED, SUB_RESOURCE_LABEL, SUB_RESOURCE_ID] {
            require_const(&self.properties, required, &context)?;
        }
        Ok(())
    }
}

pub struct MatchLinkSchemaBuilder {
    inner: MatchLinkSchema,
}

impl MatchLinkSchemaBuilder {
    pub fn direction(mut self, direction: LinkDirection) -> Self {
        self.inner.direction = direction;
        self
    }

    pub fn source_key(mut self, key: impl Into<String>, property: PropertyRef) -> Self {
        self.inner.source_matcher.insert(key, property);
        self
    }

    pub fn target_key(mut self, key: impl Into<String>, property: PropertyRef) -> Self {
        self.inner.target_matcher.insert(key, property);
        self
    }

    pub fn property(mut self, name: impl Into<String>, property: PropertyRef) -> Self {
        self.inner.properties.insert(name, property);
        self
    }

    /// Declare `lastupdated`, `_sub_resource_label` and `_sub_resource_id`
    /// as constants of the same names.
    pub fn scoped_properties(self) -> Self {
        self.property(LASTUPDATED, PropertyRef::constant(LASTUPDATED))
            .property(SUB_RESOURCE_LABEL, PropertyRef::constant(SUB_RESOURCE_LABEL))
            .property(SUB_RESOURCE_ID, PropertyRef::constant(SUB_RESOURCE_ID))
    }

    pub fn module(mut self, module: impl Into<String>) -> Self {
        self.inner.module = Some(module.into());
        self
    }

    pub fn build(self) -> MatchLinkSchema {
        self.inner
    }
}

// ── Validation helpers ───────────────────────────────────────────

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid")
    })
}

/// Whether `name` can be spliced into Cypher as a label, key or parameter name.
pub fn is_valid_identifier(name: &str) -> bool {
    identifier_pattern().is_match(name)
}

/// Labels, keys and reference names are spliced into query text.
fn check_identifier(name: &str, context: &str) -> Result<()> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(SchemaError::Definition(format!(
            "{context}: '{name}' is not a valid identifier"
        )))
    }
}

fn check_properties(properties: &PropertyMap, context: &str) -> Result<()> {
    for (name, property) in properties.iter() {
        check_identifier(name, context)?;
        check_identifier(property.name(), context)?;
    }
    Ok(())
}

fn check_matcher(matcher: &PropertyMap, context: &str) -> Result<()> {
    if matcher.is_empty() {
        return Err(SchemaError::Definition(format!(
            "{context}: node matcher has no keys"
        )));
    }
    check_properties(matcher, context)
}

fn require_const(properties: &PropertyMap, name: &str, context: &str) -> Result<()> {
    match properties.get(name) {
        Some(p) if p.is_const() => Ok(()),
        Some(_) => Err(SchemaError::Definition(format!(
            "{context}: '{name}' must reference a constant"
        ))),
        None => Err(SchemaError::Definition(format!(
            "{context}: '{name}' property is required"
        ))),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn account_to_widget() -> RelSchema {
        RelSchema::builder("Account", "RESOURCE")
            .direction(LinkDirection::Inward)
            .target_key("id", PropertyRef::constant("ACCOUNT_ID"))
            .property(LASTUPDATED, PropertyRef::constant(LASTUPDATED))
            .build()
    }

    pub fn widget_to_gadget() -> RelSchema {
        RelSchema::builder("Gadget", "ATTACHED_TO")
            .target_key("id", PropertyRef::field("gadget_ids").one_to_many())
            .property(LASTUPDATED, PropertyRef::constant(LASTUPDATED))
            .build()
    }

    pub fn widget() -> NodeSchema {
        NodeSchema::builder("Widget")
            .property("id", PropertyRef::field("id"))
            .property("color", PropertyRef::field("color"))
            .property(LASTUPDATED, PropertyRef::constant(LASTUPDATED))
            .sub_resource(account_to_widget())
            .module("widgets")
            .build()
    }

    pub fn widget_with_gadgets() -> NodeSchema {
        NodeSchema::builder("Widget")
            .property("id", PropertyRef::field("id"))
            .property("color", PropertyRef::field("color").extra_index())
            .property(LASTUPDATED, PropertyRef::constant(LASTUPDATED))
            .sub_resource(account_to_widget())
            .other_relationship(widget_to_gadget())
            .extra_label("Asset")
            .module("widgets")
            .build()
    }

    pub fn widget_owner_link() -> MatchLinkSchema {
        MatchLinkSchema::builder("Person", "OWNS", "Widget")
            .source_key("email", PropertyRef::field("owner_email"))
            .target_key("id", PropertyRef::field("widget_id"))
            .scoped_properties()
            .module("widgets")
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn valid_fixtures_pass() {
        widget().validate().unwrap();
        widget_with_gadgets().validate().unwrap();
        widget_owner_link().validate().unwrap();
    }

    #[test]
    fn empty_schema_is_rejected() {
        let err = NodeSchema::builder("Widget").build().validate().unwrap_err();
        assert!(matches!(err, SchemaError::Definition(m) if m.contains("no properties")));
    }

    #[test]
    fn missing_id_is_rejected() {
        let err = NodeSchema::builder("Widget")
            .property("name", PropertyRef::field("name"))
            .property(LASTUPDATED, PropertyRef::constant(LASTUPDATED))
            .build()
            .validate()
            .unwrap_err();
        assert!(matches!(err, SchemaError::Definition(m) if m.contains("'id'")));
    }

    #[test]
    fn lastupdated_must_be_a_constant() {
        let err = NodeSchema::builder("Widget")
            .property("id", PropertyRef::field("id"))
            .property(LASTUPDATED, PropertyRef::field(LASTUPDATED))
            .build()
            .validate()
            .unwrap_err();
        assert!(matches!(err, SchemaError::Definition(m) if m.contains("must reference a constant")));
    }

    #[test]
    fn relationship_without_lastupdated_is_rejected() {
        let rel = RelSchema::builder("Account", "RESOURCE")
            .target_key("id", PropertyRef::constant("ACCOUNT_ID"))
            .build();
        let err = NodeSchema::builder("Widget")
            .property("id", PropertyRef::field("id"))
            .property(LASTUPDATED, PropertyRef::constant(LASTUPDATED))
            .sub_resource(rel)
            .build()
            .validate()
            .unwrap_err();
        assert!(matches!(err, SchemaError::Definition(m) if m.contains("lastupdated")));
    }

    #[test]
    fn one_to_many_id_is_rejected() {
        let err = NodeSchema::builder("Widget")
            .property("id", PropertyRef::field("ids").one_to_many())
            .property(LASTUPDATED, PropertyRef::constant(LASTUPDATED))
            .build()
            .validate()
            .unwrap_err();
        assert!(matches!(err, SchemaError::Definition(m) if m.contains("one-to-many")));
    }

    #[test]
    fn injected_label_is_rejected() {
        let err = NodeSchema::builder("Widget) DETACH DELETE (x")
            .property("id", PropertyRef::field("id"))
            .property(LASTUPDATED, PropertyRef::constant(LASTUPDATED))
            .build()
            .validate()
            .unwrap_err();
        assert!(matches!(err, SchemaError::Definition(m) if m.contains("not a valid identifier")));
    }

    #[test]
    fn matchlink_requires_scoping_properties() {
        let err = MatchLinkSchema::builder("Person", "OWNS", "Widget")
            .source_key("email", PropertyRef::field("owner_email"))
            .target_key("id", PropertyRef::field("widget_id"))
            .property(LASTUPDATED, PropertyRef::constant(LASTUPDATED))
            .build()
            .validate()
            .unwrap_err();
        assert!(matches!(err, SchemaError::Definition(m) if m.contains(SUB_RESOURCE_LABEL)));
    }

    #[test]
    fn matchlink_source_cannot_be_one_to_many() {
        let err = MatchLinkSchema::builder("Person", "OWNS", "Widget")
            .source_key("email", PropertyRef::field("emails").one_to_many())
            .target_key("id", PropertyRef::field("widget_id"))
            .scoped_properties()
            .build()
            .validate()
            .unwrap_err();
        assert!(matches!(err, SchemaError::Definition(m) if m.contains("source matcher")));
    }

    #[test]
    fn optional_id_is_rejected() {
        let err = NodeSchema::builder("Widget")
            .property("id", PropertyRef::field("id").optional())
            .property(LASTUPDATED, PropertyRef::constant(LASTUPDATED))
            .build()
            .validate()
            .unwrap_err();
        assert!(matches!(err, SchemaError::Definition(m) if m.contains("cannot be optional")));
    }

    #[test]
    fn conditional_label_names_are_checked() {
        let err = NodeSchema::builder("Widget")
            .property("id", PropertyRef::field("id"))
            .property(LASTUPDATED, PropertyRef::constant(LASTUPDATED))
            .conditional_label(ConditionalLabel::new("Critical").when("severity level", "high"))
            .build()
            .validate()
            .unwrap_err();
        assert!(matches!(err, SchemaError::Definition(m) if m.contains("severity level")));
    }

    #[test]
    fn select_relationships_keeps_schema_order() {
        let schema = widget_with_gadgets();
        let gadget = widget_to_gadget();
        let account = account_to_widget();

        let (sub, others) = schema.select_relationships(&[&gadget, &account]).unwrap();
        assert_eq!(sub.map(RelSchema::rel_label), Some("RESOURCE"));
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].rel_label(), "ATTACHED_TO");

        let (sub, others) = schema.select_relationships(&[]).unwrap();
        assert!(sub.is_none());
        assert!(others.is_empty());
    }

    #[test]
    fn selecting_an_undeclared_relationship_is_rejected() {
        let schema = widget();
        let gadget = widget_to_gadget();
        let err = schema.select_relationships(&[&gadget]).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidArgument(m) if m.contains("ATTACHED_TO")));
    }

    #[test]
    fn relationships_lists_sub_resource_first() {
        let schema = widget_with_gadgets();
        let labels: Vec<&str> = schema.relationships().map(RelSchema::rel_label).collect();
        assert_eq!(labels, vec!["RESOURCE", "ATTACHED_TO"]);
    }
}
