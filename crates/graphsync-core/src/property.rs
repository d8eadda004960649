//! Property references: typed pointers to the value written for an attribute.

use std::fmt;

use serde_json::Value;

use crate::error::{Result, SchemaError};
use crate::record::{Constants, Record};

static NULL: Value = Value::Null;

/// Where a property's value comes from at write time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertySource {
    /// Look up this field on the record being written.
    Field(String),
    /// Use the constant of this name, supplied once per call.
    Const(String),
}

/// A reference to the value of one node or relationship attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyRef {
    source: PropertySource,
    extra_index: bool,
    one_to_many: bool,
    ignore_case: bool,
    fuzzy_and_ignore_case: bool,
    optional: bool,
}

impl PropertyRef {
    /// Reference `record[name]`.
    pub fn field(name: impl Into<String>) -> Self {
        Self::from_source(PropertySource::Field(name.into()))
    }

    /// Reference `constants[name]`.
    pub fn constant(name: impl Into<String>) -> Self {
        Self::from_source(PropertySource::Const(name.into()))
    }

    fn from_source(source: PropertySource) -> Self {
        Self {
            source,
            extra_index: false,
            one_to_many: false,
            ignore_case: false,
            fuzzy_and_ignore_case: false,
            optional: false,
        }
    }

    /// Ask the index manager to index this attribute on the node's label.
    pub fn extra_index(mut self) -> Self {
        self.extra_index = true;
        self
    }

    /// The referenced value is a list; a relationship is drawn to every matching element.
    pub fn one_to_many(mut self) -> Self {
        self.one_to_many = true;
        self
    }

    /// Match target nodes case-insensitively on this key.
    pub fn ignore_case(mut self) -> Self {
        self.ignore_case = true;
        self
    }

    /// Match target nodes whose key contains the value, ignoring case.
    pub fn fuzzy_and_ignore_case(mut self) -> Self {
        self.fuzzy_and_ignore_case = true;
        self
    }

    /// The field may be absent from a record; it is then written as null.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn source(&self) -> &PropertySource {
        &self.source
    }

    pub fn name(&self) -> &str {
        match &self.source {
            PropertySource::Field(name) | PropertySource::Const(name) => name,
        }
    }

    pub fn is_const(&self) -> bool {
        matches!(self.source, PropertySource::Const(_))
    }

    pub fn is_extra_index(&self) -> bool {
        self.extra_index
    }

    pub fn is_one_to_many(&self) -> bool {
        self.one_to_many
    }

    pub fn is_ignore_case(&self) -> bool {
        self.ignore_case
    }

    pub fn is_fuzzy_and_ignore_case(&self) -> bool {
        self.fuzzy_and_ignore_case
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }
}

/// Renders the Cypher expression for the reference: `item.<field>` or `$<const>`.
impl fmt::Display for PropertyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            PropertySource::Field(name) => write!(f, "item.{name}"),
            PropertySource::Const(name) => write!(f, "${name}"),
        }
    }
}

/// Resolve a reference to the value that will be written for it.
///
/// `index` is the record's position in the caller's list, used for error reporting.
pub fn resolve<'a>(
    property: &PropertyRef,
    record: &'a Record,
    index: usize,
    constants: &'a Constants,
) -> Result<&'a Value> {
    let value = match &property.source {
        PropertySource::Field(name) => match record.get(name) {
            Some(value) => value,
            None if property.optional => &NULL,
            None => {
                return Err(SchemaError::MissingField {
                    field: name.clone(),
                    index,
                })
            }
        },
        PropertySource::Const(name) => constants
            .get(name)
            .ok_or_else(|| SchemaError::MissingConstant(name.clone()))?,
    };

    if property.one_to_many && !(value.is_array() || value.is_null()) {
        return Err(SchemaError::InvalidArgument(format!(
            "'{}' is one-to-many and must resolve to a list, got {value}",
            property.name()
        )));
    }
    Ok(value)
}

/// An ordered attribute-name → reference map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyMap {
    entries: Vec<(String, PropertyRef)>,
}

impl PropertyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, replacing an existing one of the same name in place.
    pub fn insert(&mut self, name: impl Into<String>, property: PropertyRef) {
        let name = name.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = property,
            None => self.entries.push((name, property)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, property: PropertyRef) -> Self {
        self.insert(name, property);
        self
    }

    pub fn get(&self, name: &str) -> Option<&PropertyRef> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyRef)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, PropertyRef)> for PropertyMap {
    fn from_iter<I: IntoIterator<Item = (K, PropertyRef)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}
