//! Records handed over by collectors and the per-call constants that go with them.

use std::collections::BTreeMap;

use serde_json::Value;

/// A flat key/value record produced by a collector's transform step.
///
/// One record becomes exactly one node (plus its relationships) or exactly
/// one MatchLink row.
pub type Record = serde_json::Map<String, Value>;

/// The watermark stamped as `lastupdated` on everything written in one sync pass.
pub type UpdateTag = i64;

/// Name of the constant carrying the watermark.
pub const LASTUPDATED: &str = "lastupdated";

/// Name of the constant carrying a MatchLink's scoping label.
pub const SUB_RESOURCE_LABEL: &str = "_sub_resource_label";

/// Name of the constant carrying a MatchLink's scoping id.
pub const SUB_RESOURCE_ID: &str = "_sub_resource_id";

/// Values supplied once per call and bound as scalar query parameters.
///
/// Always carries the watermark under [`LASTUPDATED`]. The watermark is
/// fixed at construction; cleanup deletes everything not stamped with it.
#[derive(Debug, Clone, PartialEq)]
pub struct Constants {
    update_tag: UpdateTag,
    values: BTreeMap<String, Value>,
}

impl Constants {
    pub fn new(update_tag: UpdateTag) -> Self {
        let mut values = BTreeMap::new();
        values.insert(LASTUPDATED.to_string(), Value::from(update_tag));
        Self { update_tag, values }
    }

    /// Add or replace a constant. The watermark cannot be replaced.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        if name == LASTUPDATED {
            tracing::warn!(
                update_tag = self.update_tag,
                "Ignoring attempt to replace the watermark constant; build a new Constants instead"
            );
            return self;
        }
        self.values.insert(name, value.into());
        self
    }

    /// Bind the two constants a MatchLink write and cleanup are scoped by.
    pub fn with_sub_resource(
        self,
        label: impl Into<String>,
        id: impl Into<Value>,
    ) -> Self {
        self.with(SUB_RESOURCE_LABEL, label.into())
            .with(SUB_RESOURCE_ID, id)
    }

    pub fn update_tag(&self) -> UpdateTag {
        self.update_tag
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_binds_watermark() {
        let c = Constants::new(1_700_000_000);
        assert_eq!(c.update_tag(), 1_700_000_000);
        assert_eq!(c.get(LASTUPDATED), Some(&Value::from(1_700_000_000i64)));
    }

    #[test]
    fn with_replaces_existing_value() {
        let c = Constants::new(1)
            .with("region", "us-east-1")
            .with("region", "eu-west-1");
        assert_eq!(c.get("region"), Some(&Value::from("eu-west-1")));
        assert_eq!(c.iter().count(), 2);
    }

    #[test]
    fn with_sub_resource_sets_both_keys() {
        let c = Constants::new(1).with_sub_resource("AWSAccount", "1234");
        assert_eq!(c.get(SUB_RESOURCE_LABEL), Some(&Value::from("AWSAccount")));
        assert_eq!(c.get(SUB_RESOURCE_ID), Some(&Value::from("1234")));
    }

    #[test]
    fn watermark_cannot_be_replaced() {
        let c = Constants::new(200).with(LASTUPDATED, "200");
        assert_eq!(c.update_tag(), 200);
        assert_eq!(c.get(LASTUPDATED), Some(&Value::from(200i64)));

        let c = Constants::new(200).with(LASTUPDATED, 0);
        assert_eq!(c.update_tag(), 200);
    }
}
