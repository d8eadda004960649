//! Schemas for the seed data. Built once per process.

use std::sync::OnceLock;

use graphsync_core::{ConditionalLabel, LinkDirection, NodeSchema, PropertyRef, RelSchema};

const MODULE: &str = "graphsync-seed";

/// Constant naming the Account the widgets belong to.
pub const ACCOUNT_ID: &str = "ACCOUNT_ID";

pub fn account() -> &'static NodeSchema {
    static SCHEMA: OnceLock<NodeSchema> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        NodeSchema::builder("Account")
            .property("id", PropertyRef::field("id"))
            .property("lastupdated", PropertyRef::constant("lastupdated"))
            .module(MODULE)
            .build()
    })
}

/// `(:Account)-[:RESOURCE]->(:Widget)`, scoped by [`ACCOUNT_ID`]. Red
/// widgets also carry `:RedWidget`.
pub fn widget() -> &'static NodeSchema {
    static SCHEMA: OnceLock<NodeSchema> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        NodeSchema::builder("Widget")
            .property("id", PropertyRef::field("id"))
            .property("color", PropertyRef::field("color").optional().extra_index())
            .property("lastupdated", PropertyRef::constant("lastupdated"))
            .sub_resource(
                RelSchema::builder("Account", "RESOURCE")
                    .direction(LinkDirection::Inward)
                    .target_key("id", PropertyRef::constant(ACCOUNT_ID))
                    .property("lastupdated", PropertyRef::constant("lastupdated"))
                    .build(),
            )
            .conditional_label(ConditionalLabel::new("RedWidget").when("color", "red"))
            .module(MODULE)
            .build()
    })
}
