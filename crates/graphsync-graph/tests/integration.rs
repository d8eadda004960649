//! Integration tests for graphsync-graph against a live Neo4j instance.
//!
//! Run with: cargo test --package graphsync-graph --test integration -- --ignored
//!
//! Skipped automatically if Neo4j is not available.

use chrono::Utc;
use serde_json::{json, Value};

use graphsync_core::{
    ConditionalLabel, Constants, EngineConfig, LinkDirection, MatchLinkSchema, NodeSchema,
    PropertyRef, Record, RelSchema,
};
use graphsync_graph::{GraphClient, GraphConfig, GraphSession, Ingestor};

async fn connect_or_skip() -> Option<GraphClient> {
    let config = GraphConfig::default();
    match GraphClient::connect(&config).await {
        Ok(client) => Some(client),
        Err(e) => {
            eprintln!("Skipping integration test (Neo4j not available): {e}");
            None
        }
    }
}

/// An id no other test run will use.
fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default())
}

async fn cleanup(client: &GraphClient, account_id: &str) {
    let q = neo4rs::query("MATCH (a:Account {id: $id}) OPTIONAL MATCH (a)-[:RESOURCE]->(n) DETACH DELETE a, n")
        .param("id", account_id);
    let _ = client.run(q).await;
}

fn records(values: Value) -> Vec<Record> {
    values
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect()
}

fn account_schema() -> NodeSchema {
    NodeSchema::builder("Account")
        .property("id", PropertyRef::field("id"))
        .property("lastupdated", PropertyRef::constant("lastupdated"))
        .module("integration")
        .build()
}

fn owned_by_account() -> RelSchema {
    RelSchema::builder("Account", "RESOURCE")
        .direction(LinkDirection::Inward)
        .target_key("id", PropertyRef::constant("ACCOUNT_ID"))
        .property("lastupdated", PropertyRef::constant("lastupdated"))
        .build()
}

fn widget_schema() -> NodeSchema {
    NodeSchema::builder("Widget")
        .property("id", PropertyRef::field("id"))
        .property("color", PropertyRef::field("color"))
        .property("lastupdated", PropertyRef::constant("lastupdated"))
        .sub_resource(owned_by_account())
        .other_relationship(
            RelSchema::builder("Gadget", "ATTACHED_TO")
                .target_key("id", PropertyRef::field("gadget_ids").one_to_many())
                .property("lastupdated", PropertyRef::constant("lastupdated"))
                .build(),
        )
        .module("integration")
        .build()
}

fn gadget_schema() -> NodeSchema {
    NodeSchema::builder("Gadget")
        .property("id", PropertyRef::field("id"))
        .property("lastupdated", PropertyRef::constant("lastupdated"))
        .sub_resource(owned_by_account())
        .module("integration")
        .build()
}

async fn load_account(ingestor: &Ingestor, client: &GraphClient, account_id: &str, tag: i64) {
    ingestor
        .load(
            client,
            &account_schema(),
            &records(json!([{ "id": account_id }])),
            100,
            &Constants::new(tag),
        )
        .await
        .unwrap();
}

fn scoped(account_id: &str, tag: i64) -> Constants {
    Constants::new(tag).with("ACCOUNT_ID", account_id)
}

#[tokio::test]
#[ignore = "requires live Neo4j — run with: cargo test --package graphsync-graph --test integration -- --ignored"]
async fn test_widget_account_lifecycle() {
    let Some(client) = connect_or_skip().await else {
        return;
    };
    let ingestor = Ingestor::new(EngineConfig::default());
    let account = unique("acct");
    let schema = widget_schema();
    let w = |n: u32| format!("{account}-w{n}");

    load_account(&ingestor, &client, &account, 100).await;

    // Pass 1: three widgets at watermark 100.
    let first = records(json!([
        { "id": w(1), "color": "red", "gadget_ids": [] },
        { "id": w(2), "color": "green", "gadget_ids": [] },
        { "id": w(3), "color": "blue", "gadget_ids": [] },
    ]));
    ingestor
        .load(&client, &schema, &first, 2, &scoped(&account, 100))
        .await
        .unwrap();

    let owned = client.neighbor_ids("Account", &account, "RESOURCE").await.unwrap();
    assert_eq!(owned, vec![w(1), w(2), w(3)]);
    for n in 1..=3 {
        assert_eq!(client.node_lastupdated("Widget", &w(n)).await.unwrap(), Some(100));
    }

    // Pass 2: two of them again, one with a new color, at watermark 200.
    let second = records(json!([
        { "id": w(1), "color": "red", "gadget_ids": [] },
        { "id": w(2), "color": "yellow", "gadget_ids": [] },
    ]));
    ingestor
        .load(&client, &schema, &second, 100, &scoped(&account, 200))
        .await
        .unwrap();
    assert_eq!(client.node_lastupdated("Widget", &w(1)).await.unwrap(), Some(200));
    assert_eq!(client.node_lastupdated("Widget", &w(2)).await.unwrap(), Some(200));
    assert_eq!(client.node_lastupdated("Widget", &w(3)).await.unwrap(), Some(100));

    // Cleanup at 200 removes the widget the second pass did not see.
    let summary = ingestor
        .cleanup_node_schema(&client, &schema, &scoped(&account, 200))
        .await
        .unwrap();
    assert_eq!(summary.statements[0].deleted, 1);

    let owned = client.neighbor_ids("Account", &account, "RESOURCE").await.unwrap();
    assert_eq!(owned, vec![w(1), w(2)]);
    assert_eq!(client.node_lastupdated("Widget", &w(3)).await.unwrap(), None);

    cleanup(&client, &account).await;
}

#[tokio::test]
#[ignore = "requires live Neo4j — run with: cargo test --package graphsync-graph --test integration -- --ignored"]
async fn test_reloading_the_same_pass_is_idempotent() {
    let Some(client) = connect_or_skip().await else {
        return;
    };
    let ingestor = Ingestor::default();
    let account = unique("acct");
    load_account(&ingestor, &client, &account, 100).await;

    let widgets = records(json!([
        { "id": format!("{account}-w1"), "color": "red", "gadget_ids": [] },
        { "id": format!("{account}-w2"), "color": "red", "gadget_ids": [] },
    ]));
    for _ in 0..2 {
        ingestor
            .load(&client, &widget_schema(), &widgets, 100, &scoped(&account, 100))
            .await
            .unwrap();
    }

    let owned = client.neighbor_ids("Account", &account, "RESOURCE").await.unwrap();
    assert_eq!(owned.len(), 2);
    let row = client
        .query_one(
            neo4rs::query("MATCH (:Account {id: $id})-[r:RESOURCE]->(:Widget) RETURN count(r) AS cnt")
                .param("id", account.as_str()),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.get::<i64>("cnt").unwrap(), 2);

    cleanup(&client, &account).await;
}

#[tokio::test]
#[ignore = "requires live Neo4j — run with: cargo test --package graphsync-graph --test integration -- --ignored"]
async fn test_one_to_many_fans_out_to_existing_targets() {
    let Some(client) = connect_or_skip().await else {
        return;
    };
    let ingestor = Ingestor::default();
    let account = unique("acct");
    let g = |n: u32| format!("{account}-g{n}");
    load_account(&ingestor, &client, &account, 100).await;

    ingestor
        .load(
            &client,
            &gadget_schema(),
            &records(json!([{ "id": g(1) }, { "id": g(2) }, { "id": g(3) }])),
            100,
            &scoped(&account, 100),
        )
        .await
        .unwrap();

    // g9 does not exist and is skipped without error.
    let widget_id = format!("{account}-w1");
    ingestor
        .load(
            &client,
            &widget_schema(),
            &records(json!([{ "id": widget_id, "color": "red", "gadget_ids": [g(1), g(2), g(9)] }])),
            100,
            &scoped(&account, 100),
        )
        .await
        .unwrap();

    let attached = client
        .neighbor_ids("Widget", &widget_id, "ATTACHED_TO")
        .await
        .unwrap();
    assert_eq!(attached, vec![g(1), g(2)]);

    cleanup(&client, &account).await;
}

#[tokio::test]
#[ignore = "requires live Neo4j — run with: cargo test --package graphsync-graph --test integration -- --ignored"]
async fn test_cleanup_leaves_other_sub_resources_alone() {
    let Some(client) = connect_or_skip().await else {
        return;
    };
    let ingestor = Ingestor::default();
    let a = unique("acct-a");
    let b = unique("acct-b");
    for account in [&a, &b] {
        load_account(&ingestor, &client, account, 100).await;
        ingestor
            .load(
                &client,
                &widget_schema(),
                &records(json!([{ "id": format!("{account}-w1"), "color": "red", "gadget_ids": [] }])),
                100,
                &scoped(account, 100),
            )
            .await
            .unwrap();
    }

    // Only account A is re-synced; its widget goes stale.
    ingestor
        .cleanup_node_schema(&client, &widget_schema(), &scoped(&a, 200))
        .await
        .unwrap();

    assert!(client.neighbor_ids("Account", &a, "RESOURCE").await.unwrap().is_empty());
    assert_eq!(
        client.neighbor_ids("Account", &b, "RESOURCE").await.unwrap(),
        vec![format!("{b}-w1")]
    );

    cleanup(&client, &a).await;
    cleanup(&client, &b).await;
}

#[tokio::test]
#[ignore = "requires live Neo4j — run with: cargo test --package graphsync-graph --test integration -- --ignored"]
async fn test_matchlinks_are_scoped_by_sub_resource() {
    let Some(client) = connect_or_skip().await else {
        return;
    };
    let ingestor = Ingestor::default();
    let account = unique("acct");
    let widget_id = format!("{account}-w1");
    load_account(&ingestor, &client, &account, 100).await;
    ingestor
        .load(
            &client,
            &widget_schema(),
            &records(json!([{ "id": widget_id, "color": "red", "gadget_ids": [] }])),
            100,
            &scoped(&account, 100),
        )
        .await
        .unwrap();

    // Link the widget back to its account with a MatchLink.
    let link = MatchLinkSchema::builder("Account", "AUDITS", "Widget")
        .source_key("id", PropertyRef::field("account_id"))
        .target_key("id", PropertyRef::field("widget_id"))
        .scoped_properties()
        .build();
    let rows = records(json!([{ "account_id": account, "widget_id": widget_id }]));
    let constants = Constants::new(100).with_sub_resource("Account", account.as_str());
    ingestor
        .load_matchlinks(&client, &link, &rows, 100, &constants)
        .await
        .unwrap();
    assert_eq!(
        client.neighbor_ids("Widget", &widget_id, "AUDITS").await.unwrap(),
        vec![account.clone()]
    );

    // A cleanup under a different sub-resource id must not touch it.
    ingestor
        .cleanup_matchlinks(&client, &link, "Account", "someone-else", 200)
        .await
        .unwrap();
    assert_eq!(
        client.neighbor_ids("Widget", &widget_id, "AUDITS").await.unwrap().len(),
        1
    );

    ingestor
        .cleanup_matchlinks(&client, &link, "Account", account.as_str(), 200)
        .await
        .unwrap();
    assert!(client.neighbor_ids("Widget", &widget_id, "AUDITS").await.unwrap().is_empty());

    cleanup(&client, &account).await;
}

#[tokio::test]
#[ignore = "requires live Neo4j — run with: cargo test --package graphsync-graph --test integration -- --ignored"]
async fn test_ensure_indexes_is_repeatable() {
    let Some(client) = connect_or_skip().await else {
        return;
    };
    let ingestor = Ingestor::default();
    for _ in 0..2 {
        ingestor.ensure_indexes(&client, &widget_schema()).await.unwrap();
    }
    client
        .run_autocommit(&graphsync_core::Statement::new("RETURN 1"))
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "requires live Neo4j — run with: cargo test --package graphsync-graph --test integration -- --ignored"]
async fn test_conditional_labels_follow_property_changes() {
    let Some(client) = connect_or_skip().await else {
        return;
    };
    let ingestor = Ingestor::default();
    let account = unique("acct");
    load_account(&ingestor, &client, &account, 100).await;

    let schema = NodeSchema::builder("Widget")
        .property("id", PropertyRef::field("id"))
        .property("color", PropertyRef::field("color"))
        .property("lastupdated", PropertyRef::constant("lastupdated"))
        .sub_resource(owned_by_account())
        .conditional_label(ConditionalLabel::new("RedWidget").when("color", "red"))
        .module("integration")
        .build();

    let widgets = records(json!([
        { "id": format!("{account}-w1"), "color": "red" },
        { "id": format!("{account}-w2"), "color": "blue" },
    ]));
    ingestor
        .load(&client, &schema, &widgets, 100, &scoped(&account, 100))
        .await
        .unwrap();
    assert_eq!(red_widgets(&client, &account).await, 1);

    let repainted = records(json!([
        { "id": format!("{account}-w1"), "color": "green" },
        { "id": format!("{account}-w2"), "color": "red" },
    ]));
    ingestor
        .load(&client, &schema, &repainted, 100, &scoped(&account, 200))
        .await
        .unwrap();
    assert_eq!(red_widgets(&client, &account).await, 1);
    let row = client
        .query_one(
            neo4rs::query("MATCH (w:RedWidget {id: $id}) RETURN count(w) AS cnt")
                .param("id", format!("{account}-w2")),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.get::<i64>("cnt").unwrap(), 1);

    cleanup(&client, &account).await;
}

async fn red_widgets(client: &GraphClient, account_id: &str) -> i64 {
    let row = client
        .query_one(
            neo4rs::query("MATCH (:Account {id: $id})-[:RESOURCE]->(w:RedWidget) RETURN count(w) AS cnt")
                .param("id", account_id),
        )
        .await
        .unwrap()
        .unwrap();
    row.get::<i64>("cnt").unwrap()
}
