//! CLI entry point for seeding a graph with a sample Account and its Widgets.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use graphsync_core::{Constants, EngineConfig, Record};
use graphsync_graph::{GraphClient, GraphConfig, Ingestor, TracingMetrics};

mod schemas;

const SAMPLE_WIDGETS: &str = include_str!("../data/widgets.json");

#[derive(Parser)]
#[command(name = "graphsync-seed")]
#[command(about = "Load a sample Account and its Widgets into Neo4j")]
struct Cli {
    /// Id of the Account that owns the widgets.
    #[arg(short, long, default_value = "demo-account")]
    account: String,

    /// Watermark for this pass (default: current unix time).
    #[arg(short, long)]
    update_tag: Option<i64>,

    /// JSON file holding an array of widget records (default: bundled sample).
    #[arg(short, long)]
    widgets: Option<String>,

    /// Records per write transaction (default: engine.batch_size).
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Remove widgets of this account not seen in this pass.
    #[arg(long)]
    cleanup: bool,

    /// Config file prefix (default: graphsync).
    #[arg(short, long, default_value = "graphsync")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();
    let mut engine_config = EngineConfig::load(&cli.config)?;
    if let Some(batch_size) = cli.batch_size {
        engine_config.batch_size = batch_size;
    }
    let update_tag = cli.update_tag.unwrap_or_else(|| chrono::Utc::now().timestamp());
    let widgets = read_widgets(cli.widgets.as_deref())?;

    let graph = GraphClient::connect(&load_graph_config(&cli.config)?).await?;
    let ingestor = Ingestor::new(engine_config).with_metrics(Arc::new(TracingMetrics));

    let account = serde_json::json!({ "id": cli.account })
        .as_object()
        .cloned()
        .unwrap_or_default();
    ingestor
        .load_with_default_batch(&graph, schemas::account(), &[account], &Constants::new(update_tag))
        .await?;

    let constants = Constants::new(update_tag).with(schemas::ACCOUNT_ID, cli.account.as_str());
    let loaded = ingestor
        .load_with_default_batch(&graph, schemas::widget(), &widgets, &constants)
        .await?;
    tracing::info!(
        account = %cli.account,
        update_tag,
        records = loaded.records,
        batches = loaded.batches,
        "Widgets loaded"
    );

    let deleted = if cli.cleanup {
        let summary = ingestor
            .cleanup_node_schema(&graph, schemas::widget(), &constants)
            .await?;
        summary.total_deleted()
    } else {
        0
    };

    let owned = graph
        .neighbor_ids("Account", &cli.account, "RESOURCE")
        .await?;
    let report = serde_json::json!({
        "account": cli.account,
        "update_tag": update_tag,
        "widgets_loaded": loaded.records,
        "widgets_deleted": deleted,
        "widgets_owned": owned.len(),
        "widgets_total": graph.count_nodes("Widget").await?,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

fn read_widgets(path: Option<&str>) -> anyhow::Result<Vec<Record>> {
    let raw = match path {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?,
        None => SAMPLE_WIDGETS.to_string(),
    };
    serde_json::from_str(&raw).context("widget file must hold a JSON array of objects")
}

fn load_graph_config(file_prefix: &str) -> anyhow::Result<GraphConfig> {
    let cfg = config::Config::builder()
        .add_source(config::File::with_name(file_prefix).required(false))
        .add_source(
            config::Environment::with_prefix("GRAPHSYNC")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    match cfg.get::<GraphConfig>("neo4j") {
        Ok(c) => Ok(c),
        Err(config::ConfigError::NotFound(_)) => Ok(GraphConfig::default()),
        Err(e) => Err(e.into()),
    }
}
