use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use notion_feed_core::id::parse_page_id;
use notion_feed_core::page_ids::all_page_ids;
use notion_feed_core::{FeedConfig, NotionClient, PostFeed, RecordStore};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "notion-feed")]
#[command(about = "Fetch a Notion database as a newest-first post list")]
struct Cli {
    /// YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Database id or URL; overrides notion.database_id
    #[arg(long)]
    database_id: Option<String>,

    /// Legacy page id or URL; overrides notion.page_id
    #[arg(long)]
    page_id: Option<String>,

    /// Pretty-print JSON output
    #[arg(long, default_value_t = false)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the posts as a JSON array
    Posts(PostsArgs),
    /// Print the member page ids of the database
    PageIds,
    /// Validate the configuration and print the effective settings
    CheckConfig,
    /// Print the canonical form of a Notion id or URL
    NormalizeId(NormalizeIdArgs),
}

#[derive(Debug, Args)]
struct PostsArgs {
    /// Print at most this many posts
    #[arg(long)]
    limit: Option<usize>,
}

#[derive(Debug, Args)]
struct NormalizeIdArgs {
    id: String,
}

#[derive(Debug, Serialize)]
struct ConfigSummary<'a> {
    root_id: Option<String>,
    base_url: &'a str,
    date_property: &'a str,
    max_concurrent: usize,
    authenticated: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match &cli.command {
        Command::NormalizeId(args) => run_normalize_id(args, cli.pretty),
        Command::CheckConfig => run_check_config(&load_config(&cli)?, cli.pretty),
        Command::PageIds => run_page_ids(load_config(&cli)?, cli.pretty).await,
        Command::Posts(args) => run_posts(args, load_config(&cli)?, cli.pretty).await,
    }
}

/// Logs go to stderr so stdout stays machine-readable
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();
}

fn load_config(cli: &Cli) -> Result<FeedConfig> {
    let mut config = match &cli.config {
        Some(path) => FeedConfig::from_path(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => FeedConfig::default(),
    };

    if let Some(id) = &cli.database_id {
        config.notion.database_id = Some(id.clone());
    }
    if let Some(id) = &cli.page_id {
        config.notion.page_id = Some(id.clone());
    }
    config.validate().context("invalid configuration")?;
    tracing::debug!(
        "Using root {:?} via {}",
        config.notion.root_id(),
        config.api.base_url
    );
    Ok(config)
}

fn emit_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{rendered}");
    Ok(())
}

fn run_normalize_id(args: &NormalizeIdArgs, pretty: bool) -> Result<()> {
    let id = parse_page_id(&args.id).ok_or_else(|| anyhow!("no Notion id in `{}`", args.id))?;
    emit_json(&id, pretty)
}

fn run_check_config(config: &FeedConfig, pretty: bool) -> Result<()> {
    let summary = ConfigSummary {
        root_id: config.notion.root_id().and_then(parse_page_id),
        base_url: &config.api.base_url,
        date_property: &config.posts.date_property,
        max_concurrent: config.posts.max_concurrent,
        authenticated: config.api.auth_token.is_some(),
    };
    emit_json(&summary, pretty)
}

async fn run_page_ids(config: FeedConfig, pretty: bool) -> Result<()> {
    let root_id = config
        .notion
        .root_id()
        .ok_or_else(|| anyhow!("no database_id or page_id configured"))?;
    let client = NotionClient::new(config.api.clone()).context("failed to build HTTP client")?;
    let snapshot = client
        .fetch_snapshot(root_id)
        .await
        .with_context(|| format!("failed to fetch {root_id}"))?;
    emit_json(&all_page_ids(&snapshot), pretty)
}

async fn run_posts(args: &PostsArgs, config: FeedConfig, pretty: bool) -> Result<()> {
    let feed = PostFeed::notion(config).context("failed to build HTTP client")?;
    let mut posts = feed.posts().await;
    if let Some(limit) = args.limit {
        posts.truncate(limit);
    }
    emit_json(&posts, pretty)
}
