//! PhotonKV command-line interface
//!
//! Runs range queries and commands against an in-memory sharded store that
//! is seeded from a JSON file.
//!
//! # Examples
//!
//! ```bash
//! # Range query over a seeded store
//! photonkv rget --data seed.json --start b --end g --right-open
//!
//! # Run commands, one per line
//! echo "SET a 1\nGET a" | photonkv exec --data seed.json
//!
//! # Show the effective configuration
//! photonkv --config photonkv.toml config
//! ```

use anyhow::Context;
use bytes::Bytes;
use clap::{Args, Parser, Subcommand};
use photonkv::protocol::parse_line;
use photonkv::storage::ShardedStore;
use photonkv::{metrics, rget_region, Dispatcher, Region, StoreConfig};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// PhotonKV - sharded B-tree key/value store
#[derive(Parser, Debug)]
#[command(name = "photonkv")]
#[command(version = photonkv::VERSION)]
#[command(about = "PhotonKV - sharded B-tree key/value store with ordered range queries", long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML)
    #[arg(long, global = true, env = "PHOTONKV_CONFIG")]
    config: Option<PathBuf>,

    /// Log directory path; logs go to stderr only if unset
    #[arg(long, global = true, env = "PHOTONKV_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn", env = "RUST_LOG")]
    log_level: String,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Print Prometheus metrics after the command
    #[arg(long, global = true)]
    metrics: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a range query and print the entries as JSON
    Rget(RgetArgs),

    /// Run commands, one per line
    Exec(ExecArgs),

    /// Print the effective configuration as TOML
    Config,

    /// Show version
    Version,
}

#[derive(Args, Debug)]
struct RgetArgs {
    /// JSON object of key → string value to load first
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Start key (default: the empty key)
    #[arg(long, default_value = "")]
    start: String,

    /// End key (default: unbounded)
    #[arg(long)]
    end: Option<String>,

    /// Exclude the start key
    #[arg(long)]
    left_open: bool,

    /// Exclude the end key
    #[arg(long)]
    right_open: bool,

    /// Maximum entries to return (default: from configuration)
    #[arg(short, long)]
    limit: Option<usize>,
}

#[derive(Args, Debug)]
struct ExecArgs {
    /// JSON object of key → string value to load first
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Script file; reads stdin if not given
    script: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Keep the guard alive so buffered file logs are flushed on exit.
    let _log_guard = setup_logging(&cli)?;

    let config = StoreConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    metrics::init_metrics();

    match cli.command {
        Commands::Rget(args) => rget_command(config, args).await?,
        Commands::Exec(args) => exec_command(config, args).await?,
        Commands::Config => print!("{}", config.to_toml()?),
        Commands::Version => println!("PhotonKV {}", photonkv::VERSION),
    }

    if cli.metrics {
        print!("{}", metrics::gather()?);
    }
    Ok(())
}

/// Console logging on stderr, plus a daily rolling file if a directory is set
fn setup_logging(cli: &Cli) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::WARN);

    let (file_layer, guard) = match &cli.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, "photonkv.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(!cli.no_color),
        )
        .with(file_layer)
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .init();

    Ok(guard)
}

/// Build a store and seed it from a JSON object file
async fn open_store(config: StoreConfig, data: Option<&Path>) -> anyhow::Result<Arc<ShardedStore>> {
    let store = ShardedStore::new(config)?;
    if let Some(path) = data {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let pairs: BTreeMap<String, String> = serde_json::from_str(&text)
            .with_context(|| format!("{} is not a JSON object of strings", path.display()))?;
        let loaded = store
            .load(pairs.into_iter().map(|(k, v)| (Bytes::from(k), Bytes::from(v))))
            .await?;
        info!(pairs = loaded, path = %path.display(), "Seeded store");
    }
    Ok(Arc::new(store))
}

async fn rget_command(config: StoreConfig, args: RgetArgs) -> anyhow::Result<()> {
    let max_results = args.limit.unwrap_or(config.default_max_results);
    let store = open_store(config, args.data.as_deref()).await?;

    let region = Region::new(
        Bytes::from(args.start),
        args.end.map(Bytes::from),
        args.left_open,
        args.right_open,
    )?;
    debug!(%region, max_results, "Running range query");

    let entries = rget_region(&store, &region, max_results).await?;
    let mut rows = Vec::with_capacity(entries.len());
    for entry in entries {
        let key = String::from_utf8_lossy(&entry.key).into_owned();
        let value = entry.value.into_bytes()?;
        rows.push(serde_json::json!({
            "key": key,
            "value": String::from_utf8_lossy(&value),
        }));
    }
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}

async fn exec_command(config: StoreConfig, args: ExecArgs) -> anyhow::Result<()> {
    let store = open_store(config, args.data.as_deref()).await?;
    let mut dispatcher = Dispatcher::new(store);

    let input: Box<dyn Read> = match &args.script {
        Some(path) => Box::new(
            std::fs::File::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?,
        ),
        None => Box::new(std::io::stdin()),
    };

    for line in BufReader::new(input).lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let command = match parse_line(line) {
            Ok(command) => command,
            Err(err) => {
                println!("(error) {}", err);
                continue;
            }
        };
        match dispatcher.execute(&command).await {
            Ok(reply) => println!("{}", reply),
            Err(err) if err.is_fatal() => return Err(err.into()),
            Err(err) => println!("(error) {}", err),
        }
    }
    Ok(())
}
