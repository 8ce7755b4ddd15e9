use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use hireall_ratelimit::config::Settings;
use hireall_ratelimit::ratelimit::{LimiterRegistry, RateLimiter};
use hireall_ratelimit::scheduler::TokioScheduler;
use hireall_ratelimit::storage::FileStore;

/// Inspect and maintain Hireall rate limit state.
#[derive(Debug, Parser)]
#[command(name = "hireall-ratelimit", version, about)]
struct Cli {
    /// JSON file holding the durable store
    #[arg(long, default_value = "ratelimit-store.json")]
    store: PathBuf,

    /// Settings file (YAML, TOML or JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Record one event if allowed and print the decision
    Check(LimitArgs),
    /// Print the events left in the current window
    Remaining(LimitArgs),
    /// Print milliseconds until the oldest event expires
    ResetTime(LimitArgs),
    /// Forget one identifier
    Reset(LimitArgs),
    /// Forget a whole namespace
    ResetAll(NamespaceArgs),
    /// Purge expired events from a namespace
    Cleanup(NamespaceArgs),
    /// Remove every rate limit record from the store
    ClearAll,
}

#[derive(Debug, Args)]
struct NamespaceArgs {
    namespace: String,

    /// Window length; defaults to the matching preset
    #[arg(long)]
    window_ms: Option<u64>,

    /// Events per window; defaults to the matching preset
    #[arg(long)]
    max_requests: Option<u64>,
}

#[derive(Debug, Args)]
struct LimitArgs {
    #[command(flatten)]
    limit: NamespaceArgs,

    identifier: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let settings = Settings::load(cli.config.as_ref()).context("Failed to load settings")?;
    info!(store = %cli.store.display(), "Opening rate limit store");

    let registry = LimiterRegistry::new(
        Arc::new(FileStore::new(&cli.store)),
        Arc::new(TokioScheduler::new()),
        settings,
    )?;

    match cli.command {
        Command::Check(args) => {
            let limiter = open(&registry, &args.limit).await?;
            let allowed = limiter.is_allowed(&args.identifier).await;
            println!("{}", if allowed { "allowed" } else { "denied" });
        }
        Command::Remaining(args) => {
            let limiter = open(&registry, &args.limit).await?;
            println!("{}", limiter.get_remaining(&args.identifier).await);
        }
        Command::ResetTime(args) => {
            let limiter = open(&registry, &args.limit).await?;
            println!("{}", limiter.get_reset_time(&args.identifier).await);
        }
        Command::Reset(args) => {
            let limiter = open(&registry, &args.limit).await?;
            limiter.reset(&args.identifier).await;
        }
        Command::ResetAll(args) => {
            let limiter = open(&registry, &args).await?;
            limiter.reset_all().await;
        }
        Command::Cleanup(args) => {
            let limiter = open(&registry, &args).await?;
            let report = limiter.cleanup().await;
            println!(
                "removed={} rewritten={} persisted={}",
                report.removed, report.rewritten, report.persisted
            );
        }
        Command::ClearAll => {
            println!("{}", registry.clear_all().await);
        }
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Build the limiter for a namespace from explicit limits or a preset.
async fn open(registry: &LimiterRegistry, args: &NamespaceArgs) -> anyhow::Result<RateLimiter> {
    let preset = registry
        .settings()
        .presets
        .iter()
        .find(|p| p.namespace == args.namespace);

    let window_ms = args
        .window_ms
        .or(preset.map(|p| p.window_ms))
        .ok_or_else(|| anyhow!("no --window-ms given and no preset for '{}'", args.namespace))?;
    let max_requests = args
        .max_requests
        .or(preset.map(|p| p.max_requests))
        .ok_or_else(|| anyhow!("no --max-requests given and no preset for '{}'", args.namespace))?;

    Ok(registry.create(&args.namespace, window_ms, max_requests).await?)
}
