use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use slidewin::config::{LoggingConfig, ServiceConfig};
use slidewin::ratelimit::{RateLimitResult, SlidingWindowLimiter};
use slidewin::store;

/// Exit status reported when the request was denied.
const EXIT_DENIED: u8 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "slidewin",
    version,
    about = "Check and consume sliding-window rate limits",
    long_about = "Check and consume sliding-window rate limits against the configured store.\n\nExits 0 when allowed, 2 when denied and 1 on error."
)]
struct Args {
    /// YAML configuration file
    #[arg(long, short, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level directive (overrides the configuration file)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Consume units for a key if the window has room for all of them
    Allow {
        /// Key identifying the quota subject
        key: String,

        /// Number of units to consume
        #[arg(short = 'n', long = "units", default_value_t = 1)]
        n: u64,
    },
    /// Show the quota left for a key without consuming any
    Status {
        /// Key identifying the quota subject
        key: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let mut config = ServiceConfig::load(args.config.as_deref())?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    init_tracing(&config.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config_file = ?args.config,
        backend = ?config.store.backend,
        limit = config.limiter.limit,
        window_ms = config.limiter.window_ms,
        "Configuration loaded"
    );

    let limit = config.limiter.limit_config()?;
    let store = store::connect(&config.store).await?;
    let limiter = SlidingWindowLimiter::new(store, limit)?;

    let result = match &args.command {
        Command::Allow { key, n } => limiter.allow_n(key, *n).await?,
        Command::Status { key } => limiter.status(key).await?,
    };

    print_result(&result, args.json)?;

    if result.allowed {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(EXIT_DENIED))
    }
}

/// Install the global subscriber. Logs go to stderr so stdout carries only results.
fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

fn print_result(result: &RateLimitResult, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(result)?);
    } else {
        println!(
            "allowed={} remaining={} limit={} reset_after_ms={}",
            result.allowed,
            result.remaining,
            result.limit,
            result.reset_after.as_millis()
        );
    }
    Ok(())
}
