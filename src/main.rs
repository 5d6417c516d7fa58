//! WolfLock - Leader Election Record Storage
//!
//! Command line tool for bootstrapping and inspecting leader election
//! records.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolflock::config::{self, Backend, WolfLockConfig};
use wolflock::context::Context;
use wolflock::engine::{MariaDbEngine, SqliteEngine, TableEngine};
use wolflock::error::Result;
use wolflock::store::RecordStore;

/// WolfLock - Leader Election Record Storage
#[derive(Parser)]
#[command(name = "wolflock")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolflock.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolflock.toml")]
        output: PathBuf,

        /// Election name
        #[arg(long, default_value = "default")]
        name: String,
    },

    /// Validate configuration file
    Validate,

    /// Create the election table (safe to repeat)
    Provision,

    /// Show the current leader election record
    Get,

    /// Show this process's identity and lock description
    Describe,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match cli.command {
        Commands::Init { output, name } => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"));
            return run_init(output, name);
        }
        _ => load_config(&cli.config, cli.log_level.as_deref())?,
    };

    if let Commands::Validate = cli.command {
        return run_validate(&config);
    }

    let engine = open_engine(&config).await?;
    let store = RecordStore::new(
        engine.clone(),
        config.lock.table.clone(),
        config.lock.name.clone(),
        config.identity(),
    );
    let ctx = op_context(&config);

    let result = match cli.command {
        Commands::Provision => run_provision(&store, &ctx).await,
        Commands::Get => run_get(&store, &ctx).await,
        _ => run_describe(&store, engine.kind()),
    };

    engine.close().await;
    result
}

/// Load configuration and initialize logging from it
fn load_config(path: &std::path::Path, log_level: Option<&str>) -> Result<WolfLockConfig> {
    match WolfLockConfig::from_file(path) {
        Ok(config) => {
            init_logging(log_level.unwrap_or(&config.logging.level));
            Ok(config)
        }
        Err(e) => {
            init_logging(log_level.unwrap_or("info"));
            tracing::error!("Failed to load configuration from {:?}: {}", path, e);
            Err(e)
        }
    }
}

/// Initialize logging
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Open the configured engine
async fn open_engine(config: &WolfLockConfig) -> Result<Arc<dyn TableEngine>> {
    match config.database.backend {
        Backend::MariaDb => {
            let engine = MariaDbEngine::connect(&config.database, &config.engine).await?;
            Ok(Arc::new(engine))
        }
        Backend::Sqlite => {
            let path = config.database.path.as_ref().ok_or_else(|| {
                wolflock::Error::Config("database.path is required for the sqlite backend".into())
            })?;
            Ok(Arc::new(SqliteEngine::open(path)?))
        }
    }
}

/// Cancel the returned token on Ctrl+C or SIGTERM
fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => tracing::warn!("Interrupted, cancelling"),
                        _ = sigterm.recv() => tracing::warn!("Terminated, cancelling"),
                    }
                }
                Err(e) => {
                    tracing::debug!("SIGTERM handler unavailable: {}", e);
                    let _ = ctrl_c.await;
                    tracing::warn!("Interrupted, cancelling");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            tracing::warn!("Interrupted, cancelling");
        }

        token_clone.cancel();
    });

    token
}

/// Operation context bounded by the configured timeout and cancelled by
/// signals
fn op_context(config: &WolfLockConfig) -> Context {
    let root = Context::from_token(install_signal_handler());
    match config.op_timeout() {
        Some(timeout) => root.with_timeout(timeout),
        None => root.child(),
    }
}

/// Initialize a new configuration file
fn run_init(output: PathBuf, name: String) -> Result<()> {
    if output.exists() {
        return Err(wolflock::Error::Config(format!(
            "{:?} already exists, refusing to overwrite",
            output
        )));
    }

    std::fs::write(&output, config::sample_config(&name))?;
    println!("Configuration written to {:?}", output);
    println!("Edit the [database] section, then run: wolflock provision");
    Ok(())
}

/// Validate configuration file
fn run_validate(config: &WolfLockConfig) -> Result<()> {
    config.validate()?;
    println!("Configuration is valid");
    println!("  Lock:     {}/{}", config.lock.table, config.lock.name);
    println!("  Backend:  {:?}", config.database.backend);
    Ok(())
}

/// Create the election table
async fn run_provision(store: &RecordStore<dyn TableEngine>, ctx: &Context) -> Result<()> {
    store.provision_table(ctx).await?;
    println!("Table {} is ready", store.table());
    Ok(())
}

/// Show the current record
async fn run_get(store: &RecordStore<dyn TableEngine>, ctx: &Context) -> Result<()> {
    match store.get(ctx).await {
        Ok((record, _)) => {
            let pretty = serde_json::to_string_pretty(&record).map_err(wolflock::Error::Encode)?;
            println!("{}", pretty);
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            println!("No leader election record for {}", store.describe());
            Ok(())
        }
        Err(e) => {
            tracing::error!("Failed to read {}: {}", store.describe(), e);
            Err(e)
        }
    }
}

/// Show identity and lock description
fn run_describe(store: &RecordStore<dyn TableEngine>, backend: &str) -> Result<()> {
    println!("Lock:      {}", store.describe());
    println!("Identity:  {}", store.identity());
    println!("Backend:   {}", backend);
    Ok(())
}
