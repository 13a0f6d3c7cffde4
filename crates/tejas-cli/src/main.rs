//! Process entrypoint: `db` subcommands for migration/connectivity checks,
//! and `run` to assemble the engine from a layered config and drive it
//! until a shutdown signal arrives. Thin by design — all engine logic
//! lives in the library crates this wires together.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use tejas_broker::{Broker, ZerodhaBroker};
use tejas_config::secrets::resolve_secrets;
use tejas_config::load_layered_yaml;
use tejas_execution::{ExecutorConfig, VirtualExecutor};
use tejas_marketdata::{next_weekly_expiry, MarketDataService};
use tejas_orchestrator::{Orchestrator, OrchestratorConfig, StrategyHost};
use tejas_schemas::OptionType;
use tejas_store::{connect_from_env, migrate, PostgresStore};
use tejas_strategy::{ResolvedInstrument, SupertrendReversalStrategy, SymbolResolver};

/// Configuration error (unrecognized key, missing required secret).
const EXIT_CONFIG_ERROR: i32 = 1;
/// Broker session could not be established.
const EXIT_AUTH_FAILURE: i32 = 2;

#[derive(Parser)]
#[command(name = "tejas")]
#[command(about = "Automated Nifty options scalping engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store (database) maintenance commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Start the trading engine
    Run {
        /// Layered config paths, merged in order (base -> env -> local)
        #[arg(long = "config", required = true)]
        config_paths: Vec<String>,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    Migrate,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let exit_code = match run().await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(error = %e, "tejas exited with error");
            e.downcast_ref::<CliError>().map(CliError::exit_code).unwrap_or(EXIT_CONFIG_ERROR)
        }
    };
    std::process::exit(exit_code);
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("authentication failed: {0}")]
    Auth(String),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            CliError::Auth(_) => EXIT_AUTH_FAILURE,
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = connect_from_env().await.context("connect to store")?;
            match cmd {
                DbCmd::Status => {
                    sqlx::query("select 1").execute(&pool).await.context("store status check")?;
                    println!("store_ok=true");
                }
                DbCmd::Migrate => {
                    migrate(&pool).await.context("run store migrations")?;
                    println!("migrations_applied=true");
                }
            }
        }
        Commands::Run { config_paths } => {
            run_engine(&config_paths).await?;
        }
    }

    Ok(())
}

async fn run_engine(config_paths: &[String]) -> Result<()> {
    let path_refs: Vec<&str> = config_paths.iter().map(|s| s.as_str()).collect();
    let loaded = load_layered_yaml(&path_refs).context("load engine config")?;
    let engine_config = loaded.parse_engine_config().context("parse engine config")?;
    info!(config_hash = %loaded.config_hash, mode = %engine_config.mode, "engine config loaded");

    let secrets = resolve_secrets(engine_config.mode).context("resolve secrets from environment")?;
    let api_key = secrets.broker_api_key.context("broker api key missing")?;
    let api_secret = secrets.broker_api_secret.context("broker api secret missing")?;
    let redirect_url = secrets.broker_redirect_url.unwrap_or_default();

    let token_path = default_token_path();
    let broker = Arc::new(ZerodhaBroker::new(api_key, api_secret, redirect_url, token_path));

    authenticate(&broker).await.map_err(|e| CliError::Auth(e.to_string()))?;

    let pool = connect_from_env().await.context("connect to store")?;
    migrate(&pool).await.context("run store migrations")?;
    let store = Arc::new(PostgresStore::new(pool));

    let instruments = broker.load_instruments().await.map_err(|e| CliError::Auth(e.to_string()))?;
    let resolver: Arc<dyn SymbolResolver> = Arc::new(InstrumentMasterResolver::new(instruments));

    let executor = Arc::new(VirtualExecutor::new(
        ExecutorConfig::from_engine_config(&engine_config),
        store.clone() as Arc<dyn tejas_store::Store>,
        engine_config.paper_capital,
    ));

    let market_data = MarketDataService::new(broker.clone(), NIFTY_50_TOKEN, LOOKBACK_DAYS);
    let orchestrator_config = OrchestratorConfig::from_engine_config(&engine_config, "NIFTY")
        .context("build orchestrator config")?;

    let mut strategies = StrategyHost::new();
    strategies.register(Box::new(SupertrendReversalStrategy::new(
        "supertrend",
        engine_config.strategy.scalping.clone(),
        resolver,
        engine_config.atm_strike_step,
        DEFAULT_LOT_SIZE,
    )));

    let mut orchestrator = Orchestrator::new(
        orchestrator_config,
        engine_config.mode,
        engine_config.anti_hedging_scope,
        market_data,
        executor,
        store as Arc<dyn tejas_store::Store>,
        strategies,
    );

    let stop_tx = orchestrator.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("shutdown signal received");
            let _ = stop_tx.send(true);
        }
    });

    orchestrator.run().await.context("engine run loop failed")
}

/// Skip the OAuth exchange when a previously persisted token exists and is
/// still accepted by the brokerage; fall back to printing the login URL so
/// an operator can complete the one-time exchange out of band.
async fn authenticate(broker: &ZerodhaBroker) -> Result<()> {
    if let Some(token) = broker.load_persisted_token() {
        broker.restore_session(token);
        if broker.load_instruments().await.is_ok() {
            info!("resumed session from persisted access token");
            return Ok(());
        }
        warn!("persisted access token was rejected; a fresh login is required");
    }

    bail!(
        "no live session: complete the login flow at {} and rerun with the resulting \
         request_token wired into the broker's session exchange",
        broker.login_url()
    );
}

fn default_token_path() -> PathBuf {
    let mut path = dirs_home().unwrap_or_else(|| PathBuf::from("."));
    path.push(".tejas");
    path.push("access_token");
    path
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

const NIFTY_50_TOKEN: i64 = 256265;
const LOOKBACK_DAYS: i64 = 5;
const DEFAULT_LOT_SIZE: i64 = 75;

/// Resolves a strike/option-type pair against the broker's instrument
/// master, always picking the contract on the nearest upcoming weekly
/// expiry for the underlying.
struct InstrumentMasterResolver {
    instruments: Vec<tejas_schemas::Instrument>,
}

impl InstrumentMasterResolver {
    fn new(instruments: Vec<tejas_schemas::Instrument>) -> Self {
        Self { instruments }
    }

    fn target_expiry(&self, underlying: &str) -> Option<NaiveDate> {
        let today = Utc::now().date_naive();
        let next = next_weekly_expiry(today);
        self.instruments
            .iter()
            .filter(|i| i.underlying == underlying)
            .map(|i| i.expiry)
            .filter(|e| *e >= today)
            .min_by_key(|e| (*e - next).num_days().abs())
    }
}

impl SymbolResolver for InstrumentMasterResolver {
    fn resolve(&self, strike: i64, option_type: OptionType) -> Option<ResolvedInstrument> {
        let expiry = self.target_expiry("NIFTY")?;
        self.instruments
            .iter()
            .find(|i| {
                i.underlying == "NIFTY"
                    && i.strike == strike
                    && i.option_type == option_type
                    && i.expiry == expiry
            })
            .map(|i| ResolvedInstrument {
                symbol: i.tradable_symbol.clone(),
                lot_size: i.lot_size,
            })
    }
}
