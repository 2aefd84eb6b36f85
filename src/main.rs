//! Block parity wager settlement service entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use blockbet::api::{create_router, AppState};
use blockbet::config::Config;
use blockbet::error::RecoveryError;
use blockbet::feed::{HttpWagerFeed, MempoolOracleFeed, MockWagerFeed, OracleFeed, WagerFeed};
use blockbet::ledger::{JsonFileStore, Ledger, LedgerState, LedgerStore};
use blockbet::metrics;
use blockbet::oracle::resolve;
use blockbet::payout::{
    DestinationLookup, DirectoryLookup, DryRunRail, PaymentRail, PayoutDispatcher, WebhookRail,
};
use blockbet::recovery::{RecoveryCoordinator, RecoveryReport};
use blockbet::settlement::SettlementEngine;
use blockbet::utils::{shutdown_signal, unix_now};
use blockbet::wager::decoder_from_name;

/// How long shutdown waits for queued payouts to reach the rail.
const PAYOUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Block parity wager settlement service.
#[derive(Parser, Debug)]
#[command(name = "blockbet")]
#[command(about = "Pari-mutuel settlement of wagers on Bitcoin block hash parity")]
#[command(version)]
struct Args {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,

    /// Simulate payouts instead of paying.
    #[arg(long)]
    dry_run: Option<bool>,

    /// HTTP server port.
    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Recover, then settle live rounds (default).
    Run {
        /// Simulate payouts instead of paying.
        #[arg(long)]
        dry_run: Option<bool>,

        /// HTTP server port.
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Check configuration validity.
    CheckConfig,

    /// Run startup recovery once and exit.
    Recover,

    /// Resolve an oracle value (block hash) to its winning side.
    Resolve {
        /// Oracle value, e.g. a block hash.
        value: String,
    },

    /// Print the persisted ledger snapshot.
    Ledger,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("blockbet=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let json_logs = std::env::var("LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logs {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    match args.command {
        Some(Command::CheckConfig) => cmd_check_config(),
        Some(Command::Recover) => cmd_recover().await,
        Some(Command::Resolve { value }) => cmd_resolve(&value),
        Some(Command::Ledger) => cmd_ledger(),
        Some(Command::Run { dry_run, port }) => cmd_run(dry_run, port).await,
        None => cmd_run(args.dry_run, args.port).await,
    }
}

/// Everything a settlement run needs.
struct Runtime {
    engine: Arc<SettlementEngine>,
    wagers: Arc<dyn WagerFeed>,
    oracle: Arc<dyn OracleFeed>,
    dispatcher: PayoutDispatcher,
}

fn load_config(dry_run: Option<bool>, port: Option<u16>) -> anyhow::Result<Config> {
    let mut config = Config::load().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;
    if let Some(dry_run) = dry_run {
        config.dry_run = dry_run;
    }
    if let Some(port) = port {
        config.port = port;
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration validation failed: {}", e))?;
    Ok(config)
}

fn build_runtime(config: &Config) -> anyhow::Result<Runtime> {
    let store = JsonFileStore::new(&config.ledger_path);
    let fresh = LedgerState::fresh(unix_now(), config.wager_lookback_secs);
    let ledger = Ledger::open(Box::new(store), fresh, config.settled_id_capacity)
        .context("opening ledger")?;

    let decoder = decoder_from_name(&config.amount_source)
        .ok_or_else(|| anyhow::anyhow!("unknown amount source {}", config.amount_source))?;
    let engine = Arc::new(SettlementEngine::new(ledger, config.fee_rate, decoder));

    let retry = config.retry_policy();
    let oracle: Arc<dyn OracleFeed> = Arc::new(MempoolOracleFeed::new(
        &config.oracle_rest_url,
        &config.oracle_ws_url,
        retry.clone(),
    )?);
    let wagers: Arc<dyn WagerFeed> = match &config.wager_feed_url {
        Some(url) => Arc::new(HttpWagerFeed::new(url, config.poll_interval(), retry.clone())?),
        None => {
            warn!("WAGER_FEED_URL not set, accepting wagers through the API only");
            Arc::new(MockWagerFeed::new())
        }
    };

    let lookup: Arc<dyn DestinationLookup> = match &config.payout_directory_path {
        Some(path) => Arc::new(DirectoryLookup::from_file(path)?),
        None => Arc::new(DirectoryLookup::default()),
    };
    let rail: Arc<dyn PaymentRail> = if config.dry_run {
        Arc::new(DryRunRail::new())
    } else {
        let url = config
            .payout_webhook_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("PAYOUT_WEBHOOK_URL is required in live mode"))?;
        Arc::new(WebhookRail::new(url, retry.timeout)?)
    };

    Ok(Runtime {
        engine,
        wagers,
        oracle,
        dispatcher: PayoutDispatcher::new(lookup, rail),
    })
}

/// Run recovery, retrying transient fetch failures with backoff.
async fn recover_with_retry(
    coordinator: &RecoveryCoordinator,
    config: &Config,
) -> anyhow::Result<RecoveryReport> {
    let retry = config.retry_policy();
    let mut attempt = 0u32;
    loop {
        match coordinator.run().await {
            Ok(report) => return Ok(report),
            Err(RecoveryError::Fetch(e)) => {
                let delay = retry.next_delay(attempt);
                warn!(
                    error = %e,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Recovery fetch failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt = attempt.saturating_add(1);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Check configuration validity.
fn cmd_check_config() -> anyhow::Result<()> {
    println!("======================================================================");
    println!("BLOCKBET - CONFIGURATION CHECK");
    println!("======================================================================");

    print!("Loading configuration... ");
    let config = match Config::load() {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration load failed"));
        }
    };

    print!("Validating configuration... ");
    match config.validate() {
        Ok(()) => println!("OK"),
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration validation failed"));
        }
    }

    print!("Reading ledger... ");
    match JsonFileStore::new(&config.ledger_path).load() {
        Ok(Some(state)) => {
            println!("OK");
            println!("  Last round: {}", state.last_resolved_round);
            println!("  Open wagers: {}", state.open_wagers.len());
        }
        Ok(None) => println!("OK (no snapshot yet)"),
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Ledger unreadable"));
        }
    }

    println!("----------------------------------------------------------------------");
    println!("Configuration Summary:");
    println!("  Ledger: {}", config.ledger_path);
    println!("  Fee Rate: {}", config.fee_rate);
    println!("  Amount Source: {}", config.amount_source);
    println!("  Oracle: {}", config.oracle_rest_url);
    println!(
        "  Wager Feed: {}",
        config.wager_feed_url.as_deref().unwrap_or("API only")
    );
    println!("  Dry Run: {}", config.dry_run);
    println!("  Port: {}", config.port);
    println!("======================================================================");
    println!("CONFIGURATION CHECK PASSED");
    println!("======================================================================");

    Ok(())
}

/// Resolve an oracle value.
fn cmd_resolve(value: &str) -> anyhow::Result<()> {
    let side = resolve(value)?;
    println!("{} ({})", side, side.coin_face());
    Ok(())
}

/// Print the persisted ledger snapshot.
fn cmd_ledger() -> anyhow::Result<()> {
    let config = Config::load()?;
    match JsonFileStore::new(&config.ledger_path).load()? {
        Some(state) => println!("{}", serde_json::to_string_pretty(&state)?),
        None => println!("No ledger snapshot at {}", config.ledger_path),
    }
    Ok(())
}

/// Run recovery once, dispatch what it settled, and exit.
async fn cmd_recover() -> anyhow::Result<()> {
    let config = load_config(None, None)?;
    let runtime = build_runtime(&config)?;

    let coordinator = RecoveryCoordinator::new(
        runtime.engine.clone(),
        runtime.wagers.clone(),
        runtime.oracle.clone(),
    );
    let report = coordinator.run().await?;
    for result in report.payable() {
        runtime.dispatcher.dispatch(result).await;
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Recover, then settle live rounds until shutdown.
async fn cmd_run(dry_run: Option<bool>, port: Option<u16>) -> anyhow::Result<()> {
    info!("Loading configuration...");
    let config = load_config(dry_run, port)?;

    let prometheus = match metrics::install_prometheus() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Prometheus recorder not installed");
            None
        }
    };
    metrics::init_metrics();

    let runtime = build_runtime(&config)?;
    info!("Mode: {}", if config.dry_run { "DRY RUN" } else { "LIVE PAYOUTS" });
    info!("Fee rate: {}", config.fee_rate);
    info!("Ledger: {}", config.ledger_path);

    let mut app_state = AppState::new(runtime.engine.clone(), config.dry_run);
    if let Some(handle) = prometheus {
        app_state = app_state.with_prometheus(handle);
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);

    let router = create_router(app_state.clone());
    let _server_handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
    });

    let (payout_tx, payout_rx) = mpsc::unbounded_channel();
    let dispatcher_handle = runtime.dispatcher.clone().spawn(payout_rx);

    let coordinator = RecoveryCoordinator::new(
        runtime.engine.clone(),
        runtime.wagers.clone(),
        runtime.oracle.clone(),
    );
    let report = tokio::select! {
        report = recover_with_retry(&coordinator, &config) => report?,
        _ = shutdown_signal() => {
            info!("Shutdown during recovery");
            return Ok(());
        }
    };
    for result in report.payable() {
        if payout_tx.send(result.clone()).is_err() {
            warn!(round = result.round_marker, "Payout dispatcher is gone");
        }
    }
    app_state.set_ready(true);

    let (feed_tx, feed_rx) = mpsc::channel(1000);
    let wager_cursor = runtime.engine.last_wager_cursor().await;
    let last_round = runtime.engine.last_resolved_round().await;
    let _wager_handle = runtime.wagers.clone().subscribe(wager_cursor, feed_tx.clone());
    let _oracle_handle = runtime.oracle.clone().subscribe(last_round, feed_tx);

    info!("========================================");
    info!("SETTLEMENT ENGINE STARTED");
    info!("========================================");
    info!("Last round: {}", last_round);
    info!("Wager cursor: {}", wager_cursor);
    info!("Wager feed: {}", runtime.wagers.name());
    info!("Oracle feed: {}", runtime.oracle.name());
    info!("========================================");

    // The engine future owns the payout sender; once select! returns it is
    // dropped and the dispatcher finishes whatever is still queued.
    let outcome = tokio::select! {
        result = runtime.engine.clone().run(feed_rx, payout_tx, config.retry_policy()) => {
            if let Err(e) = &result {
                error!(error = %e, "Settlement loop stopped");
            }
            result
        }
        _ = shutdown_signal() => {
            info!("Shutting down");
            Ok(())
        }
    };

    match tokio::time::timeout(PAYOUT_DRAIN_TIMEOUT, dispatcher_handle).await {
        Ok(_) => info!("Queued payouts dispatched"),
        Err(_) => warn!(
            timeout_s = PAYOUT_DRAIN_TIMEOUT.as_secs(),
            "Payout drain timed out; the last settlement is offered again on restart"
        ),
    }

    outcome?;
    Ok(())
}
