//! market-sentinel binary entrypoint.
//! `serve` runs the collector, the analysis engine and the HTTP API;
//! `scan --once` runs a single pass and exits.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use market_sentinel::{
    api, build_model_client,
    config::SentinelConfig,
    ingest::providers,
    metrics::Metrics,
    notify::{self, AntiFlutter},
    AlertSink, AnalysisEngine, CollectorScheduler, EngineSettings, NotifierMux, Store,
};

#[derive(Parser)]
#[command(name = "market-sentinel", about = "Financial news sentiment and impact monitor")]
struct Cli {
    /// Path to config TOML file (falls back to $SENTINEL_CONFIG, then config/sentinel.toml)
    #[arg(long, global = true, env = "SENTINEL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run collector, analysis engine and HTTP API until Ctrl-C
    Serve,
    /// Run a single collection pass
    Scan {
        /// Required; continuous scanning is what `serve` does
        #[arg(long)]
        once: bool,
        /// Skip the analysis cycle after collecting
        #[arg(long)]
        no_analyze: bool,
    },
    /// Print the version and exit
    Version,
}

/// Compact logs by default, JSON lines when `LOG_FORMAT=json`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("market_sentinel=info,warn"));

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .init();
    }
}

/// Long-lived components shared by `serve` and `scan`.
struct Runtime {
    store: Store,
    scheduler: Arc<CollectorScheduler>,
    engine: Arc<AnalysisEngine>,
    dispatcher: tokio::task::JoinHandle<()>,
}

/// SQLite creates the file but not its directory.
fn ensure_db_dir(database_url: &str) -> Result<()> {
    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:");
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() || path.contains(":memory:") {
        return Ok(());
    }
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating database directory {}", parent.display()))?;
    }
    Ok(())
}

async fn build_runtime(cfg: &SentinelConfig) -> Result<Runtime> {
    ensure_db_dir(&cfg.storage.database)?;
    let store = Store::open(&cfg.storage.database)
        .await
        .with_context(|| format!("opening store {}", cfg.storage.database))?
        .with_max_attempts(cfg.storage.max_attempts);

    let sources = providers::from_config(&cfg.collector);
    if sources.is_empty() {
        tracing::warn!("no sources enabled; the collector will idle");
    }
    let scheduler = Arc::new(CollectorScheduler::new(
        store.clone(),
        sources,
        Duration::from_secs(cfg.collector.scan_interval_secs),
    ));

    let model = build_model_client(&cfg.model).context("building model client")?;

    let (sink, rx) = AlertSink::new(store.clone(), cfg.notify.channel_capacity);
    let mux = NotifierMux::from_env();
    if mux.is_empty() {
        tracing::info!("no notifiers configured; alerts are only persisted");
    }
    let dispatcher = notify::spawn_dispatcher(rx, mux, AntiFlutter::new(cfg.notify.cooldown_secs));

    let engine = Arc::new(AnalysisEngine::new(
        store.clone(),
        model,
        sink,
        EngineSettings::from(&cfg.analyzer),
    ));

    Ok(Runtime {
        store,
        scheduler,
        engine,
        dispatcher,
    })
}

async fn serve(cfg: SentinelConfig) -> Result<()> {
    let rt = build_runtime(&cfg).await?;
    let metrics = Metrics::init()?;

    rt.scheduler.start().await;
    rt.engine.start().await;

    let state = api::AppState::new(
        rt.store.clone(),
        Some(Arc::clone(&rt.scheduler)),
        cfg.server.tokens.clone(),
    );
    let app = api::router(state).merge(metrics.router());

    let addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", cfg.server.host, cfg.server.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, auth = !cfg.server.tokens.is_empty(), "http api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;

    tracing::info!("shutting down: waiting for in-flight cycles");
    rt.scheduler.stop().await;
    rt.engine.stop().await;
    shutdown(rt).await;
    Ok(())
}

async fn scan_once(cfg: SentinelConfig, analyze: bool) -> Result<()> {
    let rt = build_runtime(&cfg).await?;

    let report = rt.scheduler.run_once().await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if analyze {
        let summary = rt.engine.process_cycle().await.context("analysis cycle")?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    shutdown(rt).await;
    Ok(())
}

/// Drop the last alert sender so the dispatcher drains and exits, then close the pool.
async fn shutdown(rt: Runtime) {
    let Runtime {
        store,
        scheduler,
        engine,
        dispatcher,
    } = rt;
    drop(scheduler);
    drop(engine);
    if tokio::time::timeout(Duration::from_secs(30), dispatcher).await.is_err() {
        tracing::warn!("alert dispatcher did not drain within 30s");
    }
    store.close().await;
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("ctrl-c received");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Version => {
            println!("market-sentinel {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::Serve => serve(SentinelConfig::load(cli.config.as_deref())?).await,
        Command::Scan { once, no_analyze } => {
            if !once {
                anyhow::bail!("`scan` requires --once; use `serve` for continuous scanning");
            }
            scan_once(SentinelConfig::load(cli.config.as_deref())?, !no_analyze).await
        }
    }
}
