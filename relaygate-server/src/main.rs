// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  relaygate — multi-tenant reverse proxy for blockchain-node RPC
//
//  Runtime:  single tokio runtime, two listeners (proxy + metrics)
//  Config:   YAML file + env (GATEWAY_*) + CLI, merged via figment
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

mod handler;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use clap::Parser;
use relaygate_core::config::CliOverrides;
use relaygate_core::{AppConfig, ChainRouter};
use relaygate_observability::PrometheusMetricsSink;
use relaygate_proxy::GatewayState;
use relaygate_store::MySqlMetadataStore;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "gatewayd", about = "relaygate — multi-tenant blockchain RPC gateway")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (overrides the config file / env value).
    #[arg(long)]
    log_level: Option<String>,

    /// Proxy listener port (overrides the config file / env value).
    #[arg(long = "port.proxy")]
    port_proxy: Option<u16>,

    /// Metrics listener port (overrides the config file / env value).
    #[arg(long = "port.metrics")]
    port_metrics: Option<u16>,

    /// Print version and exit.
    #[arg(short = 'v', long = "version", action = clap::ArgAction::SetTrue)]
    version: bool,
}

impl From<&Cli> for CliOverrides {
    fn from(cli: &Cli) -> Self {
        CliOverrides {
            config_path: cli.config.clone(),
            log_level: cli.log_level.clone(),
            port_proxy: cli.port_proxy,
            port_metrics: cli.port_metrics,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.version {
        let commit = option_env!("GIT_COMMIT_HASH").unwrap_or("unknown");
        println!("gatewayd {} ({commit})", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let overrides: CliOverrides = (&cli).into();

    let config = match AppConfig::load(&overrides) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("fatal: failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "relaygate starting");

    let chain_file = match config.load_chain_file() {
        Ok(file) => file,
        Err(e) => {
            error!(error = %e, "fatal: failed to load chain file");
            std::process::exit(1);
        }
    };
    let chain_router = ChainRouter::from_chain_file(&chain_file);
    info!(chains = chain_router.len(), "Chain router built");

    let store = match MySqlMetadataStore::connect(&config.db).await {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "fatal: failed to connect to metadata store");
            std::process::exit(1);
        }
    };

    let metrics = match PrometheusMetricsSink::new() {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            error!(error = %e, "fatal: failed to initialise metrics registry");
            std::process::exit(1);
        }
    };

    let state = GatewayState::new(chain_router, Arc::new(store), metrics.clone());

    let proxy_addr = config.proxy.http_addr;
    let metrics_addr = config.metrics.http_addr;

    let proxy_task = tokio::spawn(run_proxy_listener(state, proxy_addr));
    let metrics_task = tokio::spawn(run_metrics_listener(metrics, metrics_addr));

    info!(proxy_addr = %proxy_addr, metrics_addr = %metrics_addr, "relaygate is ready — serving traffic");

    tokio::select! {
        _ = shutdown_signal() => {
            info!("shutdown signal received, stopping");
        }
        result = proxy_task => {
            if let Err(e) = result {
                error!(error = %e, "proxy listener task failed");
            }
        }
        result = metrics_task => {
            if let Err(e) = result {
                error!(error = %e, "metrics listener task failed");
            }
        }
    }

    info!("relaygate stopped");
    Ok(())
}

async fn run_proxy_listener(state: GatewayState, addr: SocketAddr) {
    let app = Router::new().fallback(handler::handle).with_state(state);
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, addr = %addr, "failed to bind proxy listener");
            return;
        }
    };
    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    {
        error!(error = %e, "proxy listener stopped with error");
    }
}

async fn run_metrics_listener(metrics: Arc<PrometheusMetricsSink>, addr: SocketAddr) {
    let app = Router::new()
        .route("/metrics", get(move || render_metrics(metrics.clone())))
        .route("/health", get(|| async { "OK" }));

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, addr = %addr, "failed to bind metrics listener");
            return;
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "metrics listener stopped with error");
    }
}

async fn render_metrics(sink: Arc<PrometheusMetricsSink>) -> String {
    relaygate_observability::prometheus_exporter::render_metrics(sink.as_ref())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
