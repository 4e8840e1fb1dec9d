use printer_bridge::cli::Cli;
use printer_bridge::config::{self, ConfigStore};
use printer_bridge::runtime_config::{RuntimeConfig, Supervisor};
use printer_bridge::ws_server;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = match Cli::parse(&args) {
        Ok(cli) => cli,
        Err(help_text) => {
            println!("{}", help_text);
            std::process::exit(0);
        }
    };

    let _log_guard = init_logging(&cli);

    info!("========================================");
    info!("printer-bridge starting");
    info!("version: v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");

    let config_store = Arc::new(ConfigStore::new());
    let persisted = config_store.load();

    let restaurant_id = non_empty(cli.restaurant_id.clone())
        .or_else(|| persisted.get(config::KEY_RESTAURANT_ID).and_then(|v| v.as_str()).map(String::from))
        .unwrap_or_default();
    let device_name = non_empty(cli.device_name.clone())
        .or_else(|| persisted.get(config::KEY_DEVICE_NAME).and_then(|v| v.as_str()).map(String::from))
        .unwrap_or_default();
    let cloud_project_id = non_empty(cli.firebase_project.clone())
        .or_else(|| {
            persisted
                .get(config::KEY_FIREBASE_PROJECT_ID)
                .and_then(|v| v.as_str())
                .map(String::from)
        })
        .unwrap_or_default();

    if restaurant_id.is_empty() {
        warn!("no restaurantId configured - cloud queue poller stays stopped until one is set");
    } else {
        info!(restaurant_id = %restaurant_id, "restaurantId loaded");
    }

    let supervisor = Arc::new(Supervisor::new(RuntimeConfig {
        restaurant_id,
        device_name,
        cloud_project_id,
        device_id: String::new(),
    }));
    supervisor.restart_cloud().await;

    let state = ws_server::WsState {
        supervisor: supervisor.clone(),
        config_store,
        allowed_origins: cli.allowed_origins.clone(),
        port: cli.port,
    };

    if state.allowed_origins.is_empty() {
        warn!("no allowed-origins configured - WebSocket server is accepting all origins");
    }

    let router = ws_server::router(state);
    let addr = format!("{}:{}", cli.host, cli.port);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    info!(%addr, "WebSocket command server listening");

    let serve = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal());
    if let Err(e) = serve.await {
        error!("WebSocket server exited with error: {}", e);
    }

    info!("printer-bridge shut down");
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Ctrl-C received, shutting down");
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Sets up console logging plus a non-blocking rolling file appender under
/// the same platform config directory the config store writes to. Returns
/// the appender's flush guard, which the caller must hold for the process
/// lifetime or buffered log lines are lost on exit.
fn init_logging(cli: &Cli) -> tracing_appender::non_blocking::WorkerGuard {
    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("printer_bridge={}", default_level)));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_ansi(true);

    let log_dir = config::config_dir().join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let file_appender = tracing_appender::rolling::daily(&log_dir, "bridge.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .with_writer(non_blocking);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    guard
}
