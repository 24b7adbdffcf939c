use anyhow::Result;
use axum::serve;
use flock_core::{
    cache::StoreCache,
    chain::{FinalityState, FinalityTracker},
    config::AppConfig,
    metrics::MetricsCollector,
    proxy::Dispatcher,
    store::KvStore,
    sync::{BackfillSynchronizer, SyncCursor},
    upstream::{HttpClient, HttpClientConfig, HttpNodeClient, NodeClient},
};
use server::{create_app, AppState};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{signal, sync::broadcast, task::JoinHandle};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the logging system based on the configuration.
fn init_logging(config: &AppConfig) {
    let filter = if let Ok(env_filter) = std::env::var("RUST_LOG") {
        if env_filter == "debug" {
            EnvFilter::new("warn,flock_core=debug,server=debug,flock=debug,flock_cli=debug")
        } else if env_filter == "trace" {
            EnvFilter::new("warn,flock_core=trace,server=trace,flock=trace,flock_cli=trace")
        } else {
            EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| {
                EnvFilter::new("warn,flock_core=debug,server=debug,flock=debug,flock_cli=debug")
            })
        }
    } else {
        EnvFilter::new(format!(
            "warn,flock_core={level},server={level},flock={level},flock_cli={level}",
            level = config.logging.level
        ))
    };

    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.format.as_str() == "json" {
        let fmt_layer = tracing_subscriber::fmt::layer().json();
        registry.with(fmt_layer).init();
    } else {
        // "pretty" and any other format default to pretty logging
        let fmt_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_file(true)
            .with_line_number(true)
            .with_target(false);
        registry.with(fmt_layer).init();
    }
}

/// Container for initialized core services.
struct CoreServices {
    app_state: Arc<AppState>,
    finality_tracker: FinalityTracker,
    backfill: Option<BackfillSynchronizer>,
}

/// Opens the store and wires cache, node client, dispatcher and background workers.
fn init_core_services(config: &AppConfig) -> Result<CoreServices> {
    let metrics_collector = Arc::new(
        MetricsCollector::new()
            .map_err(|e| anyhow::anyhow!("Failed to initialize metrics: {e}"))?,
    );

    let store = Arc::new(
        KvStore::open(&config.store.path)
            .map_err(|e| anyhow::anyhow!("Failed to open store at {}: {e}", config.store.path))?,
    );
    info!(path = %config.store.path, "Store opened");

    let http = HttpClient::with_config(HttpClientConfig {
        concurrent_limit: config.server.max_concurrent_requests,
        user_agent: config.node.user_agent.clone(),
        headers: config.node.headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        ..HttpClientConfig::default()
    })
    .map_err(|e| anyhow::anyhow!("HTTP client initialization failed: {e}"))?;

    let node: Arc<dyn NodeClient> = Arc::new(HttpNodeClient::new(
        http,
        &config.node.url,
        &config.node.info_path,
        config.node_timeout(),
    ));
    info!(node_url = %config.node.url, headers = config.node.headers.len(), "Node client initialized");

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(StoreCache::new(store.clone())),
        node.clone(),
        metrics_collector.clone(),
    ));

    let finality = Arc::new(FinalityState::new());
    let finality_tracker = FinalityTracker::new(
        node.clone(),
        finality.clone(),
        metrics_collector.clone(),
        config.finality_poll_interval(),
    );

    let cursor = config.sync.enabled.then(|| SyncCursor::new(store));
    let backfill = cursor.clone().map(|cursor| {
        BackfillSynchronizer::new(
            dispatcher.clone(),
            cursor,
            finality.clone(),
            metrics_collector.clone(),
            config.backfill_config(),
        )
    });

    let app_state = Arc::new(AppState {
        dispatcher,
        node,
        finality,
        cursor,
        metrics_collector,
        info: config.info.clone(),
    });

    Ok(CoreServices { app_state, finality_tracker, backfill })
}

#[tokio::main]
async fn main() -> Result<()> {
    let config =
        AppConfig::load().map_err(|e| anyhow::anyhow!("Failed to load configuration: {e}"))?;
    config.validate().map_err(|e| anyhow::anyhow!("Configuration validation failed: {e}"))?;

    init_logging(&config);
    info!("Starting flock");
    debug!(
        node_url = %config.node.url,
        sync_enabled = config.sync.enabled,
        bind_port = config.server.bind_port,
        "Configuration loaded"
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let services = init_core_services(&config)?;
    let mut background: Vec<JoinHandle<()>> =
        vec![services.finality_tracker.start_with_shutdown(shutdown_tx.subscribe())];
    if let Some(backfill) = services.backfill {
        background.push(backfill.start_with_shutdown(shutdown_tx.subscribe()));
        info!("Backfill synchronizer started");
    } else {
        info!("Backfill disabled");
    }

    let app = create_app(services.app_state, &config);
    let addr = config.socket_addr().map_err(anyhow::Error::msg)?;
    info!(address = %addr, "RPC server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    if let Err(e) = serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "Server error occurred");
    }

    let _ = shutdown_tx.send(());
    stop_background_tasks(background).await;
    info!("Server shutdown complete");

    Ok(())
}

/// Graceful shutdown timeout in seconds.
/// After this timeout, background tasks are aborted.
const GRACEFUL_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

async fn stop_background_tasks(handles: Vec<JoinHandle<()>>) {
    let timeout = Duration::from_secs(GRACEFUL_SHUTDOWN_TIMEOUT_SECS);

    for mut handle in handles {
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Background task terminated abnormally"),
            Err(_) => {
                warn!("Background task did not stop in time, aborting");
                handle.abort();
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(
                error = %e,
                "Failed to install Ctrl+C handler"
            );
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!(
                    error = %e,
                    "Failed to install signal handler"
                );

                () = std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!(
        "Shutdown signal received, starting graceful shutdown (timeout: {}s)",
        GRACEFUL_SHUTDOWN_TIMEOUT_SECS
    );
}
