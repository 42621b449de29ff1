mod api;
mod config;
mod provider;
mod state;
mod utils;
mod watch;

use std::sync::Arc;
use std::time::Duration;

use api::api_router;
use axum::Router;
use config::{config_path_from_env, load_or_create_config, resolve_path};
use library::{
    JsonFileStorage, LibraryManager, LibraryServices, MediaProvider, Notifier, RedbSettings,
    WalkDirLister, WatchReconciler,
};
use metadata::ToolInspector;
use parking_lot::RwLock;
use provider::HttpProvider;
use reqwest::Client;
use state::AppState;
use tokio_util::sync::CancellationToken;
use tower_http::request_id::{MakeRequestUuid, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use watch::configure_mapping_watcher;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = config_path_from_env();
    let (config, created) = load_or_create_config(&config_path)?;
    if created {
        info!("Created default config at {:?}", config_path);
    } else {
        info!("Loaded config from {:?}", config_path);
    }
    if config.video_root.trim().is_empty() {
        warn!("video_root is not configured; the scan will find no files");
    }

    let sync = config.sync_config(&config_path);
    let settings_path = resolve_path(&config_path, &config.settings_path);
    let library_path = resolve_path(&config_path, &config.library_path);
    for path in [&settings_path, &library_path] {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }

    let client = Client::builder().user_agent("reelsync/0.1").build()?;
    let provider: Arc<dyn MediaProvider> = Arc::new(HttpProvider::new(
        client,
        &config.provider_url,
        Duration::from_secs(config.provider_timeout_secs.max(1)),
    ));
    let services = LibraryServices {
        provider: provider.clone(),
        lister: Arc::new(WalkDirLister),
        inspector: Arc::new(ToolInspector::new(
            config.ffprobe_path.clone(),
            config.mkvmerge_path.clone(),
        )),
        storage: Arc::new(JsonFileStorage::new(library_path)),
        settings: Arc::new(RedbSettings::open(&settings_path)?),
    };
    let manager = LibraryManager::new(sync, services, Notifier::default());
    if !manager.load_persisted().await {
        info!("Starting without a committed library");
    }

    let shutdown = CancellationToken::new();
    let refresh = tokio::spawn(manager.clone().run_refresh_loop(shutdown.clone()));
    let reconciler = WatchReconciler::new(manager.clone(), provider, config.watch_config());
    let reconcile = tokio::spawn(reconciler.run(shutdown.clone()));

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let state = AppState {
        manager: manager.clone(),
        config: Arc::new(config),
        watcher: Arc::new(RwLock::new(None)),
    };
    configure_mapping_watcher(&state);

    let app = Router::new()
        .nest("/api/v1", api_router(state.clone()))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Listening on {}", bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    manager.cancel_rebuild();
    *state.watcher.write() = None;
    if let Err(err) = refresh.await {
        warn!("Refresh loop ended abnormally: {}", err);
    }
    if let Err(err) = reconcile.await {
        warn!("Watch reconciler ended abnormally: {}", err);
    }
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                warn!("Failed to install terminate signal handler: {}", err);
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", err);
        }
    }

    info!("Shutdown signal received.");
}
