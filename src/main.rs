use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use findroom::config::{Config, load_blacklist};
use findroom::credentials::CredentialStore;
use findroom::engine::{Engine, EngineOptions};
use findroom::http::{self, AppState};
use findroom::refresher::{self, BundleFileAuthenticator};
use findroom::rooms::RoomCache;
use findroom::upstream::EmsClient;

/// Cookies a bundle must carry before it replaces the current one.
const REQUIRED_COOKIES: &[&str] = &["emsAuthToken", "ASP.NET_SessionId"];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    findroom::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let blacklist = load_blacklist(&config.filters_path)?;
    let rooms = Arc::new(RoomCache::open(&config.rooms_path())?);
    let credentials = Arc::new(CredentialStore::open(&config.auth_path())?);
    let upstream = Arc::new(EmsClient::new(&config.upstream_base, config.upstream_timeout)?);

    let engine = Arc::new(Engine::new(
        upstream,
        credentials.clone(),
        rooms.clone(),
        EngineOptions {
            resolve_concurrency: config.resolve_concurrency,
            unlisted: config.unlisted,
            blacklist: blacklist.clone(),
        },
    ));

    match &config.bundle_file {
        Some(path) => {
            let authenticator = Arc::new(
                BundleFileAuthenticator::new(path.clone()).with_required_cookies(REQUIRED_COOKIES),
            );
            tokio::spawn(refresher::run_refresher(
                credentials.clone(),
                authenticator,
                config.refresh_every,
                config.refresh_retry,
            ));
        }
        None => warn!("FINDROOM_BUNDLE_FILE not set, serving persisted credentials only"),
    }

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("findroom listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  upstream: {}", config.upstream_base);
    info!("  cached rooms: {}", rooms.len());
    info!("  credentials: {}", if credentials.is_initialized() { "loaded" } else { "absent" });
    info!("  blacklist terms: {}", blacklist.len());
    info!("  resolve_concurrency: {}", config.resolve_concurrency);

    let state = AppState {
        engine,
        window_padding_hours: config.window_padding_hours,
    };
    axum::serve(listener, http::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("flushing room cache ({} entries)", rooms.len());
    rooms.flush()?;
    info!("findroom stopped");
    Ok(())
}

/// Resolves on SIGTERM or ctrl-c.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!("failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    info!("shutdown signal received, draining connections");
}
