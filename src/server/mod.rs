//! Web server: file browser API, share links and the access gate.

pub mod assets;
pub mod error;
pub mod gate;
pub mod routes;
pub mod stream;
pub mod suspicious;
pub mod templates;

pub use error::{ApiError, ApiResult};
pub use gate::{
    AccessGate, AccessPolicy, AllowAll, IpAllowList, Ipv4Range, PerimeterPolicy, TrustedProxies,
};
pub use routes::{build_router, AppState};
pub use suspicious::SuspiciousLog;
pub use templates::TemplateEngine;

use anyhow::Context;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::files::BaseRoot;

/// Configuration for the web server.
pub struct ServerConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub root: BaseRoot,
    /// Directory holding the link registry and content ledgers.
    pub data_dir: PathBuf,
    pub public_base_url: String,
    pub policy: Arc<dyn AccessPolicy>,
    pub trusted_proxies: TrustedProxies,
    pub suspicious_log: PathBuf,
    pub flush_interval: Duration,
}

/// Run the web server until Ctrl+C or SIGTERM.
///
/// The suspicious request log is flushed on its interval while the server
/// runs and once more after it stops accepting connections.
pub async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;

    let state = Arc::new(
        AppState::open(config.root, &config.data_dir, config.public_base_url)
            .context("loading templates")?,
    );

    let suspicious = Arc::new(SuspiciousLog::new(config.suspicious_log.clone()));
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let flusher = Arc::clone(&suspicious).spawn_flusher(config.flush_interval, shutdown_rx);

    let policy_name = config.policy.name();
    let suspicious_path = config.suspicious_log.clone();
    let gate = Arc::new(
        AccessGate::new(config.policy, suspicious).with_trusted_proxies(config.trusted_proxies),
    );
    let app = build_router(Arc::clone(&state), gate);

    let addr = SocketAddr::new(config.bind, config.port);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    info!(
        addr = %addr,
        root = %state.root.path().display(),
        public_base_url = %state.public_base_url,
        policy = policy_name,
        suspicious_log = %suspicious_path.display(),
        "Server listening"
    );
    if policy_name == AllowAll.name() {
        warn!("Access gate disabled: every path is reachable from any address");
    }

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped, flushing suspicious log");
    let _ = shutdown_tx.send(());
    if let Err(e) = flusher.await {
        error!(error = %e, "Suspicious log flusher panicked");
    }

    Ok(())
}

/// Wait for the shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
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
