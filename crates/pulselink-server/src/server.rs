//! Router assembly, server startup, and background maintenance.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use pulselink_core::IdentityMinter;
use pulselink_settings::RelaySettings;

use crate::dispatch::Dispatcher;
use crate::handlers::{self, AppState};
use crate::registry::ClientRegistry;

/// How often the idle-session sweeper runs.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Build the axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::home))
        .route("/app", get(handlers::app_socket))
        .route("/app/{id}", get(handlers::app_socket))
        .route("/ws", get(handlers::third_party_socket))
        .route("/ws/{id}", get(handlers::third_party_socket))
        .route("/register", get(handlers::register))
        .route("/qrcode", get(handlers::binding_qrcode))
        .route("/command", get(handlers::command))
        .route("/heartbeat", get(handlers::heartbeat))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the relay. Returns a handle to shut it down.
pub async fn start(settings: RelaySettings) -> Result<ServerHandle, std::io::Error> {
    let settings = Arc::new(settings);
    let registry = Arc::new(ClientRegistry::new(settings.max_send_queue));
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry)));
    let minter = Arc::new(IdentityMinter::new());

    let state = AppState {
        registry: Arc::clone(&registry),
        dispatcher,
        minter,
        settings: Arc::clone(&settings),
    };

    let sweeper = start_ttl_sweeper(
        Arc::clone(&registry),
        Duration::from_secs(settings.http_session_ttl_secs),
    );

    let router = build_router(state);
    let addr = format!("0.0.0.0:{}", settings.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), host = %settings.host_name, "relay started");

    let shutdown = CancellationToken::new();
    let shutdown_for_axum = shutdown.clone();
    let server = tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown_for_axum.cancelled().await;
        })
        .await
        .ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        shutdown,
        server,
        sweeper,
    })
}

/// Handle returned by [`start`] — keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
    sweeper: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Signal the server to stop accepting new connections. Live sessions
    /// continue until their transports close.
    pub fn shutdown(&self) {
        tracing::info!("relay shutdown initiated");
        self.shutdown.cancel();
    }

    /// Wait for the server task to finish after [`shutdown`], then stop the
    /// sweeper.
    pub async fn drain(self) {
        let _ = self.server.await;
        self.sweeper.abort();
        let _ = self.sweeper.await;
        tracing::debug!("relay drained");
    }
}

/// Periodically purge request-response sessions whose heartbeats stopped.
fn start_ttl_sweeper(registry: Arc<ClientRegistry>, ttl: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.tick().await; // consume the immediate first tick
        loop {
            ticker.tick().await;
            let removed = registry.purge_idle_request_response(ttl);
            if removed > 0 {
                tracing::info!(removed = removed, "idle session sweep");
            }
        }
    })
}
