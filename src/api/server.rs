//! HTTP server
//!
//! Binds the listener, stacks the middleware and serves until a signal
//! arrives or the room stops on its own (after `/killall`).

use super::{
    handlers::AppState,
    middleware::{create_cors_layer, request_id_middleware},
    routes::create_router,
};
use crate::config::ServerConfig;
use crate::errors::{WanchatError, WanchatResult};
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Install the global fmt subscriber; `RUST_LOG` wins over the configured filter
pub fn init_tracing(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    // A second init (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub struct ApiServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(config: ServerConfig, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    /// Serve until Ctrl-C, SIGTERM or `room_stopped` resolves
    pub async fn run<F>(self, room_stopped: F) -> WanchatResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.create_app();
        let addr = self.socket_addr()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;

        info!("🌐 Wanchat listening on http://{}", addr);
        info!("   CORS: {:?}", self.config.allowed_origins);
        info!("📊 Endpoints: GET /ws, /health, /status, /metrics");

        let hub = Arc::clone(&self.state.hub);
        let shutdown = async move {
            tokio::select! {
                _ = shutdown_signal() => {},
                _ = room_stopped => info!("Room stopped, closing listener"),
            }
            hub.close();
        };

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("🛑 Server stopped gracefully");
        Ok(())
    }

    pub fn create_app(&self) -> axum::Router {
        create_router(Arc::clone(&self.state))
            .layer(axum::middleware::from_fn(request_id_middleware))
            .layer(create_cors_layer(&self.config.allowed_origins))
            .layer(TraceLayer::new_for_http())
    }

    fn socket_addr(&self) -> WanchatResult<SocketAddr> {
        let ip: IpAddr = self.config.host.parse().map_err(|e| {
            WanchatError::Server(format!("Invalid host {}: {}", self.config.host, e))
        })?;
        Ok(SocketAddr::from((ip, self.config.port)))
    }
}

/// Wait for Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
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
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received terminate signal"),
    }
}
