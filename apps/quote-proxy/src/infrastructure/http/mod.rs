//! HTTP/REST API adapter.
//!
//! # Endpoints
//!
//! - `GET|POST /api/{api}/{endpoint}` - Proxy a request upstream
//! - `GET /history/{subject}?start=&end=` - Tracked history points
//! - `GET /cache/stats`, `POST /cache/cleanup`, `DELETE /cache`
//! - `GET /scheduler/jobs`, `GET /scheduler/jobs/{id}`,
//!   `POST /scheduler/jobs/{id}/start`, `POST /scheduler/jobs/{id}/stop`,
//!   `GET /scheduler/stats`
//! - `GET /health`, `GET /healthz`, `GET /metrics`

mod controller;
mod request;
mod response;

use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub use controller::{AppState, create_router};
pub use request::*;
pub use response::*;

/// HTTP server serving the router until cancelled.
pub struct HttpServer {
    port: u16,
    router: Router,
    cancel: CancellationToken,
}

impl HttpServer {
    /// Create a new server.
    #[must_use]
    pub const fn new(port: u16, router: Router, cancel: CancellationToken) -> Self {
        Self {
            port,
            router,
            cancel,
        }
    }

    /// Run the server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError` if binding fails or the server encounters a
    /// fatal error while running.
    pub async fn run(self) -> Result<(), HttpServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HttpServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "HTTP server listening");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}
