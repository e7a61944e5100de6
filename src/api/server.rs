//! HTTP server
//!
//! Binds the API router with CORS and request tracing, and shuts down when
//! the given cancellation token fires.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::scheduler::SchedulingService;

use super::queries::EventQueries;
use super::routes::create_router;

// ============================================================================
// App State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Command surface
    pub scheduling: Arc<SchedulingService>,

    /// Read side
    pub queries: Arc<dyn EventQueries>,

    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    pub fn new(scheduling: Arc<SchedulingService>, queries: Arc<dyn EventQueries>) -> Self {
        Self {
            scheduling,
            queries,
            start_time: Instant::now(),
        }
    }
}

/// Errors raised while serving
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {address}: {reason}")]
    Bind { address: String, reason: String },

    #[error("Server error: {0}")]
    Serve(String),
}

// ============================================================================
// API Server
// ============================================================================

/// The public HTTP surface
pub struct ApiServer {
    bind_address: String,
    state: AppState,
}

impl ApiServer {
    pub fn new(bind_address: impl Into<String>, state: AppState) -> Self {
        Self {
            bind_address: bind_address.into(),
            state,
        }
    }

    /// Build the router with all routes and layers
    pub fn build_router(&self) -> Router {
        create_router(self.state.clone())
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until `cancel` fires
    pub async fn serve(&self, cancel: CancellationToken) -> Result<(), ServerError> {
        let router = self.build_router();

        let listener = tokio::net::TcpListener::bind(&self.bind_address)
            .await
            .map_err(|e| ServerError::Bind {
                address: self.bind_address.clone(),
                reason: e.to_string(),
            })?;

        tracing::info!(address = %self.bind_address, "API server listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .map_err(|e| ServerError::Serve(e.to_string()))?;

        tracing::info!("API server shutdown complete");
        Ok(())
    }
}
