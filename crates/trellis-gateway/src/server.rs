use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use trellis_core::error::{Result, TrellisError};

use crate::routes;
use crate::state::AppState;

/// HTTP server exposing the execute endpoint and knowledge-base routes.
pub struct GatewayServer {
    state: Arc<AppState>,
}

impl GatewayServer {
    pub fn new(state: AppState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/workflow/execute", post(routes::execute_workflow))
            .route("/api/health", get(routes::health))
            .route("/api/provider", get(routes::provider_info))
            .route("/api/knowledge-base", get(routes::knowledge_base_info))
            .route(
                "/api/knowledge-base/switch",
                post(routes::switch_knowledge_base),
            )
            .route(
                "/api/documents",
                get(routes::list_documents).post(routes::upload_document),
            )
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Serve until the cancellation token fires.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let bind = format!("{}:{}", self.state.config.host, self.state.config.port);
        let listener = TcpListener::bind(&bind)
            .await
            .map_err(|e| TrellisError::Configuration(format!("cannot bind {bind}: {e}")))?;
        info!(bind, "Gateway listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| TrellisError::Internal(format!("server error: {e}")))?;

        Ok(())
    }
}
