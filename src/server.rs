//! HTTP server for downloading generated artifacts.
//!
//! ```text
//! browser ──→ GET /exports/{kind}/{code} ──→ artifact store ──→ CSV
//!                                              │
//!                                              └─ missing → 404 "not ready for download yet"
//! ```

use crate::core::pipeline::ExportKind;
use crate::export::{is_valid_experiment_code, ArtifactKey, ArtifactStore};
use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// Server configuration
#[derive(Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
    /// Store artifacts are served from
    pub store: Arc<dyn ArtifactStore>,
}

impl ServerConfig {
    pub fn new(port: u16, store: Arc<dyn ArtifactStore>) -> Self {
        Self { port, store }
    }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

fn error_response(status: StatusCode, error: impl Into<String>, code: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
        }),
    )
        .into_response()
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /exports/:kind/:code
async fn download(
    State(store): State<Arc<dyn ArtifactStore>>,
    Path((kind, code)): Path<(String, String)>,
) -> Response {
    let kind: ExportKind = match kind.parse() {
        Ok(kind) => kind,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e, "INVALID_KIND"),
    };
    let code = code.strip_suffix(".csv").unwrap_or(&code);
    if !is_valid_experiment_code(code) {
        return error_response(StatusCode::BAD_REQUEST, "invalid experiment code", "INVALID_CODE");
    }
    let key = ArtifactKey::new(kind, code);

    let lookup = {
        let store = Arc::clone(&store);
        let key = key.clone();
        tokio::task::spawn_blocking(move || store.get(&key)).await
    };

    match lookup {
        Ok(Ok(Some(artifact))) => {
            let disposition = format!("attachment; filename=\"{}_{}.csv\"", kind, key.experiment_code);
            let mut response = (StatusCode::OK, artifact.bytes).into_response();
            let headers = response.headers_mut();
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/csv; charset=utf-8"),
            );
            if let Ok(value) = HeaderValue::from_str(&disposition) {
                headers.insert(header::CONTENT_DISPOSITION, value);
            }
            response
        }
        Ok(Ok(None)) => error_response(
            StatusCode::NOT_FOUND,
            "not ready for download yet",
            "NOT_READY",
        ),
        Ok(Err(e)) => {
            tracing::error!("Failed to read {}: {}", key.path(), e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), "STORE_ERROR")
        }
        Err(e) => {
            tracing::error!("Store lookup task failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), "STORE_ERROR")
        }
    }
}

/// Build the router.
pub fn router(store: Arc<dyn ArtifactStore>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/exports/:kind/:code", get(download))
        .layer(
            CorsLayer::new()
                .allow_origin([
                    HeaderValue::from_static("http://localhost"),
                    HeaderValue::from_static("http://127.0.0.1"),
                ])
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(store)
}

/// Run the HTTP server
pub async fn run(
    config: ServerConfig,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let app = router(config.store);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Export server listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
