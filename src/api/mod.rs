//! HTTP layer exposing signal detection and entity-group management.

pub mod groups;
pub mod routes;
pub mod types;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Settings;
use crate::data::store::EventStore;
use crate::error::SignalError;
use crate::groups::GroupRegistry;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EventStore>,
    pub registry: Arc<GroupRegistry>,
    pub settings: Settings,
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/analytics/signals/advanced", post(routes::advanced_signals))
        .route("/api/analytics/signals", get(routes::simple_signals))
        .route("/api/entity-groups", get(groups::list).post(groups::create))
        .route("/api/entity-groups/suggest-name", get(groups::suggest_name))
        .route("/api/entity-groups/available-entities", get(groups::available_entities))
        .route(
            "/api/entity-groups/:id",
            get(groups::get_one).put(groups::update).delete(groups::delete),
        )
        .route("/api/entity-groups/:id/activate", post(groups::activate))
        .route("/api/entity-groups/:id/deactivate", post(groups::deactivate))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until shutdown.
pub async fn serve(state: AppState, host: String, port: u16) -> Result<()> {
    let router = router(state);
    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    info!(%addr, "serving maude-sentinel API");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, router.into_make_service()).await?;
    Ok(())
}

impl IntoResponse for SignalError {
    fn into_response(self) -> Response {
        let status = match &self {
            SignalError::BadRequest(_) | SignalError::BadFilter(_) => StatusCode::BAD_REQUEST,
            SignalError::GroupConflict(_) => StatusCode::CONFLICT,
            SignalError::GroupNotFound(_) => StatusCode::NOT_FOUND,
            SignalError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            SignalError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            SignalError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({
            "code": self.code(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}
