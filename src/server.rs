//! HTTP event receiver.
//!
//! Thin adapter between the event transport and the orchestrator: decodes
//! the envelope, runs the handler under the request deadline, and answers
//! with a plain acknowledgement. Multiple requests are served in parallel;
//! each owns its own vendor client and compiled configuration.

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::SliError;
use crate::events::EventEnvelope;
use crate::orchestrator::SliEventHandler;

/// Hard per-request deadline; in-flight vendor calls are abandoned on expiry.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

struct ServerError(anyhow::Error);

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let message = format!("{}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": message })),
        )
            .into_response()
    }
}

impl<E> From<E> for ServerError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<SliEventHandler>,
}

pub fn router(state: AppState, path: &str) -> Router {
    Router::new()
        .route(path, post(receive_event))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn receive_event(
    State(state): State<AppState>,
    Json(envelope): Json<EventEnvelope>,
) -> Result<StatusCode, ServerError> {
    match tokio::time::timeout(REQUEST_TIMEOUT, state.handler.handle(&envelope)).await {
        Ok(Ok(())) => Ok(StatusCode::OK),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(SliError::Cancelled.into()),
    }
}

pub async fn run_server(state: AppState, port: u16, path: &str) -> anyhow::Result<()> {
    let app = router(state, path);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("listening for events on port {} path {}", port, path);
    axum::serve(listener, app).await?;
    Ok(())
}
