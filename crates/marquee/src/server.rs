//! Status page and refresh endpoint.
//!
//! Everything here goes through [`StatusFacade`]; the server never touches
//! the supervisor directly.

use std::net::SocketAddr;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::{get, post},
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use marquee_core::{DeviceStatusView, StatusFacade};

use crate::error::CliError;

const INDEX_HTML: &str = include_str!("assets/index.html");

#[derive(Debug, Default, Deserialize)]
struct RefreshRequest {
    #[serde(default)]
    name: Option<String>,
}

pub fn router(facade: StatusFacade) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/devices", get(devices_handler))
        .route("/api/refresh", post(refresh_handler))
        .with_state(facade)
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn devices_handler(State(facade): State<StatusFacade>) -> Json<Vec<DeviceStatusView>> {
    Json(facade.devices())
}

/// Body is optional: empty or `{}` refreshes every device, `{"name": ..}`
/// just that one. The response is 204 either way.
async fn refresh_handler(State(facade): State<StatusFacade>, body: Bytes) -> impl IntoResponse {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        Some(RefreshRequest::default())
    } else {
        match serde_json::from_slice::<RefreshRequest>(&body) {
            Ok(request) => Some(request),
            Err(e) => {
                warn!(error = %e, "ignoring malformed refresh request");
                None
            }
        }
    };

    if let Some(RefreshRequest { name }) = request {
        debug!(device = ?name, "refresh requested");
        if let Err(e) = facade.refresh(name) {
            warn!(error = %e, "refresh not queued");
        }
    }
    StatusCode::NO_CONTENT
}

/// Serve until `cancel` fires.
pub async fn serve(
    addr: SocketAddr,
    facade: StatusFacade,
    cancel: CancellationToken,
) -> Result<(), CliError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| CliError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    let local = listener.local_addr().unwrap_or(addr);
    info!(address = %local, "status server listening");

    axum::serve(listener, router(facade))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|source| CliError::Bind {
            addr: local.to_string(),
            source,
        })
}
