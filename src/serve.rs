//! HTTP API in front of [`RelayService`].
//!
//! Endpoints:
//! - `GET /` ping.
//! - `POST /drm/{asset_id}` license challenge in, license bytes out.
//! - `GET /cdn/{asset_id}.mpd` rewritten manifest.
//!
//! Relay endpoints answer `OPTIONS` with an empty 200 and allow any origin.
use axum::extract::{Path as AxumPath, State};
use axum::http::header::{ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE, SERVER};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::json;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::relay::RelayService;
use crate::resolver::AssetId;

/// Content type of served manifests.
pub const DASH_CONTENT_TYPE: &str = "application/dash+xml";

#[derive(Clone)]
struct ServeState {
    relay: RelayService,
}

/// Build the API router.
pub fn router(relay: RelayService) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/drm/:asset_id", post(license).options(preflight))
        .route("/cdn/:manifest", get(manifest).options(preflight))
        .with_state(ServeState { relay })
}

/// Serve the API on `host:port` until the server fails.
pub async fn run(relay: RelayService, host: &str, port: u16) -> Result<()> {
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::Other(format!("Server bind error: {}", e)))?;
    info!("Listening on {}", addr);

    axum::serve(listener, router(relay).into_make_service())
        .await
        .map_err(|e| Error::Other(format!("Server error: {}", e)))?;
    Ok(())
}

async fn home() -> Response {
    with_headers(StatusCode::OK, "DRM Relay")
}

async fn preflight() -> Response {
    with_headers(StatusCode::OK, ())
}

async fn license(
    AxumPath(asset_id): AxumPath<String>,
    State(state): State<ServeState>,
    body: Bytes,
) -> Response {
    let asset_id = match asset_id.parse::<AssetId>() {
        Ok(id) => id,
        Err(e) => return error_response(&e),
    };

    match state.relay.get_license(asset_id, body).await {
        Ok(license) => with_headers(StatusCode::OK, license),
        Err(e) => error_response(&e),
    }
}

async fn manifest(
    AxumPath(file): AxumPath<String>,
    State(state): State<ServeState>,
) -> Response {
    let Some(asset_id) = file.strip_suffix(".mpd") else {
        return error_response(&Error::InvalidAssetId(file));
    };
    let asset_id = match asset_id.parse::<AssetId>() {
        Ok(id) => id,
        Err(e) => return error_response(&e),
    };

    match state.relay.get_manifest(asset_id).await {
        Ok(bytes) => {
            let mut response = with_headers(StatusCode::OK, bytes);
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(DASH_CONTENT_TYPE));
            response
        }
        Err(e) => error_response(&e),
    }
}

fn error_response(err: &Error) -> Response {
    let status = err.status_code();
    warn!("Request failed with {}: {}", status, err);
    with_headers(
        status,
        Json(json!({
            "status": status.as_u16(),
            "message": err.to_string()
        })),
    )
}

fn with_headers(status: StatusCode, body: impl IntoResponse) -> Response {
    let mut response = body.into_response();
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        SERVER,
        HeaderValue::from_static(concat!("drm-relay v", env!("CARGO_PKG_VERSION"))),
    );
    response
}
