//! HTTP boundary: `GET /status` and `POST /write`

use crate::error::WriteError;
use crate::types::{StatusReport, WriteRequest};
use crate::writer::Orchestrator;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, request::Parts, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

/// Browser origins allowed to call the service
#[derive(Debug, Clone, Default)]
pub struct CorsPolicy {
    allowed: Vec<String>,
}

impl CorsPolicy {
    pub fn new<I>(allowed: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            allowed: allowed
                .into_iter()
                .map(Into::into)
                .map(|o: String| o.trim().trim_end_matches('/').to_string())
                .filter(|o| !o.is_empty())
                .collect(),
        }
    }

    /// Local development hosts, private network hosts, and the allow-list
    pub fn allows(&self, origin: &str) -> bool {
        if self.allowed.iter().any(|o| o == origin) {
            return true;
        }

        let Some(authority) = origin
            .strip_prefix("http://")
            .or_else(|| origin.strip_prefix("https://"))
        else {
            return false;
        };
        let host = match authority.rsplit_once(':') {
            Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
                host
            }
            Some(_) => return false,
            None => authority,
        };

        if host.eq_ignore_ascii_case("localhost") {
            return true;
        }
        match host.parse::<Ipv4Addr>() {
            Ok(ip) => ip.is_loopback() || ip.is_private(),
            Err(_) => false,
        }
    }

    fn layer(self) -> CorsLayer {
        let policy = Arc::new(self);
        CorsLayer::new()
            .allow_origin(AllowOrigin::predicate(
                move |origin: &HeaderValue, _parts: &Parts| {
                    origin.to_str().map(|o| policy.allows(o)).unwrap_or(false)
                },
            ))
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE])
            .allow_credentials(true)
            .allow_private_network(true)
    }
}

impl IntoResponse for WriteError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn router(orchestrator: Orchestrator, cors: CorsPolicy) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/write", post(write))
        .with_state(orchestrator)
        .layer(cors.layer())
        .layer(TraceLayer::new_for_http())
}

async fn status(State(orchestrator): State<Orchestrator>) -> Json<StatusReport> {
    Json(orchestrator.tracker().status())
}

async fn write(
    State(orchestrator): State<Orchestrator>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, WriteError> {
    // A missing or malformed body is reported as a missing url
    let request: WriteRequest = serde_json::from_slice(&body).unwrap_or_default();
    orchestrator.write(request.url.as_deref()).await?;
    Ok(Json(json!({ "ok": true })))
}
