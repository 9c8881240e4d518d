//! Thin `axum` adapter over the [`Gateway`] facade.
//!
//! Routes live under `/api/whatsapp` behind bearer authentication; `/` is
//! an open health document.

pub mod auth;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::dispatcher::DispatchError;
use crate::session::{ConnectionState, LoginOutcome, SessionError, SessionSnapshot};
use crate::service::Gateway;

pub use auth::BearerAuth;

/// Service name reported by the health endpoint.
const SERVICE_NAME: &str = "wagate";

/// Body of `POST /send`.
#[derive(Debug, Deserialize)]
pub struct SendRequest {
    /// Free-form recipient phone number.
    pub phone: String,
    /// Text to send.
    pub message: String,
}

/// Error response with an HTTP status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "status": "error", "message": self.message })),
        )
            .into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        let status = match e {
            DispatchError::InvalidPhoneNumber(_)
            | DispatchError::InvalidMessage
            | DispatchError::AddressResolution(_) => StatusCode::BAD_REQUEST,
            DispatchError::SendFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

/// Build the HTTP router.
pub fn router(gateway: Arc<Gateway>, bearer: BearerAuth) -> Router {
    let api = Router::new()
        .route("/status", get(status))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/send", post(send))
        .route("/message/:id/status", get(message_status))
        .route_layer(middleware::from_fn_with_state(bearer, auth::require_bearer));

    Router::new()
        .route("/", get(health))
        .nest("/api/whatsapp", api)
        .layer(middleware::from_fn(log_request))
        .with_state(gateway)
}

/// Serve `router` on `addr` until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve(
    addr: SocketAddr,
    router: Router,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Wire label for the session status endpoint.
pub fn status_label(connection: ConnectionState) -> &'static str {
    match connection {
        ConnectionState::Connected => "CONNECTED",
        ConnectionState::Connecting | ConnectionState::AwaitingPairing => "WAITING_FOR_LOGIN",
        ConnectionState::Disconnected => "DISCONNECTED",
    }
}

fn status_body(snapshot: &SessionSnapshot) -> Value {
    let mut body = json!({ "status": status_label(snapshot.connection) });
    if let Some(identity) = &snapshot.identity {
        body["user"] = json!({
            "id": identity.user(),
            "name": snapshot.display_name.clone().unwrap_or_default(),
        });
    }
    body
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "UP", "service": SERVICE_NAME }))
}

async fn status(State(gateway): State<Arc<Gateway>>) -> Json<Value> {
    Json(status_body(&gateway.status()))
}

async fn login(State(gateway): State<Arc<Gateway>>) -> Result<Json<Value>, ApiError> {
    let body = match gateway.login().await? {
        LoginOutcome::AlreadyAuthenticated => json!({ "status": "CONNECTED" }),
        LoginOutcome::PairingCode(code)
        | LoginOutcome::AlreadyConnecting {
            pairing_code: Some(code),
        } => json!({ "status": "SCANNING", "qr": code }),
        LoginOutcome::AlreadyConnecting { pairing_code: None } => json!({ "status": "SCANNING" }),
    };
    Ok(Json(body))
}

async fn logout(State(gateway): State<Arc<Gateway>>) -> Result<Json<Value>, ApiError> {
    gateway.logout().await?;
    Ok(Json(json!({ "status": "success", "message": "Logged out" })))
}

async fn send(
    State(gateway): State<Arc<Gateway>>,
    body: Result<Json<SendRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = body.map_err(|e| {
        warn!(error = %e, "rejected send body");
        ApiError::new(StatusCode::BAD_REQUEST, "Invalid request body")
    })?;
    let sent = gateway.send(&req.phone, &req.message).await?;
    Ok(Json(json!({
        "status": "success",
        "message": "Message sent",
        "id": sent.id,
    })))
}

async fn message_status(
    State(gateway): State<Arc<Gateway>>,
    Path(id): Path<String>,
) -> Json<Value> {
    let status = gateway.message_status(&id).await;
    Json(json!({ "id": id, "status": status }))
}

async fn log_request(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let span = info_span!("request", request_id = %Uuid::new_v4());
    let started = Instant::now();
    let response = next.run(req).instrument(span.clone()).await;
    span.in_scope(|| {
        info!(
            %method,
            path = %path,
            status = response.status().as_u16(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "request handled"
        );
    });
    response
}
