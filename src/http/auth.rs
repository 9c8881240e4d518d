//! Shared-secret bearer authentication for the API routes.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use subtle::ConstantTimeEq;
use tracing::warn;

/// Expected `Authorization` header value.
#[derive(Clone)]
pub struct BearerAuth {
    expected: Arc<str>,
}

impl BearerAuth {
    /// Accept `Authorization: Bearer <token>`.
    pub fn new(token: &str) -> Self {
        Self {
            expected: Arc::from(format!("Bearer {token}")),
        }
    }

    /// Check a raw header value in constant time.
    pub fn verify(&self, header_value: Option<&str>) -> bool {
        header_value.is_some_and(|v| constant_time_compare(v, &self.expected))
    }
}

/// Reject requests without the shared secret.
pub async fn require_bearer(
    State(auth): State<BearerAuth>,
    req: Request,
    next: Next,
) -> Response {
    let provided = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if !auth.verify(provided) {
        warn!(path = %req.uri().path(), "rejected request with bad credentials");
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "Unauthorized" })),
        )
            .into_response();
    }
    next.run(req).await
}

/// Compare without leaking where, or whether by length, the inputs differ.
fn constant_time_compare(a: &str, b: &str) -> bool {
    let len = a.len().max(b.len());
    // Different pad bytes so a length mismatch can never compare equal.
    let padded_a: Vec<u8> = a.bytes().chain(std::iter::repeat(0x00)).take(len).collect();
    let padded_b: Vec<u8> = b.bytes().chain(std::iter::repeat(0xFF)).take(len).collect();
    let lengths_equal = a.len().ct_eq(&b.len());
    let contents_equal = padded_a.ct_eq(&padded_b);
    (lengths_equal & contents_equal).into()
}
