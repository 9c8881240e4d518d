//! Tests for the HTTP routes, driven through `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use wagate::config::Config;
use wagate::correlator::EventCorrelator;
use wagate::http::{router, BearerAuth};
use wagate::ledger::LedgerOptions;
use wagate::service::Gateway;
use wagate::transport::{PairingEvent, Transport, TransportEvent};

use crate::support::{identity, temp_ledger, FakeTransport};

const TOKEN: &str = "test-secret";

struct App {
    router: Router,
    gateway: Arc<Gateway>,
    correlator: EventCorrelator,
    transport: Arc<FakeTransport>,
    _dir: tempfile::TempDir,
}

async fn app_with(transport: FakeTransport) -> App {
    let transport = Arc::new(transport);
    let (ledger, dir) = temp_ledger(LedgerOptions::default()).await;
    let (gateway, correlator) = Gateway::assemble(
        &Config::default(),
        Arc::clone(&transport) as Arc<dyn Transport>,
        ledger,
    )
    .expect("gateway should assemble");
    let gateway = Arc::new(gateway);
    App {
        router: router(Arc::clone(&gateway), BearerAuth::new(TOKEN)),
        gateway,
        correlator,
        transport,
        _dir: dir,
    }
}

async fn app() -> App {
    app_with(FakeTransport::new()).await
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
        .body(Body::empty())
        .expect("request")
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_owned()))
        .expect("request")
}

async fn call(app: &App, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.router.clone().oneshot(req).await.expect("infallible");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, body)
}

#[tokio::test]
async fn health_needs_no_token() {
    let app = app().await;
    let req = Request::builder().uri("/").body(Body::empty()).expect("request");
    let (status, body) = call(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "UP");
}

#[tokio::test]
async fn api_rejects_missing_and_wrong_tokens() {
    let app = app().await;

    let missing = Request::builder()
        .uri("/api/whatsapp/status")
        .body(Body::empty())
        .expect("request");
    let (status, body) = call(&app, missing).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "Unauthorized" }));

    let wrong = Request::builder()
        .uri("/api/whatsapp/status")
        .header(header::AUTHORIZATION, "Bearer nope")
        .body(Body::empty())
        .expect("request");
    let (status, _) = call(&app, wrong).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn status_reports_disconnected_then_connected_user() {
    let app = app().await;
    let (status, body) = call(&app, get("/api/whatsapp/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "DISCONNECTED" }));

    app.correlator
        .handle(TransportEvent::ConnectionEstablished {
            identity: identity(),
            display_name: Some("Shop".to_owned()),
        })
        .await;
    let (_, body) = call(&app, get("/api/whatsapp/status")).await;
    assert_eq!(
        body,
        json!({ "status": "CONNECTED", "user": { "id": "6281234567890", "name": "Shop" } })
    );
}

#[tokio::test]
async fn login_returns_pairing_code_then_scanning() {
    let app = app_with(FakeTransport::new().with_pairing(vec![PairingEvent::Code {
        code: "2@abc,def".to_owned(),
    }]))
    .await;

    let (status, body) = call(&app, post_json("/api/whatsapp/login", "")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "SCANNING", "qr": "2@abc,def" }));

    let (_, body) = call(&app, get("/api/whatsapp/status")).await;
    assert_eq!(body["status"], "WAITING_FOR_LOGIN");

    let (_, again) = call(&app, post_json("/api/whatsapp/login", "")).await;
    assert_eq!(again, json!({ "status": "SCANNING", "qr": "2@abc,def" }));
    assert_eq!(app.transport.connect_calls(), 1);
}

#[tokio::test]
async fn login_failure_is_a_server_error() {
    let app = app_with(FakeTransport::new().with_pairing(vec![PairingEvent::Error {
        message: "bridge offline".to_owned(),
    }]))
    .await;

    let (status, body) = call(&app, post_json("/api/whatsapp/login", "")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["status"], "error");
}

#[tokio::test]
async fn logout_without_pairing_succeeds() {
    let app = app().await;
    let (status, body) = call(&app, post_json("/api/whatsapp/logout", "")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "success", "message": "Logged out" }));
    assert_eq!(app.transport.logout_calls(), 0);
}

#[tokio::test]
async fn logout_transport_failure_is_a_server_error() {
    let app = app_with(
        FakeTransport::new().with_stored_identity("6281234567890:3@s.whatsapp.net", None),
    )
    .await;
    assert!(app.gateway.resume().await.expect("resume"));
    app.transport.fail_logout(true);

    let (status, _) = call(&app, post_json("/api/whatsapp/logout", "")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        app.gateway.status().identity,
        Some(identity()),
        "failed logout keeps the pairing"
    );
}

#[tokio::test]
async fn send_then_query_status() {
    let app = app().await;

    let (status, body) = call(
        &app,
        post_json(
            "/api/whatsapp/send",
            r#"{"phone":"081234567890","message":"Hello"}"#,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "status": "success", "message": "Message sent", "id": "MSG-1" })
    );

    let (status, body) = call(&app, get("/api/whatsapp/message/MSG-1/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "id": "MSG-1", "status": "SENT" }));
}

#[tokio::test]
async fn unknown_message_status_is_unknown() {
    let app = app().await;
    let (status, body) = call(&app, get("/api/whatsapp/message/nope/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "id": "nope", "status": "UNKNOWN" }));
}

#[tokio::test]
async fn malformed_send_body_is_a_bad_request() {
    let app = app().await;

    let (status, body) = call(&app, post_json("/api/whatsapp/send", r#"{"phone":"0812"}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid request body");

    let (status, _) = call(&app, post_json("/api/whatsapp/send", "not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(app.transport.sends().is_empty());
}

#[tokio::test]
async fn invalid_phone_is_a_bad_request() {
    let app = app().await;
    let (status, body) = call(
        &app,
        post_json("/api/whatsapp/send", r#"{"phone":"123","message":"hi"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "error");
    assert!(app.transport.sends().is_empty());
}

#[tokio::test]
async fn transport_send_failure_is_a_server_error() {
    let app = app().await;
    app.transport.fail_send(true);
    let (status, _) = call(
        &app,
        post_json(
            "/api/whatsapp/send",
            r#"{"phone":"6281234567890","message":"hi"}"#,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn read_receipt_is_visible_through_the_api() {
    let app = app().await;
    let (status, _) = call(
        &app,
        post_json(
            "/api/whatsapp/send",
            r#"{"phone":"081234567890","message":"Invoice attached"}"#,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        app.transport.sends()[0].0,
        "6281234567890@s.whatsapp.net"
    );

    app.correlator
        .handle(TransportEvent::ReceiptUpdate {
            message_ids: vec!["MSG-1".to_owned()],
            kind: wagate::transport::ReceiptKind::Read,
        })
        .await;

    let (_, body) = call(&app, get("/api/whatsapp/message/MSG-1/status")).await;
    assert_eq!(body, json!({ "id": "MSG-1", "status": "READ" }));
}
