//! Tests for `src/session/manager.rs`: login, logout, and pairing lifecycle.

use std::sync::Arc;
use std::time::Duration;

use wagate::session::{
    AuthState, ConnectionState, LoginOutcome, LogoutOutcome, SessionError, SessionManager,
};
use wagate::transport::{PairingEvent, Transport};

use crate::support::{identity, FakeTransport};

const TIMEOUT: Duration = Duration::from_secs(5);
const WINDOW: Duration = Duration::from_secs(30);

fn code(c: &str) -> PairingEvent {
    PairingEvent::Code { code: c.to_owned() }
}

fn manager(transport: &Arc<FakeTransport>) -> SessionManager {
    SessionManager::new(Arc::clone(transport) as Arc<dyn Transport>, TIMEOUT, WINDOW)
}

/// Let background watcher tasks process queued events.
async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn login_returns_first_pairing_code() {
    let transport = Arc::new(FakeTransport::new().with_pairing(vec![code("QR-1")]));
    let sessions = manager(&transport);

    let outcome = sessions.login().await.expect("login should succeed");
    assert_eq!(outcome, LoginOutcome::PairingCode("QR-1".to_owned()));

    let status = sessions.status();
    assert_eq!(status.connection, ConnectionState::AwaitingPairing);
    assert_eq!(status.auth, AuthState::Unauthenticated);
    assert_eq!(transport.connect_calls(), 1);
    assert_eq!(transport.disconnect_calls(), 0);
}

#[tokio::test]
async fn second_login_while_pairing_returns_current_code() {
    let transport = Arc::new(FakeTransport::new().with_pairing(vec![code("QR-1")]));
    let sessions = manager(&transport);
    sessions.login().await.expect("first login");

    let again = sessions.login().await.expect("second login");
    assert_eq!(
        again,
        LoginOutcome::AlreadyConnecting {
            pairing_code: Some("QR-1".to_owned())
        }
    );
    assert_eq!(transport.connect_calls(), 1, "no second connection attempt");
}

#[tokio::test]
async fn rotated_code_replaces_the_stored_one() {
    let transport = Arc::new(FakeTransport::new().with_pairing(vec![code("QR-1")]));
    let sessions = manager(&transport);
    sessions.login().await.expect("login");

    transport.push_pairing(code("QR-2")).await;
    settle().await;

    let again = sessions.login().await.expect("login");
    assert_eq!(
        again,
        LoginOutcome::AlreadyConnecting {
            pairing_code: Some("QR-2".to_owned())
        }
    );
}

#[tokio::test]
async fn login_when_authenticated_has_no_side_effects() {
    let transport = Arc::new(FakeTransport::new());
    let sessions = manager(&transport);
    sessions.on_connected(identity(), Some("Shop".to_owned()));
    let before = sessions.status();

    for _ in 0..2 {
        let outcome = sessions.login().await.expect("login");
        assert_eq!(outcome, LoginOutcome::AlreadyAuthenticated);
    }

    assert_eq!(sessions.status(), before);
    assert_eq!(transport.connect_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn pairing_timeout_reverts_to_disconnected() {
    // Channel stays open but never yields a code.
    let transport = Arc::new(FakeTransport::new());
    let sessions = manager(&transport);

    let err = sessions.login().await.expect_err("login should time out");
    assert!(matches!(err, SessionError::PairingFailed(_)));
    assert_eq!(sessions.status().connection, ConnectionState::Disconnected);

    // A fresh attempt may start afterwards.
    let err = sessions.login().await.expect_err("still no code");
    assert!(matches!(err, SessionError::PairingFailed(_)));
    assert_eq!(transport.connect_calls(), 2);
    assert_eq!(
        transport.disconnect_calls(),
        2,
        "each abandoned attempt closes its connection"
    );
}

#[tokio::test]
async fn pairing_error_before_code_fails_login() {
    let transport = Arc::new(FakeTransport::new().with_pairing(vec![PairingEvent::Error {
        message: "client outdated".to_owned(),
    }]));
    let sessions = manager(&transport);

    let err = sessions.login().await.expect_err("login should fail");
    assert!(matches!(err, SessionError::PairingFailed(ref m) if m == "client outdated"));
    assert_eq!(sessions.status().connection, ConnectionState::Disconnected);
    assert_eq!(transport.disconnect_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_logins_start_one_attempt() {
    let transport = Arc::new(
        FakeTransport::new()
            .with_pairing(vec![code("QR-1")])
            .with_connect_delay(Duration::from_millis(100)),
    );
    let sessions = manager(&transport);

    let (a, b) = tokio::join!(sessions.login(), sessions.login());
    let mut outcomes = vec![a.expect("login a"), b.expect("login b")];
    outcomes.sort_by_key(|o| matches!(o, LoginOutcome::AlreadyConnecting { .. }));

    assert_eq!(outcomes[0], LoginOutcome::PairingCode("QR-1".to_owned()));
    assert_eq!(
        outcomes[1],
        LoginOutcome::AlreadyConnecting { pairing_code: None }
    );
    assert_eq!(transport.connect_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn status_is_readable_while_login_waits() {
    let transport = Arc::new(
        FakeTransport::new()
            .with_pairing(vec![code("QR-1")])
            .with_connect_delay(Duration::from_secs(3)),
    );
    let sessions = Arc::new(manager(&transport));

    let pending = tokio::spawn({
        let sessions = Arc::clone(&sessions);
        async move { sessions.login().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(sessions.status().connection, ConnectionState::Connecting);

    let outcome = pending.await.expect("join").expect("login");
    assert_eq!(outcome, LoginOutcome::PairingCode("QR-1".to_owned()));
}

#[tokio::test(start_paused = true)]
async fn unanswered_pairing_expires_after_window() {
    let transport = Arc::new(FakeTransport::new().with_pairing(vec![code("QR-1")]));
    let sessions = manager(&transport);
    sessions.login().await.expect("login");

    tokio::time::sleep(WINDOW + Duration::from_secs(1)).await;

    let status = sessions.status();
    assert_eq!(status.connection, ConnectionState::Disconnected);
    assert_eq!(status.auth, AuthState::Unauthenticated);
    assert_eq!(transport.disconnect_calls(), 1);
}

#[tokio::test]
async fn pairing_error_after_code_reverts() {
    let transport = Arc::new(FakeTransport::new().with_pairing(vec![code("QR-1")]));
    let sessions = manager(&transport);
    sessions.login().await.expect("login");

    transport
        .push_pairing(PairingEvent::Error {
            message: "rejected".to_owned(),
        })
        .await;
    settle().await;

    assert_eq!(sessions.status().connection, ConnectionState::Disconnected);
    assert_eq!(transport.disconnect_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn successful_pairing_ends_in_connected() {
    let transport = Arc::new(FakeTransport::new().with_pairing(vec![code("QR-1")]));
    let sessions = manager(&transport);
    sessions.login().await.expect("login");

    transport.push_pairing(PairingEvent::Success).await;
    settle().await;
    sessions.on_connected(identity(), Some("Shop".to_owned()));

    tokio::time::sleep(WINDOW + Duration::from_secs(1)).await;

    let status = sessions.status();
    assert_eq!(status.connection, ConnectionState::Connected);
    assert_eq!(status.auth, AuthState::Authenticated);
    assert_eq!(status.identity, Some(identity()));
    assert_eq!(status.display_name.as_deref(), Some("Shop"));
    assert_eq!(transport.disconnect_calls(), 0);
}

#[tokio::test]
async fn logout_clears_pairing() {
    let transport = Arc::new(FakeTransport::new());
    let sessions = manager(&transport);
    sessions.on_connected(identity(), None);

    let outcome = sessions.logout().await.expect("logout");
    assert_eq!(outcome, LogoutOutcome::LoggedOut);

    let status = sessions.status();
    assert_eq!(status.connection, ConnectionState::Disconnected);
    assert_eq!(status.auth, AuthState::Unauthenticated);
    assert_eq!(status.identity, None);
}

#[tokio::test]
async fn logout_without_pairing_is_a_no_op() {
    let transport = Arc::new(FakeTransport::new());
    let sessions = manager(&transport);

    let outcome = sessions.logout().await.expect("logout");
    assert_eq!(outcome, LogoutOutcome::NotLoggedIn);
    assert_eq!(transport.logout_calls(), 0);
}

#[tokio::test]
async fn failed_logout_leaves_state_unchanged() {
    let transport = Arc::new(FakeTransport::new());
    let sessions = manager(&transport);
    sessions.on_connected(identity(), Some("Shop".to_owned()));
    let before = sessions.status();
    transport.fail_logout(true);

    let err = sessions.logout().await.expect_err("logout should fail");
    assert!(matches!(err, SessionError::Transport(_)));
    assert_eq!(sessions.status(), before);
}

#[tokio::test]
async fn resume_restores_stored_identity() {
    let transport = Arc::new(
        FakeTransport::new().with_stored_identity("6281234567890:3@s.whatsapp.net", Some("Shop")),
    );
    let sessions = manager(&transport);

    assert!(sessions.resume().await.expect("resume"));
    let status = sessions.status();
    assert_eq!(status.auth, AuthState::Authenticated);
    assert_eq!(status.identity, Some(identity()));
    assert_eq!(transport.connect_calls(), 1);

    // Reconnected sessions do not start pairing.
    assert_eq!(
        sessions.login().await.expect("login"),
        LoginOutcome::AlreadyAuthenticated
    );
}

#[tokio::test]
async fn resume_without_stored_identity_stays_unpaired() {
    let transport = Arc::new(FakeTransport::new());
    let sessions = manager(&transport);

    assert!(!sessions.resume().await.expect("resume"));
    assert_eq!(sessions.status().auth, AuthState::Unauthenticated);
    assert_eq!(transport.connect_calls(), 0);
}

#[tokio::test]
async fn connection_loss_keeps_pairing_but_termination_drops_it() {
    let transport = Arc::new(FakeTransport::new());
    let sessions = manager(&transport);
    sessions.on_connected(identity(), None);

    sessions.on_connection_lost(Some("stream error"));
    let status = sessions.status();
    assert_eq!(status.connection, ConnectionState::Disconnected);
    assert_eq!(status.auth, AuthState::Authenticated);

    sessions.on_session_terminated(None);
    let status = sessions.status();
    assert_eq!(status.auth, AuthState::Unauthenticated);
    assert_eq!(status.identity, None);
}
