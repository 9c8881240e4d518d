//! Session lifecycle manager: login, logout, status.
//!
//! The session lives behind one sync [`Mutex`]; every critical section is
//! a short, non-async transition so `status` stays responsive while a
//! login is waiting on the transport.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{
    AuthState, LoginOutcome, LogoutOutcome, Session, SessionError, SessionSnapshot,
};
use crate::transport::{DeviceIdentity, PairingEvent, Transport};

/// Owns the session state machine and drives the transport for it.
pub struct SessionManager {
    session: Arc<Mutex<Session>>,
    transport: Arc<dyn Transport>,
    pairing_timeout: Duration,
    pairing_window: Duration,
    watcher: Mutex<Option<JoinHandle<()>>>,
    logout_gate: tokio::sync::Mutex<()>,
}

impl SessionManager {
    /// Create a manager for a fresh session.
    ///
    /// `pairing_timeout` bounds how long `login` waits for the first code;
    /// `pairing_window` bounds how long an attempt may stay unresolved.
    pub fn new(
        transport: Arc<dyn Transport>,
        pairing_timeout: Duration,
        pairing_window: Duration,
    ) -> Self {
        Self {
            session: Arc::new(Mutex::new(Session::new())),
            transport,
            pairing_timeout,
            pairing_window: pairing_window.max(pairing_timeout),
            watcher: Mutex::new(None),
            logout_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Restore pairing material from the device store and reconnect.
    ///
    /// Returns whether a stored identity was found. A failed reconnect is
    /// logged only; the session stays authenticated but disconnected.
    ///
    /// # Errors
    ///
    /// Returns an error if the device store cannot be queried.
    pub async fn resume(&self) -> Result<bool, SessionError> {
        let Some((identity, display_name)) = self.transport.stored_identity().await? else {
            info!("no stored device identity, waiting for login");
            return Ok(false);
        };
        info!(identity = %identity, "restoring paired device");
        self.with_session(|s| s.restore(identity, display_name));
        if let Err(e) = self.transport.connect().await {
            warn!(error = %e, "reconnect of restored session failed");
        }
        Ok(true)
    }

    /// Start pairing, or report why no attempt is needed.
    ///
    /// Blocks until the first pairing code arrives or the pairing timeout
    /// elapses. No lock is held while waiting.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::PairingFailed`] if the transport rejects the
    /// attempt or no code arrives in time; the session reverts to
    /// `Disconnected`.
    pub async fn login(&self) -> Result<LoginOutcome, SessionError> {
        let attempt = match self.with_session(Session::begin_login) {
            Ok(attempt) => attempt,
            Err(outcome) => {
                debug!(?outcome, "login not started");
                return Ok(outcome);
            }
        };
        self.cancel_watcher();
        info!(attempt, "starting pairing attempt");

        let mut pairing = match self.transport.pairing_channel().await {
            Ok(rx) => rx,
            Err(e) => return Err(self.fail_attempt(attempt, e.to_string())),
        };
        if let Err(e) = self.transport.connect().await {
            return Err(self.fail_attempt(attempt, e.to_string()));
        }

        let code = match tokio::time::timeout(self.pairing_timeout, first_code(&mut pairing)).await
        {
            Ok(Ok(code)) => code,
            Ok(Err(reason)) => return Err(self.abandon_attempt(attempt, reason).await),
            Err(_) => {
                let reason = format!(
                    "no pairing code within {}s",
                    self.pairing_timeout.as_secs()
                );
                return Err(self.abandon_attempt(attempt, reason).await);
            }
        };

        if let Err(outcome) = self.with_session(|s| s.pairing_code_issued(attempt, code.clone())) {
            debug!(attempt, ?outcome, "pairing attempt superseded before code arrived");
            return Ok(outcome);
        }
        self.spawn_watcher(attempt, pairing);
        info!(attempt, "pairing code issued");
        Ok(LoginOutcome::PairingCode(code))
    }

    /// Unlink the device.
    ///
    /// Logging out an unauthenticated session is a successful no-op.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Transport`] if the transport cannot confirm
    /// the teardown; the session is left unchanged.
    pub async fn logout(&self) -> Result<LogoutOutcome, SessionError> {
        let _gate = self.logout_gate.lock().await;
        if self.with_session(|s| s.auth()) == AuthState::Unauthenticated {
            debug!("logout requested without a paired device");
            return Ok(LogoutOutcome::NotLoggedIn);
        }

        self.transport.logout().await.map_err(|e| {
            warn!(error = %e, "logout failed, session unchanged");
            SessionError::Transport(e)
        })?;

        self.cancel_watcher();
        self.with_session(Session::logged_out);
        info!("device logged out");
        Ok(LogoutOutcome::LoggedOut)
    }

    /// Current session state. Never blocks on transport work.
    pub fn status(&self) -> SessionSnapshot {
        self.with_session(|s| s.snapshot())
    }

    /// Transport reported a logged-in connection.
    pub fn on_connected(&self, identity: DeviceIdentity, display_name: Option<String>) {
        self.cancel_watcher();
        info!(identity = %identity, "connection established");
        self.with_session(|s| s.connected(identity, display_name));
    }

    /// Transport reported the connection dropped.
    pub fn on_connection_lost(&self, reason: Option<&str>) {
        self.cancel_watcher();
        warn!(reason = reason.unwrap_or("unspecified"), "connection lost");
        self.with_session(Session::connection_lost);
    }

    /// Transport reported the device was unlinked.
    pub fn on_session_terminated(&self, reason: Option<&str>) {
        self.cancel_watcher();
        warn!(reason = reason.unwrap_or("unspecified"), "session terminated by network");
        self.with_session(Session::logged_out);
    }

    fn with_session<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut session)
    }

    /// Revert `attempt` if it is still current. Returns whether it was.
    fn revert_attempt(&self, attempt: u64, reason: &str) -> bool {
        let reverted = self.with_session(|s| s.pairing_failed(attempt));
        if reverted {
            warn!(attempt, %reason, "pairing attempt failed");
        }
        reverted
    }

    /// Fail an attempt that never reached the network.
    fn fail_attempt(&self, attempt: u64, reason: String) -> SessionError {
        self.revert_attempt(attempt, &reason);
        SessionError::PairingFailed(reason)
    }

    /// Fail an attempt after `connect` went out, closing that connection if
    /// the attempt was still current.
    async fn abandon_attempt(&self, attempt: u64, reason: String) -> SessionError {
        if self.revert_attempt(attempt, &reason) {
            release_connection(self.transport.as_ref(), attempt).await;
        }
        SessionError::PairingFailed(reason)
    }

    fn cancel_watcher(&self) {
        let previous = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = previous {
            handle.abort();
        }
    }

    /// Follow the rest of the pairing transaction in the background.
    ///
    /// Rotated codes replace the stored one; a terminal failure, channel
    /// close, or the end of the pairing window reverts the attempt.
    fn spawn_watcher(&self, attempt: u64, pairing: mpsc::Receiver<PairingEvent>) {
        let session = Arc::clone(&self.session);
        let transport = Arc::clone(&self.transport);
        let deadline = Instant::now()
            .checked_add(self.pairing_window)
            .unwrap_or_else(Instant::now);

        let handle = tokio::spawn(async move {
            let reason = match tokio::time::timeout_at(
                deadline,
                follow_pairing(&session, attempt, pairing),
            )
            .await
            {
                Ok(Some(reason)) => reason,
                Ok(None) => {
                    // Paired; the connection event should land before the window ends.
                    tokio::time::sleep_until(deadline).await;
                    "paired but no connection was established".to_owned()
                }
                Err(_) => "pairing window elapsed".to_owned(),
            };
            let reverted = session
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pairing_failed(attempt);
            if reverted {
                warn!(attempt, %reason, "pairing attempt abandoned");
                release_connection(transport.as_ref(), attempt).await;
            }
        });

        let previous = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(handle) = previous {
            handle.abort();
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.cancel_watcher();
    }
}

/// Best-effort close of the connection an abandoned attempt opened.
async fn release_connection(transport: &dyn Transport, attempt: u64) {
    match transport.disconnect().await {
        Ok(()) => debug!(attempt, "closed connection of abandoned pairing attempt"),
        Err(e) => warn!(attempt, error = %e, "disconnect after abandoned pairing failed"),
    }
}

/// Wait for the first code of a pairing transaction.
async fn first_code(pairing: &mut mpsc::Receiver<PairingEvent>) -> Result<String, String> {
    while let Some(event) = pairing.recv().await {
        match event {
            PairingEvent::Code { code } => return Ok(code),
            PairingEvent::Timeout => return Err("pairing code timed out".to_owned()),
            PairingEvent::Error { message } => return Err(message),
            PairingEvent::Success => debug!("pairing success before any code"),
        }
    }
    Err("pairing channel closed without a code".to_owned())
}

/// Track code rotation. Returns `None` on success, or the failure reason.
async fn follow_pairing(
    session: &Mutex<Session>,
    attempt: u64,
    mut pairing: mpsc::Receiver<PairingEvent>,
) -> Option<String> {
    while let Some(event) = pairing.recv().await {
        match event {
            PairingEvent::Code { code } => {
                let current = session
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .rotate_pairing_code(attempt, code);
                if !current {
                    return Some("pairing attempt superseded".to_owned());
                }
                debug!(attempt, "pairing code rotated");
            }
            PairingEvent::Success => return None,
            PairingEvent::Timeout => return Some("pairing code expired".to_owned()),
            PairingEvent::Error { message } => return Some(message),
        }
    }
    Some("pairing channel closed".to_owned())
}
