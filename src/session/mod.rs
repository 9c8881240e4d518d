//! Device session state and its lifecycle manager.
//!
//! [`Session`] holds the connection/authentication state machine and
//! enforces its invariants in plain synchronous transitions. The
//! [`SessionManager`] owns the single lock around it and drives the
//! transport for login and logout.
//!
//! ```text
//! Disconnected -> Connecting -> AwaitingPairing -> Connected(Authenticated)
//!      ^              |               |                    |
//!      +--------------+---------------+--------------------+  loss / logout / pairing timeout
//! ```

mod manager;

pub use manager::SessionManager;

use serde::Serialize;

use crate::transport::{DeviceIdentity, TransportError};

/// Network connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// No connection.
    Disconnected,
    /// Connection attempt started, no pairing code yet.
    Connecting,
    /// Pairing code issued, waiting for the user to scan it.
    AwaitingPairing,
    /// Logged-in connection established.
    Connected,
}

/// Whether the device is paired with an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthState {
    /// No paired device.
    Unauthenticated,
    /// Paired device identity present.
    Authenticated,
}

/// Consistent point-in-time view of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    /// Connection state.
    pub connection: ConnectionState,
    /// Authentication state.
    pub auth: AuthState,
    /// Paired identity, present whenever authenticated.
    pub identity: Option<DeviceIdentity>,
    /// Account display name, if known.
    pub display_name: Option<String>,
}

/// Result of a login request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Already paired; nothing was done.
    AlreadyAuthenticated,
    /// A pairing attempt is already running.
    AlreadyConnecting {
        /// Latest code of the running attempt, once one was issued.
        pairing_code: Option<String>,
    },
    /// A new pairing attempt produced this code.
    PairingCode(String),
}

/// Result of a logout request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutOutcome {
    /// The device was unlinked.
    LoggedOut,
    /// Nothing to do: the session was not authenticated.
    NotLoggedIn,
}

/// Errors from session lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No pairing code was produced (timeout or transport rejection).
    #[error("pairing failed: {0}")]
    PairingFailed(String),

    /// The transport could not complete the request.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Session state machine.
///
/// Invariants: `Authenticated` implies `identity` is set, and `Connected`
/// implies `Authenticated`. Each pairing attempt carries a generation
/// number so late updates from a superseded attempt are ignored.
#[derive(Debug)]
pub struct Session {
    connection: ConnectionState,
    auth: AuthState,
    identity: Option<DeviceIdentity>,
    display_name: Option<String>,
    pairing_code: Option<String>,
    attempt: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Fresh, unpaired, disconnected session.
    pub fn new() -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            auth: AuthState::Unauthenticated,
            identity: None,
            display_name: None,
            pairing_code: None,
            attempt: 0,
        }
    }

    /// Copy out the externally visible state.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            connection: self.connection,
            auth: self.auth,
            identity: self.identity.clone(),
            display_name: self.display_name.clone(),
        }
    }

    /// Authentication state.
    pub fn auth(&self) -> AuthState {
        self.auth
    }

    /// Connection state.
    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    /// Adopt pairing material restored from the device store.
    pub fn restore(&mut self, identity: DeviceIdentity, display_name: Option<String>) {
        self.auth = AuthState::Authenticated;
        self.identity = Some(identity);
        self.display_name = display_name;
        self.connection = ConnectionState::Disconnected;
        self.pairing_code = None;
    }

    /// Atomically check that a login may start and move to `Connecting`.
    ///
    /// Returns the new attempt generation, or the outcome to report when
    /// no attempt should start.
    pub fn begin_login(&mut self) -> Result<u64, LoginOutcome> {
        if self.auth == AuthState::Authenticated {
            return Err(LoginOutcome::AlreadyAuthenticated);
        }
        if self.connection != ConnectionState::Disconnected {
            return Err(LoginOutcome::AlreadyConnecting {
                pairing_code: self.pairing_code.clone(),
            });
        }
        self.attempt = self.attempt.wrapping_add(1);
        self.connection = ConnectionState::Connecting;
        Ok(self.attempt)
    }

    /// First code of `attempt` arrived: move to `AwaitingPairing`.
    ///
    /// Returns the outcome to report instead when the attempt was superseded.
    pub fn pairing_code_issued(&mut self, attempt: u64, code: String) -> Result<(), LoginOutcome> {
        if !self.is_pairing(attempt) {
            return Err(if self.auth == AuthState::Authenticated {
                LoginOutcome::AlreadyAuthenticated
            } else {
                LoginOutcome::AlreadyConnecting {
                    pairing_code: self.pairing_code.clone(),
                }
            });
        }
        self.connection = ConnectionState::AwaitingPairing;
        self.pairing_code = Some(code);
        Ok(())
    }

    /// Replace the code of a running attempt. Returns false if the attempt is over.
    pub fn rotate_pairing_code(&mut self, attempt: u64, code: String) -> bool {
        if !self.is_pairing(attempt) {
            return false;
        }
        self.pairing_code = Some(code);
        true
    }

    /// Abandon `attempt` and fall back to `Disconnected`.
    ///
    /// Returns false if the attempt was already superseded.
    pub fn pairing_failed(&mut self, attempt: u64) -> bool {
        if !self.is_pairing(attempt) {
            return false;
        }
        self.connection = ConnectionState::Disconnected;
        self.pairing_code = None;
        true
    }

    /// Logged-in connection established.
    pub fn connected(&mut self, identity: DeviceIdentity, display_name: Option<String>) {
        self.auth = AuthState::Authenticated;
        self.identity = Some(identity);
        if display_name.is_some() {
            self.display_name = display_name;
        }
        self.connection = ConnectionState::Connected;
        self.end_attempt();
    }

    /// Connection dropped; pairing material is kept.
    pub fn connection_lost(&mut self) {
        self.connection = ConnectionState::Disconnected;
        self.end_attempt();
    }

    /// Device unlinked: back to a fresh session.
    pub fn logged_out(&mut self) {
        self.auth = AuthState::Unauthenticated;
        self.identity = None;
        self.display_name = None;
        self.connection = ConnectionState::Disconnected;
        self.end_attempt();
    }

    fn is_pairing(&self, attempt: u64) -> bool {
        self.attempt == attempt
            && self.auth == AuthState::Unauthenticated
            && matches!(
                self.connection,
                ConnectionState::Connecting | ConnectionState::AwaitingPairing
            )
    }

    fn end_attempt(&mut self) {
        self.pairing_code = None;
        self.attempt = self.attempt.wrapping_add(1);
    }
}
