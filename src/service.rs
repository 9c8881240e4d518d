//! Service facade: the only surface the HTTP layer talks to.
//!
//! [`Gateway::assemble`] wires the session manager, dispatcher, ledger and
//! event correlator around one shared transport.

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::correlator::{AckQueue, EventCorrelator};
use crate::dispatcher::{DispatchError, OutboundDispatcher, SentMessage};
use crate::ledger::{MessageStatus, StatusLedger};
use crate::session::{LoginOutcome, LogoutOutcome, SessionError, SessionManager, SessionSnapshot};
use crate::transport::Transport;

/// Composed gateway operations.
pub struct Gateway {
    sessions: Arc<SessionManager>,
    dispatcher: OutboundDispatcher,
    ledger: StatusLedger,
}

impl Gateway {
    /// Build the gateway and the correlator that feeds it.
    ///
    /// The correlator must be run on the transport event stream
    /// (see [`EventCorrelator::run`]). Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the dialing plan in `config` is invalid.
    pub fn assemble(
        config: &Config,
        transport: Arc<dyn Transport>,
        ledger: StatusLedger,
    ) -> anyhow::Result<(Self, EventCorrelator)> {
        let sessions = Arc::new(SessionManager::new(
            Arc::clone(&transport),
            Duration::from_secs(config.pairing.timeout_secs),
            Duration::from_secs(config.pairing.window_secs),
        ));
        let dispatcher =
            OutboundDispatcher::new(Arc::clone(&transport), ledger.clone(), config.dialing.plan()?);
        let acks = AckQueue::spawn(
            transport,
            config.ack.queue_capacity,
            config.ack.max_in_flight,
        );
        let correlator = EventCorrelator::new(Arc::clone(&sessions), ledger.clone(), acks);

        Ok((
            Self {
                sessions,
                dispatcher,
                ledger,
            },
            correlator,
        ))
    }

    /// Restore a previously paired device, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport device store cannot be queried.
    pub async fn resume(&self) -> Result<bool, SessionError> {
        self.sessions.resume().await
    }

    /// Start pairing or report the current authentication.
    ///
    /// # Errors
    ///
    /// See [`SessionManager::login`].
    pub async fn login(&self) -> Result<LoginOutcome, SessionError> {
        self.sessions.login().await
    }

    /// Unlink the device.
    ///
    /// # Errors
    ///
    /// See [`SessionManager::logout`].
    pub async fn logout(&self) -> Result<LogoutOutcome, SessionError> {
        self.sessions.logout().await
    }

    /// Current session state.
    pub fn status(&self) -> SessionSnapshot {
        self.sessions.status()
    }

    /// Send a text message.
    ///
    /// # Errors
    ///
    /// See [`OutboundDispatcher::send`].
    pub async fn send(&self, phone: &str, text: &str) -> Result<SentMessage, DispatchError> {
        self.dispatcher.send(phone, text).await
    }

    /// Last known delivery status of a message.
    pub async fn message_status(&self, id: &str) -> MessageStatus {
        self.ledger.get_status(id).await
    }
}
