//! Transport collaborator seam.
//!
//! The messaging network protocol (socket, crypto, device store) lives
//! outside this crate. [`Transport`] is the narrow interface the core drives,
//! and [`TransportEvent`] is the typed stream it consumes. The [`bridge`]
//! module implements both against an HTTP sidecar.

pub mod bridge;
pub mod events;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Server part of individual user addresses.
pub const USER_SERVER: &str = "s.whatsapp.net";

/// Longest user part accepted for an address.
const MAX_ADDRESS_DIGITS: usize = 20;

/// Errors raised by the transport collaborator.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// HTTP request to the bridge failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The bridge answered but reported a failure.
    #[error("bridge rejected {endpoint}: {message}")]
    Rejected {
        /// Bridge endpoint that failed.
        endpoint: &'static str,
        /// Error text reported by the bridge.
        message: String,
    },

    /// The bridge answered without the expected payload.
    #[error("bridge returned no data for {0}")]
    MissingData(&'static str),

    /// The network session is not connected.
    #[error("not connected")]
    NotConnected,
}

/// Opaque paired-device identity (e.g. `6281234567890:12@s.whatsapp.net`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    /// Wrap a raw identity string.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Full identity as reported by the transport.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// User part: everything before the device (`:`) or server (`@`) separator.
    pub fn user(&self) -> &str {
        self.0.split([':', '@']).next().unwrap_or_default()
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reasons a number cannot be turned into a provider address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    /// Nothing left to address.
    #[error("empty user part")]
    Empty,
    /// Addresses carry digits only.
    #[error("unexpected character {0:?} in user part")]
    NonDigit(char),
    /// Longer than any real subscriber number.
    #[error("user part has {0} digits")]
    TooLong(usize),
}

/// A recipient in the provider's address format (`<digits>@s.whatsapp.net`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipientAddress {
    user: String,
}

impl RecipientAddress {
    /// Resolve a canonical subscriber number into an address.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError`] if the number is empty, contains non-digits,
    /// or is implausibly long.
    pub fn for_number(number: &str) -> Result<Self, AddressError> {
        if number.is_empty() {
            return Err(AddressError::Empty);
        }
        if let Some(c) = number.chars().find(|c| !c.is_ascii_digit()) {
            return Err(AddressError::NonDigit(c));
        }
        if number.len() > MAX_ADDRESS_DIGITS {
            return Err(AddressError::TooLong(number.len()));
        }
        Ok(Self {
            user: number.to_owned(),
        })
    }

    /// Subscriber number part.
    pub fn user(&self) -> &str {
        &self.user
    }
}

impl fmt::Display for RecipientAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{USER_SERVER}", self.user)
    }
}

/// Acknowledgment target for an inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadAck {
    /// Provider message id.
    pub message_id: String,
    /// Conversation the message belongs to.
    pub chat: String,
    /// Author of the message.
    pub sender: String,
}

/// One step of a pairing transaction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum PairingEvent {
    /// A scannable pairing code (codes rotate while pairing is open).
    Code {
        /// Code payload to render for the user.
        code: String,
    },
    /// The device was linked.
    Success,
    /// The network stopped offering codes.
    Timeout,
    /// Pairing failed.
    Error {
        /// Failure description.
        message: String,
    },
}

/// Delivery receipt kinds reported by the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptKind {
    /// Reached the recipient device.
    Delivered,
    /// Opened by the recipient.
    Read,
    /// Voice/video message played.
    Played,
    /// Sender-side, retry, or other receipts with no status meaning.
    #[serde(other)]
    Other,
}

/// Asynchronous events pushed by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportEvent {
    /// An inbound (or own-device) message.
    MessageReceived {
        /// Provider message id.
        id: String,
        /// Conversation address.
        chat: String,
        /// Author address.
        sender: String,
        /// Sent from this account on another device.
        #[serde(default)]
        from_me: bool,
    },
    /// Status change for previously sent messages.
    ReceiptUpdate {
        /// Affected message ids.
        message_ids: Vec<String>,
        /// Receipt kind.
        kind: ReceiptKind,
    },
    /// Logged-in connection is up.
    ConnectionEstablished {
        /// Paired device identity.
        identity: DeviceIdentity,
        /// Account display name, if known.
        #[serde(default)]
        display_name: Option<String>,
    },
    /// Socket dropped; pairing material is retained.
    ConnectionLost {
        /// Human-readable reason, if available.
        #[serde(default)]
        reason: Option<String>,
    },
    /// The device was unlinked (locally or remotely).
    SessionTerminated {
        /// Human-readable reason, if available.
        #[serde(default)]
        reason: Option<String>,
    },
}

/// Operations the core needs from the network collaborator.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Paired identity and display name already held by the device store.
    async fn stored_identity(
        &self,
    ) -> Result<Option<(DeviceIdentity, Option<String>)>, TransportError>;

    /// Open a pairing transaction. Must be called before [`Transport::connect`].
    async fn pairing_channel(&self) -> Result<mpsc::Receiver<PairingEvent>, TransportError>;

    /// Open the network connection.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Close the network connection without unlinking the device.
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Unlink the device and drop its pairing material.
    async fn logout(&self) -> Result<(), TransportError>;

    /// Send a text message, returning the provider-assigned message id.
    async fn send_text(
        &self,
        to: &RecipientAddress,
        text: &str,
    ) -> Result<String, TransportError>;

    /// Mark an inbound message as read.
    async fn mark_read(&self, ack: &ReadAck) -> Result<(), TransportError>;
}
