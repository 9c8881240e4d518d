//! Outbound dispatcher: normalize the recipient, send, record.
//!
//! A send is only reported as failed when the network did not accept it.
//! Losing the local ledger row afterwards is logged and tolerated.

use std::sync::Arc;

use tracing::{info, warn};

use crate::ledger::StatusLedger;
use crate::transport::{AddressError, RecipientAddress, Transport, TransportError};

/// Shortest canonical number accepted for sending.
pub const MIN_NUMBER_DIGITS: usize = 5;

/// Errors from [`OutboundDispatcher::send`].
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Fewer than [`MIN_NUMBER_DIGITS`] digits after normalization.
    #[error("phone number too short: {0:?}")]
    InvalidPhoneNumber(String),

    /// Nothing to send.
    #[error("message text is empty")]
    InvalidMessage,

    /// The number does not map to a provider address.
    #[error("failed to resolve address: {0}")]
    AddressResolution(#[from] AddressError),

    /// The transport did not accept the message.
    #[error("send failed: {0}")]
    SendFailed(#[from] TransportError),
}

/// Rejected dialing plan settings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid dialing plan: {0}")]
pub struct DialingPlanError(&'static str);

/// Country-specific rules for canonicalizing subscriber numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialingPlan {
    country_code: String,
    mobile_prefix: char,
}

impl DialingPlan {
    /// Build a plan from a country calling code and mobile prefix digit.
    ///
    /// # Errors
    ///
    /// Returns an error unless the country code is 1-3 digits and the prefix
    /// is a non-zero digit.
    pub fn new(country_code: &str, mobile_prefix: char) -> Result<Self, DialingPlanError> {
        if country_code.is_empty()
            || country_code.len() > 3
            || !country_code.chars().all(|c| c.is_ascii_digit())
        {
            return Err(DialingPlanError("country code must be 1-3 digits"));
        }
        if !mobile_prefix.is_ascii_digit() || mobile_prefix == '0' {
            return Err(DialingPlanError("mobile prefix must be a digit 1-9"));
        }
        Ok(Self {
            country_code: country_code.to_owned(),
            mobile_prefix,
        })
    }

    /// Country calling code.
    pub fn country_code(&self) -> &str {
        &self.country_code
    }

    /// Canonicalize free-form phone input.
    ///
    /// Non-digits are dropped. A trunk `0` before the mobile prefix is
    /// replaced with the country code, and a bare mobile number gets the
    /// country code prepended. Anything else passes through as digits.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidPhoneNumber`] when fewer than
    /// [`MIN_NUMBER_DIGITS`] digits remain.
    pub fn normalize(&self, raw: &str) -> Result<String, DispatchError> {
        let digits: String = raw.chars().filter(char::is_ascii_digit).collect();

        let mut lead = digits.chars();
        let normalized = match (lead.next(), lead.next(), lead.next()) {
            (Some('0'), Some(p), Some(_)) if p == self.mobile_prefix => {
                let national = digits.strip_prefix('0').unwrap_or(&digits);
                format!("{}{national}", self.country_code)
            }
            (Some(p), Some(_), _) if p == self.mobile_prefix => {
                format!("{}{digits}", self.country_code)
            }
            _ => digits,
        };

        if normalized.len() < MIN_NUMBER_DIGITS {
            return Err(DispatchError::InvalidPhoneNumber(normalized));
        }
        Ok(normalized)
    }
}

/// Accepted outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// Provider-assigned message id.
    pub id: String,
    /// Resolved recipient.
    pub recipient: RecipientAddress,
}

/// Sends text messages and seeds the status ledger.
pub struct OutboundDispatcher {
    transport: Arc<dyn Transport>,
    ledger: StatusLedger,
    plan: DialingPlan,
}

impl OutboundDispatcher {
    /// Create a dispatcher.
    pub fn new(transport: Arc<dyn Transport>, ledger: StatusLedger, plan: DialingPlan) -> Self {
        Self {
            transport,
            ledger,
            plan,
        }
    }

    /// Send `text` to `raw_phone`. No retries at this layer.
    ///
    /// # Errors
    ///
    /// Validation errors are returned before anything is sent; transport
    /// failures surface as [`DispatchError::SendFailed`].
    pub async fn send(&self, raw_phone: &str, text: &str) -> Result<SentMessage, DispatchError> {
        if text.trim().is_empty() {
            return Err(DispatchError::InvalidMessage);
        }
        let number = self.plan.normalize(raw_phone)?;
        let recipient = RecipientAddress::for_number(&number)?;

        let id = self.transport.send_text(&recipient, text).await.map_err(|e| {
            warn!(recipient = %recipient, error = %e, "send failed");
            DispatchError::SendFailed(e)
        })?;
        info!(recipient = %recipient, message_id = %id, "message sent");

        if let Err(e) = self.ledger.record_sent(&id).await {
            warn!(message_id = %id, error = %e, "failed to record sent message");
        }

        Ok(SentMessage { id, recipient })
    }
}
