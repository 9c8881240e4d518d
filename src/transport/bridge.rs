//! HTTP client for the protocol bridge sidecar.
//!
//! The sidecar owns the network socket, session crypto and the device
//! store; this client drives it over a small JSON API and implements
//! [`Transport`] on top.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{
    DeviceIdentity, PairingEvent, ReadAck, RecipientAddress, Transport, TransportError,
};
use crate::config::BridgeConfig;

/// Long-poll timeout for pairing code polling (seconds).
const PAIRING_POLL_TIMEOUT_SECS: u64 = 60;

/// Buffer of the pairing event channel handed to callers.
const PAIRING_CHANNEL_CAPACITY: usize = 8;

/// Client for the bridge HTTP API.
#[derive(Clone)]
pub struct BridgeTransport {
    client: reqwest::Client,
    base_url: String,
}

/// Response envelope from the bridge HTTP API.
#[derive(Deserialize)]
struct BridgeResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

/// Payload of `GET /identity`.
#[derive(Deserialize)]
struct IdentityData {
    identity: Option<DeviceIdentity>,
    display_name: Option<String>,
}

/// Payload of `POST /send`.
#[derive(Deserialize)]
struct SendData {
    id: String,
}

impl BridgeTransport {
    /// Create a client from bridge settings.
    pub fn new(config: &BridgeConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to build HTTP client with timeouts, using default");
                reqwest::Client::default()
            });
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
        }
    }

    /// Returns the base URL of the sidecar.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_action(
        &self,
        endpoint: &'static str,
        body: serde_json::Value,
    ) -> Result<(), TransportError> {
        let url = format!("{}{endpoint}", self.base_url);
        let resp = self.client.post(&url).json(&body).send().await?;
        let envelope: BridgeResponse<serde_json::Value> = resp.json().await?;
        check(endpoint, envelope).map(|_| ())
    }

    async fn post_data<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        body: serde_json::Value,
    ) -> Result<T, TransportError> {
        let url = format!("{}{endpoint}", self.base_url);
        let resp = self.client.post(&url).json(&body).send().await?;
        let envelope: BridgeResponse<T> = resp.json().await?;
        check(endpoint, envelope)?.ok_or(TransportError::MissingData(endpoint))
    }
}

/// Turn an envelope into its payload, surfacing bridge-side failures.
fn check<T>(
    endpoint: &'static str,
    envelope: BridgeResponse<T>,
) -> Result<Option<T>, TransportError> {
    if envelope.success {
        return Ok(envelope.data);
    }
    let message = envelope
        .error
        .unwrap_or_else(|| "unspecified bridge error".to_owned());
    if message.contains("not connected") {
        return Err(TransportError::NotConnected);
    }
    Err(TransportError::Rejected { endpoint, message })
}

#[async_trait]
impl Transport for BridgeTransport {
    async fn stored_identity(
        &self,
    ) -> Result<Option<(DeviceIdentity, Option<String>)>, TransportError> {
        let url = format!("{}/identity", self.base_url);
        let resp = self.client.get(&url).send().await?;
        let envelope: BridgeResponse<IdentityData> = resp.json().await?;
        Ok(check("/identity", envelope)?
            .and_then(|d| d.identity.map(|id| (id, d.display_name))))
    }

    async fn pairing_channel(&self) -> Result<mpsc::Receiver<PairingEvent>, TransportError> {
        let (tx, rx) = mpsc::channel(PAIRING_CHANNEL_CAPACITY);
        let client = self.client.clone();
        let url = format!("{}/pairing/poll", self.base_url);
        tokio::spawn(async move {
            poll_pairing(&client, &url, &tx).await;
        });
        Ok(rx)
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.post_action("/connect", serde_json::json!({})).await?;
        debug!("bridge connect requested");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.post_action("/disconnect", serde_json::json!({})).await
    }

    async fn logout(&self) -> Result<(), TransportError> {
        self.post_action("/logout", serde_json::json!({})).await
    }

    async fn send_text(
        &self,
        to: &RecipientAddress,
        text: &str,
    ) -> Result<String, TransportError> {
        let body = serde_json::json!({ "jid": to.to_string(), "text": text });
        let data: SendData = self.post_data("/send", body).await?;
        debug!(jid = %to, message_id = %data.id, "message sent via bridge");
        Ok(data.id)
    }

    async fn mark_read(&self, ack: &ReadAck) -> Result<(), TransportError> {
        let body = serde_json::json!({
            "ids": [ack.message_id],
            "chat": ack.chat,
            "sender": ack.sender,
        });
        self.post_action("/mark-read", body).await
    }
}

/// Forward pairing events until a terminal event or the receiver is dropped.
///
/// HTTP failures are reported to the receiver as [`PairingEvent::Error`].
/// An in-flight long-poll is abandoned as soon as the receiver goes away.
async fn poll_pairing(client: &reqwest::Client, url: &str, tx: &mpsc::Sender<PairingEvent>) {
    loop {
        if tx.is_closed() {
            debug!("pairing receiver dropped, stopping poll");
            return;
        }
        let request = client
            .get(url)
            .timeout(Duration::from_secs(PAIRING_POLL_TIMEOUT_SECS))
            .send();
        let result = tokio::select! {
            () = tx.closed() => {
                debug!("pairing receiver dropped during long-poll");
                return;
            }
            result = request => result,
        };
        let events = match result {
            Ok(resp) => match resp.json::<BridgeResponse<Vec<PairingEvent>>>().await {
                Ok(envelope) => match check("/pairing/poll", envelope) {
                    Ok(events) => events.unwrap_or_default(),
                    Err(e) => {
                        let _ = tx.send(PairingEvent::Error { message: e.to_string() }).await;
                        return;
                    }
                },
                Err(e) => {
                    let _ = tx.send(PairingEvent::Error { message: e.to_string() }).await;
                    return;
                }
            },
            // Long-poll expired with nothing to report.
            Err(e) if e.is_timeout() => continue,
            Err(e) => {
                let _ = tx.send(PairingEvent::Error { message: e.to_string() }).await;
                return;
            }
        };

        for event in events {
            let terminal = !matches!(event, PairingEvent::Code { .. });
            if tx.send(event).await.is_err() {
                debug!("pairing receiver dropped, stopping poll");
                return;
            }
            if terminal {
                return;
            }
        }
    }
}
