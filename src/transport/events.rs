//! Event listener for the bridge's transport event stream.
//!
//! Long-polls `/events/poll` and forwards [`TransportEvent`]s to the
//! correlator through a bounded mpsc channel.

use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::TransportEvent;

/// Long-poll timeout for the HTTP client (seconds).
const POLL_TIMEOUT_SECS: u64 = 60;

/// Initial reconnect backoff (milliseconds).
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Maximum reconnect backoff (milliseconds).
const MAX_BACKOFF_MS: u64 = 30_000;

/// Pause after a non-success poll response (seconds).
const NON_SUCCESS_PAUSE_SECS: u64 = 5;

/// Entries stay raw so one undecodable event cannot sink its batch.
#[derive(Deserialize)]
struct PollResponse {
    #[serde(default)]
    data: Vec<serde_json::Value>,
}

/// Spawn an event listener that forwards events to the given channel.
///
/// Returns immediately. The listener runs as a background Tokio task,
/// reconnects with exponential backoff, and stops once the receiver is
/// dropped.
pub fn spawn_event_listener(
    base_url: String,
    event_tx: mpsc::Sender<TransportEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let poll_url = format!("{}/events/poll", base_url.trim_end_matches('/'));
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            info!(url = %poll_url, "connecting to transport event stream");

            match poll_events(&poll_url, &event_tx).await {
                Ok(()) => {
                    info!("transport event stream closed");
                    break;
                }
                Err(_) if event_tx.is_closed() => break,
                Err(e) => {
                    warn!(error = %e, backoff_ms, "transport event stream error, reconnecting");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms = next_backoff(backoff_ms);
                }
            }
        }
    })
}

/// Double the backoff, capped at [`MAX_BACKOFF_MS`].
fn next_backoff(current_ms: u64) -> u64 {
    current_ms.saturating_mul(2).min(MAX_BACKOFF_MS)
}

/// Decode each batch entry on its own, logging and skipping the ones that
/// are not a known [`TransportEvent`].
fn decode_batch(entries: Vec<serde_json::Value>) -> Vec<TransportEvent> {
    entries
        .into_iter()
        .filter_map(|entry| {
            let kind = entry
                .get("type")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("<none>")
                .to_owned();
            match serde_json::from_value(entry) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(%kind, error = %e, "skipping undecodable transport event");
                    None
                }
            }
        })
        .collect()
}

/// Poll the bridge for events in a loop. Returns `Ok` once the receiver is
/// gone and `Err` on non-timeout network errors so the caller can back off.
async fn poll_events(
    poll_url: &str,
    event_tx: &mpsc::Sender<TransportEvent>,
) -> Result<(), reqwest::Error> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(POLL_TIMEOUT_SECS))
        .build()?;

    loop {
        match client.get(poll_url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.json::<PollResponse>().await {
                Ok(batch) => {
                    for event in decode_batch(batch.data) {
                        debug!(?event, "received transport event");
                        if event_tx.send(event).await.is_err() {
                            return Ok(());
                        }
                    }
                }
                Err(e) => warn!(error = %e, "discarding malformed event batch"),
            },
            Ok(resp) => {
                debug!(status = %resp.status(), "event poll returned non-200");
                tokio::time::sleep(Duration::from_secs(NON_SUCCESS_PAUSE_SECS)).await;
            }
            // Long-poll expired with no events.
            Err(e) if e.is_timeout() => continue,
            Err(e) => return Err(e),
        }
        if event_tx.is_closed() {
            return Ok(());
        }
    }
}
