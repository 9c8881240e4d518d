//! Event correlator: the single consumer of transport events.
//!
//! Receipts update the status ledger, connection events drive the session
//! state machine, and inbound messages are acknowledged through the bounded
//! [`AckQueue`]. Failures are logged; the loop keeps going.

mod ack;

pub use ack::AckQueue;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::ledger::{MessageStatus, StatusLedger};
use crate::session::SessionManager;
use crate::transport::{ReadAck, ReceiptKind, TransportEvent};

/// Ledger status for a receipt kind, if it carries one.
pub fn receipt_status(kind: ReceiptKind) -> Option<MessageStatus> {
    match kind {
        ReceiptKind::Delivered => Some(MessageStatus::Delivered),
        ReceiptKind::Read | ReceiptKind::Played => Some(MessageStatus::Read),
        ReceiptKind::Other => None,
    }
}

/// Applies transport events to the session and the ledger.
pub struct EventCorrelator {
    sessions: Arc<SessionManager>,
    ledger: StatusLedger,
    acks: AckQueue,
}

impl EventCorrelator {
    /// Create a correlator.
    pub fn new(sessions: Arc<SessionManager>, ledger: StatusLedger, acks: AckQueue) -> Self {
        Self {
            sessions,
            ledger,
            acks,
        }
    }

    /// Consume events until the channel closes, then drain pending acknowledgments.
    pub async fn run(self, mut events: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
        info!("transport event channel closed, correlator stopping");
        self.acks.shutdown().await;
    }

    /// Apply one event.
    pub async fn handle(&self, event: TransportEvent) {
        match event {
            TransportEvent::MessageReceived {
                id,
                chat,
                sender,
                from_me,
            } => {
                if from_me {
                    trace!(message_id = %id, "own message, not acknowledged");
                    return;
                }
                self.acks.submit(ReadAck {
                    message_id: id,
                    chat,
                    sender,
                });
            }
            TransportEvent::ReceiptUpdate { message_ids, kind } => {
                let Some(status) = receipt_status(kind) else {
                    debug!(?kind, count = message_ids.len(), "receipt without status meaning");
                    return;
                };
                for id in &message_ids {
                    if let Err(e) = self.ledger.update_status(id, status).await {
                        warn!(message_id = %id, %status, error = %e, "failed to apply receipt");
                    }
                }
                debug!(%status, count = message_ids.len(), "receipt applied");
            }
            TransportEvent::ConnectionEstablished {
                identity,
                display_name,
            } => self.sessions.on_connected(identity, display_name),
            TransportEvent::ConnectionLost { reason } => {
                self.sessions.on_connection_lost(reason.as_deref());
            }
            TransportEvent::SessionTerminated { reason } => {
                self.sessions.on_session_terminated(reason.as_deref());
            }
        }
    }
}
