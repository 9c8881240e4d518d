//! Bounded worker for read acknowledgments.
//!
//! Acknowledgments are advisory: a full queue drops new ones, and transport
//! failures are logged and swallowed. At most `max_in_flight` run at once.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, trace, warn};

use crate::transport::{ReadAck, Transport};

/// Handle for submitting acknowledgments to the worker.
pub struct AckQueue {
    tx: mpsc::Sender<ReadAck>,
    worker: JoinHandle<()>,
}

impl AckQueue {
    /// Start the worker task.
    ///
    /// `capacity` bounds queued acknowledgments; `max_in_flight` bounds
    /// concurrent transport calls. Both are clamped to at least 1.
    pub fn spawn(transport: Arc<dyn Transport>, capacity: usize, max_in_flight: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(run_worker(transport, rx, max_in_flight.max(1)));
        Self { tx, worker }
    }

    /// Queue an acknowledgment. Returns false if it was dropped.
    pub fn submit(&self, ack: ReadAck) -> bool {
        match self.tx.try_send(ack) {
            Ok(()) => true,
            Err(TrySendError::Full(ack)) => {
                warn!(message_id = %ack.message_id, "ack queue full, dropping acknowledgment");
                false
            }
            Err(TrySendError::Closed(ack)) => {
                debug!(message_id = %ack.message_id, "ack worker stopped, dropping acknowledgment");
                false
            }
        }
    }

    /// Stop accepting work and wait for queued acknowledgments to finish.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            error!(error = %e, "ack worker panicked");
        }
    }
}

async fn run_worker(
    transport: Arc<dyn Transport>,
    mut rx: mpsc::Receiver<ReadAck>,
    max_in_flight: usize,
) {
    let mut in_flight: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            Some(result) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = result {
                    error!(error = %e, "acknowledgment task failed");
                }
            }
            next = rx.recv(), if in_flight.len() < max_in_flight => {
                let Some(ack) = next else { break };
                let transport = Arc::clone(&transport);
                in_flight.spawn(async move {
                    match transport.mark_read(&ack).await {
                        Ok(()) => trace!(message_id = %ack.message_id, "marked as read"),
                        Err(e) => debug!(message_id = %ack.message_id, error = %e, "mark-as-read failed"),
                    }
                });
            }
        }
    }

    while let Some(result) = in_flight.join_next().await {
        if let Err(e) = result {
            error!(error = %e, "acknowledgment task failed");
        }
    }
    trace!("ack worker stopped");
}
