//! Bounded hand-off between the message-bus client and the store.
//!
//! The bus client only ever pushes raw payloads into a `DeliverySender`;
//! a single `DeliveryWorker` task decodes and stores them in arrival order.

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{info, warn};

use super::IngestService;

/// Producer side of the delivery queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DeliverySender {
    tx: mpsc::Sender<Vec<u8>>,
}

impl DeliverySender {
    /// Queue one payload without waiting. Fails with `Full` when the worker
    /// is behind, so the bus client can keep polling its connection.
    pub fn try_send(&self, payload: Vec<u8>) -> Result<(), TrySendError<Vec<u8>>> {
        self.tx.try_send(payload)
    }
}

pub struct DeliveryWorker {
    rx: mpsc::Receiver<Vec<u8>>,
    service: IngestService,
}

pub fn delivery_queue(capacity: usize, service: IngestService) -> (DeliverySender, DeliveryWorker) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (DeliverySender { tx }, DeliveryWorker { rx, service })
}

impl DeliveryWorker {
    /// Drains the queue until every sender has been dropped.
    /// Spawn this via `tokio::spawn`.
    pub async fn run(mut self) {
        info!("Bus delivery worker started");
        while let Some(payload) = self.rx.recv().await {
            if let Err(e) = self.service.deliver(&payload).await {
                warn!(error = %e, bytes = payload.len(), "Discarding bus message");
            }
        }
        info!("Bus delivery worker stopped");
    }
}
