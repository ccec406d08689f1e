//! Event dispatch queue.
//!
//! Decouples "received on the socket" from "processed by the translator".
//! The translator may issue RPCs while handling a notification; doing that
//! on the read loop would wait on a response only the read loop can deliver.
//!
//! The queue is bounded. Overflow is not backpressure: the read loop treats
//! it as fatal for the connection.

use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info};

use crate::domain::notification::Notification;
use crate::error::ClientError;
use crate::translator::PrinterStateTranslator;

/// Producer half, owned by the read loop.
#[derive(Clone)]
pub struct EventDispatchQueue {
    tx: mpsc::Sender<Notification>,
    capacity: usize,
}

impl EventDispatchQueue {
    /// Create the queue and its consumer.
    pub fn new(
        capacity: usize,
        translator: Arc<PrinterStateTranslator>,
    ) -> (Self, DispatchWorker) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, capacity }, DispatchWorker { rx, translator })
    }

    /// Enqueue without waiting.
    pub fn try_enqueue(&self, notification: Notification) -> Result<(), ClientError> {
        self.tx.try_send(notification).map_err(|e| match e {
            TrySendError::Full(_) => ClientError::QueueOverflow {
                capacity: self.capacity,
            },
            TrySendError::Closed(_) => ClientError::DispatchClosed,
        })
    }
}

/// The single consumer. Feeds the translator in receipt order.
pub struct DispatchWorker {
    rx: mpsc::Receiver<Notification>,
    translator: Arc<PrinterStateTranslator>,
}

impl DispatchWorker {
    /// Run until every producer is gone.
    ///
    /// This should be spawned as a background task.
    pub async fn run(mut self) {
        info!("Notification dispatch worker started");
        while let Some(notification) = self.rx.recv().await {
            self.translator.on_unsolicited(notification).await;
        }
        debug!("Notification dispatch worker stopped");
    }
}
