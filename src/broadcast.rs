use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    RwLock,
};
use tracing::{debug, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Pushed to every live subscriber when a reading is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BroadcastMessage {
    #[serde(rename = "endereco")]
    pub identifier: String,
    #[serde(rename = "temperatura")]
    pub value: f64,
    #[serde(rename = "data")]
    pub timestamp: DateTime<Utc>,
}

/// A registered connection's end of the fan-out.
///
/// Dropping the receiver makes the next broadcast fail for this connection,
/// which deregisters it.
#[derive(Debug)]
pub struct Subscription {
    pub id: Uuid,
    pub receiver: mpsc::Receiver<Arc<str>>,
}

/// Registry of live subscriber connections.
///
/// Each connection owns a bounded channel; `broadcast` never awaits on a
/// connection, so one slow or dead client cannot hold up the others.
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<RwLock<HashMap<Uuid, mpsc::Sender<Arc<str>>>>>,
    buffer: usize,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(256)
    }
}

impl BroadcastHub {
    /// `buffer` is the number of undelivered messages a connection may
    /// queue before it is treated as failed.
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::default(),
            buffer: buffer.max(1),
        }
    }

    pub async fn subscribe(&self) -> Subscription {
        let (tx, receiver) = mpsc::channel(self.buffer);
        let id = Uuid::new_v4();
        self.inner.write().await.insert(id, tx);
        debug!(subscriber = %id, "Subscriber registered");
        Subscription { id, receiver }
    }

    pub async fn unsubscribe(&self, id: Uuid) {
        if self.inner.write().await.remove(&id).is_some() {
            debug!(subscriber = %id, "Subscriber deregistered");
        }
    }

    /// Send `message` to every registered connection and drop the ones that
    /// could not take it. Returns how many connections received it.
    pub async fn broadcast(&self, message: &BroadcastMessage) -> usize {
        let payload: Arc<str> = match serde_json::to_string(message) {
            Ok(json) => json.into(),
            Err(e) => {
                warn!(error = %e, "Failed to serialise broadcast message");
                return 0;
            }
        };

        let mut failed = Vec::new();
        let mut delivered = 0;
        {
            let subscribers = self.inner.read().await;
            for (id, tx) in subscribers.iter() {
                match tx.try_send(Arc::clone(&payload)) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        warn!(subscriber = %id, "Subscriber buffer full; dropping connection");
                        failed.push(*id);
                    }
                    Err(TrySendError::Closed(_)) => failed.push(*id),
                }
            }
        }

        if !failed.is_empty() {
            let mut subscribers = self.inner.write().await;
            for id in &failed {
                subscribers.remove(id);
            }
            debug!(removed = failed.len(), "Pruned disconnected subscribers");
        }

        delivered
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    pub async fn contains(&self, id: Uuid) -> bool {
        self.inner.read().await.contains_key(&id)
    }
}
