use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    broadcast::{BroadcastHub, BroadcastMessage},
    series::Sample,
    series_store::SeriesStore,
};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("batch must contain at least one reading")]
    EmptyBatch,
    #[error("value for sensor {identifier:?} must be a finite number, got {value}")]
    NonFiniteValue { identifier: String, value: f64 },
    #[error("payload is not a JSON object of sensor readings: {0}")]
    MalformedPayload(#[from] serde_json::Error),
}

/// A stored reading, as acknowledged back to the producer.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub identifier: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl From<&Reading> for BroadcastMessage {
    fn from(r: &Reading) -> Self {
        Self {
            identifier: r.identifier.clone(),
            value: r.value,
            timestamp: r.timestamp,
        }
    }
}

/// Funnels every producer path into `SeriesStore::append` and, where
/// enabled, the broadcast hub.
#[derive(Clone)]
pub struct IngestService {
    store: SeriesStore,
    hub: BroadcastHub,
    /// Whether batch and bus readings are broadcast as well as single ones.
    broadcast_secondary: bool,
}

impl IngestService {
    pub fn new(store: SeriesStore, hub: BroadcastHub, broadcast_secondary: bool) -> Self {
        Self {
            store,
            hub,
            broadcast_secondary,
        }
    }

    pub fn store(&self) -> &SeriesStore {
        &self.store
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    /// Stamp a single reading with the current time, store it and push it
    /// to every live subscriber.
    pub async fn record(&self, identifier: &str, value: f64) -> Result<Reading, IngestError> {
        let reading = self.append(identifier, value, Utc::now()).await?;
        let delivered = self.hub.broadcast(&(&reading).into()).await;
        debug!(identifier = %identifier, value, delivered, "Reading recorded");
        Ok(reading)
    }

    /// Store every reading in `items` under one shared timestamp.
    ///
    /// Only the last reading is acknowledged. The batch is checked up front,
    /// so a rejected batch stores nothing.
    pub async fn record_batch(&self, items: &[(String, f64)]) -> Result<Reading, IngestError> {
        for (identifier, value) in items {
            check_finite(identifier, *value)?;
        }

        let now = Utc::now();
        let mut last = None;
        for (identifier, value) in items {
            let reading = self.append(identifier, *value, now).await?;
            if self.broadcast_secondary {
                self.hub.broadcast(&(&reading).into()).await;
            }
            last = Some(reading);
        }

        let last = last.ok_or(IngestError::EmptyBatch)?;
        debug!(count = items.len(), "Batch recorded");
        Ok(last)
    }

    /// Handle one message delivered by the bus: a JSON object mapping
    /// sensor identifiers to numeric values.
    ///
    /// Entries whose value is not a finite number are skipped. Returns the
    /// number of readings stored.
    pub async fn deliver(&self, payload: &[u8]) -> Result<usize, IngestError> {
        let readings: Map<String, Value> = serde_json::from_slice(payload)?;
        let now = Utc::now();
        let mut stored = 0;

        for (identifier, value) in &readings {
            let Some(value) = value.as_f64() else {
                warn!(identifier = %identifier, value = %value, "Ignoring non-numeric bus reading");
                continue;
            };
            let reading = match self.append(identifier, value, now).await {
                Ok(reading) => reading,
                Err(e) => {
                    warn!(error = %e, "Ignoring bus reading");
                    continue;
                }
            };
            if self.broadcast_secondary {
                self.hub.broadcast(&(&reading).into()).await;
            }
            stored += 1;
        }

        debug!(stored, "Bus message ingested");
        Ok(stored)
    }

    async fn append(
        &self,
        identifier: &str,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<Reading, IngestError> {
        check_finite(identifier, value)?;
        let sample = self.store.append(identifier, Sample::new(timestamp, value)).await;
        Ok(Reading {
            identifier: identifier.to_owned(),
            value: sample.value,
            timestamp: sample.timestamp,
        })
    }
}

// NaN and infinities serialise to JSON `null` and break plateau equality.
fn check_finite(identifier: &str, value: f64) -> Result<(), IngestError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(IngestError::NonFiniteValue {
            identifier: identifier.to_owned(),
            value,
        })
    }
}
