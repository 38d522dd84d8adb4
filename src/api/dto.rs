use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::{ingest::Reading, series_store::SeriesSnapshot};

/// Query string for `GET /log`.
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LogParams {
    /// Sensor identifier.
    pub endereco: String,
    /// Measured value.
    pub temperatura: f64,
}

/// One element of the `POST /log` body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LogEntryDto {
    pub endereco: String,
    pub temperatura: f64,
}

/// Acknowledgement for `GET /log` and `POST /log`.
///
/// For a batch only the last stored reading is echoed back.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LogAckDto {
    pub status: String,
    pub endereco: String,
    pub temperatura: f64,
    pub time: DateTime<Utc>,
}

impl From<Reading> for LogAckDto {
    fn from(r: Reading) -> Self {
        Self {
            status: "ok".to_owned(),
            endereco: r.identifier,
            temperatura: r.value,
            time: r.timestamp,
        }
    }
}

/// Retained history for one sensor. `temperatura[i]` was stamped at `data[i]`;
/// both lists are oldest first.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SeriesDto {
    pub endereco: String,
    pub temperatura: Vec<f64>,
    pub data: Vec<DateTime<Utc>>,
}

impl From<SeriesSnapshot> for SeriesDto {
    fn from(s: SeriesSnapshot) -> Self {
        Self {
            endereco: s.identifier,
            temperatura: s.values,
            data: s.timestamps,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthDto {
    pub status: String,
    /// Sensor identifiers seen since start-up.
    pub sensors: usize,
    /// Live WebSocket subscribers.
    pub subscribers: usize,
}
