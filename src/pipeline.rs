//! Ingestion pipeline
//!
//! Turns one raw bus message into a stored snapshot and fans it out:
//!
//! ```text
//! payload → decode → stamp → store ─┬─► alert check ─► notifier (detached)
//!                                   ├─► forwarder (detached)
//!                                   └─► broadcaster (awaited)
//! ```
//!
//! Only decoding and the store write can fail the call. Once the snapshot is
//! stored it is the source of truth for lookups, whatever happens downstream.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::alerts::AlertEvaluator;
use crate::broadcast::Broadcaster;
use crate::forwarder::MetricForwarder;
use crate::notify::{Notifier, NotifyError};
use crate::storage::{SnapshotStore, StorageError};
use crate::{DeviceId, Snapshot};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid sensor JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unrecognized sensor id {0}")]
    SensorId(String),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("failed to store snapshot: {0}")]
    Store(#[from] StorageError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Empty payload, nothing to do
    Ignored,
    Stored {
        device_id: DeviceId,
        alert_triggered: bool,
        pushed_to: usize,
    },
}

/// Envelope published by the field devices
#[derive(Debug, Deserialize)]
struct DeviceEnvelope {
    /// `"sensor_7"`, `"7"` or `7`
    sensor_id: Value,
    data: DeviceData,
}

#[derive(Debug, Deserialize)]
struct DeviceData {
    temperatura_dht: f64,
    humedad_dht: f64,
    temperatura_bmp: f64,
    presion: f64,
    calidad_aire: f64,
    gas_inflamable: f64,
}

/// Flat record using the snapshot field names
#[derive(Debug, Deserialize)]
struct FlatReading {
    id: DeviceId,
    temperatura_dht: f64,
    humedad: f64,
    temperatura_bmp: f64,
    presion: f64,
    calidad_aire: f64,
    gas_inflamable: f64,
}

fn parse_sensor_id(raw: &Value) -> Result<DeviceId, DecodeError> {
    let parsed = match raw {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => {
            let trimmed = text.trim();
            trimmed
                .strip_prefix("sensor_")
                .unwrap_or(trimmed)
                .parse()
                .ok()
        }
        _ => None,
    };
    parsed.ok_or_else(|| DecodeError::SensorId(raw.to_string()))
}

/// Decode a bus payload. The returned timestamp is a placeholder the
/// pipeline overwrites; device-supplied timestamps are never kept.
///
/// A top-level `sensor_id` selects the device envelope, anything else is
/// read as a flat record.
pub fn decode(payload: &[u8]) -> Result<Snapshot, DecodeError> {
    let value: Value = serde_json::from_slice(payload)?;
    let now = Utc::now();

    let snapshot = if value.get("sensor_id").is_some() {
        let DeviceEnvelope { sensor_id, data } = serde_json::from_value(value)?;
        Snapshot {
            id: parse_sensor_id(&sensor_id)?,
            temperatura_dht: data.temperatura_dht,
            humedad: data.humedad_dht,
            temperatura_bmp: data.temperatura_bmp,
            presion: data.presion,
            calidad_aire: data.calidad_aire,
            gas_inflamable: data.gas_inflamable,
            timestamp: now,
        }
    } else {
        let flat: FlatReading = serde_json::from_value(value)?;
        Snapshot {
            id: flat.id,
            temperatura_dht: flat.temperatura_dht,
            humedad: flat.humedad,
            temperatura_bmp: flat.temperatura_bmp,
            presion: flat.presion,
            calidad_aire: flat.calidad_aire,
            gas_inflamable: flat.gas_inflamable,
            timestamp: now,
        }
    };

    Ok(snapshot)
}

/// Alert evaluation plus where to send what it produces
pub struct AlertStage {
    pub evaluator: AlertEvaluator,
    pub notifier: Option<Arc<dyn Notifier>>,
    pub timeout: Duration,
}

pub struct IngestionPipeline {
    store: Arc<dyn SnapshotStore>,
    alerts: Option<AlertStage>,
    forwarder: Arc<MetricForwarder>,
    forward_contact: Option<String>,
    broadcaster: Broadcaster,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        forwarder: Arc<MetricForwarder>,
        broadcaster: Broadcaster,
    ) -> Self {
        Self {
            store,
            alerts: None,
            forwarder,
            forward_contact: None,
            broadcaster,
        }
    }

    pub fn with_alerts(mut self, alerts: AlertStage) -> Self {
        self.alerts = Some(alerts);
        self
    }

    /// Correlation token attached to every forwarded reading
    pub fn with_forward_contact(mut self, contact: Option<String>) -> Self {
        self.forward_contact = contact;
        self
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Process one message received on `topic`.
    #[instrument(skip(self, payload), fields(bytes = payload.len()))]
    pub async fn ingest(&self, topic: &str, payload: &[u8]) -> Result<IngestOutcome, IngestError> {
        if payload.iter().all(u8::is_ascii_whitespace) {
            warn!("empty message received, ignoring");
            return Ok(IngestOutcome::Ignored);
        }

        trace!("payload: {}", String::from_utf8_lossy(payload));

        let mut snapshot = decode(payload).inspect_err(|e| error!("discarding message: {e}"))?;
        snapshot.timestamp = Utc::now();
        let device_id = snapshot.id;

        self.store
            .put(snapshot.clone())
            .await
            .inspect_err(|e| error!("device {device_id}: {e}"))?;
        debug!("device {device_id}: snapshot stored");

        let alert_triggered = self.raise_alert(&snapshot);

        self.forwarder
            .spawn_forward(snapshot.clone(), self.forward_contact.clone());

        let report = self.broadcaster.push(&snapshot).await;

        info!(
            "device {device_id}: ingested, pushed to {} subscribers",
            report.delivered
        );

        Ok(IngestOutcome::Stored {
            device_id,
            alert_triggered,
            pushed_to: report.delivered,
        })
    }

    /// Evaluate the alert rule and, when it fires, hand the message to the
    /// notifier on a detached task. Returns whether the rule fired.
    fn raise_alert(&self, snapshot: &Snapshot) -> bool {
        let Some(stage) = &self.alerts else {
            return false;
        };
        let Some(message) = stage.evaluator.evaluate(snapshot) else {
            return false;
        };

        warn!("{message}");

        let Some(notifier) = stage.notifier.clone() else {
            debug!("alert triggered but no notifier configured");
            return true;
        };

        let destination = stage.evaluator.rule().destination().to_string();
        let timeout = stage.timeout;
        let gas = snapshot.gas_inflamable;

        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, notifier.send(&destination, &message))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(NotifyError::Timeout(timeout)),
            };

            match result {
                Ok(()) => info!("alert sent to {destination} for gas level {gas:.2} PPM"),
                Err(e) => error!("error sending alert: {e}"),
            }
        });

        true
    }
}
