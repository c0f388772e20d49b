//! Helper functions for integration tests

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use telemetry_gateway::{
    DeviceId, Metric, Snapshot,
    alerts::{AlertEvaluator, AlertRule},
    broadcast::Broadcaster,
    forwarder::{ForwardError, ForwardPayload, MetricForwarder, MetricSink},
    notify::{Notifier, NotifyError},
    pipeline::{AlertStage, IngestionPipeline},
    storage::{MemoryStore, SnapshotStore},
};
use tokio::sync::mpsc;

pub fn flat_payload(id: DeviceId, gas: f64) -> Vec<u8> {
    serde_json::json!({
        "id": id,
        "temperatura_dht": 23.5,
        "humedad": 60.0,
        "temperatura_bmp": 23.1,
        "presion": 1013.2,
        "calidad_aire": 40.0,
        "gas_inflamable": gas,
    })
    .to_string()
    .into_bytes()
}

pub fn device_payload(sensor_id: &str, gas: f64) -> Vec<u8> {
    serde_json::json!({
        "sensor_id": sensor_id,
        "timestamp": "1999-12-31T23:59:59Z",
        "data": {
            "temperatura_dht": 19.0,
            "humedad_dht": 71.0,
            "temperatura_bmp": 18.6,
            "presion": 1002.4,
            "calidad_aire": 88.0,
            "gas_inflamable": gas,
        }
    })
    .to_string()
    .into_bytes()
}

pub fn snapshot(id: DeviceId) -> Snapshot {
    Snapshot {
        id,
        temperatura_dht: 23.5,
        humedad: 60.0,
        temperatura_bmp: 23.1,
        presion: 1013.2,
        calidad_aire: 40.0,
        gas_inflamable: 150.0,
        timestamp: Utc::now(),
    }
}

/// Notifier that reports every call on a channel
pub struct RecordingNotifier {
    tx: mpsc::UnboundedSender<(String, String)>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new(fail: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<(String, String)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx, fail }), rx)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, destination: &str, message: &str) -> Result<(), NotifyError> {
        let _ = self.tx.send((destination.to_string(), message.to_string()));
        if self.fail {
            return Err(NotifyError::Timeout(Duration::ZERO));
        }
        Ok(())
    }
}

/// Sink that reports every payload on a channel
pub struct RecordingSink {
    metric: Metric,
    tx: mpsc::UnboundedSender<(Metric, ForwardPayload)>,
}

#[async_trait]
impl MetricSink for RecordingSink {
    async fn send(&self, payload: &ForwardPayload) -> Result<(), ForwardError> {
        let _ = self.tx.send((self.metric, payload.clone()));
        Ok(())
    }

    fn destination(&self) -> &str {
        "recording"
    }
}

pub fn recording_forwarder() -> (
    Arc<MetricForwarder>,
    mpsc::UnboundedReceiver<(Metric, ForwardPayload)>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sinks: BTreeMap<Metric, Arc<dyn MetricSink>> = Metric::ALL
        .iter()
        .map(|metric| {
            let sink: Arc<dyn MetricSink> = Arc::new(RecordingSink {
                metric: *metric,
                tx: tx.clone(),
            });
            (*metric, sink)
        })
        .collect();
    (
        Arc::new(MetricForwarder::new(sinks, Duration::from_secs(1))),
        rx,
    )
}

pub struct TestGateway {
    pub store: Arc<dyn SnapshotStore>,
    pub broadcaster: Broadcaster,
    pub pipeline: Arc<IngestionPipeline>,
}

/// Pipeline with the [100, 500] gas range and no forwarding sinks
pub fn gateway_with(
    notifier: Option<Arc<dyn Notifier>>,
    forwarder: Option<Arc<MetricForwarder>>,
) -> TestGateway {
    let store: Arc<dyn SnapshotStore> = Arc::new(MemoryStore::new());
    let broadcaster = Broadcaster::new(Duration::from_millis(200));
    let forwarder = forwarder.unwrap_or_else(|| {
        Arc::new(MetricForwarder::new(BTreeMap::new(), Duration::from_secs(1)))
    });

    let pipeline = IngestionPipeline::new(store.clone(), forwarder, broadcaster.clone())
        .with_alerts(AlertStage {
            evaluator: AlertEvaluator::new(AlertRule::new(100.0, 500.0, "5551234567").unwrap()),
            notifier,
            timeout: Duration::from_secs(1),
        });

    TestGateway {
        store,
        broadcaster,
        pipeline: Arc::new(pipeline),
    }
}
