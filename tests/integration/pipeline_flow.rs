//! End-to-end flow from bus payload to store, alert, sinks and subscribers

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::Utc;
use pretty_assertions::assert_eq;
use telemetry_gateway::{
    Metric,
    broadcast::Broadcaster,
    notify::Notifier,
    pipeline::{IngestOutcome, IngestionPipeline},
    storage::MemoryStore,
    subscription::{NOT_FOUND, SubscriberResponse, SubscriptionHandler},
};
use tokio::time::timeout;

use crate::helpers::*;

#[tokio::test]
async fn test_ingest_stores_alerts_and_pushes() {
    let (notifier, mut alerts) = RecordingNotifier::new(false);
    let gateway = gateway_with(Some(notifier as Arc<dyn Notifier>), None);
    let mut subscription = gateway.broadcaster.subscribe();

    let before = Utc::now();
    let outcome = gateway
        .pipeline
        .ingest("sensors/data", &flat_payload(7, 150.0))
        .await
        .unwrap();
    let after = Utc::now();

    assert_eq!(
        outcome,
        IngestOutcome::Stored {
            device_id: 7,
            alert_triggered: true,
            pushed_to: 1,
        }
    );

    let stored = gateway.store.get(7).await.unwrap().unwrap();
    assert_eq!(stored.gas_inflamable, 150.0);
    assert!(stored.timestamp >= before && stored.timestamp <= after);

    let (destination, message) = timeout(Duration::from_secs(1), alerts.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(destination, "5551234567");
    assert!(message.contains('7'));
    assert!(message.contains("150.00"));

    let pushed = subscription.recv().await.unwrap();
    assert_eq!(pushed, stored);

    let handler = SubscriptionHandler::new(gateway.store.clone(), gateway.broadcaster.clone());
    assert_eq!(
        handler.respond(r#"{"id": 8}"#).await,
        SubscriberResponse::error(NOT_FOUND)
    );
    assert_eq!(
        handler.respond(r#"{"id": 7}"#).await,
        SubscriberResponse::data(stored)
    );
}

#[tokio::test]
async fn test_out_of_range_gas_does_not_alert() {
    let (notifier, mut alerts) = RecordingNotifier::new(false);
    let gateway = gateway_with(Some(notifier as Arc<dyn Notifier>), None);

    for gas in [99.99, 500.01] {
        let outcome = gateway
            .pipeline
            .ingest("sensors/data", &flat_payload(3, gas))
            .await
            .unwrap();
        assert_matches!(
            outcome,
            IngestOutcome::Stored {
                alert_triggered: false,
                ..
            }
        );
    }

    // Boundaries are inclusive
    let outcome = gateway
        .pipeline
        .ingest("sensors/data", &flat_payload(3, 500.0))
        .await
        .unwrap();
    assert_matches!(
        outcome,
        IngestOutcome::Stored {
            alert_triggered: true,
            ..
        }
    );

    let (_, message) = timeout(Duration::from_secs(1), alerts.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(message.contains("500.00"));
    assert!(alerts.try_recv().is_err());
}

#[tokio::test]
async fn test_device_envelope_is_restamped() {
    let gateway = gateway_with(None, None);

    gateway
        .pipeline
        .ingest("sensors/data", &device_payload("sensor_12", 10.0))
        .await
        .unwrap();

    let stored = gateway.store.get(12).await.unwrap().unwrap();
    assert_eq!(stored.humedad, 71.0);
    // The device's own timestamp is never kept
    assert!(stored.timestamp.timestamp() > 946_684_799);
}

#[tokio::test]
async fn test_latest_snapshot_wins() {
    let gateway = gateway_with(None, None);

    gateway
        .pipeline
        .ingest("sensors/data", &flat_payload(5, 10.0))
        .await
        .unwrap();
    gateway
        .pipeline
        .ingest("sensors/data", &flat_payload(5, 20.0))
        .await
        .unwrap();

    let stored = gateway.store.get(5).await.unwrap().unwrap();
    assert_eq!(stored.gas_inflamable, 20.0);
    assert_eq!(gateway.store.len().await.unwrap(), 1);
}

#[tokio::test]
async fn test_every_metric_is_forwarded() {
    let (forwarder, mut forwarded) = recording_forwarder();
    let gateway = gateway_with(None, Some(forwarder));

    gateway
        .pipeline
        .ingest("sensors/data", &flat_payload(4, 42.0))
        .await
        .unwrap();

    let mut metrics = Vec::new();
    for _ in 0..Metric::ALL.len() {
        let (metric, payload) = timeout(Duration::from_secs(1), forwarded.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload.id, 4);
        assert_eq!(payload.phone_number, None);
        if metric == Metric::GasInflamable {
            assert_eq!(payload.value, 42.0);
        }
        metrics.push(metric);
    }
    metrics.sort();

    assert_eq!(metrics, Metric::ALL.to_vec());
}

#[tokio::test]
async fn test_forward_contact_tags_every_reading() {
    let (forwarder, mut forwarded) = recording_forwarder();
    let pipeline = IngestionPipeline::new(
        Arc::new(MemoryStore::new()),
        forwarder,
        Broadcaster::new(Duration::from_millis(100)),
    )
    .with_forward_contact(Some("5559876543".to_string()));

    pipeline
        .ingest("sensors/data", &flat_payload(6, 12.0))
        .await
        .unwrap();

    for _ in 0..Metric::ALL.len() {
        let (_, payload) = timeout(Duration::from_secs(1), forwarded.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload.id, 6);
        assert_eq!(payload.phone_number.as_deref(), Some("5559876543"));
    }
}
