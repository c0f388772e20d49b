//! Concurrent ingestion and subscription

use std::time::Duration;

use futures::future::join_all;
use telemetry_gateway::pipeline::IngestOutcome;

use crate::helpers::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ingest_for_distinct_devices() {
    let gateway = gateway_with(None, None);

    let tasks = (1..=50).map(|id| {
        let pipeline = gateway.pipeline.clone();
        tokio::spawn(async move { pipeline.ingest("sensors/data", &flat_payload(id, 1.0)).await })
    });

    for result in join_all(tasks).await {
        assert!(matches!(result.unwrap(), Ok(IngestOutcome::Stored { .. })));
    }

    assert_eq!(gateway.store.len().await.unwrap(), 50);
    let ids = gateway.store.device_ids().await.unwrap();
    assert_eq!(ids, (1..=50).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_updates_to_one_device_keep_a_whole_snapshot() {
    let gateway = gateway_with(None, None);

    let tasks = (0..40).map(|n| {
        let pipeline = gateway.pipeline.clone();
        tokio::spawn(async move {
            pipeline
                .ingest("sensors/data", &flat_payload(3, n as f64))
                .await
        })
    });
    for result in join_all(tasks).await {
        result.unwrap().unwrap();
    }

    let stored = gateway.store.get(3).await.unwrap().unwrap();
    assert!((0.0..40.0).contains(&stored.gas_inflamable));
    assert_eq!(stored.humedad, 60.0);
    assert_eq!(gateway.store.len().await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_subscribers_joining_during_ingest() {
    let gateway = gateway_with(None, None);

    let ingest = {
        let pipeline = gateway.pipeline.clone();
        tokio::spawn(async move {
            for n in 0..19 {
                pipeline
                    .ingest("sensors/data", &flat_payload(n, 1.0))
                    .await
                    .unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    let mut subscriptions = Vec::new();
    for _ in 0..10 {
        subscriptions.push(gateway.broadcaster.subscribe());
        tokio::task::yield_now().await;
    }

    ingest.await.unwrap();
    gateway
        .pipeline
        .ingest("sensors/data", &flat_payload(19, 1.0))
        .await
        .unwrap();

    // Every subscriber sees the final push, in order and without duplicates
    for mut subscription in subscriptions {
        let mut last = None;
        while let Ok(Some(snapshot)) =
            tokio::time::timeout(Duration::from_millis(20), subscription.recv()).await
        {
            if let Some(previous) = last {
                assert!(snapshot.id > previous);
            }
            last = Some(snapshot.id);
        }
        assert_eq!(last, Some(19));
    }
    assert_eq!(gateway.broadcaster.subscriber_count(), 10);
}
