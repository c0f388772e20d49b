//! Per-metric relay to third-party collectors
//!
//! Every snapshot carries six metrics and each metric may have its own
//! collector. Delivery is best effort:
//!
//! ```text
//! Snapshot ─┬─► temperatura_dht ─► sink A   (timeout-bounded, one attempt)
//!           ├─► humedad         ─► (no sink, skipped)
//!           ├─► ...
//!           └─► gas_inflamable  ─► sink F
//! ```
//!
//! The sends run concurrently and each is bounded by its own timeout, so a
//! slow or failing collector never holds up the others. Outcomes are collected
//! into a [`ForwardReport`]; nothing is retried.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::{DeviceId, Metric, MetricReading, Snapshot};

/// Body posted to a metric collector
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForwardPayload {
    pub id: DeviceId,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    /// Caller supplied correlation token, e.g. the contact that asked for it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

impl ForwardPayload {
    pub fn new(reading: &MetricReading, correlation: Option<&str>) -> Self {
        Self {
            id: reading.device_id,
            value: reading.value,
            timestamp: reading.timestamp,
            phone_number: correlation.map(String::from),
        }
    }
}

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("collector answered {0} instead of 200")]
    Status(StatusCode),

    #[error("no answer within {0:?}")]
    Timeout(Duration),
}

/// Destination for the readings of one metric
#[async_trait]
pub trait MetricSink: Send + Sync {
    /// One delivery attempt. `Ok` only on an explicit 200-equivalent acknowledgement.
    async fn send(&self, payload: &ForwardPayload) -> Result<(), ForwardError>;

    /// Human readable destination for logs
    fn destination(&self) -> &str;
}

/// Collector reached with a JSON POST
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: Client,
    url: String,
}

impl HttpSink {
    pub fn new(client: Client, url: impl ToString) -> Self {
        Self {
            client,
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl MetricSink for HttpSink {
    async fn send(&self, payload: &ForwardPayload) -> Result<(), ForwardError> {
        let response = self.client.post(&self.url).json(payload).send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(ForwardError::Status(status));
        }
        Ok(())
    }

    fn destination(&self) -> &str {
        &self.url
    }
}

#[derive(Debug)]
pub enum ForwardOutcome {
    Delivered,
    Failed(ForwardError),
    /// No sink configured for this metric
    Skipped,
}

#[derive(Debug)]
pub struct ForwardReport {
    pub device_id: DeviceId,
    pub outcomes: BTreeMap<Metric, ForwardOutcome>,
}

impl ForwardReport {
    pub fn delivered(&self) -> usize {
        self.count(|o| matches!(o, ForwardOutcome::Delivered))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ForwardOutcome::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ForwardOutcome::Skipped))
    }

    pub fn outcome(&self, metric: Metric) -> Option<&ForwardOutcome> {
        self.outcomes.get(&metric)
    }

    fn count(&self, predicate: impl Fn(&ForwardOutcome) -> bool) -> usize {
        self.outcomes.values().filter(|o| predicate(o)).count()
    }
}

pub struct MetricForwarder {
    sinks: BTreeMap<Metric, Arc<dyn MetricSink>>,
    timeout: Duration,
}

impl MetricForwarder {
    pub fn new(sinks: BTreeMap<Metric, Arc<dyn MetricSink>>, timeout: Duration) -> Self {
        Self { sinks, timeout }
    }

    /// HTTP sinks for the configured URLs, sharing one client.
    pub fn from_urls(
        urls: &BTreeMap<Metric, String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;

        let sinks = urls
            .iter()
            .map(|(metric, url)| {
                let sink: Arc<dyn MetricSink> = Arc::new(HttpSink::new(client.clone(), url));
                (*metric, sink)
            })
            .collect();

        Ok(Self::new(sinks, timeout))
    }

    pub fn configured_metrics(&self) -> impl Iterator<Item = Metric> + '_ {
        self.sinks.keys().copied()
    }

    /// Send every configured metric of `snapshot` to its sink and wait for all outcomes.
    #[instrument(skip(self, snapshot), fields(device = snapshot.id))]
    pub async fn forward(&self, snapshot: &Snapshot, correlation: Option<&str>) -> ForwardReport {
        let deliveries = Metric::ALL.iter().map(|metric| async move {
            let Some(sink) = self.sinks.get(metric) else {
                return (*metric, ForwardOutcome::Skipped);
            };

            let payload = ForwardPayload::new(&snapshot.reading(*metric), correlation);
            let outcome = match tokio::time::timeout(self.timeout, sink.send(&payload)).await {
                Ok(Ok(())) => {
                    debug!("{metric}: delivered {} to {}", payload.value, sink.destination());
                    ForwardOutcome::Delivered
                }
                Ok(Err(e)) => {
                    error!("{metric}: delivery to {} failed: {e}", sink.destination());
                    ForwardOutcome::Failed(e)
                }
                Err(_) => {
                    error!("{metric}: delivery to {} timed out", sink.destination());
                    ForwardOutcome::Failed(ForwardError::Timeout(self.timeout))
                }
            };

            (*metric, outcome)
        });

        ForwardReport {
            device_id: snapshot.id,
            outcomes: join_all(deliveries).await.into_iter().collect(),
        }
    }

    /// Fire-and-forget variant of [`forward`](Self::forward).
    ///
    /// The report is only logged. The handle is returned for callers that
    /// want to observe completion; dropping it does not cancel the task.
    pub fn spawn_forward(
        self: &Arc<Self>,
        snapshot: Snapshot,
        correlation: Option<String>,
    ) -> JoinHandle<ForwardReport> {
        let forwarder = Arc::clone(self);
        tokio::spawn(async move {
            let report = forwarder.forward(&snapshot, correlation.as_deref()).await;
            if report.failed() > 0 {
                warn!(
                    "device {}: forwarded {} metrics, {} failed",
                    report.device_id,
                    report.delivered(),
                    report.failed()
                );
            } else {
                info!(
                    "device {}: forwarded {} metrics",
                    report.device_id,
                    report.delivered()
                );
            }
            report
        })
    }
}
