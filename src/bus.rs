//! MQTT ingestion adapter
//!
//! Drives a `rumqttc` event loop and hands every publish to the pipeline on
//! its own task, so one slow message never delays the next.
//!
//! ## Message Flow
//!
//! ```text
//! broker ─► EventLoop::poll ─► Publish ─► spawn(pipeline.ingest(topic, payload))
//!               │
//!               ├─ ConnAck ─► (re)subscribe to the configured topic
//!               └─ error   ─► sleep(reconnect_delay) and poll again
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS};
use tracing::{debug, error, info, instrument, trace, warn};
use url::Url;

use crate::config::BusConfig;
use crate::pipeline::IngestionPipeline;
use crate::util::timestamped_client_id;

const DEFAULT_MQTT_PORT: u16 = 1883;

/// Host and port out of `mqtt://host:port`, `tcp://host:port` or plain `host:port`.
pub fn broker_address(raw: &str) -> Result<(String, u16)> {
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("mqtt://{raw}")
    };

    let url = Url::parse(&with_scheme).with_context(|| format!("invalid broker url {raw:?}"))?;
    let host = url
        .host_str()
        .with_context(|| format!("broker url {raw:?} has no host"))?
        .to_string();

    Ok((host, url.port().unwrap_or(DEFAULT_MQTT_PORT)))
}

pub fn mqtt_options(config: &BusConfig) -> Result<MqttOptions> {
    let (host, port) = broker_address(&config.url)?;
    let client_id = timestamped_client_id(&config.client_id_prefix);
    debug!("connecting to {host}:{port} as {client_id}");

    let mut options = MqttOptions::new(client_id, host, port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        options.set_credentials(username, password);
    }
    Ok(options)
}

pub struct BusListener {
    client: AsyncClient,
    eventloop: EventLoop,
    topic: String,
    reconnect_delay: Duration,
    pipeline: Arc<IngestionPipeline>,
}

impl BusListener {
    pub fn new(config: &BusConfig, pipeline: Arc<IngestionPipeline>) -> Result<Self> {
        let (client, eventloop) = AsyncClient::new(mqtt_options(config)?, 32);

        Ok(Self {
            client,
            eventloop,
            topic: config.topic.clone(),
            reconnect_delay: Duration::from_secs(config.reconnect_delay_secs),
            pipeline,
        })
    }

    /// Poll the broker until the process stops. Connection errors are logged
    /// and retried after the reconnect delay.
    #[instrument(skip(self), fields(topic = %self.topic))]
    pub async fn run(mut self) {
        info!("waiting for messages");

        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                    info!("connected to broker: {:?}", ack.code);
                    // Subscribing on every ConnAck restores the subscription after a reconnect
                    match self.client.subscribe(&self.topic, QoS::AtLeastOnce).await {
                        Ok(()) => info!("subscribed to {}", self.topic),
                        Err(e) => error!("failed to subscribe to {}: {e}", self.topic),
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    trace!("message received on {}", publish.topic);
                    let pipeline = Arc::clone(&self.pipeline);
                    tokio::spawn(async move {
                        // Failures are already logged by the pipeline
                        let _ = pipeline.ingest(&publish.topic, &publish.payload).await;
                    });
                }
                Ok(Event::Incoming(Incoming::SubAck(ack))) => {
                    debug!("suback: {:?}", ack.return_codes);
                }
                Ok(other) => trace!("mqtt event: {other:?}"),
                Err(e) => {
                    warn!(
                        "connection lost: {e}; retrying in {:?}",
                        self.reconnect_delay
                    );
                    tokio::time::sleep(self.reconnect_delay).await;
                }
            }
        }
    }
}
