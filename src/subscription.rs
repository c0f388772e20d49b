//! Per-subscriber request/response loop
//!
//! One handler task runs per connected subscriber. It multiplexes two inputs
//! onto the subscriber's outbound channel:
//!
//! ```text
//! inbound frame {"id": 7} ──► store lookup ──► {"data": {...}} | {"error": "..."}
//! broadcaster push       ──────────────────► {...snapshot...}
//! ```
//!
//! The loop is transport agnostic: it reads text frames from any `Stream` and
//! writes text frames into any `Sink`. A read or write failure, the end of the
//! stream, or removal by the broadcaster ends the loop as a normal disconnect.

use std::fmt::Display;
use std::sync::Arc;

use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::broadcast::Broadcaster;
use crate::forwarder::MetricForwarder;
use crate::storage::SnapshotStore;
use crate::{DeviceId, Snapshot};

pub const INVALID_REQUEST: &str = "invalid request format";
pub const NOT_FOUND: &str = "sensor data not found";
pub const STORAGE_UNAVAILABLE: &str = "sensor data unavailable";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriberRequest {
    pub id: DeviceId,
    /// Contact to correlate a forward of the requested snapshot with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriberResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Snapshot>,
}

impl SubscriberResponse {
    pub fn data(snapshot: Snapshot) -> Self {
        Self {
            error: None,
            data: Some(snapshot),
        }
    }

    pub fn error(message: impl ToString) -> Self {
        Self {
            error: Some(message.to_string()),
            data: None,
        }
    }
}

#[derive(Clone)]
pub struct SubscriptionHandler {
    store: Arc<dyn SnapshotStore>,
    broadcaster: Broadcaster,
    forwarder: Option<Arc<MetricForwarder>>,
}

impl SubscriptionHandler {
    pub fn new(store: Arc<dyn SnapshotStore>, broadcaster: Broadcaster) -> Self {
        Self {
            store,
            broadcaster,
            forwarder: None,
        }
    }

    /// Forward looked-up snapshots when a request carries a contact.
    pub fn with_forwarder(mut self, forwarder: Arc<MetricForwarder>) -> Self {
        self.forwarder = Some(forwarder);
        self
    }

    /// Answer a single request frame.
    pub async fn respond(&self, frame: &str) -> SubscriberResponse {
        let request: SubscriberRequest = match serde_json::from_str(frame) {
            Ok(request) => request,
            Err(e) => {
                debug!("invalid request {frame:?}: {e}");
                return SubscriberResponse::error(INVALID_REQUEST);
            }
        };

        trace!("request for device {}", request.id);

        match self.store.get(request.id).await {
            Ok(Some(snapshot)) => {
                if let (Some(contact), Some(forwarder)) = (request.phone_number, &self.forwarder) {
                    forwarder.spawn_forward(snapshot.clone(), Some(contact));
                }
                SubscriberResponse::data(snapshot)
            }
            Ok(None) => {
                debug!("no snapshot for device {}", request.id);
                SubscriberResponse::error(NOT_FOUND)
            }
            Err(e) => {
                error!("lookup of device {} failed: {e}", request.id);
                SubscriberResponse::error(STORAGE_UNAVAILABLE)
            }
        }
    }

    /// Serve one subscriber until it disconnects.
    #[instrument(skip_all)]
    pub async fn run<S, R, E>(&self, mut sink: S, mut stream: R)
    where
        S: Sink<String> + Unpin,
        S::Error: Display,
        R: Stream<Item = Result<String, E>> + Unpin,
        E: Display,
    {
        let mut subscription = self.broadcaster.subscribe();
        let id = subscription.id();
        info!("subscriber {id} connected");

        loop {
            tokio::select! {
                incoming = stream.next() => {
                    let frame = match incoming {
                        Some(Ok(frame)) => frame,
                        Some(Err(e)) => {
                            debug!("subscriber {id}: read failed: {e}");
                            break;
                        }
                        None => {
                            debug!("subscriber {id}: stream closed");
                            break;
                        }
                    };

                    let response = self.respond(&frame).await;
                    if let Err(e) = write(&mut sink, &response).await {
                        debug!("subscriber {id}: write failed: {e}");
                        break;
                    }
                }

                pushed = subscription.recv() => {
                    let Some(snapshot) = pushed else {
                        warn!("subscriber {id}: removed by broadcaster");
                        break;
                    };

                    if let Err(e) = write(&mut sink, &snapshot).await {
                        debug!("subscriber {id}: push failed: {e}");
                        break;
                    }
                }
            }
        }

        self.broadcaster.unsubscribe(subscription);
        info!("subscriber {id} disconnected");
    }
}

async fn write<S, T>(sink: &mut S, value: &T) -> Result<(), String>
where
    S: Sink<String> + Unpin,
    S::Error: Display,
    T: Serialize,
{
    let text = serde_json::to_string(value).map_err(|e| e.to_string())?;
    sink.send(text).await.map_err(|e| e.to_string())
}
