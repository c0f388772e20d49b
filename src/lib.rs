pub mod alerts;
pub mod broadcast;
#[cfg(feature = "bus")]
pub mod bus;
pub mod config;
pub mod forwarder;
pub mod notify;
pub mod pipeline;
#[cfg(feature = "server")]
pub mod server;
pub mod storage;
pub mod subscription;
pub mod util;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a reporting device.
pub type DeviceId = i64;

/// Latest known reading of a single device.
///
/// The timestamp is always assigned by the gateway when the reading is
/// ingested. Whatever the device sent along is discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: DeviceId,
    pub temperatura_dht: f64,
    pub humedad: f64,
    pub temperatura_bmp: f64,
    pub presion: f64,
    pub calidad_aire: f64,
    pub gas_inflamable: f64,
    pub timestamp: DateTime<Utc>,
}

impl Snapshot {
    pub fn value(&self, metric: Metric) -> f64 {
        match metric {
            Metric::TemperaturaDht => self.temperatura_dht,
            Metric::Humedad => self.humedad,
            Metric::TemperaturaBmp => self.temperatura_bmp,
            Metric::Presion => self.presion,
            Metric::CalidadAire => self.calidad_aire,
            Metric::GasInflamable => self.gas_inflamable,
        }
    }

    pub fn reading(&self, metric: Metric) -> MetricReading {
        MetricReading {
            device_id: self.id,
            metric,
            value: self.value(metric),
            timestamp: self.timestamp,
        }
    }
}

/// The six metrics every device reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    TemperaturaDht,
    Humedad,
    TemperaturaBmp,
    Presion,
    CalidadAire,
    GasInflamable,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::TemperaturaDht,
        Metric::Humedad,
        Metric::TemperaturaBmp,
        Metric::Presion,
        Metric::CalidadAire,
        Metric::GasInflamable,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Metric::TemperaturaDht => "temperatura_dht",
            Metric::Humedad => "humedad",
            Metric::TemperaturaBmp => "temperatura_bmp",
            Metric::Presion => "presion",
            Metric::CalidadAire => "calidad_aire",
            Metric::GasInflamable => "gas_inflamable",
        }
    }

    /// Environment key holding the collector URL for this metric.
    pub fn sink_env_key(self) -> &'static str {
        match self {
            Metric::TemperaturaDht => "API_URL_TEMPERATURA_DHT",
            Metric::Humedad => "API_URL_HUMEDAD",
            Metric::TemperaturaBmp => "API_URL_TEMPERATURA_BMP",
            Metric::Presion => "API_URL_PRESION",
            Metric::CalidadAire => "API_URL_CALIDAD_AIRE",
            Metric::GasInflamable => "API_URL_GAS_INFLAMABLE",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single metric value split off a [`Snapshot`] for forwarding.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricReading {
    pub device_id: DeviceId,
    pub metric: Metric,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}
