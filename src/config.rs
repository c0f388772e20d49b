use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use thiserror::Error;
use tracing::trace;

use crate::Metric;
use crate::alerts::AlertRule;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },

    #[error("alert range is empty: min {min} is greater than max {max}")]
    EmptyAlertRange { min: f64, max: f64 },
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub bus: BusConfig,

    #[serde(default)]
    pub server: ServerConfig,

    /// Collector URL per metric. Metrics without an entry are not forwarded.
    #[serde(default)]
    pub sinks: BTreeMap<Metric, String>,

    /// Correlation token attached to every forwarded reading
    pub forward_contact: Option<String>,

    pub alert: Option<AlertConfig>,

    pub notifier: Option<NotifierConfig>,

    #[serde(default)]
    pub timeouts: Timeouts,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct BusConfig {
    /// Broker URL, e.g. `mqtt://broker:1883`
    pub url: String,
    pub topic: String,
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ServerConfig {
    #[serde(default = "crate::util::get_default_bind_addr")]
    pub bind_addr: SocketAddr,
    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: crate::util::get_default_bind_addr(),
            enable_cors: true,
        }
    }
}

/// Flammable gas alert: fires when the reading lies within `[min, max]`.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct AlertConfig {
    pub min: f64,
    pub max: f64,
    /// Contact handed to the notifier, e.g. a phone number
    pub destination: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifierConfig {
    Twilio(Twilio),
    Webhook(Webhook),
    Discord(Discord),
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Twilio {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    /// Prepended to the alert destination to form the `To` number
    #[serde(default = "default_country_prefix")]
    pub country_prefix: String,
    #[serde(default = "default_twilio_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Webhook {
    pub url: String,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Discord {
    pub url: String,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct Timeouts {
    #[serde(default = "default_forward_secs")]
    pub forward_secs: u64,
    #[serde(default = "default_notify_secs")]
    pub notify_secs: u64,
    #[serde(default = "default_push_ms")]
    pub push_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            forward_secs: default_forward_secs(),
            notify_secs: default_notify_secs(),
            push_ms: default_push_ms(),
        }
    }
}

impl Timeouts {
    pub fn forward(&self) -> Duration {
        Duration::from_secs(self.forward_secs)
    }

    pub fn notify(&self) -> Duration {
        Duration::from_secs(self.notify_secs)
    }

    pub fn push(&self) -> Duration {
        Duration::from_millis(self.push_ms)
    }
}

fn default_client_id_prefix() -> String {
    String::from("telemetry_gateway")
}

fn default_keep_alive() -> u64 {
    30
}

fn default_reconnect_delay() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_country_prefix() -> String {
    String::from("+52")
}

fn default_twilio_base_url() -> String {
    String::from("https://api.twilio.com")
}

fn default_forward_secs() -> u64 {
    10
}

fn default_notify_secs() -> u64 {
    10
}

fn default_push_ms() -> u64 {
    500
}

impl Config {
    /// Build the configuration from environment variables.
    pub fn from_env() -> Result<Config, ConfigError> {
        Self::from_lookup(crate::util::read_env)
    }

    /// Build the configuration from any key/value source.
    ///
    /// Blank values must be reported as `None` by `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bus = BusConfig {
            url: lookup("RABBITMQ_URL").ok_or(ConfigError::Missing("RABBITMQ_URL"))?,
            topic: lookup("RABBITMQ_QUEUE_IN").ok_or(ConfigError::Missing("RABBITMQ_QUEUE_IN"))?,
            client_id_prefix: lookup("MQTT_CLIENT_ID_PREFIX")
                .unwrap_or_else(default_client_id_prefix),
            username: lookup("MQTT_USERNAME"),
            password: lookup("MQTT_PASSWORD"),
            keep_alive_secs: parse(&lookup, "MQTT_KEEP_ALIVE_SECS")?
                .unwrap_or_else(default_keep_alive),
            reconnect_delay_secs: parse(&lookup, "MQTT_RECONNECT_DELAY_SECS")?
                .unwrap_or_else(default_reconnect_delay),
        };

        let port: u16 = parse(&lookup, "WEBSOCKET_PORT")?.unwrap_or_else(crate::util::get_default_port);
        let mut bind_addr = crate::util::get_default_bind_addr();
        bind_addr.set_port(port);

        let sinks = Metric::ALL
            .iter()
            .filter_map(|metric| lookup(metric.sink_env_key()).map(|url| (*metric, url)))
            .collect();

        let alert = match (
            parse::<f64, _>(&lookup, "GAS_ALERT_MIN")?,
            parse::<f64, _>(&lookup, "GAS_ALERT_MAX")?,
        ) {
            (Some(min), Some(max)) => Some(AlertConfig {
                min,
                max,
                destination: lookup("ALERT_PHONE_NUMBER")
                    .ok_or(ConfigError::Missing("ALERT_PHONE_NUMBER"))?,
            }),
            _ => None,
        };

        let notifier = match (
            lookup("TWILIO_ACCOUNT_SID"),
            lookup("TWILIO_AUTH_TOKEN"),
            lookup("TWILIO_FROM_NUMBER"),
        ) {
            (Some(account_sid), Some(auth_token), Some(from_number)) => {
                Some(NotifierConfig::Twilio(Twilio {
                    account_sid,
                    auth_token,
                    from_number,
                    country_prefix: lookup("TWILIO_COUNTRY_PREFIX")
                        .unwrap_or_else(default_country_prefix),
                    base_url: lookup("TWILIO_BASE_URL").unwrap_or_else(default_twilio_base_url),
                }))
            }
            _ => match (lookup("ALERT_WEBHOOK_URL"), lookup("ALERT_DISCORD_URL")) {
                (Some(url), _) => Some(NotifierConfig::Webhook(Webhook { url })),
                (None, Some(url)) => Some(NotifierConfig::Discord(Discord {
                    url,
                    user_id: lookup("ALERT_DISCORD_USER_ID"),
                })),
                (None, None) => None,
            },
        };

        let timeouts = Timeouts {
            forward_secs: parse(&lookup, "FORWARD_TIMEOUT_SECS")?
                .unwrap_or_else(default_forward_secs),
            notify_secs: parse(&lookup, "NOTIFY_TIMEOUT_SECS")?.unwrap_or_else(default_notify_secs),
            push_ms: parse(&lookup, "PUSH_TIMEOUT_MS")?.unwrap_or_else(default_push_ms),
        };

        let config = Config {
            bus,
            server: ServerConfig {
                bind_addr,
                enable_cors: true,
            },
            sinks,
            forward_contact: lookup("FORWARD_CONTACT"),
            alert,
            notifier,
            timeouts,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make a component meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(alert) = &self.alert {
            AlertRule::try_from(alert)?;
        }
        Ok(())
    }
}

fn parse<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| {
            value
                .parse()
                .map_err(|_| ConfigError::Invalid { key, value })
        })
        .transpose()
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
    let config: Config = serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))?;
    config.validate()?;
    trace!("loaded config: {config:?}");
    Ok(config)
}
