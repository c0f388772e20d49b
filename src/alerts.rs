//! Flammable gas threshold evaluation
//!
//! Evaluation is pure: it looks at one snapshot and decides whether the gas
//! reading lies inside the configured range. Delivering the resulting message
//! is left to a [`Notifier`](crate::notify::Notifier), invoked by the pipeline.

use crate::Snapshot;
use crate::config::{AlertConfig, ConfigError};

/// Closed range `[min, max]` on `gas_inflamable` plus who to tell about it.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRule {
    min: f64,
    max: f64,
    destination: String,
}

impl AlertRule {
    pub fn new(min: f64, max: f64, destination: impl ToString) -> Result<Self, ConfigError> {
        let config = AlertConfig {
            min,
            max,
            destination: destination.to_string(),
        };
        Self::try_from(&config)
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }
}

impl TryFrom<&AlertConfig> for AlertRule {
    type Error = ConfigError;

    fn try_from(config: &AlertConfig) -> Result<Self, Self::Error> {
        if !config.min.is_finite() {
            return Err(ConfigError::Invalid {
                key: "GAS_ALERT_MIN",
                value: config.min.to_string(),
            });
        }
        if !config.max.is_finite() {
            return Err(ConfigError::Invalid {
                key: "GAS_ALERT_MAX",
                value: config.max.to_string(),
            });
        }
        if config.min > config.max {
            return Err(ConfigError::EmptyAlertRange {
                min: config.min,
                max: config.max,
            });
        }
        Ok(Self {
            min: config.min,
            max: config.max,
            destination: config.destination.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct AlertEvaluator {
    rule: AlertRule,
}

impl AlertEvaluator {
    pub fn new(rule: AlertRule) -> Self {
        Self { rule }
    }

    pub fn rule(&self) -> &AlertRule {
        &self.rule
    }

    /// Returns the alert message if the gas reading is within `[min, max]`.
    ///
    /// Both bounds are inclusive. A NaN reading never triggers. The value is
    /// rendered with two decimals.
    pub fn evaluate(&self, snapshot: &Snapshot) -> Option<String> {
        let value = snapshot.gas_inflamable;
        if value < self.rule.min || value > self.rule.max || value.is_nan() {
            return None;
        }

        Some(format_gas_alert(snapshot))
    }
}

pub fn format_gas_alert(snapshot: &Snapshot) -> String {
    format!(
        "ALERT: dangerous flammable gas level detected: {:.2} PPM on device {}",
        snapshot.gas_inflamable, snapshot.id
    )
}
