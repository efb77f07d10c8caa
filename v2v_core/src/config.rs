//! Sensor configuration and registration-layer definitions.

use crate::error::V2vError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

/// Default for both tunables, in world distance units.
pub const DEFAULT_RANGE: f64 = 1000.0;

/// Attribute id of the scan trace range.
pub const TRACE_RANGE_ATTR: &str = "trace_range";

/// Attribute id of the broadcast radius.
pub const BROADCAST_RADIUS_ATTR: &str = "broadcast_radius";

/// Configuration shared by a vehicle's detection store and broadcast agent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Maximum distance of the rotating scan ray (default: 1000.0)
    pub trace_range: f64,

    /// Radius of the proximity sphere used to find peers (default: 1000.0)
    pub broadcast_radius: f64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            trace_range: DEFAULT_RANGE,
            broadcast_radius: DEFAULT_RANGE,
        }
    }
}

impl SensorConfig {
    /// Entries older than this many seconds are evicted.
    pub const RETENTION_SECS: f64 = 180.0;

    /// Scan rotation speed in degrees per second.
    pub const ANGULAR_SPEED_DEG: f64 = 360.0;

    /// Period of the broadcast cycle.
    pub const BROADCAST_PERIOD: Duration = Duration::from_secs(1);

    /// Creates a config with explicit ranges.
    pub fn new(trace_range: f64, broadcast_radius: f64) -> Result<Self, V2vError> {
        let config = Self {
            trace_range,
            broadcast_radius,
        };
        config.validate()?;
        Ok(config)
    }

    /// Sets the scan range.
    pub fn with_trace_range(mut self, trace_range: f64) -> Self {
        self.trace_range = trace_range;
        self
    }

    /// Sets the broadcast radius.
    pub fn with_broadcast_radius(mut self, broadcast_radius: f64) -> Self {
        self.broadcast_radius = broadcast_radius;
        self
    }

    /// Rejects negative and non-finite values.
    pub fn validate(&self) -> Result<(), V2vError> {
        check_non_negative(TRACE_RANGE_ATTR, self.trace_range)?;
        check_non_negative(BROADCAST_RADIUS_ATTR, self.broadcast_radius)?;
        Ok(())
    }

    /// Builds a config from registration-layer attribute strings.
    ///
    /// Missing keys fall back to [`DEFAULT_RANGE`]; unknown keys are ignored.
    pub fn from_attributes(attributes: &HashMap<String, String>) -> Result<Self, V2vError> {
        let config = Self {
            trace_range: parse_attribute(attributes, TRACE_RANGE_ATTR)?,
            broadcast_radius: parse_attribute(attributes, BROADCAST_RADIUS_ATTR)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Parses a JSON document; absent fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, V2vError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

fn check_non_negative(name: &'static str, value: f64) -> Result<(), V2vError> {
    if !value.is_finite() || value < 0.0 {
        warn!(attribute = name, value, "rejecting sensor parameter");
        return Err(V2vError::InvalidParameter { name, value });
    }
    Ok(())
}

fn parse_attribute(attributes: &HashMap<String, String>, name: &'static str) -> Result<f64, V2vError> {
    match attributes.get(name) {
        None => Ok(DEFAULT_RANGE),
        Some(raw) => raw.trim().parse::<f64>().map_err(|_| V2vError::UnparsableAttribute {
            name,
            raw: raw.clone(),
        }),
    }
}

/// One tunable attribute as advertised to the registration layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributeVariation {
    pub id: &'static str,
    pub recommended_values: Vec<String>,
    pub restrict_to_recommended: bool,
}

/// How a sensor type presents itself to the registration layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorDefinition {
    /// Sensor category, always "other" for these two
    pub category: &'static str,

    /// Sensor type name
    pub type_name: &'static str,

    pub variations: Vec<AttributeVariation>,
}

impl SensorDefinition {
    /// The rotating walker scan.
    pub fn walker_detection() -> Self {
        Self::single_float("walker_detection", TRACE_RANGE_ATTR)
    }

    /// The proximity gossip agent.
    pub fn v2v_broadcast() -> Self {
        Self::single_float("v2v_broadcast", BROADCAST_RADIUS_ATTR)
    }

    /// Returns the full blueprint id, e.g. `other.walker_detection`.
    pub fn id(&self) -> String {
        format!("{}.{}", self.category, self.type_name)
    }

    fn single_float(type_name: &'static str, attribute: &'static str) -> Self {
        Self {
            category: "other",
            type_name,
            variations: vec![AttributeVariation {
                id: attribute,
                recommended_values: vec![format!("{:.1}", DEFAULT_RANGE)],
                restrict_to_recommended: false,
            }],
        }
    }
}
