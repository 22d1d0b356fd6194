use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::IsoDuration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReference {
    pub sensor: u64,
}

/// A price or limit that applies for `duration` from `start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedValue {
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    pub value: String,
    pub duration: IsoDuration,
}

/// Site-level constraints and price references used by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FlexContext {
    pub consumption_price: SensorReference,
    pub production_price: SensorReference,
    pub site_power_capacity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_peak_consumption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_peak_consumption_price: Option<Vec<TimedValue>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inflexible_device_sensors: Vec<u64>,
}

/// Device-level state-of-charge and capacity constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FlexModel {
    pub soc_unit: String,
    pub soc_min: f64,
    pub soc_max: f64,
    pub soc_at_start: f64,
    pub power_capacity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_trip_efficiency: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefer_charging_sooner: Option<bool>,
}
