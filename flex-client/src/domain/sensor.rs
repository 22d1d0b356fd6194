use serde::{Deserialize, Serialize};

use super::IsoDuration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub id: u64,
    pub name: String,
    pub unit: String,
    pub event_resolution: IsoDuration,
    #[serde(alias = "asset_id")]
    pub generic_asset_id: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewSensor {
    pub name: String,
    pub event_resolution: IsoDuration,
    pub unit: String,
    pub generic_asset_id: u64,
}
