use std::time::Duration;

use flex_client::{domain::IsoDuration, ApiError};

/// Invalid flex-context/flex-model or run inputs. Raised before any
/// platform call is made.
#[derive(thiserror::Error, Debug)]
pub enum ConfigurationError {
    #[error("state of charge bounds are inconsistent: soc-min {min} > soc-max {max}")]
    SocBounds { min: f64, max: f64 },
    #[error("soc-at-start {start} is outside [{min}, {max}]")]
    SocStart { start: f64, min: f64, max: f64 },
    #[error("invalid {field} '{value}': expected a number followed by a unit")]
    Quantity { field: &'static str, value: String },
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(thiserror::Error, Debug)]
pub enum ProvisioningError {
    #[error("{count} assets are named '{name}'")]
    AmbiguousAsset { name: String, count: usize },
    #[error("asset {asset_id} has {count} sensors named '{name}'")]
    AmbiguousSensor {
        asset_id: u64,
        name: String,
        count: usize,
    },
    #[error("no asset named '{0}'")]
    MissingAsset(String),
    #[error("{action} failed: {source}")]
    Transport {
        action: String,
        #[source]
        source: ApiError,
    },
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

#[derive(thiserror::Error, Debug)]
pub enum IngestionError {
    #[error("measurement source error: {0}")]
    Source(String),
    #[error(
        "batch for sensor {sensor_id} has {values} values at {resolution} resolution, which does not cover {duration}"
    )]
    Window {
        sensor_id: u64,
        values: usize,
        resolution: IsoDuration,
        duration: IsoDuration,
    },
    #[error("batch unit '{batch_unit}' does not match unit '{sensor_unit}' of sensor {sensor_id}")]
    UnitMismatch {
        sensor_id: u64,
        batch_unit: String,
        sensor_unit: String,
    },
    #[error("sensor {0} is not part of this run")]
    UnknownSensor(u64),
    #[error("posting batch to sensor {sensor_id} failed: {source}")]
    Transport {
        sensor_id: u64,
        #[source]
        source: ApiError,
    },
    #[error("ingestion worker failed: {0}")]
    Worker(String),
}

#[derive(thiserror::Error, Debug)]
pub enum SchedulingError {
    #[error("window {duration} is not a whole number of {resolution} steps")]
    Window {
        duration: IsoDuration,
        resolution: IsoDuration,
    },
    #[error("submitting schedule job for sensor {sensor_id} failed: {source}")]
    Submit {
        sensor_id: u64,
        #[source]
        source: ApiError,
    },
    #[error("polling schedule job {job_id} failed: {source}")]
    Poll {
        job_id: String,
        #[source]
        source: ApiError,
    },
    #[error("schedule job {job_id} failed: {reason}")]
    Failed { job_id: String, reason: String },
    #[error("schedule job {job_id} returned an incomplete schedule: {reason}")]
    Incomplete { job_id: String, reason: String },
    #[error("schedule job {job_id} did not finish within {waited:?}; it may still complete remotely")]
    Timeout { job_id: String, waited: Duration },
}

/// Terminal failure of a workflow run, tagged with the phase that failed.
#[derive(thiserror::Error, Debug)]
pub enum WorkflowError {
    #[error("configuration phase failed: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("session phase failed: {0}")]
    Session(#[source] ApiError),
    #[error("provisioning phase failed: {0}")]
    Provisioning(#[from] ProvisioningError),
    #[error("ingestion phase failed: {0}")]
    Ingestion(#[from] IngestionError),
    #[error("scheduling phase failed: {0}")]
    Scheduling(#[from] SchedulingError),
}

impl WorkflowError {
    pub fn phase(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Session(_) => "session",
            Self::Provisioning(_) => "provisioning",
            Self::Ingestion(_) => "ingestion",
            Self::Scheduling(_) => "scheduling",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Scheduling(SchedulingError::Timeout { .. }))
    }
}
