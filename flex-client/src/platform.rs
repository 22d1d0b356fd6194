use time::OffsetDateTime;

use crate::{
    domain::{
        Asset, AssetUpdate, FlexContext, FlexModel, IsoDuration, JobHandle, JobStatus,
        MeasurementBatch, NewAsset, NewSensor, Sensor,
    },
    ApiError,
};

/// Operations the energy-flexibility platform exposes to the workflow.
///
/// Implemented over HTTP by [`crate::FlexClient`]; tests substitute an
/// in-memory platform.
#[async_trait::async_trait]
pub trait Platform: Send + Sync {
    async fn list_assets(&self) -> Result<Vec<Asset>, ApiError>;

    async fn create_asset(&self, asset: &NewAsset) -> Result<Asset, ApiError>;

    async fn update_asset(&self, asset_id: u64, update: &AssetUpdate) -> Result<Asset, ApiError>;

    async fn delete_asset(&self, asset_id: u64) -> Result<(), ApiError>;

    async fn list_sensors(&self, asset_id: u64) -> Result<Vec<Sensor>, ApiError>;

    async fn create_sensor(&self, sensor: &NewSensor) -> Result<Sensor, ApiError>;

    async fn post_measurements(&self, batch: &MeasurementBatch) -> Result<(), ApiError>;

    async fn submit_schedule_job(
        &self,
        sensor_id: u64,
        start: OffsetDateTime,
        duration: IsoDuration,
        flex_context: &FlexContext,
        flex_model: &FlexModel,
    ) -> Result<JobHandle, ApiError>;

    async fn poll_job(&self, handle: &JobHandle) -> Result<JobStatus, ApiError>;
}
