#![allow(dead_code)]

use std::{collections::VecDeque, sync::Mutex};

use flex_client::{
    domain::{
        Asset, AssetUpdate, Attributes, FlexContext, FlexModel, IsoDuration, JobHandle, JobStatus,
        MeasurementBatch, NewAsset, NewSensor, RemoteSchedule, SchedulePoint, Sensor,
    },
    ApiError, Platform,
};
use flex_workflow::{
    config::AppConfig,
    workflow::{RunOverrides, WorkflowPlan},
};
use time::OffsetDateTime;

pub const CONFIG: &str = r#"
    [platform]
    host = "localhost:5000"
    ssl = false
    token = "test-token"

    [asset]
    name = "Thiink Battery"
    latitude = 40.0
    longitude = 50.0
    generic_asset_type_id = 5
    account_id = 1

    [window]
    start = "2025-07-07T04:00:00+02:00"
    duration = "PT4H"

    [flex_context]
    site_power_capacity = "13.8 kW"
    site_peak_consumption = "5.56 kW"

    [[flex_context.site_peak_consumption_price]]
    start = "2025-07-07T04:00:00+02:00"
    value = "1.831127819548872 SEK/kWh"
    duration = "PT4H"

    [flex_model]
    soc_unit = "kWh"
    soc_min = 1.64
    soc_max = 16.4
    soc_at_start = 16.4
    power_capacity = "10.0 kW"

    [scheduler]
    poll_interval_ms = 1000
    max_wait_ms = 30000

    [[measurements]]
    sensor = "grid"
    values = [-1.0, -2.0, -4.0, 3.0]

    [[measurements]]
    sensor = "power"
    values = [4.5, 7.0, 8.3, 1.0]

    [[measurements]]
    sensor = "buy_price"
    values = [2.0, 2.0, 2.0, 2.0]

    [[measurements]]
    sensor = "sell_price"
    values = [1.0, 1.0, 1.0, 1.0]
"#;

pub fn config() -> AppConfig {
    AppConfig::from_toml_str(CONFIG).unwrap()
}

pub fn plan() -> WorkflowPlan {
    WorkflowPlan::from_config(&config(), RunOverrides::default()).unwrap()
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    ListAssets,
    CreateAsset(String),
    UpdateAsset(u64),
    DeleteAsset(u64),
    ListSensors(u64),
    CreateSensor(String),
    PostMeasurements(u64),
    Submit(u64),
    Poll(String),
}

/// What the fake returns from one poll.
#[derive(Debug, Clone)]
pub enum PollStep {
    Queued,
    Started,
    /// Finished with one point per step of the submitted window.
    Finish,
    /// Finished with only the first `n` points.
    FinishPartial(usize),
    /// Finished with points one hour late.
    FinishShifted,
    Fail(String),
}

struct Submitted {
    sensor_id: u64,
    start: OffsetDateTime,
    duration: IsoDuration,
    context: FlexContext,
    model: FlexModel,
}

#[derive(Default)]
struct State {
    next_id: u64,
    assets: Vec<Asset>,
    sensors: Vec<Sensor>,
    calls: Vec<Call>,
    posted: Vec<MeasurementBatch>,
    submitted: Vec<Submitted>,
    script: VecDeque<PollStep>,
}

/// In-memory platform that records every call it receives.
pub struct FakePlatform {
    state: Mutex<State>,
    fail_submit: bool,
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl FakePlatform {
    pub fn new() -> Self {
        let state = State {
            next_id: 1,
            script: VecDeque::from([PollStep::Queued, PollStep::Started, PollStep::Finish]),
            ..Default::default()
        };
        Self {
            state: Mutex::new(state),
            fail_submit: false,
        }
    }

    pub fn failing_submit() -> Self {
        Self {
            fail_submit: true,
            ..Self::new()
        }
    }

    pub fn with_script(self, steps: impl IntoIterator<Item = PollStep>) -> Self {
        self.state.lock().unwrap().script = steps.into_iter().collect();
        self
    }

    fn next_id(state: &mut State) -> u64 {
        let id = state.next_id;
        state.next_id += 1;
        id
    }

    pub fn seed_asset(&self, name: &str) -> u64 {
        let mut state = self.state.lock().unwrap();
        let id = Self::next_id(&mut state);
        state.assets.push(Asset {
            id,
            name: name.to_string(),
            latitude: Some(40.0),
            longitude: Some(50.0),
            generic_asset_type_id: Some(5),
            account_id: Some(1),
            attributes: Attributes::new(),
            flex_context: None,
            flex_model: None,
            sensors_to_show: None,
        });
        id
    }

    pub fn seed_sensor(&self, asset_id: u64, name: &str, unit: &str) -> u64 {
        let mut state = self.state.lock().unwrap();
        let id = Self::next_id(&mut state);
        state.sensors.push(Sensor {
            id,
            name: name.to_string(),
            unit: unit.to_string(),
            event_resolution: IsoDuration::from_hours(1),
            generic_asset_id: asset_id,
        });
        id
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn assets(&self) -> Vec<Asset> {
        self.state.lock().unwrap().assets.clone()
    }

    pub fn sensors(&self) -> Vec<Sensor> {
        self.state.lock().unwrap().sensors.clone()
    }

    pub fn posted(&self) -> Vec<MeasurementBatch> {
        self.state.lock().unwrap().posted.clone()
    }

    pub fn submitted_documents(&self) -> Vec<(FlexContext, FlexModel)> {
        self.state
            .lock()
            .unwrap()
            .submitted
            .iter()
            .map(|s| (s.context.clone(), s.model.clone()))
            .collect()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| matches(c)).count()
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

fn not_found(what: &str) -> ApiError {
    ApiError::Api {
        status: 404,
        message: format!("{what} not found"),
    }
}

fn points(start: OffsetDateTime, step: IsoDuration, count: usize, offset: usize) -> Vec<SchedulePoint> {
    (0..count)
        .map(|i| SchedulePoint {
            start: start + step.as_duration() * (i + offset) as u32,
            value: i as f64,
        })
        .collect()
}

#[async_trait::async_trait]
impl Platform for FakePlatform {
    async fn list_assets(&self) -> Result<Vec<Asset>, ApiError> {
        self.record(Call::ListAssets);
        Ok(self.assets())
    }

    async fn create_asset(&self, asset: &NewAsset) -> Result<Asset, ApiError> {
        self.record(Call::CreateAsset(asset.name.clone()));
        let mut state = self.state.lock().unwrap();
        let id = Self::next_id(&mut state);
        let created = Asset {
            id,
            name: asset.name.clone(),
            latitude: Some(asset.latitude),
            longitude: Some(asset.longitude),
            generic_asset_type_id: Some(asset.generic_asset_type_id),
            account_id: Some(asset.account_id),
            attributes: Attributes::new(),
            flex_context: None,
            flex_model: None,
            sensors_to_show: None,
        };
        state.assets.push(created.clone());
        Ok(created)
    }

    async fn update_asset(&self, asset_id: u64, update: &AssetUpdate) -> Result<Asset, ApiError> {
        self.record(Call::UpdateAsset(asset_id));
        let mut state = self.state.lock().unwrap();
        let asset = state
            .assets
            .iter_mut()
            .find(|a| a.id == asset_id)
            .ok_or_else(|| not_found("asset"))?;

        if let Some(attributes) = &update.attributes {
            // Round-trip through the encoded form the platform stores.
            let encoded = serde_json::to_value(attributes).unwrap();
            asset.attributes = Attributes::decode(encoded).unwrap();
        }
        if let Some(context) = &update.flex_context {
            asset.flex_context = Some(context.clone());
        }
        if let Some(model) = &update.flex_model {
            asset.flex_model = Some(model.clone());
        }
        if let Some(groups) = &update.sensors_to_show {
            asset.sensors_to_show = Some(serde_json::to_value(groups).unwrap());
        }
        Ok(asset.clone())
    }

    async fn delete_asset(&self, asset_id: u64) -> Result<(), ApiError> {
        self.record(Call::DeleteAsset(asset_id));
        let mut state = self.state.lock().unwrap();
        let before = state.assets.len();
        state.assets.retain(|a| a.id != asset_id);
        if state.assets.len() == before {
            return Err(not_found("asset"));
        }
        state.sensors.retain(|s| s.generic_asset_id != asset_id);
        Ok(())
    }

    async fn list_sensors(&self, asset_id: u64) -> Result<Vec<Sensor>, ApiError> {
        self.record(Call::ListSensors(asset_id));
        Ok(self
            .sensors()
            .into_iter()
            .filter(|s| s.generic_asset_id == asset_id)
            .collect())
    }

    async fn create_sensor(&self, sensor: &NewSensor) -> Result<Sensor, ApiError> {
        self.record(Call::CreateSensor(sensor.name.clone()));
        let mut state = self.state.lock().unwrap();
        let id = Self::next_id(&mut state);
        let created = Sensor {
            id,
            name: sensor.name.clone(),
            unit: sensor.unit.clone(),
            event_resolution: sensor.event_resolution,
            generic_asset_id: sensor.generic_asset_id,
        };
        state.sensors.push(created.clone());
        Ok(created)
    }

    async fn post_measurements(&self, batch: &MeasurementBatch) -> Result<(), ApiError> {
        self.record(Call::PostMeasurements(batch.sensor_id));
        let mut state = self.state.lock().unwrap();
        if !state.sensors.iter().any(|s| s.id == batch.sensor_id) {
            return Err(not_found("sensor"));
        }
        state.posted.push(batch.clone());
        Ok(())
    }

    async fn submit_schedule_job(
        &self,
        sensor_id: u64,
        start: OffsetDateTime,
        duration: IsoDuration,
        flex_context: &FlexContext,
        flex_model: &FlexModel,
    ) -> Result<JobHandle, ApiError> {
        self.record(Call::Submit(sensor_id));
        if self.fail_submit {
            return Err(ApiError::Api {
                status: 503,
                message: "scheduler unavailable".to_string(),
            });
        }

        let mut state = self.state.lock().unwrap();
        state.submitted.push(Submitted {
            sensor_id,
            start,
            duration,
            context: flex_context.clone(),
            model: flex_model.clone(),
        });
        Ok(JobHandle {
            sensor_id,
            job_id: format!("job-{}", state.submitted.len()),
            duration,
        })
    }

    async fn poll_job(&self, handle: &JobHandle) -> Result<JobStatus, ApiError> {
        self.record(Call::Poll(handle.job_id.clone()));
        let mut state = self.state.lock().unwrap();

        let submitted = state
            .submitted
            .last()
            .ok_or_else(|| not_found("job"))?;
        let resolution = state
            .sensors
            .iter()
            .find(|s| s.id == submitted.sensor_id)
            .map(|s| s.event_resolution)
            .unwrap_or(IsoDuration::from_hours(1));
        let start = submitted.start;
        let steps = submitted.duration.steps_of(resolution).unwrap_or(0);

        // The last step repeats once the script runs out.
        let step = if state.script.len() > 1 {
            state.script.pop_front()
        } else {
            state.script.front().cloned()
        }
        .unwrap_or(PollStep::Queued);

        let finished = |points: Vec<SchedulePoint>| {
            JobStatus::Finished(RemoteSchedule {
                unit: "MW".to_string(),
                points,
            })
        };

        Ok(match step {
            PollStep::Queued => JobStatus::Queued,
            PollStep::Started => JobStatus::Started,
            PollStep::Finish => finished(points(start, resolution, steps, 0)),
            PollStep::FinishPartial(n) => finished(points(start, resolution, n, 0)),
            PollStep::FinishShifted => finished(points(start, resolution, steps, 1)),
            PollStep::Fail(reason) => JobStatus::Failed(reason),
        })
    }
}
