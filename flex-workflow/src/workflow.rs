//! End-to-end run: provision the asset, load measurements, then schedule.
//!
//! Phases run strictly in order and the first failure aborts the rest. The
//! platform session is opened once by [`run`] and closed once, whatever the
//! outcome.

use std::collections::BTreeMap;

use flex_client::{
    domain::{IsoDuration, MeasurementBatch, Sensor},
    FlexClient, Platform, SessionConfig,
};
use time::OffsetDateTime;
use tracing::info;

use crate::{
    config::AppConfig,
    error::{ConfigurationError, ProvisioningError, WorkflowError},
    flex::FlexConfigBuilder,
    loader::{MeasurementLoader, DEFAULT_WORKERS},
    provision::{AssetSpec, ProvisionedAsset, Provisioner, SensorRole, SensorSpec},
    schedule::{JobPhase, PollSettings, Schedule, ScheduleJob, ScheduleOrchestrator},
};

/// Command-line values that take precedence over the configuration file.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub asset_name: Option<String>,
    pub start: Option<OffsetDateTime>,
    pub duration: Option<IsoDuration>,
    pub recreate: bool,
    pub skip_schedule: bool,
}

#[derive(Debug, Clone)]
pub struct PlannedMeasurement {
    pub role: SensorRole,
    pub values: Vec<f64>,
    pub unit: Option<String>,
}

/// A validated run. Building one makes no platform calls.
#[derive(Debug, Clone)]
pub struct WorkflowPlan {
    pub asset: AssetSpec,
    pub sensors: Vec<SensorSpec>,
    pub flex: FlexConfigBuilder,
    pub inflexible: Vec<SensorRole>,
    pub start: OffsetDateTime,
    pub duration: IsoDuration,
    pub measurements: Vec<PlannedMeasurement>,
    pub poll: PollSettings,
    pub workers: usize,
    pub recreate: bool,
    pub skip_schedule: bool,
}

impl WorkflowPlan {
    pub fn from_config(cfg: &AppConfig, overrides: RunOverrides) -> Result<Self, ConfigurationError> {
        let mut asset = AssetSpec::from(&cfg.asset);
        if let Some(name) = overrides.asset_name {
            asset.name = name;
        }
        if asset.name.trim().is_empty() {
            return Err(ConfigurationError::Invalid {
                field: "asset.name",
                reason: "asset name is empty".to_string(),
            });
        }

        let sensors = cfg.sensors.specs()?;
        let flex = FlexConfigBuilder::new(
            &cfg.flex_context.settings,
            &cfg.flex_model,
            cfg.platform.embedding_mode(),
        )?;

        let start = overrides.start.unwrap_or(cfg.window.start);
        let duration = overrides.duration.unwrap_or(cfg.window.duration);
        if duration.steps_of(cfg.sensors.resolution).unwrap_or(0) == 0 {
            return Err(ConfigurationError::Invalid {
                field: "window.duration",
                reason: format!(
                    "{duration} is not a positive whole number of {} steps",
                    cfg.sensors.resolution
                ),
            });
        }

        let measurements = cfg
            .measurements
            .iter()
            .map(|m| PlannedMeasurement {
                role: m.sensor,
                values: m.values.clone(),
                unit: m.unit.clone(),
            })
            .collect();

        Ok(Self {
            asset,
            sensors,
            flex,
            inflexible: cfg.flex_context.inflexible.clone(),
            start,
            duration,
            measurements,
            poll: PollSettings::from(&cfg.scheduler),
            workers: DEFAULT_WORKERS,
            recreate: overrides.recreate,
            skip_schedule: overrides.skip_schedule,
        })
    }

    fn sensor_name(&self, role: SensorRole) -> Option<&str> {
        self.sensors
            .iter()
            .find(|s| s.role == role)
            .map(|s| s.name.as_str())
    }
}

/// What a run did, for reporting.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub asset_id: u64,
    pub created_asset: bool,
    pub sensors: BTreeMap<SensorRole, u64>,
    pub created_sensors: Vec<SensorRole>,
    pub batches_loaded: usize,
    pub transitions: Vec<JobPhase>,
    pub schedule: Option<Schedule>,
}

/// Sensors are resolved by name, never by position.
fn sensor_for<'p>(
    plan: &WorkflowPlan,
    provisioned: &'p ProvisionedAsset,
    role: SensorRole,
) -> Result<&'p Sensor, ProvisioningError> {
    plan.sensor_name(role)
        .and_then(|name| provisioned.sensor_named(name))
        .ok_or_else(|| ProvisioningError::Configuration(ConfigurationError::Invalid {
            field: "sensors",
            reason: format!("no {} sensor was provisioned", role.label()),
        }))
}

fn batches(plan: &WorkflowPlan, provisioned: &ProvisionedAsset) -> Result<Vec<MeasurementBatch>, WorkflowError> {
    plan.measurements
        .iter()
        .map(|m| {
            let sensor = sensor_for(plan, provisioned, m.role)?;
            Ok(MeasurementBatch {
                sensor_id: sensor.id,
                start: plan.start,
                duration: plan.duration,
                values: m.values.clone(),
                unit: m.unit.clone().unwrap_or_else(|| sensor.unit.clone()),
            })
        })
        .collect()
}

/// Run every phase against an already-open platform session.
pub async fn execute<P>(platform: &P, plan: &WorkflowPlan) -> Result<RunReport, WorkflowError>
where
    P: Platform + ?Sized,
{
    let provisioner = Provisioner::new(platform, plan.asset.clone(), plan.sensors.clone());

    if plan.recreate {
        provisioner.delete_existing().await?;
    }

    let provisioned = provisioner.ensure(&plan.flex, &plan.inflexible).await?;

    let batches = batches(plan, &provisioned)?;
    let sensors: Vec<Sensor> = provisioned.sensors.values().cloned().collect();
    let batches_loaded = if batches.is_empty() {
        0
    } else {
        MeasurementLoader::new(platform)
            .with_workers(plan.workers)
            .load_all(batches, &sensors)
            .await?
    };
    info!(asset_id = provisioned.asset.id, batches = batches_loaded, "measurements loaded");

    let mut report = RunReport {
        asset_id: provisioned.asset.id,
        created_asset: provisioned.created_asset,
        sensors: provisioned.sensors.iter().map(|(role, s)| (*role, s.id)).collect(),
        created_sensors: provisioned.created_sensors.clone(),
        batches_loaded,
        transitions: Vec::new(),
        schedule: None,
    };

    if plan.skip_schedule {
        return Ok(report);
    }

    let job = ScheduleJob {
        sensor: sensor_for(plan, &provisioned, SensorRole::Power)?.clone(),
        start: plan.start,
        duration: plan.duration,
        flex_context: provisioned.flex.context.clone(),
        flex_model: provisioned.flex.model.clone(),
    };

    let mut orchestrator = ScheduleOrchestrator::new(platform, plan.poll);
    let schedule = orchestrator.run(&job).await?;
    report.transitions = orchestrator.transitions().to_vec();
    report.schedule = Some(schedule);

    Ok(report)
}

/// Open the session, execute the plan and close the session.
pub async fn run(session: &SessionConfig, plan: &WorkflowPlan) -> Result<RunReport, WorkflowError> {
    let client = FlexClient::open(session).await.map_err(WorkflowError::Session)?;
    let result = execute(&client, plan).await;
    client.close();

    if let Err(e) = &result {
        tracing::error!(phase = e.phase(), error = %e, "workflow failed");
    }
    result
}

