mod common;

use std::time::Duration;

use common::{Call, FakePlatform, PollStep};
use flex_client::{domain::IsoDuration, Platform};
use flex_workflow::{
    error::{ConfigurationError, IngestionError, ProvisioningError, SchedulingError},
    flex::{EmbeddingMode, FlexConfig, PriceSensors, FLEX_CONTEXT_KEY, FLEX_MODEL_KEY},
    provision::SensorRole,
    schedule::{JobPhase, PollSettings, ScheduleJob, ScheduleOrchestrator},
    workflow::{execute, RunOverrides, WorkflowPlan},
    WorkflowError,
};
use time::macros::datetime;

#[tokio::test(start_paused = true)]
async fn fresh_platform_runs_the_whole_workflow() {
    let platform = FakePlatform::new();
    let report = execute(&platform, &common::plan()).await.unwrap();

    assert!(report.created_asset);
    assert_eq!(platform.assets().len(), 1);
    assert_eq!(platform.assets()[0].name, "Thiink Battery");
    assert_eq!(platform.sensors().len(), 4);
    assert_eq!(report.created_sensors.len(), 4);

    let posted = platform.posted();
    assert_eq!(posted.len(), 4);
    assert!(posted.iter().all(|b| b.values.len() == 4 && b.duration == IsoDuration::from_hours(4)));
    assert_eq!(report.batches_loaded, 4);

    assert_eq!(
        report.transitions,
        vec![JobPhase::Submitting, JobPhase::Queued, JobPhase::Computing, JobPhase::Ready]
    );

    let schedule = report.schedule.unwrap();
    assert_eq!(schedule.sensor_id, report.sensors[&SensorRole::Power]);
    assert_eq!(schedule.points.len(), 4);
    let start = datetime!(2025-07-07 04:00:00 +02:00);
    for (i, point) in schedule.points.iter().enumerate() {
        assert_eq!(point.start, start + time::Duration::hours(i as i64));
    }
}

#[tokio::test(start_paused = true)]
async fn repeated_runs_reuse_asset_and_sensors() {
    let platform = FakePlatform::new();
    let plan = WorkflowPlan::from_config(
        &common::config(),
        RunOverrides {
            skip_schedule: true,
            ..Default::default()
        },
    )
    .unwrap();

    let first = execute(&platform, &plan).await.unwrap();
    for _ in 0..3 {
        let again = execute(&platform, &plan).await.unwrap();
        assert_eq!(again.asset_id, first.asset_id);
        assert_eq!(again.sensors, first.sensors);
        assert!(!again.created_asset);
        assert!(again.created_sensors.is_empty());
    }

    assert_eq!(platform.assets().len(), 1);
    assert_eq!(platform.sensors().len(), 4);
    assert_eq!(platform.count(|c| matches!(c, Call::CreateAsset(_))), 1);
    assert_eq!(platform.count(|c| matches!(c, Call::CreateSensor(_))), 4);
    assert_eq!(platform.count(|c| matches!(c, Call::Submit(_))), 0);
}

#[tokio::test(start_paused = true)]
async fn provisioning_fills_only_missing_sensors() {
    let platform = FakePlatform::new();
    let asset_id = platform.seed_asset("Thiink Battery");
    let grid = platform.seed_sensor(asset_id, "Grid Power", "kW");
    let buy = platform.seed_sensor(asset_id, "Buy Price", "SEK/kWh");

    let report = execute(&platform, &common::plan()).await.unwrap();

    assert_eq!(report.asset_id, asset_id);
    assert_eq!(report.sensors[&SensorRole::Grid], grid);
    assert_eq!(report.sensors[&SensorRole::BuyPrice], buy);
    assert_eq!(report.created_sensors, vec![SensorRole::Power, SensorRole::SellPrice]);
    assert_eq!(platform.sensors().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn sensors_are_listed_before_any_is_created() {
    let platform = FakePlatform::new();
    execute(&platform, &common::plan()).await.unwrap();

    let calls = platform.calls();
    let listed = calls
        .iter()
        .position(|c| matches!(c, Call::ListSensors(_)))
        .unwrap();
    let first_create = calls
        .iter()
        .position(|c| matches!(c, Call::CreateSensor(_)))
        .unwrap();
    assert!(listed < first_create);

    // All posts finish before the job is submitted.
    let last_post = calls
        .iter()
        .rposition(|c| matches!(c, Call::PostMeasurements(_)))
        .unwrap();
    let submit = calls.iter().position(|c| matches!(c, Call::Submit(_))).unwrap();
    assert!(last_post < submit);
}

#[test]
fn soc_start_outside_bounds_is_rejected_before_any_call() {
    let mut cfg = common::config();
    cfg.flex_model.soc_at_start = 20.0;

    let err = WorkflowPlan::from_config(&cfg, RunOverrides::default()).unwrap_err();
    assert!(matches!(err, ConfigurationError::SocStart { .. }));
}

#[test]
fn window_must_fit_the_sensor_resolution() {
    let overrides = RunOverrides {
        duration: Some(IsoDuration::from_minutes(90)),
        ..Default::default()
    };
    assert!(WorkflowPlan::from_config(&common::config(), overrides).is_err());
}

#[tokio::test(start_paused = true)]
async fn short_batch_is_rejected_and_nothing_is_posted() {
    let mut cfg = common::config();
    cfg.measurements[1].values.pop();
    let plan = WorkflowPlan::from_config(&cfg, RunOverrides::default()).unwrap();

    let platform = FakePlatform::new();
    let err = execute(&platform, &plan).await.unwrap_err();

    assert_eq!(err.phase(), "ingestion");
    assert!(matches!(err, WorkflowError::Ingestion(IngestionError::Window { values: 3, .. })));
    assert!(platform.posted().is_empty());
    assert_eq!(platform.count(|c| matches!(c, Call::Submit(_))), 0);
}

#[tokio::test(start_paused = true)]
async fn unit_mismatch_is_rejected() {
    let mut cfg = common::config();
    cfg.measurements[0].unit = Some("MW".to_string());
    let plan = WorkflowPlan::from_config(&cfg, RunOverrides::default()).unwrap();

    let platform = FakePlatform::new();
    let err = execute(&platform, &plan).await.unwrap_err();
    assert!(matches!(err, WorkflowError::Ingestion(IngestionError::UnitMismatch { .. })));
}

#[tokio::test(start_paused = true)]
async fn partial_schedule_is_reported_as_failed() {
    let platform = FakePlatform::new().with_script([PollStep::Started, PollStep::FinishPartial(2)]);
    let err = execute(&platform, &common::plan()).await.unwrap_err();

    assert_eq!(err.phase(), "scheduling");
    assert!(matches!(err, WorkflowError::Scheduling(SchedulingError::Incomplete { .. })));
}

#[tokio::test(start_paused = true)]
async fn misaligned_schedule_is_reported_as_failed() {
    let platform = FakePlatform::new().with_script([PollStep::FinishShifted]);
    let err = execute(&platform, &common::plan()).await.unwrap_err();
    assert!(matches!(err, WorkflowError::Scheduling(SchedulingError::Incomplete { .. })));
}

#[tokio::test(start_paused = true)]
async fn remote_failure_is_terminal() {
    let platform = FakePlatform::new().with_script([
        PollStep::Queued,
        PollStep::Fail("Scheduling job failed: infeasible".to_string()),
    ]);
    let err = execute(&platform, &common::plan()).await.unwrap_err();

    assert!(matches!(err, WorkflowError::Scheduling(SchedulingError::Failed { .. })));
    assert!(!err.is_timeout());
}

#[tokio::test(start_paused = true)]
async fn waiting_too_long_is_a_timeout() {
    let platform = FakePlatform::new().with_script([PollStep::Queued]);
    let err = execute(&platform, &common::plan()).await.unwrap_err();

    assert!(err.is_timeout());
    match err {
        WorkflowError::Scheduling(SchedulingError::Timeout { waited, .. }) => {
            assert_eq!(waited, Duration::from_secs(30));
        }
        other => panic!("unexpected error: {other}"),
    }
    // One poll per second within the 30s bound.
    assert!(platform.count(|c| matches!(c, Call::Poll(_))) >= 30);
}

#[tokio::test(start_paused = true)]
async fn rejected_submission_stops_the_run() {
    let platform = FakePlatform::failing_submit();
    let err = execute(&platform, &common::plan()).await.unwrap_err();

    assert!(matches!(err, WorkflowError::Scheduling(SchedulingError::Submit { .. })));
    assert_eq!(platform.count(|c| matches!(c, Call::Poll(_))), 0);
}

#[tokio::test(start_paused = true)]
async fn duplicate_asset_names_are_ambiguous() {
    let platform = FakePlatform::new();
    platform.seed_asset("Thiink Battery");
    platform.seed_asset("Thiink Battery");

    let err = execute(&platform, &common::plan()).await.unwrap_err();

    assert_eq!(err.phase(), "provisioning");
    assert!(matches!(
        err,
        WorkflowError::Provisioning(ProvisioningError::AmbiguousAsset { count: 2, .. })
    ));
    assert_eq!(platform.count(|c| matches!(c, Call::CreateSensor(_))), 0);
}

#[tokio::test(start_paused = true)]
async fn recreate_deletes_the_existing_asset_first() {
    let platform = FakePlatform::new();
    let old = platform.seed_asset("Thiink Battery");
    platform.seed_sensor(old, "Grid Power", "kW");

    let plan = WorkflowPlan::from_config(
        &common::config(),
        RunOverrides {
            recreate: true,
            skip_schedule: true,
            ..Default::default()
        },
    )
    .unwrap();
    let report = execute(&platform, &plan).await.unwrap();

    assert_ne!(report.asset_id, old);
    assert!(report.created_asset);
    assert_eq!(platform.count(|c| *c == Call::DeleteAsset(old)), 1);
    assert_eq!(platform.assets().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn flex_documents_round_trip_through_either_embedding() {
    for mode in [EmbeddingMode::TopLevel, EmbeddingMode::NestedAttributes] {
        let mut cfg = common::config();
        cfg.platform.embedding = Some(mode);
        let plan = WorkflowPlan::from_config(&cfg, RunOverrides::default()).unwrap();

        let platform = FakePlatform::new();
        execute(&platform, &plan).await.unwrap();

        let asset = platform.assets().remove(0);
        let stored = FlexConfig::read_from(&asset, mode).unwrap().unwrap();
        let (context, model) = platform.submitted_documents().remove(0);
        assert_eq!(stored.context, context);
        assert_eq!(stored.model, model);

        let nested = asset.attributes.contains_key(FLEX_CONTEXT_KEY)
            && asset.attributes.contains_key(FLEX_MODEL_KEY);
        assert_eq!(nested, mode == EmbeddingMode::NestedAttributes);
        assert_eq!(asset.flex_context.is_some(), mode == EmbeddingMode::TopLevel);
        assert!(asset.sensors_to_show.is_some());
    }
}

#[tokio::test(start_paused = true)]
async fn duplicate_sensor_names_are_ambiguous() {
    let platform = FakePlatform::new();
    let asset_id = platform.seed_asset("Thiink Battery");
    platform.seed_sensor(asset_id, "Battery Power", "kW");
    platform.seed_sensor(asset_id, "Battery Power", "kW");

    let err = execute(&platform, &common::plan()).await.unwrap_err();

    assert_eq!(err.phase(), "provisioning");
    assert!(matches!(
        err,
        WorkflowError::Provisioning(ProvisioningError::AmbiguousSensor { count: 2, .. })
    ));
    assert_eq!(platform.count(|c| matches!(c, Call::CreateSensor(_))), 0);
    assert!(platform.posted().is_empty());
}

#[tokio::test(start_paused = true)]
async fn schedule_unit_is_compared_with_the_sensor_unit() {
    let platform = FakePlatform::new();
    let report = execute(&platform, &common::plan()).await.unwrap();

    let schedule = report.schedule.unwrap();
    assert_eq!(schedule.unit, "MW");
    assert_eq!(schedule.sensor_unit, "kW");
    assert!(schedule.unit_differs());
}

/// A power sensor on a seeded asset plus a job for the configured window.
async fn power_job(platform: &FakePlatform) -> ScheduleJob {
    let asset_id = platform.seed_asset("Thiink Battery");
    platform.seed_sensor(asset_id, "Battery Power", "kW");
    let sensor = platform.list_sensors(asset_id).await.unwrap().remove(0);

    let plan = common::plan();
    let flex = plan.flex.build(&PriceSensors {
        consumption: 10,
        production: 11,
        inflexible: Vec::new(),
    });

    ScheduleJob {
        sensor,
        start: plan.start,
        duration: plan.duration,
        flex_context: flex.context,
        flex_model: flex.model,
    }
}

#[tokio::test(start_paused = true)]
async fn rejected_submission_stays_in_submitting() {
    let platform = FakePlatform::failing_submit();
    let job = power_job(&platform).await;

    let mut orchestrator = ScheduleOrchestrator::new(&platform, PollSettings::default());
    let err = orchestrator.run(&job).await.unwrap_err();

    assert!(matches!(err, SchedulingError::Submit { .. }));
    assert_eq!(orchestrator.phase(), Some(JobPhase::Submitting));
    assert_eq!(orchestrator.transitions(), &[JobPhase::Submitting]);
}

#[tokio::test(start_paused = true)]
async fn zero_wait_still_polls_once() {
    let settings = PollSettings {
        interval: Duration::from_secs(1),
        max_wait: Duration::ZERO,
    };

    let platform = FakePlatform::new().with_script([PollStep::Finish]);
    let job = power_job(&platform).await;
    let mut orchestrator = ScheduleOrchestrator::new(&platform, settings);
    let schedule = orchestrator.run(&job).await.unwrap();
    assert_eq!(schedule.points.len(), 4);
    assert_eq!(orchestrator.phase(), Some(JobPhase::Ready));

    let platform = FakePlatform::new().with_script([PollStep::Queued]);
    let job = power_job(&platform).await;
    let mut orchestrator = ScheduleOrchestrator::new(&platform, settings);
    let err = orchestrator.run(&job).await.unwrap_err();
    assert!(matches!(err, SchedulingError::Timeout { .. }));
    assert_eq!(platform.count(|c| matches!(c, Call::Poll(_))), 1);
    assert_eq!(orchestrator.phase(), Some(JobPhase::Queued));
}
