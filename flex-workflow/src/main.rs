use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use flex_client::domain::IsoDuration;
use flex_workflow::{
    config::AppConfig,
    metrics_server, observability,
    provision::SensorRole,
    workflow::{self, RunOverrides, RunReport, WorkflowPlan},
};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/// Provision a battery asset, load its measurements and fetch a schedule.
#[derive(Debug, Parser)]
#[command(name = "flex-workflow", version)]
struct Args {
    /// Path to the TOML configuration.
    #[arg(long, env = "FLEX_CONFIG", default_value = "flex-config.toml")]
    config: PathBuf,

    /// Asset name, overriding `[asset] name`.
    #[arg(long)]
    asset_name: Option<String>,

    /// Window start (RFC3339), overriding `[window] start`.
    #[arg(long, value_parser = parse_start)]
    start: Option<OffsetDateTime>,

    /// Window length (ISO 8601, e.g. PT4H), overriding `[window] duration`.
    #[arg(long)]
    duration: Option<IsoDuration>,

    /// Delete the named asset first and provision it from scratch.
    #[arg(long)]
    recreate: bool,

    /// Stop after loading measurements.
    #[arg(long)]
    skip_schedule: bool,
}

fn parse_start(s: &str) -> Result<OffsetDateTime, String> {
    OffsetDateTime::parse(s, &Rfc3339).map_err(|e| e.to_string())
}

fn print_report(report: &RunReport) {
    println!("asset id: {}", report.asset_id);
    for role in SensorRole::ALL {
        if let Some(id) = report.sensors.get(&role) {
            println!("  {:<10} sensor {id}", role.label());
        }
    }
    println!("batches loaded: {}", report.batches_loaded);

    if let Some(schedule) = &report.schedule {
        let phases: Vec<_> = report.transitions.iter().map(|p| p.as_str()).collect();
        println!("job {}: {}", schedule.job_id, phases.join(" -> "));
        if schedule.unit_differs() {
            println!(
                "schedule for sensor {} ({}, sensor unit {}):",
                schedule.sensor_id, schedule.unit, schedule.sensor_unit
            );
        } else {
            println!("schedule for sensor {} ({}):", schedule.sensor_id, schedule.unit);
        }
        for point in &schedule.points {
            let ts = point.start.format(&Rfc3339).unwrap_or_else(|_| point.start.to_string());
            println!("  {ts}  {}", point.value);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args = Args::parse();
    let cfg = AppConfig::load_from(&args.config)?;

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let overrides = RunOverrides {
        asset_name: args.asset_name,
        start: args.start,
        duration: args.duration,
        recreate: args.recreate,
        skip_schedule: args.skip_schedule,
    };

    let plan = WorkflowPlan::from_config(&cfg, overrides)
        .map_err(|e| anyhow::anyhow!("configuration phase failed: {e}"))?;
    let session = cfg
        .platform
        .session_config()
        .map_err(|e| anyhow::anyhow!("configuration phase failed: {e}"))?;

    let report = workflow::run(&session, &plan).await?;
    print_report(&report);

    Ok(())
}
