//! Schedule job orchestration.
//!
//! A job moves through `Submitting -> Queued -> Computing -> Ready`, or ends
//! in `Failed`. Polling is sequential with a fixed delay and bounded by a
//! maximum wait. Giving up on the wait never cancels the remote job.

use std::time::Duration;

use flex_client::{
    domain::{FlexContext, FlexModel, IsoDuration, JobHandle, JobStatus, RemoteSchedule, SchedulePoint, Sensor},
    Platform,
};
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::SchedulingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Submitting,
    Queued,
    Computing,
    Ready,
    Failed,
}

impl JobPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitting => "SUBMITTING",
            Self::Queued => "QUEUED",
            Self::Computing => "COMPUTING",
            Self::Ready => "READY",
            Self::Failed => "FAILED",
        }
    }
}

/// Next phase after observing `status`. Phases never move backwards, and a
/// terminal phase is final.
pub fn advance(phase: JobPhase, status: &JobStatus) -> JobPhase {
    if phase.is_terminal() {
        return phase;
    }
    match status {
        JobStatus::Queued if phase == JobPhase::Submitting => JobPhase::Queued,
        JobStatus::Queued => phase,
        JobStatus::Started => JobPhase::Computing,
        JobStatus::Finished(_) => JobPhase::Ready,
        JobStatus::Failed(_) => JobPhase::Failed,
    }
}

/// A validated schedule covering exactly the requested window.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    pub sensor_id: u64,
    pub job_id: String,
    pub unit: String,
    /// Unit of the scheduled sensor. The platform may answer in another
    /// unit of the same quantity, e.g. MW for a kW sensor.
    pub sensor_unit: String,
    pub start: OffsetDateTime,
    pub resolution: IsoDuration,
    pub points: Vec<SchedulePoint>,
}

impl Schedule {
    pub fn unit_differs(&self) -> bool {
        self.unit != self.sensor_unit
    }
}

#[derive(Debug, Clone)]
pub struct ScheduleJob {
    pub sensor: Sensor,
    pub start: OffsetDateTime,
    pub duration: IsoDuration,
    pub flex_context: FlexContext,
    pub flex_model: FlexModel,
}

/// Number of resolution steps in the job window. Zero-length or uneven
/// windows are rejected before anything is submitted.
pub fn window_steps(duration: IsoDuration, resolution: IsoDuration) -> Result<usize, SchedulingError> {
    duration
        .steps_of(resolution)
        .filter(|steps| *steps > 0)
        .ok_or(SchedulingError::Window { duration, resolution })
}

/// Check that `points` tile `[start, start + steps * resolution)` one point per step.
pub fn validate_schedule(
    start: OffsetDateTime,
    resolution: IsoDuration,
    steps: usize,
    points: &[SchedulePoint],
) -> Result<(), String> {
    if points.len() != steps {
        return Err(format!("expected {steps} points, got {}", points.len()));
    }

    let step = resolution.as_duration();
    let mut expected = start;
    for (i, point) in points.iter().enumerate() {
        if i > 0 {
            expected = expected
                .checked_add(step)
                .ok_or_else(|| format!("point {i} falls outside the representable time range"))?;
        }
        if point.start != expected {
            return Err(format!("point {i} starts at {}, expected {expected}", point.start));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_wait: Duration::from_secs(120),
        }
    }
}

pub struct ScheduleOrchestrator<'a, P: ?Sized> {
    platform: &'a P,
    settings: PollSettings,
    transitions: Vec<JobPhase>,
}

impl<'a, P> ScheduleOrchestrator<'a, P>
where
    P: Platform + ?Sized,
{
    pub fn new(platform: &'a P, settings: PollSettings) -> Self {
        Self {
            platform,
            settings,
            transitions: Vec::new(),
        }
    }

    /// Phases entered during the last run, in order.
    pub fn transitions(&self) -> &[JobPhase] {
        &self.transitions
    }

    pub fn phase(&self) -> Option<JobPhase> {
        self.transitions.last().copied()
    }

    fn enter(&mut self, phase: JobPhase) {
        if self.phase() == Some(phase) {
            return;
        }
        info!(
            from = self.phase().map(|p| p.as_str()).unwrap_or("-"),
            to = phase.as_str(),
            "schedule job transition"
        );
        self.transitions.push(phase);
    }

    /// Submit `job` and wait for its schedule.
    pub async fn run(&mut self, job: &ScheduleJob) -> Result<Schedule, SchedulingError> {
        self.transitions.clear();
        self.enter(JobPhase::Submitting);

        let resolution = job.sensor.event_resolution;
        let steps = window_steps(job.duration, resolution)?;

        let handle = self
            .platform
            .submit_schedule_job(job.sensor.id, job.start, job.duration, &job.flex_context, &job.flex_model)
            .await
            .map_err(|source| {
                warn!(sensor_id = job.sensor.id, error = %source, "schedule job submission failed");
                SchedulingError::Submit {
                    sensor_id: job.sensor.id,
                    source,
                }
            })?;

        info!(sensor_id = handle.sensor_id, job_id = %handle.job_id, "schedule job accepted");
        self.enter(JobPhase::Queued);

        let started = Instant::now();
        let waited = self.wait(&handle, started + self.settings.max_wait).await;
        metrics::histogram!("flex_schedule_wait_seconds").record(started.elapsed().as_secs_f64());

        let remote = match waited {
            Ok(Some(remote)) => remote,
            Err(e) => {
                self.enter(JobPhase::Failed);
                metrics::counter!("flex_schedule_jobs_failed_total").increment(1);
                return Err(e);
            }
            Ok(None) => {
                warn!(job_id = %handle.job_id, "gave up waiting for schedule job; it may still complete remotely");
                metrics::counter!("flex_schedule_jobs_timed_out_total").increment(1);
                return Err(SchedulingError::Timeout {
                    job_id: handle.job_id.clone(),
                    waited: self.settings.max_wait,
                });
            }
        };

        if let Err(reason) = validate_schedule(job.start, resolution, steps, &remote.points) {
            self.enter(JobPhase::Failed);
            metrics::counter!("flex_schedule_jobs_failed_total").increment(1);
            return Err(SchedulingError::Incomplete {
                job_id: handle.job_id,
                reason,
            });
        }

        self.enter(JobPhase::Ready);
        metrics::counter!("flex_schedule_jobs_ready_total").increment(1);

        if remote.unit != job.sensor.unit {
            warn!(
                sensor_id = job.sensor.id,
                schedule_unit = %remote.unit,
                sensor_unit = %job.sensor.unit,
                "schedule unit differs from the sensor unit"
            );
            metrics::counter!("flex_schedule_unit_mismatch_total").increment(1);
        }

        Ok(Schedule {
            sensor_id: job.sensor.id,
            job_id: handle.job_id,
            unit: remote.unit,
            sensor_unit: job.sensor.unit.clone(),
            start: job.start,
            resolution,
            points: remote.points,
        })
    }

    /// Poll until the job is terminal or `deadline` passes. At least one poll
    /// is always made. `None` means the deadline passed first.
    async fn wait(
        &mut self,
        handle: &JobHandle,
        deadline: Instant,
    ) -> Result<Option<RemoteSchedule>, SchedulingError> {
        loop {
            metrics::counter!("flex_schedule_polls_total").increment(1);
            let status = self
                .platform
                .poll_job(handle)
                .await
                .map_err(|source| SchedulingError::Poll {
                    job_id: handle.job_id.clone(),
                    source,
                })?;

            debug!(job_id = %handle.job_id, ?status, "polled schedule job");

            match status {
                JobStatus::Finished(schedule) => return Ok(Some(schedule)),
                JobStatus::Failed(reason) => {
                    return Err(SchedulingError::Failed {
                        job_id: handle.job_id.clone(),
                        reason,
                    })
                }
                pending => {
                    if let Some(current) = self.phase() {
                        self.enter(advance(current, &pending));
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.settings.interval.min(deadline - now)).await;
        }
    }
}
