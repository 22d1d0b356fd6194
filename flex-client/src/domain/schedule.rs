use time::OffsetDateTime;

use super::IsoDuration;

/// Handle to a scheduling job accepted by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub sensor_id: u64,
    pub job_id: String,
    /// Window length the job was submitted with; needed to fetch the result.
    pub duration: IsoDuration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulePoint {
    pub start: OffsetDateTime,
    pub value: f64,
}

/// Schedule as returned by the platform, before window validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSchedule {
    pub unit: String,
    pub points: Vec<SchedulePoint>,
}

/// Result of one poll of a scheduling job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Queued,
    Started,
    Finished(RemoteSchedule),
    Failed(String),
}
