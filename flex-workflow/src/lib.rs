pub mod config;
pub mod error;
pub mod flex;
pub mod loader;
pub mod metrics_server;
pub mod observability;
pub mod pipeline;
pub mod provision;
pub mod schedule;
pub mod sinks;
pub mod sources;
pub mod transform;
pub mod workflow;

pub use error::WorkflowError;
pub use pipeline::{Envelope, Pipeline};
pub use workflow::{execute, run, RunOverrides, RunReport, WorkflowPlan};
