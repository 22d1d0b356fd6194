//! Client for an energy-flexibility platform: asset and sensor inventory,
//! sensor data ingestion, and schedule jobs.

pub mod domain;
pub mod error;
pub mod http;
pub mod platform;

pub use error::ApiError;
pub use http::{Credentials, FlexClient, SessionConfig};
pub use platform::Platform;
