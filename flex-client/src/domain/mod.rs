pub mod asset;
pub mod duration;
pub mod flex;
pub mod measurement;
pub mod schedule;
pub mod sensor;

pub use asset::{Asset, AssetUpdate, Attributes, ChartGroup, NewAsset};
pub use duration::{IsoDuration, ParseDurationError};
pub use flex::{FlexContext, FlexModel, SensorReference, TimedValue};
pub use measurement::MeasurementBatch;
pub use schedule::{JobHandle, JobStatus, RemoteSchedule, SchedulePoint};
pub use sensor::{NewSensor, Sensor};
