//! Recorded sensor telemetry: dataset rows, the replay cursor and the JSON
//! wire message published by simulated devices.

pub mod cursor;
pub mod error;
pub mod message;
pub mod record;
pub mod topics;

pub use cursor::DeviceCursor;
pub use error::{DatasetError, Result};
pub use message::{SensorData, TelemetryMessage};
pub use record::TelemetryRecord;
