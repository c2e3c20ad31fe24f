use crate::record::TelemetryRecord;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorData {
    pub co: f64,
    pub humidity: f64,
    pub light: bool,
    pub lpg: f64,
    pub motion: bool,
    pub smoke: f64,
    pub temp: f64,
}

/// Telemetry message as published on `iot/telemetry/<device_id>`.
///
/// ```json
/// {"data": {"co": 0.0045, "humidity": 51.0, "light": false, "lpg": 0.0076,
///           "motion": false, "smoke": 0.0234, "temp": 86.0},
///  "device_id": "00:0f:00:70:91:0a", "ts": 1594512000.0}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryMessage {
    pub data: SensorData,
    pub device_id: String,
    pub ts: f64,
}

impl TelemetryMessage {
    /// Build the message for `record`, stamped with the publishing device's id.
    pub fn from_record(record: &TelemetryRecord, device_id: &str) -> Self {
        Self {
            data: SensorData {
                co: record.co,
                humidity: record.humidity,
                light: record.light,
                lpg: record.lpg,
                motion: record.motion,
                smoke: record.smoke,
                temp: record.temp,
            },
            device_id: device_id.to_string(),
            ts: record.ts,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }
}

impl From<&TelemetryRecord> for TelemetryMessage {
    fn from(record: &TelemetryRecord) -> Self {
        Self::from_record(record, &record.device_id)
    }
}
