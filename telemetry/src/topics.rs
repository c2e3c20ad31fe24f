//! MQTT topic layout shared by devices and consumers.

/// Every device's telemetry topic.
pub const TELEMETRY_WILDCARD: &str = "iot/telemetry/+";

pub fn telemetry_topic(device_id: &str) -> String {
    format!("iot/telemetry/{}", device_id)
}

pub fn analysis_topic(device_id: &str) -> String {
    format!("iot/analysis/{}", device_id)
}

pub fn metrics_topic(device_id: &str) -> String {
    format!("iot/metrics/{}", device_id)
}

pub fn summary_topic(device_id: &str) -> String {
    format!("iot/metrics/{}/summary", device_id)
}
