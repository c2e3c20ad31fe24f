use chrono::{DateTime, Local};
use serde_json::{Map, Value};
use std::fmt::{self, Write};
use thiserror::Error;

const SEPARATOR_WIDTH: usize = 60;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("formatting failed: {0}")]
    Format(#[from] fmt::Error),
}

/// Format one telemetry payload as a fixed report block.
///
/// Only the payload's shape is trusted: missing readings are shown as
/// `N/A` and a missing or zero timestamp as `unknown`.
pub fn render(topic: &str, qos: u8, payload: &[u8]) -> Result<String, RenderError> {
    let value: Value = serde_json::from_slice(payload)?;
    let Value::Object(message) = value else {
        return Err(RenderError::NotAnObject(kind(&value)));
    };

    let empty = Map::new();
    let data = message
        .get("data")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    let mut out = String::new();
    write_report(&mut out, topic, qos, &message, data)?;
    Ok(out)
}

fn write_report(
    out: &mut impl Write,
    topic: &str,
    qos: u8,
    message: &Map<String, Value>,
    data: &Map<String, Value>,
) -> fmt::Result {
    let separator = "=".repeat(SEPARATOR_WIDTH);
    let light = if flag(data, "light") { "ON" } else { "OFF" };
    let motion = if flag(data, "motion") { "DETECTED" } else { "NONE" };

    writeln!(out, "{}", separator)?;
    writeln!(out, "Device: {}", device_id(message))?;
    writeln!(out, "Timestamp: {}", timestamp(message.get("ts")))?;
    writeln!(out, "Topic: {}", topic)?;
    writeln!(out, "QoS: {}", qos)?;
    writeln!(out, "Data:")?;
    writeln!(out, "  Temperature: {}°F", reading(data, "temp", 1))?;
    writeln!(out, "  Humidity: {}%", reading(data, "humidity", 1))?;
    writeln!(out, "  CO: {} ppm", reading(data, "co", 4))?;
    writeln!(out, "  LPG: {} ppm", reading(data, "lpg", 4))?;
    writeln!(out, "  Smoke: {} ppm", reading(data, "smoke", 4))?;
    writeln!(out, "  Light: {}", light)?;
    writeln!(out, "  Motion: {}", motion)?;
    write!(out, "{}", separator)
}

fn device_id(message: &Map<String, Value>) -> String {
    match message.get("device_id") {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Null) | None => "unknown".to_string(),
        Some(other) => other.to_string(),
    }
}

fn timestamp(ts: Option<&Value>) -> String {
    ts.and_then(Value::as_f64)
        .filter(|ts| *ts != 0.0)
        .and_then(|ts| DateTime::from_timestamp_millis((ts * 1000.0) as i64))
        .map(|utc| {
            utc.with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|| "unknown".to_string())
}

fn reading(data: &Map<String, Value>, key: &str, precision: usize) -> String {
    match data.get(key).and_then(Value::as_f64) {
        Some(value) => format!("{:.*}", precision, value),
        None => "N/A".to_string(),
    }
}

fn flag(data: &Map<String, Value>, key: &str) -> bool {
    match data.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(fields)) => !fields.is_empty(),
        Some(Value::Null) | None => false,
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telemetry::{SensorData, TelemetryMessage};

    fn message() -> TelemetryMessage {
        TelemetryMessage {
            data: SensorData {
                co: 0.0049559386483912,
                humidity: 51.0,
                light: false,
                lpg: 0.0076508222705571,
                motion: true,
                smoke: 0.0204112701224129,
                temp: 22.7,
            },
            device_id: "b8:27:eb:bf:9d:51".to_string(),
            ts: 1594512094.3859746,
        }
    }

    #[test]
    fn test_render_full_message() {
        let payload = message().to_json().unwrap();
        let out = render("iot/telemetry/b8:27:eb:bf:9d:51", 1, payload.as_bytes()).unwrap();

        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "=".repeat(60));
        assert_eq!(lines[1], "Device: b8:27:eb:bf:9d:51");
        assert_ne!(lines[2], "Timestamp: unknown");
        assert_eq!(lines[3], "Topic: iot/telemetry/b8:27:eb:bf:9d:51");
        assert_eq!(lines[4], "QoS: 1");
        assert_eq!(lines[6], "  Temperature: 22.7°F");
        assert_eq!(lines[7], "  Humidity: 51.0%");
        assert_eq!(lines[8], "  CO: 0.0050 ppm");
        assert_eq!(lines[9], "  LPG: 0.0077 ppm");
        assert_eq!(lines[10], "  Smoke: 0.0204 ppm");
        assert_eq!(lines[11], "  Light: OFF");
        assert_eq!(lines[12], "  Motion: DETECTED");
        assert_eq!(lines[13], "=".repeat(60));
    }

    #[test]
    fn test_timestamp_is_local_time() {
        let expected = DateTime::from_timestamp(1594512094, 0)
            .unwrap()
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();

        assert_eq!(timestamp(Some(&Value::from(1594512094.3859746))), expected);
    }

    #[test]
    fn test_missing_fields() {
        let out = render("iot/telemetry/x", 0, br#"{"data": {"temp": 70}}"#).unwrap();

        assert!(out.contains("Device: unknown\n"));
        assert!(out.contains("Timestamp: unknown\n"));
        assert!(out.contains("  Temperature: 70.0°F\n"));
        assert!(out.contains("  Humidity: N/A%\n"));
        assert!(out.contains("  CO: N/A ppm\n"));
        assert!(out.contains("  Light: OFF\n"));
        assert!(out.contains("  Motion: NONE\n"));
    }

    #[test]
    fn test_zero_timestamp_is_unknown() {
        let out = render("t", 1, br#"{"device_id": "d", "ts": 0, "data": {}}"#).unwrap();
        assert!(out.contains("Timestamp: unknown\n"));
    }

    struct FullBuffer;

    impl Write for FullBuffer {
        fn write_str(&mut self, _: &str) -> fmt::Result {
            Err(fmt::Error)
        }
    }

    #[test]
    fn test_write_errors_propagate() {
        let data = Map::new();
        let message = Map::new();

        assert!(write_report(&mut FullBuffer, "t", 1, &message, &data).is_err());
    }

    #[test]
    fn test_malformed_payload() {
        assert!(matches!(
            render("t", 1, b"{not json"),
            Err(RenderError::Json(_))
        ));
        assert!(matches!(
            render("t", 1, b"[1, 2]"),
            Err(RenderError::NotAnObject("an array"))
        ));
    }
}
