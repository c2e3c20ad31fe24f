use serde::{Deserialize, Deserializer, de};

/// One row of the recorded telemetry dataset.
///
/// The dataset stores timestamps as text, sometimes in scientific notation
/// (`1.5945120943859746E9`), and booleans in whatever case the exporter
/// chose. Both are coerced while reading.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TelemetryRecord {
    #[serde(rename = "device")]
    pub device_id: String,
    #[serde(deserialize_with = "epoch_seconds")]
    pub ts: f64,
    pub co: f64,
    pub humidity: f64,
    #[serde(deserialize_with = "flag")]
    pub light: bool,
    pub lpg: f64,
    #[serde(deserialize_with = "flag")]
    pub motion: bool,
    pub smoke: f64,
    pub temp: f64,
}

fn epoch_seconds<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_epoch_seconds(&raw).map_err(de::Error::custom)
}

fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_flag(&raw).map_err(de::Error::custom)
}

/// Parse an epoch timestamp given as plain or scientific-notation text.
pub fn parse_epoch_seconds(raw: &str) -> Result<f64, String> {
    raw.trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid timestamp {raw:?}: {e}"))
}

pub fn parse_flag(raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        _ => Err(format!("invalid boolean {raw:?}")),
    }
}
