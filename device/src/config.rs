use inference::InferenceConfig;
use serde::Deserialize;
use std::{path::PathBuf, time::Duration};

/// Device settings, read from an optional `config` file and then from
/// environment variables (`DEVICE_ID`, `MQTT_BROKER`, ...).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_device_name")]
    pub device_name: String,
    #[serde(default = "default_device_id")]
    pub device_id: String,
    #[serde(default = "default_mqtt_broker")]
    pub mqtt_broker: String,
    #[serde(default = "default_mqtt_port")]
    pub mqtt_port: u16,
    #[serde(default = "default_mqtt_keep_alive")]
    pub mqtt_keep_alive: u64,
    #[serde(default = "default_dataset_path")]
    pub dataset_path: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub llm_enabled: bool,
    #[serde(default = "default_llm_model_name")]
    pub llm_model_name: String,
    #[serde(default = "default_llm_endpoint")]
    pub llm_endpoint: String,
    #[serde(default = "default_llm_inference_interval")]
    pub llm_inference_interval: u64,
    #[serde(default = "default_llm_max_length")]
    pub llm_max_length: u32,
    #[serde(default = "default_llm_temperature")]
    pub llm_temperature: f32,
    #[serde(default = "default_metrics_dir")]
    pub metrics_dir: PathBuf,
}

fn default_device_name() -> String {
    "edge-device".to_string()
}

fn default_device_id() -> String {
    "00:0f:00:70:91:0a".to_string()
}

fn default_mqtt_broker() -> String {
    "mqtt-broker".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_mqtt_keep_alive() -> u64 {
    60
}

fn default_dataset_path() -> PathBuf {
    PathBuf::from("/app/dataset/iot_telemetry_data.csv")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_llm_model_name() -> String {
    "microsoft/Phi-3.5-mini-instruct".to_string()
}

fn default_llm_endpoint() -> String {
    "http://llm-server:80".to_string()
}

fn default_llm_inference_interval() -> u64 {
    5
}

fn default_llm_max_length() -> u32 {
    512
}

fn default_llm_temperature() -> f32 {
    0.7
}

fn default_metrics_dir() -> PathBuf {
    PathBuf::from("/app/metrics")
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::from_environment(config::Environment::default())
    }

    /// Values are kept as strings until deserialization so that ids such
    /// as `007` keep their padding.
    pub fn from_environment(env: config::Environment) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(env)
            .build()?
            .try_deserialize()
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.mqtt_keep_alive)
    }

    pub fn client_id(&self, device_id: &str) -> String {
        format!("{}_{}", self.device_name, device_id)
    }

    /// Inference settings for the device actually being replayed, which
    /// may differ from the configured id after dataset fallback.
    pub fn inference(&self, device_id: &str) -> InferenceConfig {
        InferenceConfig {
            device_id: device_id.to_string(),
            model_name: self.llm_model_name.clone(),
            endpoint: self.llm_endpoint.clone(),
            max_length: self.llm_max_length,
            temperature: self.llm_temperature,
            top_p: 0.9,
            metrics_dir: self.metrics_dir.clone(),
        }
    }
}
