use serde::Deserialize;
use std::time::Duration;
use telemetry::topics::TELEMETRY_WILDCARD;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_mqtt_broker")]
    pub mqtt_broker: String,
    #[serde(default = "default_mqtt_port")]
    pub mqtt_port: u16,
    #[serde(default = "default_mqtt_keep_alive")]
    pub mqtt_keep_alive: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_consumer_topic")]
    pub consumer_topic: String,
}

fn default_mqtt_broker() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_mqtt_keep_alive() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_consumer_topic() -> String {
    TELEMETRY_WILDCARD.to_string()
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::from_environment(config::Environment::default())
    }

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
}
