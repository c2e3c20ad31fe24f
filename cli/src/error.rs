use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("number of devices must be at least 1, got {0}")]
    InvalidDeviceCount(usize),

    #[error("LLM inference needs MQTT telemetry, drop --no-mqtt")]
    InferenceRequiresMqtt,

    #[error("LLM device {index} is out of range 1..={devices}")]
    InvalidInferenceDevice { index: usize, devices: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid metrics path pattern: {0}")]
    Pattern(#[from] glob::PatternError),
}

pub type Result<T> = std::result::Result<T, CliError>;
