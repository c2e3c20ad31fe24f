use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("failed to connect to MQTT broker within {0:?}")]
    ConnectTimeout(Duration),
}

pub type Result<T> = std::result::Result<T, TransportError>;
