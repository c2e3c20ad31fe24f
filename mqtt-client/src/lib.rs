//! Thin MQTT plumbing over `rumqttc` shared by the device simulator and the
//! telemetry consumer.
//!
//! A [`MqttSender`] publishes with at-least-once delivery. A [`MqttReceiver`]
//! owns the connection's event loop, drives it on a background task and
//! yields typed [`TransportEvent`]s as a [`Stream`](tokio_stream::Stream).

pub mod error;
pub mod event;
pub mod receiver;
pub mod sender;

pub use error::{Result, TransportError};
pub use event::{ConnectionState, TransportEvent};
pub use receiver::MqttReceiver;
pub use sender::{MqttSender, Publisher};

use rumqttc::MqttOptions;
use std::time::Duration;
use uuid::Uuid;

pub fn mqtt_options(client_id: &str, host: &str, port: u16, keep_alive: Duration) -> MqttOptions {
    let mut options = MqttOptions::new(client_id, host, port);
    options.set_keep_alive(keep_alive);
    options
}

/// Client id with a random suffix, for clients that may run more than once
/// against the same broker.
pub fn unique_client_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_client_ids_differ() {
        let a = unique_client_id("telemetry_consumer");
        let b = unique_client_id("telemetry_consumer");

        assert!(a.starts_with("telemetry_consumer-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_options() {
        let options = mqtt_options("edge-device_00:0f", "mqtt-broker", 1883, Duration::from_secs(60));

        assert_eq!(options.client_id(), "edge-device_00:0f");
        assert_eq!(options.broker_address(), ("mqtt-broker".to_string(), 1883));
        assert_eq!(options.keep_alive(), Duration::from_secs(60));
    }
}
