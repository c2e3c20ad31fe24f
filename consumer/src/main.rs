mod config;
mod render;

use crate::config::Config;
use log::{error, info, warn};
use mqtt_client::{MqttReceiver, TransportEvent, unique_client_id};
use std::time::Duration;
use tokio_stream::StreamExt;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = Config::load().unwrap_or_else(|err| {
        eprintln!("Failed to load configuration: {}", err);
        std::process::exit(1);
    });

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    info!(
        "Connecting to MQTT broker at {}:{}",
        config.mqtt_broker, config.mqtt_port
    );
    let mut receiver = MqttReceiver::new(
        &unique_client_id("telemetry_consumer"),
        &config.mqtt_broker,
        config.mqtt_port,
        config.keep_alive(),
    );

    println!("Starting to listen for telemetry data...");
    println!("Press Ctrl+C to stop");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutting down...");
                break;
            }
            event = receiver.next() => match event {
                // Subscriptions do not survive a reconnect with a clean session.
                Some(TransportEvent::Connected) => {
                    if let Err(e) = receiver.subscribe(&config.consumer_topic).await {
                        error!("Error subscribing to {}: {}", config.consumer_topic, e);
                    }
                }
                Some(TransportEvent::Disconnected(reason)) => {
                    warn!("Disconnected from MQTT broker: {}", reason);
                }
                Some(TransportEvent::MessageReceived { topic, payload, qos }) => {
                    handle_message(&topic, qos, &payload);
                }
                None => break,
            }
        }
    }

    if let Err(e) = receiver.close(CLOSE_TIMEOUT).await {
        warn!("Error disconnecting: {}", e);
    }
    info!("MQTT consumer stopped");
}

fn handle_message(topic: &str, qos: u8, payload: &[u8]) {
    match render::render(topic, qos, payload) {
        Ok(report) => println!("\n{}", report),
        Err(e) => {
            error!("Error parsing message on {}: {}", topic, e);
            error!("Raw message: {}", String::from_utf8_lossy(payload));
        }
    }
}
