mod config;
mod simulator;

use crate::{config::Config, simulator::DeviceSimulator};
use inference::InferenceEngine;
use log::{error, info, warn};
use mqtt_client::{MqttReceiver, MqttSender};
use std::time::Duration;
use telemetry::DeviceCursor;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Time given to the event loop to flush the last publishes on shutdown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = Config::load().unwrap_or_else(|err| {
        eprintln!("Failed to load configuration: {}", err);
        std::process::exit(1);
    });

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    info!("Initializing device: {} ({})", config.device_name, config.device_id);

    let cursor = DeviceCursor::load(&config.dataset_path, &config.device_id).unwrap_or_else(|err| {
        error!(
            "Error loading dataset {}: {}",
            config.dataset_path.display(),
            err
        );
        std::process::exit(1);
    });

    let engine = if config.llm_enabled {
        match InferenceEngine::load(config.inference(cursor.device_id())).await {
            Ok(engine) => {
                info!("LLM inference enabled with model: {}", config.llm_model_name);
                Some(engine)
            }
            Err(err) => {
                error!("Failed to initialize LLM: {}", err);
                info!("Continuing without LLM inference");
                None
            }
        }
    } else {
        None
    };

    let client_id = config.client_id(cursor.device_id());
    let (sender, eventloop) = MqttSender::new(
        &client_id,
        &config.mqtt_broker,
        config.mqtt_port,
        config.keep_alive(),
    );
    let mut receiver = MqttReceiver::from_client(sender.client(), eventloop);

    info!(
        "Connecting to MQTT broker at {}:{}",
        config.mqtt_broker, config.mqtt_port
    );
    if let Err(err) = receiver.wait_for_connection(CONNECT_TIMEOUT).await {
        error!("Failed to connect to MQTT broker: {}", err);
        std::process::exit(1);
    }

    let mut simulator =
        DeviceSimulator::new(sender, cursor, engine, config.llm_inference_interval);

    simulator.run(&mut receiver, shutdown_signal()).await;
    if let Err(err) = receiver.close(CLOSE_TIMEOUT).await {
        warn!("Error closing MQTT connection: {}", err);
    }

    info!(
        "Device {} finished in state {:?} after {} messages",
        simulator.cursor().device_id(),
        simulator.state(),
        simulator.message_count()
    );
    if let Some(engine) = simulator.engine() {
        info!("Total inferences: {}", engine.total_inferences());
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Unable to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
