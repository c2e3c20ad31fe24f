use chrono::Local;
use inference::InferenceEngine;
use log::{debug, error, info, warn};
use mqtt_client::{Publisher, TransportEvent};
use rand::Rng;
use serde::Serialize;
use std::{future::Future, time::Duration};
use telemetry::{DeviceCursor, TelemetryMessage, topics};
use tokio::time::{Instant, sleep_until};
use tokio_stream::{Stream, StreamExt};

/// Backoff after a failed publish.
const SEND_RETRY_DELAY: Duration = Duration::from_secs(5);
const MIN_SEND_DELAY_SECS: f64 = 1.0;
const MAX_SEND_DELAY_SECS: f64 = 5.0;
/// Metrics are persisted every `inference_interval * SUMMARY_EVERY` messages.
const SUMMARY_EVERY: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Init,
    Connecting,
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, Serialize)]
struct AnalysisMessage<'a> {
    device_id: &'a str,
    timestamp: String,
    analysis: &'a str,
    telemetry: &'a TelemetryMessage,
}

/// Replays one device's recorded telemetry through a [`Publisher`].
pub struct DeviceSimulator<P> {
    publisher: P,
    cursor: DeviceCursor,
    engine: Option<InferenceEngine>,
    inference_interval: u64,
    state: DeviceState,
    message_count: u64,
}

impl<P: Publisher> DeviceSimulator<P> {
    pub fn new(
        publisher: P,
        cursor: DeviceCursor,
        engine: Option<InferenceEngine>,
        inference_interval: u64,
    ) -> Self {
        Self {
            publisher,
            cursor,
            engine,
            inference_interval: inference_interval.max(1),
            state: DeviceState::Init,
            message_count: 0,
        }
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn message_count(&self) -> u64 {
        self.message_count
    }

    pub fn cursor(&self) -> &DeviceCursor {
        &self.cursor
    }

    pub fn engine(&self) -> Option<&InferenceEngine> {
        self.engine.as_ref()
    }

    /// Publish telemetry until the connection drops, `events` ends or
    /// `shutdown` resolves. Publishing starts on the first
    /// [`TransportEvent::Connected`].
    ///
    /// Pass the event source by `&mut` to keep it for a flushing close once
    /// this returns.
    pub async fn run<E, S>(&mut self, mut events: E, shutdown: S)
    where
        E: Stream<Item = TransportEvent> + Unpin,
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        self.state = DeviceState::Connecting;
        let mut next_send = Instant::now();

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down device simulator...");
                    break;
                }
                event = events.next() => match event {
                    Some(TransportEvent::Connected) => {
                        if self.state == DeviceState::Connecting {
                            info!("Starting telemetry transmission for {}", self.cursor.device_id());
                            self.state = DeviceState::Running;
                            next_send = Instant::now();
                        }
                    }
                    Some(TransportEvent::Disconnected(reason)) => {
                        warn!("Disconnected from MQTT broker: {}", reason);
                        break;
                    }
                    Some(TransportEvent::MessageReceived { topic, .. }) => {
                        debug!("Ignoring message on {}", topic);
                    }
                    None => {
                        warn!("Connection event stream ended");
                        break;
                    }
                },
                _ = sleep_until(next_send), if self.state == DeviceState::Running => {
                    let delay = self.send_next().await;
                    next_send = Instant::now() + delay;
                }
            }
        }

        self.stop().await;
    }

    /// Publish the current record. Returns how long to wait before the
    /// next attempt.
    async fn send_next(&mut self) -> Duration {
        let message = self.cursor.current_message();
        let topic = topics::telemetry_topic(self.cursor.device_id());

        let payload = match message.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                error!("Error encoding telemetry: {}", e);
                return SEND_RETRY_DELAY;
            }
        };

        if let Err(e) = self.publisher.publish(&topic, &payload).await {
            error!("Error sending telemetry: {}", e);
            return SEND_RETRY_DELAY;
        }

        self.cursor.advance();
        self.message_count += 1;
        info!(
            "Sent message #{} - Temp: {}°F, Humidity: {}%, CO: {}",
            self.message_count, message.data.temp, message.data.humidity, message.data.co
        );

        if self.message_count % self.inference_interval == 0 {
            self.analyze(&message).await;
        }

        random_send_delay()
    }

    async fn analyze(&mut self, message: &TelemetryMessage) {
        let summary_due = self.summary_due();
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        let device_id = self.cursor.device_id();

        info!("Running LLM inference on message #{}", self.message_count);
        let result = engine.analyze(message).await;

        let analysis = AnalysisMessage {
            device_id,
            timestamp: Local::now().to_rfc3339(),
            analysis: &result.analysis,
            telemetry: &result.telemetry_input,
        };
        publish_json(&self.publisher, &topics::analysis_topic(device_id), &analysis).await;
        publish_json(&self.publisher, &topics::metrics_topic(device_id), &result.metrics).await;

        if summary_due {
            if let Err(e) = engine.save_metrics(None) {
                error!("Error saving metrics: {}", e);
            }
            publish_json(&self.publisher, &topics::summary_topic(device_id), &engine.summary()).await;
        }
    }

    fn summary_due(&self) -> bool {
        self.message_count % self.inference_interval.saturating_mul(SUMMARY_EVERY) == 0
    }

    async fn stop(&mut self) {
        self.state = DeviceState::Stopping;

        if let Some(engine) = &self.engine {
            if engine.total_inferences() > 0 {
                info!("Saving final metrics...");
                if let Err(e) = engine.save_metrics(None) {
                    error!("Error saving metrics: {}", e);
                }
            }
        }

        if let Err(e) = self.publisher.disconnect().await {
            warn!("Error disconnecting from MQTT broker: {}", e);
        }

        self.state = DeviceState::Stopped;
        info!(
            "Device simulator stopped after {} messages",
            self.message_count
        );
    }
}

async fn publish_json<P: Publisher, T: Serialize>(publisher: &P, topic: &str, value: &T) {
    let payload = match serde_json::to_string(value) {
        Ok(payload) => payload,
        Err(e) => {
            error!("Error encoding message for {}: {}", topic, e);
            return;
        }
    };

    if let Err(e) = publisher.publish(topic, &payload).await {
        error!("Error publishing to {}: {}", topic, e);
    }
}

fn random_send_delay() -> Duration {
    let secs = rand::rng().random_range(MIN_SEND_DELAY_SECS..=MAX_SEND_DELAY_SECS);
    Duration::from_secs_f64(secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use inference::{GenerationParams, InferenceConfig, TextGenerator};
    use mqtt_client::{Result as TransportResult, TransportError};
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    };
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;

    const CSV: &str = "\
\"ts\",\"device\",\"co\",\"humidity\",\"light\",\"lpg\",\"motion\",\"smoke\",\"temp\"
\"1.5945120943859746E9\",\"b8:27:eb:bf:9d:51\",\"0.004955\",\"51.0\",\"false\",\"0.0076\",\"false\",\"0.0204\",\"22.7\"
\"1.5945120947355676E9\",\"00:0f:00:70:91:0a\",\"0.002840\",\"76.0\",\"false\",\"0.0051\",\"false\",\"0.0134\",\"19.7\"
\"1.5945120980735729E9\",\"b8:27:eb:bf:9d:51\",\"0.004976\",\"50.9\",\"false\",\"0.0076\",\"false\",\"0.0204\",\"22.6\"
\"1.5945121017867937E9\",\"b8:27:eb:bf:9d:51\",\"0.004403\",\"50.9\",\"true\",\"0.0071\",\"true\",\"0.0191\",\"22.6\"
";

    /// Records every publish; fails the first `failures` attempts.
    #[derive(Clone, Default)]
    struct MockPublisher {
        published: Arc<Mutex<Vec<(String, String)>>>,
        attempts: Arc<AtomicUsize>,
        failures: usize,
        disconnected: Arc<AtomicBool>,
    }

    impl MockPublisher {
        fn failing(failures: usize) -> Self {
            Self {
                failures,
                ..Self::default()
            }
        }

        fn on_topic(&self, prefix: &str) -> Vec<String> {
            self.matching(|topic| topic.starts_with(prefix))
        }

        fn on_exact_topic(&self, wanted: &str) -> Vec<String> {
            self.matching(|topic| topic == wanted)
        }

        fn matching(&self, keep: impl Fn(&str) -> bool) -> Vec<String> {
            self.published
                .lock()
                .unwrap()
                .iter()
                .filter(|(topic, _)| keep(topic))
                .map(|(_, payload)| payload.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Publisher for MockPublisher {
        async fn publish(&self, topic: &str, payload: &str) -> TransportResult<()> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures {
                return Err(TransportError::ConnectTimeout(Duration::from_secs(10)));
            }

            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), payload.to_string()));
            Ok(())
        }

        async fn disconnect(&self) -> TransportResult<()> {
            self.disconnected.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct EchoGenerator;

    #[async_trait]
    impl TextGenerator for EchoGenerator {
        fn model_id(&self) -> &str {
            "test/echo"
        }

        async fn generate(&self, _prompt: &str, _params: &GenerationParams) -> inference::Result<String> {
            Ok("Readings nominal.".to_string())
        }
    }

    fn cursor() -> DeviceCursor {
        DeviceCursor::from_reader(CSV.as_bytes(), "b8:27:eb:bf:9d:51").unwrap()
    }

    fn connected() -> (mpsc::Sender<TransportEvent>, ReceiverStream<TransportEvent>) {
        let (tx, rx) = mpsc::channel(8);
        tx.try_send(TransportEvent::Connected).unwrap();
        (tx, ReceiverStream::new(rx))
    }

    fn telemetry(publisher: &MockPublisher) -> Vec<TelemetryMessage> {
        publisher
            .on_topic("iot/telemetry/")
            .iter()
            .map(|payload| TelemetryMessage::from_json(payload.as_bytes()).unwrap())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_replays_dataset_in_order() {
        let publisher = MockPublisher::default();
        let mut simulator = DeviceSimulator::new(publisher.clone(), cursor(), None, 5);
        let (_tx, events) = connected();

        simulator
            .run(events, tokio::time::sleep(Duration::from_secs(30)))
            .await;

        let sent = telemetry(&publisher);
        // One send per 1-5 s over 30 s.
        assert!(sent.len() >= 6, "only {} messages", sent.len());
        assert_eq!(simulator.message_count(), sent.len() as u64);

        let expected_temps = [22.7, 22.6, 22.6];
        for (i, message) in sent.iter().enumerate() {
            assert_eq!(message.device_id, "b8:27:eb:bf:9d:51");
            assert_eq!(message.data.temp, expected_temps[i % 3]);
        }
        assert_eq!(publisher.on_topic("").len(), sent.len());

        assert_eq!(simulator.state(), DeviceState::Stopped);
        assert!(publisher.disconnected.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_failure_does_not_advance() {
        let publisher = MockPublisher::failing(2);
        let mut simulator = DeviceSimulator::new(publisher.clone(), cursor(), None, 5);
        let (_tx, events) = connected();

        // Attempts at 0 s and 5 s fail, the one at 10 s succeeds.
        simulator
            .run(events, tokio::time::sleep(Duration::from_millis(10_500)))
            .await;

        assert_eq!(publisher.attempts.load(Ordering::SeqCst), 3);
        let sent = telemetry(&publisher);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].ts, 1.5945120943859746E9);
        assert_eq!(simulator.cursor().position(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_stops_loop() {
        let publisher = MockPublisher::default();
        let mut simulator = DeviceSimulator::new(publisher.clone(), cursor(), None, 5);
        let (tx, events) = connected();
        tx.try_send(TransportEvent::Disconnected("connection reset".to_string()))
            .unwrap();

        simulator.run(events, std::future::pending()).await;

        assert_eq!(simulator.state(), DeviceState::Stopped);
        assert!(simulator.message_count() <= 1);
        assert!(publisher.disconnected.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_while_connecting() {
        let publisher = MockPublisher::default();
        let mut simulator = DeviceSimulator::new(publisher.clone(), cursor(), None, 5);
        let (_tx, rx) = mpsc::channel(1);

        simulator
            .run(
                ReceiverStream::new(rx),
                tokio::time::sleep(Duration::from_secs(15)),
            )
            .await;

        assert_eq!(simulator.message_count(), 0);
        assert!(publisher.on_topic("").is_empty());
        assert_eq!(simulator.state(), DeviceState::Stopped);
    }

    fn echo_engine(dir: &std::path::Path) -> InferenceEngine {
        let config = InferenceConfig {
            device_id: "b8:27:eb:bf:9d:51".to_string(),
            model_name: "test/echo".to_string(),
            endpoint: "http://127.0.0.1:9".to_string(),
            max_length: 32,
            temperature: 0.7,
            top_p: 0.9,
            metrics_dir: dir.to_path_buf(),
        };
        InferenceEngine::with_generator(config, Box::new(EchoGenerator))
    }

    #[tokio::test(start_paused = true)]
    async fn test_inference_every_kth_message() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = MockPublisher::default();
        let mut simulator =
            DeviceSimulator::new(publisher.clone(), cursor(), Some(echo_engine(dir.path())), 2);
        let (_tx, events) = connected();

        // Metrics files present when shutdown fires, before the final save.
        let saved_before_stop = Arc::new(Mutex::new(Vec::new()));
        let shutdown = {
            let saved = saved_before_stop.clone();
            let dir = dir.path().to_path_buf();
            async move {
                tokio::time::sleep(Duration::from_secs(120)).await;
                *saved.lock().unwrap() = std::fs::read_dir(&dir)
                    .unwrap()
                    .map(|entry| entry.unwrap().path())
                    .collect();
            }
        };

        simulator.run(events, shutdown).await;

        let sent = telemetry(&publisher).len();
        let analyses = publisher.on_topic("iot/analysis/");
        let metrics = publisher.on_exact_topic("iot/metrics/b8:27:eb:bf:9d:51");
        let summaries = publisher.on_exact_topic("iot/metrics/b8:27:eb:bf:9d:51/summary");

        assert!(sent >= 24, "only {} messages", sent);
        assert_eq!(analyses.len(), sent / 2);
        assert_eq!(metrics.len(), sent / 2);
        assert_eq!(summaries.len(), sent / 20);

        let analysis: serde_json::Value = serde_json::from_str(&analyses[0]).unwrap();
        assert_eq!(analysis["device_id"], "b8:27:eb:bf:9d:51");
        assert_eq!(analysis["analysis"], "Readings nominal.");
        assert_eq!(analysis["telemetry"]["data"]["temp"], 22.6);

        let summary: serde_json::Value = serde_json::from_str(&summaries[0]).unwrap();
        assert_eq!(summary["total_inferences"], 10);

        assert_eq!(
            simulator.engine().unwrap().total_inferences(),
            sent / 2
        );

        let saved = saved_before_stop.lock().unwrap().clone();
        assert!(!saved.is_empty(), "no metrics saved before shutdown");
        let report: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&saved[0]).unwrap()).unwrap();
        assert!(report["summary"]["total_inferences"].as_u64().unwrap() >= 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_metrics_file_without_inferences() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = MockPublisher::default();
        let mut simulator =
            DeviceSimulator::new(publisher.clone(), cursor(), Some(echo_engine(dir.path())), 1000);
        let (_tx, events) = connected();

        simulator
            .run(events, tokio::time::sleep(Duration::from_secs(10)))
            .await;

        assert!(publisher.on_topic("iot/analysis/").is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_summary_cadence_with_huge_interval() {
        let mut simulator = DeviceSimulator::new(MockPublisher::default(), cursor(), None, u64::MAX);

        simulator.message_count = u64::MAX;
        assert!(simulator.summary_due());

        simulator.inference_interval = 2;
        simulator.message_count = 20;
        assert!(simulator.summary_due());
        simulator.message_count = 10;
        assert!(!simulator.summary_due());
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_source_outlives_run() {
        let publisher = MockPublisher::default();
        let mut simulator = DeviceSimulator::new(publisher.clone(), cursor(), None, 5);
        let (tx, mut events) = connected();

        simulator
            .run(&mut events, tokio::time::sleep(Duration::from_secs(3)))
            .await;

        assert_eq!(simulator.state(), DeviceState::Stopped);
        assert!(publisher.disconnected.load(Ordering::SeqCst));
        tx.try_send(TransportEvent::Connected).unwrap();
        assert_eq!(events.next().await, Some(TransportEvent::Connected));
    }
}
