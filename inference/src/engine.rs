use crate::{
    error::Result,
    generator::{GenerationParams, TextGenerator, TgiGenerator},
    metrics::{
        InferenceMetricSample, MetricsReport, ModelLoadMetrics, Summary, estimate_energy_mj,
        round_to,
    },
    probe::{CpuSampler, ProcessProbe, ResourceProbe},
};
use chrono::Local;
use log::{error, info};
use serde::Serialize;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use telemetry::TelemetryMessage;
use tokio::time::Instant;

const CPU_SAMPLE_PERIOD: Duration = Duration::from_millis(50);
const SAMPLER_JOIN_TIMEOUT: Duration = Duration::from_secs(1);
const LOADING_METRICS_FILE: &str = "loading_metrics.json";

#[derive(Debug, Clone)]
pub struct InferenceConfig {
    pub device_id: String,
    pub model_name: String,
    pub endpoint: String,
    pub max_length: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub metrics_dir: PathBuf,
}

impl InferenceConfig {
    fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            max_new_tokens: self.max_length,
            temperature: self.temperature,
            top_p: self.top_p,
        }
    }
}

/// Result of one [`InferenceEngine::analyze`] call.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub analysis: String,
    pub metrics: InferenceMetricSample,
    pub telemetry_input: TelemetryMessage,
}

pub struct InferenceEngine {
    config: InferenceConfig,
    generator: Box<dyn TextGenerator>,
    probe: ProcessProbe,
    history: Vec<InferenceMetricSample>,
}

impl InferenceEngine {
    /// Connect to the generation server and record how long that took.
    ///
    /// # Errors
    /// Fails if the server cannot be reached. Failing to write the loading
    /// metrics file is only logged.
    pub async fn load(config: InferenceConfig) -> Result<Self> {
        info!("Loading model {} from {}", config.model_name, config.endpoint);

        let mut probe = ProcessProbe::new();
        let memory_before = probe.memory_mb();
        let started = Instant::now();

        let generator = TgiGenerator::connect(&config.endpoint, &config.model_name).await?;

        let load_time = started.elapsed().as_secs_f64();
        let memory_delta = probe.memory_mb() - memory_before;
        info!("Model loaded in {:.2}s", load_time);

        let engine = Self {
            config,
            generator: Box::new(generator),
            probe,
            history: Vec::new(),
        };

        let load_metrics = ModelLoadMetrics {
            event: "model_loading".to_string(),
            timestamp: now_iso(),
            device_id: engine.config.device_id.clone(),
            model_name: engine.config.model_name.clone(),
            load_time_seconds: round_to(load_time, 2),
            memory_increase_mb: round_to(memory_delta, 2),
            compute_device: engine.generator.compute_device().to_string(),
        };
        let path = engine.config.metrics_dir.join(LOADING_METRICS_FILE);
        if let Err(e) = write_json(&path, &load_metrics) {
            error!("Error saving loading metrics to {}: {}", path.display(), e);
        }

        Ok(engine)
    }

    pub fn with_generator(config: InferenceConfig, generator: Box<dyn TextGenerator>) -> Self {
        Self {
            config,
            generator,
            probe: ProcessProbe::new(),
            history: Vec::new(),
        }
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    pub fn history(&self) -> &[InferenceMetricSample] {
        &self.history
    }

    pub fn total_inferences(&self) -> usize {
        self.history.len()
    }

    /// Run the model on one message and measure the call.
    ///
    /// Generation errors do not fail the call; the analysis text becomes
    /// `"Error: <message>"` and the sample is recorded as usual.
    pub async fn analyze(&mut self, message: &TelemetryMessage) -> AnalysisResult {
        let prompt = build_prompt(message);
        let params = self.config.generation_params();

        let started = Instant::now();
        let memory_before = self.probe.memory_mb();
        let sampler = CpuSampler::start(ProcessProbe::new(), CPU_SAMPLE_PERIOD);

        let analysis = match self.generator.generate(&prompt, &params).await {
            Ok(text) => text,
            Err(e) => {
                error!("Error during inference: {}", e);
                format!("Error: {}", e)
            }
        };

        let cpu_samples = sampler.finish(SAMPLER_JOIN_TIMEOUT).await;
        let elapsed = started.elapsed().as_secs_f64();
        let memory_after = self.probe.memory_mb();

        let cpu_avg = if cpu_samples.is_empty() {
            0.0
        } else {
            cpu_samples.iter().sum::<f64>() / cpu_samples.len() as f64
        };
        let energy = estimate_energy_mj(elapsed, cpu_avg);

        let sample = InferenceMetricSample {
            timestamp: now_iso(),
            device_id: self.config.device_id.clone(),
            model_name: self.config.model_name.clone(),
            inference_time_seconds: round_to(elapsed, 4),
            inference_time_ms: round_to(elapsed * 1000.0, 2),
            memory_used_mb: round_to(memory_after - memory_before, 2),
            memory_total_mb: round_to(memory_after, 2),
            cpu_percent_avg: round_to(cpu_avg, 2),
            cpu_percent_samples: cpu_samples.len(),
            energy_consumed_mj: round_to(energy, 2),
            energy_consumed_j: round_to(energy / 1000.0, 4),
            compute_device: self.generator.compute_device().to_string(),
            prompt_length: prompt.chars().count(),
            response_length: analysis.chars().count(),
        };

        self.history.push(sample.clone());
        info!(
            "Inference #{} - Time: {:.2}ms, Memory: {:.2}MB, CPU: {:.2}%, Energy: {:.2}mJ",
            self.history.len(),
            sample.inference_time_ms,
            sample.memory_used_mb,
            sample.cpu_percent_avg,
            sample.energy_consumed_mj
        );

        AnalysisResult {
            analysis,
            metrics: sample,
            telemetry_input: message.clone(),
        }
    }

    pub fn summary(&self) -> Summary {
        Summary::from_samples(&self.config.device_id, &self.config.model_name, &self.history)
    }

    /// Write the summary and every sample to `path`, or to a timestamped
    /// file under the metrics directory.
    pub fn save_metrics(&self, path: Option<&Path>) -> Result<PathBuf> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => self.config.metrics_dir.join(format!(
                "inference_metrics_{}_{}.json",
                self.config.device_id,
                Local::now().format("%Y%m%d_%H%M%S")
            )),
        };

        let report = MetricsReport {
            summary: self.summary(),
            detailed_metrics: self.history.clone(),
        };
        write_json(&path, &report)?;
        info!("Metrics saved to: {}", path.display());

        Ok(path)
    }
}

/// Prompt for one message. Identical messages always give identical prompts.
pub fn build_prompt(message: &TelemetryMessage) -> String {
    let data = &message.data;
    format!(
        "Analyze the following IoT sensor data and provide a brief assessment:\n\
         \n\
         Device ID: {}\n\
         Timestamp: {:?}\n\
         \n\
         Sensor Readings:\n\
         - Temperature: {:?}°F\n\
         - Humidity: {:?}%\n\
         - CO Level: {:?} ppm\n\
         - Smoke: {:?}\n\
         - LPG: {:?}\n\
         - Light: {}\n\
         - Motion: {}\n\
         \n\
         Assessment: ",
        message.device_id,
        message.ts,
        data.temp,
        data.humidity,
        data.co,
        data.smoke,
        data.lpg,
        if data.light { "On" } else { "Off" },
        if data.motion { "Detected" } else { "Not detected" },
    )
}

fn now_iso() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}
