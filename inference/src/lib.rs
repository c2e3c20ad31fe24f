//! Telemetry analysis with a pretrained text-generation model, plus the
//! latency / memory / CPU / energy bookkeeping around every call.
//!
//! ```text
//! TelemetryMessage ──▶ prompt ──▶ TextGenerator::generate ──▶ analysis
//!                                   │
//!                      CpuSampler (20 Hz) + RSS before/after
//!                                   ▼
//!                         InferenceMetricSample ──▶ history ──▶ Summary
//! ```

pub mod engine;
pub mod error;
pub mod generator;
pub mod metrics;
pub mod probe;

pub use engine::{AnalysisResult, InferenceConfig, InferenceEngine, build_prompt};
pub use error::{InferenceError, Result};
pub use generator::{GenerationParams, TextGenerator, TgiGenerator};
pub use metrics::{
    EnergyStats, InferenceMetricSample, MetricsReport, MetricsSummary, ModelLoadMetrics, Stats,
    Summary, estimate_energy_mj,
};
pub use probe::{CpuSampler, ProcessProbe, ResourceProbe};
