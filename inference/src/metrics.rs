use serde::{Deserialize, Serialize};

/// Power draw of an idle edge board (W).
pub const BASE_POWER_WATTS: f64 = 5.0;
/// Power draw of the same board under full load (W).
pub const MAX_POWER_WATTS: f64 = 15.0;

/// Estimated energy of a call in millijoules.
///
/// Power is interpolated linearly between [`BASE_POWER_WATTS`] and
/// [`MAX_POWER_WATTS`] by CPU utilization, then multiplied by the elapsed
/// time. This is an approximation, not a measurement.
pub fn estimate_energy_mj(elapsed_secs: f64, cpu_percent: f64) -> f64 {
    let power_watts = BASE_POWER_WATTS + (MAX_POWER_WATTS - BASE_POWER_WATTS) * (cpu_percent / 100.0);
    power_watts * elapsed_secs * 1000.0
}

pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Measurements for one inference call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceMetricSample {
    pub timestamp: String,
    pub device_id: String,
    pub model_name: String,
    pub inference_time_seconds: f64,
    pub inference_time_ms: f64,
    pub memory_used_mb: f64,
    pub memory_total_mb: f64,
    pub cpu_percent_avg: f64,
    pub cpu_percent_samples: usize,
    pub energy_consumed_mj: f64,
    pub energy_consumed_j: f64,
    pub compute_device: String,
    pub prompt_length: usize,
    pub response_length: usize,
}

/// Written once after the model is ready.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelLoadMetrics {
    pub event: String,
    pub timestamp: String,
    pub device_id: String,
    pub model_name: String,
    pub load_time_seconds: f64,
    pub memory_increase_mb: f64,
    pub compute_device: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergyStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub device_id: String,
    pub model_name: String,
    pub total_inferences: usize,
    pub inference_time_ms: Stats,
    pub memory_usage_mb: Stats,
    pub cpu_usage_percent: Stats,
    pub energy_consumption_mj: EnergyStats,
}

pub const NO_METRICS_MESSAGE: &str = "No inference metrics available";

/// Summary of an engine's history, or a "no data" marker when nothing has
/// been measured yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Summary {
    Available(MetricsSummary),
    Empty { message: String },
}

impl Summary {
    pub fn from_samples(device_id: &str, model_name: &str, samples: &[InferenceMetricSample]) -> Self {
        if samples.is_empty() {
            return Summary::Empty {
                message: NO_METRICS_MESSAGE.to_string(),
            };
        }

        let energy: Vec<f64> = samples.iter().map(|m| m.energy_consumed_mj).collect();
        let energy_stats = stats(&energy);

        Summary::Available(MetricsSummary {
            device_id: device_id.to_string(),
            model_name: model_name.to_string(),
            total_inferences: samples.len(),
            inference_time_ms: stats(&samples.iter().map(|m| m.inference_time_ms).collect::<Vec<_>>()),
            memory_usage_mb: stats(&samples.iter().map(|m| m.memory_used_mb).collect::<Vec<_>>()),
            cpu_usage_percent: stats(&samples.iter().map(|m| m.cpu_percent_avg).collect::<Vec<_>>()),
            energy_consumption_mj: EnergyStats {
                min: energy_stats.min,
                max: energy_stats.max,
                avg: energy_stats.avg,
                total: round_to(energy.iter().sum(), 2),
            },
        })
    }

    pub fn available(&self) -> Option<&MetricsSummary> {
        match self {
            Summary::Available(summary) => Some(summary),
            Summary::Empty { .. } => None,
        }
    }
}

/// `values` must not be empty.
fn stats(values: &[f64]) -> Stats {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let avg = values.iter().sum::<f64>() / values.len() as f64;

    Stats {
        min: round_to(min, 2),
        max: round_to(max, 2),
        avg: round_to(avg, 2),
    }
}

/// Persisted metrics file: the summary followed by every sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsReport {
    pub summary: Summary,
    #[serde(default)]
    pub detailed_metrics: Vec<InferenceMetricSample>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ms: f64, memory: f64, cpu: f64, energy: f64) -> InferenceMetricSample {
        InferenceMetricSample {
            timestamp: "2026-10-18T12:00:00+00:00".to_string(),
            device_id: "00:0f:00:70:91:0a".to_string(),
            model_name: "microsoft/Phi-3.5-mini-instruct".to_string(),
            inference_time_seconds: ms / 1000.0,
            inference_time_ms: ms,
            memory_used_mb: memory,
            memory_total_mb: 512.0,
            cpu_percent_avg: cpu,
            cpu_percent_samples: 10,
            energy_consumed_mj: energy,
            energy_consumed_j: energy / 1000.0,
            compute_device: "cpu".to_string(),
            prompt_length: 300,
            response_length: 450,
        }
    }

    #[test]
    fn test_energy_formula() {
        assert_eq!(estimate_energy_mj(1.0, 0.0), 5000.0);
        assert_eq!(estimate_energy_mj(1.0, 100.0), 15000.0);
        assert_eq!(estimate_energy_mj(2.0, 50.0), 20000.0);
        assert_eq!(estimate_energy_mj(0.0, 80.0), 0.0);
    }

    #[test]
    fn test_empty_summary_is_sentinel() {
        let summary = Summary::from_samples("dev", "model", &[]);

        assert_eq!(
            summary,
            Summary::Empty {
                message: NO_METRICS_MESSAGE.to_string()
            }
        );
        assert!(summary.available().is_none());

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["message"], NO_METRICS_MESSAGE);
    }

    #[test]
    fn test_summary_bounds_and_total() {
        let samples = vec![
            sample(120.5, 3.25, 40.0, 1205.12),
            sample(98.75, -1.5, 85.5, 1400.33),
            sample(210.0, 0.0, 12.25, 2300.01),
        ];

        let summary = Summary::from_samples("dev", "model", &samples);
        let summary = summary.available().unwrap();

        assert_eq!(summary.total_inferences, 3);
        for stats in [
            summary.inference_time_ms,
            summary.memory_usage_mb,
            summary.cpu_usage_percent,
        ] {
            assert!(stats.min <= stats.avg && stats.avg <= stats.max);
        }

        let energy = summary.energy_consumption_mj;
        assert!(energy.min <= energy.avg && energy.avg <= energy.max);
        assert!((energy.total - 4905.46).abs() < 1e-9);

        assert_eq!(summary.inference_time_ms.min, 98.75);
        assert_eq!(summary.inference_time_ms.max, 210.0);
        assert_eq!(summary.memory_usage_mb.min, -1.5);
    }

    #[test]
    fn test_single_sample_summary() {
        let summary = Summary::from_samples("dev", "model", &[sample(50.0, 1.0, 10.0, 300.0)]);
        let summary = summary.available().unwrap();

        assert_eq!(summary.inference_time_ms.min, 50.0);
        assert_eq!(summary.inference_time_ms.avg, 50.0);
        assert_eq!(summary.energy_consumption_mj.total, 300.0);
    }

    #[test]
    fn test_report_reads_back() {
        let samples = vec![sample(120.5, 3.25, 40.0, 1205.12)];
        let report = MetricsReport {
            summary: Summary::from_samples("dev", "model", &samples),
            detailed_metrics: samples,
        };

        let json = serde_json::to_string(&report).unwrap();
        let back: MetricsReport = serde_json::from_str(&json).unwrap();

        assert_eq!(back.summary, report.summary);
        assert_eq!(back.detailed_metrics.len(), 1);
    }

    #[test]
    fn test_rounding() {
        assert_eq!(round_to(1.23456, 2), 1.23);
        assert_eq!(round_to(1.23456, 4), 1.2346);
    }
}
