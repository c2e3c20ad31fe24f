use crate::error::Result;
use inference::{MetricsSummary, Summary};
use log::{debug, error, info, warn};
use serde_json::Value;
use std::{
    collections::BTreeMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

const WIDE: usize = 80;

/// Summaries found in metrics files, keyed by `<device_id>_<model_name>`.
#[derive(Debug, Default)]
pub struct MetricsAnalyzer {
    summaries: BTreeMap<String, MetricsSummary>,
}

/// One row of the comparison table.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub label: String,
    pub avg_time_ms: f64,
    pub avg_memory_mb: f64,
    pub avg_cpu_percent: f64,
    pub total_energy_mj: f64,
}

impl Comparison {
    fn from_summary(summary: &MetricsSummary) -> Self {
        let short_name = summary
            .model_name
            .rsplit('/')
            .next()
            .unwrap_or(&summary.model_name);
        let device: String = summary.device_id.chars().take(8).collect();

        Self {
            label: format!("{} ({})", short_name, device),
            avg_time_ms: summary.inference_time_ms.avg,
            avg_memory_mb: summary.memory_usage_mb.avg,
            avg_cpu_percent: summary.cpu_usage_percent.avg,
            total_energy_mj: summary.energy_consumption_mj.total,
        }
    }
}

impl MetricsAnalyzer {
    /// Load every `*.json` file below `metrics_dir` (or below
    /// `metrics_dir/<device>` when given) that carries a summary.
    /// Unreadable files are logged and skipped.
    pub fn load(metrics_dir: &Path, device: Option<&str>) -> Result<Self> {
        let mut root = metrics_dir.to_path_buf();
        if let Some(device) = device {
            root.push(device);
        }
        let pattern = root.join("**").join("*.json");

        let files: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())?
            .filter_map(|entry| match entry {
                Ok(path) => Some(path),
                Err(e) => {
                    error!("Error reading {}: {}", e.path().display(), e.error());
                    None
                }
            })
            .collect();

        if files.is_empty() {
            warn!("No metrics files found in {}", root.display());
        } else {
            info!("Found {} metrics files", files.len());
        }

        let mut analyzer = Self::default();
        for path in files {
            match read_summary(&path) {
                Ok(Some(summary)) => analyzer.insert(summary),
                Ok(None) => debug!("No summary statistics in {}", path.display()),
                Err(e) => error!("Error loading {}: {}", path.display(), e),
            }
        }

        Ok(analyzer)
    }

    pub fn insert(&mut self, summary: MetricsSummary) {
        let key = format!("{}_{}", summary.device_id, summary.model_name);
        self.summaries.insert(key, summary);
    }

    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.summaries.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.summaries.keys().map(String::as_str)
    }

    pub fn print_summary<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "\n{}", "=".repeat(WIDE))?;
        writeln!(out, "LLM INFERENCE METRICS SUMMARY")?;
        writeln!(out, "{}", "=".repeat(WIDE))?;

        for summary in self.summaries.values() {
            writeln!(out, "\nDevice: {}", summary.device_id)?;
            writeln!(out, "Model: {}", summary.model_name)?;
            writeln!(out, "Total Inferences: {}", summary.total_inferences)?;

            for (title, stats) in [
                ("Inference Time (ms)", summary.inference_time_ms),
                ("Memory Usage (MB)", summary.memory_usage_mb),
                ("CPU Usage (%)", summary.cpu_usage_percent),
            ] {
                writeln!(out, "\n{}:", title)?;
                writeln!(out, "   Min: {:.2}", stats.min)?;
                writeln!(out, "   Max: {:.2}", stats.max)?;
                writeln!(out, "   Avg: {:.2}", stats.avg)?;
            }

            let energy = summary.energy_consumption_mj;
            writeln!(out, "\nEnergy Consumption:")?;
            writeln!(out, "   Min: {:.2} mJ", energy.min)?;
            writeln!(out, "   Max: {:.2} mJ", energy.max)?;
            writeln!(out, "   Avg: {:.2} mJ", energy.avg)?;
            writeln!(
                out,
                "   Total: {:.2} mJ ({:.4} J)",
                energy.total,
                energy.total / 1000.0
            )?;

            writeln!(out, "\n{}", "-".repeat(WIDE))?;
        }

        Ok(())
    }

    pub fn comparisons(&self) -> Vec<Comparison> {
        self.summaries.values().map(Comparison::from_summary).collect()
    }

    /// Print a comparison table and the best entry per metric. Needs at
    /// least two entries; returns `false` without printing otherwise.
    pub fn compare<W: Write>(&self, out: &mut W) -> io::Result<bool> {
        let rows = self.comparisons();
        if rows.len() < 2 {
            warn!("Need at least 2 models to compare");
            return Ok(false);
        }

        writeln!(out, "\n{}", "=".repeat(WIDE))?;
        writeln!(out, "MODEL COMPARISON")?;
        writeln!(out, "{}", "=".repeat(WIDE))?;
        writeln!(
            out,
            "\n{:<40} {:<15} {:<15} {:<12} {:<18}",
            "Model", "Avg Time (ms)", "Avg Memory (MB)", "Avg CPU (%)", "Total Energy (mJ)"
        )?;
        writeln!(out, "{}", "-".repeat(100))?;

        for row in &rows {
            writeln!(
                out,
                "{:<40} {:<15.2} {:<15.2} {:<12.2} {:<18.2}",
                row.label, row.avg_time_ms, row.avg_memory_mb, row.avg_cpu_percent, row.total_energy_mj
            )?;
        }

        writeln!(out, "\n{}", "=".repeat(WIDE))?;
        writeln!(out, "BEST PERFORMERS")?;
        writeln!(out, "{}", "=".repeat(WIDE))?;

        if let Some(fastest) = best_by(&rows, |r| r.avg_time_ms) {
            writeln!(out, "\nFastest Inference: {}", fastest.label)?;
            writeln!(out, "   Time: {:.2} ms", fastest.avg_time_ms)?;
        }
        if let Some(memory) = best_by(&rows, |r| r.avg_memory_mb) {
            writeln!(out, "\nMost Memory Efficient: {}", memory.label)?;
            writeln!(out, "   Memory: {:.2} MB", memory.avg_memory_mb)?;
        }
        if let Some(cpu) = best_by(&rows, |r| r.avg_cpu_percent) {
            writeln!(out, "\nLowest CPU Usage: {}", cpu.label)?;
            writeln!(out, "   CPU: {:.2}%", cpu.avg_cpu_percent)?;
        }
        if let Some(energy) = best_by(&rows, |r| r.total_energy_mj) {
            writeln!(out, "\nMost Energy Efficient: {}", energy.label)?;
            writeln!(out, "   Energy: {:.2} mJ", energy.total_energy_mj)?;
        }

        writeln!(out, "\n{}", "=".repeat(WIDE))?;
        Ok(true)
    }

    pub fn export_csv(&self, output: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(output)?;

        writer.write_record([
            "Device ID",
            "Model Name",
            "Total Inferences",
            "Avg Inference Time (ms)",
            "Min Inference Time (ms)",
            "Max Inference Time (ms)",
            "Avg Memory (MB)",
            "Min Memory (MB)",
            "Max Memory (MB)",
            "Avg CPU (%)",
            "Min CPU (%)",
            "Max CPU (%)",
            "Total Energy (mJ)",
            "Avg Energy (mJ)",
            "Min Energy (mJ)",
            "Max Energy (mJ)",
        ])?;

        for s in self.summaries.values() {
            let t = s.inference_time_ms;
            let m = s.memory_usage_mb;
            let c = s.cpu_usage_percent;
            let e = s.energy_consumption_mj;

            let mut record = vec![
                s.device_id.clone(),
                s.model_name.clone(),
                s.total_inferences.to_string(),
            ];
            record.extend(
                [
                    t.avg, t.min, t.max, m.avg, m.min, m.max, c.avg, c.min, c.max, e.total, e.avg,
                    e.min, e.max,
                ]
                .iter()
                .map(ToString::to_string),
            );
            writer.write_record(&record)?;
        }

        writer.flush()?;
        info!("Exported metrics to {}", output.display());
        Ok(())
    }
}

/// Lowest value of `metric`; the first row wins ties.
fn best_by(rows: &[Comparison], metric: impl Fn(&Comparison) -> f64) -> Option<&Comparison> {
    rows.iter().min_by(|a, b| metric(a).total_cmp(&metric(b)))
}

/// The statistics summary of a metrics file, if it has one.
fn read_summary(path: &Path) -> std::result::Result<Option<MetricsSummary>, Box<dyn std::error::Error>> {
    let mut value: Value = serde_json::from_str(&fs::read_to_string(path)?)?;

    let Some(summary) = value.get_mut("summary").map(Value::take) else {
        return Ok(None);
    };

    match serde_json::from_value(summary)? {
        Summary::Available(summary) => Ok(Some(summary)),
        Summary::Empty { .. } => Ok(None),
    }
}
