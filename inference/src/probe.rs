use log::warn;
use std::time::{Duration, Instant};
use sysinfo::{Pid, System};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Resource readings for the current process. Readings that cannot be
/// taken are reported as `0.0`.
pub trait ResourceProbe: Send {
    /// Resident set size in MB.
    fn memory_mb(&mut self) -> f64;

    /// CPU utilization since the previous reading, in percent of one core.
    fn cpu_percent(&mut self) -> f64;
}

/// User plus system CPU time consumed by this process, in seconds.
#[cfg(unix)]
fn process_cpu_seconds() -> Option<f64> {
    // SAFETY: getrusage only writes into the zeroed struct passed to it.
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
    if rc != 0 {
        warn!("Could not get CPU time: {}", std::io::Error::last_os_error());
        return None;
    }
    let user = usage.ru_utime.tv_sec as f64 + usage.ru_utime.tv_usec as f64 * 1e-6;
    let sys = usage.ru_stime.tv_sec as f64 + usage.ru_stime.tv_usec as f64 * 1e-6;
    Some(user + sys)
}

#[cfg(not(unix))]
fn process_cpu_seconds() -> Option<f64> {
    None
}

#[derive(Debug, Clone, Copy)]
struct CpuReading {
    cpu_seconds: f64,
    at: Instant,
}

impl CpuReading {
    fn now() -> Option<Self> {
        process_cpu_seconds().map(|cpu_seconds| Self {
            cpu_seconds,
            at: Instant::now(),
        })
    }
}

/// Probe for the running process: RSS from `sysinfo`, CPU as the process
/// CPU-time delta over the wall-clock delta between readings.
pub struct ProcessProbe {
    system: System,
    pid: Option<Pid>,
    last_cpu: Option<CpuReading>,
}

impl ProcessProbe {
    /// The CPU baseline is taken here, so the first [`cpu_percent`]
    /// reading already covers the time since construction.
    ///
    /// [`cpu_percent`]: ResourceProbe::cpu_percent
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!("Could not determine current pid: {}", e);
                None
            }
        };

        Self {
            system: System::new(),
            pid,
            last_cpu: CpuReading::now(),
        }
    }
}

impl Default for ProcessProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for ProcessProbe {
    fn memory_mb(&mut self) -> f64 {
        let Some(pid) = self.pid else {
            return 0.0;
        };
        if !self.system.refresh_process(pid) {
            warn!("Could not get memory info");
            return 0.0;
        }
        match self.system.process(pid) {
            Some(process) => process.memory() as f64 / BYTES_PER_MB,
            None => 0.0,
        }
    }

    fn cpu_percent(&mut self) -> f64 {
        let Some(now) = CpuReading::now() else {
            return 0.0;
        };
        let Some(previous) = self.last_cpu.replace(now) else {
            return 0.0;
        };

        let wall = now.at.duration_since(previous.at).as_secs_f64();
        if wall <= 0.0 {
            return 0.0;
        }
        ((now.cpu_seconds - previous.cpu_seconds) / wall * 100.0).max(0.0)
    }
}

/// Background CPU sampling for the duration of one call.
///
/// Samples are taken every `period` on a spawned task and sent back over a
/// channel; [`finish`](Self::finish) stops the task and collects them.
pub struct CpuSampler {
    stop: oneshot::Sender<()>,
    samples: mpsc::UnboundedReceiver<f64>,
    handle: JoinHandle<()>,
}

impl CpuSampler {
    pub fn start<P>(mut probe: P, period: Duration) -> Self
    where
        P: ResourceProbe + 'static,
    {
        let (stop, mut stopped) = oneshot::channel();
        let (tx, samples) = mpsc::unbounded_channel();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick fires immediately; samples start one period in.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => {
                        if tx.send(probe.cpu_percent()).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Self {
            stop,
            samples,
            handle,
        }
    }

    /// Stop sampling and return everything collected. A task that does not
    /// stop within `join_timeout` is abandoned.
    pub async fn finish(self, join_timeout: Duration) -> Vec<f64> {
        let Self {
            stop,
            mut samples,
            mut handle,
        } = self;

        let _ = stop.send(());
        if tokio::time::timeout(join_timeout, &mut handle).await.is_err() {
            warn!("CPU sampler did not stop within {:?}, abandoning it", join_timeout);
            handle.abort();
        }

        let mut collected = Vec::new();
        while let Ok(sample) = samples.try_recv() {
            collected.push(sample);
        }
        collected
    }
}
