//! Periodic CPU and memory sampling.
//!
//! [`SystemMonitor`] owns an optional interval task that turns resource
//! samples into util events. The task runs only while the active source mask
//! asks for CPU or RAM, and it re-reads the mask on every tick so toggling
//! one of the two takes effect without a restart.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sysinfo::{ProcessesToUpdate, System};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::chain::EventSink;
use crate::error::{LogError, Result};
use crate::types::{Level, LogEvent, Priority, Source, SourceMask};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Shortest interval the sampling task will tick at.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Sampler timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Time between samples.
    #[serde(rename = "interval_ms", with = "crate::config::millis")]
    pub interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
        }
    }
}

impl MonitorConfig {
    /// Sets the sampling interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Rejects intervals shorter than [`MIN_INTERVAL`].
    pub fn validate(&self) -> Result<()> {
        if self.interval < MIN_INTERVAL {
            return Err(LogError::InvalidConfig(format!(
                "monitor interval must be at least {} ms",
                MIN_INTERVAL.as_millis()
            )));
        }
        Ok(())
    }
}

/// Cumulative CPU time counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTicks {
    /// Time in user mode.
    pub user: u64,
    /// Time in kernel mode.
    pub system: u64,
    /// Idle time.
    pub idle: u64,
    /// Time in user mode at low priority.
    pub nice: u64,
}

impl CpuTicks {
    /// Parses the aggregate `cpu` line of a `/proc/stat` document.
    pub fn parse(stat: &str) -> Result<Self> {
        let line = stat
            .lines()
            .find(|line| line.starts_with("cpu "))
            .ok_or_else(|| LogError::Sampling("no aggregate cpu line".to_string()))?;
        let fields = line
            .split_whitespace()
            .skip(1)
            .take(4)
            .map(str::parse::<u64>)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| LogError::ParseError(format!("bad cpu counter: {e}")))?;
        let &[user, nice, system, idle] = fields.as_slice() else {
            return Err(LogError::ParseError("truncated cpu line".to_string()));
        };
        Ok(Self {
            user,
            system,
            idle,
            nice,
        })
    }

    /// Share of each counter in the time elapsed since `previous`.
    pub fn usage_since(&self, previous: &Self) -> CpuUsage {
        let user = self.user.saturating_sub(previous.user) as f64;
        let system = self.system.saturating_sub(previous.system) as f64;
        let idle = self.idle.saturating_sub(previous.idle) as f64;
        let nice = self.nice.saturating_sub(previous.nice) as f64;
        let total = user + system + idle + nice;
        if total <= 0.0 {
            return CpuUsage::default();
        }
        CpuUsage {
            user: user / total * 100.0,
            system: system / total * 100.0,
            idle: idle / total * 100.0,
            nice: nice / total * 100.0,
        }
    }
}

/// CPU time split in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CpuUsage {
    /// User mode.
    pub user: f64,
    /// Kernel mode.
    pub system: f64,
    /// Idle.
    pub idle: f64,
    /// Low-priority user mode.
    pub nice: f64,
}

impl fmt::Display for CpuUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "user: {:.2}%, system: {:.2}%, idle: {:.2}%, nice: {:.2}%",
            self.user, self.system, self.idle, self.nice
        )
    }
}

/// Memory used by this process, in MB.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProcessMemory {
    /// Resident set size.
    pub resident: f64,
    /// Peak resident set size.
    pub resident_max: f64,
    /// Virtual size.
    pub virtual_size: f64,
}

impl ProcessMemory {
    /// Converts byte counts.
    pub fn from_bytes(resident: u64, resident_max: u64, virtual_size: u64) -> Self {
        Self {
            resident: resident as f64 / BYTES_PER_MB,
            resident_max: resident_max as f64 / BYTES_PER_MB,
            virtual_size: virtual_size as f64 / BYTES_PER_MB,
        }
    }
}

impl fmt::Display for ProcessMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "resident: {:.2} MB, residentMax: {:.2} MB, virtual: {:.2} MB",
            self.resident, self.resident_max, self.virtual_size
        )
    }
}

/// System-wide memory breakdown, in MB.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SystemMemory {
    /// Unused memory.
    pub free: f64,
    /// Recently used memory.
    pub active: f64,
    /// Reclaimable memory.
    pub inactive: f64,
    /// Memory that cannot be paged out.
    pub wired: f64,
    /// Memory held compressed.
    pub compressed: f64,
}

impl fmt::Display for SystemMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "free: {:.2} MB, active: {:.2} MB, inactive: {:.2} MB, wired: {:.2} MB, compressed: {:.2} MB",
            self.free, self.active, self.inactive, self.wired, self.compressed
        )
    }
}

/// Source of resource figures for the monitor.
pub trait ResourceSampler: Send + Sync {
    /// CPU split since the previous call.
    fn sample_cpu(&self) -> Result<CpuUsage>;

    /// Memory used by this process.
    fn sample_process_memory(&self) -> Result<ProcessMemory>;

    /// System-wide memory breakdown.
    fn sample_system_memory(&self) -> Result<SystemMemory>;
}

/// Host sampler backed by `/proc` on Linux and `sysinfo` elsewhere.
pub struct SystemSampler {
    system: Mutex<System>,
    #[cfg_attr(not(target_os = "linux"), allow(dead_code))]
    previous: Mutex<Option<CpuTicks>>,
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemSampler {
    /// Creates a sampler. The first CPU sample covers the time since boot.
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            previous: Mutex::new(None),
        }
    }
}

impl ResourceSampler for SystemSampler {
    #[cfg(target_os = "linux")]
    fn sample_cpu(&self) -> Result<CpuUsage> {
        let current = CpuTicks::parse(&std::fs::read_to_string("/proc/stat")?)?;
        let previous = self.previous.lock().replace(current).unwrap_or_default();
        Ok(current.usage_since(&previous))
    }

    #[cfg(not(target_os = "linux"))]
    fn sample_cpu(&self) -> Result<CpuUsage> {
        let mut system = self.system.lock();
        system.refresh_cpu_usage();
        let busy = f64::from(system.global_cpu_usage());
        Ok(CpuUsage {
            user: busy,
            system: 0.0,
            idle: 100.0 - busy,
            nice: 0.0,
        })
    }

    fn sample_process_memory(&self) -> Result<ProcessMemory> {
        let pid = sysinfo::get_current_pid().map_err(|e| LogError::Sampling(e.to_string()))?;
        let mut system = self.system.lock();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), false);
        let process = system
            .process(pid)
            .ok_or_else(|| LogError::Sampling("current process not listed".to_string()))?;
        let resident = process.memory();
        let resident_max = peak_resident_bytes().unwrap_or(resident);
        Ok(ProcessMemory::from_bytes(
            resident,
            resident_max,
            process.virtual_memory(),
        ))
    }

    #[cfg(target_os = "linux")]
    fn sample_system_memory(&self) -> Result<SystemMemory> {
        let meminfo = std::fs::read_to_string("/proc/meminfo")?;
        let mb = |key: &str| field_kb(&meminfo, key).unwrap_or(0) as f64 / 1024.0;
        Ok(SystemMemory {
            free: mb("MemFree"),
            active: mb("Active"),
            inactive: mb("Inactive"),
            wired: mb("Unevictable"),
            compressed: mb("Zswap"),
        })
    }

    #[cfg(not(target_os = "linux"))]
    fn sample_system_memory(&self) -> Result<SystemMemory> {
        let mut system = self.system.lock();
        system.refresh_memory();
        let free = system.free_memory();
        Ok(SystemMemory {
            free: free as f64 / BYTES_PER_MB,
            active: system.used_memory() as f64 / BYTES_PER_MB,
            inactive: system.available_memory().saturating_sub(free) as f64 / BYTES_PER_MB,
            wired: 0.0,
            compressed: 0.0,
        })
    }
}

#[cfg(target_os = "linux")]
fn peak_resident_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    field_kb(&status, "VmHWM").map(|kb| kb * 1024)
}

#[cfg(not(target_os = "linux"))]
fn peak_resident_bytes() -> Option<u64> {
    None
}

/// Reads a `Key:   1234 kB` field from a `/proc` document.
#[cfg_attr(not(any(target_os = "linux", test)), allow(dead_code))]
fn field_kb(document: &str, key: &str) -> Option<u64> {
    document.lines().find_map(|line| {
        line.strip_prefix(key)?
            .strip_prefix(':')?
            .split_whitespace()
            .next()?
            .parse()
            .ok()
    })
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Starts and stops the sampling task as the active sources change.
pub struct SystemMonitor {
    sink: Weak<dyn EventSink>,
    sampler: Arc<dyn ResourceSampler>,
    config: MonitorConfig,
    sources: Arc<AtomicU8>,
    running: Option<Running>,
}

impl fmt::Debug for SystemMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemMonitor")
            .field("config", &self.config)
            .field("sources", &self.sources())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl SystemMonitor {
    /// Creates an idle monitor feeding `sink`.
    pub fn new(
        sink: Weak<dyn EventSink>,
        sampler: Arc<dyn ResourceSampler>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            sink,
            sampler,
            config,
            sources: Arc::new(AtomicU8::new(SourceMask::NONE.bits())),
            running: None,
        }
    }

    /// Current timing.
    pub const fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// The mask last passed to [`monitor`](Self::monitor).
    pub fn sources(&self) -> SourceMask {
        SourceMask::from_bits_truncate(self.sources.load(Ordering::Relaxed))
    }

    /// True while the sampling task is live.
    ///
    /// A task that ended on its own, because its runtime shut down or its
    /// sink was dropped, does not count.
    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
    }

    /// Applies a new active source mask.
    ///
    /// Starts the task when CPU or RAM is requested and none runs. Stops it
    /// when neither is requested.
    pub fn monitor(&mut self, sources: SourceMask) {
        self.sources.store(sources.bits(), Ordering::Relaxed);
        if self.running.as_ref().is_some_and(|running| running.task.is_finished()) {
            self.running = None;
            debug!("resource monitor task ended, clearing it");
        }
        match (sources.wants_sampling(), self.is_running()) {
            (true, false) => self.start(),
            (false, true) => self.stop(),
            _ => {}
        }
    }

    /// Replaces the timing, restarting a running task.
    ///
    /// Intervals below [`MIN_INTERVAL`] are raised to it when the task starts.
    pub fn reconfigure(&mut self, config: MonitorConfig) {
        self.config = config;
        if self.is_running() {
            self.stop();
            self.start();
        }
    }

    fn start(&mut self) {
        let Ok(runtime) = Handle::try_current() else {
            warn!("no tokio runtime, resource sampling stays idle");
            return;
        };
        if let Err(error) = self.config.validate() {
            warn!(%error, "raising resource monitor interval");
        }
        let period = self.config.interval.max(MIN_INTERVAL);
        let cancel = CancellationToken::new();
        let task = runtime.spawn(sample_loop(
            Weak::clone(&self.sink),
            Arc::clone(&self.sampler),
            Arc::clone(&self.sources),
            period,
            cancel.clone(),
        ));
        debug!(interval_ms = period.as_millis() as u64, "resource monitor started");
        self.running = Some(Running { cancel, task });
    }

    fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.cancel.cancel();
            debug!("resource monitor stopped");
        }
    }
}

impl Drop for SystemMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sample_loop(
    sink: Weak<dyn EventSink>,
    sampler: Arc<dyn ResourceSampler>,
    sources: Arc<AtomicU8>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let mask = SourceMask::from_bits_truncate(sources.load(Ordering::Relaxed));
                if sink.strong_count() == 0 {
                    debug!("event sink dropped, resource monitor exiting");
                    break;
                }
                let sampler = Arc::clone(&sampler);
                let sampled = tokio::task::spawn_blocking(move || sample(sampler.as_ref(), mask));
                let lines = match sampled.await {
                    Ok(lines) => lines,
                    Err(error) => {
                        warn!(%error, "resource sampling task aborted");
                        continue;
                    }
                };
                let Some(sink) = sink.upgrade() else {
                    debug!("event sink dropped, resource monitor exiting");
                    break;
                };
                for (source, message) in lines {
                    sink.dispatch(LogEvent::new(Priority::LOWEST, source, Level::Util, "", message));
                }
            }
        }
    }
}

fn sample(sampler: &dyn ResourceSampler, mask: SourceMask) -> Vec<(Source, String)> {
    let mut lines = Vec::new();
    if mask.contains(Source::Cpu) {
        lines.push((Source::Cpu, render(sampler.sample_cpu())));
    }
    if mask.contains(Source::Ram) {
        lines.push((Source::Ram, render(sampler.sample_process_memory())));
        lines.push((Source::Ram, render(sampler.sample_system_memory())));
    }
    lines
}

fn render<T: fmt::Display>(sample: Result<T>) -> String {
    match sample {
        Ok(figures) => figures.to_string(),
        Err(error) => {
            debug!(%error, "resource sampling failed");
            String::new()
        }
    }
}
