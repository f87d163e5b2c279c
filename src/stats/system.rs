//! Host diagnostics for the status handler
//!
//! CPU usage is derived from two consecutive samples of `/proc/stat`, taken by
//! a background task once per second. Memory and load are read on demand.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;

/// Interval between `/proc/stat` samples
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Aggregate CPU jiffies from the `cpu` line of `/proc/stat`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuTimes {
    /// Parse the aggregate `cpu` line out of `/proc/stat` contents
    pub fn parse(contents: &str) -> Option<Self> {
        let line = contents
            .lines()
            .find(|l| l.split_whitespace().next() == Some("cpu"))?;
        let mut fields = line
            .split_whitespace()
            .skip(1)
            .map(|v| v.parse::<u64>().ok());

        let mut next = || fields.next().flatten().unwrap_or(0);
        let times = Self {
            user: next(),
            nice: next(),
            system: next(),
            idle: next(),
            iowait: next(),
            irq: next(),
            softirq: next(),
            steal: next(),
        };
        Some(times)
    }

    pub fn total(&self) -> u64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
    }
}

/// CPU usage percentages between two samples
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CpuUsage {
    pub usr: f64,
    pub sys: f64,
    pub nic: f64,
    pub idle: f64,
    pub io: f64,
    pub irq: f64,
    pub sirq: f64,
}

impl CpuUsage {
    /// Compute usage from the previous and current sample
    pub fn between(prev: &CpuTimes, cur: &CpuTimes) -> Self {
        let total = cur.total().saturating_sub(prev.total()).max(1);
        let pct = |c: u64, p: u64| {
            let delta = c.saturating_sub(p).min(total);
            (delta * 1000 / total) as f64 / 10.0
        };
        Self {
            usr: pct(cur.user, prev.user),
            sys: pct(cur.system, prev.system),
            nic: pct(cur.nice, prev.nice),
            idle: pct(cur.idle, prev.idle),
            io: pct(cur.iowait, prev.iowait),
            irq: pct(cur.irq, prev.irq),
            sirq: pct(cur.softirq, prev.softirq),
        }
    }
}

/// Memory figures in KiB from `/proc/meminfo`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryInfo {
    pub used: u64,
    pub free: u64,
    pub buffers: u64,
    pub cached: u64,
}

impl MemoryInfo {
    pub fn parse(contents: &str) -> Option<Self> {
        let field = |name: &str| {
            contents.lines().find_map(|l| {
                let rest = l.strip_prefix(name)?.strip_prefix(':')?;
                rest.split_whitespace().next()?.parse::<u64>().ok()
            })
        };
        let total = field("MemTotal")?;
        let free = field("MemFree")?;
        Some(Self {
            used: total.saturating_sub(free),
            free,
            buffers: field("Buffers").unwrap_or(0),
            cached: field("Cached").unwrap_or(0),
        })
    }
}

#[derive(Debug, Default)]
struct Samples {
    previous: CpuTimes,
    current: CpuTimes,
}

/// Diagnostics context shared with the status handler
#[derive(Debug)]
pub struct SystemStats {
    proc_root: PathBuf,
    samples: Mutex<Samples>,
}

impl SystemStats {
    /// Read from the real `/proc`
    pub fn new() -> Self {
        Self::with_proc_root("/proc")
    }

    /// Read from an alternative proc root (used by tests)
    pub fn with_proc_root(root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: root.into(),
            samples: Mutex::new(Samples::default()),
        }
    }

    /// Take one `/proc/stat` sample
    pub async fn sample(&self) {
        let path = self.proc_root.join("stat");
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                if let Some(times) = CpuTimes::parse(&contents) {
                    let mut samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
                    samples.previous = samples.current;
                    samples.current = times;
                }
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Failed to sample cpu stats");
            }
        }
    }

    /// CPU usage between the last two samples
    pub fn cpu(&self) -> CpuUsage {
        let samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        CpuUsage::between(&samples.previous, &samples.current)
    }

    /// Current memory figures, `None` when unavailable
    pub fn memory(&self) -> Option<MemoryInfo> {
        let contents = std::fs::read_to_string(self.proc_root.join("meminfo")).ok()?;
        MemoryInfo::parse(&contents)
    }

    /// Contents of `loadavg`, trimmed
    pub fn load(&self) -> Option<String> {
        std::fs::read_to_string(self.proc_root.join("loadavg"))
            .ok()
            .map(|s| s.trim().to_string())
    }

    /// Spawn the 1 Hz sampling task
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn_sampler(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let stats = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SAMPLE_INTERVAL);
            loop {
                ticker.tick().await;
                stats.sample().await;
            }
        })
    }
}

impl Default for SystemStats {
    fn default() -> Self {
        Self::new()
    }
}
