//! Resource probing and the Supervisor's rolling window of health samples.

use chrono::Duration as ChronoDuration;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::time::Duration;

use crate::models::HealthSample;

/// Host resource readings. `None` means the platform could not report it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceUsage {
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
}

#[cfg_attr(test, mockall::automock)]
pub trait ResourceProbe: Send + Sync + 'static {
    fn sample(&self) -> ResourceUsage;
}

/// Reads `/proc/stat` and `/proc/meminfo`.
///
/// CPU usage is the busy share of jiffies since the previous call, so the
/// first reading after construction is `None`.
#[derive(Default)]
pub struct ProcfsProbe {
    last_cpu: Mutex<Option<(u64, u64)>>,
}

impl ProcfsProbe {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn cpu_percent(&self) -> Option<f64> {
        let stat = std::fs::read_to_string("/proc/stat").ok()?;
        let (busy, total) = parse_cpu_line(&stat)?;
        let mut last = self.last_cpu.lock();
        let previous = last.replace((busy, total));
        let (prev_busy, prev_total) = previous?;
        let total_delta = total.saturating_sub(prev_total);
        if total_delta == 0 {
            return Some(0.0);
        }
        Some(busy.saturating_sub(prev_busy) as f64 * 100.0 / total_delta as f64)
    }

    fn memory_percent() -> Option<f64> {
        let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
        parse_meminfo(&meminfo)
    }
}

impl ResourceProbe for ProcfsProbe {
    fn sample(&self) -> ResourceUsage {
        ResourceUsage {
            cpu_percent: self.cpu_percent(),
            memory_percent: Self::memory_percent(),
        }
    }
}

/// Returns (busy, total) jiffies from the aggregate `cpu` line.
fn parse_cpu_line(stat: &str) -> Option<(u64, u64)> {
    let line = stat.lines().find(|l| l.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|v| v.parse().ok())
        .collect();
    if fields.len() < 4 {
        return None;
    }
    let total: u64 = fields.iter().sum();
    // idle + iowait
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    Some((total.saturating_sub(idle), total))
}

fn parse_meminfo(meminfo: &str) -> Option<f64> {
    let field = |name: &str| -> Option<u64> {
        meminfo
            .lines()
            .find(|l| l.starts_with(name))?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()
    };
    let total = field("MemTotal:")?;
    let available = field("MemAvailable:")?;
    if total == 0 {
        return None;
    }
    Some(total.saturating_sub(available) as f64 * 100.0 / total as f64)
}

/// Fixed readings, adjustable at runtime. Used where procfs is unavailable.
#[derive(Default)]
pub struct StaticProbe {
    usage: Mutex<ResourceUsage>,
}

impl StaticProbe {
    #[must_use]
    pub fn new(cpu_percent: f64, memory_percent: f64) -> Self {
        Self {
            usage: Mutex::new(ResourceUsage {
                cpu_percent: Some(cpu_percent),
                memory_percent: Some(memory_percent),
            }),
        }
    }

    pub fn set(&self, cpu_percent: f64, memory_percent: f64) {
        *self.usage.lock() = ResourceUsage {
            cpu_percent: Some(cpu_percent),
            memory_percent: Some(memory_percent),
        };
    }
}

impl ResourceProbe for StaticProbe {
    fn sample(&self) -> ResourceUsage {
        *self.usage.lock()
    }
}

/// Append-only window of samples bounded by age and count.
pub struct HealthStore {
    samples: RwLock<VecDeque<HealthSample>>,
    retention: Duration,
    max_samples: usize,
}

impl HealthStore {
    #[must_use]
    pub fn new(retention: Duration, max_samples: usize) -> Self {
        Self {
            samples: RwLock::new(VecDeque::new()),
            retention,
            max_samples: max_samples.max(1),
        }
    }

    /// Append a sample and evict everything older than the retention
    /// horizon, measured from the new sample's timestamp.
    pub fn push(&self, sample: HealthSample) {
        let horizon = ChronoDuration::from_std(self.retention)
            .ok()
            .and_then(|r| sample.at.checked_sub_signed(r));

        let mut samples = self.samples.write();
        samples.push_back(sample);
        if let Some(horizon) = horizon {
            while samples.front().is_some_and(|s| s.at < horizon) {
                samples.pop_front();
            }
        }
        while samples.len() > self.max_samples {
            samples.pop_front();
        }
    }

    #[must_use]
    pub fn latest(&self) -> Option<HealthSample> {
        self.samples.read().back().cloned()
    }

    /// Samples oldest first.
    #[must_use]
    pub fn samples(&self) -> Vec<HealthSample> {
        self.samples.read().iter().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.read().is_empty()
    }
}
