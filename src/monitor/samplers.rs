//! Built-in host-resource samplers for the resource monitor: CPU, memory, disk I/O,
//! and network, each a [`JobClass`] that samples `/proc` once per iteration
//! and records the delta since its previous read. Linux-only — callers on
//! other platforms should not register these in their [`Catalog`].
//!
//! [`Catalog`]: crate::plugin::Catalog

use std::fs;
use std::time::Duration;

use crate::job::tracker::StatTracker;
use crate::plugin::{JobClass, PluginError, ThreadContext};
use crate::wire::message::Parameter;

const SAMPLE_PERIOD: Duration = Duration::from_secs(1);

fn register(ctx: &dyn ThreadContext, display_name: &str) -> StatTracker {
    let tracker = StatTracker::new(display_name.to_string(), ctx.thread_id().to_string(), 1);
    ctx.register_tracker(tracker.clone());
    tracker
}

/// Total CPU-busy time as a fraction of the sampling window, read from the
/// aggregate `cpu` line of `/proc/stat` (fields are USER_HZ jiffies; this
/// samples at a fixed 1s period so jiffies-per-second approximates percent
/// busy well enough for a reference monitor class).
pub struct CpuSampler {
    tracker: Option<StatTracker>,
    previous_total: Option<(u64, u64)>, // (busy, total)
}

impl CpuSampler {
    pub fn new() -> Self {
        Self { tracker: None, previous_total: None }
    }
}

impl Default for CpuSampler {
    fn default() -> Self {
        Self::new()
    }
}

fn read_cpu_jiffies() -> std::io::Result<(u64, u64)> {
    let contents = fs::read_to_string("/proc/stat")?;
    let line = contents
        .lines()
        .next()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "empty /proc/stat"))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|f| f.parse().ok())
        .collect();
    if fields.len() < 4 {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "short cpu line"));
    }
    // user, nice, system, idle, iowait, irq, softirq, steal, ...
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    let total: u64 = fields.iter().sum();
    Ok((total - idle, total))
}

impl JobClass for CpuSampler {
    fn initialize_job_thread(
        &mut self,
        ctx: &dyn ThreadContext,
        _parameters: &[Parameter],
    ) -> Result<(), PluginError> {
        self.tracker = Some(register(ctx, "CPU Utilization (Percent)"));
        Ok(())
    }

    fn run_one_iteration(&mut self, ctx: &dyn ThreadContext) -> Result<(), PluginError> {
        let (busy, total) = read_cpu_jiffies().map_err(|e| {
            ctx.log(&format!("failed to read /proc/stat: {e}"));
            anyhow::anyhow!(e)
        })?;
        if let Some((prev_busy, prev_total)) = self.previous_total {
            let d_total = total.saturating_sub(prev_total);
            let d_busy = busy.saturating_sub(prev_busy);
            let percent = if d_total > 0 { (d_busy as f64 / d_total as f64) * 100.0 } else { 0.0 };
            if let Some(t) = &self.tracker {
                t.add_sample(percent);
            }
        }
        self.previous_total = Some((busy, total));
        std::thread::sleep(SAMPLE_PERIOD);
        Ok(())
    }
}

/// Used-memory percentage, read from `/proc/meminfo`'s `MemTotal`/`MemAvailable`.
pub struct MemorySampler {
    tracker: Option<StatTracker>,
}

impl MemorySampler {
    pub fn new() -> Self {
        Self { tracker: None }
    }
}

impl Default for MemorySampler {
    fn default() -> Self {
        Self::new()
    }
}

fn read_meminfo_kb(field: &str, contents: &str) -> Option<u64> {
    contents
        .lines()
        .find(|l| l.starts_with(field))
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|v| v.parse().ok())
}

impl JobClass for MemorySampler {
    fn initialize_job_thread(
        &mut self,
        ctx: &dyn ThreadContext,
        _parameters: &[Parameter],
    ) -> Result<(), PluginError> {
        self.tracker = Some(register(ctx, "Memory Utilization (Percent)"));
        Ok(())
    }

    fn run_one_iteration(&mut self, ctx: &dyn ThreadContext) -> Result<(), PluginError> {
        let contents = fs::read_to_string("/proc/meminfo").map_err(|e| {
            ctx.log(&format!("failed to read /proc/meminfo: {e}"));
            anyhow::anyhow!(e)
        })?;
        let total = read_meminfo_kb("MemTotal:", &contents).unwrap_or(0);
        let available = read_meminfo_kb("MemAvailable:", &contents).unwrap_or(total);
        let percent = if total > 0 {
            ((total.saturating_sub(available)) as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        if let Some(t) = &self.tracker {
            t.add_sample(percent);
        }
        std::thread::sleep(SAMPLE_PERIOD);
        Ok(())
    }
}

/// Sectors read/written per second across every block device, from
/// `/proc/diskstats` fields 6 and 10 (sectors read / sectors written).
pub struct DiskIoSampler {
    tracker: Option<StatTracker>,
    previous: Option<u64>,
}

impl DiskIoSampler {
    pub fn new() -> Self {
        Self { tracker: None, previous: None }
    }
}

impl Default for DiskIoSampler {
    fn default() -> Self {
        Self::new()
    }
}

fn read_disk_sectors() -> std::io::Result<u64> {
    let contents = fs::read_to_string("/proc/diskstats")?;
    let mut total = 0u64;
    for line in contents.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 {
            continue;
        }
        total += fields[5].parse::<u64>().unwrap_or(0);
        total += fields[9].parse::<u64>().unwrap_or(0);
    }
    Ok(total)
}

impl JobClass for DiskIoSampler {
    fn initialize_job_thread(
        &mut self,
        ctx: &dyn ThreadContext,
        _parameters: &[Parameter],
    ) -> Result<(), PluginError> {
        self.tracker = Some(register(ctx, "Disk I/O (Sectors/Sec)"));
        Ok(())
    }

    fn run_one_iteration(&mut self, ctx: &dyn ThreadContext) -> Result<(), PluginError> {
        let total = read_disk_sectors().map_err(|e| {
            ctx.log(&format!("failed to read /proc/diskstats: {e}"));
            anyhow::anyhow!(e)
        })?;
        if let Some(prev) = self.previous {
            let delta = total.saturating_sub(prev);
            if let Some(t) = &self.tracker {
                t.add_sample(delta as f64 / SAMPLE_PERIOD.as_secs_f64());
            }
        }
        self.previous = Some(total);
        std::thread::sleep(SAMPLE_PERIOD);
        Ok(())
    }
}

/// Bytes received+transmitted per second across every interface, from
/// `/proc/net/dev`.
pub struct NetworkSampler {
    tracker: Option<StatTracker>,
    previous: Option<u64>,
}

impl NetworkSampler {
    pub fn new() -> Self {
        Self { tracker: None, previous: None }
    }
}

impl Default for NetworkSampler {
    fn default() -> Self {
        Self::new()
    }
}

fn read_net_bytes() -> std::io::Result<u64> {
    let contents = fs::read_to_string("/proc/net/dev")?;
    let mut total = 0u64;
    for line in contents.lines().skip(2) {
        let Some((_, rest)) = line.split_once(':') else { continue };
        let fields: Vec<&str> = rest.split_whitespace().collect();
        if fields.len() < 9 {
            continue;
        }
        total += fields[0].parse::<u64>().unwrap_or(0); // rx bytes
        total += fields[8].parse::<u64>().unwrap_or(0); // tx bytes
    }
    Ok(total)
}

impl JobClass for NetworkSampler {
    fn initialize_job_thread(
        &mut self,
        ctx: &dyn ThreadContext,
        _parameters: &[Parameter],
    ) -> Result<(), PluginError> {
        self.tracker = Some(register(ctx, "Network I/O (Bytes/Sec)"));
        Ok(())
    }

    fn run_one_iteration(&mut self, ctx: &dyn ThreadContext) -> Result<(), PluginError> {
        let total = read_net_bytes().map_err(|e| {
            ctx.log(&format!("failed to read /proc/net/dev: {e}"));
            anyhow::anyhow!(e)
        })?;
        if let Some(prev) = self.previous {
            let delta = total.saturating_sub(prev);
            if let Some(t) = &self.tracker {
                t.add_sample(delta as f64 / SAMPLE_PERIOD.as_secs_f64());
            }
        }
        self.previous = Some(total);
        std::thread::sleep(SAMPLE_PERIOD);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meminfo_parses_known_fields() {
        let sample = "MemTotal:       16384000 kB\nMemFree:         2000000 kB\nMemAvailable:    8000000 kB\n";
        assert_eq!(read_meminfo_kb("MemTotal:", sample), Some(16_384_000));
        assert_eq!(read_meminfo_kb("MemAvailable:", sample), Some(8_000_000));
        assert_eq!(read_meminfo_kb("Missing:", sample), None);
    }
}
