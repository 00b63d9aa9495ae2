// Process raw Docker stats API responses into StatsSample.

use crate::models::{StatsSample, percent_of};
use bollard::models::ContainerStatsResponse;

/// Block-device bytes read/written, as reported by one of the engine's stats shapes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoBytes {
    pub read: u64,
    pub write: u64,
}

impl IoBytes {
    fn is_zero(&self) -> bool {
        self.read == 0 && self.write == 0
    }
}

type IoStrategy = fn(&ContainerStatsResponse) -> IoBytes;

/// Tried in order; the first non-zero result wins.
const IO_STRATEGIES: &[IoStrategy] = &[io_from_blkio_recursive, io_from_storage_stats];

/// Process a raw Docker stats response into a StatsSample.
/// Missing sections count as zero so every engine sample yields a record.
pub fn process_statistics(s: &ContainerStatsResponse) -> StatsSample {
    let mem_usage = s.memory_stats.as_ref().and_then(|m| m.usage).unwrap_or(0);
    let mem_limit = s.memory_stats.as_ref().and_then(|m| m.limit).unwrap_or(0);
    let (rx_bytes, tx_bytes) = network_bytes(s);
    let io = extract_io_bytes(s);

    StatsSample {
        cpu_percent: cpu_percent(s),
        mem_usage,
        mem_limit,
        mem_percent: percent_of(mem_usage, mem_limit),
        rx_bytes,
        tx_bytes,
        io_read: io.read,
        io_write: io.write,
    }
}

/// `(cpu_delta / system_delta) * online_cpus * 100`, clamped to `[0, 100 * online_cpus]`.
pub fn cpu_percent(s: &ContainerStatsResponse) -> f64 {
    let total = |c: Option<&bollard::models::ContainerCpuStats>| {
        c.and_then(|c| c.cpu_usage.as_ref())
            .and_then(|u| u.total_usage)
            .unwrap_or(0)
    };
    let system =
        |c: Option<&bollard::models::ContainerCpuStats>| c.and_then(|c| c.system_cpu_usage).unwrap_or(0);

    let cpu_delta = total(s.cpu_stats.as_ref()) as i128 - total(s.precpu_stats.as_ref()) as i128;
    let system_delta = system(s.cpu_stats.as_ref()) as i128 - system(s.precpu_stats.as_ref()) as i128;
    let online = online_cpus(s) as f64;
    if system_delta <= 0 || cpu_delta <= 0 {
        return 0.0;
    }
    let percent = (cpu_delta as f64 / system_delta as f64) * online * 100.0;
    percent.clamp(0.0, 100.0 * online)
}

/// `online_cpus`, else the length of `percpu_usage`, else 1.
pub fn online_cpus(s: &ContainerStatsResponse) -> u64 {
    let cpu = s.cpu_stats.as_ref();
    cpu.and_then(|c| c.online_cpus)
        .map(|n| n as u64)
        .filter(|n| *n > 0)
        .or_else(|| {
            cpu.and_then(|c| c.cpu_usage.as_ref())
                .and_then(|u| u.percpu_usage.as_ref())
                .map(|p| p.len() as u64)
                .filter(|n| *n > 0)
        })
        .unwrap_or(1)
}

/// Receive/transmit bytes summed over every interface.
pub fn network_bytes(s: &ContainerStatsResponse) -> (u64, u64) {
    s.networks.as_ref().map_or((0, 0), |n| {
        n.values().fold((0u64, 0u64), |(rx, tx), v| {
            (
                rx.saturating_add(v.rx_bytes.unwrap_or(0)),
                tx.saturating_add(v.tx_bytes.unwrap_or(0)),
            )
        })
    })
}

pub fn extract_io_bytes(s: &ContainerStatsResponse) -> IoBytes {
    IO_STRATEGIES
        .iter()
        .map(|strategy| strategy(s))
        .find(|io| !io.is_zero())
        .unwrap_or_default()
}

/// cgroup v1/v2 `blkio_stats.io_service_bytes_recursive` entries; op names vary in case.
pub fn io_from_blkio_recursive(s: &ContainerStatsResponse) -> IoBytes {
    let Some(entries) = s
        .blkio_stats
        .as_ref()
        .and_then(|b| b.io_service_bytes_recursive.as_ref())
    else {
        return IoBytes::default();
    };
    let mut io = IoBytes::default();
    for e in entries {
        let op = e.op.as_deref().unwrap_or_default().to_ascii_lowercase();
        let value = e.value.unwrap_or(0);
        if op.contains("read") {
            io.read = io.read.saturating_add(value);
        }
        if op.contains("write") {
            io.write = io.write.saturating_add(value);
        }
    }
    io
}

/// `storage_stats` (Windows engines).
pub fn io_from_storage_stats(s: &ContainerStatsResponse) -> IoBytes {
    s.storage_stats.as_ref().map_or(IoBytes::default(), |ss| IoBytes {
        read: ss.read_size_bytes.unwrap_or(0),
        write: ss.write_size_bytes.unwrap_or(0),
    })
}
