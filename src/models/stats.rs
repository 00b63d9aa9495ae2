// Live stats records pushed over the stats sockets

use serde::{Deserialize, Serialize};

/// One processed engine stats sample for a single container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSample {
    pub cpu_percent: f64,
    pub mem_usage: u64,
    pub mem_limit: u64,
    pub mem_percent: f64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub io_read: u64,
    pub io_write: u64,
}

/// Host-wide sum of the latest samples of every attached container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rollup {
    pub engine_version: String,
    pub uptime_sec: u64,
    pub cpu_percent: f64,
    pub mem_usage: u64,
    pub mem_limit: u64,
    pub mem_percent: f64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub io_read: u64,
    pub io_write: u64,
}

impl Rollup {
    /// Zeroed metrics; sent first so the client can render version and uptime.
    pub fn header(engine_version: &str, uptime_sec: u64) -> Self {
        Self {
            engine_version: engine_version.to_string(),
            uptime_sec,
            ..Default::default()
        }
    }
}

/// usage / limit as a percentage; 0 when there is no limit.
pub fn percent_of(usage: u64, limit: u64) -> f64 {
    if limit == 0 {
        0.0
    } else {
        usage as f64 / limit as f64 * 100.0
    }
}
