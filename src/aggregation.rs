// Host-wide rollup of per-container samples, and the per-connection table behind it.

use crate::models::{Rollup, StatsSample, percent_of};
use std::collections::{HashMap, HashSet};

/// Sum every sample; `mem_percent` comes from the summed usage/limit, not an average.
pub fn aggregate<'a>(
    samples: impl IntoIterator<Item = &'a StatsSample>,
    engine_version: &str,
    uptime_sec: u64,
) -> Rollup {
    let mut rollup = Rollup::header(engine_version, uptime_sec);
    for s in samples {
        rollup.cpu_percent += s.cpu_percent;
        rollup.mem_usage = rollup.mem_usage.saturating_add(s.mem_usage);
        rollup.mem_limit = rollup.mem_limit.saturating_add(s.mem_limit);
        rollup.rx_bytes = rollup.rx_bytes.saturating_add(s.rx_bytes);
        rollup.tx_bytes = rollup.tx_bytes.saturating_add(s.tx_bytes);
        rollup.io_read = rollup.io_read.saturating_add(s.io_read);
        rollup.io_write = rollup.io_write.saturating_add(s.io_write);
    }
    rollup.mem_percent = percent_of(rollup.mem_usage, rollup.mem_limit);
    rollup
}

/// Everything that can change one connection's rollup.
#[derive(Debug, Clone, PartialEq)]
pub enum RollupCommand {
    /// One-shot sample taken before the container's feed is attached.
    Seed(String, StatsSample),
    /// A live feed is now running for the container.
    Attach(String),
    /// Latest sample from an attached feed.
    Sample(String, StatsSample),
    /// Feed stopped (engine event, feed end or feed error); forget the container.
    Detach(String),
}

/// Latest sample per container plus the set of containers with a live feed.
/// Owned by a single connection; never shared.
#[derive(Debug, Default)]
pub struct RollupTable {
    latest: HashMap<String, StatsSample>,
    attached: HashSet<String>,
}

impl RollupTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one command; returns true when the rollup must be pushed again.
    pub fn apply(&mut self, command: RollupCommand) -> bool {
        match command {
            RollupCommand::Seed(id, sample) => {
                self.latest.insert(id, sample);
                false
            }
            RollupCommand::Attach(id) => {
                self.attached.insert(id);
                true
            }
            RollupCommand::Sample(id, sample) => {
                // late samples from an already detached feed are ignored
                if !self.attached.contains(&id) {
                    return false;
                }
                self.latest.insert(id, sample);
                true
            }
            RollupCommand::Detach(id) => {
                self.attached.remove(&id);
                self.latest.remove(&id);
                true
            }
        }
    }

    pub fn is_attached(&self, id: &str) -> bool {
        self.attached.contains(id)
    }

    pub fn rollup(&self, engine_version: &str, uptime_sec: u64) -> Rollup {
        aggregate(self.latest.values(), engine_version, uptime_sec)
    }
}
