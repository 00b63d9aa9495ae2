// Wire models (JSON, camelCase)

mod container;
mod stats;

pub use container::{
    ContainerDetail, ContainerState, ContainerSummary, ContainersSnapshot, DetailConfig,
};
pub use stats::{Rollup, StatsSample, percent_of};
