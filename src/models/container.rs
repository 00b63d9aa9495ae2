// Container display models

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Docker container state; serializes to lowercase JSON (e.g. "running").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Stopped,
    Exited,
    Dead,
    #[serde(other)]
    Unknown,
}

impl ContainerState {
    /// Parse from Docker API state string (e.g. "running", "exited").
    pub fn from_docker(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "created" => ContainerState::Created,
            "running" => ContainerState::Running,
            "paused" => ContainerState::Paused,
            "restarting" => ContainerState::Restarting,
            "removing" => ContainerState::Removing,
            "stopped" => ContainerState::Stopped,
            "exited" => ContainerState::Exited,
            "dead" => ContainerState::Dead,
            _ => ContainerState::Unknown,
        }
    }

    pub fn is_running(self) -> bool {
        self == ContainerState::Running
    }
}

/// One card on the dashboard: list data joined with inspect timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: ContainerState,
    pub status: String,
    /// Unix seconds.
    pub created: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    #[serde(default)]
    pub host_ports: Vec<String>,
}

/// Body of `GET /api/containers` and every `/ws/containers/stream` frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainersSnapshot {
    pub items: Vec<ContainerSummary>,
}

/// Allow-listed subset of `docker inspect`; everything else stays server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerDetail {
    pub id: String,
    pub name: String,
    pub image: Option<String>,
    pub created: Option<String>,
    pub state: serde_json::Value,
    #[serde(rename = "NetworkSettings")]
    pub network_settings: serde_json::Value,
    #[serde(rename = "Config")]
    pub config: DetailConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetailConfig {
    #[serde(rename = "Env")]
    pub env: Vec<String>,
    #[serde(rename = "Labels")]
    pub labels: HashMap<String, String>,
}
