// Map engine list/inspect payloads onto the dashboard's display models.

use crate::models::{ContainerDetail, ContainerState, ContainerSummary, DetailConfig};
use bollard::models::{ContainerInspectResponse, ContainerSummary as EngineSummary};

/// Join one list entry with its inspect result (if inspect succeeded).
pub fn summarize(c: &EngineSummary, inspect: Option<&ContainerInspectResponse>) -> ContainerSummary {
    let id = c.id.clone().unwrap_or_default();
    let state = c
        .state
        .as_ref()
        .map(|s| ContainerState::from_docker(&s.to_string()))
        .unwrap_or(ContainerState::Unknown);
    let engine_state = inspect.and_then(|i| i.state.as_ref());

    ContainerSummary {
        name: display_name(
            inspect.and_then(|i| i.name.as_deref()),
            c.names.as_deref(),
            &id,
        ),
        image: c.image.clone().unwrap_or_default(),
        state,
        status: c.status.clone().unwrap_or_default(),
        created: c.created.unwrap_or(0),
        started_at: engine_state.and_then(|s| s.started_at.clone()),
        finished_at: engine_state.and_then(|s| s.finished_at.clone()),
        host_ports: host_ports(
            c.ports
                .iter()
                .flatten()
                .map(|p| p.public_port.map(u32::from)),
        ),
        id,
    }
}

/// Inspect name, else first list name, else the 12-char short id; leading `/` dropped.
pub fn display_name(inspect_name: Option<&str>, list_names: Option<&[String]>, id: &str) -> String {
    let trimmed = |n: &str| n.trim_start_matches('/').to_string();
    inspect_name
        .map(trimmed)
        .filter(|n| !n.is_empty())
        .or_else(|| {
            list_names
                .and_then(|n| n.first())
                .map(|n| trimmed(n))
                .filter(|n| !n.is_empty())
        })
        .unwrap_or_else(|| id.chars().take(12).collect())
}

/// Distinct published host ports in first-seen order; unpublished ports skipped.
pub fn host_ports(public_ports: impl IntoIterator<Item = Option<u32>>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for port in public_ports.into_iter().flatten().filter(|p| *p != 0) {
        let port = port.to_string();
        if !out.contains(&port) {
            out.push(port);
        }
    }
    out
}

/// Reduce an inspect response to the fields the UI is allowed to see.
pub fn reduce_detail(inspect: &ContainerInspectResponse) -> ContainerDetail {
    let config = inspect.config.as_ref();
    ContainerDetail {
        id: inspect.id.clone().unwrap_or_default(),
        name: inspect
            .name
            .as_deref()
            .unwrap_or_default()
            .trim_start_matches('/')
            .to_string(),
        image: config.and_then(|c| c.image.clone()),
        created: inspect.created.as_ref().map(|c| c.to_string()),
        state: serde_json::to_value(&inspect.state).unwrap_or_default(),
        network_settings: serde_json::to_value(&inspect.network_settings).unwrap_or_default(),
        config: DetailConfig {
            env: config.and_then(|c| c.env.clone()).unwrap_or_default(),
            labels: config.and_then(|c| c.labels.clone()).unwrap_or_default(),
        },
    }
}

/// Reference to pull for "latest": keeps an explicit tag or digest, else appends `:latest`.
pub fn pull_reference(image: &str) -> String {
    if image.contains('@') {
        return image.to_string();
    }
    let last_segment = image.rsplit('/').next().unwrap_or(image);
    if last_segment.contains(':') {
        image.to_string()
    } else {
        format!("{}:latest", image)
    }
}
