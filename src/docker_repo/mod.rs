// Docker engine access via bollard: list/inspect/actions, stats feeds, lifecycle events.

pub mod stats;
pub mod summary;

use crate::config::DockerConfig;
use crate::models::{
    ContainerDetail, ContainerState, ContainerSummary, ContainersSnapshot, StatsSample,
};
use bollard::Docker;
use bollard::errors::Error as BollardError;
use bollard::query_parameters::{
    CreateImageOptions, EventsOptions, InspectContainerOptions, KillContainerOptions,
    ListContainersOptions, RestartContainerOptions, StartContainerOptions, StatsOptions,
    StopContainerOptions,
};
use bollard::models::{ContainerInspectResponse, ContainerSummary as EngineSummary, EventMessage};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

/// Stream of processed samples for one container; malformed samples are already dropped.
pub type StatsFeed = BoxStream<'static, Result<StatsSample, BollardError>>;

/// Engine-wide container lifecycle events.
pub type EventFeed = BoxStream<'static, Result<EventMessage, BollardError>>;

/// Lifecycle actions exposed on `/api/containers/{id}/{action}` (pull is handled separately).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerAction {
    Start,
    Stop,
    Restart,
    Kill,
}

impl ContainerAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "start" => Some(ContainerAction::Start),
            "stop" => Some(ContainerAction::Stop),
            "restart" => Some(ContainerAction::Restart),
            "kill" => Some(ContainerAction::Kill),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContainerAction::Start => "start",
            ContainerAction::Stop => "stop",
            ContainerAction::Restart => "restart",
            ContainerAction::Kill => "kill",
        }
    }
}

pub struct DockerRepo {
    docker: Docker,
    config: DockerConfig,
}

impl DockerRepo {
    /// Local engine socket (honors `DOCKER_HOST`).
    pub fn connect(config: DockerConfig) -> anyhow::Result<Self> {
        let docker = Docker::connect_with_defaults()?;
        Ok(Self::with_client(docker, config))
    }

    pub fn with_client(docker: Docker, config: DockerConfig) -> Self {
        Self { docker, config }
    }

    /// All containers (any state). Empty on engine error or after `list_timeout_ms`.
    pub async fn list_all(&self) -> Vec<EngineSummary> {
        let options = ListContainersOptions {
            all: true,
            ..Default::default()
        };
        let timeout = Duration::from_millis(self.config.list_timeout_ms);
        match tokio::time::timeout(timeout, self.docker.list_containers(Some(options))).await {
            Ok(Ok(containers)) => containers,
            Ok(Err(e)) => {
                warn!(error = %e, operation = "list_containers", "Docker list_containers failed");
                Vec::new()
            }
            Err(_) => {
                warn!(
                    operation = "list_containers",
                    timeout_ms = self.config.list_timeout_ms,
                    "Docker list_containers timed out"
                );
                Vec::new()
            }
        }
    }

    /// Ids of containers currently in the running state.
    pub async fn list_running_ids(&self) -> Vec<String> {
        self.list_all()
            .await
            .into_iter()
            .filter(|c| {
                c.state
                    .as_ref()
                    .is_some_and(|s| ContainerState::from_docker(&s.to_string()).is_running())
            })
            .filter_map(|c| c.id)
            .collect()
    }

    /// Full list joined with per-container inspect; inspect failures keep the list data.
    pub async fn snapshot(&self) -> ContainersSnapshot {
        let containers = self.list_all().await;
        let items: Vec<ContainerSummary> =
            futures_util::future::join_all(containers.iter().map(|c| async move {
                let id = c.id.as_deref().unwrap_or_default();
                let inspect = self.inspect_raw(id).await.ok();
                summary::summarize(c, inspect.as_ref())
            }))
            .await;
        ContainersSnapshot { items }
    }

    async fn inspect_raw(&self, id: &str) -> Result<ContainerInspectResponse, BollardError> {
        self.docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
    }

    pub async fn inspect(&self, id: &str) -> anyhow::Result<ContainerDetail> {
        let inspect = self.inspect_raw(id).await?;
        Ok(summary::reduce_detail(&inspect))
    }

    /// True when inspect reports the container as running.
    pub async fn is_running(&self, id: &str) -> bool {
        match self.inspect_raw(id).await {
            Ok(i) => i.state.and_then(|s| s.running).unwrap_or(false),
            Err(e) => {
                tracing::debug!(error = %e, container = %id, "inspect failed");
                false
            }
        }
    }

    pub async fn run_action(&self, id: &str, action: ContainerAction) -> anyhow::Result<()> {
        match action {
            ContainerAction::Start => {
                self.docker
                    .start_container(id, None::<StartContainerOptions>)
                    .await?
            }
            ContainerAction::Stop => {
                let options = StopContainerOptions {
                    t: Some(self.config.stop_timeout_secs),
                    ..Default::default()
                };
                self.docker.stop_container(id, Some(options)).await?
            }
            ContainerAction::Restart => {
                let options = RestartContainerOptions {
                    t: Some(self.config.restart_timeout_secs),
                    ..Default::default()
                };
                self.docker.restart_container(id, Some(options)).await?
            }
            ContainerAction::Kill => {
                let options = KillContainerOptions {
                    signal: "KILL".to_string(),
                };
                self.docker.kill_container(id, Some(options)).await?
            }
        }
        Ok(())
    }

    /// Image reference the container was created from (`Config.Image`).
    pub async fn image_of(&self, id: &str) -> anyhow::Result<Option<String>> {
        let inspect = self.inspect_raw(id).await?;
        Ok(inspect
            .config
            .and_then(|c| c.image)
            .filter(|i| !i.is_empty()))
    }

    /// Start pulling `image` in the background; progress is drained and only logged.
    pub fn spawn_pull(&self, image: &str) -> tokio::task::JoinHandle<()> {
        let docker = self.docker.clone();
        let reference = summary::pull_reference(image);
        tokio::spawn(async move {
            tracing::info!(image = %reference, "Image pull started");
            let options = CreateImageOptions {
                from_image: Some(reference.clone()),
                ..Default::default()
            };
            let mut progress = docker.create_image(Some(options), None, None);
            while let Some(item) = progress.next().await {
                if let Err(e) = item {
                    warn!(error = %e, image = %reference, operation = "pull", "Image pull failed");
                    return;
                }
            }
            tracing::info!(image = %reference, "Image pull finished");
        })
    }

    /// Continuous stats for one container, processed into samples.
    pub fn stats_feed(&self, id: &str) -> StatsFeed {
        let options = StatsOptions {
            stream: true,
            ..Default::default()
        };
        let container = id.to_string();
        self.docker
            .stats(id, Some(options))
            .filter_map(move |result| {
                let item = match result {
                    Ok(raw) => Some(Ok(stats::process_statistics(&raw))),
                    Err(e) if is_malformed_sample(&e) => {
                        tracing::debug!(error = %e, container = %container, "dropping malformed stats sample");
                        None
                    }
                    Err(e) => Some(Err(e)),
                };
                futures_util::future::ready(item)
            })
            .boxed()
    }

    /// A single stats sample (with precpu populated, so CPU percent is meaningful).
    pub async fn stats_once(&self, id: &str) -> Option<StatsSample> {
        let options = StatsOptions {
            stream: false,
            ..Default::default()
        };
        match self.docker.stats(id, Some(options)).next().await {
            Some(Ok(raw)) => Some(stats::process_statistics(&raw)),
            Some(Err(e)) => {
                warn!(error = %e, container = %id, operation = "stats_once", "one-shot stats failed");
                None
            }
            None => None,
        }
    }

    /// Container lifecycle events only (`type=container`).
    pub fn container_events(&self) -> EventFeed {
        let filters = HashMap::from([("type".to_string(), vec!["container".to_string()])]);
        let options = EventsOptions {
            filters: Some(filters),
            ..Default::default()
        };
        self.docker.events(Some(options)).boxed()
    }

    /// Engine version string; empty when the engine is unreachable.
    pub async fn engine_version(&self) -> String {
        match self.docker.version().await {
            Ok(v) => v.version.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, operation = "version", "Docker version failed");
                String::new()
            }
        }
    }
}

/// JSON decode failures on a single chunk; the feed itself is still healthy.
fn is_malformed_sample(e: &BollardError) -> bool {
    matches!(
        e,
        BollardError::JsonDataError { .. } | BollardError::JsonSerdeError { .. }
    )
}
