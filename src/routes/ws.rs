// WebSocket handlers and relay loops

use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use bytes::Bytes;
use futures_util::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};

use super::AppState;
use crate::docker_repo::DockerRepo;
use crate::models::Rollup;
use crate::relay;

pub(super) const WS_PING_INTERVAL: Duration = Duration::from_secs(30);
pub(super) const WS_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Rollups queued between the producer and a slow socket.
const ROLLUP_CHANNEL_CAPACITY: usize = 16;

/// Counts open relay sockets (connect = +1, drop = -1).
struct WsConnectionGuard(Arc<AtomicUsize>);

impl WsConnectionGuard {
    fn new(count: Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::Relaxed);
        Self(count)
    }
}

impl Drop for WsConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Send one frame; false when the client is gone or the send timed out.
async fn send_frame(socket: &mut WebSocket, msg: Message) -> bool {
    matches!(timeout(WS_SEND_TIMEOUT, socket.send(msg)).await, Ok(Ok(())))
}

async fn send_json<T: Serialize>(socket: &mut WebSocket, value: &T) -> anyhow::Result<bool> {
    let json = serde_json::to_string(value)?;
    Ok(send_frame(socket, Message::Text(json.into())).await)
}

/// True when an inbound frame (or its absence) means the client disconnected.
fn is_client_gone(incoming: Option<Result<Message, axum::Error>>) -> bool {
    matches!(incoming, None | Some(Err(_)) | Some(Ok(Message::Close(_))))
}

fn ping_interval() -> tokio::time::Interval {
    let mut ping = tokio::time::interval_at(
        tokio::time::Instant::now() + WS_PING_INTERVAL,
        WS_PING_INTERVAL,
    );
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ping
}

pub(super) async fn ws_containers(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let docker = state.docker.clone();
    let interval_ms = state.config.publishing.containers_interval_ms;
    let guard = WsConnectionGuard::new(state.ws_connections.clone());
    ws.on_upgrade(move |socket| async move {
        let _guard = guard;
        if let Err(e) = stream_containers(socket, docker, interval_ms).await {
            tracing::info!("Containers stream error: {}", e);
        }
    })
}

/// Full snapshot now, then on every tick and every container event.
async fn stream_containers(
    mut socket: WebSocket,
    docker: Arc<DockerRepo>,
    interval_ms: u64,
) -> anyhow::Result<()> {
    tracing::info!("Client connected to containers stream");
    let mut tick = tokio::time::interval(Duration::from_millis(interval_ms));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut ping = ping_interval();
    let mut events = docker.container_events();
    let mut events_open = true;

    loop {
        let push = tokio::select! {
            _ = tick.tick() => true,
            event = events.next(), if events_open => match event {
                Some(Ok(_)) => true,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Docker event stream failed; polling only");
                    events_open = false;
                    false
                }
                None => {
                    events_open = false;
                    false
                }
            },
            incoming = socket.recv() => {
                if is_client_gone(incoming) {
                    break;
                }
                false
            }
            _ = ping.tick() => {
                if !send_frame(&mut socket, Message::Ping(Bytes::new())).await {
                    break;
                }
                false
            }
        };
        if push {
            let snapshot = docker.snapshot().await;
            if !send_json(&mut socket, &snapshot).await? {
                break;
            }
        }
    }
    tracing::info!("Client disconnected from containers stream");
    Ok(())
}

pub(super) async fn ws_container_stats(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let docker = state.docker.clone();
    let guard = WsConnectionGuard::new(state.ws_connections.clone());
    ws.on_upgrade(move |socket| async move {
        let _guard = guard;
        if let Err(e) = stream_container_stats(socket, docker, id).await {
            tracing::info!("Container stats stream error: {}", e);
        }
    })
}

/// One sample per engine sample; the socket is closed when the feed ends.
async fn stream_container_stats(
    mut socket: WebSocket,
    docker: Arc<DockerRepo>,
    id: String,
) -> anyhow::Result<()> {
    tracing::info!(container = %id, "Client connected to container stats stream");
    let mut feed = docker.stats_feed(&id);
    let mut ping = ping_interval();
    let mut feed_ended = false;

    loop {
        tokio::select! {
            item = feed.next() => match item {
                Some(Ok(sample)) => {
                    if !send_json(&mut socket, &sample).await? {
                        break;
                    }
                }
                Some(Err(e)) => {
                    tracing::info!(error = %e, container = %id, "Stats stream failed");
                    feed_ended = true;
                    break;
                }
                None => {
                    feed_ended = true;
                    break;
                }
            },
            incoming = socket.recv() => {
                if is_client_gone(incoming) {
                    break;
                }
            }
            _ = ping.tick() => {
                if !send_frame(&mut socket, Message::Ping(Bytes::new())).await {
                    break;
                }
            }
        }
    }
    drop(feed);
    if feed_ended {
        let _ = send_frame(&mut socket, Message::Close(None)).await;
    }
    tracing::info!(container = %id, "Container stats stream closed");
    Ok(())
}

pub(super) async fn ws_all_stats(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let docker = state.docker.clone();
    let guard = WsConnectionGuard::new(state.ws_connections.clone());
    ws.on_upgrade(move |socket| async move {
        let _guard = guard;
        if let Err(e) = stream_all_stats(socket, docker).await {
            tracing::info!("All-containers stats stream error: {}", e);
        }
    })
}

/// Forwards the connection's rollup stream to the client.
async fn stream_all_stats(mut socket: WebSocket, docker: Arc<DockerRepo>) -> anyhow::Result<()> {
    tracing::info!("Client connected to all-containers stats stream");
    let (tx, mut rollups) = mpsc::channel::<Rollup>(ROLLUP_CHANNEL_CAPACITY);
    // dropping the producer aborts every feed task and ends the event subscription
    let producer = relay::run_rollup(docker.as_ref(), tx);
    tokio::pin!(producer);
    let mut ping = ping_interval();

    loop {
        tokio::select! {
            _ = &mut producer => break,
            rollup = rollups.recv() => match rollup {
                Some(rollup) => {
                    if !send_json(&mut socket, &rollup).await? {
                        break;
                    }
                }
                None => break,
            },
            incoming = socket.recv() => {
                if is_client_gone(incoming) {
                    break;
                }
            }
            _ = ping.tick() => {
                if !send_frame(&mut socket, Message::Ping(Bytes::new())).await {
                    break;
                }
            }
        }
    }
    tracing::info!("Client disconnected from all-containers stats stream");
    Ok(())
}
