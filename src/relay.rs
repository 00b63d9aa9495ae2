// Per-connection plumbing for the live relays: engine events mapped to commands,
// the set of stats feed tasks owned by one rollup connection, and the rollup loop.

use crate::aggregation::{RollupCommand, RollupTable};
use crate::docker_repo::{DockerRepo, EventFeed, StatsFeed};
use crate::models::{Rollup, StatsSample};
use bollard::models::EventMessage;
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, Stream, StreamExt};
use std::collections::HashMap;
use std::fmt::Display;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Buffered samples between feed tasks and one rollup connection.
const FEED_CHANNEL_CAPACITY: usize = 256;

/// Engine operations the rollup loop needs.
pub trait ContainerSource: Send + Sync {
    fn engine_version(&self) -> BoxFuture<'_, String>;
    fn running_ids(&self) -> BoxFuture<'_, Vec<String>>;
    fn stats_once<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Option<StatsSample>>;
    fn is_running<'a>(&'a self, id: &'a str) -> BoxFuture<'a, bool>;
    fn stats_feed(&self, id: &str) -> StatsFeed;
    fn container_events(&self) -> EventFeed;
}

impl ContainerSource for DockerRepo {
    fn engine_version(&self) -> BoxFuture<'_, String> {
        DockerRepo::engine_version(self).boxed()
    }

    fn running_ids(&self) -> BoxFuture<'_, Vec<String>> {
        DockerRepo::list_running_ids(self).boxed()
    }

    fn stats_once<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Option<StatsSample>> {
        DockerRepo::stats_once(self, id).boxed()
    }

    fn is_running<'a>(&'a self, id: &'a str) -> BoxFuture<'a, bool> {
        DockerRepo::is_running(self, id).boxed()
    }

    fn stats_feed(&self, id: &str) -> StatsFeed {
        DockerRepo::stats_feed(self, id)
    }

    fn container_events(&self) -> EventFeed {
        DockerRepo::container_events(self)
    }
}

/// What an engine container event means for an attached-feed set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    Started(String),
    Gone(String),
}

/// `start` attaches; `die`, `stop` and `destroy` detach; everything else is ignored.
pub fn lifecycle_command(event: &EventMessage) -> Option<Lifecycle> {
    let id = event
        .actor
        .as_ref()
        .and_then(|a| a.id.clone())
        .filter(|id| !id.is_empty())?;
    match event.action.as_deref()? {
        "start" => Some(Lifecycle::Started(id)),
        "die" | "stop" | "destroy" => Some(Lifecycle::Gone(id)),
        _ => None,
    }
}

/// Seconds since host boot.
pub fn host_uptime_secs() -> u64 {
    sysinfo::System::uptime()
}

/// Message from a feed task to its connection. `generation` identifies the attach
/// that produced it, so output of a replaced feed can be told apart.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Sample {
        id: String,
        generation: u64,
        sample: StatsSample,
    },
    Ended {
        id: String,
        generation: u64,
    },
}

/// Running feed tasks of one connection. Dropping the set aborts every task.
pub struct FeedSet {
    feeds: HashMap<String, (u64, JoinHandle<()>)>,
    next_generation: u64,
    tx: mpsc::Sender<FeedMessage>,
}

impl FeedSet {
    pub fn new(tx: mpsc::Sender<FeedMessage>) -> Self {
        Self {
            feeds: HashMap::new(),
            next_generation: 0,
            tx,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.feeds.contains_key(id)
    }

    /// True when `msg` comes from the feed currently attached for its container.
    pub fn is_current(&self, msg: &FeedMessage) -> bool {
        let (id, generation) = match msg {
            FeedMessage::Sample { id, generation, .. } => (id, generation),
            FeedMessage::Ended { id, generation } => (id, generation),
        };
        self.feeds.get(id).is_some_and(|(g, _)| g == generation)
    }

    /// Spawn a task forwarding `feed` into the connection channel.
    /// Returns false (and drops `feed`) if the container already has a feed.
    pub fn attach<S, E>(&mut self, id: String, feed: S) -> bool
    where
        S: Stream<Item = Result<StatsSample, E>> + Send + Unpin + 'static,
        E: Display + Send + 'static,
    {
        if self.feeds.contains_key(&id) {
            return false;
        }
        self.next_generation += 1;
        let generation = self.next_generation;
        let tx = self.tx.clone();
        let task_id = id.clone();
        let handle = tokio::spawn(async move {
            let mut feed = feed;
            while let Some(item) = feed.next().await {
                match item {
                    Ok(sample) => {
                        let msg = FeedMessage::Sample {
                            id: task_id.clone(),
                            generation,
                            sample,
                        };
                        if tx.send(msg).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, container = %task_id, "Stats stream error");
                        break;
                    }
                }
            }
            tracing::debug!(container = %task_id, "Stats stream ended");
            let _ = tx
                .send(FeedMessage::Ended {
                    id: task_id,
                    generation,
                })
                .await;
        });
        self.feeds.insert(id, (generation, handle));
        true
    }

    /// Abort the container's feed task. Returns false if none was attached.
    pub fn detach(&mut self, id: &str) -> bool {
        match self.feeds.remove(id) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Forget a feed whose task already finished on its own.
    pub fn finished(&mut self, id: &str) {
        self.feeds.remove(id);
    }
}

impl Drop for FeedSet {
    fn drop(&mut self) {
        for (_, (_, handle)) in self.feeds.drain() {
            handle.abort();
        }
    }
}

async fn publish(out: &mpsc::Sender<Rollup>, table: &RollupTable, engine_version: &str) -> bool {
    out.send(table.rollup(engine_version, host_uptime_secs()))
        .await
        .is_ok()
}

fn attach<S: ContainerSource + ?Sized>(
    source: &S,
    feeds: &mut FeedSet,
    table: &mut RollupTable,
    id: String,
) {
    if feeds.attach(id.clone(), source.stats_feed(&id)) {
        table.apply(RollupCommand::Attach(id));
    }
}

/// Host-wide rollup for one subscriber, pushed into `out`.
///
/// Sends a zeroed header first, seeds from one-shot samples of the running
/// containers, attaches a live feed per container and then follows lifecycle
/// events. Returns once `out` is closed; every feed task is aborted on return.
pub async fn run_rollup<S: ContainerSource + ?Sized>(source: &S, out: mpsc::Sender<Rollup>) {
    let engine_version = source.engine_version().await;
    let (tx, mut rx) = mpsc::channel::<FeedMessage>(FEED_CHANNEL_CAPACITY);
    let mut feeds = FeedSet::new(tx);
    let mut table = RollupTable::new();

    if !publish(&out, &table, &engine_version).await {
        return;
    }

    let running = source.running_ids().await;
    let seeds = futures_util::future::join_all(
        running
            .iter()
            .map(|id| async move { (id.clone(), source.stats_once(id).await) }),
    )
    .await;
    for (id, sample) in seeds {
        if let Some(sample) = sample {
            table.apply(RollupCommand::Seed(id, sample));
        }
    }
    if !publish(&out, &table, &engine_version).await {
        return;
    }
    for id in running {
        attach(source, &mut feeds, &mut table, id);
        if !publish(&out, &table, &engine_version).await {
            return;
        }
    }

    let mut events = source.container_events();
    let mut events_open = true;

    loop {
        let push = tokio::select! {
            msg = rx.recv() => match msg {
                Some(msg) if feeds.is_current(&msg) => match msg {
                    FeedMessage::Sample { id, sample, .. } => {
                        table.apply(RollupCommand::Sample(id, sample))
                    }
                    FeedMessage::Ended { id, .. } => {
                        feeds.finished(&id);
                        table.apply(RollupCommand::Detach(id))
                    }
                },
                Some(_) => false,
                None => break,
            },
            event = events.next(), if events_open => match event {
                Some(Ok(event)) => match lifecycle_command(&event) {
                    Some(Lifecycle::Started(id)) => {
                        if !feeds.contains(&id) && source.is_running(&id).await {
                            attach(source, &mut feeds, &mut table, id);
                            true
                        } else {
                            false
                        }
                    }
                    Some(Lifecycle::Gone(id)) => {
                        feeds.detach(&id);
                        table.apply(RollupCommand::Detach(id))
                    }
                    None => false,
                },
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Docker event stream failed; no more attach/detach");
                    events_open = false;
                    false
                }
                None => {
                    events_open = false;
                    false
                }
            },
            _ = out.closed() => break,
        };
        if push && !publish(&out, &table, &engine_version).await {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream::{self, BoxStream};
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::time::{Duration, timeout};

    fn event(action: &str, id: Option<&str>) -> EventMessage {
        let mut v = json!({ "Type": "container", "Action": action });
        if let Some(id) = id {
            v["Actor"] = json!({ "ID": id, "Attributes": { "name": "web" } });
        }
        serde_json::from_value(v).unwrap()
    }

    fn cpu(cpu_percent: f64) -> StatsSample {
        StatsSample {
            cpu_percent,
            ..Default::default()
        }
    }

    /// Sets its flag when dropped, i.e. when the owning task is torn down.
    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    fn never_ending_feed(flag: Arc<AtomicBool>) -> BoxStream<'static, Result<StatsSample, String>> {
        stream::unfold(DropFlag(flag), |guard| async move {
            futures_util::future::pending::<()>().await;
            Some((Ok::<StatsSample, String>(StatsSample::default()), guard))
        })
        .boxed()
    }

    #[test]
    fn lifecycle_maps_start_and_termination_events() {
        assert_eq!(
            lifecycle_command(&event("start", Some("abc"))),
            Some(Lifecycle::Started("abc".into()))
        );
        for action in ["die", "stop", "destroy"] {
            assert_eq!(
                lifecycle_command(&event(action, Some("abc"))),
                Some(Lifecycle::Gone("abc".into()))
            );
        }
        assert_eq!(lifecycle_command(&event("exec_start: sh", Some("abc"))), None);
        assert_eq!(lifecycle_command(&event("pause", Some("abc"))), None);
        assert_eq!(lifecycle_command(&event("start", None)), None);
    }

    #[tokio::test]
    async fn feed_samples_arrive_in_order_then_ended() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut feeds = FeedSet::new(tx);
        let samples = vec![Ok::<_, String>(cpu(1.0)), Ok(cpu(2.0)), Ok(cpu(3.0))];
        assert!(feeds.attach("a".into(), stream::iter(samples)));

        let mut seen = Vec::new();
        loop {
            let msg = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
            assert!(feeds.is_current(&msg));
            match msg {
                FeedMessage::Sample { sample, .. } => seen.push(sample.cpu_percent),
                FeedMessage::Ended { id, .. } => {
                    assert_eq!(id, "a");
                    break;
                }
            }
        }
        assert_eq!(seen, vec![1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn feed_error_ends_the_feed() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut feeds = FeedSet::new(tx);
        let items = vec![Ok(cpu(1.0)), Err("engine went away".to_string()), Ok(cpu(2.0))];
        feeds.attach("a".into(), stream::iter(items));

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, FeedMessage::Sample { .. }));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, FeedMessage::Ended { .. }));
    }

    #[tokio::test]
    async fn attach_twice_keeps_the_first_feed() {
        let (tx, _rx) = mpsc::channel(16);
        let mut feeds = FeedSet::new(tx);
        assert!(feeds.attach("a".into(), stream::pending::<Result<StatsSample, String>>()));
        assert!(!feeds.attach("a".into(), stream::pending::<Result<StatsSample, String>>()));
        assert!(feeds.contains("a"));
        assert!(feeds.detach("a"));
        assert!(!feeds.contains("a"));
    }

    #[tokio::test]
    async fn messages_from_a_replaced_feed_are_not_current() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut feeds = FeedSet::new(tx);
        feeds.attach("a".into(), stream::iter(Vec::<Result<StatsSample, String>>::new()));
        let stale = rx.recv().await.unwrap();
        assert!(matches!(stale, FeedMessage::Ended { .. }));

        // container restarted before the old Ended was processed
        feeds.detach("a");
        feeds.attach("a".into(), stream::pending::<Result<StatsSample, String>>());
        assert!(!feeds.is_current(&stale));
    }

    #[tokio::test]
    async fn detach_aborts_the_feed_task() {
        let (tx, _rx) = mpsc::channel(16);
        let mut feeds = FeedSet::new(tx);
        let dropped = Arc::new(AtomicBool::new(false));
        feeds.attach("a".into(), never_ending_feed(dropped.clone()));
        tokio::task::yield_now().await;
        assert!(!dropped.load(Ordering::SeqCst));

        assert!(feeds.detach("a"));
        assert!(!feeds.detach("a"));
        timeout(Duration::from_secs(1), async {
            while !dropped.load(Ordering::SeqCst) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("feed task should be aborted");
    }

    #[tokio::test]
    async fn dropping_the_set_aborts_every_feed() {
        let (tx, _rx) = mpsc::channel(16);
        let mut feeds = FeedSet::new(tx);
        let flags: Vec<_> = (0..3).map(|_| Arc::new(AtomicBool::new(false))).collect();
        for (i, flag) in flags.iter().enumerate() {
            feeds.attach(format!("c{}", i), never_ending_feed(flag.clone()));
        }
        tokio::task::yield_now().await;
        drop(feeds);

        timeout(Duration::from_secs(1), async {
            while !flags.iter().all(|f| f.load(Ordering::SeqCst)) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("all feed tasks should be aborted");
    }

    /// In-memory engine: fixed cpu per container, events pushed by the test.
    struct FakeEngine {
        cpu: HashMap<String, f64>,
        running: std::sync::Mutex<Vec<String>>,
        seed: bool,
        events: std::sync::Mutex<Option<mpsc::Receiver<EventMessage>>>,
    }

    impl FakeEngine {
        fn new(cpu: &[(&str, f64)], running: &[&str], seed: bool) -> (Self, mpsc::Sender<EventMessage>) {
            let (tx, rx) = mpsc::channel(16);
            let engine = FakeEngine {
                cpu: cpu.iter().map(|(id, v)| (id.to_string(), *v)).collect(),
                running: std::sync::Mutex::new(running.iter().map(|id| id.to_string()).collect()),
                seed,
                events: std::sync::Mutex::new(Some(rx)),
            };
            (engine, tx)
        }

        fn set_running(&self, id: &str) {
            self.running.lock().unwrap().push(id.to_string());
        }
    }

    impl ContainerSource for FakeEngine {
        fn engine_version(&self) -> BoxFuture<'_, String> {
            async { "test-engine".to_string() }.boxed()
        }

        fn running_ids(&self) -> BoxFuture<'_, Vec<String>> {
            let ids = self.running.lock().unwrap().clone();
            async move { ids }.boxed()
        }

        fn stats_once<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Option<StatsSample>> {
            let sample = self.cpu.get(id).filter(|_| self.seed).map(|v| cpu(*v));
            async move { sample }.boxed()
        }

        fn is_running<'a>(&'a self, id: &'a str) -> BoxFuture<'a, bool> {
            let running = self.running.lock().unwrap().iter().any(|r| r == id);
            async move { running }.boxed()
        }

        // one sample, then the feed stays open
        fn stats_feed(&self, id: &str) -> StatsFeed {
            let sample = cpu(self.cpu.get(id).copied().unwrap_or(0.0));
            stream::iter(vec![Ok(sample)]).chain(stream::pending()).boxed()
        }

        fn container_events(&self) -> EventFeed {
            let rx = self.events.lock().unwrap().take();
            match rx {
                Some(rx) => stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|e| (Ok(e), rx))
                })
                .boxed(),
                None => stream::empty().boxed(),
            }
        }
    }

    async fn next_rollup(rx: &mut mpsc::Receiver<Rollup>) -> Rollup {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("rollup in time")
            .expect("rollup channel open")
    }

    async fn rollup_reaching(rx: &mut mpsc::Receiver<Rollup>, cpu_percent: f64) -> Rollup {
        loop {
            let rollup = next_rollup(rx).await;
            if (rollup.cpu_percent - cpu_percent).abs() < 1e-9 {
                return rollup;
            }
        }
    }

    #[tokio::test]
    async fn rollup_starts_with_header_then_seeded_sum() {
        let (engine, _events) = FakeEngine::new(&[("a", 10.0), ("b", 20.0)], &["a", "b"], true);
        let engine = Arc::new(engine);
        let (tx, mut rx) = mpsc::channel(64);
        let task = tokio::spawn({
            let engine = engine.clone();
            async move { run_rollup(engine.as_ref(), tx).await }
        });

        let header = next_rollup(&mut rx).await;
        assert_eq!(header.engine_version, "test-engine");
        assert_eq!(header.cpu_percent, 0.0);
        assert_eq!(header.mem_usage, 0);

        let seeded = next_rollup(&mut rx).await;
        assert!((seeded.cpu_percent - 30.0).abs() < 1e-9);
        assert_eq!(seeded.engine_version, "test-engine");
        task.abort();
    }

    #[tokio::test]
    async fn stop_event_removes_container_from_next_rollup() {
        let (engine, events) =
            FakeEngine::new(&[("a", 10.0), ("b", 20.0), ("c", 30.0)], &["a", "b", "c"], false);
        let engine = Arc::new(engine);
        let (tx, mut rx) = mpsc::channel(64);
        let task = tokio::spawn({
            let engine = engine.clone();
            async move { run_rollup(engine.as_ref(), tx).await }
        });

        rollup_reaching(&mut rx, 60.0).await;
        events.send(event("stop", Some("c"))).await.unwrap();
        let after_stop = next_rollup(&mut rx).await;
        assert!((after_stop.cpu_percent - 30.0).abs() < 1e-9);
        task.abort();
    }

    #[tokio::test]
    async fn start_event_attaches_running_container() {
        let (engine, events) = FakeEngine::new(&[("a", 10.0), ("d", 40.0)], &["a"], false);
        let engine = Arc::new(engine);
        let (tx, mut rx) = mpsc::channel(64);
        let task = tokio::spawn({
            let engine = engine.clone();
            async move { run_rollup(engine.as_ref(), tx).await }
        });

        rollup_reaching(&mut rx, 10.0).await;
        // a start seen before the container reports running does not attach
        events.send(event("start", Some("d"))).await.unwrap();
        tokio::task::yield_now().await;
        engine.set_running("d");
        events.send(event("start", Some("d"))).await.unwrap();
        rollup_reaching(&mut rx, 50.0).await;
        task.abort();
    }

    #[tokio::test]
    async fn closing_the_subscriber_ends_the_rollup() {
        let (engine, _events) = FakeEngine::new(&[("a", 10.0)], &["a"], false);
        let engine = Arc::new(engine);
        let (tx, mut rx) = mpsc::channel(64);
        let task = tokio::spawn({
            let engine = engine.clone();
            async move { run_rollup(engine.as_ref(), tx).await }
        });

        rollup_reaching(&mut rx, 10.0).await;
        drop(rx);
        timeout(Duration::from_secs(1), task)
            .await
            .expect("rollup loop should return once the subscriber is gone")
            .unwrap();
    }
}
