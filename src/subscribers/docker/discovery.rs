//! # Container discovery.
//!
//! Owns the container registrations and the [`UpdateGate`]; everything here
//! runs on one task.
//!
//! ```text
//! connect ─► list ─► register valid ─► stream events ─┐
//!    ▲                                                │ stream ended / error
//!    └──────────────── backoff ◄──────────────────────┘
//! ```
//!
//! ## Rules
//! - A registration gets its own worker task and invocation channel; the
//!   channel is what the tracker delivers to.
//! - Re-registering an unchanged configuration is a no-op; a changed one
//!   replaces the old worker.
//! - `start`/`die` events for blocked containers are ignored.
//! - Gate requests are serviced while waiting on the tracker, on the daemon
//!   and between reconnects, so a pipeline is never left waiting for its ack.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::error::{BackendError, SubscribeError};
use crate::policies::BackoffPolicy;
use crate::subscribers::docker::backend::{
    Connect, ContainerBackend, ContainerInfo, LifecycleEvent, LifecycleKind,
};
use crate::subscribers::docker::gate::{GateRequest, UpdateGate};
use crate::subscribers::docker::labels::{ContainerConfig, LabelParser};
use crate::subscribers::docker::pipeline::PipelineWorker;
use crate::tracking::Subscription;

/// Capacity of the pipeline → discovery gate channel.
const GATE_CAPACITY: usize = 16;

/// Settings of one discovery loop.
pub(crate) struct DiscoverySettings {
    pub(crate) name: Arc<str>,
    pub(crate) parser: LabelParser,
    pub(crate) queue_capacity: usize,
    /// Schedule for reconnecting to the daemon.
    pub(crate) connect_backoff: BackoffPolicy,
    /// Schedule for retrying pipeline executions.
    pub(crate) pipeline_backoff: BackoffPolicy,
}

struct Registered {
    config: Arc<ContainerConfig>,
    token: CancellationToken,
}

pub(crate) struct Discovery {
    settings: DiscoverySettings,
    connector: Arc<dyn Connect>,
    subscriptions: mpsc::Sender<Subscription>,
    gate: UpdateGate,
    gate_tx: mpsc::Sender<GateRequest>,
    gate_rx: mpsc::Receiver<GateRequest>,
    registered: HashMap<String, Registered>,
    workers: JoinSet<()>,
    token: CancellationToken,
}

/// How a session with the daemon ended.
enum SessionEnd {
    Cancelled,
    StreamClosed,
}

impl Discovery {
    pub(crate) fn new(
        settings: DiscoverySettings,
        connector: Arc<dyn Connect>,
        subscriptions: mpsc::Sender<Subscription>,
        token: CancellationToken,
    ) -> Self {
        let (gate_tx, gate_rx) = mpsc::channel(GATE_CAPACITY);
        Self {
            settings,
            connector,
            subscriptions,
            gate: UpdateGate::new(),
            gate_tx,
            gate_rx,
            registered: HashMap::new(),
            workers: JoinSet::new(),
            token,
        }
    }

    /// Connection loop; returns once cancelled or when reconnecting is given up.
    pub(crate) async fn run(mut self) -> Result<(), SubscribeError> {
        let mut backoff = self.settings.connect_backoff.start();
        let result = loop {
            match self.session().await {
                Ok(SessionEnd::Cancelled) => break Ok(()),
                Ok(SessionEnd::StreamClosed) => {
                    info!("event stream closed, reconnecting");
                    backoff.reset();
                    if !self.idle(self.settings.connect_backoff.first).await {
                        break Ok(());
                    }
                }
                Err(err) => match backoff.next_delay() {
                    Some(delay) => {
                        error!(error = %err, retry_in = ?delay, "docker session failed, retrying later");
                        if !self.idle(delay).await {
                            break Ok(());
                        }
                    }
                    None => {
                        error!(error = %err, "docker session failed permanently, not retrying");
                        break Err(SubscribeError::Backend(err));
                    }
                },
            }
        };
        self.shutdown().await;
        result
    }

    async fn session(&mut self) -> Result<SessionEnd, BackendError> {
        let backend = tokio::select! {
            _ = self.token.cancelled() => return Ok(SessionEnd::Cancelled),
            res = self.connector.connect() => res?,
        };

        let containers = backend.list().await?;
        debug!(count = containers.len(), "listed containers");
        let mut events = backend.events().await?;
        self.sync(containers).await;

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return Ok(SessionEnd::Cancelled),
                Some(req) = self.gate_rx.recv() => self.gate.apply(req),
                Some(_) = self.workers.join_next(), if !self.workers.is_empty() => {}
                event = events.next() => match event {
                    None => return Ok(SessionEnd::StreamClosed),
                    Some(Err(err)) => return Err(err),
                    Some(Ok(event)) => self.handle_event(backend.as_ref(), event).await,
                },
            }
        }
    }

    /// Registers listed containers and drops registrations for containers that are gone.
    async fn sync(&mut self, containers: Vec<ContainerInfo>) {
        let present: HashSet<String> = containers.iter().map(|c| c.id.clone()).collect();
        let stale: Vec<String> = self
            .registered
            .keys()
            .filter(|id| !present.contains(*id) && !self.gate.is_blocked(id, i64::MAX))
            .cloned()
            .collect();
        for id in stale {
            self.unregister(&id);
        }

        for container in containers {
            self.consider(container).await;
        }
    }

    async fn handle_event(&mut self, backend: &dyn ContainerBackend, event: LifecycleEvent) {
        let id = event.id.as_str();
        match event.kind {
            LifecycleKind::Start => {
                if self.gate.is_blocked(id, event.time_nano) {
                    debug!(container_id = %id, "ignoring start of blocked container");
                    return;
                }
                match backend.inspect(id).await {
                    Ok(container) => self.consider(container).await,
                    Err(err) => error!(container_id = %id, error = %err, "failed to inspect new container"),
                }
            }
            LifecycleKind::Die => {
                if !self.registered.contains_key(id) {
                    debug!(container_id = %id, "ignoring stop of unregistered container");
                    return;
                }
                if self.gate.is_blocked(id, event.time_nano) {
                    debug!(container_id = %id, "ignoring stop of blocked container");
                    return;
                }
                self.unregister(id);
                debug!(container_id = %id, "removed stopped container");
            }
        }
    }

    /// Parses labels and registers the container when they are valid.
    async fn consider(&mut self, container: ContainerInfo) {
        match self.settings.parser.parse(&container.labels) {
            Ok(config) => {
                debug!(container = %container.name, container_id = %container.id, ?config, "valid configuration found");
                self.register(container.id, config).await;
            }
            Err(err) => {
                debug!(container = %container.name, container_id = %container.id, reason = %err, "no valid configuration found");
            }
        }
    }

    async fn register(&mut self, id: String, config: ContainerConfig) {
        if let Some(existing) = self.registered.get(&id) {
            if *existing.config == config {
                debug!(container_id = %id, "configuration unchanged");
                return;
            }
        }
        if let Some(old) = self.registered.remove(&id) {
            old.token.cancel();
        }

        let config = Arc::new(config);
        let (tx, rx) = mpsc::channel(self.settings.queue_capacity.max(1));
        let token = self.token.child_token();
        let worker = PipelineWorker::new(
            id.clone(),
            config.actions.clone().into(),
            Arc::clone(&self.connector),
            self.gate_tx.clone(),
            self.settings.pipeline_backoff,
        );
        self.workers.spawn(
            worker
                .run(rx, token.clone())
                .instrument(info_span!("pipeline", container_id = %id)),
        );

        let sub = Subscription::new(
            Arc::clone(&self.settings.name),
            config.domains.clone(),
            id.clone(),
            tx,
        );
        self.registered.insert(
            id.clone(),
            Registered {
                config,
                token,
            },
        );
        if self.send_subscription(sub).await {
            info!(container_id = %id, "registered container");
        }
    }

    fn unregister(&mut self, id: &str) {
        if let Some(old) = self.registered.remove(id) {
            old.token.cancel();
        }
        self.gate.forget(id);
    }

    /// Sends a subscription to the tracker, servicing gate requests meanwhile.
    async fn send_subscription(&mut self, sub: Subscription) -> bool {
        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return false,
                Some(req) = self.gate_rx.recv() => self.gate.apply(req),
                permit = self.subscriptions.reserve() => {
                    match permit {
                        Ok(permit) => {
                            permit.send(sub);
                            return true;
                        }
                        Err(_) => {
                            warn!("tracker is gone, dropping subscription");
                            return false;
                        }
                    }
                }
            }
        }
    }

    /// Waits for `delay` while servicing gate requests; `false` when cancelled.
    async fn idle(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return false,
                Some(req) = self.gate_rx.recv() => self.gate.apply(req),
                _ = &mut sleep => return true,
            }
        }
    }

    async fn shutdown(&mut self) {
        for reg in self.registered.values() {
            reg.token.cancel();
        }
        // Dropping the receiver fails pending block requests instead of leaving them waiting.
        self.gate_rx.close();
        while self.workers.join_next().await.is_some() {}
        debug!("discovery stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::Certificate;
    use crate::policies::JitterPolicy;
    use crate::subscribers::docker::fake::FakeBackend;
    use crate::subscribers::docker::gate::unix_nanos;
    use crate::tracking::Invocation;

    const LABELS: &[(&str, &str)] = &[
        ("certvisor.domains", "a.example.com"),
        ("certvisor.actions[0]", "exec"),
        ("certvisor.actions[0].command", "reload"),
        ("certvisor.actions[0].on-error", "restart-stop"),
    ];

    fn settings() -> DiscoverySettings {
        let quick = BackoffPolicy {
            first: Duration::from_millis(10),
            max: Duration::from_millis(50),
            factor: 2.0,
            max_elapsed: Some(Duration::from_secs(5)),
            jitter: JitterPolicy::None,
        };
        DiscoverySettings {
            name: Arc::from("docker"),
            parser: LabelParser::new("certvisor").unwrap(),
            queue_capacity: 4,
            connect_backoff: quick,
            pipeline_backoff: quick,
        }
    }

    async fn next_subscription(rx: &mut mpsc::Receiver<Subscription>) -> Subscription {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("subscription timed out")
            .expect("subscription channel closed")
    }

    async fn wait_for(fake: &FakeBackend, call: &str) {
        for _ in 0..200 {
            if fake.calls().iter().any(|c| c == call) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("call {call} never happened: {:?}", fake.calls());
    }

    fn event(kind: LifecycleKind, id: &str, time_nano: i64) -> Result<LifecycleEvent, BackendError> {
        Ok(LifecycleEvent {
            kind,
            id: id.into(),
            time_nano,
        })
    }

    fn invocation() -> Invocation {
        Invocation {
            domain: "a.example.com".into(),
            certificate: Arc::new(Certificate::new(
                vec!["a.example.com".into()],
                b"CHAIN".to_vec(),
                b"KEY".to_vec(),
            )),
            data: "c1".into(),
        }
    }

    #[tokio::test]
    async fn test_lists_and_registers_valid_containers_only() {
        let fake = FakeBackend::new();
        fake.add_container("c1", LABELS);
        fake.add_container("c2", &[("other", "label")]);
        let _feed = fake.event_feed();

        let (tx, mut rx) = mpsc::channel(4);
        let token = CancellationToken::new();
        let discovery = Discovery::new(settings(), Arc::new(fake.clone()), tx, token.clone());
        let task = tokio::spawn(discovery.run());

        let sub = next_subscription(&mut rx).await;
        assert_eq!(&*sub.subscriber, "docker");
        assert_eq!(sub.data, "c1");
        assert_eq!(sub.domains, vec!["a.example.com"]);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());

        token.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_start_and_die_events() {
        let fake = FakeBackend::new();
        let feed = fake.event_feed();

        let (tx, mut rx) = mpsc::channel(4);
        let token = CancellationToken::new();
        let discovery = Discovery::new(settings(), Arc::new(fake.clone()), tx, token.clone());
        let task = tokio::spawn(discovery.run());
        wait_for(&fake, "events").await;

        fake.add_container("c1", LABELS);
        feed.send(event(LifecycleKind::Start, "c1", 1)).unwrap();
        let first = next_subscription(&mut rx).await;
        assert_eq!(first.data, "c1");

        // Die unregisters: the old invocation channel closes once the worker stops.
        feed.send(event(LifecycleKind::Die, "c1", 2)).unwrap();
        tokio::time::timeout(Duration::from_secs(2), first.channel.closed())
            .await
            .unwrap();

        // A later start registers again.
        feed.send(event(LifecycleKind::Start, "c1", 3)).unwrap();
        let second = next_subscription(&mut rx).await;
        assert_eq!(second.data, "c1");

        token.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_own_restart_does_not_reregister_container() {
        let fake = FakeBackend::new();
        fake.add_container("c1", LABELS);
        fake.script("exec", &[true]);
        let feed = fake.event_feed();
        {
            // The restart performed by the pipeline shows up as die + start.
            let feed = feed.clone();
            fake.on_restart(move |id| {
                // The daemon stamps events before we get to see them.
                let stamped = unix_nanos() - 1_000;
                let _ = feed.send(event(LifecycleKind::Die, id, stamped));
                let _ = feed.send(event(LifecycleKind::Start, id, stamped + 1));
            });
        }

        let (tx, mut rx) = mpsc::channel(4);
        let token = CancellationToken::new();
        let discovery = Discovery::new(settings(), Arc::new(fake.clone()), tx, token.clone());
        let task = tokio::spawn(discovery.run());

        let sub = next_subscription(&mut rx).await;
        sub.channel.send(invocation()).await.unwrap();
        wait_for(&fake, "restart:c1").await;

        // Give discovery time to see (and ignore) the self-inflicted events.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err(), "container was re-registered");
        assert!(!sub.channel.is_closed(), "container was unregistered");
        assert!(!fake.calls().iter().any(|c| c == "inspect:c1"));

        // Events after the block was lifted are handled again.
        feed.send(event(LifecycleKind::Die, "c1", unix_nanos() + 1_000_000_000))
            .unwrap();
        tokio::time::timeout(Duration::from_secs(2), sub.channel.closed())
            .await
            .unwrap();

        token.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_reconnect_keeps_unchanged_registration() {
        let fake = FakeBackend::new();
        fake.add_container("c1", LABELS);
        let feed = fake.event_feed();

        let (tx, mut rx) = mpsc::channel(4);
        let token = CancellationToken::new();
        let discovery = Discovery::new(settings(), Arc::new(fake.clone()), tx, token.clone());
        let task = tokio::spawn(discovery.run());

        let sub = next_subscription(&mut rx).await;

        // Closing the stream forces a reconnect and a fresh listing.
        let _feed = fake.event_feed();
        drop(feed);
        for _ in 0..200 {
            if fake.calls().iter().filter(|c| *c == "list").count() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(fake.calls().iter().filter(|c| *c == "list").count() >= 2);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
        assert!(!sub.channel.is_closed());

        token.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_connect_failures_give_up_after_budget() {
        let fake = FakeBackend::new();
        fake.script("connect", &[true; 64]);
        let mut s = settings();
        s.connect_backoff.max_elapsed = Some(Duration::from_millis(40));

        let (tx, _rx) = mpsc::channel(4);
        let discovery = Discovery::new(s, Arc::new(fake.clone()), tx, CancellationToken::new());
        let res = tokio::time::timeout(Duration::from_secs(2), discovery.run())
            .await
            .unwrap();
        assert!(matches!(res, Err(SubscribeError::Backend(_))));
    }
}
