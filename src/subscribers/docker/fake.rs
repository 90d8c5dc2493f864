//! Scriptable in-memory backend for pipeline and discovery tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::BackendError;
use crate::subscribers::docker::backend::{
    Connect, ContainerBackend, ContainerInfo, EventStream, ExecSpec, FileBlob, LifecycleEvent,
};

type RestartHook = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct State {
    calls: Vec<String>,
    failures: HashMap<&'static str, VecDeque<bool>>,
    containers: HashMap<String, ContainerInfo>,
    events: Option<mpsc::UnboundedReceiver<Result<LifecycleEvent, BackendError>>>,
}

/// Records every call; operations fail according to per-operation scripts.
#[derive(Clone, Default)]
pub(crate) struct FakeBackend {
    state: Arc<Mutex<State>>,
    on_restart: Arc<Mutex<Option<RestartHook>>>,
}

impl FakeBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queues outcomes for `op` (`true` = fail); unscripted calls succeed.
    pub(crate) fn script(&self, op: &'static str, outcomes: &[bool]) {
        let mut state = self.state.lock().unwrap();
        state
            .failures
            .entry(op)
            .or_default()
            .extend(outcomes.iter().copied());
    }

    pub(crate) fn add_container(&self, id: &str, labels: &[(&str, &str)]) {
        let info = ContainerInfo {
            id: id.to_string(),
            name: format!("/{id}"),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        self.state
            .lock()
            .unwrap()
            .containers
            .insert(id.to_string(), info);
    }

    /// Installs an event stream and returns its feeding end.
    pub(crate) fn event_feed(&self) -> mpsc::UnboundedSender<Result<LifecycleEvent, BackendError>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().unwrap().events = Some(rx);
        tx
    }

    pub(crate) fn on_restart(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.on_restart.lock().unwrap() = Some(Box::new(hook));
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn record(&self, op: &'static str, detail: &str) -> Result<(), BackendError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(if detail.is_empty() {
            op.to_string()
        } else {
            format!("{op}:{detail}")
        });
        let fail = state
            .failures
            .get_mut(op)
            .and_then(VecDeque::pop_front)
            .unwrap_or(false);
        if fail {
            return Err(BackendError::Api {
                operation: op,
                message: "scripted failure".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Connect for FakeBackend {
    async fn connect(&self) -> Result<Arc<dyn ContainerBackend>, BackendError> {
        self.record("connect", "")
            .map_err(|e| BackendError::Connect(e.to_string()))?;
        Ok(Arc::new(self.clone()))
    }
}

#[async_trait]
impl ContainerBackend for FakeBackend {
    async fn list(&self) -> Result<Vec<ContainerInfo>, BackendError> {
        self.record("list", "")?;
        let mut list: Vec<_> = self.state.lock().unwrap().containers.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(list)
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInfo, BackendError> {
        self.record("inspect", id)?;
        self.state
            .lock()
            .unwrap()
            .containers
            .get(id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(id.to_string()))
    }

    async fn events(&self) -> Result<EventStream, BackendError> {
        self.record("events", "")?;
        let rx = self.state.lock().unwrap().events.take();
        let stream = futures::stream::unfold(rx, |rx| async move {
            let mut rx = rx?;
            let next = rx.recv().await?;
            Some((next, Some(rx)))
        });
        Ok(Box::pin(stream))
    }

    async fn exec(&self, id: &str, spec: &ExecSpec) -> Result<(), BackendError> {
        self.record("exec", &format!("{id}:{}", spec.command.join(" ")))
    }

    async fn copy(&self, id: &str, destination: &str, blobs: &[FileBlob]) -> Result<(), BackendError> {
        let names: Vec<_> = blobs.iter().map(|b| b.name.as_str()).collect();
        self.record("copy", &format!("{id}:{destination}:{}", names.join(",")))
    }

    async fn restart(&self, id: &str, _timeout: Duration) -> Result<(), BackendError> {
        let res = self.record("restart", id);
        if res.is_ok() {
            if let Some(hook) = self.on_restart.lock().unwrap().as_ref() {
                hook(id);
            }
        }
        res
    }
}
