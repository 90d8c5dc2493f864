//! Container backend capabilities the discovery loop and the pipelines depend on.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::BackendError;

/// A container as seen by discovery.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub labels: HashMap<String, String>,
}

/// Lifecycle transitions discovery reacts to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleKind {
    Start,
    Die,
}

/// One lifecycle event; `time_nano` is the daemon's unix timestamp in nanoseconds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub kind: LifecycleKind,
    pub id: String,
    pub time_nano: i64,
}

/// Command executed inside a container, detached.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecSpec {
    pub command: Vec<String>,
    pub user: Option<String>,
    pub work_dir: Option<String>,
}

/// A named file copied into a container.
#[derive(Clone, PartialEq, Eq)]
pub struct FileBlob {
    pub name: String,
    pub contents: Vec<u8>,
    pub mode: u32,
}

impl std::fmt::Debug for FileBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBlob")
            .field("name", &self.name)
            .field("len", &self.contents.len())
            .field("mode", &format_args!("{:o}", self.mode))
            .finish()
    }
}

pub type EventStream = BoxStream<'static, Result<LifecycleEvent, BackendError>>;

/// Operations on a live backend connection.
#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Running containers with their labels.
    async fn list(&self) -> Result<Vec<ContainerInfo>, BackendError>;

    async fn inspect(&self, id: &str) -> Result<ContainerInfo, BackendError>;

    /// Start/die events until the connection ends; other events are filtered out.
    async fn events(&self) -> Result<EventStream, BackendError>;

    async fn exec(&self, id: &str, spec: &ExecSpec) -> Result<(), BackendError>;

    /// Copies `blobs` into the directory `destination` inside the container.
    async fn copy(&self, id: &str, destination: &str, blobs: &[FileBlob]) -> Result<(), BackendError>;

    async fn restart(&self, id: &str, timeout: Duration) -> Result<(), BackendError>;
}

/// Acquires a live backend connection.
#[async_trait]
pub trait Connect: Send + Sync + 'static {
    async fn connect(&self) -> Result<Arc<dyn ContainerBackend>, BackendError>;
}
