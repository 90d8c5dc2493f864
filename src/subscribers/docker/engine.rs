//! # Docker Engine API backend.
//!
//! | Operation | Engine call                                        |
//! |-----------|----------------------------------------------------|
//! | connect   | `GET /version`                                     |
//! | list      | `GET /containers/json` (running only)              |
//! | inspect   | `GET /containers/{id}/json`                        |
//! | events    | `GET /events` filtered to container start/die      |
//! | exec      | `POST /containers/{id}/exec` + `POST /exec/{id}/start` (detached) |
//! | copy      | `PUT /containers/{id}/archive` with a tar archive  |
//! | restart   | `POST /containers/{id}/restart?t=<secs>`           |
//!
//! Every call except the event stream is bounded by the client timeout.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bollard::container::{
    InspectContainerOptions, ListContainersOptions, RestartContainerOptions,
    UploadToContainerOptions,
};
use bollard::errors::Error as EngineError;
use bollard::exec::{CreateExecOptions, StartExecOptions};
use bollard::models::{ContainerInspectResponse, ContainerSummary, EventMessage};
use bollard::system::EventsOptions;
use bollard::{API_DEFAULT_VERSION, Docker};
use futures::{StreamExt, future};
use tracing::{debug, warn};

use crate::error::BackendError;
use crate::subscribers::docker::backend::{
    Connect, ContainerBackend, ContainerInfo, EventStream, ExecSpec, FileBlob, LifecycleEvent,
    LifecycleKind,
};

/// Request timeout of the underlying client; unary calls are bounded separately.
const STREAM_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Connects to a docker daemon over its Engine API.
#[derive(Clone, Debug)]
pub struct DockerApi {
    endpoint: Option<String>,
    timeout: Duration,
}

impl DockerApi {
    /// `endpoint` accepts `unix://`, `npipe://`, `tcp://` and `http://`
    /// addresses; `None` uses `DOCKER_HOST` or the platform socket.
    pub fn new(endpoint: Option<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty()),
            timeout,
        }
    }

    fn client(&self) -> Result<Docker, EngineError> {
        let secs = STREAM_TIMEOUT.as_secs();
        let docker = match self.endpoint.as_deref() {
            None => Docker::connect_with_local_defaults()?,
            #[cfg(unix)]
            Some(endpoint) if endpoint.starts_with("unix://") => {
                Docker::connect_with_unix(endpoint, secs, API_DEFAULT_VERSION)?
            }
            #[cfg(windows)]
            Some(endpoint) if endpoint.starts_with("npipe://") => {
                Docker::connect_with_named_pipe(endpoint, secs, API_DEFAULT_VERSION)?
            }
            Some(endpoint) => Docker::connect_with_http(endpoint, secs, API_DEFAULT_VERSION)?,
        };
        Ok(docker.with_timeout(STREAM_TIMEOUT))
    }
}

/// Checks that `endpoint` uses a scheme the backend can dial.
pub(crate) fn validate_endpoint(endpoint: &str) -> Result<(), String> {
    const SCHEMES: [&str; 4] = ["unix://", "npipe://", "tcp://", "http://"];
    if SCHEMES.iter().any(|scheme| endpoint.starts_with(scheme)) {
        Ok(())
    } else {
        Err(format!(
            "endpoint `{endpoint}` must start with one of {}",
            SCHEMES.join(", ")
        ))
    }
}

#[async_trait]
impl Connect for DockerApi {
    async fn connect(&self) -> Result<Arc<dyn ContainerBackend>, BackendError> {
        let docker = self
            .client()
            .map_err(|e| BackendError::Connect(e.to_string()))?;
        let version = bounded("version", self.timeout, docker.version())
            .await
            .map_err(|e| BackendError::Connect(e.to_string()))?;
        debug!(
            docker_version = version.version.as_deref().unwrap_or("unknown"),
            api_version = version.api_version.as_deref().unwrap_or("unknown"),
            "connected to docker daemon"
        );
        Ok(Arc::new(EngineSession {
            docker,
            timeout: self.timeout,
        }))
    }
}

/// A live daemon connection.
struct EngineSession {
    docker: Docker,
    timeout: Duration,
}

#[async_trait]
impl ContainerBackend for EngineSession {
    async fn list(&self) -> Result<Vec<ContainerInfo>, BackendError> {
        let options = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };
        let summaries = bounded("list", self.timeout, self.docker.list_containers(Some(options))).await?;
        Ok(summaries.into_iter().filter_map(container_from_summary).collect())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInfo, BackendError> {
        let response = bounded(
            "inspect",
            self.timeout,
            self.docker.inspect_container(id, None::<InspectContainerOptions>),
        )
        .await?;
        container_from_inspect(response)
    }

    async fn events(&self) -> Result<EventStream, BackendError> {
        let filters = HashMap::from([
            ("type".to_string(), vec!["container".to_string()]),
            (
                "event".to_string(),
                vec!["start".to_string(), "die".to_string()],
            ),
        ]);
        let options = EventsOptions::<String> {
            filters,
            ..Default::default()
        };
        let stream = self.docker.events(Some(options)).filter_map(|item| {
            future::ready(match item {
                Ok(message) => lifecycle_event(message).map(Ok),
                Err(err) => Some(Err(api_error("events", err))),
            })
        });
        Ok(Box::pin(stream))
    }

    async fn exec(&self, id: &str, spec: &ExecSpec) -> Result<(), BackendError> {
        let options = CreateExecOptions::<String> {
            cmd: Some(spec.command.clone()),
            user: spec.user.clone(),
            working_dir: spec.work_dir.clone(),
            ..Default::default()
        };
        let created = bounded("exec", self.timeout, self.docker.create_exec(id, options)).await?;
        let start = StartExecOptions {
            detach: true,
            ..Default::default()
        };
        bounded(
            "exec",
            self.timeout,
            self.docker.start_exec(&created.id, Some(start)),
        )
        .await?;
        Ok(())
    }

    async fn copy(&self, id: &str, destination: &str, blobs: &[FileBlob]) -> Result<(), BackendError> {
        let archive = build_archive(blobs)?;
        let options = UploadToContainerOptions {
            path: destination.to_string(),
            ..Default::default()
        };
        bounded(
            "copy",
            self.timeout,
            self.docker
                .upload_to_container(id, Some(options), archive.into()),
        )
        .await
    }

    async fn restart(&self, id: &str, timeout: Duration) -> Result<(), BackendError> {
        let options = RestartContainerOptions {
            t: isize::try_from(timeout.as_secs()).unwrap_or(isize::MAX),
        };
        bounded(
            "restart",
            self.timeout.saturating_add(timeout),
            self.docker.restart_container(id, Some(options)),
        )
        .await
    }
}

/// Runs one daemon request within `timeout`.
async fn bounded<T, F>(
    operation: &'static str,
    timeout: Duration,
    request: F,
) -> Result<T, BackendError>
where
    F: Future<Output = Result<T, EngineError>>,
{
    match tokio::time::timeout(timeout, request).await {
        Ok(result) => result.map_err(|e| api_error(operation, e)),
        Err(_) => Err(BackendError::Timeout { operation, timeout }),
    }
}

fn api_error(operation: &'static str, err: EngineError) -> BackendError {
    match err {
        EngineError::DockerResponseServerError {
            status_code: 404,
            message,
        } => BackendError::NotFound(message),
        EngineError::RequestTimeoutError => BackendError::Timeout {
            operation,
            timeout: STREAM_TIMEOUT,
        },
        other => BackendError::Api {
            operation,
            message: other.to_string(),
        },
    }
}

fn container_from_summary(summary: ContainerSummary) -> Option<ContainerInfo> {
    let id = summary.id.filter(|id| !id.is_empty())?;
    let name = summary
        .names
        .and_then(|names| names.into_iter().next())
        .unwrap_or_default();
    Some(ContainerInfo {
        id,
        name,
        labels: summary.labels.unwrap_or_default(),
    })
}

fn container_from_inspect(response: ContainerInspectResponse) -> Result<ContainerInfo, BackendError> {
    let id = response
        .id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| BackendError::Decode("inspect response without container id".into()))?;
    Ok(ContainerInfo {
        id,
        name: response.name.unwrap_or_default(),
        labels: response
            .config
            .and_then(|config| config.labels)
            .unwrap_or_default(),
    })
}

/// Converts a daemon event; anything other than a container start/die yields `None`.
fn lifecycle_event(message: EventMessage) -> Option<LifecycleEvent> {
    let kind = match message.action.as_deref() {
        Some("start") => LifecycleKind::Start,
        Some("die") => LifecycleKind::Die,
        _ => return None,
    };
    let Some(id) = message
        .actor
        .and_then(|actor| actor.id)
        .filter(|id| !id.is_empty())
    else {
        warn!(action = ?kind, "skipping event without container id");
        return None;
    };
    let time_nano = message
        .time_nano
        .filter(|nanos| *nanos != 0)
        .or_else(|| message.time.map(|secs| secs.saturating_mul(1_000_000_000)))
        .unwrap_or_default();
    Some(LifecycleEvent {
        kind,
        id,
        time_nano,
    })
}

/// Packs blobs into an in-memory tar archive.
fn build_archive(blobs: &[FileBlob]) -> Result<Vec<u8>, BackendError> {
    let mtime = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();

    let mut builder = tar::Builder::new(Vec::new());
    for blob in blobs {
        let mut header = tar::Header::new_gnu();
        header.set_size(blob.contents.len() as u64);
        header.set_mode(blob.mode);
        header.set_mtime(mtime);
        header.set_entry_type(tar::EntryType::Regular);
        builder.append_data(&mut header, &blob.name, blob.contents.as_slice())?;
    }
    Ok(builder.into_inner()?)
}
