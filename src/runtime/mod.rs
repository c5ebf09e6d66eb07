use std::pin::Pin;

use async_trait::async_trait;
use bollard::container::LogsOptions;
use bollard::Docker;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use thiserror::Error;

/// A cancellable stream of raw log chunks for one container. Dropping the
/// stream releases the runtime resource.
pub type LogChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes, LogSourceError>> + Send>>;

#[derive(Error, Debug)]
pub enum LogSourceError {
    #[error("container '{0}' not found")]
    NotFound(String),

    #[error("container runtime error: {0}")]
    Runtime(String),
}

/// Source of log chunks for named containers.
///
/// The log handler only depends on this seam; production wires in
/// [`DockerLogSource`], tests substitute a scripted fake.
#[async_trait]
pub trait ContainerLogSource: Send + Sync {
    async fn open(&self, container: &str) -> Result<LogChunkStream, LogSourceError>;
}

/// Log source backed by the local Docker daemon.
pub struct DockerLogSource {
    docker: Docker,
}

impl DockerLogSource {
    pub fn from_env() -> Result<Self, LogSourceError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| LogSourceError::Runtime(e.to_string()))?;
        Ok(DockerLogSource { docker })
    }
}

fn map_docker_error(container: &str, e: bollard::errors::Error) -> LogSourceError {
    match e {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => LogSourceError::NotFound(container.to_string()),
        other => LogSourceError::Runtime(other.to_string()),
    }
}

#[async_trait]
impl ContainerLogSource for DockerLogSource {
    async fn open(&self, container: &str) -> Result<LogChunkStream, LogSourceError> {
        // Inspect first so a missing container surfaces as NotFound before
        // any stream is handed out.
        self.docker
            .inspect_container(container, None)
            .await
            .map_err(|e| map_docker_error(container, e))?;

        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            timestamps: true,
            tail: "100".to_string(),
            ..Default::default()
        };

        let name = container.to_string();
        let stream = self
            .docker
            .logs(container, Some(options))
            .map(move |item| {
                item.map(|chunk| chunk.into_bytes())
                    .map_err(|e| map_docker_error(&name, e))
            });
        Ok(Box::pin(stream))
    }
}
