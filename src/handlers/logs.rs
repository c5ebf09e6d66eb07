use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::ServiceHandler;
use crate::error::{AppError, AppResult};
use crate::events::Event;
use crate::message::{Frame, MessageType};
use crate::registry::Connection;
use crate::runtime::{ContainerLogSource, LogChunkStream, LogSourceError};

const LOGS_GROUPS: &[&str] = &["is_admin", "is_api_key"];
const AVAILABLE_COMMANDS: &str =
    "Unknown logs command. Available commands: start_logs, stop_logs";

/// Streams container logs to one connection per user.
///
/// At most one stream per user: `start_logs` tears down any previous stream
/// (awaiting its task) before opening the new one, and `stop_logs` /
/// disconnect / natural stream end all return the user to idle.
pub struct LogStreamHandler {
    source: Arc<dyn ContainerLogSource>,
    streams: Arc<Mutex<HashMap<u64, RunningStream>>>,
}

struct RunningStream {
    stream_id: Uuid,
    container: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl LogStreamHandler {
    pub fn new(source: Arc<dyn ContainerLogSource>) -> Self {
        LogStreamHandler {
            source,
            streams: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn start_logs(&self, conn: &Connection, container: &str) -> AppResult<()> {
        let user_id = conn.user_id();

        // One stream per user: the previous one is fully torn down first.
        self.stop_logs(user_id).await;

        let stream = match self.source.open(container).await {
            Ok(stream) => stream,
            Err(LogSourceError::NotFound(_)) => {
                return Err(AppError::Resource(format!(
                    "Container '{container}' not found"
                )));
            }
            Err(e) => {
                return Err(AppError::Resource(format!("Container runtime error: {e}")));
            }
        };

        let stream_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        {
            // Holding the map lock across spawn + insert: a stream that ends
            // instantly blocks in its cleanup until the entry exists.
            let mut streams = self.streams.lock().await;
            let task = {
                let conn = conn.clone();
                let cancel = cancel.clone();
                let streams = self.streams.clone();
                tokio::spawn(async move {
                    pump_log_stream(stream, &conn, cancel).await;
                    // Natural termination: clear the entry unless a newer
                    // stream already replaced it.
                    let mut streams = streams.lock().await;
                    if streams
                        .get(&user_id)
                        .is_some_and(|s| s.stream_id == stream_id)
                    {
                        streams.remove(&user_id);
                    }
                })
            };
            streams.insert(
                user_id,
                RunningStream {
                    stream_id,
                    container: container.to_string(),
                    cancel,
                    task,
                },
            );
        }

        conn.send(&Frame {
            message: Some(format!("Started streaming logs for container: {container}")),
            ..Frame::new(MessageType::LogsStarted)
        });
        tracing::info!(user_id, container, "Started log streaming");
        Ok(())
    }

    /// Cancel the user's stream and await its task. Returns whether a stream
    /// was actually running; calling this on an idle user is a no-op.
    async fn stop_logs(&self, user_id: u64) -> bool {
        let entry = self.streams.lock().await.remove(&user_id);
        let Some(stream) = entry else {
            return false;
        };

        stream.cancel.cancel();
        if let Err(e) = stream.task.await {
            if !e.is_cancelled() {
                tracing::error!(user_id, error = ?e, "Log stream task failed");
            }
        }
        tracing::info!(user_id, container = %stream.container, "Stopped log streaming");
        true
    }
}

/// Drain log chunks into `log_line` frames, one per complete line.
///
/// Chunks are decoded lossily, buffered to newline boundaries, and the
/// trailing partial line is flushed when the runtime ends the stream. A
/// failed send is terminal. Cancellation drops the stream, releasing the
/// runtime resource.
async fn pump_log_stream(mut stream: LogChunkStream, conn: &Connection, cancel: CancellationToken) {
    use futures::StreamExt;

    let mut buffer = String::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            chunk = stream.next() => match chunk {
                None => break,
                Some(Ok(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    while let Some(pos) = buffer.find('\n') {
                        let line: String = buffer.drain(..=pos).collect();
                        if !conn.send(&Frame::log_line(line.trim_end())) {
                            return;
                        }
                    }
                }
                Some(Err(e)) => {
                    let err = AppError::Resource(format!("Error in log streaming: {e}"));
                    tracing::error!(user_id = conn.user_id(), error = %err, "Log stream failed");
                    // Best effort; the stream is terminal either way.
                    conn.send(&Frame::from(&err));
                    return;
                }
            }
        }
    }

    if !buffer.is_empty() {
        conn.send(&Frame::log_line(buffer.trim_end()));
    }
}

// ============================================================================
// Handler contract
// ============================================================================

#[async_trait]
impl ServiceHandler for LogStreamHandler {
    async fn handle_connect(&self, event: Event) -> AppResult<()> {
        let conn = event
            .conn
            .as_ref()
            .ok_or_else(|| AppError::Internal("connect event without a connection".into()))?;
        conn.send(&Frame::system(format!(
            "Container logs service: Connected as {}",
            event.username
        )));
        tracing::info!(
            user_id = event.user_id,
            username = %event.username,
            "Container logs service: user connected"
        );
        Ok(())
    }

    async fn handle_message(&self, event: Event) -> AppResult<()> {
        let conn = event
            .conn
            .as_ref()
            .ok_or_else(|| AppError::Internal("message event without a connection".into()))?;

        // The dispatcher gated admission on the same groups; commands are
        // re-checked so a token minted without them can never start a stream.
        if !conn.has_any_group(LOGS_GROUPS) {
            return Err(AppError::Auth(
                "You don't have permission to access container logs".to_string(),
            ));
        }

        let data = event.data.as_ref();
        let command = data.and_then(|d| d.get("type")).and_then(Value::as_str);
        let container = data
            .and_then(|d| d.get("container_name"))
            .and_then(Value::as_str);

        match (command, container) {
            (Some("start_logs"), Some(container)) => self.start_logs(conn, container).await,
            (Some("stop_logs"), _) => {
                if self.stop_logs(event.user_id).await {
                    conn.send(&Frame {
                        message: Some("Stopped streaming container logs".to_string()),
                        ..Frame::new(MessageType::LogsStopped)
                    });
                }
                Ok(())
            }
            _ => Err(AppError::Semantic(AVAILABLE_COMMANDS.to_string())),
        }
    }

    async fn handle_disconnect(&self, event: Event) -> AppResult<()> {
        self.stop_logs(event.user_id).await;
        tracing::info!(
            user_id = event.user_id,
            username = %event.username,
            "Container logs service: user disconnected"
        );
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
