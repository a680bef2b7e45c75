//! Unix socket exporter.
//!
//! Each consumer that connects gets an [`ExportSession`]: a bounded queue
//! registered with the broker under every export topic, and a send loop that
//! writes each payload as one frame. A connection that stays idle for the
//! keepalive interval receives a ping frame.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use streambridge_core::{Broker, SinkHandle};
use streambridge_protocol::{FrameWriter, KEEPALIVE_PAYLOAD};
use streambridge_sources::Deadline;

use crate::config::ExportConfig;
use crate::error::{ServerError, ServerResult};

/// Listener that hands broker events to local consumers.
pub struct ExportServer {
    config: ExportConfig,
    listener: UnixListener,
    broker: Broker<Bytes>,
    connection_semaphore: Arc<Semaphore>,
}

impl std::fmt::Debug for ExportServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportServer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ExportServer {
    /// Binds the socket described by `config`.
    ///
    /// A leftover socket file is removed when `cleanup_stale_socket` is set
    /// and nothing answers on it. A live socket is never taken over.
    pub async fn new(config: ExportConfig, broker: Broker<Bytes>) -> ServerResult<Self> {
        let socket_path = &config.socket_path;

        if let Some(parent) = socket_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            return Err(ServerError::socket_path_invalid(
                parent.to_string_lossy().to_string(),
            ));
        }

        if socket_path.exists() {
            if !config.cleanup_stale_socket {
                return Err(ServerError::socket_in_use(
                    socket_path.to_string_lossy().to_string(),
                ));
            }
            if UnixStream::connect(socket_path).await.is_ok() {
                return Err(ServerError::socket_in_use(
                    socket_path.to_string_lossy().to_string(),
                ));
            }
            info!(path = %socket_path.display(), "removing stale socket");
            std::fs::remove_file(socket_path)?;
        }

        let listener = UnixListener::bind(socket_path)?;
        info!(path = %socket_path.display(), "export socket listening");

        let connection_semaphore = Arc::new(Semaphore::new(config.max_connections));
        Ok(Self {
            config,
            listener,
            broker,
            connection_semaphore,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    /// Waits for the next consumer and registers its session.
    pub async fn accept(&self) -> ServerResult<ExportSession> {
        let permit = Arc::clone(&self.connection_semaphore)
            .acquire_owned()
            .await
            .map_err(|_| ServerError::Shutdown)?;
        let (stream, _addr) = self.listener.accept().await?;
        info!("consumer connected");

        Ok(ExportSession::new(
            stream,
            &self.broker,
            &self.config.topics,
            self.config.sink_capacity,
            self.config.keepalive(),
            Some(permit),
        ))
    }

    /// Accepts consumers until `cancel` fires. Sessions stop with it.
    pub async fn run(&self, cancel: CancellationToken) -> ServerResult<()> {
        loop {
            let session = tokio::select! {
                () = cancel.cancelled() => {
                    info!("export server stopping");
                    return Ok(());
                }
                session = self.accept() => session,
            };
            match session {
                Ok(session) => {
                    let cancel = cancel.child_token();
                    tokio::spawn(async move {
                        if let Err(e) = session.run(cancel).await {
                            warn!(error = %e, "consumer session ended");
                        }
                    });
                }
                Err(e) => error!(error = %e, "failed to accept consumer"),
            }
        }
    }
}

impl Drop for ExportServer {
    fn drop(&mut self) {
        if self.config.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.config.socket_path) {
                warn!(
                    path = %self.config.socket_path.display(),
                    error = %e,
                    "failed to remove socket file"
                );
            } else {
                debug!(path = %self.config.socket_path.display(), "removed socket file");
            }
        }
    }
}

/// One connected consumer.
pub struct ExportSession {
    writer: FrameWriter<UnixStream>,
    events: mpsc::Receiver<Bytes>,
    handles: Vec<SinkHandle<Bytes>>,
    keepalive: Deadline,
    _permit: Option<OwnedSemaphorePermit>,
}

impl ExportSession {
    /// Registers a fresh sink under each of `topics`.
    pub fn new(
        stream: UnixStream,
        broker: &Broker<Bytes>,
        topics: &[String],
        capacity: usize,
        keepalive: Duration,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Self {
        let (sink, events) = mpsc::channel(capacity.max(1));
        let handles = topics
            .iter()
            .map(|topic| broker.add_sink(topic.as_str(), sink.clone()))
            .collect();
        Self {
            writer: FrameWriter::new(stream),
            events,
            handles,
            keepalive: Deadline::armed(keepalive),
            _permit: permit,
        }
    }

    /// Forwards events until the consumer goes away or `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) -> ServerResult<()> {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(()),
                event = self.events.recv() => {
                    let Some(payload) = event else {
                        return Ok(());
                    };
                    match self.writer.write_frame(&payload).await {
                        Ok(()) => {}
                        Err(e) if e.is_fatal() => return Err(e.into()),
                        Err(e) => warn!(error = %e, "event not exported"),
                    }
                    self.keepalive.reset();
                }
                () = self.keepalive.expired() => {
                    self.writer.write_frame(KEEPALIVE_PAYLOAD).await?;
                    self.keepalive.reset();
                }
            }
        }
    }
}

impl Drop for ExportSession {
    fn drop(&mut self) {
        for handle in self.handles.drain(..) {
            handle.remove();
        }
        info!("consumer disconnected");
    }
}
