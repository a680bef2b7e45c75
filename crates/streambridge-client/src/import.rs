//! Import loop reading envelopes from the daemon's export socket.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use streambridge_protocol::{DEFAULT_READ_BUFFER, Envelope, FrameReader, Inbound, decode_envelope};

use crate::dispatch::Dispatch;
use crate::error::{ClientError, ClientResult};

/// Counters for one import session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub dispatched: u64,
    pub keepalives: u64,
    pub skipped: u64,
}

/// Connects to the export socket and feeds a [`Dispatch`].
#[derive(Debug, Clone)]
pub struct ImportClient {
    socket_path: PathBuf,
    connect_timeout: Duration,
    buffer_size: usize,
}

impl ImportClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            connect_timeout: Duration::from_secs(5),
            buffer_size: DEFAULT_READ_BUFFER,
        }
    }

    /// Creates a client for the daemon's default socket path.
    pub fn with_defaults() -> Self {
        Self::new(streambridge_protocol::default_socket_path())
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Largest frame accepted. Bigger frames end the session.
    #[must_use]
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub async fn connect(&self) -> ClientResult<UnixStream> {
        debug!(socket = %self.socket_path.display(), "connecting to daemon");
        tokio::time::timeout(self.connect_timeout, UnixStream::connect(&self.socket_path))
            .await
            .map_err(|_| ClientError::Timeout(self.connect_timeout))?
            .map_err(|source| ClientError::Connection {
                path: self.socket_path.display().to_string(),
                source,
            })
    }

    /// Connects and dispatches until the daemon closes the stream or
    /// `cancel` fires.
    pub async fn run<D: Dispatch>(
        &self,
        dispatch: &mut D,
        cancel: &CancellationToken,
    ) -> ClientResult<ImportStats> {
        let stream = self.connect().await?;
        info!(socket = %self.socket_path.display(), "connected to daemon");
        import(
            FrameReader::with_capacity(stream, self.buffer_size),
            dispatch,
            cancel,
        )
        .await
    }
}

/// Reads frames from `reader` and routes each envelope to `dispatch`.
///
/// Keepalives are consumed here and envelopes of unknown kinds are skipped.
///
/// # Errors
///
/// Returns [`ClientError::Protocol`] for a payload that is not an envelope
/// or a frame larger than the read buffer. A clean end of stream is `Ok`.
pub async fn import<R, D>(
    mut reader: FrameReader<R>,
    dispatch: &mut D,
    cancel: &CancellationToken,
) -> ClientResult<ImportStats>
where
    R: AsyncRead + Unpin,
    D: Dispatch,
{
    let mut stats = ImportStats::default();
    loop {
        let inbound = tokio::select! {
            () = cancel.cancelled() => break,
            frame = reader.read_frame() => match frame? {
                Some(payload) => decode_envelope(payload)?,
                None => {
                    info!("daemon closed the stream");
                    break;
                }
            },
        };

        match inbound {
            Inbound::Envelope(Envelope::Ping) => {
                trace!("keepalive");
                stats.keepalives += 1;
            }
            Inbound::Envelope(envelope) => {
                debug!(kind = envelope.kind(), "event received");
                dispatch.dispatch(envelope);
                stats.dispatched += 1;
            }
            Inbound::Unknown { kind } => {
                warn!(kind = %kind, "skipping unknown event type");
                stats.skipped += 1;
            }
        }
    }
    Ok(stats)
}
