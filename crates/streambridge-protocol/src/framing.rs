//! Length-prefixed framing for the export stream.
//!
//! Frames carry a 2-byte little-endian length followed by the payload:
//!
//! ```text
//! +----------------+------------------+
//! | length (2 LE)  |  payload         |
//! +----------------+------------------+
//! ```

use serde::{Serialize, de::DeserializeOwned};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProtocolError, ProtocolResult};
use crate::{HEADER_LEN, MAX_FRAME_SIZE};

/// Default payload capacity of a [`FrameReader`].
pub const DEFAULT_READ_BUFFER: usize = 16_384;

/// Prefixes `payload` with its length.
///
/// # Example
///
/// ```rust
/// use streambridge_protocol::encode_frame;
///
/// let frame = encode_frame(b"abc").unwrap();
/// assert_eq!(frame, [3, 0, b'a', b'b', b'c']);
/// ```
pub fn encode_frame(payload: &[u8]) -> ProtocolResult<Vec<u8>> {
    let len = u16::try_from(payload.len()).map_err(|_| ProtocolError::MessageTooLarge {
        size: payload.len(),
        max: MAX_FRAME_SIZE,
    })?;

    let mut buffer = Vec::with_capacity(HEADER_LEN + payload.len());
    buffer.extend_from_slice(&len.to_le_bytes());
    buffer.extend_from_slice(payload);
    Ok(buffer)
}

/// Serializes `message` as JSON and frames it.
pub fn encode_message<T: Serialize>(message: &T) -> ProtocolResult<Vec<u8>> {
    let json = serde_json::to_vec(message)?;
    encode_frame(&json)
}

/// Returns the payload of the complete frame at the start of `data`.
///
/// Bytes after the declared payload are ignored.
pub fn decode_frame(data: &[u8]) -> ProtocolResult<&[u8]> {
    if data.len() < HEADER_LEN {
        return Err(ProtocolError::IncompleteMessage {
            expected: HEADER_LEN,
            received: data.len(),
        });
    }

    let len = usize::from(u16::from_le_bytes([data[0], data[1]]));
    let end = HEADER_LEN + len;
    if data.len() < end {
        return Err(ProtocolError::IncompleteMessage {
            expected: end,
            received: data.len(),
        });
    }

    Ok(&data[HEADER_LEN..end])
}

/// Reads frames from an async byte stream into a fixed-capacity buffer.
pub struct FrameReader<R> {
    reader: R,
    buffer: Vec<u8>,
    capacity: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_capacity(reader, DEFAULT_READ_BUFFER)
    }

    /// Creates a reader that rejects frames larger than `capacity` bytes.
    pub fn with_capacity(reader: R, capacity: usize) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(capacity.min(MAX_FRAME_SIZE)),
            capacity,
        }
    }

    /// Reads the next frame payload.
    ///
    /// Returns `Ok(None)` on a clean end of stream at a frame boundary.
    /// A frame longer than the reader capacity yields
    /// [`ProtocolError::FrameTooLarge`] and leaves the stream mid-frame, so
    /// the caller has to close it.
    pub async fn read_frame(&mut self) -> ProtocolResult<Option<&[u8]>> {
        let mut len_buf = [0u8; HEADER_LEN];
        match self.reader.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let len = usize::from(u16::from_le_bytes(len_buf));
        if len > self.capacity {
            return Err(ProtocolError::FrameTooLarge {
                size: len,
                capacity: self.capacity,
            });
        }

        self.buffer.resize(len, 0);
        match self.reader.read_exact(&mut self.buffer).await {
            Ok(_) => Ok(Some(self.buffer.as_slice())),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(ProtocolError::IncompleteMessage {
                    expected: HEADER_LEN + len,
                    received: HEADER_LEN,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Reads the next frame and decodes it as JSON.
    pub async fn read_message<T: DeserializeOwned>(&mut self) -> ProtocolResult<Option<T>> {
        match self.read_frame().await? {
            Some([]) => Err(ProtocolError::EmptyMessage),
            Some(payload) => Ok(Some(serde_json::from_slice(payload)?)),
            None => Ok(None),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Writes frames to an async byte stream.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes one frame and flushes it.
    pub async fn write_frame(&mut self, payload: &[u8]) -> ProtocolResult<()> {
        let frame = encode_frame(payload)?;
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Serializes `message` as JSON and writes it as one frame.
    pub async fn write_message<T: Serialize>(&mut self, message: &T) -> ProtocolResult<()> {
        let json = serde_json::to_vec(message)?;
        self.write_frame(&json).await
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}
