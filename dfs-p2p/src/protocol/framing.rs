//! Frame decoders.
//!
//! The transport itself is format-agnostic: a [`Decoder`] pulls exactly one
//! frame off a connection per call. Two decoders are provided.
//!
//! [`LengthPrefixedDecoder`] (the default) reads frames laid out as:
//! - 4 bytes: big-endian payload length `N`
//! - N bytes: payload
//!
//! [`StreamDecoder`] treats every read from the socket as one opaque frame,
//! leaving framing to the application.

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::MAX_FRAME_SIZE;
use crate::error::DecodeError;
use crate::protocol::Rpc;

/// Length prefix size.
pub const HEADER_SIZE: usize = 4;

/// Default read size of [`StreamDecoder`].
pub const DEFAULT_STREAM_BUFFER_SIZE: usize = 1028;

/// Strategy that reads one frame from a connection into an [`Rpc`].
///
/// Implementations must stop at the frame boundary so the next call starts
/// on the next frame. Errors for which [`DecodeError::is_fatal`] is false
/// must leave the stream aligned.
#[async_trait]
pub trait Decoder: Send + Sync + 'static {
    /// Read one frame and store its payload in `rpc`.
    async fn decode(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        rpc: &mut Rpc,
    ) -> Result<(), DecodeError>;
}

/// Decoder for 4-byte big-endian length-prefixed frames.
#[derive(Debug, Clone, Copy)]
pub struct LengthPrefixedDecoder {
    max_frame_size: usize,
}

impl LengthPrefixedDecoder {
    /// Create a decoder accepting payloads up to `max_frame_size` bytes.
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Largest payload this decoder accepts.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for LengthPrefixedDecoder {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE)
    }
}

#[async_trait]
impl Decoder for LengthPrefixedDecoder {
    async fn decode(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        rpc: &mut Rpc,
    ) -> Result<(), DecodeError> {
        let mut header = [0u8; HEADER_SIZE];

        // EOF before the first header byte is a clean close, anywhere else it is a truncated frame
        let read = reader.read(&mut header).await?;
        if read == 0 {
            return Err(DecodeError::ConnectionClosed);
        }
        if read < HEADER_SIZE {
            reader.read_exact(&mut header[read..]).await?;
        }

        let length = u32::from_be_bytes(header) as usize;

        if length > self.max_frame_size {
            let skipped = tokio::io::copy(
                &mut (&mut *reader).take(length as u64),
                &mut tokio::io::sink(),
            )
            .await?;
            if skipped < length as u64 {
                return Err(DecodeError::Io(std::io::ErrorKind::UnexpectedEof.into()));
            }
            return Err(DecodeError::FrameTooLarge {
                size: length,
                max: self.max_frame_size,
            });
        }

        let mut payload = BytesMut::zeroed(length);
        reader.read_exact(&mut payload).await?;
        rpc.payload = payload.freeze();

        Ok(())
    }
}

/// Decoder that yields whatever a single socket read returns.
#[derive(Debug, Clone, Copy)]
pub struct StreamDecoder {
    buffer_size: usize,
}

impl StreamDecoder {
    /// Create a decoder reading at most `buffer_size` bytes per frame.
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
        }
    }
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_STREAM_BUFFER_SIZE)
    }
}

#[async_trait]
impl Decoder for StreamDecoder {
    async fn decode(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        rpc: &mut Rpc,
    ) -> Result<(), DecodeError> {
        let mut buf = BytesMut::zeroed(self.buffer_size);
        let read = reader.read(&mut buf).await?;
        if read == 0 {
            return Err(DecodeError::ConnectionClosed);
        }
        buf.truncate(read);
        rpc.payload = buf.freeze();
        Ok(())
    }
}

/// Encode a payload in the [`LengthPrefixedDecoder`] wire format.
///
/// # Panics
///
/// Panics if the payload is longer than `u32::MAX` bytes.
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let length = u32::try_from(payload.len()).expect("frame payload exceeds u32::MAX bytes");
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_u32(length);
    buf.put_slice(payload);
    buf.freeze()
}

/// Write one length-prefixed frame and flush.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(&encode_frame(payload)).await?;
    writer.flush().await
}
