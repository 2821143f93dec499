// Inbound frame classification
//
// Control JSON and audio share one transport with no frame-type tag. Text
// frames are always JSON. Binary frames are JSON only when the first byte is
// '{'. Deferred payloads are peeked before being read in full so audio is
// materialized once.

use std::fmt;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::messages::ServerEvent;
use crate::audio::AudioChunk;

/// Binary payload that can be inspected before it is read in full
#[async_trait::async_trait]
pub trait DeferredPayload: Send {
    /// Up to `n` leading bytes, without consuming them
    async fn peek(&mut self, n: usize) -> io::Result<Vec<u8>>;

    /// The whole payload, including any peeked bytes
    async fn read_all(self: Box<Self>) -> io::Result<Vec<u8>>;
}

/// Deferred payload backed by any async reader
pub struct ReaderPayload<R> {
    reader: R,
    head: Vec<u8>,
}

impl<R> ReaderPayload<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            head: Vec::new(),
        }
    }
}

impl ReaderPayload<io::Cursor<Vec<u8>>> {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self::new(io::Cursor::new(bytes))
    }
}

#[async_trait::async_trait]
impl<R> DeferredPayload for ReaderPayload<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn peek(&mut self, n: usize) -> io::Result<Vec<u8>> {
        let mut buf = [0u8; 256];
        while self.head.len() < n {
            let want = (n - self.head.len()).min(buf.len());
            let read = self.reader.read(&mut buf[..want]).await?;
            if read == 0 {
                break;
            }
            self.head.extend_from_slice(&buf[..read]);
        }
        Ok(self.head[..self.head.len().min(n)].to_vec())
    }

    async fn read_all(self: Box<Self>) -> io::Result<Vec<u8>> {
        let ReaderPayload { mut reader, head } = *self;
        let mut bytes = head;
        reader.read_to_end(&mut bytes).await?;
        Ok(bytes)
    }
}

/// One inbound message as delivered by a transport
pub enum InboundFrame {
    Text(String),
    Binary(Vec<u8>),
    Deferred(Box<dyn DeferredPayload>),
}

impl fmt::Debug for InboundFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InboundFrame::Text(text) => f.debug_tuple("Text").field(&text.len()).finish(),
            InboundFrame::Binary(bytes) => f.debug_tuple("Binary").field(&bytes.len()).finish(),
            InboundFrame::Deferred(_) => f.write_str("Deferred"),
        }
    }
}

#[derive(Debug)]
pub enum Classified {
    Control(ServerEvent),
    Audio(AudioChunk),
}

/// Message-level failures; the offending frame is dropped
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("malformed control message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("control frame is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("failed to read payload: {0}")]
    Read(#[from] io::Error),
}

const JSON_OPEN_BRACE: u8 = b'{';

#[derive(Debug, Clone)]
pub struct FrameClassifier {
    peek_len: usize,
}

impl Default for FrameClassifier {
    fn default() -> Self {
        Self { peek_len: 10 }
    }
}

impl FrameClassifier {
    pub fn new(peek_len: usize) -> Self {
        Self { peek_len }
    }

    pub async fn classify(&self, frame: InboundFrame) -> Result<Classified, ClassifyError> {
        match frame {
            InboundFrame::Text(text) => Ok(Classified::Control(ServerEvent::parse(&text)?)),
            InboundFrame::Binary(bytes) => Self::classify_bytes(bytes),
            InboundFrame::Deferred(mut payload) => {
                let head = payload.peek(self.peek_len).await?;
                let looks_like_json = String::from_utf8_lossy(&head)
                    .trim_start()
                    .starts_with('{');

                let bytes = payload.read_all().await?;
                if looks_like_json {
                    let text = String::from_utf8(bytes)?;
                    Ok(Classified::Control(ServerEvent::parse(&text)?))
                } else {
                    Ok(Classified::Audio(AudioChunk::binary(bytes)))
                }
            }
        }
    }

    fn classify_bytes(bytes: Vec<u8>) -> Result<Classified, ClassifyError> {
        if bytes.first() == Some(&JSON_OPEN_BRACE) {
            let text = String::from_utf8(bytes)?;
            return Ok(Classified::Control(ServerEvent::parse(&text)?));
        }
        Ok(Classified::Audio(AudioChunk::binary(bytes)))
    }
}
