/// Where an inbound audio chunk came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOrigin {
    /// A raw binary frame on the transport
    Binary,
    /// Base64 inline data inside a model turn
    Inline { mime_type: String },
}

/// Opaque audio bytes whose encoding is unknown until a decoder accepts them
///
/// Immutable once created; moved into the playback queue and consumed once.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    bytes: Vec<u8>,
    origin: ChunkOrigin,
}

impl AudioChunk {
    pub fn new(bytes: Vec<u8>, origin: ChunkOrigin) -> Self {
        Self { bytes, origin }
    }

    pub fn binary(bytes: Vec<u8>) -> Self {
        Self::new(bytes, ChunkOrigin::Binary)
    }

    pub fn inline(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self::new(
            bytes,
            ChunkOrigin::Inline {
                mime_type: mime_type.into(),
            },
        )
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn origin(&self) -> &ChunkOrigin {
        &self.origin
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
