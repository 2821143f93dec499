pub mod backend;
pub mod chunk;
pub mod decoder;
pub mod encoder;
pub mod file;
pub mod playback;
pub mod sink;

pub use backend::{
    CaptureBlock, CaptureConfig, CaptureSource, CaptureSourceFactory, ChannelCapture,
    InputSource, ReaderCapture,
};
pub use chunk::{AudioChunk, ChunkOrigin};
pub use decoder::{
    ChunkDecoder, ContainerDecoder, DecodedAudio, DecodedFormat, DecoderChain, PcmCandidate,
    PcmDecoder, SampleEncoding,
};
pub use encoder::{encode_pcm16, AudioFrameEncoder, PCM_MIME_TYPE};
pub use file::WavCapture;
pub use playback::{
    PlaybackConfig, PlaybackCounters, PlaybackHandle, PlaybackScheduler, ScheduledChunk,
};
pub use sink::{create_sink, AudioSink, NullSink, OutputTarget, PcmWriterSink};
