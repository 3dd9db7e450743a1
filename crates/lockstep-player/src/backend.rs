//! Capability traits for the platform collaborators.
//!
//! The engine does not implement container parsing, codecs, or audio output.
//! It consumes them through the narrow interfaces below, which mirror the
//! non-blocking buffer-exchange protocol of a typical platform decoder: the
//! demux stage polls for an input slot, copies one compressed sample into it,
//! and the decode stages poll for finished output buffers that are later
//! released back, with or without presentation.
//!
//! All handles are shared (`Arc<dyn ...>`) because different stages touch the
//! same collaborator: the demux stage feeds a decoder's input side while that
//! stream's decode stage drains its output side, and the control path flushes
//! it during a seek.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::PlayerError;
use crate::frame::StreamKind;

/// Identifies a free decoder input slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputSlot(pub u32);

/// Identifies a decoded output buffer owned by the decoder until released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u32);

/// Direction to resolve a seek target to a keyframe-aligned sync point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    /// Nearest sync point at or before the target
    PreviousSync,
    /// Nearest sync point at or after the target
    NextSync,
}

/// How an audio sink write may behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Blocking,
    NonBlocking,
}

/// Immutable description of one container track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackFormat {
    /// Codec/mime identifier, e.g. `audio/mp4a-latm` or `video/avc`
    pub mime: String,
    /// Declared track duration in microseconds
    pub duration_us: i64,
    /// Sample rate, audio tracks only
    pub sample_rate: Option<u32>,
    /// Channel count, audio tracks only
    pub channel_count: Option<u32>,
}

impl TrackFormat {
    pub fn is_audio(&self) -> bool {
        self.mime.starts_with("audio/")
    }

    pub fn is_video(&self) -> bool {
        self.mime.starts_with("video/")
    }
}

/// Container demuxer: yields per-track compressed samples with timestamps.
///
/// One instance serves one selected track; the engine keeps a separate
/// extractor per stream so that seek and end-of-stream are per-stream state.
pub trait SampleSource: Send + Sync {
    fn track_count(&self) -> usize;
    fn track_format(&self, index: usize) -> TrackFormat;
    fn select_track(&self, index: usize);
    /// Copies the current sample into `buf` and returns its size, or `None`
    /// once the track is exhausted.
    fn read_sample(&self, buf: &mut [u8]) -> Option<usize>;
    /// Presentation timestamp of the current sample, microseconds.
    fn sample_time_us(&self) -> i64;
    /// Advances to the next sample; returns false at end of stream.
    fn advance(&self) -> bool;
    /// Repositions to the sync point nearest `time_us` in the given mode.
    fn seek_to(&self, time_us: i64, mode: SeekMode);
    fn release(&self);
}

/// Result of polling a decoder's output side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderPoll {
    /// A decoded buffer is ready. `eos` marks the propagated end-of-stream
    /// buffer, which carries no presentable data.
    Frame {
        buffer: BufferHandle,
        pts_us: i64,
        eos: bool,
    },
    /// Nothing ready yet; poll again after a backoff
    TryAgain,
    /// Output format change notification; benign
    FormatChanged,
    /// Output buffer set change notification; benign
    BuffersChanged,
    /// Any status outside the defined set; fatal to the stream
    Status(i32),
}

/// Compressed-in / decoded-out codec with a non-blocking slot protocol.
pub trait DecoderBackend: Send + Sync {
    fn start(&self) -> Result<(), PlayerError>;
    fn stop(&self);
    /// Discards all queued input and pending output, reclaiming every
    /// outstanding buffer.
    fn flush(&self);
    /// Polls for a free input slot; never blocks.
    fn try_input_slot(&self) -> Option<InputSlot>;
    /// Submits one compressed sample.
    fn submit_input(&self, slot: InputSlot, data: &[u8], pts_us: i64);
    /// Submits an empty end-of-stream marker.
    fn submit_eos(&self, slot: InputSlot);
    /// Polls the output side; never blocks.
    fn try_output(&self) -> DecoderPoll;
    /// Decoded payload of an output buffer (PCM for audio decoders).
    fn output_data(&self, buffer: BufferHandle) -> Bytes;
    /// Returns a buffer to the decoder; `render` presents it to the surface
    /// the decoder was configured with.
    fn release_output(&self, buffer: BufferHandle, render: bool);
    fn release(&self);
}

/// PCM output device.
pub trait AudioSink: Send + Sync {
    fn play(&self);
    fn pause(&self);
    fn stop(&self);
    fn flush(&self);
    /// Writes PCM; returns the number of bytes accepted. May block briefly
    /// in [`WriteMode::Blocking`].
    fn write(&self, data: &[u8], mode: WriteMode) -> usize;
    fn is_playing(&self) -> bool;
    fn release(&self);
}

/// Opaque presentation target, handed to the video decoder factory at
/// configuration time. The engine never touches it otherwise.
pub trait VideoSurface: Send + Sync {}

/// Audio parameters the sink factory needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkConfig {
    pub sample_rate: u32,
    pub channels: u32,
}

pub type ExtractorFactory = Box<dyn Fn() -> Result<Arc<dyn SampleSource>, PlayerError> + Send + Sync>;
pub type AudioDecoderFactory =
    Box<dyn Fn(&TrackFormat) -> Result<Arc<dyn DecoderBackend>, PlayerError> + Send + Sync>;
pub type VideoDecoderFactory = Box<
    dyn Fn(&TrackFormat, &Arc<dyn VideoSurface>) -> Result<Arc<dyn DecoderBackend>, PlayerError>
        + Send
        + Sync,
>;
pub type SinkFactory =
    Box<dyn Fn(&SinkConfig) -> Result<Arc<dyn AudioSink>, PlayerError> + Send + Sync>;

/// Everything the platform supplies to build a player.
///
/// The extractor factory is called several times (once to probe tracks, once
/// per stream), so it must yield a fresh reader positioned at the start each
/// time.
pub struct MediaBackend {
    pub extractor: ExtractorFactory,
    pub audio_decoder: AudioDecoderFactory,
    pub video_decoder: VideoDecoderFactory,
    pub audio_sink: SinkFactory,
    pub surface: Arc<dyn VideoSurface>,
}

/// Returns true when `format` belongs to the given stream kind.
pub fn track_matches(format: &TrackFormat, kind: StreamKind) -> bool {
    match kind {
        StreamKind::Audio => format.is_audio(),
        StreamKind::Video => format.is_video(),
    }
}
