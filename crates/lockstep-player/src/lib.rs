//! lockstep-player: an audio+video playback pipeline with deadline-scheduled
//! A/V synchronization.
//!
//! The engine pulls compressed samples from a container demuxer, feeds two
//! platform decoders, and presents decoded output to an audio sink and a
//! video surface in mutual time synchronization. Six serial stages cooperate
//! through thread-safe queues:
//!
//! | Stage | Work |
//! |-------|------|
//! | demux | move compressed samples into decoder input slots |
//! | audio-decode | drain decoded PCM into the audio frame queue |
//! | video-decode | drain decoded buffer handles into the video frame queue |
//! | sync | own the presentation clock, schedule renders at deadlines |
//! | audio-render | write PCM to the sink at its deadline |
//! | video-render | release buffers to the surface at their deadlines |
//!
//! The demuxer, decoders, and sink are supplied by the platform through the
//! capability traits in [`backend`]; the engine implements no codecs and no
//! container parsing.
//!
//! # Example
//!
//! ```ignore
//! use lockstep_player::{AvPlayer, MediaBackend, SeekMode};
//! use std::time::Duration;
//!
//! let player = AvPlayer::new(MediaBackend {
//!     extractor: Box::new(open_extractor),
//!     audio_decoder: Box::new(make_audio_decoder),
//!     video_decoder: Box::new(make_video_decoder),
//!     audio_sink: Box::new(make_sink),
//!     surface,
//! })?;
//!
//! player.play()?;
//! player.seek(Duration::from_secs(15), SeekMode::PreviousSync)?;
//! player.release()?;
//! ```

pub mod backend;
pub mod clock;
pub mod error;
pub mod frame;
pub mod player;
pub mod stage;

mod decode;
mod sync;

pub use backend::{
    AudioSink, BufferHandle, DecoderBackend, DecoderPoll, InputSlot, MediaBackend, SampleSource,
    SeekMode, SinkConfig, TrackFormat, VideoSurface, WriteMode,
};
pub use clock::StatsSnapshot;
pub use error::PlayerError;
pub use frame::{AudioFrame, StreamKind, VideoFrame};
pub use player::AvPlayer;
