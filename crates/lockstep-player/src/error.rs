//! Error types for the playback engine.

use crate::frame::StreamKind;

/// Errors that can occur while building or driving the playback pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerError {
    /// The extractor factory failed to open the media source
    OpenFailed(String),
    /// A decoder factory failed to produce a decoder for a track
    DecoderInit(String),
    /// The audio sink factory failed
    SinkInit(String),
    /// The container has no track of the required kind
    MissingTrack(StreamKind),
    /// The audio track declares a channel layout the sink cannot take
    UnsupportedChannelCount(u32),
    /// A decoder returned a status code outside the defined set
    UnexpectedDecoderStatus { stream: StreamKind, code: i32 },
    /// A stage failed to acknowledge a quiesce request in time
    StageUnresponsive(&'static str),
    /// The operation is not valid in the current lifecycle state
    InvalidState(&'static str),
    /// The player has been released
    Released,
}

impl std::fmt::Display for PlayerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayerError::OpenFailed(msg) => write!(f, "failed to open media source: {msg}"),
            PlayerError::DecoderInit(msg) => write!(f, "decoder initialization failed: {msg}"),
            PlayerError::SinkInit(msg) => write!(f, "audio sink initialization failed: {msg}"),
            PlayerError::MissingTrack(kind) => write!(f, "container has no {kind} track"),
            PlayerError::UnsupportedChannelCount(n) => {
                write!(f, "audio sink does not support {n} channels")
            }
            PlayerError::UnexpectedDecoderStatus { stream, code } => {
                write!(f, "unexpected status {code} from {stream} decoder")
            }
            PlayerError::StageUnresponsive(stage) => {
                write!(f, "stage {stage} did not acknowledge quiesce")
            }
            PlayerError::InvalidState(op) => write!(f, "{op} is not valid in this state"),
            PlayerError::Released => write!(f, "player has been released"),
        }
    }
}

impl std::error::Error for PlayerError {}
