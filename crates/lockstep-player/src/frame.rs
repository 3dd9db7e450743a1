//! Decoded frame records and the per-stream frame queue.
//!
//! A frame record owns whatever the render stage will need at its deadline:
//! for audio, the decoded PCM plus the decoder buffer handle to release after
//! the sink write; for video, only the handle, since presentation is a
//! release-to-surface operation performed by the decoder itself.

use std::collections::VecDeque;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::backend::BufferHandle;

/// Which of the two elementary streams something belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Audio,
    Video,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Audio => write!(f, "audio"),
            StreamKind::Video => write!(f, "video"),
        }
    }
}

/// A decoded audio frame waiting to be written to the sink.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Decoded PCM, copied out of the decoder's output buffer
    pub data: Bytes,
    /// Decoder buffer to release once the PCM has been written
    pub buffer: BufferHandle,
    /// Presentation timestamp in microseconds, relative to stream start
    pub pts_us: i64,
}

/// A decoded video frame waiting to be released to the surface.
#[derive(Debug, Clone, Copy)]
pub struct VideoFrame {
    /// Decoder buffer; releasing it with the render flag presents it
    pub buffer: BufferHandle,
    /// Presentation timestamp in microseconds, relative to stream start
    pub pts_us: i64,
}

/// Anything carrying a presentation timestamp.
pub trait Timestamped {
    fn pts_us(&self) -> i64;
}

impl Timestamped for AudioFrame {
    fn pts_us(&self) -> i64 {
        self.pts_us
    }
}

impl Timestamped for VideoFrame {
    fn pts_us(&self) -> i64 {
        self.pts_us
    }
}

/// A thread-safe FIFO of decoded frames for one stream.
///
/// Producer is the stream's decode stage, consumer is the sync stage. The
/// queue performs no reordering: decoders emit frames in presentation order,
/// so insertion order is presentation order.
pub struct FrameQueue<T> {
    frames: Mutex<VecDeque<T>>,
}

impl<T: Timestamped> FrameQueue<T> {
    pub fn new() -> Self {
        Self {
            frames: Mutex::new(VecDeque::new()),
        }
    }

    /// Appends a frame at the tail.
    pub fn push(&self, frame: T) {
        self.frames.lock().push_back(frame);
    }

    /// Removes and returns the head frame.
    pub fn pop(&self) -> Option<T> {
        self.frames.lock().pop_front()
    }

    /// Returns the head frame's timestamp without removing it.
    pub fn peek_pts(&self) -> Option<i64> {
        self.frames.lock().front().map(|f| f.pts_us())
    }

    /// Drops every queued frame, returning how many were discarded.
    pub fn clear(&self) -> usize {
        let mut frames = self.frames.lock();
        let dropped = frames.len();
        frames.clear();
        if dropped > 0 {
            tracing::debug!("FrameQueue::clear: discarded {} frames", dropped);
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }
}

impl<T: Timestamped> Default for FrameQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
