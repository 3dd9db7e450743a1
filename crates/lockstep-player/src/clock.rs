//! The shared presentation clock and pipeline counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// The wall-clock anchor for stream-relative timestamps.
///
/// The epoch is set exactly once per playback segment (on first play and
/// after every seek) to `now - min(first_audio_pts, first_video_pts)`, and
/// stays fixed until the next seek or stop. Every render deadline is
/// `epoch + pts`. While unset, no deadline may be computed; the sync stage
/// checks [`PlaybackClock::epoch`] before scheduling anything.
pub struct PlaybackClock {
    epoch: Mutex<Option<Instant>>,
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self {
            epoch: Mutex::new(None),
        }
    }

    /// Anchors the clock so that `base_pts_us` corresponds to `now`.
    pub fn set(&self, base_pts_us: i64, now: Instant) {
        let base = Duration::from_micros(base_pts_us.max(0) as u64);
        *self.epoch.lock() = Some(now - base);
        tracing::debug!("clock started: base pts {} us", base_pts_us);
    }

    /// Returns the epoch, or `None` while the clock is unset.
    pub fn epoch(&self) -> Option<Instant> {
        *self.epoch.lock()
    }

    pub fn is_set(&self) -> bool {
        self.epoch.lock().is_some()
    }

    /// Unsets the clock for the next playback segment.
    pub fn reset(&self) {
        *self.epoch.lock() = None;
    }

    /// Elapsed stream time, or `None` while the clock is unset.
    pub fn position(&self) -> Option<Duration> {
        self.epoch
            .lock()
            .map(|epoch| Instant::now().saturating_duration_since(epoch))
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Computes the absolute render deadline for a timestamp.
pub fn deadline(epoch: Instant, pts_us: i64) -> Instant {
    epoch + Duration::from_micros(pts_us.max(0) as u64)
}

/// Counters for what the pipeline has presented and discarded.
///
/// Lock-free; written by the sync and render stages, read from anywhere.
#[derive(Default)]
pub struct PipelineStats {
    audio_frames_rendered: AtomicU64,
    video_frames_rendered: AtomicU64,
    video_frames_dropped: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_audio_rendered(&self) {
        self.audio_frames_rendered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_video_rendered(&self) {
        self.video_frames_rendered.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a video frame released un-presented because its deadline had
    /// already passed when the sync stage saw it.
    pub fn record_video_dropped(&self) {
        self.video_frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            audio_frames_rendered: self.audio_frames_rendered.load(Ordering::Relaxed),
            video_frames_rendered: self.video_frames_rendered.load(Ordering::Relaxed),
            video_frames_dropped: self.video_frames_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub audio_frames_rendered: u64,
    pub video_frames_rendered: u64,
    pub video_frames_dropped: u64,
}
