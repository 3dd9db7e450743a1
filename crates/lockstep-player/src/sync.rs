//! The synchronization stage: clock ownership and render scheduling.
//!
//! The sync tick is the only code that establishes ordering between the two
//! streams. It merges the heads of the frame queues, anchors the shared
//! clock on the first tick where *both* streams have a frame pending, and
//! converts stream-relative timestamps into absolute render deadlines on the
//! two render stages.
//!
//! The tie-break policy must hold exactly: the clock never starts from a
//! single stream, late video is released un-presented, and audio is never
//! dropped. A stale video frame is worse than a brief freeze; a dropped
//! audio frame is an audible glitch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backend::WriteMode;
use crate::clock::deadline;
use crate::frame::{AudioFrame, VideoFrame};
use crate::player::PlayerCore;

/// Re-poll interval while the queues are empty or the clock cannot start.
pub(crate) const SYNC_IDLE_INTERVAL: Duration = Duration::from_millis(10);

/// Arms a sync tick. Exactly one chain is kept alive: `play` starts it, a
/// quiesce kills it, and seek re-arms it.
pub(crate) fn schedule_sync(core: &Arc<PlayerCore>, delay: Duration) {
    let weak = Arc::downgrade(core);
    core.sync.post_delayed(delay, move || {
        if let Some(core) = weak.upgrade() {
            sync_tick(&core);
        }
    });
}

fn sync_tick(core: &Arc<PlayerCore>) {
    if core.has_fatal() {
        return;
    }

    let now = Instant::now();
    let audio_pts = core.audio_queue.peek_pts();
    let video_pts = core.video_queue.peek_pts();

    if audio_pts.is_none() && video_pts.is_none() {
        schedule_sync(core, SYNC_IDLE_INTERVAL);
        return;
    }

    if !core.clock.is_set() {
        // Starting from one stream alone would skew the other by however
        // long its decoder takes to warm up; wait until both are pending.
        let (Some(audio_pts), Some(video_pts)) = (audio_pts, video_pts) else {
            schedule_sync(core, SYNC_IDLE_INTERVAL);
            return;
        };
        core.clock.set(audio_pts.min(video_pts), now);
    }
    let Some(epoch) = core.clock.epoch() else {
        schedule_sync(core, SYNC_IDLE_INTERVAL);
        return;
    };

    if let Some(frame) = core.audio_queue.pop() {
        let at = deadline(epoch, frame.pts_us);
        post_audio_render(core, frame, at);
    }

    if let Some(frame) = core.video_queue.pop() {
        let at = deadline(epoch, frame.pts_us);
        if at < now {
            // Already late: presenting it would compound the lag.
            core.video_decoder.release_output(frame.buffer, false);
            core.stats.record_video_dropped();
            tracing::debug!("dropped late video frame at {} us", frame.pts_us);
        } else {
            post_video_render(core, frame, at);
        }
    }

    let backlog = !core.audio_queue.is_empty() || !core.video_queue.is_empty();
    let delay = if backlog {
        Duration::ZERO
    } else {
        SYNC_IDLE_INTERVAL
    };
    schedule_sync(core, delay);
}

/// Schedules the sink write at its absolute deadline.
fn post_audio_render(core: &Arc<PlayerCore>, frame: AudioFrame, at: Instant) {
    let weak = Arc::downgrade(core);
    core.audio_render.post_at(at, move || {
        let Some(core) = weak.upgrade() else {
            return;
        };
        if !core.sink.is_playing() {
            core.sink.play();
        }
        core.sink.write(&frame.data, WriteMode::NonBlocking);
        core.audio_decoder.release_output(frame.buffer, false);
        core.stats.record_audio_rendered();
        tracing::trace!("audio rendered at {} us", frame.pts_us);
    });
}

/// Schedules the release-to-surface at its absolute deadline.
fn post_video_render(core: &Arc<PlayerCore>, frame: VideoFrame, at: Instant) {
    let weak = Arc::downgrade(core);
    core.video_render.post_at(at, move || {
        let Some(core) = weak.upgrade() else {
            return;
        };
        core.video_decoder.release_output(frame.buffer, true);
        core.stats.record_video_rendered();
        tracing::trace!("video rendered at {} us", frame.pts_us);
    });
}
