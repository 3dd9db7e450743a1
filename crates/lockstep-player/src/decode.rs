//! Feed and drain drivers for the two decoders.
//!
//! Both streams run the same pair of self-rescheduling ticks. The feed tick
//! lives on the demux stage (one chain per stream, sharing that stage's
//! serial order so extractor calls never interleave with each other); the
//! drain tick lives on the stream's own decode stage. Neither ever blocks on
//! the decoder: an empty poll reschedules the tick after a short backoff.
//!
//! A chain ends when its stream reaches end-of-stream or a fatal error is
//! recorded; seek and play re-arm all four chains.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::DecoderPoll;
use crate::error::PlayerError;
use crate::frame::{AudioFrame, StreamKind, VideoFrame};
use crate::player::PlayerCore;

/// Delay before re-polling a decoder that reported no work.
pub(crate) const POLL_BACKOFF: Duration = Duration::from_millis(10);

/// Scratch capacity for one compressed sample copied out of the demuxer.
pub(crate) const SAMPLE_SCRATCH_BYTES: usize = 2 * 1024 * 1024;

/// Arms a feed tick for `stream` on the demux stage.
pub(crate) fn schedule_feed(core: &Arc<PlayerCore>, stream: StreamKind, delay: Duration) {
    let weak = Arc::downgrade(core);
    core.demux.post_delayed(delay, move || {
        if let Some(core) = weak.upgrade() {
            feed_tick(&core, stream);
        }
    });
}

/// Arms a drain tick for `stream` on its decode stage.
pub(crate) fn schedule_drain(core: &Arc<PlayerCore>, stream: StreamKind, delay: Duration) {
    let weak = Arc::downgrade(core);
    core.decode_stage(stream).post_delayed(delay, move || {
        if let Some(core) = weak.upgrade() {
            drain_tick(&core, stream);
        }
    });
}

/// One pass of the input side: move a single compressed sample from the
/// extractor into a decoder input slot, or back off if no slot is free.
fn feed_tick(core: &Arc<PlayerCore>, stream: StreamKind) {
    if core.has_fatal() || core.input_eos(stream).load(Ordering::Acquire) {
        return;
    }

    let decoder = core.decoder(stream);
    let Some(slot) = decoder.try_input_slot() else {
        schedule_feed(core, stream, POLL_BACKOFF);
        return;
    };

    let extractor = core.extractor(stream);
    let mut scratch = core.scratch(stream).lock();
    match extractor.read_sample(&mut scratch) {
        Some(size) => {
            let pts_us = extractor.sample_time_us();
            decoder.submit_input(slot, &scratch[..size], pts_us);
            extractor.advance();
            drop(scratch);
            tracing::trace!("{stream} feed: {size} bytes at {pts_us} us");
            schedule_feed(core, stream, Duration::ZERO);
        }
        None => {
            decoder.submit_eos(slot);
            core.input_eos(stream).store(true, Ordering::Release);
            tracing::debug!("{stream} input exhausted");
        }
    }
}

/// One pass of the output side: pull at most one decoded buffer, enqueue it
/// for the sync stage, and immediately re-arm. Drain is not rate-limited.
fn drain_tick(core: &Arc<PlayerCore>, stream: StreamKind) {
    if core.has_fatal() || core.output_eos(stream).load(Ordering::Acquire) {
        return;
    }

    let decoder = core.decoder(stream);
    match decoder.try_output() {
        DecoderPoll::Frame {
            buffer,
            pts_us,
            eos,
        } => {
            if eos {
                decoder.release_output(buffer, false);
                core.output_eos(stream).store(true, Ordering::Release);
                tracing::debug!("{stream} output drained");
                return;
            }

            match stream {
                StreamKind::Audio => {
                    let data = decoder.output_data(buffer);
                    core.audio_queue.push(AudioFrame {
                        data,
                        buffer,
                        pts_us,
                    });
                }
                StreamKind::Video => {
                    core.video_queue.push(VideoFrame { buffer, pts_us });
                }
            }
            tracing::trace!("{stream} drain: buffer {} at {pts_us} us", buffer.0);
            schedule_drain(core, stream, Duration::ZERO);
        }
        DecoderPoll::TryAgain | DecoderPoll::FormatChanged | DecoderPoll::BuffersChanged => {
            schedule_drain(core, stream, POLL_BACKOFF);
        }
        DecoderPoll::Status(code) => {
            core.report_fatal(PlayerError::UnexpectedDecoderStatus { stream, code });
        }
    }
}
