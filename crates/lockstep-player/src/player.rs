//! The player: construction, control protocol, and stage coordination.
//!
//! `AvPlayer` owns the six pipeline stages and every piece of shared state
//! (frame queues, clock, EOS flags, counters). Control operations (play,
//! seek, release) run on the caller's thread behind a single control mutex,
//! so they are serialized against each other. Seek and release first drive
//! the six stages through a quiesce rendezvous; only once every stage has
//! parked and had its pending work cancelled is any shared state mutated.
//!
//! The decoders, extractors, and audio sink are platform capabilities passed
//! in through [`MediaBackend`]; the engine only ever drives their
//! start/stop/flush/release lifecycle at the points defined here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::bounded;
use parking_lot::Mutex;

use crate::backend::{
    track_matches, AudioSink, DecoderBackend, MediaBackend, SampleSource, SeekMode, SinkConfig,
};
use crate::clock::{PipelineStats, PlaybackClock, StatsSnapshot};
use crate::decode::{schedule_drain, schedule_feed, SAMPLE_SCRATCH_BYTES};
use crate::error::PlayerError;
use crate::frame::{AudioFrame, FrameQueue, StreamKind, VideoFrame};
use crate::stage::{Stage, StageHandle};
use crate::sync::schedule_sync;

const STAGE_COUNT: usize = 6;

/// How long a control operation waits for every stage to acknowledge a
/// quiesce request before giving up.
const RENDEZVOUS_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared state reachable from the stage tasks.
pub(crate) struct PlayerCore {
    pub(crate) audio_extractor: Arc<dyn SampleSource>,
    pub(crate) video_extractor: Arc<dyn SampleSource>,
    pub(crate) audio_decoder: Arc<dyn DecoderBackend>,
    pub(crate) video_decoder: Arc<dyn DecoderBackend>,
    pub(crate) sink: Arc<dyn AudioSink>,

    pub(crate) audio_queue: FrameQueue<AudioFrame>,
    pub(crate) video_queue: FrameQueue<VideoFrame>,
    pub(crate) clock: PlaybackClock,
    pub(crate) stats: PipelineStats,

    audio_input_eos: AtomicBool,
    audio_output_eos: AtomicBool,
    video_input_eos: AtomicBool,
    video_output_eos: AtomicBool,

    pub(crate) demux: StageHandle,
    pub(crate) audio_decode: StageHandle,
    pub(crate) video_decode: StageHandle,
    pub(crate) sync: StageHandle,
    pub(crate) audio_render: StageHandle,
    pub(crate) video_render: StageHandle,

    fatal: Mutex<Option<PlayerError>>,
    audio_scratch: Mutex<Vec<u8>>,
    video_scratch: Mutex<Vec<u8>>,
}

impl PlayerCore {
    pub(crate) fn extractor(&self, stream: StreamKind) -> &Arc<dyn SampleSource> {
        match stream {
            StreamKind::Audio => &self.audio_extractor,
            StreamKind::Video => &self.video_extractor,
        }
    }

    pub(crate) fn decoder(&self, stream: StreamKind) -> &Arc<dyn DecoderBackend> {
        match stream {
            StreamKind::Audio => &self.audio_decoder,
            StreamKind::Video => &self.video_decoder,
        }
    }

    pub(crate) fn decode_stage(&self, stream: StreamKind) -> &StageHandle {
        match stream {
            StreamKind::Audio => &self.audio_decode,
            StreamKind::Video => &self.video_decode,
        }
    }

    pub(crate) fn scratch(&self, stream: StreamKind) -> &Mutex<Vec<u8>> {
        match stream {
            StreamKind::Audio => &self.audio_scratch,
            StreamKind::Video => &self.video_scratch,
        }
    }

    pub(crate) fn input_eos(&self, stream: StreamKind) -> &AtomicBool {
        match stream {
            StreamKind::Audio => &self.audio_input_eos,
            StreamKind::Video => &self.video_input_eos,
        }
    }

    pub(crate) fn output_eos(&self, stream: StreamKind) -> &AtomicBool {
        match stream {
            StreamKind::Audio => &self.audio_output_eos,
            StreamKind::Video => &self.video_output_eos,
        }
    }

    fn reset_eos(&self) {
        self.audio_input_eos.store(false, Ordering::Release);
        self.audio_output_eos.store(false, Ordering::Release);
        self.video_input_eos.store(false, Ordering::Release);
        self.video_output_eos.store(false, Ordering::Release);
    }

    /// Records the first fatal error; the polling chains check this and stop.
    pub(crate) fn report_fatal(&self, err: PlayerError) {
        let mut slot = self.fatal.lock();
        if slot.is_none() {
            tracing::error!("fatal pipeline error: {err}");
            *slot = Some(err);
        }
    }

    pub(crate) fn has_fatal(&self) -> bool {
        self.fatal.lock().is_some()
    }

    fn stage_handles(&self) -> [&StageHandle; STAGE_COUNT] {
        [
            &self.demux,
            &self.audio_decode,
            &self.video_decode,
            &self.sync,
            &self.audio_render,
            &self.video_render,
        ]
    }
}

/// The six stage workers, in spawn order.
struct StageSet {
    demux: Stage,
    audio_decode: Stage,
    video_decode: Stage,
    sync: Stage,
    audio_render: Stage,
    video_render: Stage,
}

impl StageSet {
    fn spawn() -> Self {
        Self {
            demux: Stage::spawn("demux"),
            audio_decode: Stage::spawn("audio-decode"),
            video_decode: Stage::spawn("video-decode"),
            sync: Stage::spawn("sync"),
            audio_render: Stage::spawn("audio-render"),
            video_render: Stage::spawn("video-render"),
        }
    }

    fn shutdown(&mut self) {
        self.demux.shutdown();
        self.audio_decode.shutdown();
        self.video_decode.shutdown();
        self.sync.shutdown();
        self.audio_render.shutdown();
        self.video_render.shutdown();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Playing,
    Seeking,
    Released,
}

struct ControlState {
    lifecycle: Lifecycle,
    stages: StageSet,
}

/// A synchronized audio+video player over platform-supplied media services.
pub struct AvPlayer {
    core: Arc<PlayerCore>,
    control: Mutex<ControlState>,
    duration: Duration,
}

impl AvPlayer {
    /// Builds a player for one audio and one video track.
    ///
    /// Fails without starting anything if either track is missing, the audio
    /// layout is unsupported, or any collaborator factory fails; the engine
    /// never runs in a partial state.
    pub fn new(backend: MediaBackend) -> Result<Self, PlayerError> {
        let probe = (backend.extractor)()?;
        let mut audio = None;
        let mut video = None;
        for index in 0..probe.track_count() {
            let format = probe.track_format(index);
            if audio.is_none() && track_matches(&format, StreamKind::Audio) {
                audio = Some((index, format));
            } else if video.is_none() && track_matches(&format, StreamKind::Video) {
                video = Some((index, format));
            }
        }
        probe.release();

        let (audio_index, audio_format) =
            audio.ok_or(PlayerError::MissingTrack(StreamKind::Audio))?;
        let (video_index, video_format) =
            video.ok_or(PlayerError::MissingTrack(StreamKind::Video))?;

        let sample_rate = audio_format
            .sample_rate
            .ok_or_else(|| PlayerError::SinkInit("audio track declares no sample rate".into()))?;
        let channels = audio_format.channel_count.ok_or_else(|| {
            PlayerError::SinkInit("audio track declares no channel count".into())
        })?;
        if channels != 1 && channels != 2 {
            return Err(PlayerError::UnsupportedChannelCount(channels));
        }

        let audio_extractor = (backend.extractor)()?;
        audio_extractor.select_track(audio_index);
        let video_extractor = match (backend.extractor)() {
            Ok(extractor) => extractor,
            Err(e) => {
                audio_extractor.release();
                return Err(e);
            }
        };
        video_extractor.select_track(video_index);

        let audio_decoder = match (backend.audio_decoder)(&audio_format) {
            Ok(decoder) => decoder,
            Err(e) => {
                audio_extractor.release();
                video_extractor.release();
                return Err(e);
            }
        };
        let video_decoder = match (backend.video_decoder)(&video_format, &backend.surface) {
            Ok(decoder) => decoder,
            Err(e) => {
                audio_decoder.release();
                audio_extractor.release();
                video_extractor.release();
                return Err(e);
            }
        };
        let sink = match (backend.audio_sink)(&SinkConfig {
            sample_rate,
            channels,
        }) {
            Ok(sink) => sink,
            Err(e) => {
                audio_decoder.release();
                video_decoder.release();
                audio_extractor.release();
                video_extractor.release();
                return Err(e);
            }
        };

        let duration = Duration::from_micros(
            audio_format
                .duration_us
                .max(video_format.duration_us)
                .max(0) as u64,
        );

        let stages = StageSet::spawn();
        let core = Arc::new(PlayerCore {
            audio_extractor,
            video_extractor,
            audio_decoder,
            video_decoder,
            sink,
            audio_queue: FrameQueue::new(),
            video_queue: FrameQueue::new(),
            clock: PlaybackClock::new(),
            stats: PipelineStats::new(),
            audio_input_eos: AtomicBool::new(false),
            audio_output_eos: AtomicBool::new(false),
            video_input_eos: AtomicBool::new(false),
            video_output_eos: AtomicBool::new(false),
            demux: stages.demux.handle(),
            audio_decode: stages.audio_decode.handle(),
            video_decode: stages.video_decode.handle(),
            sync: stages.sync.handle(),
            audio_render: stages.audio_render.handle(),
            video_render: stages.video_render.handle(),
            fatal: Mutex::new(None),
            audio_scratch: Mutex::new(vec![0; SAMPLE_SCRATCH_BYTES]),
            video_scratch: Mutex::new(vec![0; SAMPLE_SCRATCH_BYTES]),
        });

        tracing::debug!(
            "player built: audio track {}, video track {}, duration {:?}",
            audio_index,
            video_index,
            duration
        );

        Ok(Self {
            core,
            control: Mutex::new(ControlState {
                lifecycle: Lifecycle::Idle,
                stages,
            }),
            duration,
        })
    }

    /// Starts playback from the current extractor positions.
    pub fn play(&self) -> Result<(), PlayerError> {
        let mut control = self.control.lock();
        match control.lifecycle {
            Lifecycle::Released => return Err(PlayerError::Released),
            Lifecycle::Playing | Lifecycle::Seeking => {
                return Err(PlayerError::InvalidState("play"))
            }
            Lifecycle::Idle => {}
        }

        let core = &self.core;
        core.reset_eos();
        core.clock.reset();
        core.audio_decoder.start()?;
        core.video_decoder.start()?;
        core.audio_queue.clear();
        core.video_queue.clear();

        self.arm_pipeline();
        control.lifecycle = Lifecycle::Playing;
        tracing::debug!("playback started");
        Ok(())
    }

    /// Seeks to the sync point nearest `position` in the requested mode.
    ///
    /// Blocks the caller until all six stages have quiesced, repositions the
    /// extractors, and restarts the pipeline. The clock restarts from the
    /// first frames decoded at the new position.
    pub fn seek(&self, position: Duration, mode: SeekMode) -> Result<(), PlayerError> {
        let mut control = self.control.lock();
        match control.lifecycle {
            Lifecycle::Released => return Err(PlayerError::Released),
            Lifecycle::Idle | Lifecycle::Seeking => {
                return Err(PlayerError::InvalidState("seek"))
            }
            Lifecycle::Playing => {}
        }
        if let Some(err) = self.core.fatal.lock().clone() {
            return Err(err);
        }

        control.lifecycle = Lifecycle::Seeking;
        let result = self.seek_quiesced(position, mode);
        control.lifecycle = Lifecycle::Playing;
        result
    }

    fn seek_quiesced(&self, position: Duration, mode: SeekMode) -> Result<(), PlayerError> {
        let core = &self.core;
        let target_us = position.min(self.duration).as_micros() as i64;
        tracing::debug!("seek to {} us ({:?})", target_us, mode);

        self.quiesce()?;

        core.video_decoder.flush();
        core.audio_decoder.flush();
        core.sink.pause();
        core.sink.flush();

        core.audio_queue.clear();
        core.video_queue.clear();

        // Align audio to the keyframe the video extractor actually landed
        // on, not to the requested target; otherwise audio leads or trails
        // by up to a whole keyframe interval after the clock restarts.
        core.video_extractor.seek_to(target_us, mode);
        let video_sample_us = core.video_extractor.sample_time_us();
        let audio_target_us = if video_sample_us >= 0 {
            video_sample_us
        } else {
            target_us
        };
        core.audio_extractor.seek_to(audio_target_us, mode);

        core.clock.reset();
        core.reset_eos();
        self.arm_pipeline();
        Ok(())
    }

    /// Tears the pipeline down and releases every collaborator exactly once.
    ///
    /// Idempotent: releasing a released player is a no-op. Every other
    /// operation on a released player fails with [`PlayerError::Released`].
    pub fn release(&self) -> Result<(), PlayerError> {
        let mut control = self.control.lock();
        if control.lifecycle == Lifecycle::Released {
            return Ok(());
        }

        self.quiesce()?;
        control.stages.shutdown();

        let core = &self.core;
        core.audio_queue.clear();
        core.video_queue.clear();

        core.audio_decoder.stop();
        core.video_decoder.stop();
        core.sink.stop();
        core.audio_decoder.release();
        core.video_decoder.release();
        core.audio_extractor.release();
        core.video_extractor.release();
        core.sink.release();

        control.lifecycle = Lifecycle::Released;
        tracing::debug!("player released");
        Ok(())
    }

    /// Elapsed stream time, or `None` before the clock has started.
    pub fn position(&self) -> Option<Duration> {
        if self.control.lock().lifecycle == Lifecycle::Released {
            return None;
        }
        self.core.clock.position()
    }

    /// Longest declared track duration; fixed at construction.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Rendered/dropped frame counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.core.stats.snapshot()
    }

    /// The first fatal pipeline error, if playback has died.
    pub fn error(&self) -> Option<PlayerError> {
        self.core.fatal.lock().clone()
    }

    /// Kicks the four decode chains and the sync chain.
    fn arm_pipeline(&self) {
        let core = &self.core;
        schedule_feed(core, StreamKind::Audio, Duration::ZERO);
        schedule_feed(core, StreamKind::Video, Duration::ZERO);
        schedule_drain(core, StreamKind::Audio, Duration::ZERO);
        schedule_drain(core, StreamKind::Video, Duration::ZERO);
        schedule_sync(core, Duration::ZERO);
    }

    /// Six-way quiesce rendezvous.
    ///
    /// A front-posted task on each stage acknowledges arrival and then parks
    /// until the coordinator releases it. Once all six have parked, nothing
    /// is mid-flight anywhere; only then does the coordinator cancel every
    /// stage's pending work, which also catches tasks a stage posted onto
    /// another stage just before parking. A stage that fails to acknowledge
    /// within the timeout is fatal: the caller must not mutate shared state
    /// under a partially-quiesced pipeline.
    fn quiesce(&self) -> Result<(), PlayerError> {
        let handles = self.core.stage_handles();
        let (arrive_tx, arrive_rx) = bounded::<&'static str>(STAGE_COUNT);
        let (resume_tx, resume_rx) = bounded::<()>(STAGE_COUNT);

        for handle in handles {
            let arrive = arrive_tx.clone();
            let resume = resume_rx.clone();
            let name = handle.name();
            handle.post_front(move || {
                let _ = arrive.send(name);
                let _ = resume.recv_timeout(RENDEZVOUS_TIMEOUT);
            });
        }
        drop(arrive_tx);

        let mut pending: Vec<&'static str> = handles.iter().map(|h| h.name()).collect();
        for _ in 0..STAGE_COUNT {
            match arrive_rx.recv_timeout(RENDEZVOUS_TIMEOUT) {
                Ok(name) => pending.retain(|n| *n != name),
                Err(_) => {
                    let stuck = pending.first().copied().unwrap_or("unknown");
                    let err = PlayerError::StageUnresponsive(stuck);
                    self.core.report_fatal(err.clone());
                    // Unpark whoever did arrive so they are not stranded.
                    for _ in 0..STAGE_COUNT {
                        let _ = resume_tx.send(());
                    }
                    return Err(err);
                }
            }
        }

        for handle in handles {
            handle.cancel_pending();
        }
        for _ in 0..STAGE_COUNT {
            let _ = resume_tx.send(());
        }
        Ok(())
    }
}

impl Drop for AvPlayer {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            tracing::warn!("release on drop failed: {err}");
        }
    }
}
