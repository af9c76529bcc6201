// Transport controller: owns the playback session and its state machine

use crate::tracker::PositionTracker;
use crossbeam_channel::{bounded, unbounded, Receiver, TryRecvError};
use parking_lot::{Mutex, RwLock};
use quaver_core::{
    AudioError, CallbackManager, FnCallback, PlayState, PlaybackSnapshot, Player, PlayerEvent,
    Result,
};
use quaver_decode_symphonia::{DecodedStream, PlaybackPipeline};
use quaver_output::{CpalOutput, OutputBackend, OutputSpec};
use quaver_stream_buffer::{BufferReader, StreamBuffer, POLL_INTERVAL};
use quaver_transport_http::{create_http_agent, Downloader};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Longest `play` waits for the preload gate.
pub const PRELOAD_TIMEOUT: Duration = Duration::from_secs(5);

/// End of stream earlier than this before the expected duration counts as
/// premature.
pub const PREMATURE_TOLERANCE: Duration = Duration::from_secs(2);

const TICK_INTERVAL: Duration = Duration::from_millis(100);
const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);
const HEALTH_INTERVAL: Duration = Duration::from_secs(1);

/// Everything one `play` call owns. Torn down before the next session
/// starts; the worker flags `halted` when it finishes the session itself.
struct Session {
    buffer: Arc<StreamBuffer>,
    pipeline: Arc<Mutex<PlaybackPipeline>>,
    sample_rate: u32,
    halted: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    // Held so the handle is not detached; the thread exits on its own once
    // it observes the buffer cancellation.
    _downloader: JoinHandle<()>,
}

/// State shared with the session worker thread.
struct PlayerShared {
    output: Arc<dyn OutputBackend>,
    state: RwLock<PlayState>,
    volume: RwLock<f64>,
    duration: Mutex<Duration>,
    last_error: Mutex<Option<AudioError>>,
    tracker: PositionTracker,
    callbacks: CallbackManager,
}

impl PlayerShared {
    fn set_state(&self, new_state: PlayState) {
        let changed = {
            let mut state = self.state.write();
            if *state == new_state {
                false
            } else {
                *state = new_state.clone();
                true
            }
        };
        if changed {
            log::debug!("player state changed to: {}", new_state);
            self.callbacks
                .dispatch(PlayerEvent::StateChanged { state: new_state });
        }
    }

    /// Terminal failure: releases the session's resources, latches the
    /// error and surfaces it.
    fn fail_session(&self, buffer: &StreamBuffer, error: AudioError) {
        buffer.cancel();
        self.output.detach();
        self.tracker.stop();
        log::error!("playback failed: {}", error);
        *self.last_error.lock() = Some(error.clone());
        self.set_state(PlayState::from_error(&error));
        self.callbacks.dispatch(PlayerEvent::PlaybackError { error });
    }

    /// End-of-stream: decide between a completed track and a premature
    /// stop, preserving the position either way.
    fn finish_session(&self, buffer: &StreamBuffer, expected_duration: Duration) {
        let position = self.tracker.position();
        buffer.cancel();
        self.output.detach();
        self.tracker.stop();

        let premature = !expected_duration.is_zero()
            && position + PREMATURE_TOLERANCE < expected_duration;
        if premature {
            log::warn!(
                "stream ended early at {:.1}s of {:.1}s",
                position.as_secs_f64(),
                expected_duration.as_secs_f64()
            );
            self.set_state(PlayState::Stopped);
            self.callbacks
                .dispatch(PlayerEvent::PrematureStop { position });
        } else {
            log::info!("playback completed");
            self.set_state(PlayState::Completed);
            self.callbacks.dispatch(PlayerEvent::EndOfStream);
        }
    }
}

/// Buffered streaming player: one live session at a time, fed by the
/// progressive downloader and drained by the output mixer.
pub struct StreamPlayer {
    shared: Arc<PlayerShared>,
    /// Swapped out by `close` to release pooled connections
    agent: Mutex<ureq::Agent>,
    session: Mutex<Option<Session>>,
    /// Serialises play/stop/close against each other
    control: Mutex<()>,
}

impl StreamPlayer {
    /// Player over the process-wide cpal device.
    pub fn new() -> Self {
        Self::with_output(CpalOutput::global())
    }

    /// Player over an explicit output backend.
    pub fn with_output(output: Arc<dyn OutputBackend>) -> Self {
        Self {
            shared: Arc::new(PlayerShared {
                output,
                state: RwLock::new(PlayState::Idle),
                volume: RwLock::new(1.0),
                duration: Mutex::new(Duration::ZERO),
                last_error: Mutex::new(None),
                tracker: PositionTracker::new(),
                callbacks: CallbackManager::new(),
            }),
            agent: Mutex::new(create_http_agent()),
            session: Mutex::new(None),
            control: Mutex::new(()),
        }
    }

    // Callback registration. Observers run on the dispatch thread, after
    // the state they report has been published.

    pub fn on_state_change(&self, f: impl Fn(PlayState) + Send + Sync + 'static) {
        self.shared
            .callbacks
            .add_callback(Arc::new(FnCallback::new(move |event| {
                if let PlayerEvent::StateChanged { state } = event {
                    f(state);
                }
            })));
    }

    pub fn on_error(&self, f: impl Fn(AudioError) + Send + Sync + 'static) {
        self.shared
            .callbacks
            .add_callback(Arc::new(FnCallback::new(move |event| {
                if let PlayerEvent::PlaybackError { error } = event {
                    f(error);
                }
            })));
    }

    pub fn on_premature_stop(&self, f: impl Fn(Duration) + Send + Sync + 'static) {
        self.shared
            .callbacks
            .add_callback(Arc::new(FnCallback::new(move |event| {
                if let PlayerEvent::PrematureStop { position } = event {
                    f(position);
                }
            })));
    }

    pub fn on_end_of_stream(&self, f: impl Fn() + Send + Sync + 'static) {
        self.shared
            .callbacks
            .add_callback(Arc::new(FnCallback::new(move |event| {
                if let PlayerEvent::EndOfStream = event {
                    f();
                }
            })));
    }

    pub fn on_position_change(&self, f: impl Fn(Duration, Duration) + Send + Sync + 'static) {
        self.shared
            .callbacks
            .add_callback(Arc::new(FnCallback::new(move |event| {
                if let PlayerEvent::PositionChanged { position, duration } = event {
                    f(position, duration);
                }
            })));
    }

    /// Tear down the current session, if any. Joins the worker but only
    /// signals the downloader, which exits on its own once it observes the
    /// cancelled buffer.
    fn teardown_session(&self) {
        let session = self.session.lock().take();
        if let Some(mut session) = session {
            session.halted.store(true, Ordering::Release);
            session.buffer.cancel();
            self.shared.output.detach();
            if let Some(worker) = session.worker.take() {
                let _ = worker.join();
            }
            self.shared.tracker.stop();
        }
    }

    fn fail_play(&self, buffer: &StreamBuffer, error: AudioError) -> AudioError {
        self.shared.fail_session(buffer, error.clone());
        error
    }

    fn start_session(&self, url: &str, expected_duration: Option<Duration>) -> Result<()> {
        let buffer = Arc::new(StreamBuffer::new());
        let (error_tx, error_rx) = unbounded::<AudioError>();
        let downloader = Downloader::spawn(
            self.agent.lock().clone(),
            url.to_string(),
            Arc::clone(&buffer),
            error_tx,
        );

        // Preload gate: wait for enough data to probe, a completed short
        // stream, a downloader failure, or the timeout.
        let deadline = Instant::now() + PRELOAD_TIMEOUT;
        loop {
            if buffer.is_preloaded() || buffer.is_completed() {
                break;
            }
            match error_rx.try_recv() {
                Ok(error) => return Err(self.fail_play(&buffer, error)),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
            }
            if Instant::now() >= deadline {
                let error = AudioError::Timeout(format!(
                    "no audio data within {:?}",
                    PRELOAD_TIMEOUT
                ));
                return Err(self.fail_play(&buffer, error));
            }
            thread::sleep(POLL_INTERVAL);
        }

        // An empty completed response has nothing to probe: the session is
        // already over.
        if buffer.is_completed() && buffer.write_pos() == 0 {
            self.shared.set_state(PlayState::Completed);
            self.shared.callbacks.dispatch(PlayerEvent::EndOfStream);
            return Ok(());
        }

        let reader = BufferReader::new(Arc::clone(&buffer));
        let stream = match DecodedStream::probe(Box::new(reader)) {
            Ok(stream) => stream,
            Err(error) => return Err(self.fail_play(&buffer, error)),
        };
        let format = stream.format();
        let decoded_duration = stream.duration();

        let spec = OutputSpec {
            sample_rate: format.sample_rate,
            channels: format.channels,
        };
        if let Err(error) = self.shared.output.ensure_started(spec) {
            return Err(self.fail_play(&buffer, error));
        }

        let expected = expected_duration
            .filter(|d| !d.is_zero())
            .unwrap_or(decoded_duration);
        *self.shared.duration.lock() = if decoded_duration.is_zero() {
            expected
        } else {
            decoded_duration
        };

        let volume = *self.shared.volume.read();
        let (eos_tx, eos_rx) = bounded::<()>(1);
        let pipeline = Arc::new(Mutex::new(PlaybackPipeline::new(stream, volume, eos_tx)));

        // Attach: every mixer pull locks the pipeline, which is the same
        // lock all transport mutations take.
        let mixer_pipeline = Arc::clone(&pipeline);
        self.shared
            .output
            .attach(Box::new(move |out| mixer_pipeline.lock().pull(out)));

        self.shared.tracker.start(format.sample_rate);

        let halted = Arc::new(AtomicBool::new(false));
        let worker = thread::spawn({
            let shared = Arc::clone(&self.shared);
            let buffer = Arc::clone(&buffer);
            let pipeline = Arc::clone(&pipeline);
            let halted = Arc::clone(&halted);
            move || session_worker(shared, buffer, pipeline, halted, eos_rx, error_rx, expected)
        });

        *self.session.lock() = Some(Session {
            buffer,
            pipeline,
            sample_rate: format.sample_rate,
            halted,
            worker: Some(worker),
            _downloader: downloader,
        });

        self.shared.set_state(PlayState::Playing);
        Ok(())
    }
}

impl Player for StreamPlayer {
    fn play(&self, url: &str, expected_duration: Option<Duration>) -> Result<()> {
        if url.trim().is_empty() {
            return Err(AudioError::Input("stream URL cannot be empty".to_string()));
        }

        let _control = self.control.lock();
        log::info!("starting playback");
        self.teardown_session();
        *self.shared.last_error.lock() = None;
        self.shared.set_state(PlayState::Loading);
        self.start_session(url, expected_duration)
    }

    fn pause(&self) -> Result<()> {
        let session = self.session.lock();
        let session = match session.as_ref() {
            Some(session) if !session.halted.load(Ordering::Acquire) => session,
            _ => {
                return Err(AudioError::State("no active session to pause".to_string()));
            }
        };

        {
            let state = self.shared.state.read();
            if *state != PlayState::Playing {
                return Err(AudioError::State(format!("cannot pause while {}", state)));
            }
        }

        // Engaged under the device lock: the very next pull sees silence.
        session.pipeline.lock().set_paused(true);
        self.shared.tracker.pause();
        self.shared.set_state(PlayState::Paused);
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        let session = self.session.lock();
        let session = match session.as_ref() {
            Some(session) if !session.halted.load(Ordering::Acquire) => session,
            _ => {
                return Err(AudioError::State("no active session to resume".to_string()));
            }
        };

        {
            let state = self.shared.state.read();
            if *state != PlayState::Paused {
                return Err(AudioError::State(format!("cannot resume while {}", state)));
            }
        }

        session.pipeline.lock().set_paused(false);
        self.shared.tracker.resume();
        self.shared.set_state(PlayState::Playing);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        let _control = self.control.lock();
        self.teardown_session();
        self.shared.set_state(PlayState::Stopped);
        Ok(())
    }

    fn seek(&self, position: Duration) -> Result<()> {
        let session = self.session.lock();
        let session = match session.as_ref() {
            Some(session) if !session.halted.load(Ordering::Acquire) => session,
            _ => {
                return Err(AudioError::State("no audio stream loaded".to_string()));
            }
        };

        let duration = *self.shared.duration.lock();
        if !duration.is_zero() && position > duration {
            return Err(AudioError::Range(format!(
                "position {:.1}s exceeds duration {:.1}s",
                position.as_secs_f64(),
                duration.as_secs_f64()
            )));
        }

        let frame = (position.as_secs_f64() * session.sample_rate as f64) as u64;
        session.pipeline.lock().seek_to_frame(frame)?;
        self.shared.tracker.set_position(position);
        Ok(())
    }

    fn set_volume(&self, volume: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(AudioError::Range(format!(
                "volume must be within [0.0, 1.0], got {}",
                volume
            )));
        }

        *self.shared.volume.write() = volume;
        if let Some(session) = self.session.lock().as_ref() {
            session.pipeline.lock().set_volume(volume);
        }
        Ok(())
    }

    fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            state: self.shared.state.read().clone(),
            position: self.shared.tracker.position(),
            duration: *self.shared.duration.lock(),
            volume: *self.shared.volume.read(),
            last_error: self.shared.last_error.lock().clone(),
        }
    }

    fn close(&self) -> Result<()> {
        let _control = self.control.lock();
        self.teardown_session();
        self.shared.set_state(PlayState::Stopped);
        // Swapping the agent drops its connection pool; downloader clones
        // hold theirs only until their threads exit. The output device is
        // process-global and stays available for later players.
        *self.agent.lock() = create_http_agent();
        Ok(())
    }
}

impl Default for StreamPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for StreamPlayer {
    fn drop(&mut self) {
        self.teardown_session();
    }
}

/// Per-session worker: ticks the position tracker, forwards throttled
/// progress events, and turns the downloader's failure or the terminator's
/// end-of-stream signal into the session's final state.
///
/// The worker releases session resources itself but never joins threads,
/// so it is safe to run concurrently with `stop`.
fn session_worker(
    shared: Arc<PlayerShared>,
    buffer: Arc<StreamBuffer>,
    pipeline: Arc<Mutex<PlaybackPipeline>>,
    halted: Arc<AtomicBool>,
    eos_rx: Receiver<()>,
    error_rx: Receiver<AudioError>,
    expected_duration: Duration,
) {
    let mut last_progress = Instant::now();
    let mut last_health_check = Instant::now();

    loop {
        if halted.load(Ordering::Acquire) {
            return;
        }

        // Tick the tracker before the end-of-stream check so the final
        // position reflects every frame the decoder handed downstream.
        let playing = *shared.state.read() == PlayState::Playing;
        let frames = pipeline.lock().position_frames();
        shared.tracker.update(Some(frames), playing);

        match error_rx.try_recv() {
            Ok(error) => {
                shared.fail_session(&buffer, error);
                halted.store(true, Ordering::Release);
                return;
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
        }

        match eos_rx.try_recv() {
            Ok(()) => {
                shared.finish_session(&buffer, expected_duration);
                halted.store(true, Ordering::Release);
                return;
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
        }

        if last_progress.elapsed() >= PROGRESS_INTERVAL {
            shared.callbacks.dispatch(PlayerEvent::PositionChanged {
                position: shared.tracker.position(),
                duration: *shared.duration.lock(),
            });
            last_progress = Instant::now();
        }

        if last_health_check.elapsed() >= HEALTH_INTERVAL {
            if !buffer.is_healthy() {
                let health = buffer.health();
                log::debug!(
                    "buffer running low: {} bytes ahead, download complete: {}",
                    health.buffered_ahead,
                    health.completed
                );
            }
            last_health_check = Instant::now();
        }

        thread::sleep(TICK_INTERVAL);
    }
}
