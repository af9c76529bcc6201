// Position tracking from decoder frame counters with a wall-clock fallback

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// How long the decoder counter may sit still during playback before the
/// wall clock takes over.
const STALL_THRESHOLD: Duration = Duration::from_secs(1);

struct TrackerState {
    sample_rate: u32,
    /// Wall-clock anchor: position `base` was true at `started_at`
    base: Duration,
    started_at: Option<Instant>,
    paused_at: Option<Instant>,
    total_paused: Duration,
    last_position: Duration,
    last_frames: u64,
    last_advance: Option<Instant>,
}

/// Derives the user-visible position.
///
/// The decoder's frame counter is the preferred source; a monotonic wall
/// clock (minus accumulated paused time) covers the gaps where the counter
/// is unavailable or has stalled, so a stuck decoder never freezes the
/// clock. The last derived value survives session teardown, which is what
/// keeps the position honest across a premature stop.
pub struct PositionTracker {
    state: Mutex<TrackerState>,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TrackerState {
                sample_rate: 0,
                base: Duration::ZERO,
                started_at: None,
                paused_at: None,
                total_paused: Duration::ZERO,
                last_position: Duration::ZERO,
                last_frames: 0,
                last_advance: None,
            }),
        }
    }

    /// Anchor the clock at zero for a freshly attached session.
    pub fn start(&self, sample_rate: u32) {
        let mut state = self.state.lock();
        state.sample_rate = sample_rate;
        state.base = Duration::ZERO;
        state.started_at = Some(Instant::now());
        state.paused_at = None;
        state.total_paused = Duration::ZERO;
        state.last_position = Duration::ZERO;
        state.last_frames = 0;
        state.last_advance = Some(Instant::now());
    }

    /// Freeze the clock; the last position stays readable.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.started_at = None;
        state.paused_at = None;
    }

    pub fn pause(&self) {
        let mut state = self.state.lock();
        if state.paused_at.is_none() {
            state.paused_at = Some(Instant::now());
        }
    }

    pub fn resume(&self) {
        let mut state = self.state.lock();
        if let Some(paused_at) = state.paused_at.take() {
            state.total_paused += paused_at.elapsed();
        }
    }

    /// Re-anchor after a seek.
    pub fn set_position(&self, position: Duration) {
        let mut state = self.state.lock();
        let was_paused = state.paused_at.is_some();
        state.base = position;
        state.started_at = Some(Instant::now());
        state.total_paused = Duration::ZERO;
        state.paused_at = if was_paused { Some(Instant::now()) } else { None };
        state.last_position = position;
        state.last_advance = Some(Instant::now());
    }

    /// Tick the tracker with the decoder's current frame counter, if one
    /// exists. `playing` gates the stall tie-break: a parked decoder is
    /// expected while paused.
    pub fn update(&self, decoder_frames: Option<u64>, playing: bool) {
        let mut state = self.state.lock();
        let Some(started_at) = state.started_at else {
            return;
        };
        let now = Instant::now();

        let mut running = now.saturating_duration_since(started_at);
        running = running.saturating_sub(state.total_paused);
        if let Some(paused_at) = state.paused_at {
            running = running.saturating_sub(now.saturating_duration_since(paused_at));
        }
        let wall = state.base + running;

        state.last_position = match decoder_frames {
            Some(frames) => {
                if frames != state.last_frames {
                    state.last_frames = frames;
                    state.last_advance = Some(now);
                }
                let stalled = playing
                    && state
                        .last_advance
                        .map_or(false, |at| now.saturating_duration_since(at) > STALL_THRESHOLD);
                if stalled || state.sample_rate == 0 {
                    wall
                } else {
                    Duration::from_secs_f64(frames as f64 / state.sample_rate as f64)
                }
            }
            None => wall,
        };
    }

    pub fn position(&self) -> Duration {
        self.state.lock().last_position
    }
}

impl Default for PositionTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn prefers_the_decoder_counter() {
        let tracker = PositionTracker::new();
        tracker.start(1000);
        tracker.update(Some(500), true);
        assert_eq!(tracker.position(), Duration::from_millis(500));
    }

    #[test]
    fn falls_back_to_wall_clock_without_a_counter() {
        let tracker = PositionTracker::new();
        tracker.start(1000);
        thread::sleep(Duration::from_millis(120));
        tracker.update(None, true);
        let position = tracker.position();
        assert!(position >= Duration::from_millis(100), "was {position:?}");
        assert!(position < Duration::from_millis(500));
    }

    #[test]
    fn paused_time_does_not_advance_the_clock() {
        let tracker = PositionTracker::new();
        tracker.start(1000);
        tracker.pause();
        thread::sleep(Duration::from_millis(150));
        tracker.update(None, false);
        assert!(tracker.position() < Duration::from_millis(50));

        tracker.resume();
        thread::sleep(Duration::from_millis(120));
        tracker.update(None, true);
        assert!(tracker.position() >= Duration::from_millis(100));
        assert!(tracker.position() < Duration::from_millis(300));
    }

    #[test]
    fn seek_re_anchors_both_sources() {
        let tracker = PositionTracker::new();
        tracker.start(1000);
        tracker.set_position(Duration::from_secs(30));
        assert_eq!(tracker.position(), Duration::from_secs(30));

        thread::sleep(Duration::from_millis(120));
        tracker.update(None, true);
        let position = tracker.position();
        assert!(position >= Duration::from_secs(30));
        assert!(position < Duration::from_secs(31));
    }

    #[test]
    fn stalled_counter_yields_to_the_wall_clock() {
        let tracker = PositionTracker::new();
        tracker.start(1000);
        tracker.update(Some(100), true);
        assert_eq!(tracker.position(), Duration::from_millis(100));

        // Counter frozen past the stall threshold while playing.
        thread::sleep(Duration::from_millis(1100));
        tracker.update(Some(100), true);
        assert!(tracker.position() >= Duration::from_millis(1000));
    }

    #[test]
    fn position_survives_stop() {
        let tracker = PositionTracker::new();
        tracker.start(1000);
        tracker.update(Some(2500), true);
        tracker.stop();
        assert_eq!(tracker.position(), Duration::from_millis(2500));
        // Updates after stop are ignored.
        tracker.update(Some(9000), true);
        assert_eq!(tracker.position(), Duration::from_millis(2500));
    }
}
