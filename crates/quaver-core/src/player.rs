// Public transport surface exposed to UI and CLI layers

use crate::error::Result;
use crate::state::PlaybackSnapshot;
use std::time::Duration;

/// Transport operations offered to front ends.
///
/// All methods take `&self`: implementations guard their own state so the
/// terminal UI may call `snapshot` concurrently with any other operation.
pub trait Player: Send + Sync {
    /// Tear down any prior session and start streaming `url`.
    ///
    /// `expected_duration` is the track length reported by the URL
    /// resolver; it backs the premature-stop check and the displayed
    /// duration when the decoder cannot compute one.
    fn play(&self, url: &str, expected_duration: Option<Duration>) -> Result<()>;

    /// Engage the pause gate. Valid only while playing.
    fn pause(&self) -> Result<()>;

    /// Disengage the pause gate. Valid only while paused.
    fn resume(&self) -> Result<()>;

    /// Tear down the session. Idempotent, never fails.
    fn stop(&self) -> Result<()>;

    /// Seek the decoder to an absolute position.
    fn seek(&self, position: Duration) -> Result<()>;

    /// Set playback volume in `[0.0, 1.0]`.
    fn set_volume(&self, volume: f64) -> Result<()>;

    /// Snapshot of state, position, duration, volume and last error.
    fn snapshot(&self) -> PlaybackSnapshot;

    /// Stop playback and release process-wide resources.
    fn close(&self) -> Result<()>;
}
