// Audio output abstraction: a process-global sink pulling PCM from an
// attached session pipeline

mod device;
pub mod mock;

pub use device::CpalOutput;
pub use mock::MockOutput;

use quaver_core::Result;
use std::time::Duration;

/// Format latched by the first successful device initialisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSpec {
    pub sample_rate: u32,
    pub channels: u16,
}

impl OutputSpec {
    /// The mixer's submission unit, roughly a tenth of a second.
    pub fn period(&self) -> Duration {
        Duration::from_millis(100)
    }
}

/// Callback pulling interleaved f32 samples into the mixer's buffer;
/// returns the number of samples written.
pub type MixerCallback = Box<dyn FnMut(&mut [f32]) -> usize + Send>;

/// A process-wide audio sink.
///
/// Implementations initialise at most once per process and latch the first
/// result — success or failure — for every later call. The realtime mixer
/// pulls from whatever callback is attached and fills the remainder of its
/// buffer with silence.
pub trait OutputBackend: Send + Sync {
    /// Initialise on first call. Later calls must carry a matching format
    /// or receive an Audio error; a latched init failure is returned
    /// forever.
    fn ensure_started(&self, spec: OutputSpec) -> Result<OutputSpec>;

    /// Attach the pull source feeding the mixer, replacing any prior one.
    fn attach(&self, source: MixerCallback);

    /// Detach the current source; the mixer emits silence afterwards.
    fn detach(&self);

    /// Spec of the running device, if started.
    fn current_spec(&self) -> Option<OutputSpec>;

    /// Release the device at process shutdown. No-op before init.
    fn close_idle(&self);
}
