// Pull-based stages composed over the decoded PCM stream:
// decoder -> volume -> pause gate -> terminator

use crate::{DecodedStream, StreamFormat};
use crossbeam_channel::Sender;
use quaver_core::Result;
use std::time::Duration;

/// Pull-based source of interleaved PCM samples.
///
/// `pull` fills as much of `out` as it can and returns the number of
/// samples written; `0` signals end of stream.
pub trait SampleSource: Send {
    fn pull(&mut self, out: &mut [f32]) -> usize;
}

impl SampleSource for DecodedStream {
    fn pull(&mut self, out: &mut [f32]) -> usize {
        self.read_samples(out)
    }
}

/// Applies the session volume to every sample pulled through it.
///
/// Zero is an explicit mute that zero-fills instead of multiplying; unity
/// passes samples through untouched.
pub struct VolumeStage<S> {
    inner: S,
    volume: f64,
    gain: f32,
}

impl<S: SampleSource> VolumeStage<S> {
    pub fn new(inner: S, volume: f64) -> Self {
        Self {
            inner,
            volume,
            gain: gain_for(volume),
        }
    }

    pub fn set_volume(&mut self, volume: f64) {
        self.volume = volume;
        self.gain = gain_for(volume);
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }
}

impl<S: SampleSource> SampleSource for VolumeStage<S> {
    fn pull(&mut self, out: &mut [f32]) -> usize {
        let n = self.inner.pull(out);
        if self.volume <= 0.0 {
            out[..n].fill(0.0);
        } else if self.volume < 1.0 {
            for sample in &mut out[..n] {
                *sample *= self.gain;
            }
        }
        n
    }
}

/// Perceptual volume curve: unity gain at 1.0, roughly -12 dB at the
/// bottom of the slider before the mute bypass takes over.
fn gain_for(volume: f64) -> f32 {
    if volume >= 1.0 {
        1.0
    } else if volume <= 0.0 {
        0.0
    } else {
        2f64.powf((volume - 1.0) * 2.0) as f32
    }
}

/// Emits silence of the expected length while engaged, without advancing
/// the upstream decoder.
pub struct PauseGate<S> {
    inner: S,
    engaged: bool,
}

impl<S: SampleSource> PauseGate<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            engaged: false,
        }
    }

    pub fn set_engaged(&mut self, engaged: bool) {
        self.engaged = engaged;
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }
}

impl<S: SampleSource> SampleSource for PauseGate<S> {
    fn pull(&mut self, out: &mut [f32]) -> usize {
        if self.engaged {
            out.fill(0.0);
            return out.len();
        }
        self.inner.pull(out)
    }
}

/// Fires the end-of-stream signal exactly once, then yields silence for
/// that and every later pull. A dropped receiver turns the signal into a
/// no-op.
pub struct Terminator<S> {
    inner: S,
    signal: Option<Sender<()>>,
    finished: bool,
}

impl<S: SampleSource> Terminator<S> {
    pub fn new(inner: S, signal: Sender<()>) -> Self {
        Self {
            inner,
            signal: Some(signal),
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }
}

impl<S: SampleSource> SampleSource for Terminator<S> {
    fn pull(&mut self, out: &mut [f32]) -> usize {
        if self.finished {
            out.fill(0.0);
            return out.len();
        }

        let n = self.inner.pull(out);
        if n == 0 {
            self.finished = true;
            if let Some(signal) = self.signal.take() {
                let _ = signal.send(());
            }
            out.fill(0.0);
            return out.len();
        }
        n
    }
}

/// The session's full chain over a probed stream. The mixer pulls it under
/// the device lock; the controller mutates it under the same lock.
pub struct PlaybackPipeline {
    chain: Terminator<PauseGate<VolumeStage<DecodedStream>>>,
}

impl PlaybackPipeline {
    pub fn new(stream: DecodedStream, volume: f64, end_of_stream: Sender<()>) -> Self {
        let chain = Terminator::new(
            PauseGate::new(VolumeStage::new(stream, volume)),
            end_of_stream,
        );
        Self { chain }
    }

    pub fn pull(&mut self, out: &mut [f32]) -> usize {
        self.chain.pull(out)
    }

    pub fn set_volume(&mut self, volume: f64) {
        self.chain.inner_mut().inner_mut().set_volume(volume);
    }

    pub fn volume(&self) -> f64 {
        self.chain.inner().inner().volume()
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.chain.inner_mut().set_engaged(paused);
    }

    pub fn is_paused(&self) -> bool {
        self.chain.inner().is_engaged()
    }

    pub fn seek_to_frame(&mut self, frame: u64) -> Result<()> {
        self.decoder_mut().seek_to_frame(frame)
    }

    pub fn position_frames(&self) -> u64 {
        self.decoder().position_frames()
    }

    pub fn format(&self) -> StreamFormat {
        self.decoder().format()
    }

    pub fn duration(&self) -> Duration {
        self.decoder().duration()
    }

    pub fn is_finished(&self) -> bool {
        self.chain.is_finished()
    }

    fn decoder(&self) -> &DecodedStream {
        self.chain.inner().inner().inner()
    }

    fn decoder_mut(&mut self) -> &mut DecodedStream {
        self.chain.inner_mut().inner_mut().inner_mut()
    }
}
