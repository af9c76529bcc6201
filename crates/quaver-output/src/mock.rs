// Mock output backend: lets tests drive the mixer pull loop by hand

use crate::{MixerCallback, OutputBackend, OutputSpec};
use parking_lot::Mutex;
use quaver_core::{AudioError, Result};

struct MockState {
    started: Option<std::result::Result<OutputSpec, AudioError>>,
    source: Option<MixerCallback>,
    closed: bool,
}

/// In-process stand-in for the audio device.
///
/// Latches init results the same way the real device does, but produces
/// samples only when a test calls `render`, so assertions can line up with
/// exact pull boundaries.
pub struct MockOutput {
    state: Mutex<MockState>,
    fail_init: bool,
}

impl MockOutput {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                started: None,
                source: None,
                closed: false,
            }),
            fail_init: false,
        }
    }

    /// A device whose initialisation always fails, latched like the real
    /// one.
    pub fn failing() -> Self {
        Self {
            state: Mutex::new(MockState {
                started: None,
                source: None,
                closed: false,
            }),
            fail_init: true,
        }
    }

    /// Run one mixer pull of `samples` interleaved samples.
    pub fn render(&self, samples: usize) -> Vec<f32> {
        let mut out = vec![0f32; samples];
        let mut state = self.state.lock();
        let written = match state.source.as_mut() {
            Some(source) => source(&mut out),
            None => 0,
        };
        if written < out.len() {
            out[written..].fill(0.0);
        }
        out
    }

    pub fn is_attached(&self) -> bool {
        self.state.lock().source.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl Default for MockOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputBackend for MockOutput {
    fn ensure_started(&self, spec: OutputSpec) -> Result<OutputSpec> {
        let mut state = self.state.lock();
        let fail_init = self.fail_init;
        let latched = state.started.get_or_insert_with(|| {
            if fail_init {
                Err(AudioError::Audio("mock output configured to fail".to_string()))
            } else {
                Ok(spec)
            }
        });

        match latched {
            Ok(latched) => {
                if latched.sample_rate != spec.sample_rate || latched.channels != spec.channels {
                    return Err(AudioError::Audio(format!(
                        "output locked at {} Hz / {} ch, stream needs {} Hz / {} ch",
                        latched.sample_rate, latched.channels, spec.sample_rate, spec.channels
                    )));
                }
                Ok(*latched)
            }
            Err(e) => Err(e.clone()),
        }
    }

    fn attach(&self, source: MixerCallback) {
        self.state.lock().source = Some(source);
    }

    fn detach(&self) {
        self.state.lock().source = None;
    }

    fn current_spec(&self) -> Option<OutputSpec> {
        match self.state.lock().started.as_ref() {
            Some(Ok(spec)) => Some(*spec),
            _ => None,
        }
    }

    fn close_idle(&self) {
        self.state.lock().closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_result_is_latched() {
        let output = MockOutput::new();
        let spec = OutputSpec {
            sample_rate: 44100,
            channels: 2,
        };
        assert_eq!(output.ensure_started(spec).unwrap(), spec);

        let other = OutputSpec {
            sample_rate: 48000,
            channels: 2,
        };
        assert!(output.ensure_started(other).is_err());
        assert_eq!(output.current_spec(), Some(spec));
    }

    #[test]
    fn failed_init_keeps_failing() {
        let output = MockOutput::failing();
        let spec = OutputSpec {
            sample_rate: 44100,
            channels: 2,
        };
        assert!(output.ensure_started(spec).is_err());
        assert!(output.ensure_started(spec).is_err());
        assert_eq!(output.current_spec(), None);
    }

    #[test]
    fn render_pulls_from_the_attached_source() {
        let output = MockOutput::new();
        output.attach(Box::new(|out| {
            out.fill(0.5);
            out.len()
        }));
        let rendered = output.render(8);
        assert!(rendered.iter().all(|&s| s == 0.5));

        output.detach();
        let silent = output.render(8);
        assert!(silent.iter().all(|&s| s == 0.0));
    }
}
