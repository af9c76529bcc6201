// cpal-backed output device, initialised once per process

use crate::{MixerCallback, OutputBackend, OutputSpec};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use quaver_core::{AudioError, Result};
use std::sync::{Arc, OnceLock};
use std::thread;

struct Started {
    spec: OutputSpec,
    slot: Arc<Mutex<Option<MixerCallback>>>,
    shutdown: Sender<()>,
}

/// Output device over the host's default cpal sink.
///
/// The stream lives on a dedicated thread because cpal streams are not
/// `Send`; the thread parks until `close_idle` asks it to drop the stream.
/// The first `ensure_started` latches its result, so a failed init keeps
/// failing every later session without touching the host again.
pub struct CpalOutput {
    started: OnceLock<std::result::Result<Started, AudioError>>,
}

static GLOBAL: OnceLock<Arc<CpalOutput>> = OnceLock::new();

impl CpalOutput {
    pub fn new() -> Self {
        Self {
            started: OnceLock::new(),
        }
    }

    /// The process-wide device shared by every player.
    pub fn global() -> Arc<CpalOutput> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(CpalOutput::new())))
    }

    fn start(spec: OutputSpec) -> std::result::Result<Started, AudioError> {
        let slot: Arc<Mutex<Option<MixerCallback>>> = Arc::new(Mutex::new(None));
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let (init_tx, init_rx) = bounded::<std::result::Result<(), AudioError>>(1);
        let mixer_slot = Arc::clone(&slot);

        thread::Builder::new()
            .name("quaver-output".into())
            .spawn(move || {
                let host = cpal::default_host();
                let device = match host.default_output_device() {
                    Some(device) => device,
                    None => {
                        let _ = init_tx.send(Err(AudioError::Audio(
                            "no output device available".to_string(),
                        )));
                        return;
                    }
                };

                log::info!(
                    "using audio device: {}",
                    device.name().unwrap_or_else(|_| "unknown".to_string())
                );

                let config = cpal::StreamConfig {
                    channels: spec.channels,
                    sample_rate: cpal::SampleRate(spec.sample_rate),
                    buffer_size: cpal::BufferSize::Default,
                };

                let stream = match device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        // The critical section is one pull: no I/O, bounded
                        // by the reader's own limits.
                        let mut slot = mixer_slot.lock();
                        let written = match slot.as_mut() {
                            Some(source) => source(data),
                            None => 0,
                        };
                        if written < data.len() {
                            data[written..].fill(0.0);
                        }
                    },
                    |err| log::error!("audio stream error: {}", err),
                    None,
                ) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = init_tx.send(Err(AudioError::Audio(format!(
                            "failed to build output stream: {}",
                            e
                        ))));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = init_tx.send(Err(AudioError::Audio(format!(
                        "failed to start output stream: {}",
                        e
                    ))));
                    return;
                }

                log::info!(
                    "audio output running at {} Hz, {} channel(s)",
                    spec.sample_rate,
                    spec.channels
                );
                let _ = init_tx.send(Ok(()));

                // Park until shutdown; dropping the stream releases the
                // device.
                let _ = shutdown_rx.recv();
                drop(stream);
                log::info!("audio output closed");
            })
            .map_err(|e| AudioError::Audio(format!("failed to spawn audio thread: {}", e)))?;

        match init_rx.recv() {
            Ok(Ok(())) => Ok(Started {
                spec,
                slot,
                shutdown: shutdown_tx,
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AudioError::Audio(
                "audio thread exited during initialisation".to_string(),
            )),
        }
    }
}

impl Default for CpalOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputBackend for CpalOutput {
    fn ensure_started(&self, spec: OutputSpec) -> Result<OutputSpec> {
        let started = self.started.get_or_init(|| Self::start(spec));
        match started {
            Ok(started) => {
                if started.spec.sample_rate != spec.sample_rate
                    || started.spec.channels != spec.channels
                {
                    return Err(AudioError::Audio(format!(
                        "output locked at {} Hz / {} ch, stream needs {} Hz / {} ch",
                        started.spec.sample_rate,
                        started.spec.channels,
                        spec.sample_rate,
                        spec.channels
                    )));
                }
                Ok(started.spec)
            }
            Err(e) => Err(e.clone()),
        }
    }

    fn attach(&self, source: MixerCallback) {
        if let Some(Ok(started)) = self.started.get() {
            *started.slot.lock() = Some(source);
        }
    }

    fn detach(&self) {
        if let Some(Ok(started)) = self.started.get() {
            *started.slot.lock() = None;
        }
    }

    fn current_spec(&self) -> Option<OutputSpec> {
        match self.started.get() {
            Some(Ok(started)) => Some(started.spec),
            _ => None,
        }
    }

    fn close_idle(&self) {
        if let Some(Ok(started)) = self.started.get() {
            let _ = started.shutdown.send(());
        }
    }
}
