// Thread-safe callback mechanism for player events

use crate::error::AudioError;
use crate::state::PlayState;
use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Player event types
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    /// Player state changed
    StateChanged { state: PlayState },

    /// Playback position updated (throttled by the controller)
    PositionChanged {
        position: Duration,
        duration: Duration,
    },

    /// The decoder reached the end of the stream at the expected time
    EndOfStream,

    /// The decoder reached end of stream well before the expected duration;
    /// the preserved position stays available through snapshots
    PrematureStop { position: Duration },

    /// A terminal playback error occurred
    PlaybackError { error: AudioError },
}

/// Player callback trait.
/// Implementations should be lightweight; events for all observers are
/// delivered sequentially from a single dispatch thread.
pub trait PlayerCallback: Send + Sync {
    fn on_event(&self, event: PlayerEvent);
}

/// Adapter so plain closures can observe events.
pub struct FnCallback<F: Fn(PlayerEvent) + Send + Sync>(F);

impl<F: Fn(PlayerEvent) + Send + Sync> FnCallback<F> {
    pub fn new(f: F) -> Self {
        FnCallback(f)
    }
}

impl<F: Fn(PlayerEvent) + Send + Sync> PlayerCallback for FnCallback<F> {
    fn on_event(&self, event: PlayerEvent) {
        (self.0)(event);
    }
}

/// Fans events out to registered callbacks from a dedicated thread, so
/// emitters never run observer code while holding their own locks.
pub struct CallbackManager {
    callbacks: Arc<Mutex<Vec<Arc<dyn PlayerCallback>>>>,
    tx: Sender<PlayerEvent>,
}

impl CallbackManager {
    pub fn new() -> Self {
        let callbacks: Arc<Mutex<Vec<Arc<dyn PlayerCallback>>>> = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = unbounded::<PlayerEvent>();

        let targets = Arc::clone(&callbacks);
        thread::spawn(move || {
            // Exits when the manager (the only sender) is dropped.
            for event in rx {
                let observers: Vec<_> = targets.lock().iter().cloned().collect();
                for observer in observers {
                    observer.on_event(event.clone());
                }
            }
        });

        Self { callbacks, tx }
    }

    pub fn add_callback(&self, callback: Arc<dyn PlayerCallback>) {
        self.callbacks.lock().push(callback);
    }

    pub fn clear_callbacks(&self) {
        self.callbacks.lock().clear();
    }

    pub fn dispatch(&self, event: PlayerEvent) {
        if self.tx.send(event).is_err() {
            log::warn!("event dispatcher is gone, dropping event");
        }
    }
}

impl Default for CallbackManager {
    fn default() -> Self {
        Self::new()
    }
}
