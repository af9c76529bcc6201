// Progressive download into the session's stream buffer with range-resume

use crossbeam_channel::Sender;
use quaver_core::AudioError;
use quaver_stream_buffer::{StreamBuffer, POLL_INTERVAL};
use std::io::Read;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Attempts before the download is declared failed.
pub const MAX_RETRIES: u32 = 5;

const BASE_BACKOFF: Duration = Duration::from_secs(1);
const SCRATCH_SIZE: usize = 32 * 1024;
const MAX_CONSECUTIVE_READ_ERRORS: u32 = 3;

/// Retry tuning, overridable by tests.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            base_backoff: BASE_BACKOFF,
        }
    }
}

enum AttemptOutcome {
    /// Response body fully drained
    Finished,
    Cancelled,
    Failed(String),
}

/// Fetches a signed progressive URL into a `StreamBuffer` on a worker
/// thread.
///
/// Retries resume from the buffer's `write_pos` with a `Range` header, so
/// every byte is stored at most once. Cancellation through the buffer ends
/// the worker silently; only exhausting all retries reports through the
/// error sink.
pub struct Downloader;

impl Downloader {
    pub fn spawn(
        agent: ureq::Agent,
        url: String,
        buffer: Arc<StreamBuffer>,
        error_tx: Sender<AudioError>,
    ) -> JoinHandle<()> {
        Self::spawn_with(DownloadConfig::default(), agent, url, buffer, error_tx)
    }

    pub fn spawn_with(
        config: DownloadConfig,
        agent: ureq::Agent,
        url: String,
        buffer: Arc<StreamBuffer>,
        error_tx: Sender<AudioError>,
    ) -> JoinHandle<()> {
        thread::spawn(move || download_worker(config, agent, url, buffer, error_tx))
    }
}

fn download_worker(
    config: DownloadConfig,
    agent: ureq::Agent,
    url: String,
    buffer: Arc<StreamBuffer>,
    error_tx: Sender<AudioError>,
) {
    log::info!("starting progressive download from {}", url);

    for attempt in 0..config.max_retries {
        if attempt > 0 {
            let delay = config.base_backoff * attempt;
            if sleep_cancellable(&buffer, delay) {
                return;
            }
        }

        match run_attempt(&agent, &url, &buffer) {
            AttemptOutcome::Finished => {
                buffer.mark_completed();
                log::info!("download complete: {} bytes", buffer.write_pos());
                return;
            }
            AttemptOutcome::Cancelled => {
                log::debug!("download cancelled");
                return;
            }
            AttemptOutcome::Failed(reason) => {
                log::warn!(
                    "download attempt {}/{} failed: {}",
                    attempt + 1,
                    config.max_retries,
                    reason
                );
            }
        }
    }

    let err = AudioError::Network(format!(
        "failed to download stream after {} attempts",
        config.max_retries
    ));
    log::error!("{}", err);
    let _ = error_tx.send(err);
}

fn run_attempt(agent: &ureq::Agent, url: &str, buffer: &StreamBuffer) -> AttemptOutcome {
    if buffer.is_cancelled() {
        return AttemptOutcome::Cancelled;
    }

    // Resume from the already-buffered offset so no byte is stored twice.
    let resume_from = buffer.write_pos();
    let mut request = agent.get(url);
    if resume_from > 0 {
        request = request.set("Range", &format!("bytes={}-", resume_from));
        log::debug!("resuming download at byte {}", resume_from);
    }

    let response = match request.call() {
        Ok(response) => response,
        Err(ureq::Error::Status(code, _)) => {
            return AttemptOutcome::Failed(format!("unexpected HTTP status {}", code));
        }
        Err(e) => return AttemptOutcome::Failed(format!("request failed: {}", e)),
    };

    let status = response.status();
    if status != 200 && status != 206 {
        return AttemptOutcome::Failed(format!("unexpected HTTP status {}", status));
    }

    let mut reader = response.into_reader();
    let mut scratch = vec![0u8; SCRATCH_SIZE];
    let mut consecutive_errors = 0u32;

    loop {
        if buffer.is_cancelled() {
            return AttemptOutcome::Cancelled;
        }

        match reader.read(&mut scratch) {
            Ok(0) => return AttemptOutcome::Finished,
            Ok(n) => {
                consecutive_errors = 0;
                buffer.append(&scratch[..n]);
            }
            Err(e) => {
                consecutive_errors += 1;
                if consecutive_errors >= MAX_CONSECUTIVE_READ_ERRORS {
                    return AttemptOutcome::Failed(format!("read error: {}", e));
                }
                thread::sleep(POLL_INTERVAL);
            }
        }
    }
}

/// Sleeps in poll-sized slices; returns true when the buffer was cancelled.
fn sleep_cancellable(buffer: &StreamBuffer, delay: Duration) -> bool {
    let deadline = Instant::now() + delay;
    while Instant::now() < deadline {
        if buffer.is_cancelled() {
            return true;
        }
        thread::sleep(POLL_INTERVAL.min(deadline - Instant::now()));
    }
    buffer.is_cancelled()
}
