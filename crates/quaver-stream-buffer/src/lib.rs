// Bounded producer/consumer byte buffer that bridges the HTTP downloader
// to the decoder's MediaSource contract

use parking_lot::Mutex;
use quaver_core::{AudioError, Result};
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use symphonia::core::io::MediaSource;

/// Total buffer capacity.
pub const BUF_CAP: usize = 4 * 1024 * 1024;

/// Bytes that must arrive before decoding is allowed to start.
pub const PRELOAD: usize = 1024 * 1024;

/// Longest a reader blocks on an empty, incomplete buffer before the stall
/// is upgraded to a clean end of stream.
pub const READER_BLOCK_MAX: Duration = Duration::from_secs(5);

/// Poll cadence for blocked readers and cancellable sleeps.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Buffer health metrics for UI-level buffering indicators.
#[derive(Debug, Clone, Copy)]
pub struct BufferHealth {
    /// Bytes written but not yet read
    pub buffered_ahead: usize,
    pub capacity: usize,
    pub completed: bool,
}

struct BufferState {
    data: Vec<u8>,
    write_pos: usize,
    read_pos: usize,
    preloaded: bool,
    completed: bool,
    cancelled: bool,
}

/// Fixed-capacity byte buffer with one writer (the downloader) and one
/// reader (the decoder's source adapter).
///
/// Offsets only grow: `0 <= read_pos <= write_pos <= capacity`, and the
/// `completed`/`cancelled` flags never clear once set. All storage is
/// allocated up front; `append` never allocates.
pub struct StreamBuffer {
    state: Mutex<BufferState>,
    capacity: usize,
    preload: usize,
}

impl StreamBuffer {
    pub fn new() -> Self {
        Self::with_capacity(BUF_CAP, PRELOAD)
    }

    pub fn with_capacity(capacity: usize, preload: usize) -> Self {
        Self {
            state: Mutex::new(BufferState {
                data: vec![0u8; capacity],
                write_pos: 0,
                read_pos: 0,
                preloaded: false,
                completed: false,
                cancelled: false,
            }),
            capacity,
            preload,
        }
    }

    /// Copy as much of `bytes` as fits; returns the number stored. Writes
    /// past capacity are truncated, and a cancelled buffer refuses all
    /// writes.
    pub fn append(&self, bytes: &[u8]) -> usize {
        let mut state = self.state.lock();
        if state.cancelled {
            return 0;
        }

        let space = self.capacity - state.write_pos;
        let n = bytes.len().min(space);
        if n > 0 {
            let start = state.write_pos;
            state.data[start..start + n].copy_from_slice(&bytes[..n]);
            state.write_pos += n;
        }

        if !state.preloaded && state.write_pos >= self.preload {
            state.preloaded = true;
            log::debug!("preload threshold reached at {} bytes", state.write_pos);
        }

        n
    }

    /// Blocking read; `0` means end of stream.
    ///
    /// When the buffer is empty and incomplete the call waits up to
    /// `READER_BLOCK_MAX`, polling every `POLL_INTERVAL`. A stall past the
    /// limit returns end of stream rather than hanging the decoder on a
    /// dead connection.
    pub fn read(&self, dst: &mut [u8]) -> usize {
        if dst.is_empty() {
            return 0;
        }

        let deadline = Instant::now() + READER_BLOCK_MAX;
        loop {
            {
                let mut state = self.state.lock();
                if state.cancelled {
                    return 0;
                }

                let available = state.write_pos - state.read_pos;
                if available > 0 {
                    let n = dst.len().min(available);
                    let start = state.read_pos;
                    dst[..n].copy_from_slice(&state.data[start..start + n]);
                    state.read_pos += n;
                    return n;
                }

                if state.completed {
                    return 0;
                }
            }

            if Instant::now() >= deadline {
                log::warn!("reader stalled for {:?}, treating as end of stream", READER_BLOCK_MAX);
                return 0;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Reposition the reader to an absolute offset within the buffered
    /// region. Targets beyond `write_pos` are rejected.
    pub fn seek_to(&self, pos: u64) -> Result<()> {
        let mut state = self.state.lock();
        if pos > state.write_pos as u64 {
            return Err(AudioError::Range(format!(
                "seek target {} is beyond the {} buffered bytes",
                pos, state.write_pos
            )));
        }
        state.read_pos = pos as usize;
        Ok(())
    }

    /// Marks the end of the response body. Irreversible.
    pub fn mark_completed(&self) {
        let mut state = self.state.lock();
        state.completed = true;
    }

    /// Cancels the buffer; blocked reads unblock on their next poll and
    /// further writes are refused. Irreversible.
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        state.cancelled = true;
    }

    pub fn is_preloaded(&self) -> bool {
        self.state.lock().preloaded
    }

    pub fn is_completed(&self) -> bool {
        self.state.lock().completed
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }

    pub fn write_pos(&self) -> u64 {
        self.state.lock().write_pos as u64
    }

    pub fn read_pos(&self) -> u64 {
        self.state.lock().read_pos as u64
    }

    /// Once the download completed any readable byte counts as healthy;
    /// before that the reader needs a quarter of the preload in reserve.
    pub fn is_healthy(&self) -> bool {
        let state = self.state.lock();
        let available = state.write_pos - state.read_pos;
        if state.completed {
            available > 0
        } else {
            available > self.preload / 4
        }
    }

    pub fn health(&self) -> BufferHealth {
        let state = self.state.lock();
        BufferHealth {
            buffered_ahead: state.write_pos - state.read_pos,
            capacity: self.capacity,
            completed: state.completed,
        }
    }
}

impl Default for StreamBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// `Read`/`Seek`/`MediaSource` adapter the decoder probes through.
pub struct BufferReader {
    buffer: Arc<StreamBuffer>,
}

impl BufferReader {
    pub fn new(buffer: Arc<StreamBuffer>) -> Self {
        Self { buffer }
    }
}

impl Read for BufferReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        Ok(self.buffer.read(buf))
    }
}

impl Seek for BufferReader {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(offset) => self.buffer.read_pos() as i64 + offset,
            SeekFrom::End(offset) => {
                if !self.buffer.is_completed() {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::Unsupported,
                        "stream length unknown until the download completes",
                    ));
                }
                self.buffer.write_pos() as i64 + offset
            }
        };

        if target < 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "cannot seek before the start of the stream",
            ));
        }

        self.buffer
            .seek_to(target as u64)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;
        Ok(target as u64)
    }
}

impl MediaSource for BufferReader {
    fn is_seekable(&self) -> bool {
        true
    }

    fn byte_len(&self) -> Option<u64> {
        if self.buffer.is_completed() {
            Some(self.buffer.write_pos())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_never_exceed_capacity() {
        let buffer = StreamBuffer::with_capacity(16, 8);
        assert_eq!(buffer.append(&[1u8; 10]), 10);
        assert_eq!(buffer.append(&[2u8; 10]), 6);
        assert_eq!(buffer.append(&[3u8; 4]), 0);
        assert_eq!(buffer.write_pos(), 16);
        assert!(buffer.read_pos() <= buffer.write_pos());
    }

    #[test]
    fn preload_flag_sets_at_threshold() {
        let buffer = StreamBuffer::with_capacity(64, 8);
        buffer.append(&[0u8; 7]);
        assert!(!buffer.is_preloaded());
        buffer.append(&[0u8; 1]);
        assert!(buffer.is_preloaded());
    }

    #[test]
    fn read_returns_available_bytes() {
        let buffer = StreamBuffer::with_capacity(64, 8);
        buffer.append(&[7u8; 10]);
        let mut dst = [0u8; 4];
        assert_eq!(buffer.read(&mut dst), 4);
        assert_eq!(dst, [7u8; 4]);
        assert_eq!(buffer.read_pos(), 4);
    }

    #[test]
    fn empty_completed_buffer_reads_eof() {
        let buffer = StreamBuffer::with_capacity(64, 8);
        buffer.mark_completed();
        let mut dst = [0u8; 4];
        assert_eq!(buffer.read(&mut dst), 0);
    }

    #[test]
    fn blocked_read_unblocks_on_cancel() {
        let buffer = Arc::new(StreamBuffer::with_capacity(64, 8));
        let reader_buffer = Arc::clone(&buffer);
        let reader = thread::spawn(move || {
            let mut dst = [0u8; 4];
            reader_buffer.read(&mut dst)
        });

        thread::sleep(Duration::from_millis(150));
        buffer.cancel();
        assert_eq!(reader.join().unwrap(), 0);
    }

    #[test]
    fn blocked_read_picks_up_late_writes() {
        let buffer = Arc::new(StreamBuffer::with_capacity(64, 8));
        let writer_buffer = Arc::clone(&buffer);
        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            writer_buffer.append(&[9u8; 3]);
        });

        let mut dst = [0u8; 8];
        assert_eq!(buffer.read(&mut dst), 3);
        writer.join().unwrap();
    }

    #[test]
    fn seek_rejects_unbuffered_targets() {
        let buffer = StreamBuffer::with_capacity(64, 8);
        buffer.append(&[0u8; 10]);
        assert!(buffer.seek_to(10).is_ok());
        assert!(buffer.seek_to(11).is_err());
        assert!(buffer.seek_to(0).is_ok());
        assert_eq!(buffer.read_pos(), 0);
    }

    #[test]
    fn cancelled_buffer_refuses_writes() {
        let buffer = StreamBuffer::with_capacity(64, 8);
        buffer.cancel();
        assert_eq!(buffer.append(&[1u8; 4]), 0);
        assert_eq!(buffer.write_pos(), 0);
    }

    #[test]
    fn health_follows_completion() {
        let buffer = StreamBuffer::with_capacity(64, 16);
        buffer.append(&[0u8; 3]);
        // 3 bytes ahead is under preload/4 while still downloading
        assert!(!buffer.is_healthy());
        buffer.mark_completed();
        assert!(buffer.is_healthy());

        let mut dst = [0u8; 3];
        buffer.read(&mut dst);
        assert!(!buffer.is_healthy());
    }

    #[test]
    fn reader_reports_length_only_when_complete() {
        let buffer = Arc::new(StreamBuffer::with_capacity(64, 8));
        buffer.append(&[0u8; 12]);
        let reader = BufferReader::new(Arc::clone(&buffer));
        assert_eq!(reader.byte_len(), None);
        buffer.mark_completed();
        assert_eq!(reader.byte_len(), Some(12));
    }

    #[test]
    fn reader_seek_is_bounded_by_write_pos() {
        let buffer = Arc::new(StreamBuffer::with_capacity(64, 8));
        buffer.append(&[0u8; 12]);
        let mut reader = BufferReader::new(buffer);
        assert_eq!(reader.seek(SeekFrom::Start(6)).unwrap(), 6);
        assert!(reader.seek(SeekFrom::Start(13)).is_err());
        assert!(reader.seek(SeekFrom::Current(-7)).is_err());
    }
}
