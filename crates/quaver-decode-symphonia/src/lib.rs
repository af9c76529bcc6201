// Audio decoding using Symphonia

pub mod pipeline;

pub use pipeline::{PauseGate, PlaybackPipeline, SampleSource, Terminator, VolumeStage};

use quaver_core::{AudioError, Result};
use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};
use std::time::Duration;

/// Format chosen by a successful probe; immutable for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl StreamFormat {
    /// The output device's submission unit, roughly a tenth of a second.
    pub fn period(&self) -> Duration {
        Duration::from_millis(100)
    }
}

/// Pull-based PCM source over a probed byte stream.
///
/// Probing happens once at construction: MPEG audio is the primary format
/// and RIFF/WAV the fallback, anything else fails the session. Samples come
/// out interleaved `f32` and the current frame position is tracked for the
/// position telemetry.
pub struct DecodedStream {
    format_reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    time_base: Option<TimeBase>,
    format: StreamFormat,
    duration: Duration,
    pending: Vec<f32>,
    pending_offset: usize,
    position_frames: u64,
    eof: bool,
}

impl std::fmt::Debug for DecodedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedStream")
            .field("track_id", &self.track_id)
            .field("time_base", &self.time_base)
            .field("format", &self.format)
            .field("duration", &self.duration)
            .field("pending_offset", &self.pending_offset)
            .field("position_frames", &self.position_frames)
            .field("eof", &self.eof)
            .finish()
    }
}

impl DecodedStream {
    /// Probe the byte stream once and prepare a PCM source.
    pub fn probe(source: Box<dyn MediaSource>) -> Result<Self> {
        let stream = MediaSourceStream::new(source, Default::default());

        let probed = symphonia::default::get_probe()
            .format(
                &Hint::new(),
                stream,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| AudioError::Decode(format!("unsupported audio format: {}", e)))?;

        let format_reader = probed.format;
        let track = format_reader
            .default_track()
            .ok_or_else(|| AudioError::Decode("no default track found".to_string()))?;
        let track_id = track.id;

        let codec_params = &track.codec_params;
        let sample_rate = codec_params
            .sample_rate
            .ok_or_else(|| AudioError::Decode("sample rate not specified".to_string()))?;
        let channels = codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(2);
        let time_base = codec_params.time_base;

        // Duration stays zero when the encoded stream does not carry it;
        // the controller then falls back to the resolver's expected value.
        let duration = match (time_base, codec_params.n_frames) {
            (Some(tb), Some(n_frames)) => {
                let time = tb.calc_time(n_frames);
                Duration::from_secs_f64(time.seconds as f64 + time.frac)
            }
            _ => Duration::ZERO,
        };

        let decoder = symphonia::default::get_codecs()
            .make(codec_params, &DecoderOptions::default())
            .map_err(|e| AudioError::Decode(format!("failed to create decoder: {}", e)))?;

        log::info!(
            "probed stream: {} Hz, {} channel(s), duration {:.1}s",
            sample_rate,
            channels,
            duration.as_secs_f64()
        );

        Ok(Self {
            format_reader,
            decoder,
            track_id,
            time_base,
            format: StreamFormat {
                sample_rate,
                channels,
            },
            duration,
            pending: Vec::new(),
            pending_offset: 0,
            position_frames: 0,
            eof: false,
        })
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Frames handed downstream so far, adjusted by seeks.
    pub fn position_frames(&self) -> u64 {
        self.position_frames
    }

    pub fn position(&self) -> Duration {
        frames_to_duration(self.position_frames, self.format.sample_rate)
    }

    /// Pull up to `out.len()` interleaved samples; `0` signals end of
    /// stream.
    pub fn read_samples(&mut self, out: &mut [f32]) -> usize {
        let mut written = 0;
        while written < out.len() {
            if self.pending_offset >= self.pending.len() {
                if !self.decode_next_packet() {
                    break;
                }
            }
            let available = self.pending.len() - self.pending_offset;
            let n = (out.len() - written).min(available);
            out[written..written + n]
                .copy_from_slice(&self.pending[self.pending_offset..self.pending_offset + n]);
            self.pending_offset += n;
            written += n;
        }

        self.position_frames += (written / self.format.channels as usize) as u64;
        written
    }

    /// Seek to an absolute frame index. The underlying reader only accepts
    /// targets inside the already-buffered byte range.
    pub fn seek_to_frame(&mut self, frame: u64) -> Result<()> {
        let sample_rate = self.format.sample_rate as u64;
        let time = Time::new(
            frame / sample_rate,
            (frame % sample_rate) as f64 / sample_rate as f64,
        );

        let seeked = self
            .format_reader
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| AudioError::Range(format!("seek failed: {}", e)))?;

        self.decoder.reset();
        self.pending.clear();
        self.pending_offset = 0;
        self.eof = false;

        self.position_frames = match self.time_base {
            Some(tb) => {
                let time = tb.calc_time(seeked.actual_ts);
                ((time.seconds as f64 + time.frac) * self.format.sample_rate as f64) as u64
            }
            None => frame,
        };

        Ok(())
    }

    /// Refill `pending` from the next packet of our track; false at EOF.
    fn decode_next_packet(&mut self) -> bool {
        if self.eof {
            return false;
        }
        self.pending.clear();
        self.pending_offset = 0;

        loop {
            let packet = match self.format_reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    self.eof = true;
                    return false;
                }
                Err(SymphoniaError::ResetRequired) => {
                    self.decoder.reset();
                    continue;
                }
                Err(e) => {
                    log::warn!("packet read failed, treating as end of stream: {}", e);
                    self.eof = true;
                    return false;
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    append_interleaved(&decoded, &mut self.pending);
                    if self.pending.is_empty() {
                        continue;
                    }
                    return true;
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    // A malformed frame is recoverable, skip it.
                    log::debug!("skipping malformed packet: {}", e);
                    continue;
                }
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    self.eof = true;
                    return false;
                }
                Err(e) => {
                    log::warn!("decode failed, treating as end of stream: {}", e);
                    self.eof = true;
                    return false;
                }
            }
        }
    }
}

pub(crate) fn frames_to_duration(frames: u64, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(frames as f64 / sample_rate as f64)
}

/// Convert a Symphonia buffer to interleaved f32 samples, appending to
/// `out` so the decode path reuses one allocation.
fn append_interleaved(buffer: &AudioBufferRef, out: &mut Vec<f32>) {
    let num_channels = buffer.spec().channels.count();
    let num_frames = buffer.frames();
    out.reserve(num_frames * num_channels);

    match buffer {
        AudioBufferRef::F32(buf) => {
            for frame_idx in 0..num_frames {
                for ch_idx in 0..num_channels {
                    out.push(buf.chan(ch_idx)[frame_idx]);
                }
            }
        }
        AudioBufferRef::F64(buf) => {
            for frame_idx in 0..num_frames {
                for ch_idx in 0..num_channels {
                    out.push(buf.chan(ch_idx)[frame_idx] as f32);
                }
            }
        }
        AudioBufferRef::S8(buf) => {
            for frame_idx in 0..num_frames {
                for ch_idx in 0..num_channels {
                    out.push(buf.chan(ch_idx)[frame_idx] as f32 / 128.0);
                }
            }
        }
        AudioBufferRef::S16(buf) => {
            for frame_idx in 0..num_frames {
                for ch_idx in 0..num_channels {
                    out.push(buf.chan(ch_idx)[frame_idx] as f32 / 32768.0);
                }
            }
        }
        AudioBufferRef::S24(buf) => {
            for frame_idx in 0..num_frames {
                for ch_idx in 0..num_channels {
                    out.push(buf.chan(ch_idx)[frame_idx].inner() as f32 / 8388608.0);
                }
            }
        }
        AudioBufferRef::S32(buf) => {
            for frame_idx in 0..num_frames {
                for ch_idx in 0..num_channels {
                    out.push(buf.chan(ch_idx)[frame_idx] as f32 / 2147483648.0);
                }
            }
        }
        AudioBufferRef::U8(buf) => {
            for frame_idx in 0..num_frames {
                for ch_idx in 0..num_channels {
                    out.push((buf.chan(ch_idx)[frame_idx] as f32 - 128.0) / 128.0);
                }
            }
        }
        AudioBufferRef::U16(buf) => {
            for frame_idx in 0..num_frames {
                for ch_idx in 0..num_channels {
                    out.push((buf.chan(ch_idx)[frame_idx] as f32 - 32768.0) / 32768.0);
                }
            }
        }
        AudioBufferRef::U24(buf) => {
            for frame_idx in 0..num_frames {
                for ch_idx in 0..num_channels {
                    out.push((buf.chan(ch_idx)[frame_idx].inner() as f32 - 8388608.0) / 8388608.0);
                }
            }
        }
        AudioBufferRef::U32(buf) => {
            for frame_idx in 0..num_frames {
                for ch_idx in 0..num_channels {
                    out.push(
                        (buf.chan(ch_idx)[frame_idx] as f32 - 2147483648.0) / 2147483648.0,
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Minimal 16-bit PCM WAV with a 440 Hz tone.
    fn make_wav(seconds: f64, sample_rate: u32, channels: u16) -> Vec<u8> {
        let frames = (seconds * sample_rate as f64) as usize;
        let data_len = frames * channels as usize * 2;
        let mut wav = Vec::with_capacity(44 + data_len);

        wav.extend_from_slice(b"RIFF");
        wav.extend_from_slice(&(36 + data_len as u32).to_le_bytes());
        wav.extend_from_slice(b"WAVE");
        wav.extend_from_slice(b"fmt ");
        wav.extend_from_slice(&16u32.to_le_bytes());
        wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
        wav.extend_from_slice(&channels.to_le_bytes());
        wav.extend_from_slice(&sample_rate.to_le_bytes());
        wav.extend_from_slice(&(sample_rate * channels as u32 * 2).to_le_bytes());
        wav.extend_from_slice(&(channels * 2).to_le_bytes());
        wav.extend_from_slice(&16u16.to_le_bytes());
        wav.extend_from_slice(b"data");
        wav.extend_from_slice(&(data_len as u32).to_le_bytes());

        for frame in 0..frames {
            let t = frame as f64 / sample_rate as f64;
            let sample = ((t * 440.0 * std::f64::consts::TAU).sin() * 0.5 * 32767.0) as i16;
            for _ in 0..channels {
                wav.extend_from_slice(&sample.to_le_bytes());
            }
        }
        wav
    }

    fn probe_wav(seconds: f64, sample_rate: u32, channels: u16) -> DecodedStream {
        let bytes = make_wav(seconds, sample_rate, channels);
        DecodedStream::probe(Box::new(Cursor::new(bytes))).expect("wav must probe")
    }

    #[test]
    fn probe_reports_format_and_duration() {
        let stream = probe_wav(2.0, 8000, 2);
        assert_eq!(stream.format().sample_rate, 8000);
        assert_eq!(stream.format().channels, 2);
        let duration = stream.duration().as_secs_f64();
        assert!((duration - 2.0).abs() < 0.05, "duration was {duration}");
    }

    #[test]
    fn probe_rejects_non_audio_bytes() {
        let garbage = vec![0x42u8; 4096];
        let err = DecodedStream::probe(Box::new(Cursor::new(garbage))).unwrap_err();
        assert_eq!(err.kind(), quaver_core::ErrorKind::Decode);
    }

    #[test]
    fn read_samples_advances_frame_position() {
        let mut stream = probe_wav(1.0, 8000, 2);
        let mut out = vec![0f32; 8000];
        let n = stream.read_samples(&mut out);
        assert_eq!(n, 8000);
        assert_eq!(stream.position_frames(), 4000);
        assert!((stream.position().as_secs_f64() - 0.5).abs() < 0.01);
    }

    #[test]
    fn read_samples_returns_zero_at_end() {
        let mut stream = probe_wav(0.1, 8000, 1);
        let mut out = vec![0f32; 16000];
        let mut total = 0;
        loop {
            let n = stream.read_samples(&mut out);
            if n == 0 {
                break;
            }
            total += n;
        }
        assert_eq!(total, 800);
        assert_eq!(stream.read_samples(&mut out), 0);
    }

    #[test]
    fn seek_places_position_within_a_period() {
        let mut stream = probe_wav(2.0, 8000, 2);
        stream.seek_to_frame(8000).expect("seek inside the stream");
        let position = stream.position().as_secs_f64();
        assert!((position - 1.0).abs() < 0.1, "position was {position}");

        let mut out = vec![0f32; 1000];
        assert!(stream.read_samples(&mut out) > 0);
    }

    #[test]
    fn repeated_seeks_are_stable() {
        let mut stream = probe_wav(2.0, 8000, 1);
        stream.seek_to_frame(4000).unwrap();
        stream.seek_to_frame(12000).unwrap();
        stream.seek_to_frame(4000).unwrap();
        let position = stream.position().as_secs_f64();
        assert!((position - 0.5).abs() < 0.1, "position was {position}");
    }
}
