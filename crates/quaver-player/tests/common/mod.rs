// Shared helpers: generated WAV fixtures and a loopback HTTP server

use std::io::{Read, Write};
use std::net::TcpListener;
use std::thread;
use std::time::{Duration, Instant};

/// 16-bit PCM WAV container around the given frame generator.
fn make_wav(
    seconds: f64,
    sample_rate: u32,
    channels: u16,
    mut sample_at: impl FnMut(usize) -> f64,
) -> Vec<u8> {
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
        let sample = (sample_at(frame).clamp(-1.0, 1.0) * 32767.0) as i16;
        for _ in 0..channels {
            wav.extend_from_slice(&sample.to_le_bytes());
        }
    }
    wav
}

/// Sine fixture, audible content for volume/pause assertions.
pub fn sine_wav(seconds: f64, sample_rate: u32, channels: u16) -> Vec<u8> {
    make_wav(seconds, sample_rate, channels, |frame| {
        (frame as f64 / sample_rate as f64 * 440.0 * std::f64::consts::TAU).sin() * 0.5
    })
}

/// Constant-value fixture; the sign tags which stream a sample came from.
pub fn const_wav(seconds: f64, sample_rate: u32, channels: u16, value: f64) -> Vec<u8> {
    make_wav(seconds, sample_rate, channels, |_| value)
}

/// Serves `body` to a single connection, then exits.
pub fn serve_once(body: Vec<u8>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
    let url = format!("http://{}/track.wav", listener.local_addr().unwrap());

    thread::spawn(move || {
        let Ok((mut stream, _)) = listener.accept() else {
            return;
        };
        // Drain the request head before responding.
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            match stream.read(&mut byte) {
                Ok(1) => head.push(byte[0]),
                _ => break,
            }
        }
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: audio/wav\r\n\r\n",
            body.len()
        );
        let _ = stream.write_all(response.as_bytes());
        let _ = stream.write_all(&body);
        let _ = stream.flush();
    });

    url
}

/// Accepts one connection and then sits on it without ever responding.
pub fn serve_stall() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
    let url = format!("http://{}/track.wav", listener.local_addr().unwrap());

    thread::spawn(move || {
        let Ok((mut stream, _)) = listener.accept() else {
            return;
        };
        let mut head = Vec::new();
        let mut byte = [0u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            match stream.read(&mut byte) {
                Ok(1) => head.push(byte[0]),
                _ => break,
            }
        }
        // Hold the socket open, send nothing.
        thread::sleep(Duration::from_secs(8));
    });

    url
}

/// Polls `predicate` until it holds or the timeout expires.
pub fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    predicate()
}

/// Absolute difference between two durations.
pub fn drift(a: Duration, b: Duration) -> Duration {
    if a > b {
        a - b
    } else {
        b - a
    }
}

pub fn rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt()
}
