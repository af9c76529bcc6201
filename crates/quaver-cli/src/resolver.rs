// Resolves track identifiers to signed progressive media URLs

use quaver_core::{AudioError, Result};
use serde::Deserialize;
use std::time::Duration;

/// Track metadata returned by a search.
#[derive(Clone, Debug, Deserialize)]
pub struct Track {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub duration_ms: Option<u64>,
}

impl Track {
    pub fn duration_string(&self) -> String {
        match self.duration_ms {
            Some(ms) => format_duration_ms(ms),
            None => "?:??".to_string(),
        }
    }
}

/// A resolved stream: the signed URL plus the service's idea of the track
/// length. The URL is typically time-limited.
#[derive(Clone, Debug, Deserialize)]
pub struct StreamInfo {
    pub url: String,
    pub duration_ms: Option<u64>,
}

impl StreamInfo {
    pub fn expected_duration(&self) -> Option<Duration> {
        self.duration_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    tracks: Vec<Track>,
}

/// Facade over the remote audio-hosting service. The playback core never
/// talks to the service itself; it only receives the resolved URL.
pub trait TrackResolver {
    fn search(&self, query: &str) -> Result<Vec<Track>>;
    fn track(&self, track_id: &str) -> Result<Track>;
    fn resolve(&self, track_id: &str) -> Result<StreamInfo>;
}

/// JSON/HTTP resolver against a configurable API base URL.
pub struct HttpResolver {
    base: String,
    agent: ureq::Agent,
}

impl HttpResolver {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            agent: quaver_transport_http::create_http_agent(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base.trim_end_matches('/'), path)
    }
}

impl TrackResolver for HttpResolver {
    fn search(&self, query: &str) -> Result<Vec<Track>> {
        let url = self.endpoint(&format!("/tracks?q={}", urlencoding::encode(query)));
        let response = self
            .agent
            .get(&url)
            .call()
            .map_err(|e| AudioError::Network(format!("search failed: {}", e)))?;
        let parsed: SearchResponse = response
            .into_json()
            .map_err(|e| AudioError::Network(format!("malformed search response: {}", e)))?;
        Ok(parsed.tracks)
    }

    fn track(&self, track_id: &str) -> Result<Track> {
        if track_id.trim().is_empty() {
            return Err(AudioError::Input("track id cannot be empty".to_string()));
        }
        let url = self.endpoint(&format!("/tracks/{}", urlencoding::encode(track_id)));
        let response = self
            .agent
            .get(&url)
            .call()
            .map_err(|e| AudioError::Network(format!("track lookup failed: {}", e)))?;
        response
            .into_json()
            .map_err(|e| AudioError::Network(format!("malformed track response: {}", e)))
    }

    fn resolve(&self, track_id: &str) -> Result<StreamInfo> {
        if track_id.trim().is_empty() {
            return Err(AudioError::Input("track id cannot be empty".to_string()));
        }
        let url = self.endpoint(&format!("/tracks/{}/stream", urlencoding::encode(track_id)));
        let response = self
            .agent
            .get(&url)
            .call()
            .map_err(|e| AudioError::Network(format!("stream resolution failed: {}", e)))?;
        response
            .into_json()
            .map_err(|e| AudioError::Network(format!("malformed stream response: {}", e)))
    }
}

pub fn format_duration_ms(ms: u64) -> String {
    let total_seconds = ms / 1000;
    format!("{}:{:02}", total_seconds / 60, total_seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    fn serve_json(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
        let base = format!("http://{}", listener.local_addr().unwrap());
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
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes());
        });
        base
    }

    #[test]
    fn search_parses_the_track_list() {
        let base = serve_json(
            r#"{"tracks":[{"id":"42","title":"Midnight","artist":"Nova","duration_ms":183000}]}"#,
        );
        let resolver = HttpResolver::new(base);
        let tracks = resolver.search("midnight").unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].id, "42");
        assert_eq!(tracks[0].duration_string(), "3:03");
    }

    #[test]
    fn resolve_returns_url_and_expected_duration() {
        let base = serve_json(r#"{"url":"http://cdn.example/signed.mp3","duration_ms":120000}"#);
        let resolver = HttpResolver::new(base);
        let info = resolver.resolve("42").unwrap();
        assert_eq!(info.url, "http://cdn.example/signed.mp3");
        assert_eq!(info.expected_duration(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn track_lookup_parses_metadata() {
        let base = serve_json(r#"{"id":"42","title":"Midnight","artist":"Nova","duration_ms":null}"#);
        let resolver = HttpResolver::new(base);
        let track = resolver.track("42").unwrap();
        assert_eq!(track.title, "Midnight");
        assert_eq!(track.duration_string(), "?:??");
    }

    #[test]
    fn empty_track_id_is_rejected_without_a_request() {
        let resolver = HttpResolver::new("http://127.0.0.1:1");
        assert!(resolver.resolve(" ").is_err());
        assert!(resolver.track("").is_err());
    }

    #[test]
    fn unreachable_server_surfaces_a_network_error() {
        let resolver = HttpResolver::new("http://127.0.0.1:1");
        let err = resolver.search("anything").unwrap_err();
        assert_eq!(err.kind(), quaver_core::ErrorKind::Network);
    }
}
