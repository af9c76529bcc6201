// HTTP client configuration shared by the downloader and the resolver

use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a configured HTTP agent with proper timeouts and settings.
/// Signed media URLs redirect through CDN edges, so redirects are followed.
pub fn create_http_agent() -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(CONNECT_TIMEOUT)
        .timeout_read(READ_TIMEOUT)
        .user_agent("quaver/0.1")
        .redirects(10)
        .build()
}
