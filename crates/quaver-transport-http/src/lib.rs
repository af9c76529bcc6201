// HTTP transport: agent configuration and the progressive downloader

mod client;
mod downloader;

pub use client::create_http_agent;
pub use downloader::{DownloadConfig, Downloader, MAX_RETRIES};
