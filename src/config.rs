use std::time::Duration;

use clap::Args;
use url::Url;

use crate::error::TransportError;
use crate::types::DEFAULT_PAGE_SIZE;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Where the explorer API lives and how long plain requests may take.
#[derive(Debug, Clone, Args)]
pub struct ApiConfig {
    /// Base URL of the explorer API.
    #[arg(long = "api-url", env = "EXPLORER_API_URL", default_value = DEFAULT_API_URL)]
    pub base_url: Url,

    /// Path of the paginated agent collection.
    #[arg(long, default_value = "/api/agents")]
    pub collection_path: String,

    /// Path of the scan status endpoint.
    #[arg(long, default_value = "/endpoint-health/scan-status")]
    pub status_path: String,

    /// Path of the scan event stream (opening it starts a job).
    #[arg(long, default_value = "/endpoint-health/scan-stream")]
    pub stream_path: String,

    /// Timeout for non-streaming requests in milliseconds.
    #[arg(long = "timeout-ms", env = "EXPLORER_TIMEOUT_MS", default_value_t = 10_000)]
    pub timeout_ms: u64,
}

impl ApiConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            collection_path: "/api/agents".into(),
            status_path: "/endpoint-health/scan-status".into(),
            stream_path: "/endpoint-health/scan-stream".into(),
            timeout_ms: 10_000,
        }
    }

    pub fn parse_base(base_url: &str) -> Result<Self, TransportError> {
        Ok(Self::new(Url::parse(base_url)?))
    }

    /// `path` appended to the base URL, keeping any path prefix the base carries.
    pub fn endpoint(&self, path: &str) -> Result<Url, TransportError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        Ok(Url::parse(&format!("{base}/{path}"))?)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }
}

/// Tunables of the two controllers.
#[derive(Debug, Clone, Args)]
pub struct SessionConfig {
    /// Items per list page.
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
    pub page_size: u32,

    /// Status polling interval used when resuming a running scan, in milliseconds.
    #[arg(long = "poll-interval-ms", env = "EXPLORER_POLL_INTERVAL_MS", default_value_t = 2_000)]
    pub poll_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            poll_interval_ms: 2_000,
        }
    }
}

impl SessionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(50))
    }
}
