//! Transport errors
//!
//! Cancellation is deliberately absent: a superseded request or detached channel is
//! an expected outcome, reported through `Resolution`/`ScanPhase`, never as an error.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid endpoint url: {0}")]
    Url(#[from] url::ParseError),

    #[error("event stream failed: {0}")]
    Stream(String),

    #[error("event stream closed before the scan completed")]
    StreamClosed,
}

impl TransportError {
    /// 5xx and connection-level failures; 4xx means the request itself is wrong.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Status { status, .. } => *status >= 500,
            TransportError::Url(_) => false,
            _ => true,
        }
    }
}

/// Failure of a single item on the scan event stream.
#[derive(Error, Debug)]
pub enum StreamError {
    /// The channel itself failed; the session stops listening.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// One undecodable message; dropped, the channel stays open.
    #[error("malformed scan event {data:?}: {source}")]
    Malformed {
        data: String,
        #[source]
        source: serde_json::Error,
    },
}
