use thiserror::Error;

/// Failure of a single outbound request to a remote service.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("rate limited (HTTP 429)")]
    RateLimited,

    #[error("server error: HTTP {status}")]
    Server { status: u16 },

    #[error("client error: HTTP {status}")]
    Client { status: u16 },

    #[error("host unreachable: {0}")]
    Unreachable(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response from {source_name}: {reason}")]
    Malformed {
        source_name: &'static str,
        reason: String,
    },
}

impl FetchError {
    /// Whether another attempt could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout
                | FetchError::RateLimited
                | FetchError::Server { .. }
                | FetchError::Transport(_)
        )
    }

    pub fn from_status(status: reqwest::StatusCode) -> Self {
        match status.as_u16() {
            429 => FetchError::RateLimited,
            s if status.is_server_error() => FetchError::Server { status: s },
            s => FetchError::Client { status: s },
        }
    }

    pub fn malformed(source_name: &'static str, reason: impl Into<String>) -> Self {
        FetchError::Malformed {
            source_name,
            reason: reason.into(),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if e.is_connect() {
            FetchError::Unreachable(e.to_string())
        } else if e.is_decode() {
            FetchError::malformed("http", e.to_string())
        } else if let Some(status) = e.status() {
            FetchError::from_status(status)
        } else {
            FetchError::Transport(e.to_string())
        }
    }
}
