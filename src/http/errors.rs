//! Error types for the portal HTTP client.

/// A failed fetch. Every variant carries the URL that was requested.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("failed to build HTTP client")]
    Client(#[source] reqwest::Error),
    #[error("invalid url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("request to {url} failed")]
    Connect {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("request to {url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("failed to read response body from {url}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("response from {url} had an empty body")]
    EmptyBody { url: String },
}

impl FetchError {
    /// The URL the failed request was made against.
    pub fn url(&self) -> &str {
        match self {
            Self::Client(_) => "",
            Self::InvalidUrl { url, .. }
            | Self::Connect { url, .. }
            | Self::Status { url, .. }
            | Self::Body { url, .. }
            | Self::EmptyBody { url } => url,
        }
    }

    /// Whether a retry has any chance of succeeding.
    ///
    /// Client errors (4xx) and malformed URLs will fail the same way again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Client(_) | Self::InvalidUrl { .. } => false,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Connect { .. } | Self::Body { .. } | Self::EmptyBody { .. } => true,
        }
    }
}
