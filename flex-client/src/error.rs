/// Failure reported by the platform transport.
///
/// The workflow treats every variant as opaque and non-retryable; callers
/// decide whether to run the failed step again.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("platform returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("invalid platform URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("unexpected platform response: {0}")]
    Decode(String),
    #[error("authentication failed: {0}")]
    Auth(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Request(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
