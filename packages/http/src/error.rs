use std::time::Duration;

/// Boxed error produced by caller-supplied body streams.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Connection-level failure. Never retried here.
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    /// The configured deadline passed before the request finished.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("too many redirects (limit {limit})")]
    RedirectLoop { limit: usize },

    /// Non-success status code. The response body was drained before this was raised.
    #[error("HTTP status {code}")]
    HttpStatus { code: u16 },

    /// The response body could not be decoded as the requested structured type.
    #[error("parse error: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("request body serialization error: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("cannot replay a streamed request body across a {status} redirect")]
    RedirectBodyNotReplayable { status: u16 },

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Invalid URL: {message}")]
    InvalidUrl { message: String },

    #[error("Unsupported URL scheme: {scheme}")]
    UnsupportedScheme { scheme: String },

    #[error("Invalid HTTP method: {method}")]
    InvalidMethod { method: String },

    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// A caller-supplied body stream yielded an error.
    #[error("body stream error: {0}")]
    Stream(#[source] BoxError),

    #[error("runtime error: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("unknown response type: {name}")]
    UnknownResponseType { name: String },

    #[error("address family must be 4 or 6, got {family}")]
    InvalidAddressFamily { family: u8 },
}

impl Error {
    /// Classify a reqwest failure, folding its timeouts into [`Error::Timeout`]
    /// and failures of a caller's body stream into [`Error::Stream`].
    pub(crate) fn from_transport(error: reqwest::Error, timeout: Option<Duration>) -> Self {
        match timeout {
            Some(limit) if error.is_timeout() => Error::Timeout(limit),
            _ if (error.is_body() || error.is_request()) && caused_by_body_stream(&error) => {
                Error::Stream(Box::new(error))
            }
            _ => Error::Network(error),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// Status code carried by an [`Error::HttpStatus`].
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::HttpStatus { code } => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// reqwest reports a failed request body as its own error, with ours somewhere
/// down the source chain.
fn caused_by_body_stream(error: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        if matches!(cause.downcast_ref::<Error>(), Some(Error::Stream(_))) {
            return true;
        }
        source = cause.source();
    }
    false
}
