use std::sync::Arc;

/// Represents a result type for operations in the Unleash client.
///
/// This `Result` type is a standard Rust `Result` type where the error variant is defined by the
/// client-specific [`Error`] enum.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors that can occur in the Unleash client.
///
/// A "not modified" server response is intentionally *not* represented here: it is an ordinary
/// fetch outcome, not an error (see [`FetchResult`][crate::toggle_fetcher::FetchResult]).
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The transport produced no usable response (connection failure, DNS error, timeout,
    /// cancellation).
    #[error("transport failure: {0}")]
    Transport(String),

    /// The response was not of the expected shape.
    #[error("unexpected response: {0}")]
    Protocol(String),

    /// A success-status response body could not be decoded.
    #[error("failed to decode features response: {0}")]
    Decode(String),

    /// The server answered with a non-success, non-304 status.
    #[error("request failed with status {status}: {message}")]
    Http {
        /// HTTP status code of the response.
        status: u16,
        /// Transport-level detail accompanying the status.
        message: String,
    },

    /// The request was unauthorized, possibly due to an invalid client key.
    #[error("unauthorized, client key is likely invalid")]
    Unauthorized,

    /// Invalid URL configuration.
    #[error("invalid url configuration")]
    InvalidUrl(#[source] url::ParseError),

    /// Client configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Indicates that the poller thread panicked. This should normally never happen.
    #[error("poller thread panicked")]
    PollerThreadPanicked,

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<url::ParseError> for Error {
    fn from(value: url::ParseError) -> Self {
        Self::InvalidUrl(value)
    }
}
