//! The transport boundary: a request/response pair, a cancellation token, and the [`Transport`]
//! trait the fetch protocol talks to. [`HttpTransport`] is the production implementation on top
//! of a blocking HTTP client.

use std::io::Read;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use crate::headers::Headers;
use crate::{Error, Result};

/// HTTP method used for a transport request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET, no body.
    Get,
    /// POST with a body.
    Post,
}

/// A transport-level request.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// Target URL.
    pub url: String,
    /// HTTP method.
    pub method: Method,
    /// Request headers. Keys are matched case-insensitively.
    pub headers: Headers,
    /// Request body, sent only for body-carrying methods.
    pub body: Option<String>,
    /// Round-trip timeout.
    pub timeout: Duration,
}

/// A transport-level response. Header names are normalized to lower-case.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers with lower-cased names.
    pub headers: Headers,
    /// Raw response body.
    pub body: Vec<u8>,
}

/// A cancellation signal shared between the host and an in-flight transfer.
///
/// Cloning yields a handle to the same signal. The transport checks the token periodically while
/// reading the response and aborts the transfer once it is cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a new, non-cancelled token.
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    /// Request cancellation of the transfer.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// The capability the fetch protocol consumes: send a request, get back status, headers and body,
/// or a transport error.
pub trait Transport: Send + Sync {
    /// Perform a single request. Implementations must not retry.
    fn send(&self, request: &TransportRequest, cancel: &CancelToken) -> Result<TransportResponse>;
}

/// Production [`Transport`] backed by a blocking HTTP client.
///
/// The client holds a connection pool internally, so the same instance is reused between
/// requests.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    /// Create a new transport.
    pub fn new() -> HttpTransport {
        HttpTransport {
            client: reqwest::blocking::Client::new(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> HttpTransport {
        HttpTransport::new()
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: &TransportRequest, cancel: &CancelToken) -> Result<TransportResponse> {
        if cancel.is_cancelled() {
            return Err(Error::Transport("request cancelled".to_owned()));
        }

        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        builder = builder.timeout(request.timeout);
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        if request.method == Method::Post {
            if let Some(body) = &request.body {
                builder = builder.body(body.clone());
            }
        }

        let mut response = builder
            .send()
            .map_err(|err| Error::Transport(err.without_url().to_string()))?;

        let status = response.status().as_u16();
        let mut headers = Headers::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str(), value);
            }
        }

        // Read the body in chunks so cancellation is honored mid-transfer.
        let mut body = Vec::new();
        let mut chunk = [0u8; 8192];
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Transport("request cancelled".to_owned()));
            }
            let read = response
                .read(&mut chunk)
                .map_err(|err| Error::Transport(err.to_string()))?;
            if read == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..read]);
        }

        Ok(TransportResponse { status, headers, body })
    }
}

#[cfg(test)]
mod tests {
    use super::CancelToken;

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();

        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
