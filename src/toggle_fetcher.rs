//! The conditional-fetch protocol against the remote feature service.
//!
//! [`ToggleFetcher`] issues one request per [`fetch`][ToggleFetcher::fetch] call and returns one
//! definitive [`FetchResult`]. No retries happen here; retry and backoff policy belongs to the
//! scheduler driving the fetcher. The last-seen `etag` validator is carried across calls and sent
//! as `if-none-match`, so an unchanged upstream answers with 304 and an empty body.

use crate::client_config::ClientConfig;
use crate::context::Context;
use crate::headers::Headers;
use crate::toggles::ToggleSet;
use crate::transport::{CancelToken, HttpTransport, Method, Transport, TransportRequest};
use crate::wire;
use crate::Error;

const SDK_IDENTIFIER: &str = concat!("unleash-client-rust:", env!("CARGO_PKG_VERSION"));
const USER_AGENT: &str = concat!("unleash-client-rust/", env!("CARGO_PKG_VERSION"));

pub(crate) const STATUS_OK_LOWER: u16 = 200;
pub(crate) const STATUS_OK_UPPER: u16 = 300;
const STATUS_NOT_MODIFIED: u16 = 304;
const STATUS_UNAUTHORIZED: u16 = 401;

/// Outcome of a single fetch call.
///
/// Exactly one of three shapes is produced: `toggles` set (fresh data), everything absent with a
/// 304 status (cache is current), or `error` set (transport, protocol or decode problem).
#[derive(Debug, Default)]
pub struct FetchResult {
    /// HTTP status of the response, or `None` when no response was obtained.
    pub status: Option<u16>,
    /// Decoded toggles, present on a success response with at least one toggle.
    pub toggles: Option<ToggleSet>,
    /// The error, when the fetch did not produce usable data.
    pub error: Option<Error>,
}

impl FetchResult {
    /// Whether the server answered "not modified".
    pub fn is_not_modified(&self) -> bool {
        self.status == Some(STATUS_NOT_MODIFIED)
    }
}

/// Build the standard request headers for talking to the service.
///
/// Custom headers from the configuration are applied last and override the standard ones on
/// case-insensitive name collision.
pub(crate) fn standard_headers(config: &ClientConfig) -> Headers {
    let mut headers = Headers::new();
    headers.insert("accept", "application/json");
    headers.insert("unleash-connection-id", config.connection_id());
    headers.insert(config.header_name(), config.client_key());
    headers.insert("unleash-sdk", SDK_IDENTIFIER);
    headers.insert("user-agent", USER_AGENT);
    headers.insert("unleash-appname", config.app_name());
    if config.use_post_requests() {
        headers.insert("content-type", "application/json");
    }
    headers.extend(config.custom_headers().iter());
    headers
}

/// A client that fetches evaluated toggles from the server.
///
/// Not safe for concurrent fetches on the same instance: the cached validator is owned by the
/// single sequential poller invoking it.
pub struct ToggleFetcher {
    transport: Box<dyn Transport>,
    request: TransportRequest,
    etag: Option<String>,
    cancel: CancelToken,
    /// A 401 response means the client key is not valid. The error is cached so no further
    /// requests are issued to the server.
    unauthorized: bool,
}

impl ToggleFetcher {
    /// Create a fetcher using the production HTTP transport.
    pub fn new(config: &ClientConfig) -> ToggleFetcher {
        ToggleFetcher::with_transport(config, Box::new(HttpTransport::new()))
    }

    /// Create a fetcher on top of a custom transport.
    pub fn with_transport(config: &ClientConfig, transport: Box<dyn Transport>) -> ToggleFetcher {
        let request = TransportRequest {
            url: config.url().to_owned(),
            method: if config.use_post_requests() {
                Method::Post
            } else {
                Method::Get
            },
            headers: standard_headers(config),
            body: None,
            timeout: config.query_timeout(),
        };

        ToggleFetcher {
            transport,
            request,
            etag: None,
            cancel: CancelToken::new(),
            unauthorized: false,
        }
    }

    /// A handle to the cancellation signal checked during transfers.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// The cached validator from the last success response, if any.
    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    /// Fetch the current toggles for `context`.
    ///
    /// Blocks the calling thread for the duration of the network round trip; meant to be invoked
    /// from a dedicated poller thread, not from the evaluation path.
    pub fn fetch(&mut self, context: &Context) -> FetchResult {
        let mut result = FetchResult::default();

        if self.unauthorized {
            result.error = Some(Error::Unauthorized);
            return result;
        }

        let mut request = self.request.clone();
        if request.method == Method::Post {
            request.body = Some(wire::encode_context(context));
        }
        if let Some(etag) = &self.etag {
            request.headers.insert("if-none-match", etag.clone());
        }

        log::debug!(target: "unleash", "fetching toggles");
        let response = match self.transport.send(&request, &self.cancel) {
            Ok(response) => response,
            Err(err) => {
                log::warn!(target: "unleash", "toggle fetch failed: {err}");
                result.error = Some(err);
                return result;
            }
        };

        result.status = Some(response.status);

        if response.status == STATUS_NOT_MODIFIED {
            log::debug!(target: "unleash", "toggles not modified");
            return result;
        }

        if (STATUS_OK_LOWER..STATUS_OK_UPPER).contains(&response.status) {
            let body = match String::from_utf8(response.body) {
                Ok(body) => body,
                Err(err) => {
                    result.error = Some(Error::Decode(err.to_string()));
                    return result;
                }
            };
            let toggles = wire::decode_client_features(&body);
            if !toggles.is_empty() {
                result.toggles = Some(toggles);
            }
            if let Some(etag) = response.headers.get("etag").filter(|etag| !etag.is_empty()) {
                self.etag = Some(etag.to_owned());
            }
            log::debug!(target: "unleash", "successfully fetched toggles");
            return result;
        }

        if response.status == STATUS_UNAUTHORIZED {
            log::warn!(target: "unleash", "client is not authorized, check your client key");
            self.unauthorized = true;
            result.error = Some(Error::Unauthorized);
            return result;
        }

        log::warn!(
            target: "unleash",
            "received non-success status {status} while fetching toggles",
            status = response.status,
        );
        result.error = Some(Error::Http {
            status: response.status,
            message: String::from_utf8_lossy(&response.body).trim().to_owned(),
        });
        result
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use super::ToggleFetcher;
    use crate::client_config::ClientConfig;
    use crate::context::Context;
    use crate::headers::Headers;
    use crate::transport::{
        CancelToken, Method, Transport, TransportRequest, TransportResponse,
    };
    use crate::{Error, Result};

    /// Scripted transport recording every request it receives.
    struct FakeTransport {
        responses: Mutex<VecDeque<Result<TransportResponse>>>,
        requests: Arc<Mutex<Vec<TransportRequest>>>,
    }

    impl FakeTransport {
        fn scripted(
            responses: Vec<Result<TransportResponse>>,
        ) -> (FakeTransport, Arc<Mutex<Vec<TransportRequest>>>) {
            let requests = Arc::new(Mutex::new(Vec::new()));
            let transport = FakeTransport {
                responses: Mutex::new(responses.into()),
                requests: requests.clone(),
            };
            (transport, requests)
        }
    }

    impl Transport for FakeTransport {
        fn send(
            &self,
            request: &TransportRequest,
            cancel: &CancelToken,
        ) -> Result<TransportResponse> {
            if cancel.is_cancelled() {
                return Err(Error::Transport("request cancelled".to_owned()));
            }
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected request")
        }
    }

    fn response(status: u16, body: &str, etag: Option<&str>) -> TransportResponse {
        let mut headers = Headers::new();
        if let Some(etag) = etag {
            headers.insert("ETag", etag);
        }
        TransportResponse {
            status,
            headers,
            body: body.as_bytes().to_vec(),
        }
    }

    fn config() -> ClientConfig {
        ClientConfig::new("https://unleash.example.com/api/frontend", "secret-key", "my-app")
    }

    const FEATURES: &str =
        r#"{"toggles":[{"name":"flagA","enabled":true,"impressionData":true}]}"#;

    #[test]
    fn success_decodes_toggles_and_caches_the_validator() {
        let (transport, requests) = FakeTransport::scripted(vec![
            Ok(response(200, FEATURES, Some("\"v1\""))),
            Ok(response(304, "", None)),
        ]);
        let mut fetcher = ToggleFetcher::with_transport(&config(), Box::new(transport));
        let context = Context::new("my-app", "", "session");

        let result = fetcher.fetch(&context);
        assert_eq!(result.status, Some(200));
        assert!(result.error.is_none());
        let toggles = result.toggles.expect("toggles should be present");
        assert!(toggles.is_enabled("flagA"));
        assert_eq!(fetcher.etag(), Some("\"v1\""));

        let result = fetcher.fetch(&context);
        assert_eq!(result.status, Some(304));
        assert!(result.is_not_modified());
        assert!(result.toggles.is_none());
        assert!(result.error.is_none());

        let requests = requests.lock().unwrap();
        assert_eq!(requests[0].headers.get("if-none-match"), None);
        assert_eq!(requests[1].headers.get("if-none-match"), Some("\"v1\""));
    }

    #[test]
    fn transport_failure_leaves_the_status_at_its_sentinel() {
        let (transport, _) = FakeTransport::scripted(vec![Err(Error::Transport(
            "connection refused".to_owned(),
        ))]);
        let mut fetcher = ToggleFetcher::with_transport(&config(), Box::new(transport));

        let result = fetcher.fetch(&Context::new("my-app", "", "session"));

        assert_eq!(result.status, None);
        assert!(result.toggles.is_none());
        assert!(matches!(result.error, Some(Error::Transport(_))));
    }

    #[test]
    fn non_success_status_is_surfaced_as_an_error() {
        let (transport, _) =
            FakeTransport::scripted(vec![Ok(response(500, "internal error", None))]);
        let mut fetcher = ToggleFetcher::with_transport(&config(), Box::new(transport));

        let result = fetcher.fetch(&Context::new("my-app", "", "session"));

        assert_eq!(result.status, Some(500));
        assert!(result.toggles.is_none());
        assert!(matches!(
            result.error,
            Some(Error::Http { status: 500, .. })
        ));
    }

    #[test]
    fn empty_toggle_sets_are_not_installed() {
        let (transport, _) =
            FakeTransport::scripted(vec![Ok(response(200, r#"{"toggles":[]}"#, None))]);
        let mut fetcher = ToggleFetcher::with_transport(&config(), Box::new(transport));

        let result = fetcher.fetch(&Context::new("my-app", "", "session"));

        assert_eq!(result.status, Some(200));
        assert!(result.toggles.is_none());
        assert!(result.error.is_none());
    }

    #[test]
    fn unauthorized_is_cached_across_calls() {
        let (transport, requests) =
            FakeTransport::scripted(vec![Ok(response(401, "", None))]);
        let mut fetcher = ToggleFetcher::with_transport(&config(), Box::new(transport));
        let context = Context::new("my-app", "", "session");

        let result = fetcher.fetch(&context);
        assert!(matches!(result.error, Some(Error::Unauthorized)));

        // The second call must not reach the transport.
        let result = fetcher.fetch(&context);
        assert!(matches!(result.error, Some(Error::Unauthorized)));
        assert_eq!(requests.lock().unwrap().len(), 1);
    }

    #[test]
    fn standard_headers_carry_identity_and_credentials() {
        let (transport, requests) =
            FakeTransport::scripted(vec![Ok(response(200, FEATURES, None))]);
        let mut custom = Headers::new();
        custom.insert("Accept", "application/vnd.custom+json");
        custom.insert("X-Extra", "1");
        let config = config()
            .with_header_name("X-API-Key")
            .with_custom_headers(custom);
        let mut fetcher = ToggleFetcher::with_transport(&config, Box::new(transport));

        fetcher.fetch(&Context::new("my-app", "", "session"));

        let requests = requests.lock().unwrap();
        let headers = &requests[0].headers;
        assert_eq!(headers.get("x-api-key"), Some("secret-key"));
        assert_eq!(headers.get("unleash-appname"), Some("my-app"));
        assert!(headers.get("unleash-connection-id").is_some());
        assert!(headers.get("unleash-sdk").unwrap().starts_with("unleash-client-rust:"));
        // Custom headers override standard ones on collision.
        assert_eq!(headers.get("accept"), Some("application/vnd.custom+json"));
        assert_eq!(headers.get("x-extra"), Some("1"));
        assert_eq!(requests[0].method, Method::Get);
        assert!(requests[0].body.is_none());
    }

    #[test]
    fn post_requests_carry_the_encoded_context() {
        let (transport, requests) =
            FakeTransport::scripted(vec![Ok(response(200, FEATURES, None))]);
        let config = config().with_use_post_requests(true);
        let mut fetcher = ToggleFetcher::with_transport(&config, Box::new(transport));
        let mut context = Context::new("my-app", "production", "session-9");
        context.set_user_id("user-1");

        fetcher.fetch(&context);

        let requests = requests.lock().unwrap();
        assert_eq!(requests[0].method, Method::Post);
        assert_eq!(
            requests[0].headers.get("content-type"),
            Some("application/json")
        );
        let body: serde_json::Value =
            serde_json::from_str(requests[0].body.as_deref().unwrap()).unwrap();
        assert_eq!(body["context"]["appName"], "my-app");
        assert_eq!(body["context"]["userId"], "user-1");
    }

    #[test]
    fn cancellation_surfaces_as_a_transport_failure() {
        let (transport, requests) = FakeTransport::scripted(vec![]);
        let mut fetcher = ToggleFetcher::with_transport(&config(), Box::new(transport));
        fetcher.cancel_token().cancel();

        let result = fetcher.fetch(&Context::new("my-app", "", "session"));

        assert!(matches!(result.error, Some(Error::Transport(_))));
        assert_eq!(result.status, None);
        assert!(requests.lock().unwrap().is_empty());
    }
}
