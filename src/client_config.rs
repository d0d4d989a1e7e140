//! Client configuration. Immutable after construction; consumed by the fetch protocol, the
//! metrics aggregator and the poller.

use std::time::Duration;

use rand::Rng;
use url::Url;

use crate::context::DEFAULT_APP_NAME;
use crate::headers::Headers;
use crate::toggles::ToggleSet;
use crate::{Error, Result};

/// Default name of the header carrying the client key.
pub const DEFAULT_AUTHORIZATION_HEADER: &str = "authorization";

/// Default timeout for a single features query.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for the Unleash client.
///
/// Construct with [`ClientConfig::new`], refine with the builder-style `with_*` setters, and call
/// [`validate`][ClientConfig::validate] before handing it to the client.
///
/// # Examples
/// ```
/// # use unleash_client::ClientConfig;
/// let config = ClientConfig::new("https://unleash.example.com/api/frontend", "client-key", "my-app")
///     .with_refresh_interval(std::time::Duration::from_secs(15))
///     .with_use_post_requests(true);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    url: String,
    client_key: String,
    app_name: String,
    connection_id: String,
    instance_id: String,
    refresh_interval: Duration,
    metrics_interval: Duration,
    metrics_interval_initial: Duration,
    bootstrap: Option<ToggleSet>,
    bootstrap_override: bool,
    header_name: String,
    custom_headers: Headers,
    impression_data_all: bool,
    use_post_requests: bool,
    query_timeout: Duration,
    toggles_storage_ttl: Duration,
}

impl ClientConfig {
    /// Create a new configuration. An empty `app_name` falls back to the default client app name.
    /// A fresh connection id and instance id are generated.
    pub fn new(url: &str, client_key: &str, app_name: &str) -> ClientConfig {
        let app_name = if app_name.is_empty() {
            log::debug!(target: "unleash", "empty app name, falling back to {DEFAULT_APP_NAME:?}");
            DEFAULT_APP_NAME.to_owned()
        } else {
            app_name.to_owned()
        };

        ClientConfig {
            url: url.to_owned(),
            client_key: client_key.to_owned(),
            app_name,
            connection_id: uuid_v4(),
            instance_id: uuid_v4(),
            refresh_interval: Duration::ZERO,
            metrics_interval: Duration::ZERO,
            metrics_interval_initial: Duration::ZERO,
            bootstrap: None,
            bootstrap_override: true,
            header_name: DEFAULT_AUTHORIZATION_HEADER.to_owned(),
            custom_headers: Headers::new(),
            impression_data_all: false,
            use_post_requests: false,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            toggles_storage_ttl: Duration::ZERO,
        }
    }

    /// Update the instance identifier reported in metrics payloads.
    pub fn with_instance_id(mut self, instance_id: &str) -> ClientConfig {
        self.instance_id = instance_id.to_owned();
        self
    }

    /// Update the interval between toggle refreshes. Zero disables refreshing.
    pub fn with_refresh_interval(mut self, interval: Duration) -> ClientConfig {
        self.refresh_interval = interval;
        self
    }

    /// Update the interval between metrics submissions. Zero disables metrics reporting.
    pub fn with_metrics_interval(mut self, interval: Duration) -> ClientConfig {
        self.metrics_interval = interval;
        self
    }

    /// Update the delay before the first metrics submission.
    pub fn with_metrics_interval_initial(mut self, interval: Duration) -> ClientConfig {
        self.metrics_interval_initial = interval;
        self
    }

    /// Provide a toggle set to serve before the first successful fetch.
    pub fn with_bootstrap(mut self, bootstrap: ToggleSet) -> ClientConfig {
        self.bootstrap = Some(bootstrap);
        self
    }

    /// Whether the bootstrap set may overwrite previously stored toggles.
    pub fn with_bootstrap_override(mut self, bootstrap_override: bool) -> ClientConfig {
        self.bootstrap_override = bootstrap_override;
        self
    }

    /// Update the name of the header carrying the client key.
    pub fn with_header_name(mut self, header_name: &str) -> ClientConfig {
        self.header_name = header_name.to_owned();
        self
    }

    /// Provide custom request headers. On name collision (case-insensitive) they override the
    /// standard headers.
    pub fn with_custom_headers(mut self, headers: Headers) -> ClientConfig {
        self.custom_headers = headers;
        self
    }

    /// Emit impression events for every toggle, regardless of per-toggle impression data flags.
    pub fn with_impression_data_all(mut self, impression_data_all: bool) -> ClientConfig {
        self.impression_data_all = impression_data_all;
        self
    }

    /// Use POST requests carrying the encoded context as body instead of GET.
    pub fn with_use_post_requests(mut self, use_post_requests: bool) -> ClientConfig {
        self.use_post_requests = use_post_requests;
        self
    }

    /// Update the per-request timeout.
    pub fn with_query_timeout(mut self, timeout: Duration) -> ClientConfig {
        self.query_timeout = timeout;
        self
    }

    /// Update the time-to-live for persisted toggle sets.
    pub fn with_toggles_storage_ttl(mut self, ttl: Duration) -> ClientConfig {
        self.toggles_storage_ttl = ttl;
        self
    }

    /// Server URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Client key sent in the authorization header.
    pub fn client_key(&self) -> &str {
        &self.client_key
    }

    /// Application name.
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// Connection identifier, generated per configuration.
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Instance identifier reported in metrics payloads.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Interval between toggle refreshes.
    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    /// Interval between metrics submissions.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Delay before the first metrics submission.
    pub fn metrics_interval_initial(&self) -> Duration {
        self.metrics_interval_initial
    }

    /// Bootstrap toggle set, if configured.
    pub fn bootstrap(&self) -> Option<&ToggleSet> {
        self.bootstrap.as_ref()
    }

    /// Whether the bootstrap set may overwrite previously stored toggles.
    pub fn bootstrap_override(&self) -> bool {
        self.bootstrap_override
    }

    /// Name of the header carrying the client key.
    pub fn header_name(&self) -> &str {
        &self.header_name
    }

    /// Custom request headers.
    pub fn custom_headers(&self) -> &Headers {
        &self.custom_headers
    }

    /// Whether impression events are emitted for every toggle.
    pub fn impression_data_all(&self) -> bool {
        self.impression_data_all
    }

    /// Whether features requests use POST with an encoded context body.
    pub fn use_post_requests(&self) -> bool {
        self.use_post_requests
    }

    /// Per-request timeout.
    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    /// Time-to-live for persisted toggle sets.
    pub fn toggles_storage_ttl(&self) -> Duration {
        self.toggles_storage_ttl
    }

    /// Whether periodic toggle refreshing is enabled.
    pub fn is_refresh_enabled(&self) -> bool {
        !self.refresh_interval.is_zero()
    }

    /// Whether periodic metrics reporting is enabled.
    pub fn is_metrics_enabled(&self) -> bool {
        !self.metrics_interval.is_zero()
    }

    /// Check the configuration for problems that would make the client inoperable.
    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(Error::InvalidConfiguration("url must not be empty".to_owned()));
        }
        if self.client_key.is_empty() {
            return Err(Error::InvalidConfiguration(
                "client key must not be empty".to_owned(),
            ));
        }
        Url::parse(&self.url)?;
        Ok(())
    }
}

/// Generate a random version-4 UUID string.
fn uuid_v4() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes[..]);
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    format!(
        "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3],
        bytes[4], bytes[5],
        bytes[6], bytes[7],
        bytes[8], bytes[9],
        bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15],
    )
}
