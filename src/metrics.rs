//! Thread-safe aggregation of per-toggle evaluation counters, and submission of the drained
//! bucket to the service.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::client_config::ClientConfig;
use crate::toggle_fetcher::{standard_headers, STATUS_OK_LOWER, STATUS_OK_UPPER};
use crate::transport::{CancelToken, HttpTransport, Method, Transport, TransportRequest};
use crate::wire;
use crate::{Error, Result};

/// Path of the metrics ingestion endpoint, relative to the configured service URL.
const METRICS_ENDPOINT: &str = "/client/metrics";

/// Evaluation counters for a single toggle.
///
/// Every observation increments `yes_count` or `no_count` by exactly one. An observation carrying
/// a non-empty variant name additionally increments that variant's counter; variant counts are
/// additive with the yes/no counts, not mutually exclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricToggle {
    yes_count: u64,
    no_count: u64,
    variant_stats: HashMap<String, u64>,
}

impl MetricToggle {
    /// Number of enabled observations.
    pub fn yes_count(&self) -> u64 {
        self.yes_count
    }

    /// Number of disabled observations.
    pub fn no_count(&self) -> u64 {
        self.no_count
    }

    /// Counts per observed variant name.
    pub fn variant_stats(&self) -> &HashMap<String, u64> {
        &self.variant_stats
    }

    fn record_enable(&mut self, is_yes: bool) {
        if is_yes {
            self.yes_count += 1;
        } else {
            self.no_count += 1;
        }
    }

    fn record_variant(&mut self, is_yes: bool, variant_name: &str) {
        self.record_enable(is_yes);
        if !variant_name.is_empty() {
            *self.variant_stats.entry(variant_name.to_owned()).or_insert(0) += 1;
        }
    }
}

/// A mapping from toggle name to [`MetricToggle`]. The first observation for a name creates the
/// entry; subsequent observations update it in place.
#[derive(Debug, Clone, Default)]
pub struct MetricList {
    toggles: HashMap<String, MetricToggle>,
}

impl MetricList {
    /// Create an empty list.
    pub fn new() -> MetricList {
        MetricList::default()
    }

    /// Record an enabled/disabled observation for a toggle.
    pub fn add_enable(&mut self, toggle_name: &str, is_yes: bool) {
        self.toggles
            .entry(toggle_name.to_owned())
            .or_default()
            .record_enable(is_yes);
    }

    /// Record an observation carrying a variant name for a toggle.
    pub fn add_variant(&mut self, toggle_name: &str, is_yes: bool, variant_name: &str) {
        self.toggles
            .entry(toggle_name.to_owned())
            .or_default()
            .record_variant(is_yes, variant_name);
    }

    /// Look up counters for a toggle.
    pub fn get(&self, toggle_name: &str) -> Option<&MetricToggle> {
        self.toggles.get(toggle_name)
    }

    /// Iterate over `(toggle name, counters)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetricToggle)> {
        self.toggles.iter().map(|(name, toggle)| (name.as_str(), toggle))
    }

    /// Number of observed toggle names.
    pub fn len(&self) -> usize {
        self.toggles.len()
    }

    /// Whether no observation has been recorded.
    pub fn is_empty(&self) -> bool {
        self.toggles.is_empty()
    }
}

struct Bucket {
    list: MetricList,
    started_at: DateTime<Utc>,
}

/// Thread-safe store aggregating evaluation counters into the current metrics bucket.
///
/// All counter updates are linearized behind one short critical section per store; safe to call
/// from arbitrary concurrent threads.
pub struct MetricsStore {
    bucket: Mutex<Bucket>,
    app_name: String,
    instance_id: String,
}

impl MetricsStore {
    /// Create a store with an empty bucket starting now.
    pub fn new(config: &ClientConfig) -> MetricsStore {
        MetricsStore {
            bucket: Mutex::new(Bucket {
                list: MetricList::new(),
                started_at: Utc::now(),
            }),
            app_name: config.app_name().to_owned(),
            instance_id: config.instance_id().to_owned(),
        }
    }

    /// Record an enabled/disabled observation for a toggle.
    pub fn add_enable_metric(&self, toggle_name: &str, is_yes: bool) {
        let mut bucket = self.lock_bucket();
        bucket.list.add_enable(toggle_name, is_yes);
    }

    /// Record an observation carrying a variant name for a toggle.
    pub fn add_variant_metric(&self, toggle_name: &str, is_yes: bool, variant_name: &str) {
        let mut bucket = self.lock_bucket();
        bucket.list.add_variant(toggle_name, is_yes, variant_name);
    }

    /// Whether the current bucket has zero observations.
    pub fn is_empty(&self) -> bool {
        self.lock_bucket().list.is_empty()
    }

    /// When the current bucket started.
    pub fn bucket_started_at(&self) -> DateTime<Utc> {
        self.lock_bucket().started_at
    }

    /// A point-in-time copy of the current counters, safe for concurrent export.
    pub fn snapshot(&self) -> MetricList {
        self.lock_bucket().list.clone()
    }

    /// Atomically replace the counters with an empty list and restart the bucket.
    pub fn reset(&self) {
        let mut bucket = self.lock_bucket();
        bucket.list = MetricList::new();
        bucket.started_at = Utc::now();
    }

    /// Encode the current bucket as a metrics request body, or `None` when there is nothing to
    /// report. Does not reset the store; the scheduler decides when to call [`reset`]
    /// [MetricsStore::reset].
    pub fn to_json_payload(&self) -> Option<String> {
        let (list, started_at, stopped_at) = {
            let bucket = self.lock_bucket();
            if bucket.list.is_empty() {
                return None;
            }
            (bucket.list.clone(), bucket.started_at, Utc::now())
        };

        Some(wire::encode_metrics(
            &list,
            &started_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            &stopped_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            &self.app_name,
            &self.instance_id,
        ))
    }

    fn lock_bucket(&self) -> std::sync::MutexGuard<'_, Bucket> {
        // Err() is possible only if the lock is poisoned (a writer panicked while holding it),
        // which should never happen: no callback runs under this lock.
        self.bucket
            .lock()
            .expect("thread holding metrics lock should not panic")
    }
}

/// Uploads a drained metrics payload to the service's metrics endpoint.
pub struct MetricsSender {
    transport: Box<dyn Transport>,
    request: TransportRequest,
    cancel: CancelToken,
}

impl MetricsSender {
    /// Create a sender using the production HTTP transport.
    pub fn new(config: &ClientConfig) -> MetricsSender {
        MetricsSender::with_transport(config, Box::new(HttpTransport::new()))
    }

    /// Create a sender on top of a custom transport.
    pub fn with_transport(config: &ClientConfig, transport: Box<dyn Transport>) -> MetricsSender {
        let mut headers = standard_headers(config);
        headers.insert("content-type", "application/json");

        let request = TransportRequest {
            url: format!("{}{}", config.url().trim_end_matches('/'), METRICS_ENDPOINT),
            method: Method::Post,
            headers,
            body: None,
            timeout: config.query_timeout(),
        };

        MetricsSender {
            transport,
            request,
            cancel: CancelToken::new(),
        }
    }

    /// A handle to the cancellation signal checked during transfers.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// POST one payload to the metrics endpoint.
    pub fn send(&self, payload: String) -> Result<()> {
        let mut request = self.request.clone();
        request.body = Some(payload);

        let response = self.transport.send(&request, &self.cancel)?;
        if (STATUS_OK_LOWER..STATUS_OK_UPPER).contains(&response.status) {
            log::debug!(target: "unleash", "successfully submitted metrics");
            Ok(())
        } else {
            Err(Error::Http {
                status: response.status,
                message: String::from_utf8_lossy(&response.body).trim().to_owned(),
            })
        }
    }
}
