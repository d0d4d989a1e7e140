//! The client facade tying the runtime together: flag store, fetch poller, event dispatch and
//! metrics aggregation behind one handle.

use std::sync::{Arc, Mutex};

use crate::client_config::ClientConfig;
use crate::context::Context;
use crate::event_handler::{
    ErrorCallback, EventHandler, ImpressionCallback, InitCallback, ReadyCallback, UpdateCallback,
};
use crate::flag_store::FlagStore;
use crate::metrics::{MetricsSender, MetricsStore};
use crate::poller_thread::{PollerThread, PollerThreadConfig};
use crate::toggle_fetcher::ToggleFetcher;
use crate::toggles::{ToggleSet, Variant};
use crate::{Error, Result};

/// A client for a remote feature-flag service.
///
/// Application threads evaluate flags through [`is_enabled`][UnleashClient::is_enabled] and
/// [`get_variant`][UnleashClient::get_variant]; both are lock-free reads of the current toggle
/// snapshot and record usage metrics as a side effect. A background poller keeps the snapshot
/// fresh and a background dispatcher delivers lifecycle notifications, so neither ever blocks
/// the evaluation path.
///
/// # Examples
/// ```no_run
/// # use unleash_client::{ClientConfig, Context, UnleashClient};
/// # fn main() -> unleash_client::Result<()> {
/// let config = ClientConfig::new("https://unleash.example.com/api/frontend", "client-key", "my-app")
///     .with_refresh_interval(std::time::Duration::from_secs(15));
/// let client = UnleashClient::new(config)?;
/// client.start(Context::new("my-app", "production", ""))?;
/// client.wait_for_toggles()?;
/// if client.is_enabled("new-checkout") {
///     // ...
/// }
/// # Ok(())
/// # }
/// ```
pub struct UnleashClient {
    config: ClientConfig,
    store: Arc<FlagStore>,
    events: Arc<EventHandler>,
    metrics: Arc<MetricsStore>,
    metrics_sender: MetricsSender,
    poller: Mutex<Option<PollerThread>>,
}

impl UnleashClient {
    /// Create a new client using the specified configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] or [`Error::InvalidUrl`] if the configuration
    /// fails validation.
    pub fn new(config: ClientConfig) -> Result<UnleashClient> {
        let metrics_sender = MetricsSender::new(&config);
        UnleashClient::new_with_metrics_sender(config, metrics_sender)
    }

    fn new_with_metrics_sender(
        config: ClientConfig,
        metrics_sender: MetricsSender,
    ) -> Result<UnleashClient> {
        config.validate()?;
        Ok(UnleashClient {
            store: Arc::new(FlagStore::new()),
            events: Arc::new(EventHandler::new()),
            metrics: Arc::new(MetricsStore::new(&config)),
            metrics_sender,
            config,
            poller: Mutex::new(None),
        })
    }

    /// Start the background workers.
    ///
    /// Starts the event dispatcher and emits `init`, installs the bootstrap toggle set when one
    /// is configured, and, if refreshing is enabled, spawns the poller thread that fetches
    /// toggles for `context`.
    ///
    /// # Errors
    ///
    /// Returns an error if a background thread failed to spawn.
    pub fn start(&self, context: Context) -> Result<()> {
        self.start_with_fetcher(context, ToggleFetcher::new(&self.config))
    }

    /// Start the background workers with a custom fetcher, e.g. one built on a non-default
    /// transport. See [`start`][UnleashClient::start].
    pub fn start_with_fetcher(&self, context: Context, fetcher: ToggleFetcher) -> Result<()> {
        self.events.start()?;
        self.events.emit_init();

        if let Some(bootstrap) = self.config.bootstrap() {
            if self.config.bootstrap_override() || !self.store.is_ready() {
                let first_install = !self.store.is_ready();
                self.store.replace(Some(Arc::new(bootstrap.clone())));
                if first_install {
                    self.events.emit_ready();
                }
            }
        }

        if self.config.is_refresh_enabled() {
            let poller_config =
                PollerThreadConfig::new().with_interval(self.config.refresh_interval());
            let poller = PollerThread::start_with_config(
                fetcher,
                context,
                self.store.clone(),
                self.events.clone(),
                poller_config,
            )?;
            *self.lock_poller() = Some(poller);
        }

        Ok(())
    }

    /// Stop the background workers. Blocks until the poller and the event dispatcher have
    /// exited; queued-but-undelivered notifications are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PollerThreadPanicked`] if the poller thread panicked.
    pub fn stop(&self) -> Result<()> {
        let poller = self.lock_poller().take();
        if let Some(poller) = poller {
            poller.shutdown()?;
        }
        self.events.stop();
        Ok(())
    }

    /// Wait for the first toggle set to be installed.
    ///
    /// # Errors
    ///
    /// Returns an error if the poller gave up with an unrecoverable error, or if refreshing is
    /// disabled and no bootstrap toggles were installed.
    pub fn wait_for_toggles(&self) -> Result<()> {
        let poller = self.lock_poller();
        match &*poller {
            Some(poller) => poller.wait_for_toggles(),
            None if self.store.is_ready() => Ok(()),
            None => Err(Error::InvalidConfiguration(
                "toggle refreshing is not enabled and no bootstrap toggles were provided"
                    .to_owned(),
            )),
        }
    }

    /// Whether a toggle set has been installed.
    pub fn is_ready(&self) -> bool {
        self.store.is_ready()
    }

    /// The current toggle snapshot. The returned handle stays consistent even if the poller
    /// installs a new set concurrently.
    pub fn toggles(&self) -> Arc<ToggleSet> {
        self.store.snapshot()
    }

    /// Evaluate a flag. Missing flags are disabled.
    ///
    /// Records a usage metric and, when impression data is enabled for the flag (or globally via
    /// the configuration), emits an impression notification.
    pub fn is_enabled(&self, flag_name: &str) -> bool {
        let snapshot = self.store.snapshot();
        let enabled = snapshot.is_enabled(flag_name);

        self.metrics.add_enable_metric(flag_name, enabled);
        if self.config.impression_data_all() || snapshot.impression_data(flag_name) {
            self.events.emit_impression(flag_name, enabled);
        }

        enabled
    }

    /// Evaluate a flag's variant. Missing flags yield the disabled variant.
    ///
    /// Records a variant usage metric and, when impression data is enabled for the flag (or
    /// globally via the configuration), emits an impression notification.
    pub fn get_variant(&self, flag_name: &str) -> Variant {
        let snapshot = self.store.snapshot();
        let enabled = snapshot.is_enabled(flag_name);
        let variant = snapshot.variant(flag_name);

        self.metrics.add_variant_metric(flag_name, enabled, variant.name());
        if self.config.impression_data_all() || snapshot.impression_data(flag_name) {
            self.events.emit_impression(flag_name, enabled);
        }

        variant
    }

    /// Submit the accumulated metrics bucket to the service and start a new bucket.
    ///
    /// Returns `Ok(false)` without a network round trip when nothing was observed. The bucket is
    /// only reset after a successful submission, so counters survive transient send failures.
    ///
    /// # Errors
    ///
    /// Returns the transport or HTTP error of the failed submission.
    pub fn flush_metrics(&self) -> Result<bool> {
        let Some(payload) = self.metrics.to_json_payload() else {
            return Ok(false);
        };
        self.metrics_sender.send(payload)?;
        self.metrics.reset();
        Ok(true)
    }

    /// Register the initialization callback. `None` clears it.
    pub fn on_init(&self, callback: Option<InitCallback>) {
        self.events.on_init(callback);
    }

    /// Register the error callback. `None` clears it.
    pub fn on_error(&self, callback: Option<ErrorCallback>) {
        self.events.on_error(callback);
    }

    /// Register the ready callback. `None` clears it.
    pub fn on_ready(&self, callback: Option<ReadyCallback>) {
        self.events.on_ready(callback);
    }

    /// Register the update callback. `None` clears it.
    pub fn on_update(&self, callback: Option<UpdateCallback>) {
        self.events.on_update(callback);
    }

    /// Register the impression callback. `None` clears it.
    pub fn on_impression(&self, callback: Option<ImpressionCallback>) {
        self.events.on_impression(callback);
    }

    /// Unregister every callback.
    pub fn clear_callbacks(&self) {
        self.events.clear_all();
    }

    fn lock_poller(&self) -> std::sync::MutexGuard<'_, Option<PollerThread>> {
        self.poller
            .lock()
            .expect("thread holding poller lock should not panic")
    }
}
