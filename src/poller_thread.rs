//! A background poller thread that periodically fetches toggles from the server, installs them in
//! a [`FlagStore`] and notifies the host through an [`EventHandler`].

use std::{
    sync::{mpsc::RecvTimeoutError, Arc, Condvar, Mutex},
    time::Duration,
};

use rand::{thread_rng, Rng};

use crate::context::Context;
use crate::event_handler::{ClientError, EventHandler};
use crate::flag_store::FlagStore;
use crate::toggle_fetcher::ToggleFetcher;
use crate::{Error, Result};

/// Configuration for [`PollerThread`].
// Not implementing `Copy` as we may add non-copyable fields in the future.
#[derive(Debug, Clone)]
pub struct PollerThreadConfig {
    /// Interval to wait between requests for toggles.
    ///
    /// Defaults to [`PollerThreadConfig::DEFAULT_POLL_INTERVAL`].
    pub interval: Duration,
    /// Jitter applies a randomized duration to wait between requests. This helps to avoid
    /// multiple client instances synchronizing and producing spiky network load.
    ///
    /// Defaults to [`PollerThreadConfig::DEFAULT_POLL_JITTER`].
    pub jitter: Duration,
}

impl PollerThreadConfig {
    /// Default value for [`PollerThreadConfig::interval`].
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);
    /// Default value for [`PollerThreadConfig::jitter`].
    pub const DEFAULT_POLL_JITTER: Duration = Duration::from_secs(3);

    /// Create a new `PollerThreadConfig` using default configuration.
    pub fn new() -> PollerThreadConfig {
        PollerThreadConfig::default()
    }

    /// Update poll interval with `interval`.
    pub fn with_interval(mut self, interval: Duration) -> PollerThreadConfig {
        self.interval = interval;
        self
    }

    /// Update poll interval jitter with `jitter`.
    pub fn with_jitter(mut self, jitter: Duration) -> PollerThreadConfig {
        self.jitter = jitter;
        self
    }
}

impl Default for PollerThreadConfig {
    fn default() -> PollerThreadConfig {
        PollerThreadConfig {
            interval: PollerThreadConfig::DEFAULT_POLL_INTERVAL,
            jitter: PollerThreadConfig::DEFAULT_POLL_JITTER,
        }
    }
}

/// A toggle poller thread.
///
/// The poller periodically fetches the latest toggles using [`ToggleFetcher`], installs them in
/// the [`FlagStore`], and emits `ready`/`update`/`error` notifications through the
/// [`EventHandler`]. Retry policy is simply "try again next round"; the fetcher itself never
/// retries.
pub struct PollerThread {
    join_handle: std::thread::JoinHandle<()>,

    /// Used to send a stop command to the poller thread.
    stop_sender: std::sync::mpsc::SyncSender<()>,

    /// Holds `None` if toggles haven't been fetched yet. Holds `Some(Ok(()))` after the first
    /// successful installation. Holds `Some(Err(...))` if fetching failed with an unrecoverable
    /// error.
    result: Arc<(Mutex<Option<Result<()>>>, Condvar)>,
}

impl PollerThread {
    /// Start the poller thread with the default poll configuration.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the poller thread failed to start.
    pub fn start(
        fetcher: ToggleFetcher,
        context: Context,
        store: Arc<FlagStore>,
        events: Arc<EventHandler>,
    ) -> std::io::Result<PollerThread> {
        PollerThread::start_with_config(fetcher, context, store, events, PollerThreadConfig::default())
    }

    /// Start the poller thread with the provided poll configuration.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the poller thread failed to start.
    pub fn start_with_config(
        mut fetcher: ToggleFetcher,
        context: Context,
        store: Arc<FlagStore>,
        events: Arc<EventHandler>,
        config: PollerThreadConfig,
    ) -> std::io::Result<PollerThread> {
        // Using `sync_channel` here as it makes `stop_sender` `Sync` (shareable between
        // threads). Buffer size of 1 is enough: we can `try_send()` the stop command and ignore a
        // full buffer (another thread has sent a stop command already).
        let (stop_sender, stop_receiver) = std::sync::mpsc::sync_channel::<()>(1);

        let result = Arc::new((Mutex::new(None), Condvar::new()));

        let join_handle = {
            // Cloning Arc for move into thread
            let result = Arc::clone(&result);
            let update_result = move |value: Result<()>| {
                *result.0.lock().unwrap() = Some(value);
                result.1.notify_all();
            };

            std::thread::Builder::new()
                .name("unleash-poller".to_owned())
                .spawn(move || {
                    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        loop {
                            log::debug!(target: "unleash", "fetching new toggles");
                            let fetched = fetcher.fetch(&context);

                            if let Some(toggles) = fetched.toggles {
                                let first_install = !store.is_ready();
                                store.replace(Some(Arc::new(toggles)));
                                if first_install {
                                    events.emit_ready();
                                }
                                events.emit_update();
                                update_result(Ok(()));
                            } else if let Some(err) = fetched.error {
                                events.emit_error(ClientError {
                                    message: "failed to fetch toggles".to_owned(),
                                    details: err.to_string(),
                                });
                                if matches!(err, Error::Unauthorized) {
                                    // Unrecoverable: the key won't become valid by retrying.
                                    update_result(Err(err));
                                    return;
                                }
                                // Other errors are retriable on the next round.
                            } else {
                                // Not modified, or a response with nothing to install.
                            }

                            let timeout = jitter(config.interval, config.jitter);
                            match stop_receiver.recv_timeout(timeout) {
                                Err(RecvTimeoutError::Timeout) => {
                                    // Timed out. Loop back to fetch new toggles.
                                }
                                Ok(()) => {
                                    log::debug!(target: "unleash", "poller thread received stop command");
                                    return;
                                }
                                Err(RecvTimeoutError::Disconnected) => {
                                    // When the other end of channel disconnects, calls to
                                    // .recv_timeout() return immediately. Stop the thread.
                                    log::debug!(target: "unleash", "poller thread received disconnected");
                                    return;
                                }
                            }
                        }
                    }));

                    // If catch_unwind returns Err, it means a panic occurred.
                    if outcome.is_err() {
                        update_result(Err(Error::PollerThreadPanicked));
                    }
                })?
        };

        Ok(PollerThread {
            join_handle,
            stop_sender,
            result,
        })
    }

    /// Wait for the first toggle set to be fetched and installed.
    ///
    /// Blocks until the poller has installed toggles at least once, returning `Ok(())`, or until
    /// it gave up with an unrecoverable error.
    ///
    /// # Errors
    ///
    /// - [`Error::Unauthorized`] if the server rejected the client key.
    /// - [`Error::PollerThreadPanicked`] if the poller thread panicked.
    pub fn wait_for_toggles(&self) -> Result<()> {
        let mut lock = self
            .result
            .0
            .lock()
            .map_err(|_| Error::PollerThreadPanicked)?;
        loop {
            match &*lock {
                Some(result) => {
                    // The poller has already installed toggles (or failed). Return the outcome.
                    return result.clone();
                }
                None => {
                    // Block waiting for toggles to get fetched.
                    lock = self
                        .result
                        .1
                        .wait(lock)
                        .map_err(|_| Error::PollerThreadPanicked)?;
                }
            }
        }
    }

    /// Stop the poller thread.
    ///
    /// This function does not wait for the thread to actually stop.
    pub fn stop(&self) {
        // Error means that the receiver was dropped (thread exited) or the channel buffer is
        // full (another thread has already sent a stop command). Nothing to do in either case.
        let _ = self.stop_sender.try_send(());
    }

    /// Stop the poller thread and block waiting for it to exit.
    ///
    /// If you don't need to wait for the thread to exit, use [`PollerThread::stop`] instead.
    ///
    /// # Errors
    ///
    /// - [`Error::PollerThreadPanicked`] if the thread has panicked.
    pub fn shutdown(self) -> Result<()> {
        // Send stop signal in case it wasn't sent before.
        self.stop();

        // Error means that the thread has panicked and there's nothing useful we can do in that
        // case.
        self.join_handle
            .join()
            .map_err(|_| Error::PollerThreadPanicked)?;

        Ok(())
    }
}

/// Apply randomized `jitter` to `interval`.
fn jitter(interval: Duration, jitter: Duration) -> Duration {
    Duration::saturating_sub(interval, thread_rng().gen_range(Duration::ZERO..=jitter))
}
