//! `unleash-client` is an embeddable client runtime for a remote feature-flag evaluation
//! service. It periodically pulls evaluated toggles over HTTP, exposes them for lock-free
//! concurrent evaluation by arbitrary application threads, accumulates per-flag usage counters,
//! and delivers lifecycle notifications to host-registered callbacks without blocking the thread
//! that triggered them.
//!
//! # Overview
//!
//! The crate is organized as a set of building blocks plus a facade tying them together.
//!
//! [`ToggleSet`] is an immutable mapping from flag name to evaluated [`Toggle`]. Lookups of
//! missing names return safe defaults (`false`, the disabled [`Variant`]) rather than errors.
//!
//! [`FlagStore`](flag_store::FlagStore) is a thread-safe in-memory manager for the currently
//! active `ToggleSet`. Whenever the set changes it is replaced completely. When a reader gets a
//! set, it receives a *snapshot* that is not affected by further writes — to provide a
//! consistent response to the user, a reader uses the same snapshot throughout the operation.
//!
//! [`ToggleFetcher`](toggle_fetcher::ToggleFetcher) is an HTTP client that knows how to fetch a
//! `ToggleSet` from the server. It carries the last-seen `etag` across calls, so an unchanged
//! upstream answers with 304 and no body. It's best to save and reuse the same instance, so it
//! can reuse the connection.
//!
//! [`PollerThread`](poller_thread::PollerThread) launches a background thread that periodically
//! fetches new toggles (using `ToggleFetcher`) and installs them in the `FlagStore`. This is the
//! simplest way to keep the client up-to-date.
//!
//! [`EventHandler`](event_handler::EventHandler) delivers `init`/`ready`/`update`/`error`/
//! `impression` notifications to host callbacks from a dedicated worker thread; emitting never
//! blocks the caller.
//!
//! [`MetricsStore`](metrics::MetricsStore) aggregates per-flag evaluation counters from
//! arbitrary threads and encodes them as the metrics wire payload;
//! [`MetricsSender`](metrics::MetricsSender) submits the drained bucket upstream.
//!
//! [`UnleashClient`] combines all of the above: start it once, then evaluate flags with
//! [`UnleashClient::is_enabled`] and [`UnleashClient::get_variant`] from any thread.

#![warn(rustdoc::missing_crate_level_docs)]

pub mod client;
pub mod client_config;
pub mod context;
pub mod event_handler;
pub mod flag_store;
pub mod headers;
pub mod metrics;
pub mod poller_thread;
pub mod toggle_fetcher;
pub mod toggles;
pub mod transport;
pub mod wire;

mod error;

pub use client::UnleashClient;
pub use client_config::ClientConfig;
pub use context::Context;
pub use error::{Error, Result};
pub use event_handler::{ClientError, EventHandler};
pub use flag_store::FlagStore;
pub use headers::Headers;
pub use toggle_fetcher::{FetchResult, ToggleFetcher};
pub use toggles::{Toggle, ToggleSet, Variant, VariantPayload};
pub use transport::CancelToken;
