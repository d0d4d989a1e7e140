//! Asynchronous delivery of client lifecycle notifications.
//!
//! A single background worker thread serves a bounded task queue. Emitting never blocks the
//! caller: the callback registered for the event kind at emit time is captured together with the
//! payload and queued as one task; the worker invokes tasks strictly in enqueue order, one at a
//! time. When the queue is full further emissions are dropped rather than blocking.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};

/// Maximum number of queued, not-yet-delivered tasks.
pub const MAX_PENDING_EVENTS: usize = 1024;

/// Payload of an error notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientError {
    /// Short human-readable description.
    pub message: String,
    /// Underlying error detail.
    pub details: String,
}

/// Callback invoked on client initialization.
pub type InitCallback = Arc<dyn Fn() + Send + Sync>;
/// Callback invoked when the client encounters an error.
pub type ErrorCallback = Arc<dyn Fn(&ClientError) + Send + Sync>;
/// Callback invoked once the first toggle set has been installed.
pub type ReadyCallback = Arc<dyn Fn() + Send + Sync>;
/// Callback invoked when a new toggle set has been installed.
pub type UpdateCallback = Arc<dyn Fn() + Send + Sync>;
/// Callback invoked when a toggle with impression data enabled is evaluated. Receives the flag
/// name and the evaluation outcome.
pub type ImpressionCallback = Arc<dyn Fn(&str, bool) + Send + Sync>;

/// A queued callback invocation with its payload captured by value.
type Task = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Callbacks {
    init: Option<InitCallback>,
    error: Option<ErrorCallback>,
    ready: Option<ReadyCallback>,
    update: Option<UpdateCallback>,
    impression: Option<ImpressionCallback>,
}

#[derive(Default)]
struct Shared {
    started: AtomicBool,
    queue: Mutex<VecDeque<Task>>,
    wake: Condvar,
}

/// Dispatches lifecycle notifications to host-registered callbacks from a dedicated worker
/// thread.
///
/// Each event kind has at most one registered callback; registering a new one replaces the
/// previous one, registering `None` clears it. Emissions while the handler is not started are
/// no-ops.
pub struct EventHandler {
    shared: Arc<Shared>,
    callbacks: RwLock<Callbacks>,
    worker: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl EventHandler {
    /// Create a handler with no registered callbacks. Call [`start`][EventHandler::start] before
    /// emitting.
    pub fn new() -> EventHandler {
        EventHandler {
            shared: Arc::new(Shared::default()),
            callbacks: RwLock::new(Callbacks::default()),
            worker: Mutex::new(None),
        }
    }

    /// Start the worker thread. Idempotent while already started.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the worker thread failed to spawn.
    pub fn start(&self) -> std::io::Result<()> {
        if self.shared.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let spawned = std::thread::Builder::new()
            .name("unleash-events".to_owned())
            .spawn(move || run_worker(&shared));
        match spawned {
            Ok(handle) => {
                *self.lock_worker() = Some(handle);
                Ok(())
            }
            Err(err) => {
                self.shared.started.store(false, Ordering::Release);
                Err(err)
            }
        }
    }

    /// Stop the worker thread, discarding undelivered tasks, and block until it has exited.
    /// Idempotent while already stopped.
    pub fn stop(&self) {
        if !self.shared.started.swap(false, Ordering::AcqRel) {
            return;
        }

        // Pending tasks are dropped, not drained.
        self.lock_queue().clear();
        self.shared.wake.notify_all();

        let handle = self.lock_worker().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                // Should not happen: callback panics are caught inside the worker.
                log::error!(target: "unleash", "event worker thread panicked");
            }
        }
    }

    /// Register the initialization callback. `None` clears it.
    pub fn on_init(&self, callback: Option<InitCallback>) {
        self.write_callbacks().init = callback;
    }

    /// Register the error callback. `None` clears it.
    pub fn on_error(&self, callback: Option<ErrorCallback>) {
        self.write_callbacks().error = callback;
    }

    /// Register the ready callback. `None` clears it.
    pub fn on_ready(&self, callback: Option<ReadyCallback>) {
        self.write_callbacks().ready = callback;
    }

    /// Register the update callback. `None` clears it.
    pub fn on_update(&self, callback: Option<UpdateCallback>) {
        self.write_callbacks().update = callback;
    }

    /// Register the impression callback. `None` clears it.
    pub fn on_impression(&self, callback: Option<ImpressionCallback>) {
        self.write_callbacks().impression = callback;
    }

    /// Unregister every callback. Already-queued tasks keep the callback they captured at emit
    /// time and still run; new emissions enqueue nothing until a callback is re-registered.
    pub fn clear_all(&self) {
        *self.write_callbacks() = Callbacks::default();
    }

    /// Queue an initialization notification.
    pub fn emit_init(&self) {
        if !self.is_started() {
            return;
        }
        let Some(callback) = self.read_callbacks().init.clone() else {
            return;
        };
        self.enqueue(Box::new(move || callback()));
    }

    /// Queue an error notification.
    pub fn emit_error(&self, error: ClientError) {
        if !self.is_started() {
            return;
        }
        let Some(callback) = self.read_callbacks().error.clone() else {
            return;
        };
        self.enqueue(Box::new(move || callback(&error)));
    }

    /// Queue a ready notification.
    pub fn emit_ready(&self) {
        if !self.is_started() {
            return;
        }
        let Some(callback) = self.read_callbacks().ready.clone() else {
            return;
        };
        self.enqueue(Box::new(move || callback()));
    }

    /// Queue an update notification.
    pub fn emit_update(&self) {
        if !self.is_started() {
            return;
        }
        let Some(callback) = self.read_callbacks().update.clone() else {
            return;
        };
        self.enqueue(Box::new(move || callback()));
    }

    /// Queue an impression notification.
    pub fn emit_impression(&self, flag_name: &str, enabled: bool) {
        if !self.is_started() {
            return;
        }
        let Some(callback) = self.read_callbacks().impression.clone() else {
            return;
        };
        let flag_name = flag_name.to_owned();
        self.enqueue(Box::new(move || callback(&flag_name, enabled)));
    }

    fn is_started(&self) -> bool {
        self.shared.started.load(Ordering::Acquire)
    }

    fn enqueue(&self, task: Task) {
        {
            let mut queue = self.lock_queue();
            if queue.len() >= MAX_PENDING_EVENTS {
                log::debug!(target: "unleash", "event queue is full, dropping event");
                return;
            }
            queue.push_back(task);
        }
        self.shared.wake.notify_one();
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<Task>> {
        // Callbacks run outside this lock, so a panicking callback cannot poison it.
        self.shared
            .queue
            .lock()
            .expect("thread holding event queue lock should not panic")
    }

    fn lock_worker(&self) -> std::sync::MutexGuard<'_, Option<std::thread::JoinHandle<()>>> {
        self.worker
            .lock()
            .expect("thread holding worker handle lock should not panic")
    }

    fn read_callbacks(&self) -> std::sync::RwLockReadGuard<'_, Callbacks> {
        self.callbacks
            .read()
            .expect("thread holding callbacks lock should not panic")
    }

    fn write_callbacks(&self) -> std::sync::RwLockWriteGuard<'_, Callbacks> {
        self.callbacks
            .write()
            .expect("thread holding callbacks lock should not panic")
    }
}

impl Default for EventHandler {
    fn default() -> EventHandler {
        EventHandler::new()
    }
}

impl Drop for EventHandler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(shared: &Shared) {
    loop {
        let task = {
            let mut queue = shared
                .queue
                .lock()
                .expect("thread holding event queue lock should not panic");
            loop {
                if let Some(task) = queue.pop_front() {
                    break task;
                }
                if !shared.started.load(Ordering::Acquire) {
                    return;
                }
                queue = shared
                    .wake
                    .wait(queue)
                    .expect("thread holding event queue lock should not panic");
            }
        };

        // A panicking callback must neither take the worker down nor lose queued tasks.
        if catch_unwind(AssertUnwindSafe(task)).is_err() {
            log::error!(target: "unleash", "event callback panicked");
        }
    }
}
