//! Supervised worker threads
//!
//! A [`ThreadWorker`] runs one [`Worker`] body on its own OS thread. The body
//! calls [`WorkerContext::heartbeat`] at every safe point; that records
//! liveness for the supervisor and, once stop has been requested, returns
//! [`Error::Stopping`] so the loop unwinds through `?`.
//!
//! ```text
//! NotStarted -> Running -> Stopping -> Stopped
//!                       \-> Dead (body returned an error, or exited on its own)
//! ```
//!
//! Cancellation is cooperative. A thread blocked in a read or an HTTP call
//! notices the stop only when that call returns, so bodies keep their
//! blocking calls bounded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Shared, clonable stop flag
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The body of a worker thread
pub trait Worker: Send + 'static {
    /// Name used for the thread and in logs
    fn name(&self) -> &str;

    /// Run until done, failed, or stopped (via `ctx.heartbeat()?`).
    fn run(&mut self, ctx: &WorkerContext) -> Result<()>;
}

/// Handle passed to a running [`Worker`]
#[derive(Debug, Clone)]
pub struct WorkerContext {
    name: String,
    stop: StopToken,
    shared: Arc<Shared>,
}

impl WorkerContext {
    /// Record liveness; `Err(Error::Stopping)` once stop is requested.
    pub fn heartbeat(&self) -> Result<()> {
        self.shared.beat();
        if self.stop.is_stopped() {
            tracing::info!(worker = %self.name, "Stopping");
            return Err(Error::Stopping);
        }
        Ok(())
    }

    pub fn should_stop(&self) -> bool {
        self.stop.is_stopped()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sleep up to `duration`, returning early once stop is requested.
    ///
    /// Beats every slice, so an idle worker never looks starved.
    pub fn sleep(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.should_stop() {
            self.shared.beat();
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

/// Observable lifecycle state of a [`ThreadWorker`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    NotStarted,
    Running,
    /// Stop requested; thread not yet exited
    Stopping,
    /// Exited after a stop request
    Stopped,
    /// Exited with an error or without being asked to
    Dead,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Finished,
    Stopped,
    Failed(String),
}

#[derive(Debug, Default)]
struct Shared {
    last_heartbeat: Mutex<Option<Instant>>,
    outcome: Mutex<Option<Outcome>>,
}

impl Shared {
    fn beat(&self) {
        if let Ok(mut hb) = self.last_heartbeat.lock() {
            *hb = Some(Instant::now());
        }
    }

    fn last_heartbeat(&self) -> Option<Instant> {
        self.last_heartbeat.lock().ok().and_then(|hb| *hb)
    }

    fn outcome(&self) -> Option<Outcome> {
        self.outcome.lock().ok().and_then(|o| o.clone())
    }

    fn set_outcome(&self, outcome: Outcome) {
        if let Ok(mut o) = self.outcome.lock() {
            *o = Some(outcome);
        }
    }
}

/// A [`Worker`] plus the thread running it
pub struct ThreadWorker {
    name: String,
    body: Option<Box<dyn Worker>>,
    stop: StopToken,
    shared: Arc<Shared>,
    started: bool,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ThreadWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadWorker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl ThreadWorker {
    /// Wrap `body`; `stop` is typically shared by every worker in a group.
    pub fn new(body: impl Worker, stop: StopToken) -> Self {
        Self {
            name: body.name().to_string(),
            body: Some(Box::new(body)),
            stop,
            shared: Arc::new(Shared::default()),
            started: false,
            handle: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn the worker thread. Fails if already started.
    pub fn start(&mut self) -> Result<()> {
        let mut body = self
            .body
            .take()
            .ok_or_else(|| Error::Worker(format!("worker {} already started", self.name)))?;

        let ctx = WorkerContext {
            name: self.name.clone(),
            stop: self.stop.clone(),
            shared: Arc::clone(&self.shared),
        };

        let spawned = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                tracing::info!(worker = %ctx.name, "Worker started");
                let outcome = match body.run(&ctx) {
                    Ok(()) if ctx.should_stop() => Outcome::Stopped,
                    Ok(()) => {
                        tracing::warn!(worker = %ctx.name, "Worker exited");
                        Outcome::Finished
                    }
                    Err(e) if e.is_stopping() => {
                        tracing::info!(worker = %ctx.name, "Worker stopped");
                        Outcome::Stopped
                    }
                    Err(e) => {
                        tracing::error!(worker = %ctx.name, error = %e, "Worker failed");
                        Outcome::Failed(e.to_string())
                    }
                };
                ctx.shared.set_outcome(outcome);
            });

        match spawned {
            Ok(handle) => {
                self.started = true;
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => Err(Error::Worker(format!(
                "failed to spawn worker {}: {}",
                self.name, e
            ))),
        }
    }

    /// Request a stop; does not wait for the thread.
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_alive(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn last_heartbeat(&self) -> Option<Instant> {
        self.shared.last_heartbeat()
    }

    /// Error message of a worker that failed.
    pub fn failure(&self) -> Option<String> {
        match self.shared.outcome() {
            Some(Outcome::Failed(msg)) => Some(msg),
            _ => None,
        }
    }

    pub fn state(&self) -> WorkerState {
        if !self.is_started() {
            return WorkerState::NotStarted;
        }
        if self.is_alive() {
            return if self.stop.is_stopped() {
                WorkerState::Stopping
            } else {
                WorkerState::Running
            };
        }
        match self.shared.outcome() {
            Some(Outcome::Stopped) => WorkerState::Stopped,
            _ => WorkerState::Dead,
        }
    }

    /// Wait up to `timeout` for the thread to exit; true once it has.
    pub fn join(&mut self, timeout: Duration) -> bool {
        let Some(handle) = self.handle.as_ref() else {
            return true;
        };

        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!(worker = %self.name, "Worker thread panicked");
                self.shared
                    .set_outcome(Outcome::Failed("thread panicked".to_string()));
            }
        }
        true
    }
}

/// A set of workers supervised together
#[derive(Debug, Default)]
pub struct ThreadWorkerGroup {
    workers: Vec<ThreadWorker>,
}

impl ThreadWorkerGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, worker: ThreadWorker) {
        self.workers.push(worker);
    }

    pub fn workers(&self) -> &[ThreadWorker] {
        &self.workers
    }

    /// Start workers in insertion order.
    pub fn start_all(&mut self) -> Result<()> {
        for w in &mut self.workers {
            w.start()?;
        }
        Ok(())
    }

    /// Request every worker to stop, last added first.
    pub fn stop_all(&self) {
        for w in self.workers.iter().rev() {
            w.stop();
        }
    }

    /// Join workers in reverse order, sharing one overall `timeout`.
    ///
    /// Returns the names of workers still running when time ran out.
    pub fn join_all(&mut self, timeout: Duration) -> Vec<String> {
        let deadline = Instant::now() + timeout;
        let mut stuck = Vec::new();
        for w in self.workers.iter_mut().rev() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !w.join(remaining) {
                tracing::warn!(worker = %w.name(), "Worker did not exit in time");
                stuck.push(w.name().to_string());
            }
        }
        stuck
    }

    /// Workers that were started and are no longer alive.
    pub fn get_dead(&self) -> Vec<&ThreadWorker> {
        self.workers
            .iter()
            .filter(|w| w.is_started() && !w.is_alive())
            .collect()
    }

    /// Heartbeat age of every started worker.
    ///
    /// A started worker that has not beaten yet reports zero.
    pub fn check_heartbeats(&self) -> Vec<(String, Duration)> {
        let now = Instant::now();
        self.workers
            .iter()
            .filter(|w| w.is_started())
            .map(|w| {
                let age = w
                    .last_heartbeat()
                    .map(|hb| now.saturating_duration_since(hb))
                    .unwrap_or(Duration::ZERO);
                (w.name().to_string(), age)
            })
            .collect()
    }
}
