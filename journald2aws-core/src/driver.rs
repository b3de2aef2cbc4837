//! Top-level orchestration
//!
//! The driver owns the pidfile, the cursor, the queue and both workers:
//!
//! ```text
//! journalctl --follow -> [tailer] -> bounded queue -> [poster] -> CloudWatch Logs
//!                                                         \-> cursor file
//! ```
//!
//! [`JournalctlToAwsDriver::run`] supervises the workers once a second and
//! shuts everything down on the first dead worker, starved heartbeat,
//! runtime limit or external stop.

use std::fmt;
use std::sync::mpsc::sync_channel;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::aws::AwsLogMessageBuilder;
use crate::config::Config;
use crate::cursor::{EnsureLocked, JournalctlToAwsCursor};
use crate::error::{Error, Result};
use crate::journal::{JournalctlTailerWorker, TailerOptions};
use crate::pidfile::Pidfile;
use crate::poster::{JournalctlToAwsPosterWorker, PosterOptions};
use crate::worker::{StopToken, ThreadWorker, ThreadWorkerGroup};

const SUPERVISOR_TICK: Duration = Duration::from_secs(1);

/// Why [`JournalctlToAwsDriver::run`] returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// One or more workers exited on their own
    WorkerDied(Vec<String>),
    /// A worker went longer than the heartbeat limit without beating
    HeartbeatStarved { worker: String, age: Duration },
    RuntimeLimit,
    /// The stop handle was triggered
    Stopped,
}

impl ExitReason {
    /// Process exit status for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            ExitReason::Stopped | ExitReason::RuntimeLimit => 0,
            ExitReason::WorkerDied(_) | ExitReason::HeartbeatStarved { .. } => 1,
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::WorkerDied(names) => write!(f, "worker died: {}", names.join(", ")),
            ExitReason::HeartbeatStarved { worker, age } => {
                write!(f, "worker {} heartbeat starved ({:.1}s)", worker, age.as_secs_f64())
            }
            ExitReason::RuntimeLimit => write!(f, "runtime limit reached"),
            ExitReason::Stopped => write!(f, "stopped"),
        }
    }
}

/// Wires config into a running tailer/poster pipeline.
pub struct JournalctlToAwsDriver {
    pidfile: Option<Arc<Pidfile>>,
    cursor: JournalctlToAwsCursor,
    group: ThreadWorkerGroup,
    stop: StopToken,
    heartbeat_age_limit: Duration,
    runtime_limit: Option<Duration>,
    join_timeout: Duration,
}

impl fmt::Debug for JournalctlToAwsDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JournalctlToAwsDriver")
            .field("pidfile", &self.pidfile.as_ref().map(|p| p.path().to_path_buf()))
            .field("cursor", &self.cursor)
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

impl JournalctlToAwsDriver {
    /// Lock the pidfile and build every component; nothing is started yet.
    ///
    /// Fails with [`Error::LockContention`] before anything else happens if
    /// another instance holds the pidfile.
    pub fn new(config: Config) -> Result<Self> {
        let pidfile = match &config.pid_file {
            Some(path) => {
                tracing::info!(path = %path.display(), "Opening pidfile");
                let mut pf = Pidfile::acquire(path)?;
                pf.write(None)?;
                Some(Arc::new(pf))
            }
            None => None,
        };

        config.validate()?;

        let ensure_locked: EnsureLocked = match &pidfile {
            Some(pf) => {
                let pf = Arc::clone(pf);
                Arc::new(move || pf.ensure_locked())
            }
            None => Arc::new(|| Ok(())),
        };
        let cursor = JournalctlToAwsCursor::new(config.cursor_file.clone(), ensure_locked);

        let mut tailer_opts = TailerOptions {
            shell_wrap: config.journalctl_shell_wrap,
            read_size: config.journalctl_read_size,
            sleep: config.journalctl_sleep()?,
            ..Default::default()
        };
        if let Some(cmd) = &config.journalctl_cmd {
            tailer_opts.cmd = cmd.clone();
        }

        if let Some(since) = &config.journalctl_since {
            tracing::info!(since = %since, "Starting since");
            tailer_opts.since = Some(since.clone());
        } else {
            let after_cursor = match &config.journalctl_after_cursor {
                Some(c) => Some(c.clone()),
                None => cursor.get()?,
            };
            if let Some(c) = &after_cursor {
                tracing::info!(cursor = %c, "Starting from cursor");
            }
            tailer_opts.after_cursor = after_cursor;
        }

        let log_stream_name = config
            .aws_log_stream_name
            .as_deref()
            .ok_or_else(|| Error::Config("aws_log_stream_name is required".to_string()))?;
        let mut builder = AwsLogMessageBuilder::new(
            &config.aws_log_group_name,
            log_stream_name,
            &config.aws_region_name,
            config.credentials(),
        )?;
        if let Some(url) = &config.aws_url {
            builder = builder.with_url(url.as_str());
        }

        let (tx, rx) = sync_channel(config.queue_size);

        let stop = StopToken::new();
        let tailer = JournalctlTailerWorker::new(tx, tailer_opts);
        let poster = JournalctlToAwsPosterWorker::new(
            rx,
            builder,
            cursor.clone(),
            PosterOptions {
                dry_run: config.aws_dry_run,
                request_timeout: config.request_timeout(),
                ..Default::default()
            },
        )?;

        let mut group = ThreadWorkerGroup::new();
        group.add(ThreadWorker::new(tailer, stop.clone()));
        group.add(ThreadWorker::new(poster, stop.clone()));

        Ok(Self {
            pidfile,
            cursor,
            group,
            stop,
            heartbeat_age_limit: config.heartbeat_age_limit()?,
            runtime_limit: config.runtime_limit()?,
            join_timeout: config.join_timeout()?,
        })
    }

    /// Token that makes [`Self::run`] shut down at its next tick.
    pub fn stop_handle(&self) -> StopToken {
        self.stop.clone()
    }

    pub fn cursor(&self) -> &JournalctlToAwsCursor {
        &self.cursor
    }

    /// Run until a worker dies or starves, the runtime limit passes, or stop
    /// is requested; then stop and join every worker.
    pub fn run(&mut self) -> Result<ExitReason> {
        if let Some(pf) = &self.pidfile {
            pf.ensure_locked()?;
        }

        let started = Instant::now();
        if let Err(e) = self.group.start_all() {
            self.shutdown();
            return Err(e);
        }

        let reason = loop {
            if let Some(reason) = self.check(started) {
                break reason;
            }
            thread::sleep(SUPERVISOR_TICK);
        };

        tracing::info!(reason = %reason, "Shutting down");
        self.shutdown();
        Ok(reason)
    }

    fn check(&self, started: Instant) -> Option<ExitReason> {
        // Workers exit on their own once stopped; that is not a death.
        if self.stop.is_stopped() {
            return Some(ExitReason::Stopped);
        }

        let dead: Vec<String> = self
            .group
            .get_dead()
            .iter()
            .map(|w| w.name().to_string())
            .collect();
        if !dead.is_empty() {
            for w in self.group.get_dead() {
                tracing::error!(
                    worker = %w.name(),
                    failure = w.failure().as_deref().unwrap_or("exited"),
                    "Worker died"
                );
            }
            return Some(ExitReason::WorkerDied(dead));
        }

        if let Some((worker, age)) = self
            .group
            .check_heartbeats()
            .into_iter()
            .find(|(_, age)| *age > self.heartbeat_age_limit)
        {
            tracing::error!(
                worker = %worker,
                age_secs = age.as_secs_f64(),
                "Worker heartbeat age limit exceeded"
            );
            return Some(ExitReason::HeartbeatStarved { worker, age });
        }

        if let Some(limit) = self.runtime_limit {
            if started.elapsed() >= limit {
                tracing::info!(limit_secs = limit.as_secs_f64(), "Runtime limit reached");
                return Some(ExitReason::RuntimeLimit);
            }
        }

        None
    }

    fn shutdown(&mut self) {
        self.group.stop_all();
        let stuck = self.group.join_all(self.join_timeout);
        if !stuck.is_empty() {
            tracing::warn!(workers = ?stuck, "Workers still running after join timeout");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> Config {
        Config {
            pid_file: Some(dir.path().join("j2a.pid")),
            cursor_file: Some(dir.path().join("cursor")),
            aws_log_stream_name: Some("test".to_string()),
            aws_dry_run: true,
            journalctl_cmd: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                "exec sleep 60".to_string(),
            ]),
            journalctl_sleep_secs: 0.05,
            join_timeout_secs: 5.,
            ..Default::default()
        }
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExitReason::Stopped.exit_code(), 0);
        assert_eq!(ExitReason::RuntimeLimit.exit_code(), 0);
        assert_eq!(ExitReason::WorkerDied(vec!["x".to_string()]).exit_code(), 1);
        assert_eq!(
            ExitReason::HeartbeatStarved {
                worker: "x".to_string(),
                age: Duration::from_secs(61)
            }
            .exit_code(),
            1
        );
    }

    #[test]
    fn test_second_driver_fails_on_pidfile() {
        let dir = TempDir::new().unwrap();
        let _first = JournalctlToAwsDriver::new(config(&dir)).unwrap();

        let err = JournalctlToAwsDriver::new(config(&dir)).unwrap_err();
        assert!(matches!(err, Error::LockContention(_)));
    }

    #[test]
    fn test_starts_from_stored_cursor() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("cursor"), "s=abc;i=7\n").unwrap();

        let driver = JournalctlToAwsDriver::new(config(&dir)).unwrap();
        assert_eq!(driver.cursor().get().unwrap().as_deref(), Some("s=abc;i=7"));
    }

    #[test]
    fn test_runtime_limit_stops_cleanly() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.runtime_limit = Some(0.5);

        let mut driver = JournalctlToAwsDriver::new(cfg).unwrap();
        let started = Instant::now();
        assert_eq!(driver.run().unwrap(), ExitReason::RuntimeLimit);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(driver.group.workers().iter().all(|w| !w.is_alive()));
    }

    #[test]
    fn test_dead_tailer_is_reported() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.journalctl_cmd = Some(vec!["sh".to_string(), "-c".to_string(), "exit 3".to_string()]);

        let mut driver = JournalctlToAwsDriver::new(cfg).unwrap();
        match driver.run().unwrap() {
            ExitReason::WorkerDied(names) => {
                assert!(names.contains(&JournalctlTailerWorker::NAME.to_string()))
            }
            other => panic!("unexpected exit reason: {:?}", other),
        }
    }

    /// Beats once, then parks without beating until stopped.
    struct Stalled;

    impl crate::worker::Worker for Stalled {
        fn name(&self) -> &str {
            "stalled"
        }

        fn run(&mut self, ctx: &crate::worker::WorkerContext) -> Result<()> {
            ctx.heartbeat()?;
            while !ctx.should_stop() {
                thread::sleep(Duration::from_millis(10));
            }
            Ok(())
        }
    }

    #[test]
    fn test_starved_worker_shuts_down_pipeline() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.heartbeat_age_limit = 2.;
        cfg.aws_request_timeout_secs = 1;
        cfg.runtime_limit = Some(30.);

        let mut driver = JournalctlToAwsDriver::new(cfg).unwrap();
        let stalled = ThreadWorker::new(Stalled, driver.stop.clone());
        driver.group.add(stalled);

        let started = Instant::now();
        match driver.run().unwrap() {
            ExitReason::HeartbeatStarved { worker, age } => {
                assert_eq!(worker, "stalled");
                assert!(age > Duration::from_secs(2));
            }
            other => panic!("unexpected exit reason: {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(15));
        assert_eq!(driver.group.workers().len(), 3);
        assert!(driver.group.workers().iter().all(|w| !w.is_alive()));
    }

    #[test]
    fn test_idle_tailer_is_not_starved() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.journalctl_sleep_secs = 5.;
        cfg.heartbeat_age_limit = 2.;
        cfg.aws_request_timeout_secs = 1;
        cfg.runtime_limit = Some(3.5);

        let mut driver = JournalctlToAwsDriver::new(cfg).unwrap();
        assert_eq!(driver.run().unwrap(), ExitReason::RuntimeLimit);
        assert!(driver.group.workers().iter().all(|w| !w.is_alive()));
    }

    #[test]
    fn test_stop_handle() {
        let dir = TempDir::new().unwrap();
        let mut driver = JournalctlToAwsDriver::new(config(&dir)).unwrap();
        driver.stop_handle().stop();
        assert_eq!(driver.run().unwrap(), ExitReason::Stopped);
    }
}
