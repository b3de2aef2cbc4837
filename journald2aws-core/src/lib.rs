//! # journald2aws-core
//!
//! Core library for journald2aws - ships the systemd journal to AWS
//! CloudWatch Logs.
//!
//! This library provides:
//! - A streaming delimiter buffer and journald JSON-line parsing
//! - AWS Signature V4 signing and `PutLogEvents` request construction
//! - Supervised worker threads with heartbeats
//! - The tailer/poster pipeline and the driver that runs it
//! - Configuration, logging, pidfile and cursor-file support
//!
//! ## Architecture
//!
//! Three threads cooperate:
//! - **Tailer:** reads `journalctl --follow` and queues parsed messages
//! - **Poster:** signs and sends batches, then advances the cursor file
//! - **Supervisor:** polls liveness and heartbeats, and shuts down on failure
//!
//! ## Example
//!
//! ```rust,no_run
//! use journald2aws_core::{Config, JournalctlToAwsDriver};
//!
//! let config = Config::load(None).expect("failed to load config").with_env_credentials();
//! let mut driver = JournalctlToAwsDriver::new(config).expect("failed to start");
//! let reason = driver.run().expect("driver failed");
//! std::process::exit(reason.exit_code());
//! ```

#[cfg(not(unix))]
compile_error!("journald2aws only supports unix platforms");

// Re-export commonly used items at the crate root
pub use buffer::{Chunk, DelimitingBuffer};
pub use config::Config;
pub use cursor::JournalctlToAwsCursor;
pub use driver::{ExitReason, JournalctlToAwsDriver};
pub use error::{Error, Result};
pub use journal::{JournalctlMessage, JournalctlMessageBuilder, JournalctlTailerWorker};
pub use pidfile::Pidfile;
pub use poster::{JournalctlToAwsPosterWorker, PostStats};
pub use worker::{StopToken, ThreadWorker, ThreadWorkerGroup, Worker, WorkerContext, WorkerState};

// Public modules
pub mod aws;
pub mod buffer;
pub mod config;
pub mod cursor;
pub mod driver;
pub mod error;
pub mod journal;
pub mod logging;
pub mod pidfile;
pub mod poster;
pub mod worker;
