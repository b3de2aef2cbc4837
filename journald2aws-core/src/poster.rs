//! Queue consumer that ships journal batches to CloudWatch Logs
//!
//! For every batch taken off the queue the poster:
//! - renders each message as sorted-key JSON with a millisecond timestamp
//! - builds the `PutLogEvents` post(s) and sends them (unless dry-running)
//! - advances the cursor to the last cursor seen in the batch
//!
//! The cursor moves after the post attempt, so a crash mid-post replays the
//! batch on restart rather than losing it.

use std::collections::BTreeMap;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use chrono::Utc;

use crate::aws::{AwsLogMessageBuilder, LogMessage, LogsClient, Post, PutLogEventsResponse};
use crate::cursor::JournalctlToAwsCursor;
use crate::error::{Error, Result};
use crate::journal::{JournalctlMessage, MessageBatch};
use crate::worker::{Worker, WorkerContext};

/// How long the poster waits on an empty queue before beating again
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// Poster settings
#[derive(Debug, Clone)]
pub struct PosterOptions {
    /// Build posts but never send them
    pub dry_run: bool,
    pub request_timeout: Duration,
    /// Longest wait on an empty queue before beating again
    pub recv_timeout: Duration,
}

impl Default for PosterOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            request_timeout: Duration::from_secs(30),
            recv_timeout: DEFAULT_RECV_TIMEOUT,
        }
    }
}

/// Posting statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PostStats {
    /// Batches taken off the queue
    pub batches: usize,
    /// Messages in those batches
    pub events: usize,
    /// HTTP posts sent (or logged, in a dry run)
    pub posts: usize,
    /// Responses that reported rejected events
    pub rejected_responses: usize,
}

/// Dequeues message batches and posts them.
pub struct JournalctlToAwsPosterWorker {
    input: Receiver<MessageBatch>,
    builder: AwsLogMessageBuilder,
    cursor: JournalctlToAwsCursor,
    opts: PosterOptions,
    client: LogsClient,
    runtime: tokio::runtime::Runtime,
    sequence_token: Option<String>,
    stats: PostStats,
}

impl JournalctlToAwsPosterWorker {
    pub const NAME: &'static str = "journalctl-to-aws-poster";

    pub fn new(
        input: Receiver<MessageBatch>,
        builder: AwsLogMessageBuilder,
        cursor: JournalctlToAwsCursor,
        opts: PosterOptions,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Worker(format!("failed to create runtime: {}", e)))?;
        let client = LogsClient::new(opts.request_timeout)?;

        Ok(Self {
            input,
            builder,
            cursor,
            opts,
            client,
            runtime,
            sequence_token: None,
            stats: PostStats::default(),
        })
    }

    pub fn stats(&self) -> &PostStats {
        &self.stats
    }

    /// Post one batch and advance the cursor.
    pub fn process_batch(&mut self, batch: &[JournalctlMessage]) -> Result<()> {
        self.stats.batches += 1;
        self.stats.events += batch.len();

        let cur_cursor = batch.iter().rev().find_map(|m| m.cursor.clone());

        let now_ms = Utc::now().timestamp_millis();
        let messages = batch
            .iter()
            .map(|m| {
                Ok(LogMessage {
                    message: render_message(m)?,
                    ts_ms: m.ts_ms().unwrap_or(now_ms),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let posts = self
            .builder
            .feed_with_token(&messages, self.sequence_token.as_deref())?;

        for post in &posts {
            self.stats.posts += 1;
            if self.opts.dry_run {
                tracing::info!(
                    url = %post.url,
                    body = %String::from_utf8_lossy(&post.body),
                    "Dry run post"
                );
                continue;
            }

            let response = self.send(post)?;
            self.handle_response(response);
        }

        if let Some(c) = cur_cursor {
            self.cursor.set(&c)?;
        }

        Ok(())
    }

    fn send(&self, post: &Post) -> Result<PutLogEventsResponse> {
        tracing::debug!(url = %post.url, bytes = post.body.len(), "Posting log events");
        self.runtime.block_on(self.client.send(post))
    }

    fn handle_response(&mut self, response: PutLogEventsResponse) {
        if let Some(rejected) = response.rejected_log_events_info {
            self.stats.rejected_responses += 1;
            tracing::warn!(
                too_new_start = ?rejected.too_new_log_event_start_index,
                too_old_end = ?rejected.too_old_log_event_end_index,
                expired_end = ?rejected.expired_log_event_end_index,
                "CloudWatch rejected log events"
            );
        }
        if let Some(token) = response.next_sequence_token {
            self.sequence_token = Some(token);
        }
    }

    fn run_loop(&mut self, ctx: &WorkerContext) -> Result<()> {
        loop {
            ctx.heartbeat()?;

            let batch = match self.input.recv_timeout(self.opts.recv_timeout) {
                Ok(batch) => batch,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::info!("Message queue closed");
                    return Ok(());
                }
            };

            self.process_batch(&batch)?;
        }
    }
}

impl Worker for JournalctlToAwsPosterWorker {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn run(&mut self, ctx: &WorkerContext) -> Result<()> {
        let result = self.run_loop(ctx);
        tracing::info!(
            batches = self.stats.batches,
            events = self.stats.events,
            posts = self.stats.posts,
            rejected_responses = self.stats.rejected_responses,
            "Poster stats"
        );
        result
    }
}

/// The event text for one message: its fields as JSON with sorted keys, or
/// the raw line when it could not be parsed.
fn render_message(m: &JournalctlMessage) -> Result<String> {
    match &m.fields {
        Some(fields) => {
            let sorted: BTreeMap<&String, &serde_json::Value> = fields.iter().collect();
            Ok(serde_json::to_string(&sorted)?)
        }
        None => Ok(String::from_utf8_lossy(&m.raw).into_owned()),
    }
}
