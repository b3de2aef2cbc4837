//! `journalctl --follow` subprocess reader
//!
//! The tailer is the only reader of journalctl's stdout. Reads are
//! non-blocking so the loop keeps beating (and can be stopped) while the
//! journal is quiet. Parsed lines are pushed onto the bounded queue in the
//! order they were read; a full queue is waited on, never dropped.

use std::io::{self, Read};
use std::os::fd::AsRawFd;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::mpsc::{SyncSender, TrySendError};
use std::thread;
use std::time::Duration;

use super::message::{JournalctlMessage, JournalctlMessageBuilder};
use crate::error::{Error, Result};
use crate::worker::{Worker, WorkerContext};

pub const DEFAULT_CMD: &str = "journalctl";
pub const DEFAULT_READ_SIZE: usize = 0x4000;

/// A batch of messages as read from one chunk of stdout
pub type MessageBatch = Vec<JournalctlMessage>;

/// How to invoke journalctl and pace the read loop
#[derive(Debug, Clone)]
pub struct TailerOptions {
    /// Base argv; `--output json --show-cursor --follow` is appended
    pub cmd: Vec<String>,
    pub since: Option<String>,
    pub after_cursor: Option<String>,
    /// Run through `sh -c`, for environments where direct exec misbehaves
    pub shell_wrap: bool,
    pub read_size: usize,
    /// Pause between polls when stdout has nothing to read
    pub sleep: Duration,
    /// Pause between attempts to enqueue onto a full queue
    pub put_retry: Duration,
}

impl Default for TailerOptions {
    fn default() -> Self {
        Self {
            cmd: vec![DEFAULT_CMD.to_string()],
            since: None,
            after_cursor: None,
            shell_wrap: false,
            read_size: DEFAULT_READ_SIZE,
            sleep: Duration::from_secs(1),
            put_retry: Duration::from_millis(100),
        }
    }
}

impl TailerOptions {
    /// Full argv for the subprocess.
    pub fn full_cmd(&self) -> Vec<String> {
        let mut cmd: Vec<String> = self.cmd.clone();
        cmd.extend(
            ["--output", "json", "--show-cursor", "--follow"]
                .iter()
                .map(|s| s.to_string()),
        );

        if let Some(since) = &self.since {
            cmd.extend(["--since".to_string(), since.clone()]);
        }
        if let Some(after_cursor) = &self.after_cursor {
            cmd.extend(["--after-cursor".to_string(), after_cursor.clone()]);
        }

        if self.shell_wrap {
            let joined = cmd.iter().map(|a| shell_quote(a)).collect::<Vec<_>>().join(" ");
            cmd = vec!["sh".to_string(), "-c".to_string(), joined];
        }

        cmd
    }
}

/// Runs journalctl and feeds its output to the queue.
pub struct JournalctlTailerWorker {
    output: SyncSender<MessageBatch>,
    opts: TailerOptions,
    mb: JournalctlMessageBuilder,
}

impl JournalctlTailerWorker {
    pub const NAME: &'static str = "journalctl-tailer";

    pub fn new(output: SyncSender<MessageBatch>, opts: TailerOptions) -> Self {
        Self {
            output,
            opts,
            mb: JournalctlMessageBuilder::new(),
        }
    }

    pub fn options(&self) -> &TailerOptions {
        &self.opts
    }

    fn spawn(&self) -> Result<ChildGuard> {
        let cmd = self.opts.full_cmd();
        let (program, args) = cmd
            .split_first()
            .ok_or_else(|| Error::Config("journalctl command is empty".to_string()))?;

        tracing::info!(cmd = ?cmd, "Starting journalctl");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Transport(format!("failed to spawn {}: {}", program, e)))?;

        Ok(ChildGuard(child))
    }

    /// Put `batch` on the queue, beating while it is full.
    fn enqueue(&self, ctx: &WorkerContext, mut batch: MessageBatch) -> Result<()> {
        loop {
            match self.output.try_send(batch) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(b)) => {
                    batch = b;
                    ctx.heartbeat()?;
                    thread::sleep(self.opts.put_retry);
                }
                Err(TrySendError::Disconnected(_)) => {
                    return Err(Error::Transport("message queue closed".to_string()));
                }
            }
        }
    }

    fn read_available(&mut self, ctx: &WorkerContext, stdout: &mut ChildStdout, buf: &mut [u8]) -> Result<()> {
        loop {
            ctx.heartbeat()?;

            let n = match stdout.read(buf) {
                Ok(0) => {
                    tracing::trace!("Journalctl empty read");
                    return Ok(());
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Transport(format!("journalctl read failed: {}", e))),
            };

            tracing::trace!(bytes = n, "Journalctl read buffer");
            let msgs = self.mb.feed(&buf[..n])?;
            if !msgs.is_empty() {
                self.enqueue(ctx, msgs)?;
            }
        }
    }
}

impl Worker for JournalctlTailerWorker {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn run(&mut self, ctx: &WorkerContext) -> Result<()> {
        let mut child = self.spawn()?;
        let mut stdout = child
            .0
            .stdout
            .take()
            .ok_or_else(|| Error::Transport("journalctl stdout not captured".to_string()))?;
        set_nonblocking(&stdout)?;

        let mut buf = vec![0u8; self.opts.read_size.max(1)];

        loop {
            ctx.heartbeat()?;

            self.read_available(ctx, &mut stdout, &mut buf)?;

            if let Some(status) = child.0.try_wait()? {
                // Drain whatever was written between the last read and exit.
                self.read_available(ctx, &mut stdout, &mut buf)?;
                let tail = self.mb.feed(&[])?;
                if !tail.is_empty() {
                    self.enqueue(ctx, tail)?;
                }
                tracing::error!(%status, "Journalctl process terminated");
                return Err(Error::Transport(format!("journalctl exited: {}", status)));
            }

            ctx.sleep(self.opts.sleep);
        }
    }
}

/// Kills and reaps the subprocess when dropped.
struct ChildGuard(Child);

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if let Ok(None) = self.0.try_wait() {
            tracing::debug!(pid = self.0.id(), "Killing journalctl");
            let _ = self.0.kill();
        }
        let _ = self.0.wait();
    }
}

fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@%+".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

fn set_nonblocking(stdout: &ChildStdout) -> Result<()> {
    let fd = stdout.as_raw_fd();
    // SAFETY: fcntl is called on a valid, owned pipe descriptor.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error().into());
    }
    // SAFETY: as above.
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(())
}
