//! Reading the systemd journal
//!
//! - [`message`]: journald JSON lines to [`JournalctlMessage`]s
//! - [`tailer`]: the worker running `journalctl --follow`

pub mod message;
pub mod tailer;

pub use message::{JournalctlMessage, JournalctlMessageBuilder};
pub use tailer::{JournalctlTailerWorker, MessageBatch, TailerOptions};
