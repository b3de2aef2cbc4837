//! Durable journal position
//!
//! The cursor file holds the `__CURSOR` of the last shipped message. It is
//! replaced atomically (write `<path>.next`, then rename) so a crash leaves
//! either the old or the new cursor, never a torn one.
//!
//! Every read and write first runs the `ensure_locked` guard, which fails if
//! this process no longer owns the pidfile. Two instances writing the same
//! cursor would silently skip or duplicate events.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;

/// Check that must pass before the cursor file is touched.
pub type EnsureLocked = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// Single-writer cursor persisted to a file
#[derive(Clone)]
pub struct JournalctlToAwsCursor {
    path: Option<PathBuf>,
    ensure_locked: EnsureLocked,
}

impl std::fmt::Debug for JournalctlToAwsCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalctlToAwsCursor")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl JournalctlToAwsCursor {
    /// A cursor at `path` (or a no-op cursor when `None`).
    pub fn new(path: Option<PathBuf>, ensure_locked: EnsureLocked) -> Self {
        Self {
            path,
            ensure_locked,
        }
    }

    /// A cursor with no lock guard.
    pub fn unguarded(path: Option<PathBuf>) -> Self {
        Self::new(path, Arc::new(|| Ok(())))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Read the persisted cursor, trimmed.
    ///
    /// Returns `None` when no path is configured or the file does not exist.
    pub fn get(&self) -> Result<Option<String>> {
        let Some(path) = &self.path else {
            return Ok(None);
        };
        (self.ensure_locked)()?;

        match fs::read_to_string(path) {
            Ok(s) => Ok(Some(s.trim().to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist `cursor`, replacing the file atomically.
    pub fn set(&self, cursor: &str) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        (self.ensure_locked)()?;

        tracing::debug!(path = %path.display(), cursor, "Writing cursor file");

        let mut next = path.clone().into_os_string();
        next.push(".next");
        let next = PathBuf::from(next);

        let mut f = fs::File::create(&next)?;
        f.write_all(cursor.as_bytes())?;
        f.sync_all()?;
        drop(f);

        fs::rename(&next, path)?;
        Ok(())
    }
}
