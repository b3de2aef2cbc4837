//! Single-instance enforcement via an advisory pidfile lock
//!
//! Lock strategy:
//! - The pidfile is opened (created with mode 0600 if missing) and locked
//!   with `flock(LOCK_EX | LOCK_NB)`; contention fails immediately.
//! - The lock is held for the lifetime of [`Pidfile`], i.e. the process.
//! - [`Pidfile::ensure_locked`] re-asserts the lock on the same open file.
//!   flock locks belong to the open file description, so this succeeds for
//!   the owner and fails if the lock was somehow lost to another process.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// A locked pidfile
#[derive(Debug)]
pub struct Pidfile {
    file: File,
    path: PathBuf,
}

impl Pidfile {
    /// Open and lock `path`, failing with [`Error::LockContention`] if another
    /// process holds it.
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o600)
            .open(path)?;

        match lock_file_nonblocking(&file) {
            Ok(()) => Ok(Self {
                file,
                path: path.to_path_buf(),
            }),
            Err(e) if is_lock_busy(&e) => Err(Error::LockContention(format!(
                "pidfile {} is locked by another process{}",
                path.display(),
                read_pid(&file)
                    .map(|pid| format!(" (pid {})", pid))
                    .unwrap_or_default()
            ))),
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fail with [`Error::LockLost`] unless this process still holds the lock.
    pub fn ensure_locked(&self) -> Result<()> {
        lock_file_nonblocking(&self.file).map_err(|e| {
            Error::LockLost(format!("pidfile {}: {}", self.path.display(), e))
        })
    }

    /// Replace the file contents with `pid` (this process by default).
    pub fn write(&mut self, pid: Option<u32>) -> Result<()> {
        self.ensure_locked()?;
        let pid = pid.unwrap_or_else(std::process::id);
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        writeln!(self.file, "{}", pid)?;
        self.file.flush()?;
        Ok(())
    }

    /// Truncate the file, leaving it in place for the next owner.
    pub fn clear(&mut self) -> Result<()> {
        self.ensure_locked()?;
        self.file.set_len(0)?;
        Ok(())
    }
}

impl Drop for Pidfile {
    fn drop(&mut self) {
        let _ = self.clear();
        let _ = unlock_file(&self.file);
    }
}

fn read_pid(mut file: &File) -> Option<u32> {
    let mut s = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut s).ok()?;
    s.trim().parse().ok()
}

fn is_lock_busy(error: &io::Error) -> bool {
    matches!(error.kind(), io::ErrorKind::WouldBlock)
        || matches!(error.raw_os_error(), Some(11) | Some(35))
}

fn lock_file_nonblocking(file: &File) -> io::Result<()> {
    const LOCK_EX: i32 = 2;
    const LOCK_NB: i32 = 4;
    let fd = file.as_raw_fd();
    // SAFETY: flock is called with a valid file descriptor and constant flags.
    let rc = unsafe { flock(fd, LOCK_EX | LOCK_NB) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

fn unlock_file(file: &File) -> io::Result<()> {
    const LOCK_UN: i32 = 8;
    let fd = file.as_raw_fd();
    // SAFETY: flock is called with a valid file descriptor and constant flags.
    let rc = unsafe { flock(fd, LOCK_UN) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

extern "C" {
    fn flock(fd: i32, operation: i32) -> i32;
}
