//! Single-instance run lock.
//!
//! The token is an exclusive advisory lock (`flock`/`LockFileEx`) on a file
//! at a fixed path. The lock dies with the process, so a hard kill never
//! leaves a stale token behind; the file itself is removed on release.

use std::fs::{self, File, OpenOptions};
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use fs2::FileExt;

use crate::error::SleuthError;

/// Attempts to win the lock after the holder removed the file under us.
const MAX_ACQUIRE_ATTEMPTS: usize = 3;

/// Held for the lifetime of one run. Dropping it releases the lock.
#[derive(Debug)]
pub struct LockGuard {
    path: Utf8PathBuf,
    file: Option<File>,
}

impl LockGuard {
    /// Returns `Ok(None)` when another run holds the lock. Never blocks.
    pub fn acquire(path: &Utf8Path) -> Result<Option<Self>, SleuthError> {
        if let Some(parent) = path.parent() {
            if !parent.as_str().is_empty() {
                fs::create_dir_all(parent.as_std_path())
                    .map_err(|err| SleuthError::Lock(format!("create {parent}: {err}")))?;
            }
        }

        for _ in 0..MAX_ACQUIRE_ATTEMPTS {
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(path.as_std_path())
                .map_err(|err| SleuthError::Lock(format!("open {path}: {err}")))?;

            match file.try_lock_exclusive() {
                Ok(()) => {}
                Err(err) if is_contended(&err) => return Ok(None),
                Err(err) => return Err(SleuthError::Lock(format!("lock {path}: {err}"))),
            }

            // The previous holder may have unlinked the file between our open
            // and our lock; a lock on an orphaned inode excludes nobody.
            if still_linked(path, &file)? {
                write_owner(&file);
                return Ok(Some(Self {
                    path: path.to_path_buf(),
                    file: Some(file),
                }));
            }
            tracing::debug!(path = %path, "lock file replaced while acquiring, retrying");
        }

        Err(SleuthError::Lock(format!(
            "lock file {path} kept changing while acquiring"
        )))
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Explicit release. Equivalent to dropping the guard.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };
        // Unlink while still holding the lock so a waiter cannot lock the
        // old inode after we let go.
        if let Err(err) = fs::remove_file(self.path.as_std_path()) {
            if err.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path, error = %err, "failed to remove lock file");
            }
        }
        if let Err(err) = FileExt::unlock(&file) {
            tracing::warn!(path = %self.path, error = %err, "failed to unlock lock file");
        }
        tracing::debug!(path = %self.path, "lock released");
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(unix)]
fn still_linked(path: &Utf8Path, file: &File) -> Result<bool, SleuthError> {
    use std::os::unix::fs::MetadataExt;

    let held = file
        .metadata()
        .map_err(|err| SleuthError::Lock(format!("stat lock handle: {err}")))?;
    match fs::metadata(path.as_std_path()) {
        Ok(current) => Ok(current.dev() == held.dev() && current.ino() == held.ino()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(SleuthError::Lock(format!("stat {path}: {err}"))),
    }
}

#[cfg(not(unix))]
fn still_linked(path: &Utf8Path, _file: &File) -> Result<bool, SleuthError> {
    Ok(path.as_std_path().exists())
}

fn write_owner(file: &File) {
    use std::io::Write;

    let mut handle = file;
    let _ = handle.set_len(0);
    let _ = writeln!(handle, "{}", std::process::id());
}
