//! Single-instance guard backed by an exclusive lock file.
//!
//! `try_acquire` never blocks: a second holder on the same host gets `None`
//! right away. The lock belongs to the open file, so the OS releases it when
//! the guard is dropped or the process exits, crashed or not.

use std::fs::{File, OpenOptions, TryLockError};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

impl InstanceLock {
    /// Take the lock at `path`, writing our PID into it.
    ///
    /// Returns `Ok(None)` if another process (or another guard in this
    /// process) already holds it.
    pub fn try_acquire(path: impl AsRef<Path>) -> io::Result<Option<Self>> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                debug!("Lock {} is held elsewhere", path.display());
                return Ok(None);
            }
            Err(TryLockError::Error(e)) => return Err(e),
        }

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        info!("🔒 Acquired instance lock {}", path.display());
        Ok(Some(Self { file, path }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        // Unlock explicitly; closing the file would do it too.
        if self.file.unlock().is_ok() {
            debug!("Released instance lock {}", self.path.display());
        }
    }
}
