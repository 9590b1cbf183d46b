//! Exclusive build lock on a tree root.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{IcError, IcResult};

/// Advisory `flock` held on the tree's lock file until dropped.
#[derive(Debug)]
pub struct TreeLock {
    file: File,
    path: PathBuf,
}

impl TreeLock {
    /// Takes the lock without waiting; fails if another build holds it.
    pub fn acquire(path: &Path) -> IcResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;

        // SAFETY: the descriptor is owned by `file` and stays open for the call.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            let reason = if err.kind() == std::io::ErrorKind::WouldBlock {
                "held by another build".to_string()
            } else {
                err.to_string()
            };
            return Err(IcError::Lock {
                path: path.to_path_buf(),
                reason,
            });
        }

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        debug!(path = %path.display(), "tree lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TreeLock {
    fn drop(&mut self) {
        // SAFETY: the descriptor is still owned by `self.file`.
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
        debug!(path = %self.path.display(), "tree lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".ictree.lock");

        let held = TreeLock::acquire(&path).unwrap();
        let err = TreeLock::acquire(&path).unwrap_err();
        assert!(matches!(err, IcError::Lock { .. }));
        assert!(err.to_string().contains("held by another build"));

        drop(held);
        assert!(TreeLock::acquire(&path).is_ok());
    }

    #[test]
    fn test_lock_file_records_pid() {
        let dir = tempfile::tempdir().unwrap();
        let lock = TreeLock::acquire(&dir.path().join("root/.ictree.lock")).unwrap();
        let contents = std::fs::read_to_string(lock.path()).unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());
    }
}
