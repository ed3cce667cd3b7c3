use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// An advisory exclusive lock on the segment directory (`kiln.lock`), held
/// for the lifetime of an open database so a second process cannot append
/// to the same logs. The lock file records the owning pid for debugging.
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Create (or reuse) the lock file and take the exclusive lock.
    pub fn lock<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        Self::acquire(&file, &path)?;

        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Self { _file: file, path })
    }

    /// Take the lock without blocking: a directory that is already open
    /// elsewhere should fail this open, not queue behind it.
    #[cfg(unix)]
    fn acquire(file: &File, path: &Path) -> Result<()> {
        use std::os::unix::io::AsRawFd;

        let held = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } == 0;
        if !held {
            let cause = std::io::Error::last_os_error();
            return Err(Error::Io(format!(
                "segment directory is locked by another process ({}): {cause}",
                path.display()
            )));
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn acquire(_file: &File, _path: &Path) -> Result<()> {
        // No advisory locking on this platform; allow the open.
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // The OS releases the lock when the file handle closes. The lock
        // file itself is left behind to avoid unlink races.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_excludes_second_holder() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("test.lock");

        let first = FileLock::lock(&path).expect("first lock");
        assert_eq!(first.path(), path.as_path());

        match FileLock::lock(&path) {
            Err(Error::Io(msg)) => assert!(msg.contains("locked by another process")),
            Err(other) => panic!("expected a lock failure, got {other:?}"),
            Ok(_) => panic!("second lock unexpectedly succeeded"),
        }

        drop(first);
        let _second = FileLock::lock(&path).expect("lock after release");
    }

    #[test]
    fn test_lock_file_records_pid() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("test.lock");
        let _lock = FileLock::lock(&path).expect("lock");

        let content = std::fs::read_to_string(&path).expect("read lock file");
        assert!(content.contains(&std::process::id().to_string()));
    }
}
