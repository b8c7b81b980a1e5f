//! Single-run lease on `.reshelf/run.lock`.

use crate::core::error::ReshelfError;
use crate::core::store::Store;
use crate::core::time;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

/// Held for the whole of an `execute`; the lock file is removed on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    _file: File,
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

pub fn acquire(store: &Store, run_id: &str) -> Result<RunLock, ReshelfError> {
    let lock_path = store.lock_path();
    if let Some(parent) = lock_path.parent() {
        fs::create_dir_all(parent)?;
    }
    // create_new gives single-winner semantics per path.
    let mut file = match OpenOptions::new()
        .create_new(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)
    {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
            let holder = fs::read_to_string(&lock_path).unwrap_or_default();
            return Err(ReshelfError::LockContention(format!(
                "{} is held ({})",
                lock_path.display(),
                holder.trim()
            )));
        }
        Err(err) => return Err(ReshelfError::IoError(err)),
    };
    writeln!(
        file,
        "run_id={} pid={} since={}",
        run_id,
        std::process::id(),
        time::now_epoch_z()
    )?;
    Ok(RunLock {
        path: lock_path,
        _file: file,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_release() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::new(tmp.path());
        let lease = acquire(&store, "run-a").unwrap();
        assert!(store.lock_path().exists());
        let err = acquire(&store, "run-b").unwrap_err();
        assert!(matches!(err, ReshelfError::LockContention(_)));
        assert!(err.to_string().starts_with("Already running"));
        drop(lease);
        assert!(!store.lock_path().exists());
        assert!(acquire(&store, "run-c").is_ok());
    }
}
