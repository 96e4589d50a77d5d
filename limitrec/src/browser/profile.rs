//! Exclusive access to browser profile directories.
//!
//! A Chromium profile must not be opened by two contexts at once. Every
//! browsing context launched by the recorder holds a [`ProfileLease`] for its
//! profile directory; a second request for the same directory waits.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

#[derive(Debug, Default)]
pub struct ProfileLocks {
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

/// Held while a browsing context uses a profile directory. Released on drop.
#[derive(Debug)]
pub struct ProfileLease {
    path: PathBuf,
    _guard: OwnedMutexGuard<()>,
}

impl ProfileLease {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProfileLease {
    fn drop(&mut self) {
        debug!(profile = %self.path.display(), "Released profile lock");
    }
}

impl ProfileLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, path: &Path) -> (PathBuf, Arc<Mutex<()>>) {
        let key = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let lock = self.locks.entry(key.clone()).or_default().clone();
        (key, lock)
    }

    /// Wait until the profile directory is free and take it.
    pub async fn acquire(&self, path: &Path) -> ProfileLease {
        let (key, lock) = self.lock_for(path);
        let guard = lock.lock_owned().await;
        debug!(profile = %key.display(), "Acquired profile lock");
        ProfileLease {
            path: key,
            _guard: guard,
        }
    }

    pub fn try_acquire(&self, path: &Path) -> Option<ProfileLease> {
        let (key, lock) = self.lock_for(path);
        let guard = lock.try_lock_owned().ok()?;
        Some(ProfileLease {
            path: key,
            _guard: guard,
        })
    }

    pub fn is_locked(&self, path: &Path) -> bool {
        let (_, lock) = self.lock_for(path);
        lock.try_lock().is_err()
    }
}
