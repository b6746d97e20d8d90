//! Serialization of configuration transactions.
//!
//! Every handler that reads and commits configuration runs under the
//! [`ConfigGuard`]: an in-process mutex, which is the real guarantee, plus
//! a best-effort exclusive `flock` on a well-known file against a second
//! agent process. Failing to take the file lock is logged and ignored.
//!
//! Locks are released file lock first, then the mutex, on every exit path
//! including a panicking handler.

use std::fs::{File, OpenOptions};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::dispatch::CommandHandler;

/// Default location of the cross-process lock file.
pub const DEFAULT_LOCK_PATH: &str = "/home/vyos/vyagent/.vyosfilelock";

/// Attempts made at taking the file lock before giving up.
pub const FILE_LOCK_ATTEMPTS: u32 = 3;

const FILE_LOCK_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Why the file lock could not be taken.
#[derive(Debug, Error)]
pub enum FileLockError {
    #[error("open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("flock: {0}")]
    Lock(Errno),
}

impl FileLockError {
    /// True if another holder has the lock, the only case worth retrying.
    pub fn is_busy(&self) -> bool {
        matches!(self, FileLockError::Lock(Errno::EWOULDBLOCK))
    }
}

/// Serializes configuration transactions.
///
/// Clones share the same locks.
#[derive(Debug, Clone)]
pub struct ConfigGuard {
    mutex: Arc<Mutex<()>>,
    lock_path: PathBuf,
}

impl Default for ConfigGuard {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_PATH)
    }
}

impl ConfigGuard {
    /// Creates a guard using `lock_path` for the cross-process lock.
    pub fn new(lock_path: impl Into<PathBuf>) -> Self {
        Self {
            mutex: Arc::new(Mutex::new(())),
            lock_path: lock_path.into(),
        }
    }

    /// Path of the cross-process lock file.
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Wraps `handler` so that its whole body runs under the guard.
    pub fn wrap(&self, handler: CommandHandler) -> CommandHandler {
        let guard = self.clone();
        Arc::new(move |ctx| {
            let guard = guard.clone();
            let handler = handler.clone();
            Box::pin(async move { guard.run(handler(ctx)).await })
        })
    }

    /// Runs `fut` under the guard.
    pub async fn run<F>(&self, fut: F) -> F::Output
    where
        F: Future,
    {
        let _mutex = self.mutex.lock().await;
        let _file_lock = self.acquire_file_lock().await;
        fut.await
    }

    /// Takes the file lock, retrying a few times while another holder has
    /// it; `None` if it stayed unavailable or cannot be opened at all.
    async fn acquire_file_lock(&self) -> Option<Flock<File>> {
        let mut attempt = 1;
        let error = loop {
            match self.try_lock_file() {
                Ok(lock) => return Some(lock),
                Err(e) if e.is_busy() && attempt < FILE_LOCK_ATTEMPTS => {
                    debug!(attempt, error = %e, "File lock busy");
                    attempt += 1;
                    tokio::time::sleep(FILE_LOCK_RETRY_DELAY).await;
                }
                Err(e) => break e,
            }
        };
        warn!(
            path = %self.lock_path.display(),
            attempt,
            error = %error,
            "Unable to take configuration file lock, continuing without it"
        );
        None
    }

    /// One non-blocking attempt at the exclusive file lock.
    pub fn try_lock_file(&self) -> Result<Flock<File>, FileLockError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(|source| FileLockError::Open {
                path: self.lock_path.clone(),
                source,
            })?;
        Flock::lock(file, FlockArg::LockExclusiveNonblock).map_err(|(_, errno)| FileLockError::Lock(errno))
    }
}
