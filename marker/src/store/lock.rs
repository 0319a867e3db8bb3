//! At-most-one writer per unit.

use crate::error::MarkerError;
use crate::types::UnitKey;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Held while a run writes a unit's log. Dropping it releases the unit.
pub struct UnitLock {
    key: UnitKey,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl std::fmt::Debug for UnitLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitLock").field("key", &self.key).finish()
    }
}

impl UnitLock {
    pub fn new(key: UnitKey, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            key,
            release: Some(Box::new(release)),
        }
    }

    /// Creates the lock file with `create_new`, so only one process can win.
    ///
    /// A lock left behind by a process that no longer exists is taken over.
    pub fn acquire_file(path: &Path, key: &UnitKey) -> Result<Self, MarkerError> {
        util::paths::ensure_parent_dir(path)?;
        match try_create(path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if !holder_is_gone(path) {
                    return Err(MarkerError::UnitLocked(key.to_string()));
                }
                warn!(unit = %key, path = ?path, "taking over stale unit lock");
                fs::remove_file(path)?;
                try_create(path).map_err(|e| match e.kind() {
                    ErrorKind::AlreadyExists => MarkerError::UnitLocked(key.to_string()),
                    _ => MarkerError::from(e),
                })?;
            }
            Err(e) => return Err(e.into()),
        }
        debug!(unit = %key, "unit lock acquired");

        let owned: PathBuf = path.to_path_buf();
        Ok(Self::new(key.clone(), move || {
            if let Err(e) = fs::remove_file(&owned) {
                warn!(path = ?owned, error = %e, "failed to remove unit lock");
            }
        }))
    }

    pub fn key(&self) -> &UnitKey {
        &self.key
    }
}

impl Drop for UnitLock {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

fn try_create(path: &Path) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    writeln!(file, "{}", std::process::id())?;
    file.sync_all()
}

/// Only decidable on Linux; elsewhere the holder is assumed alive.
fn holder_is_gone(path: &Path) -> bool {
    let Some(pid) = fs::read_to_string(path)
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok())
    else {
        return false;
    };
    if pid == std::process::id() {
        return false;
    }
    cfg!(target_os = "linux") && !Path::new("/proc").join(pid.to_string()).exists()
}
