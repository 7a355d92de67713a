use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock io error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("failed to encode lock marker: {0}")]
    Encode(#[from] serde_json::Error),
}

impl LockError {
    fn io(path: &Path, source: io::Error) -> Self {
        LockError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMarker {
    pub pid: u32,
    pub owner_token: String,
    pub acquired_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Staleness {
    Live,
    Stale(&'static str),
}

/// Marker file that keeps reconciliation passes from overlapping.
///
/// A marker whose owner has exited, or which is older than the configured
/// threshold, is reclaimed. Reading, replacing and removing the marker all
/// happen under an advisory lock on the `.guard` sidecar file.
pub struct SyncLock {
    path: PathBuf,
    owner_token: String,
    released: bool,
}

impl SyncLock {
    /// Returns `Ok(None)` when another pass holds the marker. Never waits.
    pub fn try_acquire(
        path: impl AsRef<Path>,
        stale_after: Option<Duration>,
    ) -> Result<Option<Self>, LockError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| LockError::io(parent, err))?;
        }

        let Some(_guard) = GuardFile::try_lock(&guard_path(path))? else {
            debug!(path = %path.display(), "lock guard busy");
            return Ok(None);
        };

        if let Some(staleness) = inspect_existing(path, stale_after, Utc::now())? {
            match staleness {
                Staleness::Live => return Ok(None),
                Staleness::Stale(reason) => {
                    warn!(path = %path.display(), reason, "reclaiming stale lock marker");
                    remove_if_present(path)?;
                }
            }
        }

        let marker = LockMarker {
            pid: std::process::id(),
            owner_token: Uuid::new_v4().to_string(),
            acquired_at: Utc::now(),
        };
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => return Ok(None),
            Err(err) => return Err(LockError::io(path, err)),
        };
        let payload = serde_json::to_vec_pretty(&marker)?;
        file.write_all(&payload)
            .and_then(|_| file.sync_all())
            .map_err(|err| LockError::io(path, err))?;

        debug!(path = %path.display(), pid = marker.pid, "lock acquired");
        Ok(Some(Self {
            path: path.to_path_buf(),
            owner_token: marker.owner_token,
            released: false,
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn owner_token(&self) -> &str {
        &self.owner_token
    }

    pub fn release(mut self) -> Result<(), LockError> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<(), LockError> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let _guard = GuardFile::lock(&guard_path(&self.path))?;

        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(LockError::io(&self.path, err)),
        };
        match serde_json::from_str::<LockMarker>(&content) {
            Ok(marker) if marker.owner_token == self.owner_token => remove_if_present(&self.path),
            Ok(marker) => {
                warn!(
                    path = %self.path.display(),
                    holder_pid = marker.pid,
                    "lock marker now belongs to another pass; leaving it"
                );
                Ok(())
            }
            Err(_) => {
                warn!(
                    path = %self.path.display(),
                    "lock marker has no readable owner; leaving it"
                );
                Ok(())
            }
        }
    }
}

impl Drop for SyncLock {
    fn drop(&mut self) {
        if let Err(err) = self.release_inner() {
            warn!(error = %err, "failed to release lock marker");
        }
    }
}

pub fn read_marker(path: impl AsRef<Path>) -> Option<LockMarker> {
    let content = fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

struct GuardFile {
    file: File,
}

impl GuardFile {
    fn open(path: &Path) -> Result<File, LockError> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|err| LockError::io(path, err))
    }

    /// `Ok(None)` only when another process holds the guard.
    fn try_lock(path: &Path) -> Result<Option<Self>, LockError> {
        let file = Self::open(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file })),
            Err(err) if is_contended(&err) => Ok(None),
            Err(err) => Err(LockError::io(path, err)),
        }
    }

    /// Blocks until the guard is free.
    fn lock(path: &Path) -> Result<Self, LockError> {
        let file = Self::open(path)?;
        file.lock_exclusive()
            .map_err(|err| LockError::io(path, err))?;
        Ok(Self { file })
    }
}

impl Drop for GuardFile {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn guard_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".guard");
    path.with_file_name(name)
}

/// `None` when no marker exists.
fn inspect_existing(
    path: &Path,
    stale_after: Option<Duration>,
    now: DateTime<Utc>,
) -> Result<Option<Staleness>, LockError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(LockError::io(path, err)),
    };

    let staleness = match serde_json::from_str::<LockMarker>(&content) {
        Ok(marker) => assess_marker(&marker, stale_after, now, pid_is_alive),
        Err(_) => {
            let modified = fs::metadata(path).and_then(|meta| meta.modified()).ok();
            assess_unreadable(modified, stale_after, SystemTime::now())
        }
    };
    Ok(Some(staleness))
}

fn assess_marker(
    marker: &LockMarker,
    stale_after: Option<Duration>,
    now: DateTime<Utc>,
    pid_alive: impl Fn(u32) -> bool,
) -> Staleness {
    if !pid_alive(marker.pid) {
        return Staleness::Stale("owner process exited");
    }
    if let Some(limit) = stale_after {
        let age = now.signed_duration_since(marker.acquired_at);
        if age.to_std().map(|age| age > limit).unwrap_or(false) {
            return Staleness::Stale("marker expired");
        }
    }
    Staleness::Live
}

/// Markers without owner metadata (older deployments create an empty file)
/// can only be judged by modification time.
fn assess_unreadable(
    modified: Option<SystemTime>,
    stale_after: Option<Duration>,
    now: SystemTime,
) -> Staleness {
    let (Some(modified), Some(limit)) = (modified, stale_after) else {
        return Staleness::Live;
    };
    match now.duration_since(modified) {
        Ok(age) if age > limit => Staleness::Stale("ownerless marker expired"),
        _ => Staleness::Live,
    }
}

fn remove_if_present(path: &Path) -> Result<(), LockError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(LockError::io(path, err)),
    }
}

#[cfg(target_os = "linux")]
fn pid_is_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
fn pid_is_alive(_pid: u32) -> bool {
    true
}
