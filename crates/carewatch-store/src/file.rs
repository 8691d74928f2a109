//! JSON file helpers shared by the file-backed stores.
//!
//! Files are only ever replaced whole through a rename, so a reader sees
//! either the previous or the next complete document, never a torn write.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, SystemTime};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{StoreError, StoreResult};

/// Lock files older than this are assumed to belong to a crashed writer.
const STALE_LOCK_AGE: Duration = Duration::from_secs(30);

/// Read and decode `path`.
///
/// A missing or empty file yields `Ok(None)`. Anything unreadable or
/// undecodable is [`StoreError::Corrupt`].
pub(crate) fn read_json<D: DeserializeOwned>(path: &Path) -> StoreResult<Option<D>> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::corrupt(path.display().to_string(), e)),
    };
    if contents.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|e| StoreError::corrupt(path.display().to_string(), e))
}

/// Serialize `value` next to `path` and rename it into place.
pub(crate) fn write_json_atomic<S: Serialize + ?Sized>(path: &Path, value: &S) -> StoreResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    let json = serde_json::to_vec_pretty(value)?;
    let tmp = sibling(path, &format!("{}.tmp", std::process::id()));

    let mut file = fs::File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
    file.write_all(&json).map_err(|e| StoreError::io(&tmp, e))?;
    file.sync_all().map_err(|e| StoreError::io(&tmp, e))?;
    drop(file);

    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        StoreError::io(path, e)
    })
}

/// Move a corrupt file aside so a fresh one can be started.
pub(crate) fn quarantine(path: &Path) -> StoreResult<PathBuf> {
    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S");
    let target = sibling(path, &format!("corrupt-{stamp}"));
    fs::rename(path, &target).map_err(|e| StoreError::io(path, e))?;
    Ok(target)
}

/// `dir/name.json` -> `dir/name.json.<suffix>`
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{name}.{suffix}"))
}

/// Exclusive write lock shared with other processes through a `.lock` file.
///
/// The file holds a token unique to its holder. Released when dropped, but
/// only while the file still carries this holder's token.
#[derive(Debug)]
pub(crate) struct WriteLock {
    path: PathBuf,
    token: String,
}

impl WriteLock {
    /// Try to take the lock guarding `target`, sleeping `backoff` between
    /// `attempts` tries.
    pub(crate) fn acquire(target: &Path, attempts: u32, backoff: Duration) -> StoreResult<Self> {
        let path = sibling(target, "lock");
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let token = unique_token();

        let attempts = attempts.max(1);
        let mut failed = 0;
        while failed < attempts {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(token.as_bytes())
                        .and_then(|()| file.sync_all())
                        .map_err(|e| {
                            let _ = fs::remove_file(&path);
                            StoreError::io(&path, e)
                        })?;
                    return Ok(Self { path, token });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    // Taking over a stale lock does not use up an attempt.
                    if let Some(stale) = stale_holder(&path) {
                        if break_stale(&path, &stale) {
                            continue;
                        }
                    }
                    failed += 1;
                    if failed < attempts {
                        thread::sleep(backoff);
                    }
                }
                Err(e) => return Err(StoreError::io(&path, e)),
            }
        }
        Err(StoreError::Contended { path })
    }
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        match fs::read_to_string(&self.path) {
            Ok(holder) if holder == self.token => {
                let _ = fs::remove_file(&self.path);
            }
            _ => tracing::warn!(lock = %self.path.display(), "Write lock was taken over while held"),
        }
    }
}

/// `<pid>-<nanos>-<counter>`, distinct across processes and threads.
fn unique_token() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos());
    format!(
        "{}-{nanos}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

/// The holder token of `lock` when it is older than [`STALE_LOCK_AGE`].
fn stale_holder(lock: &Path) -> Option<String> {
    let age = fs::metadata(lock)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())?;
    if age <= STALE_LOCK_AGE {
        return None;
    }
    fs::read_to_string(lock).ok()
}

/// Remove the stale lock held by `holder`.
///
/// The lock is renamed aside first, so only one writer can take it. If the
/// file moved aside turns out to be a fresh lock (another writer broke the
/// stale one and locked again in between), it is put back.
fn break_stale(lock: &Path, holder: &str) -> bool {
    let aside = sibling(lock, &format!("stale-{}", unique_token()));
    if fs::rename(lock, &aside).is_err() {
        return false;
    }
    let moved = fs::read_to_string(&aside).unwrap_or_default();
    if moved == holder {
        tracing::warn!(lock = %lock.display(), holder, "Removed stale write lock");
        let _ = fs::remove_file(&aside);
        return true;
    }
    // hard_link never replaces an existing lock.
    if let Err(e) = fs::hard_link(&aside, lock) {
        tracing::warn!(lock = %lock.display(), error = %e, "Could not restore a live write lock");
    }
    let _ = fs::remove_file(&aside);
    false
}
