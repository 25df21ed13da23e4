//! Temporary directory lifecycle.
//!
//! Every checkout under the temp root is owned by a [`ScopedTempDir`], which
//! removes it when dropped: on success, on error return, on panic unwind, and
//! when the owning future is cancelled. [`Janitor::sweep`] is the backstop
//! for anything a crashed process left behind: it removes entries older than
//! the configured TTL.

use chrono::{DateTime, Utc};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::TempConfig;
use crate::error::{IngestError, Result};

/// A directory the janitor is responsible for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempEntry {
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
}

type Registry = Arc<Mutex<HashMap<PathBuf, DateTime<Utc>>>>;

#[derive(Debug, Clone)]
pub struct Janitor {
    root: PathBuf,
    ttl: Duration,
    active: Registry,
}

/// Outcome of one sweep pass.
#[derive(Debug, Default, Clone)]
pub struct SweepReport {
    pub scanned: usize,
    pub removed: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl Janitor {
    pub fn new(root: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            root: root.into(),
            ttl,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn from_config(config: &TempConfig) -> Self {
        Self::new(config.root.clone(), config.ttl())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Start tracking `{root}/{id}`. The directory itself is not created;
    /// whoever populates it does that. An id already held by another scope
    /// in this process is refused with [`IngestError::DestinationExists`].
    pub fn acquire(&self, id: &str) -> Result<ScopedTempDir> {
        if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\']) {
            return Err(IngestError::invalid(format!("invalid temp id '{}'", id)));
        }
        std::fs::create_dir_all(&self.root)?;

        let entry = TempEntry {
            path: self.root.join(id),
            created_at: Utc::now(),
        };
        match self.registry().entry(entry.path.clone()) {
            Entry::Occupied(_) => return Err(IngestError::DestinationExists(entry.path)),
            Entry::Vacant(slot) => {
                slot.insert(entry.created_at);
            }
        }
        debug!(path = %entry.path.display(), "temp entry acquired");

        Ok(ScopedTempDir {
            entry,
            registry: Arc::clone(&self.active),
            released: false,
        })
    }

    /// Entries currently owned by an in-flight ingestion.
    pub fn active_entries(&self) -> Vec<TempEntry> {
        let mut entries: Vec<TempEntry> = self
            .registry()
            .iter()
            .map(|(path, created_at)| TempEntry {
                path: path.clone(),
                created_at: *created_at,
            })
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries
    }

    /// Remove direct children of the temp root older than the TTL.
    ///
    /// Age comes from the tracked creation time when the entry is active in
    /// this process, otherwise from the filesystem modification time.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        if !self.root.is_dir() {
            return report;
        }

        let ttl = chrono::Duration::from_std(self.ttl)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
        let tracked = self.registry().clone();

        for entry in WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            report.scanned += 1;
            let path = entry.path().to_path_buf();

            let created_at = match tracked.get(&path) {
                Some(created_at) => *created_at,
                None => match entry.metadata().ok().and_then(|m| m.modified().ok()) {
                    Some(modified) => DateTime::<Utc>::from(modified),
                    None => continue,
                },
            };
            if now.signed_duration_since(created_at) <= ttl {
                continue;
            }

            let removal = if entry.file_type().is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            match removal {
                Ok(()) => {
                    debug!(path = %path.display(), "swept stale temp entry");
                    report.removed.push(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to sweep temp entry");
                    report.failed.push((path, e.to_string()));
                }
            }
        }

        report
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<PathBuf, DateTime<Utc>>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Run [`Janitor::sweep`] every `every` until the handle is aborted.
pub fn spawn_sweeper(janitor: Janitor, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let pass = janitor.clone();
            match tokio::task::spawn_blocking(move || pass.sweep(Utc::now())).await {
                Ok(report) if !report.removed.is_empty() || !report.failed.is_empty() => {
                    info!(
                        scanned = report.scanned,
                        removed = report.removed.len(),
                        failed = report.failed.len(),
                        "temp sweep finished"
                    );
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "temp sweep task failed"),
            }
        }
    })
}

/// Guard for one temp directory. Dropping it removes the directory.
#[derive(Debug)]
pub struct ScopedTempDir {
    entry: TempEntry,
    registry: Registry,
    released: bool,
}

impl ScopedTempDir {
    pub fn path(&self) -> &Path {
        &self.entry.path
    }

    pub fn entry(&self) -> &TempEntry {
        &self.entry
    }

    /// Stop tracking without deleting. Used when the directory turned out to
    /// belong to someone else.
    pub fn disown(mut self) {
        self.released = true;
    }
}

impl Drop for ScopedTempDir {
    fn drop(&mut self) {
        if !self.released {
            match std::fs::remove_dir_all(&self.entry.path) {
                Ok(()) => debug!(path = %self.entry.path.display(), "temp entry removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %self.entry.path.display(), error = %e, "failed to remove temp entry")
                }
            }
        }
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.entry.path);
    }
}
