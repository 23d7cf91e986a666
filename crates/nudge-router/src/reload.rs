//! Hot reload of the pattern store and the weakness and entity catalogs.
//!
//! A reload builds a complete new [`Snapshot`] off to the side and only then
//! swaps the pointer, so readers see either the old state or the new one.
//! Changes are detected by file fingerprints (modification time and length),
//! either on a polling interval or from debounced filesystem notifications.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use notify::Watcher;
use notify_debouncer_mini::{DebouncedEventKind, Debouncer, new_debouncer};
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, RouterError};
use crate::snapshot::{SnapshotCell, SnapshotCounts, SnapshotLoader, SnapshotPaths};

/// Modification time and length of one file; `None` when it does not exist.
type FileStamp = Option<(SystemTime, u64)>;

/// Fingerprint of every watched file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprints([FileStamp; 4]);

impl Fingerprints {
    pub fn capture(paths: &SnapshotPaths) -> Self {
        Self(paths.watched().map(stamp))
    }
}

fn stamp(path: &Path) -> FileStamp {
    let metadata = std::fs::metadata(path).ok()?;
    Some((metadata.modified().ok()?, metadata.len()))
}

/// Result of a reload check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReloadOutcome {
    /// Whether a new snapshot was swapped in.
    pub reloaded: bool,
    /// Generation now being served.
    pub generation: u64,
    pub counts: SnapshotCounts,
}

#[derive(Debug)]
struct Failure {
    fingerprints: Fingerprints,
    reason: String,
}

#[derive(Debug)]
struct ReloadState {
    recorded: Fingerprints,
    failed: Option<Failure>,
}

/// Exclusive access to the reload state.
///
/// Held by administrative writes so a reload cannot swap the store out from
/// under them.
pub struct WriteGuard<'a> {
    state: MutexGuard<'a, ReloadState>,
    paths: &'a SnapshotPaths,
}

impl WriteGuard<'_> {
    /// Record the files as they are now, so our own writes do not look like
    /// external changes.
    pub fn acknowledge(&mut self) {
        self.state.recorded = Fingerprints::capture(self.paths);
        self.state.failed = None;
    }
}

/// Detects changed backing files and swaps in validated snapshots.
pub struct ReloadSupervisor {
    loader: SnapshotLoader,
    cell: Arc<SnapshotCell>,
    state: Mutex<ReloadState>,
}

impl ReloadSupervisor {
    /// `recorded` should be captured before the current snapshot was loaded,
    /// so edits that raced the initial load are still picked up.
    pub fn new(loader: SnapshotLoader, cell: Arc<SnapshotCell>, recorded: Fingerprints) -> Self {
        Self {
            loader,
            cell,
            state: Mutex::new(ReloadState {
                recorded,
                failed: None,
            }),
        }
    }

    pub fn paths(&self) -> &SnapshotPaths {
        self.loader.paths()
    }

    pub fn cell(&self) -> &Arc<SnapshotCell> {
        &self.cell
    }

    pub async fn write_guard(&self) -> WriteGuard<'_> {
        WriteGuard {
            state: self.state.lock().await,
            paths: self.loader.paths(),
        }
    }

    /// Reload if any watched file changed since the last recorded fingerprint.
    ///
    /// Files that already failed validation are not retried until they change
    /// again; that case returns [`RouterError::RejectedSnapshot`].
    pub async fn check_and_reload(&self) -> Result<ReloadOutcome> {
        let mut state = self.state.lock().await;
        let observed = Fingerprints::capture(self.loader.paths());

        if observed == state.recorded {
            return Ok(self.unchanged());
        }
        if let Some(failure) = &state.failed
            && failure.fingerprints == observed
        {
            return Err(RouterError::RejectedSnapshot(failure.reason.clone()));
        }

        self.swap_in(&mut state, observed).await
    }

    /// Reload unconditionally.
    pub async fn force_reload(&self) -> Result<ReloadOutcome> {
        let mut state = self.state.lock().await;
        let observed = Fingerprints::capture(self.loader.paths());
        self.swap_in(&mut state, observed).await
    }

    /// Record current fingerprints without reloading.
    pub async fn acknowledge(&self) {
        self.write_guard().await.acknowledge();
    }

    fn unchanged(&self) -> ReloadOutcome {
        let current = self.cell.current();
        ReloadOutcome {
            reloaded: false,
            generation: current.generation,
            counts: current.counts(),
        }
    }

    async fn swap_in(
        &self,
        state: &mut ReloadState,
        observed: Fingerprints,
    ) -> Result<ReloadOutcome> {
        let generation = self.cell.current().generation + 1;

        // File reads and the index rebuild must not stall routing tasks.
        let loader = self.loader.clone();
        let loaded = tokio::task::spawn_blocking(move || loader.load(generation))
            .await
            .map_err(|e| RouterError::Reload(format!("snapshot load task failed: {}", e)))
            .and_then(|result| result);

        match loaded {
            Ok(snapshot) => {
                let counts = snapshot.counts();
                self.cell.swap(snapshot);
                state.recorded = observed;
                state.failed = None;
                info!(
                    generation,
                    patterns = counts.patterns,
                    weaknesses = counts.weaknesses,
                    entities = counts.entities,
                    "Snapshot swapped"
                );
                Ok(ReloadOutcome {
                    reloaded: true,
                    generation,
                    counts,
                })
            }
            Err(e) => {
                warn!(error = %e, "Reload rejected, keeping current snapshot");
                state.failed = Some(Failure {
                    fingerprints: observed,
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Check for changes every `interval` until the task is aborted.
    pub fn spawn_polling(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                supervisor.poll().await;
            }
        })
    }

    /// Reload on filesystem notifications for the watched files.
    ///
    /// Parent directories are watched rather than the files, since saves
    /// replace files by rename. Drop the handle to stop watching.
    pub fn watch(self: &Arc<Self>, debounce: Duration) -> Result<WatchHandle> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| RouterError::Watch(format!("no async runtime: {}", e)))?;
        let (notify_tx, notify_rx) = std::sync::mpsc::channel();

        let mut debouncer = new_debouncer(debounce, notify_tx)
            .map_err(|e| RouterError::Watch(format!("watcher init: {}", e)))?;

        let targets: Vec<PathBuf> = self
            .paths()
            .watched()
            .iter()
            .map(|p| p.to_path_buf())
            .collect();
        let mut dirs: Vec<PathBuf> = targets
            .iter()
            .filter_map(|p| p.parent().map(Path::to_path_buf))
            .map(|d| {
                if d.as_os_str().is_empty() {
                    PathBuf::from(".")
                } else {
                    d
                }
            })
            .collect();
        dirs.sort();
        dirs.dedup();

        for dir in &dirs {
            std::fs::create_dir_all(dir)?;
            debouncer
                .watcher()
                .watch(dir, notify::RecursiveMode::NonRecursive)
                .map_err(|e| RouterError::Watch(format!("watch {}: {}", dir.display(), e)))?;
            debug!(dir = %dir.display(), "Watching for snapshot changes");
        }

        let supervisor = Arc::clone(self);
        let thread = std::thread::spawn(move || {
            while let Ok(result) = notify_rx.recv() {
                let events = match result {
                    Ok(events) => events,
                    Err(e) => {
                        warn!(error = %e, "File watcher error");
                        continue;
                    }
                };
                let relevant = events.iter().any(|event| {
                    event.kind == DebouncedEventKind::Any
                        && targets.iter().any(|t| same_file(&event.path, t))
                });
                if relevant {
                    runtime.block_on(supervisor.poll());
                }
            }
        });

        Ok(WatchHandle {
            _debouncer: debouncer,
            _thread: thread,
        })
    }

    /// One background check; errors are logged, never returned.
    async fn poll(&self) {
        match self.check_and_reload().await {
            Ok(outcome) if outcome.reloaded => {
                debug!(generation = outcome.generation, "Background reload applied");
            }
            Ok(_) => {}
            Err(RouterError::RejectedSnapshot(_)) => {
                debug!("Watched files unchanged since last rejected reload");
            }
            // Already logged by swap_in.
            Err(_) => {}
        }
    }
}

fn same_file(event_path: &Path, target: &Path) -> bool {
    if event_path == target {
        return true;
    }
    match (event_path.file_name(), target.file_name()) {
        (Some(a), Some(b)) if a == b => {
            let canonical = |p: &Path| p.parent().and_then(|d| d.canonicalize().ok());
            canonical(event_path) == canonical(target)
        }
        _ => false,
    }
}

/// Keeps a filesystem watch alive.
pub struct WatchHandle {
    _debouncer: Debouncer<notify::RecommendedWatcher>,
    _thread: std::thread::JoinHandle<()>,
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle").finish_non_exhaustive()
    }
}
