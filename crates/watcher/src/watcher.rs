use crate::error::{Result, WatcherError};
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use walkdir::WalkDir;

/// Type of file system event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileEventType {
    Created,
    Modified,
    Deleted,
}

/// A debounced file system event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEvent {
    pub event_type: FileEventType,
    pub path: PathBuf,
    pub timestamp: DateTime<Utc>,
}

/// Configuration for a single watch
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Root to watch, resolved against the workspace root when relative
    pub path: PathBuf,

    /// Descend into subdirectories
    pub recursive: bool,

    /// Basename globs a file must match to be watched
    pub patterns: Vec<String>,

    /// Basename globs that exclude files and prune directories
    pub ignore_patterns: Vec<String>,

    /// Minimum gap between repeated events for the same (path, type)
    pub debounce: Duration,

    /// Rescan interval
    pub poll_interval: Duration,
}

impl WatchConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("."),
            recursive: true,
            patterns: vec!["*".to_string()],
            ignore_patterns: vec![
                "*.pyc".to_string(),
                "__pycache__".to_string(),
                ".git".to_string(),
                "node_modules".to_string(),
                "*.swp".to_string(),
                "*.tmp".to_string(),
            ],
            debounce: Duration::from_millis(500),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Summary of an active watch
#[derive(Debug, Clone, Serialize)]
pub struct WatchInfo {
    pub watch_id: u64,
    pub path: PathBuf,
    pub recursive: bool,
    pub patterns: Vec<String>,
}

struct WatchEntry {
    config: WatchConfig,
    events: mpsc::UnboundedReceiver<FileEvent>,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct WatcherMap {
    next_id: u64,
    watches: HashMap<u64, WatchEntry>,
}

/// Polling file watcher
///
/// Each watch owns a supervisor task that rescans its root once per poll
/// interval and enqueues debounced events. Within a single watch, events for
/// the same path are emitted in occurrence order.
pub struct FileWatcher {
    workspace_root: PathBuf,
    inner: Mutex<WatcherMap>,
}

impl FileWatcher {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            inner: Mutex::new(WatcherMap {
                next_id: 1,
                watches: HashMap::new(),
            }),
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace_root.join(path)
        }
    }

    /// Start watching a path; returns the watch id
    pub fn start_watch(&self, config: WatchConfig) -> Result<u64> {
        let root = self.resolve(&config.path);
        if !root.exists() {
            return Err(WatcherError::InvalidPath(root.display().to_string()));
        }

        let patterns = build_globset(&config.patterns)?;
        let ignores = build_globset(&config.ignore_patterns)?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);

        let loop_config = LoopConfig {
            root: root.clone(),
            recursive: config.recursive,
            patterns,
            ignores,
            debounce: config.debounce,
            poll_interval: config.poll_interval,
        };
        let task = tokio::spawn(watch_loop(loop_config, event_tx, stop_rx));

        let mut inner = self.inner.lock().expect("watcher map poisoned");
        let watch_id = inner.next_id;
        inner.next_id += 1;
        inner.watches.insert(
            watch_id,
            WatchEntry {
                config,
                events: event_rx,
                stop: stop_tx,
                task,
            },
        );

        log::info!("Started watch {} on {:?}", watch_id, root);
        Ok(watch_id)
    }

    /// Stop a watch and join its supervisor task
    pub async fn stop_watch(&self, watch_id: u64) -> Result<()> {
        let entry = {
            let mut inner = self.inner.lock().expect("watcher map poisoned");
            inner
                .watches
                .remove(&watch_id)
                .ok_or(WatcherError::WatchNotFound(watch_id))?
        };

        let _ = entry.stop.send(true);
        if entry.task.await.is_err() {
            log::warn!("Watch {} task ended abnormally", watch_id);
        }

        log::info!("Stopped watch {}", watch_id);
        Ok(())
    }

    /// Drain up to `max_events` pending events without blocking
    pub fn get_events(&self, watch_id: u64, max_events: usize) -> Vec<FileEvent> {
        let mut inner = self.inner.lock().expect("watcher map poisoned");
        let Some(entry) = inner.watches.get_mut(&watch_id) else {
            return Vec::new();
        };

        let mut events = Vec::new();
        while events.len() < max_events {
            match entry.events.try_recv() {
                Ok(event) => events.push(event),
                Err(_) => break,
            }
        }
        events
    }

    /// List all active watches
    pub fn list_watches(&self) -> Vec<WatchInfo> {
        let inner = self.inner.lock().expect("watcher map poisoned");
        let mut infos: Vec<WatchInfo> = inner
            .watches
            .iter()
            .map(|(&watch_id, entry)| WatchInfo {
                watch_id,
                path: entry.config.path.clone(),
                recursive: entry.config.recursive,
                patterns: entry.config.patterns.clone(),
            })
            .collect();
        infos.sort_by_key(|info| info.watch_id);
        infos
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| WatcherError::InvalidPattern(format!("{}: {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| WatcherError::InvalidPattern(e.to_string()))
}

#[derive(Clone)]
struct LoopConfig {
    root: PathBuf,
    recursive: bool,
    patterns: GlobSet,
    ignores: GlobSet,
    debounce: Duration,
    poll_interval: Duration,
}

async fn watch_loop(
    config: LoopConfig,
    events: mpsc::UnboundedSender<FileEvent>,
    mut stop: watch::Receiver<bool>,
) {
    let mut state = scan_blocking(config.clone()).await;
    let mut last_emitted: HashMap<(PathBuf, FileEventType), Instant> = HashMap::new();

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = tokio::time::sleep(config.poll_interval) => {}
        }

        let new_state = scan_blocking(config.clone()).await;
        let now = Instant::now();

        let mut emit = |event_type: FileEventType, path: &PathBuf| {
            let key = (path.clone(), event_type);
            let debounced = last_emitted
                .get(&key)
                .is_some_and(|last| now.duration_since(*last) <= config.debounce);
            if !debounced {
                let event = FileEvent {
                    event_type,
                    path: path.clone(),
                    timestamp: Utc::now(),
                };
                if events.send(event).is_err() {
                    return;
                }
                last_emitted.insert(key, now);
            }
        };

        for (path, mtime) in &new_state {
            match state.get(path) {
                None => emit(FileEventType::Created, path),
                Some(old_mtime) if mtime > old_mtime => emit(FileEventType::Modified, path),
                _ => {}
            }
        }
        for path in state.keys() {
            if !new_state.contains_key(path) {
                emit(FileEventType::Deleted, path);
            }
        }

        state = new_state;
    }
}

async fn scan_blocking(config: LoopConfig) -> HashMap<PathBuf, SystemTime> {
    match tokio::task::spawn_blocking(move || scan(&config)).await {
        Ok(state) => state,
        Err(e) => {
            log::error!("Watch scan task failed: {}", e);
            HashMap::new()
        }
    }
}

/// Collect `{path -> mtime}` for watched files under the root
fn scan(config: &LoopConfig) -> HashMap<PathBuf, SystemTime> {
    let mut result = HashMap::new();

    let max_depth = if config.recursive { usize::MAX } else { 1 };
    let walker = WalkDir::new(&config.root)
        .max_depth(max_depth)
        .into_iter()
        .filter_entry(|entry| {
            // Prune ignored directories, keep the root itself
            if entry.depth() == 0 || !entry.file_type().is_dir() {
                return true;
            }
            !matches_basename(&config.ignores, entry.path())
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::debug!("Error scanning {:?}: {}", config.root, e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if matches_basename(&config.ignores, path) || !matches_basename(&config.patterns, path) {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if let Ok(mtime) = metadata.modified() {
            result.insert(path.to_path_buf(), mtime);
        }
    }

    result
}

fn matches_basename(set: &GlobSet, path: &Path) -> bool {
    path.file_name()
        .map(|name| set.is_match(Path::new(name)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn quick_config(path: &Path) -> WatchConfig {
        WatchConfig {
            path: path.to_path_buf(),
            debounce: Duration::from_millis(0),
            poll_interval: Duration::from_millis(50),
            ..Default::default()
        }
    }

    async fn wait_for_events(
        watcher: &FileWatcher,
        watch_id: u64,
        min_events: usize,
    ) -> Vec<FileEvent> {
        let mut collected = Vec::new();
        for _ in 0..50 {
            collected.extend(watcher.get_events(watch_id, 100));
            if collected.len() >= min_events {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        collected
    }

    #[tokio::test]
    async fn test_detects_created_file() {
        let dir = TempDir::new().unwrap();
        let watcher = FileWatcher::new(dir.path());
        let watch_id = watcher.start_watch(quick_config(dir.path())).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(dir.path().join("new.txt"), "hello").unwrap();

        let events = wait_for_events(&watcher, watch_id, 1).await;
        assert!(events
            .iter()
            .any(|e| e.event_type == FileEventType::Created
                && e.path.file_name().unwrap() == "new.txt"));

        watcher.stop_watch(watch_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_detects_deleted_file() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("doomed.txt");
        std::fs::write(&target, "bye").unwrap();

        let watcher = FileWatcher::new(dir.path());
        let watch_id = watcher.start_watch(quick_config(dir.path())).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::remove_file(&target).unwrap();

        let events = wait_for_events(&watcher, watch_id, 1).await;
        assert!(events.iter().any(|e| e.event_type == FileEventType::Deleted));

        watcher.stop_watch(watch_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_pattern_filtering() {
        let dir = TempDir::new().unwrap();
        let watcher = FileWatcher::new(dir.path());
        let config = WatchConfig {
            patterns: vec!["*.rs".to_string()],
            ..quick_config(dir.path())
        };
        let watch_id = watcher.start_watch(config).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(dir.path().join("kept.rs"), "fn main() {}").unwrap();
        std::fs::write(dir.path().join("skipped.txt"), "nope").unwrap();

        let events = wait_for_events(&watcher, watch_id, 1).await;
        assert!(events.iter().all(|e| e.path.extension().unwrap() == "rs"));

        watcher.stop_watch(watch_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_path_rejected() {
        let watcher = FileWatcher::new("/tmp");
        let config = WatchConfig::new("/definitely/not/a/real/path");
        assert!(matches!(
            watcher.start_watch(config),
            Err(WatcherError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_unknown_watch() {
        let watcher = FileWatcher::new("/tmp");
        assert!(matches!(
            watcher.stop_watch(42).await,
            Err(WatcherError::WatchNotFound(42))
        ));
    }

    #[tokio::test]
    async fn test_list_watches() {
        let dir = TempDir::new().unwrap();
        let watcher = FileWatcher::new(dir.path());
        let watch_id = watcher.start_watch(quick_config(dir.path())).unwrap();

        let watches = watcher.list_watches();
        assert_eq!(watches.len(), 1);
        assert_eq!(watches[0].watch_id, watch_id);

        watcher.stop_watch(watch_id).await.unwrap();
        assert!(watcher.list_watches().is_empty());
    }

    #[tokio::test]
    async fn test_debounce_suppresses_repeat_events() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("busy.txt");
        std::fs::write(&target, "0").unwrap();

        let watcher = FileWatcher::new(dir.path());
        let config = WatchConfig {
            debounce: Duration::from_secs(60),
            poll_interval: Duration::from_millis(50),
            ..quick_config(dir.path())
        };
        let watch_id = watcher.start_watch(config).unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        for i in 1..5 {
            std::fs::write(&target, format!("{}", i)).unwrap();
            tokio::time::sleep(Duration::from_millis(120)).await;
        }

        let events = wait_for_events(&watcher, watch_id, 1).await;
        let modified = events
            .iter()
            .filter(|e| e.event_type == FileEventType::Modified)
            .count();
        assert!(modified <= 1, "debounce should collapse rapid modifies");

        watcher.stop_watch(watch_id).await.unwrap();
    }
}
