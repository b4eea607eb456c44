use crate::error::Result;
use crate::incremental::IncrementalIndexer;
use forge_code_chunker::{CodeChunk, Language};
use forge_watcher::{FileEvent, FileEventType, FileWatcher, WatchConfig};
use std::path::PathBuf;
use std::sync::Arc;

/// Payload passed to the update callback after each successful index change
#[derive(Debug, Clone)]
pub struct IndexUpdate {
    pub event_type: FileEventType,
    pub file_path: PathBuf,
    pub language: String,
    pub chunks: Vec<CodeChunk>,
}

/// Callback invoked after each live index update
pub type UpdateCallback = Arc<dyn Fn(IndexUpdate) + Send + Sync>;

/// Live indexer binding a file watch to the incremental indexer
///
/// Created and modified files are read and re-indexed; deleted files are
/// evicted from the index. Events for extensions the chunker does not know
/// are skipped silently.
pub struct LiveIndexer {
    watcher: FileWatcher,
    indexer: Arc<IncrementalIndexer>,
    root: PathBuf,
    watch_id: Option<u64>,
    callback: Option<UpdateCallback>,
}

impl LiveIndexer {
    pub fn new(root: impl Into<PathBuf>, indexer: Arc<IncrementalIndexer>) -> Self {
        let root = root.into();
        Self {
            watcher: FileWatcher::new(root.clone()),
            indexer,
            root,
            watch_id: None,
            callback: None,
        }
    }

    /// Start watching; `patterns` defaults to every supported extension
    pub fn start(
        &mut self,
        patterns: Option<Vec<String>>,
        callback: Option<UpdateCallback>,
    ) -> Result<()> {
        let patterns = patterns.unwrap_or_else(default_patterns);
        self.callback = callback;

        let config = WatchConfig {
            path: self.root.clone(),
            recursive: true,
            patterns,
            ..Default::default()
        };
        let watch_id = self.watcher.start_watch(config)?;
        self.watch_id = Some(watch_id);

        log::info!("Started live indexing with watch {}", watch_id);
        Ok(())
    }

    /// Drain pending watch events and apply each to the index
    ///
    /// Returns the number of events processed; failures are logged and do
    /// not stop the drain.
    pub async fn process_events(&self) -> usize {
        let Some(watch_id) = self.watch_id else {
            return 0;
        };

        let events = self.watcher.get_events(watch_id, 100);
        let mut processed = 0;

        for event in events {
            match self.handle_event(&event).await {
                Ok(true) => processed += 1,
                Ok(false) => {}
                Err(e) => log::error!("Error processing event {:?}: {}", event, e),
            }
        }
        processed
    }

    async fn handle_event(&self, event: &FileEvent) -> Result<bool> {
        let language = Language::from_path(&event.path);
        if language == Language::Unknown {
            log::debug!("Skipping unsupported file: {:?}", event.path);
            return Ok(false);
        }

        let chunks = match event.event_type {
            FileEventType::Created | FileEventType::Modified => {
                let content = tokio::fs::read_to_string(&event.path).await?;
                if content.is_empty() {
                    return Ok(false);
                }
                let report = self
                    .indexer
                    .index_file(&event.path, &content, language)
                    .await?;
                report.chunks
            }
            FileEventType::Deleted => {
                self.indexer.remove_file(&event.path).await?;
                Vec::new()
            }
        };

        if let Some(callback) = &self.callback {
            callback(IndexUpdate {
                event_type: event.event_type,
                file_path: event.path.clone(),
                language: language.as_str().to_string(),
                chunks,
            });
        }
        Ok(true)
    }

    /// Stop live indexing
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(watch_id) = self.watch_id.take() {
            self.watcher.stop_watch(watch_id).await?;
            log::info!("Stopped live indexing");
        }
        Ok(())
    }

    /// Whether a watch is currently active
    pub fn is_watching(&self) -> bool {
        self.watch_id.is_some()
    }

    /// The incremental indexer behind this live binding
    pub fn indexer(&self) -> Arc<IncrementalIndexer> {
        Arc::clone(&self.indexer)
    }
}

fn default_patterns() -> Vec<String> {
    ["rs", "py", "pyw", "js", "mjs", "cjs", "jsx", "ts", "tsx", "go", "md"]
        .iter()
        .map(|ext| format!("*.{}", ext))
        .collect()
}
