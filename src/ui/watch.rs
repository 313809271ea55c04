use crate::core::error::{Error, Result};
use crate::indexing::discovery::{is_supported_image, SUPPORTED_EXTENSIONS};
use crate::indexing::pipeline::Indexer;
use notify_debouncer_full::{
    new_debouncer,
    notify::{RecursiveMode, Watcher},
    DebounceEventResult,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

/// What a batch of debounced paths did to the index
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchBatch {
    pub indexed: usize,
    pub removed: usize,
    pub failed: usize,
}

/// Keeps the index current while search folders change on disk
pub struct FolderWatcher {
    folders: Vec<PathBuf>,
    indexer: Indexer,
    extensions: Vec<String>,
    debounce: Duration,
}

impl FolderWatcher {
    pub fn new(folders: Vec<PathBuf>, indexer: Indexer) -> Result<Self> {
        if folders.is_empty() {
            return Err(Error::NoSearchFolders);
        }
        Ok(Self {
            folders,
            indexer,
            extensions: SUPPORTED_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            debounce: Duration::from_secs(2),
        })
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    /// Block until the event channel closes, indexing changes as they settle.
    pub fn watch(&self) -> Result<()> {
        let (tx, rx) = mpsc::channel();

        let mut debouncer = new_debouncer(self.debounce, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    let paths: Vec<PathBuf> = events
                        .into_iter()
                        .flat_map(|event| event.event.paths)
                        .collect();
                    let _ = tx.send(paths);
                }
                Err(errors) => {
                    for e in errors {
                        tracing::warn!(error = %e, "watch error");
                    }
                }
            }
        })
        .map_err(|e| Error::Watch(format!("Failed to create file watcher: {}", e)))?;

        for folder in &self.folders {
            match debouncer.watcher().watch(folder, RecursiveMode::Recursive) {
                Ok(()) => tracing::info!(folder = %folder.display(), "watching"),
                Err(e) => {
                    tracing::warn!(folder = %folder.display(), error = %e, "failed to watch folder")
                }
            }
        }

        while let Ok(paths) = rx.recv() {
            let batch = self.process_paths(&paths);
            if batch != WatchBatch::default() {
                tracing::info!(
                    indexed = batch.indexed,
                    removed = batch.removed,
                    failed = batch.failed,
                    "applied changes"
                );
            }
        }

        Ok(())
    }

    /// Apply one debounced batch. Paths that vanished are dropped from the
    /// index, supported images that exist are indexed, everything else is ignored.
    pub fn process_paths(&self, paths: &[PathBuf]) -> WatchBatch {
        let unique: BTreeSet<&PathBuf> = paths.iter().collect();
        let mut batch = WatchBatch::default();

        for path in unique {
            if !self.is_under_watched_folder(path) {
                continue;
            }

            if !path.exists() {
                let key = path.to_string_lossy();
                if self.indexer.store().get_image_by_path(&key).is_some() {
                    if self.indexer.store().delete_image_and_encodings(&key) {
                        tracing::debug!(path = %path.display(), "removed deleted image");
                        batch.removed += 1;
                    } else {
                        batch.failed += 1;
                    }
                }
                continue;
            }

            if !path.is_file() || !is_supported_image(path, &self.extensions) {
                continue;
            }

            if self.indexer.index_one(path) {
                batch.indexed += 1;
            } else {
                batch.failed += 1;
            }
        }

        batch
    }

    fn is_under_watched_folder(&self, path: &Path) -> bool {
        self.folders.iter().any(|folder| path.starts_with(folder))
    }
}
