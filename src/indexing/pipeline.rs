use crate::core::error::{Error, Result};
use crate::indexing::discovery::scan;
use crate::indexing::extractor::EmbeddingExtractor;
use crate::indexing::progress::IndexProgress;
use crate::storage::records::{modified_millis, EncodingRow, ImageRecord};
use crate::storage::store::EncodingStore;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// What happened to one image that was indexed without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    /// Stored mtime is current; the extractor was not called
    UpToDate,
    Processed { faces: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Paths never picked up because a stop was requested
    pub skipped_by_stop: usize,
}

/// Drives the extractor over image files and writes the results to the store.
pub struct Indexer {
    store: Arc<EncodingStore>,
    extractor: Arc<dyn EmbeddingExtractor>,
}

impl Indexer {
    pub fn new(store: Arc<EncodingStore>, extractor: Arc<dyn EmbeddingExtractor>) -> Self {
        Self { store, extractor }
    }

    pub fn store(&self) -> &Arc<EncodingStore> {
        &self.store
    }

    /// Index one image. Unchanged files count as success without touching
    /// the extractor or the store.
    pub fn index_one(&self, path: &Path) -> bool {
        match self.process(path) {
            Ok(IndexOutcome::UpToDate) => {
                tracing::trace!(path = %path.display(), "up to date");
                true
            }
            Ok(IndexOutcome::Processed { faces }) => {
                tracing::debug!(path = %path.display(), faces, "indexed");
                true
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to index image");
                false
            }
        }
    }

    /// Like [`Indexer::index_one`] but reporting why an image failed.
    ///
    /// Nothing is written unless the extractor succeeded, and the record and
    /// its encodings are written in one transaction.
    pub fn process(&self, path: &Path) -> Result<IndexOutcome> {
        let path_str = path.to_str().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("path is not valid UTF-8: {}", path.display()),
            ))
        })?;

        if !self.extractor.is_supported_format(path) {
            return Err(Error::UnsupportedFormat(path_str.to_string()));
        }

        let metadata = std::fs::metadata(path)?;
        if !metadata.is_file() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("not a regular file: {}", path_str),
            )));
        }
        let modified_ms = modified_millis(&metadata)?;

        if self.store.is_up_to_date(path_str, modified_ms) {
            return Ok(IndexOutcome::UpToDate);
        }

        let faces = self.extractor.extract(path)?;

        let rows: Vec<EncodingRow> = faces
            .into_iter()
            .enumerate()
            .map(|(i, face)| EncodingRow {
                face_index: i as u32,
                embedding: face.embedding,
                region: face.region,
                confidence: face.confidence.unwrap_or(1.0),
            })
            .collect();

        let record = ImageRecord {
            id: 0,
            path: path_str.to_string(),
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            size: metadata.len(),
            modified_ms,
            face_count: rows.len() as u32,
            processed_at: 0,
            folder: path
                .parent()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };

        self.store
            .replace_image(record, &rows)
            .ok_or_else(|| Error::Database(format!("failed to store faces for {}", path_str)))?;

        Ok(IndexOutcome::Processed { faces: rows.len() })
    }

    /// Index many images on a pool of `max_workers` threads.
    ///
    /// Workers check the stop flag before taking each next path, so at most
    /// `max_workers` images complete after a stop request. Completion order
    /// is unspecified.
    pub fn index_batch(
        &self,
        paths: &[PathBuf],
        max_workers: usize,
        progress: &IndexProgress,
    ) -> BatchSummary {
        let total = paths.len();
        progress.start(total);
        if total == 0 {
            return BatchSummary::default();
        }

        let workers = max_workers.max(1).min(total);
        let next = AtomicUsize::new(0);
        let successful = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);

        let work = || loop {
            if progress.is_stopped() {
                break;
            }
            let i = next.fetch_add(1, Ordering::SeqCst);
            let Some(path) = paths.get(i) else {
                break;
            };

            let ok = catch_unwind(AssertUnwindSafe(|| self.index_one(path))).unwrap_or_else(|_| {
                tracing::error!(path = %path.display(), "extractor panicked");
                false
            });
            if ok {
                successful.fetch_add(1, Ordering::SeqCst);
            } else {
                failed.fetch_add(1, Ordering::SeqCst);
            }
            progress.advance();
        };

        match rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("facefind-index-{}", i))
            .build()
        {
            Ok(pool) => pool.scope(|s| {
                for _ in 0..workers {
                    s.spawn(|_| work());
                }
            }),
            Err(e) => {
                tracing::warn!(error = %e, "failed to build worker pool; indexing on the calling thread");
                work();
            }
        }

        let successful = successful.into_inner();
        let failed = failed.into_inner();
        let summary = BatchSummary {
            total,
            successful,
            failed,
            skipped_by_stop: total - successful - failed,
        };
        tracing::info!(
            total,
            successful,
            failed,
            skipped_by_stop = summary.skipped_by_stop,
            "batch indexing finished"
        );
        summary
    }

    /// Scan every active search folder and index what is found.
    pub fn index_folders<E: AsRef<str>>(
        &self,
        extensions: &[E],
        max_workers: usize,
        progress: &IndexProgress,
    ) -> Result<BatchSummary> {
        let folders = self.store.list_active_folders();
        if folders.is_empty() {
            return Err(Error::NoSearchFolders);
        }

        let paths = scan(&folders, extensions);
        tracing::info!(folders = folders.len(), images = paths.len(), "scanned search folders");
        Ok(self.index_batch(&paths, max_workers, progress))
    }

    /// Remove records whose file no longer exists. Returns how many were removed.
    pub fn cleanup_orphans(&self) -> usize {
        let mut removed = 0;
        for record in self.store.list_images() {
            if Path::new(&record.path).exists() {
                continue;
            }
            if self.store.delete_image_and_encodings(&record.path) {
                removed += 1;
            }
        }
        tracing::info!(removed, "cleaned up orphaned entries");
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexing::extractor::DetectedFace;
    use crate::storage::records::FaceRegion;
    use std::fs;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    /// Two faces per image, embedding derived from the file size.
    #[derive(Default)]
    struct CountingExtractor {
        calls: AtomicUsize,
    }

    impl EmbeddingExtractor for CountingExtractor {
        fn extract(&self, path: &Path) -> Result<Vec<DetectedFace>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if path.to_string_lossy().contains("broken") {
                return Err(Error::Extractor("cannot decode image".to_string()));
            }
            let len = fs::metadata(path)?.len() as f32;
            Ok(vec![
                DetectedFace::new(FaceRegion::new(0, 10, 10, 0), vec![len, 0.0]),
                DetectedFace {
                    region: FaceRegion::new(5, 20, 20, 5),
                    embedding: vec![0.0, len],
                    confidence: Some(0.5),
                },
            ])
        }
    }

    fn setup() -> (TempDir, Arc<CountingExtractor>, Indexer) {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(EncodingStore::open_path(&temp_dir.path().join("db/faces.redb")).unwrap());
        let extractor = Arc::new(CountingExtractor::default());
        let indexer = Indexer::new(store, extractor.clone());
        (temp_dir, extractor, indexer)
    }

    #[test]
    fn test_index_one_stores_faces() {
        let (temp_dir, _extractor, indexer) = setup();
        let image = temp_dir.path().join("a.jpg");
        fs::write(&image, b"abc").unwrap();

        assert!(indexer.index_one(&image));

        let record = indexer.store().get_image_by_path(image.to_str().unwrap()).unwrap();
        assert_eq!(record.name, "a.jpg");
        assert_eq!(record.size, 3);
        assert_eq!(record.face_count, 2);
        assert_eq!(record.folder, temp_dir.path().to_string_lossy());

        let rows = indexer.store().encodings_for_image(record.id);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].face_index, 0);
        assert_eq!(rows[0].confidence, 1.0);
        assert_eq!(rows[1].confidence, 0.5);
        assert_eq!(rows[1].embedding, vec![0.0, 3.0]);
    }

    #[test]
    fn test_index_one_twice_skips_extractor() {
        let (temp_dir, extractor, indexer) = setup();
        let image = temp_dir.path().join("a.jpg");
        fs::write(&image, b"abc").unwrap();

        assert!(indexer.index_one(&image));
        let before = indexer.store().get_image_by_path(image.to_str().unwrap()).unwrap();
        assert_eq!(indexer.process(&image).unwrap(), IndexOutcome::UpToDate);
        assert!(indexer.index_one(&image));

        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
        let after = indexer.store().get_image_by_path(image.to_str().unwrap()).unwrap();
        assert_eq!(before, after);
        assert_eq!(indexer.store().all_encodings().len(), 2);
    }

    #[test]
    fn test_modified_file_is_reindexed() {
        let (temp_dir, extractor, indexer) = setup();
        let image = temp_dir.path().join("a.jpg");
        fs::write(&image, b"abc").unwrap();
        assert!(indexer.index_one(&image));

        let later = SystemTime::now() + Duration::from_secs(60);
        fs::File::options()
            .write(true)
            .open(&image)
            .unwrap()
            .set_modified(later)
            .unwrap();

        assert!(matches!(
            indexer.process(&image).unwrap(),
            IndexOutcome::Processed { faces: 2 }
        ));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
        assert_eq!(indexer.store().all_encodings().len(), 2);
    }

    #[test]
    fn test_extractor_failure_writes_nothing() {
        let (temp_dir, _extractor, indexer) = setup();
        let image = temp_dir.path().join("broken.jpg");
        fs::write(&image, b"abc").unwrap();

        assert!(!indexer.index_one(&image));
        assert!(indexer.store().get_image_by_path(image.to_str().unwrap()).is_none());
        assert_eq!(indexer.store().stats().image_count, 0);
    }

    #[test]
    fn test_unsupported_and_missing_files_fail() {
        let (temp_dir, extractor, indexer) = setup();
        let text = temp_dir.path().join("a.txt");
        fs::write(&text, b"abc").unwrap();

        assert!(matches!(indexer.process(&text), Err(Error::UnsupportedFormat(_))));
        assert!(!indexer.index_one(&temp_dir.path().join("missing.jpg")));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_index_batch_counts() {
        let (temp_dir, _extractor, indexer) = setup();
        let mut paths = Vec::new();
        for i in 0..6 {
            let name = if i % 3 == 0 { format!("broken{}.jpg", i) } else { format!("ok{}.jpg", i) };
            let path = temp_dir.path().join(name);
            fs::write(&path, b"x").unwrap();
            paths.push(path);
        }

        let progress = IndexProgress::new();
        let summary = indexer.index_batch(&paths, 3, &progress);
        assert_eq!(
            summary,
            BatchSummary { total: 6, successful: 4, failed: 2, skipped_by_stop: 0 }
        );
        assert_eq!(progress.snapshot(), (6, 6));
    }

    #[test]
    fn test_index_batch_empty() {
        let (_temp_dir, _extractor, indexer) = setup();
        let progress = IndexProgress::new();
        assert_eq!(indexer.index_batch(&[], 4, &progress), BatchSummary::default());
    }

    #[test]
    fn test_index_batch_stopped_before_start() {
        let (temp_dir, extractor, indexer) = setup();
        let path = temp_dir.path().join("a.jpg");
        fs::write(&path, b"x").unwrap();

        let progress = IndexProgress::new();
        progress.request_stop();
        let summary = indexer.index_batch(&[path.clone(), path], 2, &progress);
        assert_eq!(summary.skipped_by_stop, 2);
        assert_eq!(summary.successful + summary.failed, 0);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
    }

    /// Requests a stop from inside the first extraction.
    struct StoppingExtractor {
        progress: Arc<IndexProgress>,
        calls: AtomicUsize,
    }

    impl EmbeddingExtractor for StoppingExtractor {
        fn extract(&self, _path: &Path) -> Result<Vec<DetectedFace>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.progress.request_stop();
            std::thread::sleep(Duration::from_millis(20));
            Ok(vec![DetectedFace::new(FaceRegion::new(0, 1, 1, 0), vec![0.1, 0.2])])
        }
    }

    #[test]
    fn test_index_batch_stopped_mid_run() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(EncodingStore::open_path(&temp_dir.path().join("faces.redb")).unwrap());
        let progress = Arc::new(IndexProgress::new());
        let extractor = Arc::new(StoppingExtractor {
            progress: Arc::clone(&progress),
            calls: AtomicUsize::new(0),
        });
        let indexer = Indexer::new(Arc::clone(&store), extractor.clone());

        let paths: Vec<PathBuf> = (0..20)
            .map(|i| {
                let path = temp_dir.path().join(format!("{:02}.jpg", i));
                fs::write(&path, b"x").unwrap();
                path
            })
            .collect();

        let summary = indexer.index_batch(&paths, 3, &progress);
        assert_eq!(summary.total, 20);
        assert!(summary.successful + summary.failed <= 3);
        assert!(summary.skipped_by_stop >= 17);
        assert!(extractor.calls.load(Ordering::SeqCst) <= 3);
        assert_eq!(store.stats().image_count as usize, summary.successful);
    }

    #[test]
    fn test_index_folders_requires_folders() {
        let (_temp_dir, _extractor, indexer) = setup();
        let progress = IndexProgress::new();
        let result = indexer.index_folders(&["jpg"], 2, &progress);
        assert!(matches!(result, Err(Error::NoSearchFolders)));
    }

    #[test]
    fn test_index_folders_scans_active_only() {
        let (temp_dir, _extractor, indexer) = setup();
        let active = temp_dir.path().join("active");
        let inactive = temp_dir.path().join("inactive");
        fs::create_dir_all(&active).unwrap();
        fs::create_dir_all(&inactive).unwrap();
        fs::write(active.join("a.jpg"), b"x").unwrap();
        fs::write(inactive.join("b.jpg"), b"x").unwrap();

        indexer.store().add_folder(active.to_str().unwrap());
        indexer.store().add_folder(inactive.to_str().unwrap());
        indexer.store().deactivate_folder(inactive.to_str().unwrap());

        let progress = IndexProgress::new();
        let summary = indexer.index_folders(&["jpg"], 2, &progress).unwrap();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.successful, 1);
    }

    #[test]
    fn test_cleanup_orphans() {
        let (temp_dir, _extractor, indexer) = setup();
        let keep = temp_dir.path().join("keep.jpg");
        let gone = temp_dir.path().join("gone.jpg");
        fs::write(&keep, b"x").unwrap();
        fs::write(&gone, b"x").unwrap();
        assert!(indexer.index_one(&keep));
        assert!(indexer.index_one(&gone));

        fs::remove_file(&gone).unwrap();
        assert_eq!(indexer.cleanup_orphans(), 1);
        assert!(indexer.store().get_image_by_path(gone.to_str().unwrap()).is_none());
        assert!(indexer.store().get_image_by_path(keep.to_str().unwrap()).is_some());
        assert_eq!(indexer.store().all_encodings().len(), 2);
    }
}
