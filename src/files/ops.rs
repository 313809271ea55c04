use crate::core::error::{Error, Result};
use crate::storage::store::EncodingStore;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Outcome of a bulk file operation. Items are processed independently.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileOpReport {
    pub successful: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl FileOpReport {
    fn record(&mut self, path: &Path, result: Result<()>) {
        match result {
            Ok(()) => self.successful += 1,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "file operation failed");
                self.failed += 1;
                self.errors.push(format!("{}: {}", path.display(), e));
            }
        }
    }
}

/// Copies, moves and deletes photos while keeping the index consistent.
pub struct FileOps {
    store: Arc<EncodingStore>,
}

impl FileOps {
    pub fn new(store: Arc<EncodingStore>) -> Self {
        Self { store }
    }

    /// Copy each file into `dest` without overwriting anything there.
    pub fn copy<P: AsRef<Path>>(&self, paths: &[P], dest: &Path) -> Result<FileOpReport> {
        prepare_destination(dest)?;
        let mut report = FileOpReport::default();
        for path in paths {
            let path = path.as_ref();
            let result = free_target(path, dest).and_then(|target| {
                fs::copy(path, &target)?;
                tracing::debug!(from = %path.display(), to = %target.display(), "copied");
                Ok(())
            });
            report.record(path, result);
        }
        Ok(report)
    }

    /// Move each file into `dest`. The source's index entry is dropped; the
    /// moved file is picked up by the next indexing run.
    pub fn move_files<P: AsRef<Path>>(&self, paths: &[P], dest: &Path) -> Result<FileOpReport> {
        prepare_destination(dest)?;
        let mut report = FileOpReport::default();
        for path in paths {
            let path = path.as_ref();
            let result = free_target(path, dest).and_then(|target| {
                move_file(path, &target)?;
                tracing::debug!(from = %path.display(), to = %target.display(), "moved");
                self.forget(path);
                Ok(())
            });
            report.record(path, result);
        }
        Ok(report)
    }

    /// Delete each file and its index entry. A file that is already gone
    /// still has its entry removed but counts as failed. A file that cannot
    /// be removed keeps its entry.
    pub fn delete<P: AsRef<Path>>(&self, paths: &[P]) -> FileOpReport {
        let mut report = FileOpReport::default();
        for path in paths {
            let path = path.as_ref();
            let result = if path.exists() {
                fs::remove_file(path).map_err(Error::from).map(|()| self.forget(path))
            } else {
                self.forget(path);
                Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "file not found",
                )))
            };
            report.record(path, result);
        }
        report
    }

    /// Drop the index entry for `path`. Entries are keyed by absolute path.
    fn forget(&self, path: &Path) {
        let key = match std::path::absolute(path) {
            Ok(absolute) => absolute,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to resolve path");
                return;
            }
        };
        if !self.store.delete_image_and_encodings(&key.to_string_lossy()) {
            tracing::warn!(path = %path.display(), "failed to remove index entry");
        }
    }
}

fn prepare_destination(dest: &Path) -> Result<()> {
    if dest.exists() && !dest.is_dir() {
        return Err(Error::InvalidDestination(format!(
            "{} exists and is not a directory",
            dest.display()
        )));
    }
    fs::create_dir_all(dest)
        .map_err(|e| Error::InvalidDestination(format!("{}: {}", dest.display(), e)))
}

/// First of `name.ext`, `name_1.ext`, `name_2.ext`, .. that does not exist in `dest`.
fn free_target(source: &Path, dest: &Path) -> Result<PathBuf> {
    let file_name = source.file_name().ok_or_else(|| {
        Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "path has no file name",
        ))
    })?;

    let candidate = dest.join(file_name);
    if !candidate.exists() {
        return Ok(candidate);
    }

    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = source.extension().map(|e| e.to_string_lossy().into_owned());

    let mut counter = 1u32;
    loop {
        let name = match &ext {
            Some(ext) => format!("{}_{}.{}", stem, counter, ext),
            None => format!("{}_{}", stem, counter),
        };
        let candidate = dest.join(name);
        if !candidate.exists() {
            return Ok(candidate);
        }
        counter += 1;
    }
}

fn move_file(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    // Crossing file systems
    fs::copy(from, to)?;
    if let Err(e) = fs::remove_file(from) {
        let _ = fs::remove_file(to);
        return Err(e.into());
    }
    Ok(())
}
