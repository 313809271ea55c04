//! Remote photo folders mirrored into the local cache.
//!
//! A provider only has to list folders and images and fetch bytes. Synced
//! images end up as ordinary local files under the cache directory, so
//! indexing and search need no remote-specific handling.

use crate::core::error::{Error, Result};
use crate::indexing::discovery::is_supported_image;
use crate::indexing::progress::IndexProgress;
use std::fs;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFolder {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteImage {
    pub id: String,
    pub name: String,
    pub size: u64,
}

pub trait RemoteFolderProvider: Send + Sync {
    fn list_folders(&self) -> Result<Vec<RemoteFolder>>;

    fn list_images(&self, folder_id: &str) -> Result<Vec<RemoteImage>>;

    /// Download `image` to exactly `dest`.
    fn fetch(&self, image: &RemoteImage, dest: &Path) -> Result<()>;
}

/// A mounted remote (rclone, FUSE) where each top-level subdirectory is a folder.
#[derive(Debug, Clone)]
pub struct DirectoryProvider {
    root: PathBuf,
}

impl DirectoryProvider {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::Remote(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    fn folder_dir(&self, folder_id: &str) -> Result<PathBuf> {
        let mut components = Path::new(folder_id).components();
        let single = matches!(components.next(), Some(Component::Normal(_))) && components.next().is_none();
        if !single {
            return Err(Error::Remote(format!("invalid folder id: {}", folder_id)));
        }
        let dir = self.root.join(folder_id);
        if !dir.is_dir() {
            return Err(Error::Remote(format!("unknown folder: {}", folder_id)));
        }
        Ok(dir)
    }
}

impl RemoteFolderProvider for DirectoryProvider {
    fn list_folders(&self) -> Result<Vec<RemoteFolder>> {
        let mut folders = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            folders.push(RemoteFolder { id: name.clone(), name });
        }
        folders.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(folders)
    }

    fn list_images(&self, folder_id: &str) -> Result<Vec<RemoteImage>> {
        let dir = self.folder_dir(folder_id)?;
        let mut images = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            images.push(RemoteImage {
                id: format!("{}/{}", folder_id, name),
                name,
                size: metadata.len(),
            });
        }
        images.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(images)
    }

    fn fetch(&self, image: &RemoteImage, dest: &Path) -> Result<()> {
        let (folder_id, name) = image
            .id
            .split_once('/')
            .ok_or_else(|| Error::Remote(format!("invalid image id: {}", image.id)))?;
        let source = self.folder_dir(folder_id)?.join(name);
        fs::copy(&source, dest)
            .map_err(|e| Error::Remote(format!("failed to fetch {}: {}", image.id, e)))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub fetched: usize,
    pub already_present: usize,
    pub failed: usize,
    /// Directory the folder is mirrored into
    pub local_dir: PathBuf,
    /// Local copies of every image in the folder, ready to index
    pub local_paths: Vec<PathBuf>,
}

/// Mirror one remote folder's images into `cache_dir/<folder name>/`.
///
/// A local copy whose size matches the remote one is not fetched again.
/// The stop flag is checked between images.
pub fn sync_folder<E: AsRef<str>>(
    provider: &dyn RemoteFolderProvider,
    folder_id: &str,
    cache_dir: &Path,
    extensions: &[E],
    progress: &IndexProgress,
) -> Result<SyncReport> {
    let folder = provider
        .list_folders()?
        .into_iter()
        .find(|f| f.id == folder_id)
        .ok_or_else(|| Error::Remote(format!("unknown folder: {}", folder_id)))?;

    let images: Vec<RemoteImage> = provider
        .list_images(folder_id)?
        .into_iter()
        .filter(|image| is_supported_image(Path::new(&image.name), extensions))
        .collect();

    let local_dir = cache_dir.join(sanitize(&folder.name));
    fs::create_dir_all(&local_dir)?;

    progress.start(images.len());
    let mut report = SyncReport {
        local_dir: local_dir.clone(),
        ..SyncReport::default()
    };

    for image in &images {
        if progress.is_stopped() {
            tracing::info!(folder = %folder.name, "sync stopped");
            break;
        }

        let local = local_dir.join(sanitize(&image.name));
        let present = fs::metadata(&local)
            .map(|m| m.is_file() && m.len() == image.size)
            .unwrap_or(false);

        if present {
            report.already_present += 1;
            report.local_paths.push(local);
        } else {
            match provider.fetch(image, &local) {
                Ok(()) => {
                    report.fetched += 1;
                    report.local_paths.push(local);
                }
                Err(e) => {
                    tracing::warn!(image = %image.id, error = %e, "failed to fetch remote image");
                    report.failed += 1;
                }
            }
        }
        progress.advance();
    }

    tracing::info!(
        folder = %folder.name,
        fetched = report.fetched,
        already_present = report.already_present,
        failed = report.failed,
        "remote folder synced"
    );
    Ok(report)
}

/// Keep a remote name usable as a single local path component
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}
