use ignore::WalkBuilder;
use std::path::{Path, PathBuf};

pub use crate::core::config::DEFAULT_EXTENSIONS as SUPPORTED_EXTENSIONS;

/// Recursively collect image files under every folder.
///
/// Folders that do not exist or are not directories are logged and skipped.
/// Photo libraries are walked in full: hidden files and ignore files are not
/// honoured. The result is sorted and free of duplicates.
pub fn scan<P: AsRef<Path>, E: AsRef<str>>(folders: &[P], extensions: &[E]) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for folder in folders {
        let root = folder.as_ref();
        if !root.is_dir() {
            tracing::warn!(folder = %root.display(), "search folder does not exist or is not a directory; skipping");
            continue;
        }

        let walker = WalkBuilder::new(root)
            .standard_filters(false)
            .follow_links(false)
            .build();

        for result in walker {
            match result {
                Ok(entry) => {
                    let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
                    if is_file && is_supported_image(entry.path(), extensions) {
                        files.push(entry.into_path());
                    }
                }
                Err(err) => {
                    // Some entries might be inaccessible
                    tracing::warn!(folder = %root.display(), error = %err, "failed to access entry");
                }
            }
        }
    }

    files.sort();
    files.dedup();
    tracing::debug!(count = files.len(), "scan complete");
    files
}

/// Check the extension against an allow-list, ignoring case
pub fn is_supported_image<E: AsRef<str>>(path: &Path, extensions: &[E]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_lowercase();
            extensions
                .iter()
                .any(|allowed| allowed.as_ref().trim_start_matches('.').eq_ignore_ascii_case(&ext))
        })
        .unwrap_or(false)
}
