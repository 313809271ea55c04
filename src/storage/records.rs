use crate::core::error::Result;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// One indexed image file, keyed by its absolute path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: u64,
    pub path: String,
    pub name: String,
    pub size: u64,
    /// Modification time in milliseconds since the Unix epoch
    pub modified_ms: u64,
    pub face_count: u32,
    /// Unix seconds at which the image was last processed
    pub processed_at: u64,
    pub folder: String,
}

/// Face bounds in pixel coordinates, in the extractor's (top, right, bottom, left) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

impl FaceRegion {
    pub fn new(top: i32, right: i32, bottom: i32, left: i32) -> Self {
        Self { top, right, bottom, left }
    }
}

impl From<[i32; 4]> for FaceRegion {
    fn from(v: [i32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

/// A detected face belonging to one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodingRow {
    pub face_index: u32,
    pub embedding: Vec<f32>,
    pub region: FaceRegion,
    pub confidence: f32,
}

/// A root directory the indexer may scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchFolder {
    pub path: String,
    pub active: bool,
    pub added_at: u64,
}

/// An encoding joined with its owning image, as returned by a full scan.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEncoding {
    pub image_id: u64,
    pub face_index: u32,
    pub embedding: Vec<f32>,
    pub region: FaceRegion,
    pub confidence: f32,
    pub path: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub image_count: u64,
    pub encoding_count: u64,
    pub active_folder_count: u64,
    pub store_size_bytes: u64,
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

pub(crate) fn from_json<T: DeserializeOwned>(json: &str) -> Result<T> {
    Ok(serde_json::from_str(json)?)
}

/// Current time as Unix seconds
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Get file modification time as milliseconds since the Unix epoch.
/// Times before the epoch clamp to zero.
pub fn get_file_modified_time(path: &Path) -> Result<u64> {
    modified_millis(&std::fs::metadata(path)?)
}

pub fn modified_millis(metadata: &std::fs::Metadata) -> Result<u64> {
    Ok(metadata
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_encoding_row_embedding_survives_json() {
        let row = EncodingRow {
            face_index: 2,
            embedding: vec![0.1, -0.333_333_34, 1.0e-7, 0.987_654_3],
            region: FaceRegion::new(10, 50, 60, 5),
            confidence: 1.0,
        };
        let back: EncodingRow = from_json(&to_json(&row).unwrap()).unwrap();
        assert_eq!(back, row);
    }

    #[test]
    fn test_region_from_array() {
        let region = FaceRegion::from([1, 2, 3, 4]);
        assert_eq!(region.top, 1);
        assert_eq!(region.right, 2);
        assert_eq!(region.bottom, 3);
        assert_eq!(region.left, 4);
    }

    #[test]
    fn test_get_file_modified_time() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("a.jpg");
        fs::write(&file, b"x").unwrap();
        assert!(get_file_modified_time(&file).unwrap() > 0);
    }

    #[test]
    fn test_get_file_modified_time_nonexistent() {
        assert!(get_file_modified_time(Path::new("/nonexistent/a.jpg")).is_err());
    }
}
