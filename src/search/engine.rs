use crate::core::config::Settings;
use crate::core::error::{Error, Result};
use crate::indexing::extractor::{DetectedFace, EmbeddingExtractor};
use crate::storage::records::{FaceRegion, StoredEncoding};
use crate::storage::store::EncodingStore;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

pub const DEFAULT_TOLERANCE: f32 = 0.6;
pub const DEFAULT_MIN_SIMILARITY: f32 = 0.55;

/// A reference embedding plus the thresholds a stored face must pass.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub embedding: Vec<f32>,
    /// Maximum Euclidean distance
    pub tolerance: f32,
    pub min_similarity: f32,
    /// Path prefixes; empty means every indexed image is eligible
    pub scope: Vec<String>,
}

impl SearchQuery {
    pub fn new(embedding: Vec<f32>) -> Self {
        Self {
            embedding,
            tolerance: DEFAULT_TOLERANCE,
            min_similarity: DEFAULT_MIN_SIMILARITY,
            scope: Vec::new(),
        }
    }

    /// Query using the thresholds from settings
    pub fn with_settings(embedding: Vec<f32>, settings: &Settings) -> Self {
        Self::new(embedding)
            .tolerance(settings.tolerance)
            .min_similarity(settings.min_similarity)
    }

    pub fn tolerance(mut self, tolerance: f32) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn min_similarity(mut self, min_similarity: f32) -> Self {
        self.min_similarity = min_similarity;
        self
    }

    pub fn scope<I, S>(mut self, folders: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope = folders.into_iter().map(Into::into).collect();
        self
    }

    /// Plain string-prefix test: a scope of `/a/b` also admits `/a/bc/x.jpg`.
    fn admits(&self, path: &str) -> bool {
        self.scope.is_empty() || self.scope.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }
}

/// One stored face that passed both thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceMatch {
    pub path: String,
    pub name: String,
    pub region: FaceRegion,
    pub face_index: u32,
    pub distance: f32,
    pub similarity: f32,
}

impl FaceMatch {
    fn from_row(row: &StoredEncoding, distance: f32) -> Self {
        Self {
            path: row.path.clone(),
            name: row.name.clone(),
            region: row.region,
            face_index: row.face_index,
            distance,
            similarity: 1.0 - distance,
        }
    }
}

pub struct SearchEngine {
    store: Arc<EncodingStore>,
}

impl SearchEngine {
    pub fn new(store: Arc<EncodingStore>) -> Self {
        Self { store }
    }

    /// Rank every stored face against the query.
    ///
    /// A face matches when `distance <= tolerance` and
    /// `1 - distance >= min_similarity`. Results are sorted by descending
    /// similarity; equal similarities keep store order.
    pub fn search(&self, query: &SearchQuery) -> Result<Vec<FaceMatch>> {
        if let Some(expected) = self.store.embedding_dim() {
            if query.embedding.len() != expected {
                return Err(Error::DimensionMismatch {
                    expected,
                    actual: query.embedding.len(),
                });
            }
        }

        let rows = self.store.all_encodings();
        let mut matches: Vec<FaceMatch> = rows
            .par_iter()
            .filter(|row| query.admits(&row.path))
            .filter_map(|row| {
                let distance = euclidean_distance(&query.embedding, &row.embedding);
                let similarity = 1.0 - distance;
                (distance <= query.tolerance && similarity >= query.min_similarity)
                    .then(|| FaceMatch::from_row(row, distance))
            })
            .collect();

        matches.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(Ordering::Equal));

        tracing::debug!(
            scanned = rows.len(),
            matches = matches.len(),
            scoped = !query.scope.is_empty(),
            "search complete"
        );
        Ok(matches)
    }

    /// Faces in a reference image, in detection order, for picking a query.
    pub fn reference_faces(
        extractor: &dyn EmbeddingExtractor,
        image: &Path,
    ) -> Result<Vec<DetectedFace>> {
        if !extractor.is_supported_format(image) {
            return Err(Error::UnsupportedFormat(image.display().to_string()));
        }
        let faces = extractor.extract(image)?;
        if faces.is_empty() {
            return Err(Error::Extractor(format!(
                "no faces detected in {}",
                image.display()
            )));
        }
        Ok(faces)
    }
}

/// Calculate Euclidean distance between two vectors of equal length
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::records::{EncodingRow, ImageRecord};
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<EncodingStore>, SearchEngine) {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(EncodingStore::open_path(&temp_dir.path().join("faces.redb")).unwrap());
        let engine = SearchEngine::new(Arc::clone(&store));
        (temp_dir, store, engine)
    }

    fn put(store: &EncodingStore, path: &str, embeddings: &[Vec<f32>]) {
        let record = ImageRecord {
            id: 0,
            path: path.to_string(),
            name: path.rsplit('/').next().unwrap().to_string(),
            size: 1,
            modified_ms: 1,
            face_count: 0,
            processed_at: 0,
            folder: String::new(),
        };
        let rows: Vec<EncodingRow> = embeddings
            .iter()
            .enumerate()
            .map(|(i, e)| EncodingRow {
                face_index: i as u32,
                embedding: e.clone(),
                region: FaceRegion::new(0, 1, 1, 0),
                confidence: 1.0,
            })
            .collect();
        store.replace_image(record, &rows).unwrap();
    }

    #[test]
    fn test_euclidean_distance() {
        assert_eq!(euclidean_distance(&[0.0, 0.0], &[3.0, 4.0]), 5.0);
        assert_eq!(euclidean_distance(&[1.0, 2.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_thresholds_select_only_close_face() {
        let (_temp_dir, store, engine) = setup();
        put(&store, "/photos/a.jpg", &[vec![0.3, 0.0]]);
        put(&store, "/photos/b.jpg", &[vec![0.5, 0.0]]);
        put(&store, "/photos/c.jpg", &[vec![0.7, 0.0]]);

        let results = engine.search(&SearchQuery::new(vec![0.0, 0.0])).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].path, "/photos/a.jpg");
        assert_eq!(results[0].name, "a.jpg");
        assert!((results[0].distance - 0.3).abs() < 1e-6);
        assert!((results[0].similarity - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_results_sorted_by_similarity() {
        let (_temp_dir, store, engine) = setup();
        put(&store, "/p/far.jpg", &[vec![0.4, 0.0]]);
        put(&store, "/p/near.jpg", &[vec![0.1, 0.0]]);
        put(&store, "/p/mid.jpg", &[vec![0.2, 0.0], vec![0.9, 0.0]]);

        let query = SearchQuery::new(vec![0.0, 0.0]).min_similarity(0.0);
        let paths: Vec<String> = engine.search(&query).unwrap().into_iter().map(|m| m.path).collect();
        assert_eq!(paths, vec!["/p/near.jpg", "/p/mid.jpg", "/p/far.jpg"]);
    }

    #[test]
    fn test_raising_min_similarity_never_adds_results() {
        let (_temp_dir, store, engine) = setup();
        for (i, x) in [0.05, 0.15, 0.25, 0.35, 0.45, 0.55].iter().enumerate() {
            put(&store, &format!("/p/{}.jpg", i), &[vec![*x, 0.0]]);
        }

        let mut previous: Option<Vec<String>> = None;
        for min in [0.0, 0.4, 0.6, 0.7, 0.8, 0.9, 1.0] {
            let query = SearchQuery::new(vec![0.0, 0.0]).min_similarity(min);
            let paths: Vec<String> = engine.search(&query).unwrap().into_iter().map(|m| m.path).collect();
            if let Some(previous) = &previous {
                assert!(paths.iter().all(|p| previous.contains(p)));
            }
            previous = Some(paths);
        }
    }

    #[test]
    fn test_scope_is_plain_prefix() {
        let (_temp_dir, store, engine) = setup();
        put(&store, "/a/b/1.jpg", &[vec![0.0, 0.0]]);
        put(&store, "/a/bc/2.jpg", &[vec![0.0, 0.0]]);
        put(&store, "/z/3.jpg", &[vec![0.0, 0.0]]);

        let query = SearchQuery::new(vec![0.0, 0.0]).scope(["/a/b"]);
        let mut paths: Vec<String> = engine.search(&query).unwrap().into_iter().map(|m| m.path).collect();
        paths.sort();
        assert_eq!(paths, vec!["/a/b/1.jpg", "/a/bc/2.jpg"]);

        let query = SearchQuery::new(vec![0.0, 0.0]).scope(["/z/", "/a/b/"]);
        let mut paths: Vec<String> = engine.search(&query).unwrap().into_iter().map(|m| m.path).collect();
        paths.sort();
        assert_eq!(paths, vec!["/a/b/1.jpg", "/z/3.jpg"]);
    }

    #[test]
    fn test_empty_scope_matches_unscoped() {
        let (_temp_dir, store, engine) = setup();
        put(&store, "/a/1.jpg", &[vec![0.1, 0.0]]);
        put(&store, "/b/2.jpg", &[vec![0.2, 0.0]]);

        let unscoped = engine.search(&SearchQuery::new(vec![0.0, 0.0])).unwrap();
        let scoped = engine
            .search(&SearchQuery::new(vec![0.0, 0.0]).scope(Vec::<String>::new()))
            .unwrap();
        assert_eq!(unscoped.len(), 2);
        assert_eq!(unscoped, scoped);
    }

    #[test]
    fn test_dimension_mismatch() {
        let (_temp_dir, store, engine) = setup();
        put(&store, "/a/1.jpg", &[vec![0.1, 0.0]]);

        let result = engine.search(&SearchQuery::new(vec![0.0, 0.0, 0.0]));
        assert!(matches!(
            result,
            Err(Error::DimensionMismatch { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn test_empty_store() {
        let (_temp_dir, _store, engine) = setup();
        assert!(engine.search(&SearchQuery::new(vec![0.0; 128])).unwrap().is_empty());
    }

    #[test]
    fn test_reference_faces_without_faces() {
        struct NoFaces;
        impl EmbeddingExtractor for NoFaces {
            fn extract(&self, _path: &Path) -> Result<Vec<DetectedFace>> {
                Ok(Vec::new())
            }
        }

        let result = SearchEngine::reference_faces(&NoFaces, Path::new("/tmp/ref.jpg"));
        assert!(matches!(result, Err(Error::Extractor(_))));
        let result = SearchEngine::reference_faces(&NoFaces, Path::new("/tmp/ref.gif"));
        assert!(matches!(result, Err(Error::UnsupportedFormat(_))));
    }
}
