#![allow(dead_code)]

use facefind::{DetectedFace, EmbeddingExtractor, Error, FaceRegion, Result};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Reads faces from the image file itself: one face per line, each line a
/// comma-separated embedding. A file reading `fail` cannot be decoded.
#[derive(Default)]
pub struct TextExtractor {
    pub calls: AtomicUsize,
}

impl TextExtractor {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EmbeddingExtractor for TextExtractor {
    fn extract(&self, path: &Path) -> Result<Vec<DetectedFace>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = fs::read_to_string(path)?;
        if text.trim() == "fail" {
            return Err(Error::Extractor(format!("cannot decode {}", path.display())));
        }
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .map(|(i, line)| {
                let embedding = line
                    .split(',')
                    .map(|v| v.trim().parse::<f32>())
                    .collect::<std::result::Result<Vec<f32>, _>>()
                    .map_err(|e| Error::Extractor(e.to_string()))?;
                let offset = i as i32 * 10;
                Ok(DetectedFace::new(
                    FaceRegion::new(offset, offset + 10, offset + 10, offset),
                    embedding,
                ))
            })
            .collect()
    }
}

pub fn write_image(path: &Path, faces: &[&[f32]]) {
    let body: Vec<String> = faces
        .iter()
        .map(|face| face.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(","))
        .collect();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, body.join("\n")).unwrap();
}
