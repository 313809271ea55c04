//! Boundary to the face detection + embedding model.
//!
//! The model itself lives outside this crate. Anything that can turn an image
//! path into a list of (region, embedding) pairs can be plugged in through
//! [`EmbeddingExtractor`].

use crate::core::error::{Error, Result};
use crate::indexing::discovery::{is_supported_image, SUPPORTED_EXTENSIONS};
use crate::storage::records::FaceRegion;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;

/// One face found by the extractor.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    pub region: FaceRegion,
    pub embedding: Vec<f32>,
    /// `None` when the extractor does not report one; stored as 1.0.
    pub confidence: Option<f32>,
}

impl DetectedFace {
    pub fn new(region: FaceRegion, embedding: Vec<f32>) -> Self {
        Self {
            region,
            embedding,
            confidence: None,
        }
    }
}

pub trait EmbeddingExtractor: Send + Sync {
    /// Detect faces in `path` and return them in detection order.
    fn extract(&self, path: &Path) -> Result<Vec<DetectedFace>>;

    fn is_supported_format(&self, path: &Path) -> bool {
        is_supported_image(path, &SUPPORTED_EXTENSIONS)
    }
}

#[derive(Debug, Deserialize)]
struct RawFace {
    /// [top, right, bottom, left]
    region: [i32; 4],
    embedding: Vec<f32>,
    #[serde(default)]
    confidence: Option<f32>,
}

/// Runs an external program per image and reads its faces as JSON from stdout.
///
/// The program is invoked as `program [args..] <image path>` and must print
/// `[{"region": [top, right, bottom, left], "embedding": [..], "confidence": 0.98}, ..]`.
/// `confidence` is optional.
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandExtractor {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from a `[program, args..]` list as stored in settings
    pub fn from_command_line(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| Error::Config("extractor_command is empty".to_string()))?;
        Ok(Self::new(program, args.to_vec()))
    }

    fn parse_output(stdout: &[u8]) -> Result<Vec<DetectedFace>> {
        let raw: Vec<RawFace> = serde_json::from_slice(stdout)
            .map_err(|e| Error::Extractor(format!("invalid extractor output: {}", e)))?;
        Ok(raw
            .into_iter()
            .map(|f| DetectedFace {
                region: FaceRegion::from(f.region),
                embedding: f.embedding,
                confidence: f.confidence,
            })
            .collect())
    }
}

impl EmbeddingExtractor for CommandExtractor {
    fn extract(&self, path: &Path) -> Result<Vec<DetectedFace>> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .output()
            .map_err(|e| {
                Error::Extractor(format!("failed to run {}: {}", self.program.display(), e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Extractor(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }

        let faces = Self::parse_output(&output.stdout)?;
        tracing::debug!(path = %path.display(), faces = faces.len(), "extractor finished");
        Ok(faces)
    }
}
