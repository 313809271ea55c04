use super::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Image extensions accepted by discovery and the extractor by default.
pub const DEFAULT_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "tiff", "tif"];

/// Filesystem layout for facefind
#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory for facefind data
    pub base_dir: PathBuf,
    /// Path to the encoding store
    pub database_path: PathBuf,
    /// Local mirror for files pulled from remote folders
    pub cache_dir: PathBuf,
    /// Path to the persisted settings
    pub config_path: PathBuf,
}

impl Config {
    /// Get the default configuration directory
    pub fn default_base_dir() -> Result<PathBuf> {
        dirs::home_dir()
            .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))
            .map(|home| home.join(".facefind"))
    }

    /// Create a new configuration
    pub fn new(base_dir: Option<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.unwrap_or_else(|| {
            Self::default_base_dir().unwrap_or_else(|_| PathBuf::from(".facefind"))
        });

        Ok(Self {
            database_path: base_dir.join("database").join("faces.redb"),
            cache_dir: base_dir.join("cache"),
            config_path: base_dir.join("config.json"),
            base_dir,
        })
    }

    /// Initialize the configuration directories and write default settings
    pub fn init(&self) -> Result<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(&self.cache_dir)?;
        if let Some(parent) = self.database_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if !self.config_path.exists() {
            Settings::default().save(self)?;
        }
        Ok(())
    }

    /// Check if the configuration is already initialized
    pub fn is_initialized(&self) -> bool {
        self.base_dir.exists() && self.config_path.exists()
    }

    /// Load settings, falling back to defaults when no settings file exists
    pub fn settings(&self) -> Result<Settings> {
        Settings::load(self)
    }
}

/// Tunables consumed by indexing and search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Maximum face distance for a match
    pub tolerance: f32,
    /// Minimum similarity (1 - distance) for a match
    pub min_similarity: f32,
    /// Worker threads used for batch indexing
    pub max_workers: usize,
    /// Lower-case extensions, without the dot
    pub supported_extensions: Vec<String>,
    /// External extractor: program followed by its leading arguments.
    /// The image path is appended as the last argument.
    pub extractor_command: Option<Vec<String>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tolerance: 0.6,
            min_similarity: 0.55,
            max_workers: 4,
            supported_extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            extractor_command: None,
        }
    }
}

impl Settings {
    pub fn load(config: &Config) -> Result<Self> {
        if !config.config_path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&config.config_path)?;
        serde_json::from_str(&raw).map_err(|e| {
            Error::Config(format!(
                "Failed to parse {}: {}",
                config.config_path.display(),
                e
            ))
        })
    }

    pub fn save(&self, config: &Config) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&config.config_path, json)?;
        Ok(())
    }
}
