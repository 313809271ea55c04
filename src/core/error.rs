use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Extractor error: {0}")]
    Extractor(String),

    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("No search folders configured. Add one with 'facefind folder add <path>'.")]
    NoSearchFolders,

    #[error("Invalid destination: {0}")]
    InvalidDestination(String),

    #[error("Embedding dimension mismatch: store holds {expected}-dim embeddings, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Remote provider error: {0}")]
    Remote(String),

    #[error("Watch error: {0}")]
    Watch(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap any displayable redb failure.
    pub(crate) fn db(context: &str, err: impl std::fmt::Display) -> Self {
        Error::Database(format!("{}: {}", context, err))
    }
}
