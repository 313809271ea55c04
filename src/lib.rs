// Core functionality
pub mod core {
    pub mod config;
    pub mod error;
}

// Data storage
pub mod storage {
    pub mod records;
    pub mod store;
}

// Indexing pipeline
pub mod indexing {
    pub mod discovery;
    pub mod extractor;
    pub mod pipeline;
    pub mod progress;
}

// Similarity search
pub mod search {
    pub mod engine;
}

// File operations on matched photos
pub mod files {
    pub mod ops;
}

// Remote photo folders
pub mod remote {
    pub mod provider;
}

// User interfaces
pub mod ui {
    pub mod cli;
    pub mod watch;
}

// Re-export commonly used types
pub use core::config::{Config, Settings};
pub use core::error::{Error, Result};
pub use files::ops::{FileOpReport, FileOps};
pub use indexing::discovery::{is_supported_image, scan, SUPPORTED_EXTENSIONS};
pub use indexing::extractor::{CommandExtractor, DetectedFace, EmbeddingExtractor};
pub use indexing::pipeline::{BatchSummary, IndexOutcome, Indexer};
pub use indexing::progress::IndexProgress;
pub use remote::provider::{
    sync_folder, DirectoryProvider, RemoteFolder, RemoteFolderProvider, RemoteImage, SyncReport,
};
pub use search::engine::{euclidean_distance, FaceMatch, SearchEngine, SearchQuery};
pub use storage::records::{
    get_file_modified_time, EncodingRow, FaceRegion, ImageRecord, SearchFolder, StoreStats,
    StoredEncoding,
};
pub use storage::store::EncodingStore;
pub use ui::cli::Cli;
pub use ui::watch::FolderWatcher;
