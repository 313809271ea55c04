use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// facefind - Find every photo of a person in a local photo collection
#[derive(Parser, Debug)]
#[command(name = "facefind")]
#[command(about = "Index photo folders by face and search them with a reference photo", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Custom base directory (default: ~/.facefind)
    #[arg(long, global = true)]
    pub base_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize facefind (create directories and default settings)
    Init,
    /// Manage the folders that get indexed
    Folder {
        #[command(subcommand)]
        action: FolderAction,
    },
    /// Index every active search folder
    Index {
        /// Worker threads (default: max_workers from settings)
        #[arg(short, long)]
        workers: Option<usize>,
        /// Drop all stored faces before indexing
        #[arg(long)]
        rebuild: bool,
    },
    /// Find photos containing a face similar to one in the reference image
    Search {
        /// Reference image
        image: PathBuf,
        /// Which face of the reference image to use
        #[arg(short, long, default_value_t = 0)]
        face: usize,
        /// Maximum face distance (default from settings)
        #[arg(short, long)]
        tolerance: Option<f32>,
        /// Minimum similarity (default from settings)
        #[arg(short, long)]
        min_similarity: Option<f32>,
        /// Only search below these folders (repeatable; default: active search folders)
        #[arg(short, long)]
        scope: Vec<PathBuf>,
        /// Search the whole index, including images outside the search folders
        #[arg(long, conflicts_with = "scope")]
        everywhere: bool,
    },
    /// Copy photos into a directory
    Copy {
        dest: PathBuf,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Move photos into a directory
    Move {
        dest: PathBuf,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Delete photos and their index entries
    Delete {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Show index statistics
    Stats,
    /// Remove index entries whose files no longer exist
    Cleanup,
    /// Watch the active search folders and keep the index current
    Watch,
    /// Mirror a folder of a mounted remote into the cache and index it
    Sync {
        /// Root of the mounted remote
        remote: PathBuf,
        /// Folder name under the remote root (omit to list folders)
        folder: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum FolderAction {
    /// Add (or re-activate) a search folder
    Add { path: PathBuf },
    /// Deactivate a search folder; its indexed photos are kept
    Remove { path: PathBuf },
    /// List search folders
    List,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_search() {
        let cli = Cli::try_parse_from([
            "facefind", "search", "ref.jpg", "--face", "1", "--scope", "/a", "--scope", "/b",
        ])
        .unwrap();
        match cli.command {
            Commands::Search { image, face, scope, everywhere, tolerance, .. } => {
                assert_eq!(image, PathBuf::from("ref.jpg"));
                assert_eq!(face, 1);
                assert_eq!(scope, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
                assert!(!everywhere);
                assert!(tolerance.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_scope_conflicts_with_everywhere() {
        let result = Cli::try_parse_from(["facefind", "search", "r.jpg", "--scope", "/a", "--everywhere"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_copy_requires_paths() {
        assert!(Cli::try_parse_from(["facefind", "copy", "/dest"]).is_err());
    }
}
