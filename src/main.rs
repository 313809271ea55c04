use anyhow::{anyhow, bail, Context};
use clap::Parser;
use facefind::ui::cli::{Cli, Commands, FolderAction};
use facefind::{
    sync_folder, CommandExtractor, Config, DirectoryProvider, EmbeddingExtractor,
    EncodingStore, FileOpReport, FileOps, FolderWatcher, IndexProgress, Indexer,
    RemoteFolderProvider, SearchEngine, SearchQuery, Settings,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("facefind=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::new(cli.base_dir.clone())?;

    if let Commands::Init = cli.command {
        return handle_init(&config);
    }

    if !config.is_initialized() {
        bail!("facefind is not initialized. Run 'facefind init' first.");
    }
    let settings = config.settings()?;
    let store = Arc::new(EncodingStore::open(&config)?);

    match cli.command {
        Commands::Init => Ok(()),
        Commands::Folder { action } => handle_folder(&store, action),
        Commands::Index { workers, rebuild } => handle_index(&settings, store, workers, rebuild),
        Commands::Search {
            image,
            face,
            tolerance,
            min_similarity,
            scope,
            everywhere,
        } => {
            let mut query_settings = settings.clone();
            if let Some(tolerance) = tolerance {
                query_settings.tolerance = tolerance;
            }
            if let Some(min_similarity) = min_similarity {
                query_settings.min_similarity = min_similarity;
            }
            let scope = if everywhere {
                Vec::new()
            } else if scope.is_empty() {
                store.list_active_folders()
            } else {
                scope
                    .iter()
                    .map(|p| absolute(p).map(|p| p.to_string_lossy().into_owned()))
                    .collect::<anyhow::Result<Vec<_>>>()?
            };
            handle_search(&query_settings, store, &image, face, scope)
        }
        Commands::Copy { dest, paths } => {
            let report = FileOps::new(store).copy(&absolute_all(&paths)?, &absolute(&dest)?)?;
            print_report("Copied", &report);
            Ok(())
        }
        Commands::Move { dest, paths } => {
            let report = FileOps::new(store).move_files(&absolute_all(&paths)?, &absolute(&dest)?)?;
            print_report("Moved", &report);
            Ok(())
        }
        Commands::Delete { paths } => {
            let report = FileOps::new(store).delete(&absolute_all(&paths)?);
            print_report("Deleted", &report);
            Ok(())
        }
        Commands::Stats => handle_stats(&store),
        Commands::Cleanup => {
            let indexer = Indexer::new(store, build_extractor(&settings)?);
            let removed = indexer.cleanup_orphans();
            println!("Removed {} orphaned entries", removed);
            Ok(())
        }
        Commands::Watch => handle_watch(&settings, store),
        Commands::Sync { remote, folder } => {
            handle_sync(&config, &settings, store, &remote, folder.as_deref())
        }
    }
}

fn handle_init(config: &Config) -> anyhow::Result<()> {
    if config.is_initialized() {
        println!("facefind is already initialized at: {}", config.base_dir.display());
        return Ok(());
    }

    config.init()?;
    EncodingStore::open(config)?;

    println!("✓ Created {}", config.base_dir.display());
    println!("✓ Wrote default settings to {}", config.config_path.display());
    println!("\nNext steps:");
    println!("  1. Set \"extractor_command\" in {}", config.config_path.display());
    println!("  2. facefind folder add <path>");
    println!("  3. facefind index");
    Ok(())
}

fn handle_folder(store: &EncodingStore, action: FolderAction) -> anyhow::Result<()> {
    match action {
        FolderAction::Add { path } => {
            let path = absolute(&path)?;
            if !path.is_dir() {
                bail!("{} is not a directory", path.display());
            }
            if !store.add_folder(&path.to_string_lossy()) {
                bail!("failed to add search folder {}", path.display());
            }
            println!("✓ Added search folder {}", path.display());
        }
        FolderAction::Remove { path } => {
            let path = absolute(&path)?;
            if !store.deactivate_folder(&path.to_string_lossy()) {
                bail!("failed to remove search folder {}", path.display());
            }
            println!("✓ Removed search folder {}", path.display());
        }
        FolderAction::List => {
            let folders = store.list_folders();
            if folders.is_empty() {
                println!("No search folders configured.");
            }
            for folder in folders {
                let state = if folder.active { "active" } else { "inactive" };
                println!("  {} ({})", folder.path, state);
            }
        }
    }
    Ok(())
}

fn handle_index(
    settings: &Settings,
    store: Arc<EncodingStore>,
    workers: Option<usize>,
    rebuild: bool,
) -> anyhow::Result<()> {
    if rebuild {
        if !store.clear_index() {
            bail!("failed to clear the index");
        }
        println!("✓ Cleared stored faces");
    }

    let indexer = Indexer::new(Arc::clone(&store), build_extractor(settings)?);
    let workers = workers.unwrap_or(settings.max_workers);
    let interrupted = interrupt_flag();
    let summary = run_with_progress(&interrupted, |progress| {
        indexer.index_folders(&settings.supported_extensions, workers, progress)
    })??;

    println!("\nIndexing complete!");
    println!("  Images found: {}", summary.total);
    println!("  Successful: {}", summary.successful);
    if summary.failed > 0 {
        println!("  Failed: {}", summary.failed);
    }
    if summary.skipped_by_stop > 0 {
        println!("  Not started (interrupted): {}", summary.skipped_by_stop);
    }
    let stats = store.stats();
    println!("  Faces stored: {}", stats.encoding_count);
    Ok(())
}

/// Set on the first Ctrl+C. A second Ctrl+C exits immediately.
fn interrupt_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);
    if let Err(e) = ctrlc::set_handler(move || {
        if handler_flag.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
        eprintln!("\nStopping after the images in progress... (Ctrl+C again to abort)");
    }) {
        tracing::warn!(error = %e, "failed to install Ctrl+C handler");
    }
    flag
}

/// Run `work` on a background thread while the progress bar polls it.
/// An interrupt is forwarded as a stop request.
fn run_with_progress<T: Send>(
    interrupted: &AtomicBool,
    work: impl FnOnce(&IndexProgress) -> T + Send,
) -> anyhow::Result<T> {
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
        .progress_chars("#>-");
    let pb = ProgressBar::new(0).with_style(style);
    let progress = IndexProgress::new();

    let outcome = std::thread::scope(|s| {
        let handle = s.spawn(|| work(&progress));
        while !handle.is_finished() {
            if interrupted.load(Ordering::SeqCst) && !progress.is_stopped() {
                progress.request_stop();
                pb.set_message("stopping");
            }
            let (current, total) = progress.snapshot();
            pb.set_length(total as u64);
            pb.set_position(current as u64);
            std::thread::sleep(Duration::from_millis(100));
        }
        handle.join()
    })
    .map_err(|_| anyhow!("worker thread panicked"))?;

    pb.finish_and_clear();
    Ok(outcome)
}

fn handle_search(
    settings: &Settings,
    store: Arc<EncodingStore>,
    image: &Path,
    face: usize,
    scope: Vec<String>,
) -> anyhow::Result<()> {
    let extractor = build_extractor(settings)?;
    let faces = SearchEngine::reference_faces(extractor.as_ref(), image)?;
    if faces.len() > 1 {
        println!("{} faces found in the reference image; using face {}", faces.len(), face);
    }
    let reference = faces
        .into_iter()
        .nth(face)
        .with_context(|| format!("reference image has no face {}", face))?;

    let query = SearchQuery::with_settings(reference.embedding, settings).scope(scope);
    let matches = SearchEngine::new(store).search(&query)?;

    if matches.is_empty() {
        println!("No matching faces found.");
        return Ok(());
    }

    println!("Found {} matching faces:", matches.len());
    for (i, m) in matches.iter().enumerate() {
        println!(
            "{:>3}. {} (similarity: {:.3}, distance: {:.3}, face {})",
            i + 1,
            m.path,
            m.similarity,
            m.distance,
            m.face_index
        );
    }
    Ok(())
}

fn handle_stats(store: &EncodingStore) -> anyhow::Result<()> {
    let stats = store.stats();
    println!("Images indexed:  {}", stats.image_count);
    println!("Faces stored:    {}", stats.encoding_count);
    println!("Search folders:  {}", stats.active_folder_count);
    println!("Store size:      {:.1} MB", stats.store_size_bytes as f64 / (1024.0 * 1024.0));
    if let Some(dim) = store.embedding_dim() {
        println!("Embedding size:  {}", dim);
    }
    Ok(())
}

fn handle_watch(settings: &Settings, store: Arc<EncodingStore>) -> anyhow::Result<()> {
    let folders: Vec<PathBuf> = store.list_active_folders().into_iter().map(PathBuf::from).collect();
    let indexer = Indexer::new(store, build_extractor(settings)?);
    let watcher = FolderWatcher::new(folders, indexer)?
        .with_extensions(settings.supported_extensions.clone());

    println!("Watching search folders. Press Ctrl+C to stop...");
    watcher.watch()?;
    Ok(())
}

fn handle_sync(
    config: &Config,
    settings: &Settings,
    store: Arc<EncodingStore>,
    remote: &Path,
    folder: Option<&str>,
) -> anyhow::Result<()> {
    let provider = DirectoryProvider::new(remote)?;

    let Some(folder) = folder else {
        for f in provider.list_folders()? {
            let count = provider.list_images(&f.id).map(|images| images.len()).unwrap_or(0);
            println!("  {} ({} files)", f.name, count);
        }
        return Ok(());
    };

    let interrupted = interrupt_flag();
    let report = run_with_progress(&interrupted, |progress| {
        sync_folder(
            &provider,
            folder,
            &config.cache_dir,
            &settings.supported_extensions,
            progress,
        )
    })??;
    println!(
        "✓ Synced {}: {} fetched, {} already present, {} failed",
        folder, report.fetched, report.already_present, report.failed
    );

    let local_dir = absolute(&report.local_dir)?;
    if !store.add_folder(&local_dir.to_string_lossy()) {
        bail!("failed to add search folder {}", local_dir.display());
    }

    let indexer = Indexer::new(store, build_extractor(settings)?);
    let summary = run_with_progress(&interrupted, |progress| {
        indexer.index_batch(&report.local_paths, settings.max_workers, progress)
    })?;
    println!("  Indexed: {} successful, {} failed", summary.successful, summary.failed);
    Ok(())
}

fn build_extractor(settings: &Settings) -> anyhow::Result<Arc<dyn EmbeddingExtractor>> {
    let command = settings
        .extractor_command
        .as_deref()
        .context("no extractor configured; set \"extractor_command\" in config.json")?;
    Ok(Arc::new(CommandExtractor::from_command_line(command)?))
}

fn print_report(verb: &str, report: &FileOpReport) {
    println!("✓ {} {} files", verb, report.successful);
    if report.failed > 0 {
        println!("✗ {} failed:", report.failed);
        for error in &report.errors {
            println!("    {}", error);
        }
    }
}

/// Index entries are keyed by absolute path
fn absolute(path: &Path) -> anyhow::Result<PathBuf> {
    std::path::absolute(path).with_context(|| format!("invalid path {}", path.display()))
}

fn absolute_all(paths: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    paths.iter().map(|p| absolute(p)).collect()
}
