//! photovault CLI
//!
//! Indexes external volumes into a photo catalog and inspects the result.

use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{error, info};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use photovault_indexer::config::DEFAULT_PROGRESS_INTERVAL_MS;
use photovault_indexer::{
    Catalog, ChannelListener, Folder, IndexConfig, IndexError, IndexErrorKind, IndexEvent,
    IndexListener, IndexStats, IndexingTask, JsonLinesReporter, NullListener, PreviewSettings,
    TaskRunner, Tee, Volume, VolumeIndexer,
};

const ABOUT: &str = r#"
photovault - incremental photo indexer for external volumes

Examples:
  photovault index --db vault.db --volume usb1 --path /media/usb1   first run
  photovault index --db vault.db --volume usb1                      re-index
  photovault index --db vault.db --volume usb1 --progress --json    JSON progress + stats
  photovault volumes --db vault.db
  photovault folders --db vault.db
"#;

#[derive(Parser)]
#[command(name = "photovault")]
#[command(author, version, about = ABOUT, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a volume into the catalog
    Index {
        /// Catalog database file
        #[arg(short = 'd', long, default_value = "photovault.db")]
        db: PathBuf,

        /// Volume name
        #[arg(short = 'v', long)]
        volume: String,

        /// Volume root; required the first time a volume is indexed
        #[arg(short = 'p', long)]
        path: Option<PathBuf>,

        /// Do not mirror directories as catalog folders
        #[arg(long)]
        no_folders: bool,

        /// Only offer files with these extensions to the image probe (repeatable)
        #[arg(long = "ext")]
        extensions: Vec<String>,

        /// Directory receiving preview copies of new photos
        #[arg(long)]
        preview_dir: Option<PathBuf>,

        /// Run as a background task, one unit at a time
        #[arg(long)]
        background: bool,

        /// Print JSON progress lines to stderr
        #[arg(long)]
        progress: bool,

        /// Minimum interval between progress lines
        #[arg(long, default_value_t = DEFAULT_PROGRESS_INTERVAL_MS)]
        progress_interval_ms: u64,

        /// Print statistics as JSON
        #[arg(long)]
        json: bool,
    },

    /// List registered volumes
    Volumes {
        #[arg(short = 'd', long, default_value = "photovault.db")]
        db: PathBuf,
    },

    /// Print the folder tree with photo counts
    Folders {
        #[arg(short = 'd', long, default_value = "photovault.db")]
        db: PathBuf,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Index {
            db,
            volume,
            path,
            no_folders,
            extensions,
            preview_dir,
            background,
            progress,
            progress_interval_ms,
            json,
        } => {
            let mut builder = IndexConfig::builder()
                .mirror_folders(!no_folders)
                .show_progress(progress)
                .progress_interval_ms(progress_interval_ms)
                .db_path(db);
            if !extensions.is_empty() {
                builder = builder.extensions(extensions.into_iter().collect());
            }
            index(
                builder.build(),
                &volume,
                path.as_deref(),
                preview_dir.as_deref(),
                background,
                json,
            )
        }
        Commands::Volumes { db } => list_volumes(&db),
        Commands::Folders { db } => print_folders(&db),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn index(
    config: IndexConfig,
    name: &str,
    path: Option<&Path>,
    preview_dir: Option<&Path>,
    background: bool,
    json: bool,
) -> Result<(), IndexError> {
    let db_path = config
        .db_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("photovault.db"));
    let catalog = Catalog::open(&db_path)?;

    let volume = match path {
        Some(path) => catalog.register_volume(name, path)?,
        None => catalog.volume(name)?.ok_or_else(|| {
            IndexError::new(
                IndexErrorKind::InvalidPath,
                None,
                format!("unknown volume {}; pass --path the first time", name),
            )
        })?,
    };
    info!("Catalog: {}", db_path.display());
    info!("Volume: {} at {}", volume.name, volume.base_path.display());

    let previews = match preview_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let preview_volume = catalog.register_volume(&format!("{}-previews", name), dir)?;
            Some(PreviewSettings::new(preview_volume))
        }
        None => None,
    };

    let reporter: Box<dyn IndexListener + Send> = if config.show_progress {
        Box::new(JsonLinesReporter::stderr(config.progress_interval_ms))
    } else {
        Box::new(NullListener)
    };

    let mut indexer = VolumeIndexer::new(catalog, volume, config);
    if let Some(previews) = previews {
        indexer = indexer.with_previews(previews);
    }

    let stats = if background {
        index_in_background(indexer, reporter)?
    } else {
        let mut reporter = reporter;
        indexer.run(reporter.as_mut())?
    };

    print_stats(&stats, json)
}

fn index_in_background(
    indexer: VolumeIndexer,
    reporter: Box<dyn IndexListener + Send>,
) -> Result<IndexStats, IndexError> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let listener = Tee(ChannelListener::new(tx), reporter);

    let runner = TaskRunner::new();
    runner.submit(IndexingTask::new(indexer, Box::new(listener)));

    // A task dropped before reporting counts as cancelled
    let outcome = rx
        .iter()
        .find_map(IndexEvent::into_result)
        .unwrap_or_else(|| Err(IndexError::cancelled()));

    for report in runner.shutdown() {
        info!(
            "Task {}: {} units, {:?}",
            report.name, report.units_run, report.outcome
        );
    }
    outcome
}

fn print_stats(stats: &IndexStats, json: bool) -> Result<(), IndexError> {
    if json {
        let out = serde_json::to_string_pretty(stats)
            .map_err(|e| IndexError::new(IndexErrorKind::Io, None, e.to_string()))?;
        println!("{}", out);
    } else {
        println!("Indexing completed:");
        println!("  New photos: {}", stats.new_photo_count);
        println!("  New instances: {}", stats.new_instance_count);
        println!("  New folders: {}", stats.new_folder_count);
        println!("  Files checked: {}", stats.files_checked);
        println!("  Not images: {}", stats.not_image_count);
        println!("  Skipped: {}", stats.skipped_count);
        println!("  Deleted folders: {}", stats.deleted_folder_count);
        println!("  Removed locations: {}", stats.removed_location_count);
        println!("  Duration: {}ms", stats.duration_ms);
    }
    Ok(())
}

fn list_volumes(db: &Path) -> Result<(), IndexError> {
    let catalog = Catalog::open(db)?;
    let volumes: Vec<Volume> = catalog.list_volumes()?;
    if volumes.is_empty() {
        println!("No volumes registered in {}", db.display());
    }
    for volume in volumes {
        println!("{}\t{}", volume.name, volume.base_path.display());
    }
    Ok(())
}

fn print_folders(db: &Path) -> Result<(), IndexError> {
    let catalog = Catalog::open(db)?;
    let root = catalog.root_folder()?;
    print_folder(&catalog, &root, 0)
}

fn print_folder(catalog: &Catalog, folder: &Folder, depth: usize) -> Result<(), IndexError> {
    let photos = catalog.folder_photos(folder.id)?.len();
    println!("{}{} ({} photos)", "  ".repeat(depth), folder.name, photos);
    for child in catalog.subfolders(folder.id)? {
        print_folder(catalog, &child, depth + 1)?;
    }
    Ok(())
}
