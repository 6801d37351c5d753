use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use clipstash::clipboard::{self, ChangeCursor, ClipboardWatcher};
use clipstash::image::DecodedImageCache;
use clipstash::logging;
use clipstash::models::RecordKind;
use clipstash::storage::{
    BlobStore, Config, ConfigStorage, HistoryStorage, JsonHistoryStorage, TomlConfigStorage,
    ensure_directories,
};
use clipstash::store::{HistoryEvent, HistoryStore};

#[derive(Parser)]
#[command(name = "clipstash")]
#[command(about = "Clipboard History Engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the clipboard watcher in the foreground
    Watch,

    /// Show clipboard history entries
    History {
        /// Number of entries to show (default: 10)
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show clipboard history statistics
    Stats,

    /// Delete all history entries and their image blobs
    Clear,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Watch => cmd_watch(),
        Commands::History { limit } => cmd_history(limit),
        Commands::Stats => cmd_stats(),
        Commands::Clear => cmd_clear(),
    }
}

/// Load configuration, falling back to defaults on a broken file
fn load_config(config_dir: &std::path::Path) -> Config {
    let config_storage = TomlConfigStorage::new(config_dir.join("clipstash.toml"));
    match config_storage.load() {
        Ok(config) => config,
        Err(e) => {
            log::warn!("Failed to load config, using defaults: {:#}", e);
            Config::default()
        }
    }
}

/// Build the history storage stack rooted in the data directory
fn open_storage(data_dir: &std::path::Path) -> Result<(Arc<BlobStore>, JsonHistoryStorage)> {
    let blobs = Arc::new(
        BlobStore::new(data_dir.join("images")).context("Failed to open blob store")?,
    );
    let storage = JsonHistoryStorage::new(data_dir.join("history.json"), blobs.clone());
    Ok((blobs, storage))
}

/// Load history for the inspection commands, persisting the migrated
/// form right away if the file was in the legacy schema
fn load_history(storage: &JsonHistoryStorage) -> Result<Vec<clipstash::models::HistoryRecord>> {
    let outcome = storage.load()?;
    if outcome.migrated {
        storage
            .save(&outcome.records)
            .context("Failed to persist migrated history")?;
    }
    Ok(outcome.records)
}

/// Run the watcher daemon: poll the clipboard, capture new clips,
/// log mutation events until the process is killed
fn cmd_watch() -> Result<()> {
    let (data_dir, config_dir) = ensure_directories()?;
    let config = load_config(&config_dir);

    logging::init_logger(data_dir.join("clipstash.log"), &config.general.log_level)?;
    log::info!("Starting clipstash watcher");

    let (blobs, storage) = open_storage(&data_dir)?;
    let images = Arc::new(DecodedImageCache::new(
        NonZeroUsize::new(config.general.image_cache_entries)
            .unwrap_or_else(|| NonZeroUsize::new(100).expect("nonzero")),
        config.general.image_cache_cost_bytes,
    ));
    let backend = clipboard::create_backend()?;
    let cursor = Arc::new(ChangeCursor::new());

    let store = HistoryStore::open(
        Box::new(storage),
        blobs.clone(),
        images,
        backend.clone(),
        cursor.clone(),
    )?;
    let events = store.subscribe();

    let watcher = ClipboardWatcher::new(
        backend,
        store.clone(),
        blobs,
        cursor,
        config.general.self_bundle_id.clone(),
    );
    let _handle = watcher.spawn(Duration::from_millis(config.general.poll_interval_ms));

    println!("clipstash watcher running (log: {:?})", data_dir.join("clipstash.log"));

    // Block on mutation events; the store outlives this loop, so it
    // only ends when the process is killed
    for event in events {
        match event {
            HistoryEvent::RecordsChanged(records) => {
                log::debug!("History now holds {} records", records.len());
            }
            HistoryEvent::AppNamesChanged(names) => {
                log::debug!("App name index now holds {} apps", names.len());
            }
        }
    }

    Ok(())
}

/// Show clipboard history entries
fn cmd_history(limit: usize) -> Result<()> {
    env_logger::init();

    let (data_dir, _config_dir) = ensure_directories()?;
    let (_blobs, storage) = open_storage(&data_dir)?;
    let records = load_history(&storage)?;

    println!("Recent clipboard entries (showing up to {}):", limit);
    println!("{}", "=".repeat(60));

    for (i, record) in records.iter().take(limit).enumerate() {
        let type_label = match &record.kind {
            RecordKind::Text => "TEXT",
            RecordKind::Link(_) => "LINK",
            RecordKind::Image(_) => "IMAGE",
        };

        let source = record.app_name.as_deref().unwrap_or("-");
        println!(
            "{:3}. [{}] {} ({})",
            i + 1,
            type_label,
            record.preview(50),
            source
        );
    }

    if records.is_empty() {
        println!("(empty - no clipboard history yet)");
    }

    Ok(())
}

/// Show clipboard statistics
fn cmd_stats() -> Result<()> {
    env_logger::init();

    let (data_dir, _config_dir) = ensure_directories()?;
    let (blobs, storage) = open_storage(&data_dir)?;
    let records = load_history(&storage)?;

    let mut text_count = 0;
    let mut link_count = 0;
    let mut image_count = 0;
    let mut missing_blobs = 0;

    for record in &records {
        match &record.kind {
            RecordKind::Text => text_count += 1,
            RecordKind::Link(_) => link_count += 1,
            RecordKind::Image(blob_id) => {
                image_count += 1;
                if !blobs.contains(*blob_id) {
                    missing_blobs += 1;
                }
            }
        }
    }

    println!("Clipboard History Statistics");
    println!("============================");
    println!("Total entries: {}", records.len());
    println!("  Text: {}", text_count);
    println!("  Links: {}", link_count);
    println!("  Images: {}", image_count);
    if missing_blobs > 0 {
        println!("  Missing image blobs: {}", missing_blobs);
    }
    println!("History file: {:?}", storage.path());
    println!("Blob directory: {:?}", blobs.dir());

    Ok(())
}

/// Delete all history entries and their image blobs
fn cmd_clear() -> Result<()> {
    env_logger::init();

    let (data_dir, _config_dir) = ensure_directories()?;
    let (blobs, storage) = open_storage(&data_dir)?;
    let records = load_history(&storage)?;

    let blob_ids: Vec<_> = records.iter().filter_map(|r| r.blob_id()).collect();
    for blob_id in &blob_ids {
        blobs.delete(*blob_id);
    }

    storage.save(&[]).context("Failed to clear history")?;

    println!(
        "Cleared {} entries and {} image blobs.",
        records.len(),
        blob_ids.len()
    );

    Ok(())
}
