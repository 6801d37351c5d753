use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use crate::models::{HistoryRecord, LegacyKind, LegacyRecord, RecordKind};
use crate::storage::BlobStore;

/// Result of loading persisted history
pub struct LoadOutcome {
    /// Records in stored order (newest first)
    pub records: Vec<HistoryRecord>,
    /// True when the file was decoded via the legacy schema and the
    /// caller should immediately re-save in the current schema
    pub migrated: bool,
}

impl LoadOutcome {
    fn empty() -> Self {
        LoadOutcome {
            records: Vec::new(),
            migrated: false,
        }
    }
}

/// Trait for clipboard history persistence
pub trait HistoryStorage: Send + Sync {
    /// Load clipboard history from storage, migrating if needed
    fn load(&self) -> Result<LoadOutcome>;

    /// Save the full ordered collection to storage
    fn save(&self, records: &[HistoryRecord]) -> Result<()>;

    /// Get the storage file path
    fn path(&self) -> &PathBuf;
}

/// JSON-based implementation of HistoryStorage
///
/// Decode order on load: current schema first, then the legacy schema
/// (image payloads embedded as base64), then give up and start empty.
/// Legacy image payloads are moved into the blob store during decode.
/// Saves use the atomic write pattern with a .tmp file for safety.
pub struct JsonHistoryStorage {
    path: PathBuf,
    blobs: Arc<BlobStore>,
}

impl JsonHistoryStorage {
    /// Create a new JsonHistoryStorage persisting to `path`, with
    /// `blobs` receiving any payloads extracted during migration
    pub fn new(path: PathBuf, blobs: Arc<BlobStore>) -> Self {
        JsonHistoryStorage { path, blobs }
    }

    /// Convert legacy records to the current schema, extracting
    /// embedded image bytes into the blob store
    ///
    /// A record whose payload cannot be decoded or persisted is
    /// dropped (logged) rather than stored with a dangling reference.
    fn migrate(&self, legacy: Vec<LegacyRecord>) -> Vec<HistoryRecord> {
        let mut records = Vec::with_capacity(legacy.len());

        for item in legacy {
            let kind = match &item.kind {
                LegacyKind::Text => RecordKind::Text,
                LegacyKind::Link(url) => RecordKind::Link(url.clone()),
                LegacyKind::Image(_) => {
                    let bytes = match item.embedded_bytes() {
                        Some(Ok(bytes)) => bytes,
                        Some(Err(e)) => {
                            log::warn!(
                                "Dropping legacy record {}: malformed image payload: {}",
                                item.id,
                                e
                            );
                            continue;
                        }
                        None => continue,
                    };

                    match self.blobs.save(&bytes) {
                        Ok(blob_id) => RecordKind::Image(blob_id),
                        Err(e) => {
                            log::error!(
                                "Dropping legacy record {}: failed to store image payload: {}",
                                item.id,
                                e
                            );
                            continue;
                        }
                    }
                }
            };

            records.push(HistoryRecord::from_parts(
                item.id,
                item.content,
                kind,
                item.timestamp,
                item.bundle_id,
                item.app_name,
            ));
        }

        records
    }
}

impl HistoryStorage for JsonHistoryStorage {
    fn load(&self) -> Result<LoadOutcome> {
        // If file doesn't exist, return empty history
        if !self.path.exists() {
            log::info!(
                "History file not found at {:?}, starting with empty history",
                self.path
            );
            return Ok(LoadOutcome::empty());
        }

        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!(
                    "Failed to read history from {:?}, starting empty: {}",
                    self.path,
                    e
                );
                return Ok(LoadOutcome::empty());
            }
        };

        // Current schema first: a legacy file fails here because its
        // embedded image payloads are not valid blob ids
        match serde_json::from_slice::<Vec<HistoryRecord>>(&bytes) {
            Ok(records) => {
                log::info!("Loaded {} records from {:?}", records.len(), self.path);
                return Ok(LoadOutcome {
                    records,
                    migrated: false,
                });
            }
            Err(e) => {
                log::debug!("Current schema decode failed, trying legacy: {}", e);
            }
        }

        // Legacy fallback: image bytes embedded as base64
        match serde_json::from_slice::<Vec<LegacyRecord>>(&bytes) {
            Ok(legacy) => {
                let total = legacy.len();
                let records = self.migrate(legacy);
                log::info!(
                    "Migrated {} of {} legacy records from {:?}",
                    records.len(),
                    total,
                    self.path
                );
                Ok(LoadOutcome {
                    records,
                    migrated: true,
                })
            }
            Err(e) => {
                // Corrupted file - back it up and start empty
                let backup_path = self.path.with_extension("json.corrupted");
                log::warn!(
                    "History file unreadable in any schema, backing up to {:?}: {}",
                    backup_path,
                    e
                );

                if let Err(backup_err) = fs::rename(&self.path, &backup_path) {
                    log::error!("Failed to backup corrupted file: {}", backup_err);
                }

                Ok(LoadOutcome::empty())
            }
        }
    }

    fn save(&self, records: &[HistoryRecord]) -> Result<()> {
        let bytes =
            serde_json::to_vec(records).with_context(|| "Failed to serialize clipboard history")?;

        // Atomic write pattern: write to .tmp, then rename
        let tmp_path = self.path.with_extension("json.tmp");

        // Ensure parent directory exists
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        fs::write(&tmp_path, &bytes)
            .with_context(|| format!("Failed to write to temporary file {:?}", tmp_path))?;

        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to rename {:?} to {:?}", tmp_path, self.path))?;

        log::debug!("Saved {} records to {:?}", records.len(), self.path);

        Ok(())
    }

    fn path(&self) -> &PathBuf {
        &self.path
    }
}
