use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::backend::ClipboardBackend;
use crate::models::{HistoryRecord, IMAGE_CAPTION, RecordKind, SourceApp};
use crate::storage::BlobStore;
use crate::store::HistoryStore;

/// Last clipboard generation the watcher has consumed
///
/// Shared between the watcher and `HistoryStore::copy_item`: a copy
/// initiated from history resynchronizes the cursor right after
/// writing, so the watcher never re-captures its own write.
#[derive(Debug, Default)]
pub struct ChangeCursor {
    last_seen: AtomicU64,
}

impl ChangeCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `generation` differs from the last consumed value
    pub fn changed(&self, generation: u64) -> bool {
        self.last_seen.load(Ordering::SeqCst) != generation
    }

    /// Mark `generation` as consumed
    pub fn sync(&self, generation: u64) {
        self.last_seen.store(generation, Ordering::SeqCst);
    }
}

/// Classified clipboard payload, not yet a history record
enum Candidate {
    Text(String),
    Link(String),
    Image { caption: String, bytes: Vec<u8> },
}

/// Polls the system clipboard and turns new content into history
/// records: detect change, classify, dedup against the newest record,
/// persist image bytes to the blob store, insert
pub struct ClipboardWatcher {
    clipboard: Arc<dyn ClipboardBackend>,
    store: Arc<HistoryStore>,
    blobs: Arc<BlobStore>,
    cursor: Arc<ChangeCursor>,
    self_bundle_id: Option<String>,
}

impl ClipboardWatcher {
    pub fn new(
        clipboard: Arc<dyn ClipboardBackend>,
        store: Arc<HistoryStore>,
        blobs: Arc<BlobStore>,
        cursor: Arc<ChangeCursor>,
        self_bundle_id: Option<String>,
    ) -> Self {
        ClipboardWatcher {
            clipboard,
            store,
            blobs,
            cursor,
            self_bundle_id,
        }
    }

    /// One full poll step; callable directly (tests) or from the
    /// polling thread started by [`spawn`](Self::spawn)
    pub fn poll_once(&self) {
        let generation = self.clipboard.current_generation();
        if !self.cursor.changed(generation) {
            return;
        }
        // Consume the generation before classification so an
        // unmatched payload is not re-examined every tick
        self.cursor.sync(generation);

        let source = self.clipboard.frontmost_app();
        if let (Some(own_id), Some(app)) = (&self.self_bundle_id, &source)
            && &app.bundle_id == own_id
        {
            log::debug!("Ignoring clipboard change made by ourselves");
            return;
        }

        let Some(candidate) = self.classify() else {
            return;
        };

        if self.is_duplicate(&candidate) {
            log::debug!("Clipboard content matches newest entry, skipping");
            return;
        }

        let Some(record) = self.build_record(candidate, source) else {
            return;
        };

        log::info!(
            "Captured {:?} clip from {}",
            record.category(),
            record.app_name.as_deref().unwrap_or("unknown app")
        );
        self.store.insert(record);
    }

    /// Classify the current clipboard payload, first match wins:
    /// copied image file, raw image, then string (link or text)
    fn classify(&self) -> Option<Candidate> {
        if let Some(paths) = self.clipboard.read_file_urls()
            && let Some(path) = paths.iter().find(|p| is_image_file(p))
        {
            return match fs::read(path) {
                Ok(bytes) => {
                    let caption = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| IMAGE_CAPTION.to_string());
                    Some(Candidate::Image { caption, bytes })
                }
                Err(e) => {
                    log::warn!("Failed to read copied image file {:?}: {}", path, e);
                    None
                }
            };
        }

        if let Some(bytes) = self.clipboard.read_image() {
            return Some(Candidate::Image {
                caption: IMAGE_CAPTION.to_string(),
                bytes,
            });
        }

        if let Some(text) = self.clipboard.read_text() {
            if text.is_empty() {
                return None;
            }
            return Some(if is_absolute_url(&text) {
                Candidate::Link(text)
            } else {
                Candidate::Text(text)
            });
        }

        None
    }

    /// Compare the candidate against the newest record only
    ///
    /// Text and links compare by content string; images compare by
    /// byte length against the newest record's stored blob, a cheap
    /// proxy for full equality. A missing blob is not a duplicate.
    fn is_duplicate(&self, candidate: &Candidate) -> bool {
        let records = self.store.records();
        let Some(newest) = records.first() else {
            return false;
        };

        match candidate {
            Candidate::Text(text) | Candidate::Link(text) => newest.content == *text,
            Candidate::Image { bytes, .. } => match &newest.kind {
                RecordKind::Image(blob_id) => {
                    self.blobs.load(*blob_id).map(|b| b.len()) == Some(bytes.len())
                }
                _ => false,
            },
        }
    }

    /// Turn a non-duplicate candidate into a record, persisting image
    /// bytes first so an Image record never dangles
    fn build_record(&self, candidate: Candidate, source: Option<SourceApp>) -> Option<HistoryRecord> {
        match candidate {
            Candidate::Text(text) => Some(HistoryRecord::new(text, RecordKind::Text, source)),
            Candidate::Link(url) => {
                Some(HistoryRecord::new(url.clone(), RecordKind::Link(url), source))
            }
            Candidate::Image { caption, bytes } => match self.blobs.save(&bytes) {
                Ok(blob_id) => Some(HistoryRecord::new(
                    caption,
                    RecordKind::Image(blob_id),
                    source,
                )),
                Err(e) => {
                    log::error!("Dropping image clip, blob store rejected it: {}", e);
                    None
                }
            },
        }
    }

    /// Start polling on a background thread every `interval`
    pub fn spawn(self, interval: Duration) -> WatcherHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let handle = thread::spawn(move || {
            log::info!(
                "Clipboard watcher started ({}ms interval)",
                interval.as_millis()
            );
            while !stop_flag.load(Ordering::Relaxed) {
                self.poll_once();
                thread::sleep(interval);
            }
            log::info!("Clipboard watcher stopped");
        });

        WatcherHandle {
            stop,
            handle: Some(handle),
        }
    }
}

/// Handle to a running watcher thread
pub struct WatcherHandle {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl WatcherHandle {
    /// Signal the watcher to stop and wait for it to finish
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Whether the path's extension names a known image format
fn is_image_file(path: &Path) -> bool {
    image::ImageFormat::from_path(path).is_ok()
}

/// Whether `text` is a single absolute URL with a scheme and host
/// (e.g. "https://a.com/x"); anything else is plain text
fn is_absolute_url(text: &str) -> bool {
    if text.contains(char::is_whitespace) {
        return false;
    }

    let Some((scheme, rest)) = text.split_once("://") else {
        return false;
    };

    let scheme_ok = !scheme.is_empty()
        && scheme.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));

    let host = rest.split(['/', '?', '#']).next().unwrap_or("");

    scheme_ok && !host.is_empty()
}
