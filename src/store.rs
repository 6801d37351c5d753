use anyhow::Result;
use image::DynamicImage;
use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use uuid::Uuid;

use crate::clipboard::{ChangeCursor, ClipboardBackend};
use crate::image::{DecodedImageCache, decode_image, decoded_cost};
use crate::models::{HistoryRecord, RecordKind};
use crate::storage::{BlobStore, HistoryStorage};

/// Notification sent to observers after each mutation
///
/// Events carry full snapshots: observers never see a partially
/// mutated collection, and a slow observer only delays itself.
#[derive(Debug, Clone)]
pub enum HistoryEvent {
    /// The ordered record collection changed
    RecordsChanged(Arc<Vec<HistoryRecord>>),
    /// The bundle-id to display-name index changed
    AppNamesChanged(Arc<HashMap<String, String>>),
}

/// Work items for the background save worker
enum SaveJob {
    Persist(Arc<Vec<HistoryRecord>>),
    Flush(Sender<()>),
    Shutdown,
}

struct StoreState {
    /// Ordered collection, newest first
    records: Arc<Vec<HistoryRecord>>,
    /// Derived bundle-id -> display-name index
    app_names: Arc<HashMap<String, String>>,
    observers: Vec<Sender<HistoryEvent>>,
}

/// Authoritative, ordered collection of clipboard history records
///
/// Single writer: every mutation serializes through one internal lock
/// and produces the snapshot observers see next. Saves run on a
/// dedicated worker thread so neither the watcher nor a UI caller
/// blocks on disk I/O; a failed save is logged and the in-memory
/// state stays authoritative until the next save lands.
pub struct HistoryStore {
    state: Mutex<StoreState>,
    save_tx: Sender<SaveJob>,
    worker: Mutex<Option<JoinHandle<()>>>,
    blobs: Arc<BlobStore>,
    images: Arc<DecodedImageCache>,
    clipboard: Arc<dyn ClipboardBackend>,
    cursor: Arc<ChangeCursor>,
}

impl HistoryStore {
    /// Load persisted history and start the save worker
    ///
    /// A load that required legacy migration immediately re-saves in
    /// the current schema, so the next startup decodes directly.
    pub fn open(
        storage: Box<dyn HistoryStorage>,
        blobs: Arc<BlobStore>,
        images: Arc<DecodedImageCache>,
        clipboard: Arc<dyn ClipboardBackend>,
        cursor: Arc<ChangeCursor>,
    ) -> Result<Arc<Self>> {
        let outcome = storage.load()?;

        let (save_tx, save_rx) = mpsc::channel();
        let worker = thread::spawn(move || save_worker(storage, save_rx));

        let records = Arc::new(outcome.records);
        let app_names = Arc::new(build_app_index(&records));

        let store = Arc::new(HistoryStore {
            state: Mutex::new(StoreState {
                records: records.clone(),
                app_names,
                observers: Vec::new(),
            }),
            save_tx,
            worker: Mutex::new(Some(worker)),
            blobs,
            images,
            clipboard,
            cursor,
        });

        if outcome.migrated {
            log::info!("Legacy history migrated, persisting current schema");
            let _ = store.save_tx.send(SaveJob::Persist(records));
        }

        Ok(store)
    }

    /// Snapshot of the current collection, newest first
    pub fn records(&self) -> Arc<Vec<HistoryRecord>> {
        match self.state.lock() {
            Ok(state) => state.records.clone(),
            Err(_) => Arc::new(Vec::new()),
        }
    }

    /// Snapshot of the bundle-id -> display-name index
    pub fn app_names(&self) -> Arc<HashMap<String, String>> {
        match self.state.lock() {
            Ok(state) => state.app_names.clone(),
            Err(_) => Arc::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    /// Subscribe to mutation events; the receiver gets a snapshot
    /// after every collection change
    pub fn subscribe(&self) -> Receiver<HistoryEvent> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut state) = self.state.lock() {
            state.observers.push(tx);
        }
        rx
    }

    /// Prepend a record, notify observers, schedule a save
    pub fn insert(&self, record: HistoryRecord) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let mut records = (*state.records).clone();
        records.insert(0, record);
        self.commit(&mut state, records);
    }

    /// Remove every record whose id is in `ids`; blobs referenced by
    /// removed image records are best-effort deleted
    pub fn delete(&self, ids: &HashSet<Uuid>) {
        let removed_blobs = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            let mut records = (*state.records).clone();
            let mut removed_blobs = Vec::new();

            records.retain(|record| {
                if !ids.contains(&record.id) {
                    return true;
                }
                if let Some(blob_id) = record.blob_id() {
                    removed_blobs.push(blob_id);
                }
                false
            });

            if records.len() == state.records.len() {
                return;
            }
            log::info!("Deleted {} records", state.records.len() - records.len());
            self.commit(&mut state, records);
            removed_blobs
        };

        // Blob I/O happens outside the state lock
        for blob_id in removed_blobs {
            self.images.invalidate(blob_id);
            self.blobs.delete(blob_id);
        }
    }

    /// Remove all records and their blobs
    pub fn clear(&self) {
        let removed_blobs = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            if state.records.is_empty() {
                return;
            }
            let removed_blobs: Vec<Uuid> =
                state.records.iter().filter_map(|r| r.blob_id()).collect();
            log::info!("Cleared {} records", state.records.len());
            self.commit(&mut state, Vec::new());
            removed_blobs
        };

        for blob_id in removed_blobs {
            self.images.invalidate(blob_id);
            self.blobs.delete(blob_id);
        }
    }

    /// Write a record's payload back to the system clipboard
    ///
    /// Text and links go out as strings; an image is loaded from the
    /// blob store, checked to still be decodable, and written as
    /// bytes. On success the shared change cursor is resynchronized
    /// so the watcher does not re-capture our own write.
    pub fn copy_item(&self, record: &HistoryRecord) -> bool {
        let ok = match &record.kind {
            RecordKind::Text | RecordKind::Link(_) => {
                match self.clipboard.write_text(&record.content) {
                    Ok(()) => true,
                    Err(e) => {
                        log::warn!("Failed to write text to clipboard: {}", e);
                        false
                    }
                }
            }
            RecordKind::Image(blob_id) => self.copy_image(*blob_id),
        };

        if ok {
            self.cursor.sync(self.clipboard.current_generation());
            log::debug!("Copied record {} back to clipboard", record.id);
        }
        ok
    }

    fn copy_image(&self, blob_id: Uuid) -> bool {
        let Some(bytes) = self.blobs.load(blob_id) else {
            log::warn!("Blob {} is missing, cannot copy image", blob_id);
            return false;
        };

        if self.decode_cached(blob_id, &bytes).is_none() {
            return false;
        }

        match self.clipboard.write_image(&bytes) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Failed to write image to clipboard: {}", e);
                false
            }
        }
    }

    /// Decoded image for display, served from the cache when warm
    ///
    /// Misses load from the blob store and decode on the caller's
    /// thread, then populate the cache. Returns None when the blob is
    /// missing or undecodable; callers fall back to textual content.
    pub fn decoded_image(&self, blob_id: Uuid) -> Option<Arc<DynamicImage>> {
        if let Some(hit) = self.images.get(blob_id) {
            return Some(hit);
        }
        let bytes = self.blobs.load(blob_id)?;
        self.decode_cached(blob_id, &bytes)
    }

    fn decode_cached(&self, blob_id: Uuid, bytes: &[u8]) -> Option<Arc<DynamicImage>> {
        if let Some(hit) = self.images.get(blob_id) {
            return Some(hit);
        }
        let decoded = Arc::new(decode_image(bytes)?);
        self.images.put(blob_id, decoded.clone(), decoded_cost(&decoded));
        Some(decoded)
    }

    /// Wait until every save scheduled so far has been attempted
    pub fn flush(&self) {
        let (ack_tx, ack_rx) = mpsc::channel();
        if self.save_tx.send(SaveJob::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }

    /// Install the new collection, rebuild the derived index, notify
    /// observers with snapshots, and schedule an asynchronous save
    fn commit(&self, state: &mut StoreState, records: Vec<HistoryRecord>) {
        state.records = Arc::new(records);

        let index = build_app_index(&state.records);
        let index_changed = *state.app_names != index;
        if index_changed {
            state.app_names = Arc::new(index);
        }

        let records_snapshot = state.records.clone();
        state
            .observers
            .retain(|tx| tx.send(HistoryEvent::RecordsChanged(records_snapshot.clone())).is_ok());
        if index_changed {
            let names_snapshot = state.app_names.clone();
            state
                .observers
                .retain(|tx| tx.send(HistoryEvent::AppNamesChanged(names_snapshot.clone())).is_ok());
        }

        let _ = self.save_tx.send(SaveJob::Persist(state.records.clone()));
    }
}

impl Drop for HistoryStore {
    fn drop(&mut self) {
        let _ = self.save_tx.send(SaveJob::Shutdown);
        if let Ok(mut worker) = self.worker.lock()
            && let Some(handle) = worker.take()
        {
            let _ = handle.join();
        }
    }
}

/// Save worker loop: one job at a time, so concurrent mutations never
/// race two renames against each other
fn save_worker(storage: Box<dyn HistoryStorage>, rx: mpsc::Receiver<SaveJob>) {
    log::debug!("History save worker started");
    while let Ok(job) = rx.recv() {
        match job {
            SaveJob::Persist(snapshot) => {
                // Failures are logged, not retried: memory stays the
                // source of truth and the next save reconciles
                if let Err(e) = storage.save(&snapshot) {
                    log::error!("Failed to save history: {:#}", e);
                }
            }
            SaveJob::Flush(ack) => {
                let _ = ack.send(());
            }
            SaveJob::Shutdown => break,
        }
    }
    log::debug!("History save worker exiting");
}

/// Rebuild the bundle-id -> display-name index from the collection
/// Records are newest first, and the first name seen wins
fn build_app_index(records: &[HistoryRecord]) -> HashMap<String, String> {
    let mut index = HashMap::new();
    for record in records {
        if let (Some(bundle_id), Some(name)) = (&record.bundle_id, &record.app_name) {
            index
                .entry(bundle_id.clone())
                .or_insert_with(|| name.clone());
        }
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::memory::MemoryClipboard;
    use crate::models::{IMAGE_CAPTION, SourceApp};
    use crate::storage::{JsonHistoryStorage, LoadOutcome};
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use std::num::NonZeroUsize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        dir: tempfile::TempDir,
        blobs: Arc<BlobStore>,
        images: Arc<DecodedImageCache>,
        clipboard: Arc<MemoryClipboard>,
        cursor: Arc<ChangeCursor>,
        store: Arc<HistoryStore>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let blobs = Arc::new(BlobStore::new(dir.path().join("images")).unwrap());
        let images = Arc::new(DecodedImageCache::new(
            NonZeroUsize::new(10).unwrap(),
            64 << 20,
        ));
        let clipboard = Arc::new(MemoryClipboard::new());
        let cursor = Arc::new(ChangeCursor::new());
        let storage = Box::new(JsonHistoryStorage::new(
            dir.path().join("history.json"),
            blobs.clone(),
        ));
        let store = HistoryStore::open(
            storage,
            blobs.clone(),
            images.clone(),
            clipboard.clone(),
            cursor.clone(),
        )
        .unwrap();
        Fixture {
            dir,
            blobs,
            images,
            clipboard,
            cursor,
            store,
        }
    }

    fn text_record(content: &str) -> HistoryRecord {
        HistoryRecord::new(content.to_string(), RecordKind::Text, None)
    }

    fn png_bytes() -> Vec<u8> {
        let img = DynamicImage::new_rgba8(2, 2);
        let mut bytes = Vec::new();
        img.write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageFormat::Png,
        )
        .unwrap();
        bytes
    }

    #[test]
    fn test_inserts_are_newest_first() {
        let fx = fixture();
        for content in ["one", "two", "three"] {
            fx.store.insert(text_record(content));
        }

        let records = fx.store.records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].content, "three");
        assert_eq!(records[2].content, "one");
    }

    #[test]
    fn test_observers_see_each_snapshot() {
        let fx = fixture();
        let rx = fx.store.subscribe();

        fx.store.insert(text_record("a"));
        fx.store.insert(text_record("b"));

        let HistoryEvent::RecordsChanged(first) = rx.recv().unwrap() else {
            panic!("expected records event");
        };
        assert_eq!(first.len(), 1);

        let HistoryEvent::RecordsChanged(second) = rx.recv().unwrap() else {
            panic!("expected records event");
        };
        assert_eq!(second.len(), 2);
        assert_eq!(second[0].content, "b");
    }

    #[test]
    fn test_delete_removes_records_and_blobs() {
        let fx = fixture();
        let blob_id = fx.blobs.save(&png_bytes()).unwrap();
        let image = HistoryRecord::new(
            IMAGE_CAPTION.to_string(),
            RecordKind::Image(blob_id),
            None,
        );
        let image_id = image.id;
        fx.store.insert(image.clone());
        fx.store.insert(text_record("keep me"));

        // Warm the decode cache so we can observe invalidation
        assert!(fx.store.decoded_image(blob_id).is_some());
        assert_eq!(fx.images.len(), 1);

        fx.store.delete(&HashSet::from([image_id]));

        let records = fx.store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].content, "keep me");
        assert_eq!(fx.blobs.load(blob_id), None);
        assert_eq!(fx.images.len(), 0);
    }

    #[test]
    fn test_delete_of_unknown_id_changes_nothing() {
        let fx = fixture();
        fx.store.insert(text_record("stay"));
        let rx = fx.store.subscribe();

        fx.store.delete(&HashSet::from([Uuid::new_v4()]));

        assert_eq!(fx.store.len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_clear_removes_everything() {
        let fx = fixture();
        let blob_id = fx.blobs.save(b"bytes").unwrap();
        fx.store.insert(HistoryRecord::new(
            IMAGE_CAPTION.to_string(),
            RecordKind::Image(blob_id),
            None,
        ));
        fx.store.insert(text_record("text"));

        fx.store.clear();

        assert!(fx.store.is_empty());
        assert_eq!(fx.blobs.load(blob_id), None);
    }

    #[test]
    fn test_saves_round_trip_through_storage() {
        let fx = fixture();
        fx.store.insert(text_record("persisted"));
        fx.store.flush();

        let reread = JsonHistoryStorage::new(
            fx.dir.path().join("history.json"),
            fx.blobs.clone(),
        );
        let outcome = reread.load().unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].content, "persisted");
        assert!(!outcome.migrated);
    }

    #[test]
    fn test_copy_text_resynchronizes_cursor() {
        let fx = fixture();
        let record = text_record("copy me");
        fx.store.insert(record.clone());

        assert!(fx.store.copy_item(&record));
        assert_eq!(fx.clipboard.text().as_deref(), Some("copy me"));
        // The write bumped the generation, but the cursor followed
        assert!(!fx.cursor.changed(fx.clipboard.current_generation()));
    }

    #[test]
    fn test_copy_image_writes_blob_bytes() {
        let fx = fixture();
        let bytes = png_bytes();
        let blob_id = fx.blobs.save(&bytes).unwrap();
        let record = HistoryRecord::new(
            IMAGE_CAPTION.to_string(),
            RecordKind::Image(blob_id),
            None,
        );
        fx.store.insert(record.clone());

        assert!(fx.store.copy_item(&record));
        assert_eq!(fx.clipboard.image(), Some(bytes));
    }

    #[test]
    fn test_copy_image_with_missing_blob_fails() {
        let fx = fixture();
        let record = HistoryRecord::new(
            IMAGE_CAPTION.to_string(),
            RecordKind::Image(Uuid::new_v4()),
            None,
        );
        assert!(!fx.store.copy_item(&record));
        assert_eq!(fx.clipboard.image(), None);
    }

    #[test]
    fn test_copy_image_with_undecodable_blob_fails() {
        let fx = fixture();
        let blob_id = fx.blobs.save(b"not an image").unwrap();
        let record = HistoryRecord::new(
            IMAGE_CAPTION.to_string(),
            RecordKind::Image(blob_id),
            None,
        );
        assert!(!fx.store.copy_item(&record));
    }

    #[test]
    fn test_decoded_image_populates_cache() {
        let fx = fixture();
        let blob_id = fx.blobs.save(&png_bytes()).unwrap();

        assert_eq!(fx.images.len(), 0);
        assert!(fx.store.decoded_image(blob_id).is_some());
        assert_eq!(fx.images.len(), 1);

        // Second call is a cache hit even if the blob disappears
        fx.blobs.delete(blob_id);
        assert!(fx.store.decoded_image(blob_id).is_some());
    }

    #[test]
    fn test_app_name_index_first_seen_wins() {
        let fx = fixture();
        fx.store.insert(HistoryRecord::new(
            "older".to_string(),
            RecordKind::Text,
            Some(SourceApp::new("com.example.editor", "Old Name")),
        ));
        fx.store.insert(HistoryRecord::new(
            "newer".to_string(),
            RecordKind::Text,
            Some(SourceApp::new("com.example.editor", "New Name")),
        ));
        fx.store.insert(HistoryRecord::new(
            "other".to_string(),
            RecordKind::Text,
            Some(SourceApp::new("com.example.term", "Terminal")),
        ));

        let names = fx.store.app_names();
        assert_eq!(names.len(), 2);
        // Newest-first iteration: the newest record's name wins
        assert_eq!(names["com.example.editor"], "New Name");
        assert_eq!(names["com.example.term"], "Terminal");
    }

    #[test]
    fn test_app_names_event_only_when_index_changes() {
        let fx = fixture();
        let rx = fx.store.subscribe();

        fx.store.insert(HistoryRecord::new(
            "a".to_string(),
            RecordKind::Text,
            Some(SourceApp::new("com.example.editor", "Editor")),
        ));

        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], HistoryEvent::RecordsChanged(_)));
        let HistoryEvent::AppNamesChanged(names) = &events[1] else {
            panic!("expected app names event");
        };
        assert_eq!(names["com.example.editor"], "Editor");

        // A sourceless insert leaves the index alone
        fx.store.insert(text_record("b"));
        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], HistoryEvent::RecordsChanged(_)));
    }

    /// Storage double that counts saves, for migration re-save checks
    struct CountingStorage {
        inner: JsonHistoryStorage,
        saves: Arc<AtomicUsize>,
    }

    impl HistoryStorage for CountingStorage {
        fn load(&self) -> Result<LoadOutcome> {
            self.inner.load()
        }

        fn save(&self, records: &[HistoryRecord]) -> Result<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            self.inner.save(records)
        }

        fn path(&self) -> &std::path::PathBuf {
            self.inner.path()
        }
    }

    #[test]
    fn test_legacy_load_triggers_exactly_one_resave() {
        let dir = tempfile::tempdir().unwrap();
        let history_path = dir.path().join("history.json");
        let payload = BASE64.encode(b"legacy image");
        let legacy_json = format!(
            r#"[{{"id": "{}", "content": "Image Clip", "type": {{"image": "{}"}}, "date": "2024-03-01T10:00:00Z"}}]"#,
            Uuid::new_v4(),
            payload
        );
        std::fs::write(&history_path, legacy_json).unwrap();

        let blobs = Arc::new(BlobStore::new(dir.path().join("images")).unwrap());
        let saves = Arc::new(AtomicUsize::new(0));
        let storage = Box::new(CountingStorage {
            inner: JsonHistoryStorage::new(history_path.clone(), blobs.clone()),
            saves: saves.clone(),
        });

        let store = HistoryStore::open(
            storage,
            blobs.clone(),
            Arc::new(DecodedImageCache::new(NonZeroUsize::new(4).unwrap(), 1 << 20)),
            Arc::new(MemoryClipboard::new()),
            Arc::new(ChangeCursor::new()),
        )
        .unwrap();
        store.flush();

        assert_eq!(saves.load(Ordering::SeqCst), 1);

        let records = store.records();
        assert_eq!(records.len(), 1);
        let blob_id = records[0].blob_id().expect("migrated image record");
        assert_eq!(blobs.load(blob_id), Some(b"legacy image".to_vec()));

        // The re-save left a current-schema file behind
        drop(store);
        let reread = JsonHistoryStorage::new(history_path, blobs);
        let outcome = reread.load().unwrap();
        assert!(!outcome.migrated);
        assert_eq!(outcome.records.len(), 1);
    }
}
