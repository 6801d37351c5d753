use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::StorageError;

/// File-per-blob storage for large binary payloads (images)
///
/// Blobs are addressed by a generated v4 uuid and stored as raw bytes
/// with no header, one file per blob, named by the id. Writes go to a
/// `.tmp` sibling first and are renamed into place so a partially
/// written file is never visible under its final name.
///
/// Holds only the directory path; every operation is a per-file OS
/// call, so the store is safe to share across threads as-is.
pub struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    /// Open (creating if needed) a blob store rooted at `dir`
    pub fn new(dir: PathBuf) -> Result<Self, StorageError> {
        fs::create_dir_all(&dir).map_err(|source| StorageError::DirectoryUnavailable {
            path: dir.clone(),
            source,
        })?;
        log::debug!("Blob directory: {:?}", dir);
        Ok(BlobStore { dir })
    }

    /// Persist `bytes` under a fresh id and return that id
    pub fn save(&self, bytes: &[u8]) -> Result<Uuid, StorageError> {
        let id = Uuid::new_v4();
        let path = self.blob_path(id);
        let tmp_path = path.with_extension("tmp");

        fs::write(&tmp_path, bytes).map_err(|source| StorageError::Write {
            path: tmp_path.clone(),
            source,
        })?;

        fs::rename(&tmp_path, &path).map_err(|source| StorageError::Rename {
            from: tmp_path,
            to: path,
            source,
        })?;

        log::debug!("Stored {} byte blob as {}", bytes.len(), id);
        Ok(id)
    }

    /// Read a blob's bytes; absence is not an error
    ///
    /// A deleted-but-still-referenced blob is a recoverable state the
    /// caller reports, so missing files come back as None.
    pub fn load(&self, id: Uuid) -> Option<Vec<u8>> {
        let path = self.blob_path(id);
        match fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::debug!("Blob {} not found", id);
                None
            }
            Err(e) => {
                log::warn!("Failed to read blob {}: {}", id, e);
                None
            }
        }
    }

    /// Best-effort removal; a missing file is not an error
    pub fn delete(&self, id: Uuid) {
        let path = self.blob_path(id);
        match fs::remove_file(&path) {
            Ok(()) => log::debug!("Deleted blob {}", id),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to delete blob {}: {}", id, e),
        }
    }

    /// Whether a blob file currently exists for `id`
    pub fn contains(&self, id: Uuid) -> bool {
        self.blob_path(id).exists()
    }

    /// The directory blobs are stored in
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn blob_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, BlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path().join("images")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_save_load_round_trip() {
        let (_dir, store) = temp_store();

        let id = store.save(b"blob bytes").unwrap();
        assert_eq!(store.load(id), Some(b"blob bytes".to_vec()));
        assert!(store.contains(id));
    }

    #[test]
    fn test_delete_makes_blob_unloadable() {
        let (_dir, store) = temp_store();

        let id = store.save(b"ephemeral").unwrap();
        store.delete(id);
        assert_eq!(store.load(id), None);
        assert!(!store.contains(id));
    }

    #[test]
    fn test_load_absent_id_is_none() {
        let (_dir, store) = temp_store();
        assert_eq!(store.load(Uuid::new_v4()), None);
    }

    #[test]
    fn test_delete_absent_id_is_silent() {
        let (_dir, store) = temp_store();
        store.delete(Uuid::new_v4());
    }

    #[test]
    fn test_save_leaves_no_temp_files() {
        let (_dir, store) = temp_store();
        store.save(b"first").unwrap();
        store.save(b"second").unwrap();

        let leftovers: Vec<_> = fs::read_dir(store.dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_ids_are_unique_per_save() {
        let (_dir, store) = temp_store();
        let a = store.save(b"same").unwrap();
        let b = store.save(b"same").unwrap();
        assert_ne!(a, b);
    }
}
