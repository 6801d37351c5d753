use std::path::PathBuf;

/// Storage errors raised by the blob store and metadata persistence
/// Covers disk full, permission denied, and missing-path conditions;
/// callers log these at the component boundary and keep prior state
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage directory unavailable: {path:?}")]
    DirectoryUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path:?}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to rename {from:?} to {to:?}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
