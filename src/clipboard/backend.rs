use anyhow::Result;
use std::path::PathBuf;

use crate::models::SourceApp;

/// Trait for clipboard backend abstraction
/// Supports different clipboard systems (Wayland, X11, in-memory)
///
/// Reads are polled by the watcher; writes are used to copy selected
/// history entries back to the clipboard. `current_generation` is a
/// monotonically increasing counter that moves whenever the clipboard
/// content changes, letting the watcher poll cheaply without reading
/// payloads.
pub trait ClipboardBackend: Send + Sync {
    /// Current clipboard generation counter
    fn current_generation(&self) -> u64;

    /// Read plain text from the clipboard, if present
    fn read_text(&self) -> Option<String>;

    /// Read a raw image payload from the clipboard, if present
    fn read_image(&self) -> Option<Vec<u8>>;

    /// Read copied file paths from the clipboard, if present
    fn read_file_urls(&self) -> Option<Vec<PathBuf>>;

    /// Write text to clipboard
    fn write_text(&self, text: &str) -> Result<()>;

    /// Write image bytes to clipboard (PNG format)
    fn write_image(&self, data: &[u8]) -> Result<()>;

    /// Application that currently owns the foreground, if knowable
    fn frontmost_app(&self) -> Option<SourceApp>;

    /// Check if this backend supports image operations
    fn supports_images(&self) -> bool;

    /// Get the backend name (for logging/debugging)
    fn name(&self) -> &'static str;
}
