use anyhow::{Context, Result, anyhow};
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::backend::ClipboardBackend;
use crate::models::SourceApp;

/// Wayland clipboard backend using wl-clipboard tools
/// Requires wl-copy and wl-paste to be installed
///
/// Change detection: a `wl-paste --watch` child process emits one line
/// per clipboard change; a reader thread turns those lines into an
/// atomic generation counter, so polling the counter never touches
/// clipboard payloads. wl-paste fires once immediately on startup,
/// which also captures whatever was on the clipboard already.
pub struct WaylandBackend {
    generation: Arc<AtomicU64>,
    watch_child: Option<Child>,
}

impl WaylandBackend {
    /// Create a new Wayland clipboard backend
    pub fn new() -> Result<Self> {
        // Verify wl-copy and wl-paste are available
        Command::new("wl-copy")
            .arg("--version")
            .output()
            .context("wl-copy not found. Install wl-clipboard package")?;
        Command::new("wl-paste")
            .arg("--version")
            .output()
            .context("wl-paste not found. Install wl-clipboard package")?;

        let generation = Arc::new(AtomicU64::new(0));
        let watch_child = Self::spawn_change_watcher(generation.clone())?;

        log::debug!("WaylandBackend initialized successfully");
        Ok(WaylandBackend {
            generation,
            watch_child: Some(watch_child),
        })
    }

    /// Spawn `wl-paste --watch echo changed` and count its output lines
    fn spawn_change_watcher(generation: Arc<AtomicU64>) -> Result<Child> {
        let mut child = Command::new("wl-paste")
            .arg("--watch")
            .arg("echo")
            .arg("changed")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .context("Failed to spawn wl-paste change watcher")?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("wl-paste change watcher has no stdout"))?;

        std::thread::spawn(move || {
            log::debug!("Clipboard change watcher thread started");
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                if line.is_err() {
                    break;
                }
                let new = generation.fetch_add(1, Ordering::SeqCst) + 1;
                log::debug!("Clipboard generation advanced to {}", new);
            }
            log::debug!("Clipboard change watcher thread exiting");
        });

        Ok(child)
    }

    /// Run wl-paste for one MIME type and capture its stdout
    fn paste_type(&self, mime: &str) -> Option<Vec<u8>> {
        let output = Command::new("wl-paste")
            .arg("--no-newline")
            .arg("--type")
            .arg(mime)
            .stdin(Stdio::null())
            .output();

        match output {
            // wl-paste exits nonzero when the type is not offered
            Ok(out) if out.status.success() && !out.stdout.is_empty() => Some(out.stdout),
            Ok(_) => None,
            Err(e) => {
                log::warn!("Failed to run wl-paste for {}: {}", mime, e);
                None
            }
        }
    }
}

impl Drop for WaylandBackend {
    fn drop(&mut self) {
        if let Some(mut child) = self.watch_child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl ClipboardBackend for WaylandBackend {
    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn read_text(&self) -> Option<String> {
        let bytes = self.paste_type("text/plain")?;
        match String::from_utf8(bytes) {
            Ok(text) => Some(text),
            Err(e) => {
                log::warn!("Clipboard text is not valid UTF-8: {}", e);
                None
            }
        }
    }

    fn read_image(&self) -> Option<Vec<u8>> {
        self.paste_type("image/png")
    }

    fn read_file_urls(&self) -> Option<Vec<PathBuf>> {
        let bytes = self.paste_type("text/uri-list")?;
        let text = String::from_utf8(bytes).ok()?;

        let paths: Vec<PathBuf> = text
            .lines()
            .filter_map(|line| line.trim().strip_prefix("file://"))
            .map(PathBuf::from)
            .collect();

        if paths.is_empty() { None } else { Some(paths) }
    }

    fn write_text(&self, text: &str) -> Result<()> {
        let mut child = Command::new("wl-copy")
            .arg("--type")
            .arg("text/plain")
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .context("Failed to spawn wl-copy")?;

        let status = child.wait().context("Failed to wait for wl-copy")?;

        if !status.success() {
            return Err(anyhow!("wl-copy failed with status: {}", status));
        }

        log::debug!("Wrote {} bytes text to clipboard", text.len());
        Ok(())
    }

    fn write_image(&self, data: &[u8]) -> Result<()> {
        let mut child = Command::new("wl-copy")
            .arg("--type")
            .arg("image/png")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .context("Failed to spawn wl-copy for image")?;

        use std::io::Write;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(data)
                .context("Failed to write image to wl-copy stdin")?;
        }

        let status = child.wait().context("Failed to wait for wl-copy")?;

        if !status.success() {
            return Err(anyhow!("wl-copy failed with status: {}", status));
        }

        log::debug!("Wrote {} bytes image to clipboard", data.len());
        Ok(())
    }

    fn frontmost_app(&self) -> Option<SourceApp> {
        // Wayland offers no portable foreground-app query; records
        // captured here carry no source application
        None
    }

    fn supports_images(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "Wayland"
    }
}
