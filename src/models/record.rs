use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Caption used for raw image payloads with no originating filename
pub const IMAGE_CAPTION: &str = "Image Clip";

/// Application that was frontmost when a clip was captured
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceApp {
    /// Stable application identifier (e.g. reverse-DNS bundle id)
    pub bundle_id: String,
    /// Human-readable application name
    pub name: String,
}

impl SourceApp {
    pub fn new(bundle_id: impl Into<String>, name: impl Into<String>) -> Self {
        SourceApp {
            bundle_id: bundle_id.into(),
            name: name.into(),
        }
    }
}

/// Payload classification for a history record
///
/// `Image` holds only a blob id; raw bytes never live in the record.
/// Externally tagged serde representation matches the on-disk schema:
/// `"text"`, `{"link": "<url>"}`, `{"image": "<uuid>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Text,
    Link(String),
    Image(Uuid),
}

/// Display category derived from the record kind (never persisted)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Text,
    Link,
    Image,
}

impl Category {
    pub fn label(&self) -> &'static str {
        match self {
            Category::Text => "Text",
            Category::Link => "Links",
            Category::Image => "Images",
        }
    }
}

/// A single clipboard history entry with metadata
///
/// Serialized field names are the canonical on-disk schema; do not
/// rename them without a migration path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Unique identifier, assigned at creation, never reused
    pub id: Uuid,
    /// Human-readable content: the text itself, the URL string, or an
    /// image caption (filename or generic caption)
    pub content: String,
    /// Payload classification, immutable after creation
    #[serde(rename = "type")]
    pub kind: RecordKind,
    /// Creation time, immutable
    #[serde(rename = "date")]
    pub timestamp: DateTime<Utc>,
    /// Identifier of the application the clip came from, if known
    #[serde(
        rename = "appBundleID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub bundle_id: Option<String>,
    /// Display name of the application the clip came from, if known
    #[serde(rename = "appName", default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
}

impl HistoryRecord {
    /// Create a new record captured right now with a fresh id
    pub fn new(content: String, kind: RecordKind, source: Option<SourceApp>) -> Self {
        let (bundle_id, app_name) = match source {
            Some(app) => (Some(app.bundle_id), Some(app.name)),
            None => (None, None),
        };
        HistoryRecord {
            id: Uuid::new_v4(),
            content,
            kind,
            timestamp: Utc::now(),
            bundle_id,
            app_name,
        }
    }

    /// Rebuild a record from persisted parts, preserving identity
    pub fn from_parts(
        id: Uuid,
        content: String,
        kind: RecordKind,
        timestamp: DateTime<Utc>,
        bundle_id: Option<String>,
        app_name: Option<String>,
    ) -> Self {
        HistoryRecord {
            id,
            content,
            kind,
            timestamp,
            bundle_id,
            app_name,
        }
    }

    /// Category for filtering, derived from the kind
    pub fn category(&self) -> Category {
        match self.kind {
            RecordKind::Text => Category::Text,
            RecordKind::Link(_) => Category::Link,
            RecordKind::Image(_) => Category::Image,
        }
    }

    /// Blob id if this record references out-of-line image bytes
    pub fn blob_id(&self) -> Option<Uuid> {
        match self.kind {
            RecordKind::Image(id) => Some(id),
            _ => None,
        }
    }

    /// Get a preview string (first line, truncated for display)
    pub fn preview(&self, max_len: usize) -> String {
        let line = self.content.lines().next().unwrap_or("");
        if line.len() > max_len {
            let cut = line
                .char_indices()
                .take_while(|(i, _)| *i < max_len)
                .map(|(i, c)| i + c.len_utf8())
                .last()
                .unwrap_or(0);
            format!("{}...", &line[..cut])
        } else {
            line.to_string()
        }
    }
}

/// Legacy payload classification: the image variant embeds base64
/// bytes instead of a blob reference
///
/// A legacy file is told apart from the current schema by uuid
/// validity: the current decoder types the image payload as `Uuid`,
/// which a base64 body fails to parse.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegacyKind {
    Text,
    Link(String),
    Image(String),
}

/// Pre-blob-store record shape, decoded only for migration
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyRecord {
    pub id: Uuid,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: LegacyKind,
    #[serde(rename = "date")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "appBundleID", default)]
    pub bundle_id: Option<String>,
    #[serde(rename = "appName", default)]
    pub app_name: Option<String>,
}

impl LegacyRecord {
    /// Decode the embedded image payload, if this is an image record
    /// Returns None for text/link records, Err on malformed base64
    pub fn embedded_bytes(&self) -> Option<Result<Vec<u8>, base64::DecodeError>> {
        match &self.kind {
            LegacyKind::Image(payload) => Some(BASE64.decode(payload)),
            _ => None,
        }
    }
}
