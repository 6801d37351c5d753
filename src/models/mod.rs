pub mod record;

pub use record::{Category, HistoryRecord, IMAGE_CAPTION, LegacyKind, LegacyRecord, RecordKind, SourceApp};
