// ❗ Error Taxonomy - Library-level failures
// Data-quality rejections and NO_DATA outcomes are values, not errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown price source: {0}")]
    UnknownSource(String),

    /// Snapshot file missing or a row that cannot be read
    #[error("Snapshot error ({path}): {message}")]
    Snapshot { path: String, message: String },

    /// Item record missing a mandatory field; the item is skipped
    #[error("Malformed record {item_id}: {reason}")]
    MalformedRecord { item_id: String, reason: String },

    /// Item processing panicked; isolated by the batch driver and skipped
    #[error("Item {item_id} panicked: {message}")]
    ItemPanicked { item_id: String, message: String },
}
