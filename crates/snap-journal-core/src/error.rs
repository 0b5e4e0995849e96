//! Error taxonomy shared by every storage, coordinate, and render operation.
//!
//! Each variant is scoped to the operation that raised it; none of them is
//! meant to abort the whole process. See [`SnapError::is_recoverable`] for
//! which conditions callers are expected to handle automatically.

/// Errors raised by the core library.
#[derive(Debug, thiserror::Error)]
pub enum SnapError {
    /// The capture collaborator could not produce an image.
    #[error("capture failed: {0}")]
    CaptureFailed(String),

    /// The small-quota record store rejected a write.
    #[error("record store quota exceeded: {needed} bytes needed, {available} available")]
    QuotaExceeded { needed: u64, available: u64 },

    /// Quota recovery by tiering failed; the record was not saved.
    #[error("storage exhausted while saving {record_id}: {reason}")]
    StorageExhausted { record_id: String, reason: String },

    /// The blob backing an external payload is gone.
    #[error("payload missing for {record_id}")]
    PayloadMissing { record_id: String },

    /// Flattening or placing one page failed.
    #[error("render failed for {record_id}: {reason}")]
    RenderFailure { record_id: String, reason: String },

    /// The blob store could not be opened or is disabled for this session.
    #[error("blob store unavailable: {0}")]
    StorageUnavailable(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Opaque failure reported by a storage backend.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl SnapError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        SnapError::Backend(err.to_string())
    }

    /// True for conditions the core recovers from (or degrades around)
    /// without surfacing a hard failure to the user.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SnapError::QuotaExceeded { .. }
                | SnapError::PayloadMissing { .. }
                | SnapError::RenderFailure { .. }
        )
    }
}

pub type SnapResult<T> = std::result::Result<T, SnapError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_exceeded_is_recoverable_but_exhaustion_is_not() {
        let quota = SnapError::QuotaExceeded {
            needed: 10,
            available: 2,
        };
        assert!(quota.is_recoverable());

        let exhausted = SnapError::StorageExhausted {
            record_id: "screenshot_1".into(),
            reason: "blob store unavailable".into(),
        };
        assert!(!exhausted.is_recoverable());
        assert!(exhausted.to_string().contains("screenshot_1"));
    }
}
