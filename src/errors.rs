use thiserror::Error;

/// Errors raised by the conversation store and its persistence backends.
///
/// Unknown conversation ids are not errors: lookups return `None` and mutations
/// return `false`. Variants here cover failures the caller has to act on.
#[derive(Debug, Error)]
pub enum StoreError {
    // ── Backend errors ───────────────────────────────────────────────────────
    #[error("Failed to read '{key}' from storage: {message}")]
    StorageRead {
        key: String,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Failed to write '{key}' to storage: {message}")]
    StorageWrite {
        key: String,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ── Serialization errors ─────────────────────────────────────────────────
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    // ── Configuration errors ─────────────────────────────────────────────────
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Conversation errors ──────────────────────────────────────────────────
    #[error("Conversation '{id}' not found")]
    ConversationNotFound { id: String },
}

/// Result alias used across the crate.
pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn read(key: impl Into<String>, source: std::io::Error) -> Self {
        StoreError::StorageRead {
            key: key.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    pub fn write(key: impl Into<String>, source: std::io::Error) -> Self {
        StoreError::StorageWrite {
            key: key.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::ConversationNotFound { .. })
    }

    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            StoreError::StorageRead { .. } | StoreError::StorageWrite { .. } | StoreError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_helpers_keep_key_and_source() {
        let err = StoreError::write(
            "ai_chat_history",
            std::io::Error::new(std::io::ErrorKind::Other, "quota exceeded"),
        );
        assert!(err.is_storage());
        assert!(!err.is_not_found());
        assert_eq!(
            err.to_string(),
            "Failed to write 'ai_chat_history' to storage: quota exceeded"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn not_found_predicate() {
        let err = StoreError::ConversationNotFound { id: "abc".into() };
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Conversation 'abc' not found");
    }
}
