use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{StoreError, StoreResult};

pub const DEFAULT_STORAGE_KEY: &str = "ai_chat_history";
pub const DEFAULT_MAX_CONVERSATIONS: usize = 50;
pub const DEFAULT_MAX_MESSAGES: usize = 100;
pub const DEFAULT_MODEL: &str = "tinyllama";
pub const DEFAULT_TITLE: &str = "New Chat";

/// Limits and defaults applied by [`crate::ConversationStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Key under which the whole root record is persisted.
    pub storage_key: String,
    pub max_conversations: usize,
    pub max_messages_per_conversation: usize,
    /// Model assigned to newly created conversations.
    pub default_model: String,
    pub default_title: String,
    /// Written into the persisted settings block; the store always saves eagerly.
    pub auto_save: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            max_conversations: DEFAULT_MAX_CONVERSATIONS,
            max_messages_per_conversation: DEFAULT_MAX_MESSAGES,
            default_model: DEFAULT_MODEL.to_string(),
            default_title: DEFAULT_TITLE.to_string(),
            auto_save: true,
        }
    }
}

impl StoreConfig {
    /// Builds a config from `CHAT_HISTORY_*` environment variables, falling back
    /// to the defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            storage_key: std::env::var("CHAT_HISTORY_KEY").unwrap_or(defaults.storage_key),
            max_conversations: std::env::var("CHAT_HISTORY_MAX_CONVERSATIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_conversations),
            max_messages_per_conversation: std::env::var("CHAT_HISTORY_MAX_MESSAGES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_messages_per_conversation),
            default_model: std::env::var("CHAT_HISTORY_MODEL").unwrap_or(defaults.default_model),
            default_title: defaults.default_title,
            auto_save: defaults.auto_save,
        }
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.storage_key.trim().is_empty() {
            return Err(StoreError::InvalidConfig(
                "storage_key must not be empty".to_string(),
            ));
        }
        if self.max_conversations == 0 {
            return Err(StoreError::InvalidConfig(
                "max_conversations must be > 0".to_string(),
            ));
        }
        if self.max_messages_per_conversation == 0 {
            return Err(StoreError::InvalidConfig(
                "max_messages_per_conversation must be > 0".to_string(),
            ));
        }
        if self.default_model.trim().is_empty() {
            return Err(StoreError::InvalidConfig(
                "default_model must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Directory holding the file backend, from `CHAT_HISTORY_DIR` or `./.chat_history`.
pub fn data_dir_from_env() -> PathBuf {
    std::env::var("CHAT_HISTORY_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(".chat_history"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_limits() {
        let config = StoreConfig::default();
        assert_eq!(config.storage_key, "ai_chat_history");
        assert_eq!(config.max_conversations, 50);
        assert_eq!(config.max_messages_per_conversation, 100);
        assert_eq!(config.default_model, "tinyllama");
        assert_eq!(config.default_title, "New Chat");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_limits_are_rejected() {
        let config = StoreConfig {
            max_conversations: 0,
            ..StoreConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(StoreError::InvalidConfig(_))
        ));

        let config = StoreConfig {
            max_messages_per_conversation: 0,
            ..StoreConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_storage_key_is_rejected() {
        let config = StoreConfig {
            storage_key: "  ".into(),
            ..StoreConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
