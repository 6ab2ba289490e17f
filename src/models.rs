use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::config::{DEFAULT_MAX_CONVERSATIONS, DEFAULT_MAX_MESSAGES, DEFAULT_MODEL};

/// Schema version written into the root record and into every export.
pub const SCHEMA_VERSION: &str = "1.0";

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_version() -> String {
    SCHEMA_VERSION.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub title: String,
    /// Newest first: index 0 is the most recent message.
    #[serde(default)]
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default = "default_model")]
    pub model: String,
    /// Every message ever appended; eviction does not decrement it.
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imported_at: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn new(title: impl Into<String>, model: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            title: title.into(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            model: model.into(),
            message_count: 0,
            is_active: true,
            imported_at: None,
        }
    }

    /// Refreshes `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Whitespace-separated words across the retained messages.
    pub fn word_count(&self) -> usize {
        self.messages
            .iter()
            .map(|m| m.content.split_whitespace().count())
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            other => Err(format!("Unknown role: {other}")),
        }
    }
}

impl TryFrom<String> for MessageRole {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Snapshot of the conversation's model when the message was added.
    #[serde(default = "default_model")]
    pub model: String,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            model: model.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub max_conversations: usize,
    pub max_messages: usize,
    pub auto_save: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_conversations: DEFAULT_MAX_CONVERSATIONS,
            max_messages: DEFAULT_MAX_MESSAGES,
            auto_save: true,
        }
    }
}

/// The single record persisted under the storage key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageRoot {
    /// Newest created first.
    #[serde(default)]
    pub conversations: Vec<Conversation>,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default = "default_version")]
    pub version: String,
}

impl StorageRoot {
    pub fn new(settings: Settings) -> Self {
        Self {
            conversations: Vec::new(),
            settings,
            version: SCHEMA_VERSION.to_string(),
        }
    }

    pub fn find(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == id)
    }

    /// Id of the conversation flagged active, or of the head when none is.
    pub fn last_active_id(&self) -> Option<String> {
        self.conversations
            .iter()
            .find(|c| c.is_active)
            .or_else(|| self.conversations.first())
            .map(|c| c.id.clone())
    }

    /// Clears every `is_active` flag, then sets it on `id` if present.
    pub fn activate_only(&mut self, id: &str) {
        for conversation in &mut self.conversations {
            conversation.is_active = conversation.id == id;
        }
    }
}

/// `{version, exportedAt, conversation}` snapshot of one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationExport {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exported_at: Option<DateTime<Utc>>,
    pub conversation: Conversation,
}

/// Full backup: the root record with export-time `version`/`exportedAt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupExport {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exported_at: Option<DateTime<Utc>>,
    pub conversations: Vec<Conversation>,
    #[serde(default)]
    pub settings: Settings,
}

/// Accepted shapes for [`crate::ConversationStore::import_data`].
///
/// A payload carrying a non-null `conversation` is a single-conversation import
/// even when it also carries `conversations`, and must parse as one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ImportPayload {
    Conversation(ConversationExport),
    Backup(BackupExport),
}

impl<'de> Deserialize<'de> for ImportPayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        let carries = |key: &str| value.get(key).is_some_and(|v| !v.is_null());
        let single = carries("conversation");
        let backup = carries("conversations");

        if single {
            serde_json::from_value(value)
                .map(ImportPayload::Conversation)
                .map_err(D::Error::custom)
        } else if backup {
            serde_json::from_value(value)
                .map(ImportPayload::Backup)
                .map_err(D::Error::custom)
        } else {
            Err(D::Error::custom(
                "expected a `conversation` or `conversations` field",
            ))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub conversation: Conversation,
    pub message: Message,
    #[serde(rename = "match")]
    pub matched: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub total_conversations: usize,
    /// Sum of `message_count`, evicted messages included.
    pub total_messages: u64,
    /// Words in retained messages only.
    pub total_words: usize,
    pub oldest_conversation: Option<DateTime<Utc>>,
    /// Byte size of the persisted root record.
    pub storage_usage: usize,
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
