//! Persistent chat conversation history.
//!
//! [`ConversationStore`] keeps every conversation and message in one record on
//! a [`StorageBackend`], enforces retention limits, derives titles from the
//! first user message, exports/imports JSON snapshots and notifies subscribers
//! of every change.

pub mod agent;
pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod service;

pub use config::StoreConfig;
pub use db::backend::{MemoryBackend, StorageBackend};
pub use db::file_backend::FileBackend;
pub use errors::{StoreError, StoreResult};
pub use models::{
    BackupExport, Conversation, ConversationExport, ImportPayload, Message, MessageRole, SearchHit,
    Settings, Statistics, StorageRoot,
};
pub use service::conversation_store::ConversationStore;
pub use service::events::{StoreEvent, SubscriptionId};
