use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::db::backend::StorageBackend;
use crate::db::root_repository::RootRepository;
use crate::errors::{StoreError, StoreResult};
use crate::models::{
    new_id, BackupExport, Conversation, ConversationExport, ImportPayload, Message, MessageRole,
    SearchHit, Settings, Statistics, StorageRoot, SCHEMA_VERSION,
};
use crate::service::events::{EventBus, StoreEvent, SubscriptionId};
use crate::service::title::generate_title;

struct StoreState {
    repo: RootRepository,
    current_id: Option<String>,
}

/// Owns every persisted conversation and the "current conversation" pointer.
///
/// Each operation is one critical section: load the root record, mutate it,
/// write it back. The pointer only moves after a successful write. Events
/// collected during the operation are dispatched once the lock is released.
pub struct ConversationStore {
    config: StoreConfig,
    state: Mutex<StoreState>,
    events: EventBus,
}

impl ConversationStore {
    /// Opens the store on `backend` and runs initialization: writes a fresh root
    /// record when none exists, creates a first conversation when the list is
    /// empty, otherwise resumes the last active conversation.
    pub fn open<B>(backend: B, config: StoreConfig) -> StoreResult<Self>
    where
        B: StorageBackend + 'static,
    {
        config.validate()?;
        let repo = RootRepository::new(Box::new(backend), config.storage_key.clone());
        let store = Self {
            config,
            state: Mutex::new(StoreState { repo, current_id: None }),
            events: EventBus::new(),
        };
        {
            let mut state = store.lock();
            // Nobody can be subscribed yet, so init events are dropped.
            let mut events = Vec::new();
            store.initialize(&mut state, &mut events)?;
            info!(
                key = %state.repo.key(),
                current = ?state.current_id,
                "Conversation store opened"
            );
        }
        Ok(store)
    }

    /// Drops every subscriber. The persisted record is left as is.
    pub fn close(self) {
        self.events.clear();
        debug!("Conversation store closed");
    }

    // ── Subscriptions ────────────────────────────────────────────────────────

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Channel flavour of [`ConversationStore::subscribe`] for async consumers.
    pub fn event_stream(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<StoreEvent>) {
        self.events.channel()
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    /// Every conversation, newest created first.
    pub fn conversations(&self) -> StoreResult<Vec<Conversation>> {
        let state = self.lock();
        Ok(state.repo.load()?.map(|r| r.conversations).unwrap_or_default())
    }

    pub fn conversation(&self, id: &str) -> StoreResult<Option<Conversation>> {
        let state = self.lock();
        Ok(state.repo.load()?.and_then(|r| r.find(id).cloned()))
    }

    pub fn current_conversation_id(&self) -> Option<String> {
        self.lock().current_id.clone()
    }

    /// The conversation under the current pointer, `None` when unset or when it
    /// no longer exists.
    pub fn current_conversation(&self) -> StoreResult<Option<Conversation>> {
        let state = self.lock();
        let Some(id) = state.current_id.as_deref() else {
            return Ok(None);
        };
        Ok(state.repo.load()?.and_then(|r| r.find(id).cloned()))
    }

    /// Messages of `id`, or of the current conversation, newest first.
    pub fn messages(&self, id: Option<&str>) -> StoreResult<Vec<Message>> {
        let conversation = match id {
            Some(id) => self.conversation(id)?,
            None => self.current_conversation()?,
        };
        Ok(conversation.map(|c| c.messages).unwrap_or_default())
    }

    pub fn filter_by_model(&self, model: &str) -> StoreResult<Vec<Conversation>> {
        Ok(self
            .conversations()?
            .into_iter()
            .filter(|c| c.model == model)
            .collect())
    }

    /// Case-insensitive substring search over all retained messages, in
    /// conversation order then message order.
    pub fn search_messages(&self, query: &str) -> StoreResult<Vec<SearchHit>> {
        let needle = query.to_lowercase();
        let mut hits = Vec::new();
        for conversation in self.conversations()? {
            for message in &conversation.messages {
                if message.content.to_lowercase().contains(&needle) {
                    hits.push(SearchHit {
                        conversation: conversation.clone(),
                        message: message.clone(),
                        matched: message.content.clone(),
                    });
                }
            }
        }
        debug!("Search for {query:?} matched {} messages", hits.len());
        Ok(hits)
    }

    pub fn statistics(&self) -> StoreResult<Statistics> {
        let state = self.lock();
        let conversations = state.repo.load()?.map(|r| r.conversations).unwrap_or_default();
        Ok(Statistics {
            total_conversations: conversations.len(),
            total_messages: conversations.iter().map(|c| c.message_count).sum(),
            total_words: conversations.iter().map(Conversation::word_count).sum(),
            oldest_conversation: conversations.last().map(|c| c.created_at),
            storage_usage: state.repo.stored_size()?,
        })
    }

    // ── Export ───────────────────────────────────────────────────────────────

    /// Pretty JSON `{version, exportedAt, conversation}` for `id` (or the current
    /// conversation); `None` when there is no such conversation.
    pub fn export_conversation(&self, id: Option<&str>) -> StoreResult<Option<String>> {
        let conversation = match id {
            Some(id) => self.conversation(id)?,
            None => self.current_conversation()?,
        };
        let Some(conversation) = conversation else {
            return Ok(None);
        };
        let export = ConversationExport {
            version: SCHEMA_VERSION.to_string(),
            exported_at: Some(Utc::now()),
            conversation,
        };
        Ok(Some(serde_json::to_string_pretty(&export)?))
    }

    /// Pretty JSON of the whole root record. The export-time `version` and
    /// `exportedAt` always replace whatever the stored record carried.
    pub fn export_all(&self) -> StoreResult<String> {
        let root = {
            let state = self.lock();
            self.load_root(&state)?
        };
        let export = BackupExport {
            version: SCHEMA_VERSION.to_string(),
            exported_at: Some(Utc::now()),
            conversations: root.conversations,
            settings: root.settings,
        };
        Ok(serde_json::to_string_pretty(&export)?)
    }

    // ── Mutations ────────────────────────────────────────────────────────────

    /// Creates a conversation (titled "New Chat" unless given), puts it at the
    /// head of the list and makes it current.
    pub fn create_conversation(&self, title: Option<&str>) -> StoreResult<Conversation> {
        self.transaction(|store, state, events| {
            let mut root = store.load_root(state)?;
            let title = title.unwrap_or(store.config.default_title.as_str());
            let conversation = store.push_new_conversation(&mut root, title);
            state.repo.save(&root)?;
            state.current_id = Some(conversation.id.clone());
            info!("Created conversation {}", conversation.id);
            events.push(StoreEvent::ConversationCreated(conversation.clone()));
            Ok(conversation)
        })
    }

    /// Makes `id` the single active conversation. `false` when unknown.
    pub fn switch_conversation(&self, id: &str) -> StoreResult<bool> {
        self.transaction(|store, state, events| {
            let mut root = store.load_root(state)?;
            let Some(index) = root.conversations.iter().position(|c| c.id == id) else {
                debug!("Switch ignored, conversation {id} not found");
                return Ok(false);
            };
            root.activate_only(id);
            let target = &mut root.conversations[index];
            target.touch();
            let snapshot = target.clone();
            state.repo.save(&root)?;
            state.current_id = Some(id.to_string());
            debug!("Switched to conversation {id}");
            events.push(StoreEvent::ConversationSwitched(snapshot));
            Ok(true)
        })
    }

    /// Removes `id`. When it was current, the newest remaining conversation takes
    /// over; when none remain a fresh one is created. `false` when unknown.
    pub fn delete_conversation(&self, id: &str) -> StoreResult<bool> {
        self.transaction(|store, state, events| {
            let mut root = store.load_root(state)?;
            let Some(index) = root.conversations.iter().position(|c| c.id == id) else {
                debug!("Delete ignored, conversation {id} not found");
                return Ok(false);
            };
            let deleted = root.conversations.remove(index);

            let mut current = state.current_id.clone();
            let was_current = current.as_deref() == Some(id);
            if root.conversations.is_empty() {
                let fresh = store.push_new_conversation(&mut root, &store.config.default_title);
                current = Some(fresh.id.clone());
                events.push(StoreEvent::ConversationCreated(fresh));
            } else if was_current {
                let head = root.conversations[0].id.clone();
                root.activate_only(&head);
                current = Some(head);
            }

            state.repo.save(&root)?;
            state.current_id = current;
            info!("Deleted conversation {id}");
            events.push(StoreEvent::ConversationDeleted(deleted));
            Ok(true)
        })
    }

    /// Appends a message to the current conversation, creating one first when
    /// there is none. The first user message of a conversation also sets its
    /// title.
    pub fn add_message(&self, content: &str, role: MessageRole) -> StoreResult<Message> {
        self.transaction(|store, state, events| {
            let mut root = store.load_root(state)?;

            let resolved = state
                .current_id
                .as_deref()
                .filter(|id| root.find(id).is_some())
                .map(str::to_string);
            let (conversation_id, created) = match resolved {
                Some(id) => (id, false),
                None => {
                    let fresh = store.push_new_conversation(&mut root, &store.config.default_title);
                    let id = fresh.id.clone();
                    events.push(StoreEvent::ConversationCreated(fresh));
                    (id, true)
                }
            };

            let max_messages = store.config.max_messages_per_conversation;
            let Some(conversation) = root.find_mut(&conversation_id) else {
                return Err(StoreError::ConversationNotFound { id: conversation_id });
            };
            let message = Message::new(role, content, conversation.model.clone());
            conversation.messages.insert(0, message.clone());
            conversation.message_count += 1;
            conversation.touch();
            if conversation.messages.len() > max_messages {
                conversation.messages.truncate(max_messages);
                debug!("Evicted oldest message of conversation {conversation_id}");
            }
            if conversation.message_count == 1 && role == MessageRole::User {
                if let Some(title) = generate_title(content) {
                    conversation.title = title;
                }
            }
            let snapshot = conversation.clone();

            state.repo.save(&root)?;
            if created {
                state.current_id = Some(conversation_id);
            }
            events.push(StoreEvent::MessageAdded {
                conversation: snapshot,
                message: message.clone(),
            });
            Ok(message)
        })
    }

    /// Stores a reply from the chat backend on the current conversation.
    pub fn add_ai_response(&self, content: &str) -> StoreResult<Message> {
        self.add_message(content, MessageRole::Assistant)
    }

    /// Replaces the stored record that has the same id, e.g. after the user
    /// picked another model. The active flag is owned by the store and kept;
    /// the message limit is re-applied. `false` when the id is unknown.
    pub fn update_conversation(&self, conversation: &Conversation) -> StoreResult<bool> {
        self.transaction(|store, state, _events| {
            let mut root = store.load_root(state)?;
            let Some(existing) = root.find_mut(&conversation.id) else {
                return Ok(false);
            };
            let is_active = existing.is_active;
            *existing = conversation.clone();
            existing.is_active = is_active;
            existing
                .messages
                .truncate(store.config.max_messages_per_conversation);
            state.repo.save(&root)?;
            debug!("Updated conversation {}", conversation.id);
            Ok(true)
        })
    }

    /// Changes the model used for future messages of `id`.
    pub fn set_model(&self, id: &str, model: &str) -> StoreResult<bool> {
        self.transaction(|store, state, _events| {
            let mut root = store.load_root(state)?;
            let Some(conversation) = root.find_mut(id) else {
                return Ok(false);
            };
            conversation.model = model.to_string();
            conversation.touch();
            state.repo.save(&root)?;
            debug!("Conversation {id} now uses model {model}");
            Ok(true)
        })
    }

    /// Imports a single-conversation export or a full backup.
    ///
    /// The payload is parsed before anything is written; malformed input
    /// returns `false` and leaves storage untouched. A single conversation gets
    /// a new id and becomes current. A backup replaces every stored
    /// conversation and the settings block; limits from the config still apply.
    pub fn import_data(&self, payload: &str) -> StoreResult<bool> {
        let parsed: ImportPayload = match serde_json::from_str(payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Rejected chat history import: {e}");
                return Ok(false);
            }
        };

        self.transaction(|store, state, events| {
            match &parsed {
                ImportPayload::Conversation(export) => {
                    let mut root = store.load_root(state)?;
                    let mut conversation = export.conversation.clone();
                    conversation.id = new_id();
                    conversation.imported_at = Some(Utc::now());
                    conversation.touch();
                    conversation
                        .messages
                        .truncate(store.config.max_messages_per_conversation);
                    let id = conversation.id.clone();

                    root.conversations.insert(0, conversation);
                    store.evict_conversations(&mut root);
                    root.activate_only(&id);
                    let snapshot = root.find(&id).cloned();

                    state.repo.save(&root)?;
                    state.current_id = Some(id.clone());
                    info!("Imported conversation as {id}");
                    if let Some(snapshot) = snapshot {
                        events.push(StoreEvent::ConversationSwitched(snapshot));
                    }
                }
                ImportPayload::Backup(backup) => {
                    let mut root = StorageRoot::new(backup.settings.clone());
                    root.conversations = backup.conversations.clone();
                    store.normalize(&mut root);
                    if root.conversations.is_empty() {
                        let fresh =
                            store.push_new_conversation(&mut root, &store.config.default_title);
                        events.push(StoreEvent::ConversationCreated(fresh));
                    }
                    let current = root.last_active_id();
                    if let Some(id) = current.as_deref() {
                        root.activate_only(id);
                    }

                    state.repo.save(&root)?;
                    state.current_id = current;
                    info!("Restored {} conversations from backup", root.conversations.len());
                }
            }
            events.push(StoreEvent::DataImported(parsed.clone()));
            Ok(true)
        })
    }

    /// Erases the persisted record and re-initializes, leaving one fresh
    /// conversation.
    pub fn clear_all(&self) -> StoreResult<()> {
        self.transaction(|store, state, events| {
            state.repo.remove()?;
            state.current_id = None;
            store.initialize(state, events)?;
            info!("Cleared all chat history");
            events.push(StoreEvent::AllDataCleared);
            Ok(())
        })
    }

    /// Drops every message of `id` and resets its message counter. `false`
    /// when unknown.
    pub fn clear_conversation(&self, id: &str) -> StoreResult<bool> {
        self.transaction(|store, state, events| {
            let mut root = store.load_root(state)?;
            let Some(conversation) = root.find_mut(id) else {
                return Ok(false);
            };
            conversation.messages.clear();
            conversation.message_count = 0;
            conversation.touch();
            let snapshot = conversation.clone();
            state.repo.save(&root)?;
            debug!("Cleared conversation {id}");
            events.push(StoreEvent::ConversationCleared(snapshot));
            Ok(true)
        })
    }

    // ── Internals ────────────────────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `op` under the state lock and dispatches the events it collected
    /// once the lock is released. Events of a failed operation are dropped.
    fn transaction<T, F>(&self, op: F) -> StoreResult<T>
    where
        F: FnOnce(&Self, &mut StoreState, &mut Vec<StoreEvent>) -> StoreResult<T>,
    {
        let mut events = Vec::new();
        let outcome = {
            let mut state = self.lock();
            op(self, &mut state, &mut events)
        };
        if outcome.is_ok() {
            self.events.emit_all(events);
        }
        outcome
    }

    fn settings(&self) -> Settings {
        Settings {
            max_conversations: self.config.max_conversations,
            max_messages: self.config.max_messages_per_conversation,
            auto_save: self.config.auto_save,
        }
    }

    fn load_root(&self, state: &StoreState) -> StoreResult<StorageRoot> {
        Ok(state
            .repo
            .load()?
            .unwrap_or_else(|| StorageRoot::new(self.settings())))
    }

    fn initialize(&self, state: &mut StoreState, events: &mut Vec<StoreEvent>) -> StoreResult<()> {
        let mut root = match state.repo.load()? {
            Some(root) => root,
            None => {
                let root = StorageRoot::new(self.settings());
                state.repo.save(&root)?;
                debug!("Initialized empty chat history");
                root
            }
        };

        if root.conversations.is_empty() {
            let fresh = self.push_new_conversation(&mut root, &self.config.default_title);
            state.repo.save(&root)?;
            state.current_id = Some(fresh.id.clone());
            events.push(StoreEvent::ConversationCreated(fresh));
        } else {
            state.current_id = root.last_active_id();
        }
        Ok(())
    }

    /// Inserts a new active conversation at the head, deactivating the rest and
    /// evicting overflow. Nothing is persisted.
    fn push_new_conversation(&self, root: &mut StorageRoot, title: &str) -> Conversation {
        let conversation = Conversation::new(title, self.config.default_model.as_str());
        for existing in &mut root.conversations {
            existing.is_active = false;
        }
        root.conversations.insert(0, conversation.clone());
        self.evict_conversations(root);
        conversation
    }

    fn evict_conversations(&self, root: &mut StorageRoot) {
        let max = self.config.max_conversations;
        if root.conversations.len() > max {
            let evicted = root.conversations.len() - max;
            root.conversations.truncate(max);
            debug!("Evicted {evicted} oldest conversations");
        }
    }

    /// Brings restored data back within the invariants: unique ids, capacity
    /// limits and at most one active conversation.
    fn normalize(&self, root: &mut StorageRoot) {
        let mut seen = HashSet::new();
        root.conversations.retain(|c| seen.insert(c.id.clone()));
        self.evict_conversations(root);
        let max_messages = self.config.max_messages_per_conversation;
        let mut active_seen = false;
        for conversation in &mut root.conversations {
            conversation.messages.truncate(max_messages);
            if conversation.is_active {
                conversation.is_active = !active_seen;
                active_seen = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::db::backend::MemoryBackend;

    fn small_store(max_conversations: usize, max_messages: usize) -> ConversationStore {
        let config = StoreConfig {
            max_conversations,
            max_messages_per_conversation: max_messages,
            ..StoreConfig::default()
        };
        ConversationStore::open(MemoryBackend::new(), config).unwrap()
    }

    /// Backend whose writes start failing once `fail_writes` is set.
    #[derive(Default)]
    struct FlakyBackend {
        inner: MemoryBackend,
        fail_writes: std::sync::atomic::AtomicBool,
    }

    impl StorageBackend for FlakyBackend {
        fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::write(
                    key,
                    std::io::Error::new(std::io::ErrorKind::Other, "quota exceeded"),
                ));
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> StoreResult<()> {
            self.inner.remove(key)
        }
    }

    #[test]
    fn open_creates_one_default_conversation() {
        let store = small_store(5, 5);
        let conversations = store.conversations().unwrap();
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].title, "New Chat");
        assert_eq!(conversations[0].model, "tinyllama");
        assert!(conversations[0].is_active);
        assert_eq!(store.current_conversation_id(), Some(conversations[0].id.clone()));
    }

    #[test]
    fn reopen_resumes_active_conversation() {
        let backend = Arc::new(MemoryBackend::new());
        let store = ConversationStore::open(backend.clone(), StoreConfig::default()).unwrap();
        let first = store.current_conversation().unwrap().unwrap();
        store.create_conversation(Some("second")).unwrap();
        store.switch_conversation(&first.id).unwrap();
        store.close();

        let reopened = ConversationStore::open(backend, StoreConfig::default()).unwrap();
        assert_eq!(reopened.current_conversation_id(), Some(first.id));
        assert_eq!(reopened.conversations().unwrap().len(), 2);
    }

    #[test]
    fn reopen_without_active_flag_picks_head() {
        let backend = Arc::new(MemoryBackend::new());
        let store = ConversationStore::open(backend.clone(), StoreConfig::default()).unwrap();
        let head = store.create_conversation(Some("head")).unwrap();

        let mut root: StorageRoot =
            serde_json::from_slice(&backend.get("ai_chat_history").unwrap().unwrap()).unwrap();
        for c in &mut root.conversations {
            c.is_active = false;
        }
        backend
            .set("ai_chat_history", &serde_json::to_vec(&root).unwrap())
            .unwrap();

        let reopened = ConversationStore::open(backend, StoreConfig::default()).unwrap();
        assert_eq!(reopened.current_conversation_id(), Some(head.id));
    }

    #[test]
    fn corrupt_record_reinitializes() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set("ai_chat_history", b"<<garbage>>").unwrap();
        let store = ConversationStore::open(backend, StoreConfig::default()).unwrap();
        assert_eq!(store.conversations().unwrap().len(), 1);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = StoreConfig {
            max_conversations: 0,
            ..StoreConfig::default()
        };
        assert!(matches!(
            ConversationStore::open(MemoryBackend::new(), config),
            Err(StoreError::InvalidConfig(_))
        ));
    }

    #[test]
    fn message_count_survives_eviction() {
        let store = small_store(5, 3);
        for i in 0..5 {
            store.add_message(&format!("message {i}"), MessageRole::User).unwrap();
        }
        let current = store.current_conversation().unwrap().unwrap();
        assert_eq!(current.messages.len(), 3);
        assert_eq!(current.message_count, 5);
        assert_eq!(current.messages[0].content, "message 4");
        assert_eq!(current.messages[2].content, "message 2");
        assert_eq!(current.title, "message 0");
    }

    #[test]
    fn assistant_first_message_keeps_title() {
        let store = small_store(5, 5);
        store.add_ai_response("Hello, how can I help?").unwrap();
        store.add_message("second message here", MessageRole::User).unwrap();
        assert_eq!(store.current_conversation().unwrap().unwrap().title, "New Chat");
    }

    #[test]
    fn message_snapshots_conversation_model() {
        let store = small_store(5, 5);
        let current = store.current_conversation_id().unwrap();
        store.add_message("before", MessageRole::User).unwrap();
        assert!(store.set_model(&current, "llama3.2").unwrap());
        let after = store.add_message("after", MessageRole::User).unwrap();

        let messages = store.messages(None).unwrap();
        assert_eq!(after.model, "llama3.2");
        assert_eq!(messages[0].model, "llama3.2");
        assert_eq!(messages[1].model, "tinyllama");
        assert_eq!(store.filter_by_model("llama3.2").unwrap().len(), 1);
        assert!(store.filter_by_model("tinyllama").unwrap().is_empty());
    }

    #[test]
    fn deleting_other_conversation_keeps_pointer() {
        let store = small_store(5, 5);
        let original = store.current_conversation_id().unwrap();
        store.create_conversation(Some("other")).unwrap();
        let other = store.current_conversation_id().unwrap();
        assert!(store.delete_conversation(&original).unwrap());
        assert_eq!(store.current_conversation_id(), Some(other.clone()));

        store.add_message("still here", MessageRole::User).unwrap();
        assert_eq!(store.messages(Some(&other)).unwrap().len(), 1);
    }

    #[test]
    fn update_conversation_keeps_active_flag_and_limits() {
        let store = small_store(5, 2);
        let mut current = store.current_conversation().unwrap().unwrap();
        current.is_active = false;
        current.title = "Renamed".into();
        for i in 0..4 {
            current
                .messages
                .push(Message::new(MessageRole::User, format!("m{i}"), "tinyllama"));
        }
        assert!(store.update_conversation(&current).unwrap());

        let stored = store.current_conversation().unwrap().unwrap();
        assert!(stored.is_active);
        assert_eq!(stored.title, "Renamed");
        assert_eq!(stored.messages.len(), 2);

        let mut unknown = stored.clone();
        unknown.id = "missing".into();
        assert!(!store.update_conversation(&unknown).unwrap());
        assert!(!store.set_model("missing", "x").unwrap());
    }

    #[test]
    fn failed_write_surfaces_error_and_keeps_pointer() {
        let backend = Arc::new(FlakyBackend::default());
        let store = ConversationStore::open(backend.clone(), StoreConfig::default()).unwrap();
        let before = store.current_conversation_id();

        let emitted = Arc::new(AtomicUsize::new(0));
        let counter = emitted.clone();
        store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        backend.fail_writes.store(true, Ordering::SeqCst);
        let err = store.create_conversation(None).unwrap_err();
        assert!(err.is_storage());
        assert_eq!(store.current_conversation_id(), before);
        assert_eq!(store.conversations().unwrap().len(), 1);
        assert_eq!(emitted.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn listener_can_call_back_into_store() {
        let store = Arc::new(small_store(5, 5));
        let titles = Arc::new(Mutex::new(Vec::new()));
        let handle = Arc::downgrade(&store);
        let sink = titles.clone();
        store.subscribe(move |event| {
            if let (StoreEvent::MessageAdded { .. }, Some(store)) = (event, handle.upgrade()) {
                let title = store.current_conversation().unwrap().unwrap().title;
                sink.lock().unwrap().push(title);
            }
        });

        store.add_message("hello world", MessageRole::User).unwrap();
        assert_eq!(*titles.lock().unwrap(), vec!["hello world".to_string()]);
    }

    #[test]
    fn backup_restore_normalizes_duplicates_and_actives() {
        let store = small_store(2, 1);
        let mut a = Conversation::new("a", "m");
        a.messages = vec![
            Message::new(MessageRole::User, "newer", "m"),
            Message::new(MessageRole::User, "older", "m"),
        ];
        let b = Conversation::new("b", "m");
        let c = Conversation::new("c", "m");
        let payload = serde_json::json!({
            "conversations": [a.clone(), a.clone(), b, c],
        })
        .to_string();

        assert!(store.import_data(&payload).unwrap());
        let conversations = store.conversations().unwrap();
        assert_eq!(conversations.len(), 2);
        assert_eq!(conversations[0].id, a.id);
        assert_eq!(conversations[0].messages.len(), 1);
        assert_eq!(conversations.iter().filter(|c| c.is_active).count(), 1);
        assert_eq!(store.current_conversation_id(), Some(a.id));
    }

    #[test]
    fn empty_backup_leaves_one_fresh_conversation() {
        let store = small_store(5, 5);
        assert!(store.import_data(r#"{"conversations": []}"#).unwrap());
        let conversations = store.conversations().unwrap();
        assert_eq!(conversations.len(), 1);
        assert_eq!(store.current_conversation_id(), Some(conversations[0].id.clone()));
    }
}
