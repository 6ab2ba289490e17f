//! Change notifications published by the conversation store.
//!
//! Listeners are plain callbacks invoked synchronously, in registration order,
//! after the mutation that produced the event has been persisted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::models::{Conversation, ImportPayload, Message};

#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    ConversationCreated(Conversation),
    ConversationSwitched(Conversation),
    ConversationDeleted(Conversation),
    MessageAdded {
        conversation: Conversation,
        message: Message,
    },
    DataImported(ImportPayload),
    AllDataCleared,
    ConversationCleared(Conversation),
}

impl StoreEvent {
    /// Signal name as seen by UI code.
    pub fn name(&self) -> &'static str {
        match self {
            StoreEvent::ConversationCreated(_) => "conversationCreated",
            StoreEvent::ConversationSwitched(_) => "conversationSwitched",
            StoreEvent::ConversationDeleted(_) => "conversationDeleted",
            StoreEvent::MessageAdded { .. } => "messageAdded",
            StoreEvent::DataImported(_) => "dataImported",
            StoreEvent::AllDataCleared => "allDataCleared",
            StoreEvent::ConversationCleared(_) => "conversationCleared",
        }
    }
}

impl std::fmt::Display for StoreEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&StoreEvent) + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        id
    }

    /// Feeds every event into an unbounded tokio channel. The subscription stays
    /// registered until [`EventBus::unsubscribe`] is called; sends to a dropped
    /// receiver are ignored.
    pub fn channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<StoreEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(move |event| {
            let _ = tx.send(event.clone());
        });
        (id, rx)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn clear(&self) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers `events` in order. The listener list is snapshotted first so a
    /// listener may subscribe, unsubscribe or call back into the store.
    pub fn emit_all(&self, events: Vec<StoreEvent>) {
        if events.is_empty() {
            return;
        }
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for event in &events {
            tracing::trace!(event = event.name(), "dispatching store event");
            for listener in &listeners {
                listener(event);
            }
        }
    }
}
