pub mod conversation_store;
pub mod events;
pub mod title;
