use rig::client::Nothing;
use rig::completion::Chat;
use rig::message::Message as RigMessage;
use rig::prelude::CompletionClient;
use rig::providers::ollama;
use thiserror::Error;
use tracing::{debug, error};

use crate::models::{Conversation, Message, MessageRole};

const PREAMBLE: &str = "You are a helpful AI assistant running locally via Ollama. \
                        Be concise, accurate, and friendly. \
                        If you don't know something, say so.";

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Failed to build Ollama client: {0}")]
    ClientBuild(String),

    #[error("Ollama service unavailable at {host}")]
    OllamaUnavailable { host: String },

    #[error("Model '{model_name}' not found in Ollama")]
    ModelNotFound { model_name: String },

    #[error("Inference error: {message}")]
    InferenceError { message: String },

    #[error("Conversation '{id}' has no user message to answer")]
    NothingToAnswer { id: String },
}

/// Converts stored messages, oldest first, into rig chat history.
fn to_rig_history<'a>(messages: impl Iterator<Item = &'a Message>) -> Vec<RigMessage> {
    messages
        .map(|m| match m.role {
            MessageRole::User => RigMessage::user(&m.content),
            MessageRole::Assistant => RigMessage::assistant(&m.content),
        })
        .collect()
}

/// Answers the newest user message of a conversation through a local Ollama
/// model. The reply is returned as text; storing it is up to the caller.
#[derive(Clone)]
pub struct OllamaAgentService {
    client: ollama::Client,
    base_url: String,
}

impl OllamaAgentService {
    pub fn new(base_url: &str) -> Result<Self, AgentError> {
        let client = ollama::Client::builder()
            .api_key(Nothing)
            .base_url(base_url)
            .build()
            .map_err(|e| AgentError::ClientBuild(format!("{e:?}")))?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
        })
    }

    /// Sends the conversation to the model selected on it. The most recent
    /// message must be the user's prompt; everything older is replayed as
    /// context.
    pub async fn reply(&self, conversation: &Conversation) -> Result<String, AgentError> {
        let Some((prompt, older)) = conversation.messages.split_first() else {
            return Err(AgentError::NothingToAnswer { id: conversation.id.clone() });
        };
        if prompt.role != MessageRole::User {
            return Err(AgentError::NothingToAnswer { id: conversation.id.clone() });
        }

        let model = conversation.model.as_str();
        let agent = self.client.agent(model).preamble(PREAMBLE).build();
        let history = to_rig_history(older.iter().rev());
        debug!(
            "Asking {model} with {} messages of history for conversation {}",
            history.len(),
            conversation.id
        );

        agent.chat(prompt.content.as_str(), history).await.map_err(|e| {
            error!("Ollama inference failed for conversation {}: {e}", conversation.id);
            let msg = e.to_string();
            if msg.contains("Connection refused") || msg.contains("connect") {
                AgentError::OllamaUnavailable { host: self.base_url.clone() }
            } else if msg.contains("model") {
                AgentError::ModelNotFound { model_name: model.to_string() }
            } else {
                AgentError::InferenceError { message: msg }
            }
        })
    }
}
