use async_trait::async_trait;
use thiserror::Error;
use tracing::error;

use super::message::Message;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("In-memory repository lock poisoned: {message}")]
    LockPoisoned { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn lock_poisoned(message: impl Into<String>) -> Self {
        Self::LockPoisoned {
            message: message.into(),
        }
    }
}

/// Where finished and partial messages are kept.
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Store a new message and return the id it is stored under.
    async fn append(&self, message: Message) -> Result<String, RepositoryError>;

    /// Replace the message stored under `id`, or store it if absent.
    async fn upsert(&self, id: &str, message: Message) -> Result<(), RepositoryError>;

    async fn list(&self) -> Result<Vec<Message>, RepositoryError>;
}

/// Append, logging instead of failing. Returns the id the message ended up
/// with, which is its own id when the repository rejected it.
pub(crate) async fn append_logged(repository: &dyn MessageRepository, message: Message) -> String {
    let fallback_id = message.id.clone();
    match repository.append(message).await {
        Ok(id) => id,
        Err(e) => {
            error!(target: "parley::session", message_id = %fallback_id, "Failed to append message: {e}");
            fallback_id
        }
    }
}

pub(crate) async fn upsert_logged(repository: &dyn MessageRepository, id: &str, message: Message) {
    if let Err(e) = repository.upsert(id, message).await {
        error!(target: "parley::session", message_id = %id, "Failed to upsert message: {e}");
    }
}

#[derive(Default)]
pub struct InMemoryMessageRepository {
    messages: std::sync::RwLock<Vec<Message>>,
}

impl InMemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn append(&self, message: Message) -> Result<String, RepositoryError> {
        let mut messages = self
            .messages
            .write()
            .map_err(|_| RepositoryError::lock_poisoned("messages"))?;
        let id = message.id.clone();
        messages.push(message);
        Ok(id)
    }

    async fn upsert(&self, id: &str, mut message: Message) -> Result<(), RepositoryError> {
        let mut messages = self
            .messages
            .write()
            .map_err(|_| RepositoryError::lock_poisoned("messages"))?;
        id.clone_into(&mut message.id);
        match messages.iter_mut().find(|existing| existing.id == id) {
            Some(existing) => *existing = message,
            None => messages.push(message),
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Message>, RepositoryError> {
        let messages = self
            .messages
            .read()
            .map_err(|_| RepositoryError::lock_poisoned("messages"))?;
        Ok(messages.clone())
    }
}
