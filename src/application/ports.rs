use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{EntryDraft, EntryPatch, EntrySnapshot, EntryType};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("broker is not bound to an event loop")]
    NotBound,
    #[error("broker dispatcher has stopped")]
    Closed,
}

#[derive(Clone, Debug, Default)]
pub struct EntryQuery {
    pub entry_type: Option<EntryType>,
    pub limit: Option<usize>,
}

/// Persist entries. Returns the committed snapshot on success.
#[async_trait]
pub trait EntryStore: Send + Sync {
    async fn insert(&self, draft: EntryDraft, user: Option<String>) -> AppResult<EntrySnapshot>;
    async fn update(&self, id: Uuid, patch: EntryPatch) -> AppResult<EntrySnapshot>;
    async fn delete(&self, id: Uuid) -> AppResult<EntrySnapshot>;
    async fn get(&self, id: Uuid) -> AppResult<Option<EntrySnapshot>>;
    /// Newest first.
    async fn list(&self, query: EntryQuery) -> AppResult<Vec<EntrySnapshot>>;
}

/// Announce committed entry changes. Called synchronously from whatever
/// thread performed the mutation; implementations must not block.
pub trait EntryNotifier: Send + Sync {
    fn entry_created(&self, entry: &EntrySnapshot);
    fn entry_updated(&self, entry: &EntrySnapshot);
    fn entry_deleted(&self, entry_id: &str, entry_type: EntryType);
}
