use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::application::{AppError, AppResult, EntryQuery, EntryStore};
use crate::domain::{EntryDraft, EntryPatch, EntrySnapshot};

/// Process-local entry table. Stands in for the relational store.
#[derive(Clone, Default)]
pub struct InMemoryEntryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<Uuid, EntrySnapshot>,
}

impl InMemoryEntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> AppResult<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| AppError::Storage("lock poisoned".into()))
    }
}

#[async_trait]
impl EntryStore for InMemoryEntryStore {
    async fn insert(&self, draft: EntryDraft, user: Option<String>) -> AppResult<EntrySnapshot> {
        let entry = EntrySnapshot::from_draft(Uuid::new_v4(), user, draft, Utc::now());
        let mut inner = self.lock()?;
        inner.entries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn update(&self, id: Uuid, patch: EntryPatch) -> AppResult<EntrySnapshot> {
        let mut inner = self.lock()?;
        let entry = inner
            .entries
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("entry {id}")))?;
        entry.apply(patch);
        Ok(entry.clone())
    }

    async fn delete(&self, id: Uuid) -> AppResult<EntrySnapshot> {
        let mut inner = self.lock()?;
        inner
            .entries
            .remove(&id)
            .ok_or_else(|| AppError::NotFound(format!("entry {id}")))
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<EntrySnapshot>> {
        let inner = self.lock()?;
        Ok(inner.entries.get(&id).cloned())
    }

    async fn list(&self, query: EntryQuery) -> AppResult<Vec<EntrySnapshot>> {
        let inner = self.lock()?;
        let mut v: Vec<EntrySnapshot> = inner
            .entries
            .values()
            .filter(|e| query.entry_type.is_none_or(|t| e.entry_type == t))
            .cloned()
            .collect();
        // newest first, id as tie-breaker so the order is stable
        v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        if let Some(limit) = query.limit {
            v.truncate(limit);
        }
        Ok(v)
    }
}
