use std::sync::Arc;

use uuid::Uuid;

use crate::application::{AppError, AppResult, EntryNotifier, EntryQuery, EntryStore};
use crate::domain::{EntryDraft, EntryPatch, EntrySnapshot};

/// Entry mutations followed by a change notification.
///
/// The notifier only hears about a change after the store committed it, so a
/// failed mutation never produces an event.
#[derive(Clone)]
pub struct InventoryService {
    pub store: Arc<dyn EntryStore>,
    pub notifier: Arc<dyn EntryNotifier>,
}

impl InventoryService {
    pub fn new(store: Arc<dyn EntryStore>, notifier: Arc<dyn EntryNotifier>) -> Self {
        Self { store, notifier }
    }

    pub async fn create_entry(
        &self,
        draft: EntryDraft,
        user: Option<String>,
    ) -> AppResult<EntrySnapshot> {
        validate_draft(&draft)?;
        let entry = self.store.insert(draft, user).await?;
        self.notifier.entry_created(&entry);
        Ok(entry)
    }

    pub async fn update_entry(&self, id: Uuid, patch: EntryPatch) -> AppResult<EntrySnapshot> {
        if let Some(qty) = patch.qty {
            validate_qty(qty)?;
        }
        let entry = self.store.update(id, patch).await?;
        self.notifier.entry_updated(&entry);
        Ok(entry)
    }

    pub async fn delete_entry(&self, id: Uuid) -> AppResult<()> {
        let removed = self.store.delete(id).await?;
        self.notifier
            .entry_deleted(&removed.id.to_string(), removed.entry_type);
        Ok(())
    }

    pub async fn get_entry(&self, id: Uuid) -> AppResult<EntrySnapshot> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("entry {id}")))
    }

    pub async fn list_entries(&self, query: EntryQuery) -> AppResult<Vec<EntrySnapshot>> {
        self.store.list(query).await
    }
}

fn validate_draft(draft: &EntryDraft) -> AppResult<()> {
    if draft.item_name.trim().is_empty() {
        return Err(AppError::Validation("item_name is required".into()));
    }
    if draft.unit.trim().is_empty() {
        return Err(AppError::Validation("unit is required".into()));
    }
    validate_qty(draft.qty)
}

fn validate_qty(qty: f64) -> AppResult<()> {
    if !qty.is_finite() || qty < 0.0 {
        return Err(AppError::Validation(format!("invalid qty: {qty}")));
    }
    Ok(())
}
