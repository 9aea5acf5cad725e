use crate::application::EntryNotifier;
use crate::domain::{EntrySnapshot, EntryType};

/// Writes an audit line for every committed entry change.
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LogNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl EntryNotifier for LogNotifier {
    fn entry_created(&self, entry: &EntrySnapshot) {
        tracing::info!(
            entry_id = %entry.id,
            entry_type = %entry.entry_type,
            item = %entry.item_name,
            qty = entry.qty,
            unit = %entry.unit,
            warehouse = %entry.warehouse_name,
            "entry created"
        );
    }

    fn entry_updated(&self, entry: &EntrySnapshot) {
        tracing::info!(
            entry_id = %entry.id,
            entry_type = %entry.entry_type,
            qty = entry.qty,
            "entry updated"
        );
    }

    fn entry_deleted(&self, entry_id: &str, entry_type: EntryType) {
        tracing::info!(entry_id, entry_type = %entry_type, "entry deleted");
    }
}
