use crate::application::EntryNotifier;
use crate::domain::{EntrySnapshot, EntryType};

/// Forwards every change to each inner notifier, in order.
pub struct MultiNotifier {
    notifiers: Vec<Box<dyn EntryNotifier>>,
}

impl MultiNotifier {
    pub fn new(notifiers: Vec<Box<dyn EntryNotifier>>) -> Self {
        Self { notifiers }
    }
}

impl EntryNotifier for MultiNotifier {
    fn entry_created(&self, entry: &EntrySnapshot) {
        for n in &self.notifiers {
            n.entry_created(entry);
        }
    }

    fn entry_updated(&self, entry: &EntrySnapshot) {
        for n in &self.notifiers {
            n.entry_updated(entry);
        }
    }

    fn entry_deleted(&self, entry_id: &str, entry_type: EntryType) {
        for n in &self.notifiers {
            n.entry_deleted(entry_id, entry_type);
        }
    }
}
