use std::sync::Arc;

use crate::application::EntryNotifier;
use crate::domain::{EntrySnapshot, EntryType};
use crate::infrastructure::entry_broker::EntryEventBroker;

/// Routes inventory mutations to the live dashboard broker.
#[derive(Clone)]
pub struct BroadcastNotifier {
    broker: Arc<EntryEventBroker>,
}

impl BroadcastNotifier {
    pub fn new(broker: Arc<EntryEventBroker>) -> Self {
        Self { broker }
    }
}

impl EntryNotifier for BroadcastNotifier {
    fn entry_created(&self, entry: &EntrySnapshot) {
        self.broker.notify_entry_created(entry);
    }

    fn entry_updated(&self, entry: &EntrySnapshot) {
        self.broker.notify_entry_updated(entry);
    }

    fn entry_deleted(&self, entry_id: &str, entry_type: EntryType) {
        self.broker.notify_entry_deleted(entry_id, entry_type);
    }
}
