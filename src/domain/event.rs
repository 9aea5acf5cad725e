use serde::{Deserialize, Serialize};

use super::{EntrySnapshot, EntryType};

/// Message pushed to dashboard sessions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventMessage {
    Connected,
    EntryCreated {
        entry: EntrySnapshot,
    },
    EntryUpdated {
        entry: EntrySnapshot,
    },
    EntryDeleted {
        entry_id: String,
        entry_type: EntryType,
    },
}

impl EventMessage {
    /// Wire name of the variant, also used as the SSE event name.
    pub fn kind(&self) -> &'static str {
        match self {
            EventMessage::Connected => "connected",
            EventMessage::EntryCreated { .. } => "entry_created",
            EventMessage::EntryUpdated { .. } => "entry_updated",
            EventMessage::EntryDeleted { .. } => "entry_deleted",
        }
    }
}
