pub mod broadcast_notifier;
pub mod entry_broker;
pub mod event_queue;
pub mod log_notifier;
pub mod memory_store;
pub mod multi_notifier;
