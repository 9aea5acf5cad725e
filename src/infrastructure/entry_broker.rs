//! Fan-out of entry change events to streaming dashboard sessions.
//!
//! Mutations finish on arbitrary worker threads, while the subscriber
//! registry lives inside a single dispatcher task spawned on the runtime
//! handed to [`EntryEventBroker::set_loop`]. Every registry change and every
//! queue push goes through the dispatcher's command channel; callers never
//! touch the registry directly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use crate::application::BrokerError;
use crate::domain::{EntrySnapshot, EntryType, EventMessage};
use crate::infrastructure::event_queue::{PushOutcome, QueueReceiver, QueueSender, event_queue};

pub const DEFAULT_QUEUE_SIZE: usize = 128;

pub type SubscriberId = u64;

enum Command {
    Subscribe {
        id: SubscriberId,
        queue: QueueSender,
        ack: oneshot::Sender<()>,
    },
    Unsubscribe {
        id: SubscriberId,
        ack: Option<oneshot::Sender<()>>,
    },
    Publish(EventMessage),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    dropped_unbound: AtomicU64,
    delivered: AtomicU64,
    overflowed: AtomicU64,
    faults: AtomicU64,
    subscribers: AtomicUsize,
}

/// Point-in-time copy of the broker counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BrokerStats {
    /// notifications handed to the dispatcher
    pub published: u64,
    /// notifications dropped because no dispatcher was running
    /// (before `set_loop` or after `shutdown`)
    pub dropped_unbound: u64,
    /// successful pushes, counted per subscriber
    pub delivered: u64,
    /// messages lost to the drop-oldest policy, counted per subscriber
    pub overflowed: u64,
    /// pushes rejected by a closed subscriber queue
    pub faults: u64,
    pub subscribers: usize,
}

#[derive(Debug)]
pub struct EntryEventBroker {
    queue_size: AtomicUsize,
    next_id: AtomicU64,
    tx: OnceLock<mpsc::UnboundedSender<Command>>,
    counters: Arc<Counters>,
}

impl Default for EntryEventBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl EntryEventBroker {
    pub fn new() -> Self {
        Self {
            queue_size: AtomicUsize::new(DEFAULT_QUEUE_SIZE),
            next_id: AtomicU64::new(1),
            tx: OnceLock::new(),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Capacity for subscriber queues created from now on.
    pub fn configure(&self, queue_size: usize) {
        self.queue_size.store(queue_size, Ordering::Relaxed);
        tracing::debug!(queue_size, "entry broker configured");
    }

    pub fn queue_size(&self) -> usize {
        self.queue_size.load(Ordering::Relaxed)
    }

    /// Bind the runtime that owns the subscriber registry and start the
    /// dispatcher on it. Only the first call has an effect.
    pub fn set_loop(&self, handle: &Handle) {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.tx.set(tx).is_err() {
            tracing::warn!("entry broker already bound to a loop, ignoring");
            return;
        }
        handle.spawn(dispatch(rx, self.counters.clone()));
        tracing::info!("entry broker bound");
    }

    pub async fn subscribe(&self) -> Result<Subscriber, BrokerError> {
        let tx = self.tx.get().ok_or(BrokerError::NotBound)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, queue) = event_queue(self.queue_size());
        // built before the handshake so a cancelled subscribe still
        // unregisters through Drop
        let subscriber = Subscriber {
            id,
            queue,
            tx: tx.clone(),
        };
        let (ack, registered) = oneshot::channel();

        tx.send(Command::Subscribe {
            id,
            queue: sender,
            ack,
        })
        .map_err(|_| BrokerError::Closed)?;
        registered.await.map_err(|_| BrokerError::Closed)?;

        Ok(subscriber)
    }

    /// Remove `subscriber` from the registry. Unknown or already removed
    /// subscribers are ignored.
    pub async fn unsubscribe(&self, subscriber: &Subscriber) {
        let Some(tx) = self.tx.get() else {
            return;
        };
        let (ack, done) = oneshot::channel();
        if tx
            .send(Command::Unsubscribe {
                id: subscriber.id,
                ack: Some(ack),
            })
            .is_ok()
        {
            let _ = done.await;
        }
    }

    pub fn notify_entry_created(&self, entry: &EntrySnapshot) {
        self.schedule(EventMessage::EntryCreated {
            entry: entry.clone(),
        });
    }

    pub fn notify_entry_updated(&self, entry: &EntrySnapshot) {
        self.schedule(EventMessage::EntryUpdated {
            entry: entry.clone(),
        });
    }

    pub fn notify_entry_deleted(&self, entry_id: &str, entry_type: EntryType) {
        self.schedule(EventMessage::EntryDeleted {
            entry_id: entry_id.to_string(),
            entry_type,
        });
    }

    /// Hand a message to the dispatcher. Safe from any thread, never blocks.
    fn schedule(&self, message: EventMessage) {
        let sent = match self.tx.get() {
            Some(tx) => tx.send(Command::Publish(message)).is_ok(),
            None => false,
        };
        if sent {
            self.counters.published.fetch_add(1, Ordering::Relaxed);
        } else {
            let n = self.counters.dropped_unbound.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(dropped = n, "entry event dropped, broker has no running loop");
        }
    }

    /// Resolves once everything scheduled before this call was delivered.
    pub async fn flush(&self) {
        let Some(tx) = self.tx.get() else {
            return;
        };
        let (ack, done) = oneshot::channel();
        if tx.send(Command::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// Stop the dispatcher and close every registered queue.
    pub async fn shutdown(&self) {
        let Some(tx) = self.tx.get() else {
            return;
        };
        let (ack, done) = oneshot::channel();
        if tx.send(Command::Shutdown(ack)).is_ok() {
            let _ = done.await;
        }
    }

    pub fn stats(&self) -> BrokerStats {
        let c = &self.counters;
        BrokerStats {
            published: c.published.load(Ordering::Relaxed),
            dropped_unbound: c.dropped_unbound.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            overflowed: c.overflowed.load(Ordering::Relaxed),
            faults: c.faults.load(Ordering::Relaxed),
            subscribers: c.subscribers.load(Ordering::Relaxed),
        }
    }
}

async fn dispatch(mut rx: mpsc::UnboundedReceiver<Command>, counters: Arc<Counters>) {
    let mut registry: HashMap<SubscriberId, QueueSender> = HashMap::new();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Subscribe { id, queue, ack } => {
                registry.insert(id, queue);
                counters.subscribers.store(registry.len(), Ordering::Relaxed);
                if ack.send(()).is_err() {
                    // the caller stopped waiting, nobody will ever drain this queue
                    registry.remove(&id);
                    counters.subscribers.store(registry.len(), Ordering::Relaxed);
                    tracing::debug!(subscriber = id, "subscribe abandoned");
                    continue;
                }
                tracing::info!(subscriber = id, total = registry.len(), "subscriber added");
            }
            Command::Unsubscribe { id, ack } => {
                if registry.remove(&id).is_some() {
                    counters.subscribers.store(registry.len(), Ordering::Relaxed);
                    tracing::info!(subscriber = id, total = registry.len(), "subscriber removed");
                }
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
            }
            Command::Publish(message) => deliver(&registry, message, &counters),
            Command::Flush(ack) => {
                let _ = ack.send(());
            }
            Command::Shutdown(ack) => {
                close_all(&mut registry, &counters);
                tracing::info!("entry broker stopped");
                let _ = ack.send(());
                return;
            }
        }
    }

    close_all(&mut registry, &counters);
}

fn deliver(registry: &HashMap<SubscriberId, QueueSender>, message: EventMessage, counters: &Counters) {
    for (id, queue) in registry {
        match queue.push(message.clone()) {
            Ok(PushOutcome::Queued) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Ok(PushOutcome::EvictedOldest) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
                counters.overflowed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(PushOutcome::Discarded) => {
                counters.overflowed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                // left registered: the stream handler unsubscribes on teardown
                counters.faults.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(subscriber = id, error = %e, kind = message.kind(), "skipping subscriber");
            }
        }
    }
}

fn close_all(registry: &mut HashMap<SubscriberId, QueueSender>, counters: &Counters) {
    for queue in registry.values() {
        queue.close();
    }
    registry.clear();
    counters.subscribers.store(0, Ordering::Relaxed);
}

/// One streaming session's view of the broker.
///
/// Dropping it schedules an unsubscribe, so a handler that is cancelled
/// mid-stream still leaves the registry clean.
#[derive(Debug)]
pub struct Subscriber {
    id: SubscriberId,
    queue: QueueReceiver,
    tx: mpsc::UnboundedSender<Command>,
}

impl Subscriber {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next event, or `None` once this subscriber was unsubscribed, the broker
    /// shut down, or the queue was closed. Buffered events come out first.
    pub async fn recv(&mut self) -> Option<EventMessage> {
        self.queue.pop().await
    }

    pub fn try_recv(&mut self) -> Option<EventMessage> {
        self.queue.try_pop()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }

    /// Stop accepting events. Pushes to a closed queue count as faults.
    pub fn close(&self) {
        self.queue.close();
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Unsubscribe {
            id: self.id,
            ack: None,
        });
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Subscribe { id, .. } => write!(f, "Subscribe({id})"),
            Command::Unsubscribe { id, .. } => write!(f, "Unsubscribe({id})"),
            Command::Publish(m) => write!(f, "Publish({})", m.kind()),
            Command::Flush(_) => f.write_str("Flush"),
            Command::Shutdown(_) => f.write_str("Shutdown"),
        }
    }
}
