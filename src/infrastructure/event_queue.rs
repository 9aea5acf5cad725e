use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_broadcast::{Receiver, RecvError, Sender, TryRecvError};

use crate::domain::EventMessage;

/// What happened to a pushed message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// queue was full: the oldest buffered message was discarded to make room
    EvictedOldest,
    /// zero-capacity queue: the message itself was discarded
    Discarded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("event queue is closed")]
pub struct QueueClosed;

/// Bounded FIFO of events for one subscriber, drop-oldest on overflow.
///
/// The sending half belongs to the broker dispatcher, the receiving half to
/// the subscriber's own task. Pushing never blocks. Dropping either half
/// closes the queue; the receiver still drains what was buffered.
pub fn event_queue(capacity: usize) -> (QueueSender, QueueReceiver) {
    // async_broadcast rejects a zero capacity; such a queue never buffers anyway
    let (mut tx, rx) = async_broadcast::broadcast(capacity.max(1));
    tx.set_overflow(true); // Drop oldest messages when full
    let dropped = Arc::new(AtomicU64::new(0));
    (
        QueueSender {
            capacity,
            tx,
            dropped: dropped.clone(),
        },
        QueueReceiver {
            capacity,
            rx,
            dropped,
        },
    )
}

pub struct QueueSender {
    capacity: usize,
    tx: Sender<EventMessage>,
    dropped: Arc<AtomicU64>,
}

impl QueueSender {
    pub fn push(&self, message: EventMessage) -> Result<PushOutcome, QueueClosed> {
        if self.tx.is_closed() {
            return Err(QueueClosed);
        }
        if self.capacity == 0 {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(PushOutcome::Discarded);
        }
        match self.tx.try_broadcast(message) {
            Ok(None) => Ok(PushOutcome::Queued),
            Ok(Some(_evicted)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Ok(PushOutcome::EvictedOldest)
            }
            // overflow mode never reports Full, so this is Closed or Inactive
            Err(_) => Err(QueueClosed),
        }
    }

    pub fn close(&self) {
        self.tx.close();
    }
}

impl fmt::Debug for QueueSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueSender")
            .field("capacity", &self.capacity)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

pub struct QueueReceiver {
    capacity: usize,
    rx: Receiver<EventMessage>,
    dropped: Arc<AtomicU64>,
}

impl QueueReceiver {
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Waits for the next message. Returns `None` once the queue is closed
    /// and everything buffered before closing has been taken.
    pub async fn pop(&mut self) -> Option<EventMessage> {
        loop {
            match self.rx.recv().await {
                Ok(m) => return Some(m),
                // already counted on the sending side
                Err(RecvError::Overflowed(_)) => continue,
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_pop(&mut self) -> Option<EventMessage> {
        loop {
            match self.rx.try_recv() {
                Ok(m) => return Some(m),
                Err(TryRecvError::Overflowed(_)) => continue,
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    pub fn close(&self) {
        self.rx.close();
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Messages evicted or discarded because the consumer fell behind.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for QueueReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueReceiver")
            .field("capacity", &self.capacity)
            .field("len", &self.rx.len())
            .field("dropped", &self.dropped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EntryType;

    fn msg(n: usize) -> EventMessage {
        EventMessage::EntryDeleted {
            entry_id: format!("id-{n}"),
            entry_type: EntryType::Raw,
        }
    }

    fn drain(q: &mut QueueReceiver) -> Vec<EventMessage> {
        std::iter::from_fn(|| q.try_pop()).collect()
    }

    #[test]
    fn keeps_most_recent_on_overflow() {
        let (tx, mut rx) = event_queue(3);
        for n in 0..5 {
            tx.push(msg(n)).unwrap();
        }
        assert_eq!(drain(&mut rx), vec![msg(2), msg(3), msg(4)]);
        assert_eq!(rx.dropped(), 2);
    }

    #[test]
    fn reports_eviction() {
        let (tx, rx) = event_queue(1);
        assert_eq!(tx.push(msg(0)), Ok(PushOutcome::Queued));
        assert_eq!(tx.push(msg(1)), Ok(PushOutcome::EvictedOldest));
        assert_eq!(rx.len(), 1);
    }

    #[test]
    fn zero_capacity_discards_everything() {
        let (tx, rx) = event_queue(0);
        assert_eq!(tx.push(msg(0)), Ok(PushOutcome::Discarded));
        assert!(rx.is_empty());
        assert_eq!(rx.dropped(), 1);
    }

    #[test]
    fn closed_queue_rejects_push() {
        let (tx, rx) = event_queue(4);
        rx.close();
        assert_eq!(tx.push(msg(0)), Err(QueueClosed));

        let (tx, rx) = event_queue(0);
        drop(rx);
        assert_eq!(tx.push(msg(0)), Err(QueueClosed));
    }

    #[tokio::test]
    async fn pop_drains_buffer_before_reporting_close() {
        let (tx, mut rx) = event_queue(4);
        tx.push(msg(0)).unwrap();
        tx.close();
        assert_eq!(rx.pop().await, Some(msg(0)));
        assert_eq!(rx.pop().await, None);
    }

    #[tokio::test]
    async fn pop_skips_past_evicted_messages() {
        let (tx, mut rx) = event_queue(2);
        for n in 0..4 {
            tx.push(msg(n)).unwrap();
        }
        assert_eq!(rx.pop().await, Some(msg(2)));
        assert_eq!(rx.pop().await, Some(msg(3)));
        assert_eq!(rx.dropped(), 2);
    }

    #[tokio::test]
    async fn pop_wakes_on_push_from_another_task() {
        let (tx, mut rx) = event_queue(4);
        let handle = tokio::spawn(async move {
            tokio::task::yield_now().await;
            tx.push(msg(7)).unwrap();
            tx
        });
        assert_eq!(rx.pop().await, Some(msg(7)));
        handle.await.unwrap();
    }
}
