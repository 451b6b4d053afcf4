use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
};

use tokio::sync::Notify;

/// A bounded inbox that never blocks the publisher: when full, the oldest
/// pending entry is evicted and handed back to the caller.
pub struct FifoDropOldestQueue<T> {
    inner: Arc<FifoDropOldestInner<T>>,
}

struct FifoDropOldestInner<T> {
    buf: Mutex<VecDeque<T>>,
    capacity: usize,
    notify_any: Arc<Notify>,
}

impl<T> FifoDropOldestInner<T> {
    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        // Push and pop leave the deque consistent even if a holder panicked.
        self.buf.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct FifoDropOldestReceiver<T> {
    inner: Arc<FifoDropOldestInner<T>>,
}

impl<T> FifoDropOldestQueue<T> {
    /// `capacity` is clamped to at least one slot.
    pub fn new(capacity: usize, notify_any: Arc<Notify>) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(FifoDropOldestInner {
                buf: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                notify_any,
            }),
        }
    }

    /// Enqueue `value`, returning the entry evicted to make room, if any.
    pub fn push_overwrite(&self, value: T) -> Option<T> {
        let mut buf = self.inner.lock();
        let evicted = if buf.len() >= self.inner.capacity {
            buf.pop_front()
        } else {
            None
        };
        buf.push_back(value);
        drop(buf);
        self.inner.notify_any.notify_one();
        evicted
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn receiver(&self) -> FifoDropOldestReceiver<T> {
        FifoDropOldestReceiver {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> FifoDropOldestReceiver<T> {
    pub fn try_recv(&self) -> Option<T> {
        self.inner.lock().pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_when_full() {
        let q = FifoDropOldestQueue::new(2, Arc::new(Notify::new()));
        let rx = q.receiver();
        assert_eq!(q.push_overwrite(1), None);
        assert_eq!(q.push_overwrite(2), None);
        assert_eq!(q.push_overwrite(3), Some(1));
        assert_eq!(q.len(), 2);

        assert_eq!(rx.try_recv(), Some(2));
        assert_eq!(rx.try_recv(), Some(3));
        assert_eq!(rx.try_recv(), None);
        assert!(q.is_empty());
    }

    #[test]
    fn zero_capacity_still_holds_the_latest_entry() {
        let q = FifoDropOldestQueue::new(0, Arc::new(Notify::new()));
        q.push_overwrite("a");
        assert_eq!(q.push_overwrite("b"), Some("a"));
        assert_eq!(q.receiver().try_recv(), Some("b"));
    }
}
