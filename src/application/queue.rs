//! Bounded per-client update queue.
//!
//! Overflow policy: when full, the oldest queued duplicate-balance event is
//! dropped and counted. A queue holding only distinct balances never drops;
//! the producer waits for the consumer instead.

use crate::domain::types::BalanceUpdate;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{Mutex, Notify};

pub struct ClientQueue {
    inner: Mutex<VecDeque<BalanceUpdate>>,
    capacity: usize,
    dropped_duplicates: AtomicU64,
    consumer_wake: Notify,
    producer_wake: Notify,
    closed: AtomicBool,
}

impl ClientQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            dropped_duplicates: AtomicU64::new(0),
            consumer_wake: Notify::new(),
            producer_wake: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn dropped_duplicates(&self) -> u64 {
        self.dropped_duplicates.load(Ordering::SeqCst)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.consumer_wake.notify_one();
        self.producer_wake.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Enqueue an update. Returns false if the queue has been closed.
    pub async fn push(&self, update: BalanceUpdate) -> bool {
        loop {
            if self.is_closed() {
                return false;
            }

            {
                let mut queue = self.inner.lock().await;
                if queue.len() < self.capacity {
                    queue.push_back(update);
                    self.consumer_wake.notify_one();
                    return true;
                }

                // Full: evict the oldest event whose balance repeats its
                // predecessor. Non-duplicates are never dropped.
                if let Some(index) = find_oldest_duplicate(&queue) {
                    let _ = queue.remove(index);
                    self.dropped_duplicates.fetch_add(1, Ordering::SeqCst);
                    queue.push_back(update);
                    self.consumer_wake.notify_one();
                    return true;
                }
            }

            self.producer_wake.notified().await;
        }
    }

    /// Dequeue the next update, or `None` once closed and drained.
    pub async fn pop(&self) -> Option<BalanceUpdate> {
        loop {
            {
                let mut queue = self.inner.lock().await;
                if let Some(update) = queue.pop_front() {
                    self.producer_wake.notify_one();
                    return Some(update);
                }
            }

            if self.is_closed() {
                return None;
            }
            self.consumer_wake.notified().await;
        }
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

fn find_oldest_duplicate(queue: &VecDeque<BalanceUpdate>) -> Option<usize> {
    (1..queue.len()).find(|&i| queue[i].new_balance == queue[i - 1].new_balance)
}
