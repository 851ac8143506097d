//! Process-wide enforcement slot registry.
//!
//! One slot per `(client_id, session_epoch)` guarantees at most one
//! enforcement run per client session at any time. Completion is recorded
//! in the account status itself; the registry only tracks in-flight runs
//! and entries are removed as soon as a run ends.

use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

type SlotKey = (String, u64);

#[derive(Default)]
pub struct ActionSlotRegistry {
    in_flight: Mutex<HashSet<SlotKey>>,
}

impl ActionSlotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the slot was free and is now held by the caller.
    pub async fn try_acquire(&self, client_id: &str, session_epoch: u64) -> bool {
        self.in_flight
            .lock()
            .await
            .insert((client_id.to_string(), session_epoch))
    }

    pub async fn release(&self, client_id: &str, session_epoch: u64) {
        self.in_flight
            .lock()
            .await
            .remove(&(client_id.to_string(), session_epoch));
    }

    pub async fn is_in_flight(&self, client_id: &str) -> bool {
        self.in_flight
            .lock()
            .await
            .iter()
            .any(|(id, _)| id == client_id)
    }

    /// Wait until no run is in flight for the client, up to `grace`.
    /// Returns true if the client went idle in time.
    pub async fn wait_idle(&self, client_id: &str, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        while self.is_in_flight(client_id).await {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        true
    }

    /// Drop any leftover entry for a fenced-off epoch (hard-killed run).
    pub async fn purge(&self, client_id: &str, session_epoch: u64) {
        self.release(client_id, session_epoch).await;
    }
}
