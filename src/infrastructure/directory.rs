//! In-process view of the user directory.
//!
//! The real directory service owns registration and credential encryption;
//! the engine only ever reads. This implementation backs the read seam with
//! the registrations received over the admin surface, keeping credentials
//! out of any global state.

use crate::domain::ports::UserDirectory;
use crate::domain::risk::RiskLimits;
use crate::domain::types::{ClientRecord, Credentials};
use anyhow::{Result, bail};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

struct DirectoryEntry {
    record: ClientRecord,
    credentials: Credentials,
}

#[derive(Default)]
pub struct InMemoryUserDirectory {
    entries: RwLock<HashMap<String, DirectoryEntry>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, record: ClientRecord, credentials: Credentials) {
        let mut entries = self.entries.write().await;
        entries.insert(
            record.client_id.clone(),
            DirectoryEntry {
                record,
                credentials,
            },
        );
    }

    pub async fn update_limits(&self, client_id: &str, limits: RiskLimits) -> Result<()> {
        let mut entries = self.entries.write().await;
        match entries.get_mut(client_id) {
            Some(entry) => {
                entry.record.daily_risk = limits.daily_risk;
                entry.record.max_risk = limits.max_risk;
                Ok(())
            }
            None => bail!("client {} is not registered", client_id),
        }
    }

    pub async fn remove(&self, client_id: &str) {
        self.entries.write().await.remove(client_id);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn get_client(&self, client_id: &str) -> Result<Option<ClientRecord>> {
        Ok(self
            .entries
            .read()
            .await
            .get(client_id)
            .map(|entry| entry.record.clone()))
    }

    async fn get_credentials(&self, client_id: &str) -> Result<Credentials> {
        match self.entries.read().await.get(client_id) {
            Some(entry) => Ok(entry.credentials.clone()),
            None => bail!("no credentials for client {}", client_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::risk::RiskLimit;
    use crate::domain::types::Venue;
    use rust_decimal_macros::dec;

    fn record(client_id: &str) -> ClientRecord {
        ClientRecord {
            client_id: client_id.to_string(),
            venue: Venue::Futures,
            initial_balance: dec!(10000),
            daily_risk: RiskLimit::Absolute(dec!(200)),
            max_risk: RiskLimit::Percentage(dec!(10)),
        }
    }

    #[tokio::test]
    async fn test_register_and_read_back() {
        let directory = InMemoryUserDirectory::new();
        directory
            .register(record("c-1"), Credentials::new("k", "s"))
            .await;

        let fetched = directory.get_client("c-1").await.unwrap().unwrap();
        assert_eq!(fetched.venue, Venue::Futures);
        assert!(directory.get_client("missing").await.unwrap().is_none());
        assert!(directory.get_credentials("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_update_limits_replaces_both() {
        let directory = InMemoryUserDirectory::new();
        directory
            .register(record("c-1"), Credentials::new("k", "s"))
            .await;

        directory
            .update_limits(
                "c-1",
                RiskLimits {
                    daily_risk: RiskLimit::Absolute(dec!(300)),
                    max_risk: RiskLimit::Absolute(dec!(900)),
                },
            )
            .await
            .unwrap();

        let fetched = directory.get_client("c-1").await.unwrap().unwrap();
        assert_eq!(fetched.daily_risk, RiskLimit::Absolute(dec!(300)));
        assert_eq!(fetched.max_risk, RiskLimit::Absolute(dec!(900)));
    }
}
