use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::store::{LedgerStore, StoreError};

/// Process-wide record of message ids that have already been mirrored.
pub struct DeliveryLedger {
    store: Arc<dyn LedgerStore>,
    seen: Mutex<HashSet<String>>,
}

impl DeliveryLedger {
    pub async fn load(store: Arc<dyn LedgerStore>) -> Result<Self, StoreError> {
        let seen: HashSet<String> = store.load_all().await?.into_iter().collect();
        debug!("loaded {} mirrored message ids", seen.len());
        Ok(Self {
            store,
            seen: Mutex::new(seen),
        })
    }

    #[cfg(test)]
    pub async fn is_new(&self, message_id: &str) -> bool {
        !self.seen.lock().await.contains(message_id)
    }

    /// Records `message_id` and returns whether it was new, as one
    /// check-and-insert.
    ///
    /// The check, the insert and the append happen under one lock. When the
    /// append fails the insert is undone, so the id is offered again on the
    /// next poll.
    pub async fn mark_new(&self, message_id: &str) -> Result<bool, StoreError> {
        let mut seen = self.seen.lock().await;
        if !seen.insert(message_id.to_string()) {
            return Ok(false);
        }

        if let Err(err) = self.store.append(message_id).await {
            seen.remove(message_id);
            return Err(err);
        }
        Ok(true)
    }

    pub async fn len(&self) -> usize {
        self.seen.lock().await.len()
    }
}
