use std::collections::HashMap;

use async_trait::async_trait;

use super::StoreError;

/// Durable backing for the identity map. The whole map is read and written
/// at once.
#[async_trait]
pub trait AliasStore: Send + Sync {
    async fn load_all(&self) -> Result<HashMap<String, String>, StoreError>;
    async fn save_all(&self, aliases: &HashMap<String, String>) -> Result<(), StoreError>;
}

/// Durable backing for the delivery ledger. Identifiers are only ever
/// appended.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<String>, StoreError>;
    async fn append(&self, message_id: &str) -> Result<(), StoreError>;
}
