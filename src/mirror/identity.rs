use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::store::{AliasStore, StoreError};
use crate::utils::apply_pattern_string;

/// Process-wide mapping from a real author identity to a pseudonymous alias.
///
/// Aliases are handed out in first-seen order (`user1`, `user2`, ...) and are
/// never reassigned. The full map is written back to the store after every
/// new assignment, while the lock is still held, so concurrent pipelines
/// serialize their read-modify-persist sequence.
pub struct IdentityMap {
    store: Arc<dyn AliasStore>,
    pattern: String,
    aliases: Mutex<HashMap<String, String>>,
}

impl IdentityMap {
    pub async fn load(
        store: Arc<dyn AliasStore>,
        pattern: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let aliases = store.load_all().await?;
        debug!("loaded {} aliases", aliases.len());
        Ok(Self {
            store,
            pattern: pattern.into(),
            aliases: Mutex::new(aliases),
        })
    }

    pub async fn resolve_alias(&self, identity: &str) -> String {
        let mut aliases = self.aliases.lock().await;
        if let Some(alias) = aliases.get(identity) {
            return alias.clone();
        }

        let alias = self.next_alias(&aliases);
        aliases.insert(identity.to_string(), alias.clone());
        debug!("assigned alias {} to a new identity", alias);

        // The alias stays assigned even if the write fails; the next
        // assignment rewrites the whole map.
        if let Err(err) = self.store.save_all(&aliases).await {
            error!("failed to persist alias map: {}", err);
        }
        alias
    }

    #[cfg(test)]
    pub async fn alias_of(&self, identity: &str) -> Option<String> {
        self.aliases.lock().await.get(identity).cloned()
    }

    pub async fn len(&self) -> usize {
        self.aliases.lock().await.len()
    }

    fn next_alias(&self, aliases: &HashMap<String, String>) -> String {
        let taken: HashSet<&str> = aliases.values().map(String::as_str).collect();
        let mut counter = aliases.len() + 1;
        loop {
            let candidate = apply_pattern_string(&self.pattern, &[("n", &counter.to_string())]);
            if !taken.contains(candidate.as_str()) {
                return candidate;
            }
            counter += 1;
        }
    }
}
