use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{AliasStore, LedgerStore, StoreError};

/// Alias map stored as a single JSON object, `{"<identity>": "<alias>"}`.
#[derive(Debug, Clone)]
pub struct JsonAliasStore {
    path: PathBuf,
}

impl JsonAliasStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl AliasStore for JsonAliasStore {
    async fn load_all(&self) -> Result<HashMap<String, String>, StoreError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(err) => return Err(StoreError::io(&self.path, err)),
        };
        if raw.trim().is_empty() {
            return Ok(HashMap::new());
        }

        serde_json::from_str::<HashMap<String, String>>(&raw).map_err(|err| {
            StoreError::Corrupt {
                path: self.path.clone(),
                message: err.to_string(),
            }
        })
    }

    async fn save_all(&self, aliases: &HashMap<String, String>) -> Result<(), StoreError> {
        ensure_parent(&self.path).await?;

        let ordered: BTreeMap<&String, &String> = aliases.iter().collect();
        let payload = serde_json::to_string_pretty(&ordered).map_err(|err| StoreError::Corrupt {
            path: self.path.clone(),
            message: err.to_string(),
        })?;

        let temp = self.temp_path();
        tokio::fs::write(&temp, payload)
            .await
            .map_err(|err| StoreError::io(&temp, err))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(|err| StoreError::io(&self.path, err))?;

        debug!("saved {} aliases to {}", aliases.len(), self.path.display());
        Ok(())
    }
}

/// Newline-delimited list of forwarded message ids.
#[derive(Debug, Clone)]
pub struct LineLedgerStore {
    path: PathBuf,
}

impl LineLedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl LedgerStore for LineLedgerStore {
    async fn load_all(&self) -> Result<Vec<String>, StoreError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::io(&self.path, err)),
        };

        Ok(raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(ToOwned::to_owned)
            .collect())
    }

    async fn append(&self, message_id: &str) -> Result<(), StoreError> {
        ensure_parent(&self.path).await?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|err| StoreError::io(&self.path, err))?;
        file.write_all(format!("{message_id}\n").as_bytes())
            .await
            .map_err(|err| StoreError::io(&self.path, err))?;
        file.flush()
            .await
            .map_err(|err| StoreError::io(&self.path, err))?;
        Ok(())
    }
}

async fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|err| StoreError::io(parent, err))?;
    }
    Ok(())
}
