//! File-backed transient and option storage.
//!
//! Transients expire; options are durable. Each key lives in its own JSON
//! file and writes go through a temporary file plus rename, so concurrent
//! writers race to last-writer-wins without leaving torn files behind.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use time::OffsetDateTime;
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use super::error::InfraError;

const TRANSIENTS_DIR: &str = "transients";
const OPTIONS_DIR: &str = "options";

#[derive(Debug, Serialize, Deserialize)]
struct TransientRecord {
    value: String,
    /// Unix timestamp after which the value is gone.
    expires_at: i64,
}

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Unexpired transient value. Expired entries are removed on read.
    pub async fn get_transient(&self, key: &str) -> Result<Option<String>, InfraError> {
        let path = self.path(TRANSIENTS_DIR, key)?;
        let Some(record) = read_json::<TransientRecord>(&path).await? else {
            return Ok(None);
        };
        if record.expires_at <= OffsetDateTime::now_utc().unix_timestamp() {
            debug!(key, "Transient expired");
            if let Err(err) = fs::remove_file(&path).await
                && err.kind() != std::io::ErrorKind::NotFound
            {
                return Err(err.into());
            }
            return Ok(None);
        }
        Ok(Some(record.value))
    }

    pub async fn set_transient(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), InfraError> {
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let record = TransientRecord {
            value: value.to_string(),
            expires_at: OffsetDateTime::now_utc()
                .unix_timestamp()
                .saturating_add(ttl),
        };
        write_json(&self.path(TRANSIENTS_DIR, key)?, &record).await
    }

    pub async fn delete_transient(&self, key: &str) -> Result<(), InfraError> {
        match fs::remove_file(self.path(TRANSIENTS_DIR, key)?).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn option<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, InfraError> {
        read_json(&self.path(OPTIONS_DIR, key)?).await
    }

    pub async fn update_option<T: Serialize>(&self, key: &str, value: &T) -> Result<(), InfraError> {
        write_json(&self.path(OPTIONS_DIR, key)?, value).await
    }

    fn path(&self, dir: &str, key: &str) -> Result<PathBuf, InfraError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-');
        if !valid {
            return Err(InfraError::configuration(format!(
                "invalid store key `{key}`"
            )));
        }
        Ok(self.root.join(dir).join(format!("{key}.json")))
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, InfraError> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|err| InfraError::serialization(format!("{}: {err}", path.display())))
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), InfraError> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|err| InfraError::serialization(err.to_string()))?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let temp = path.with_extension(format!("json.{}.tmp", Uuid::new_v4().simple()));
    fs::write(&temp, bytes).await?;
    if let Err(err) = fs::rename(&temp, path).await {
        let _ = fs::remove_file(&temp).await;
        return Err(err.into());
    }
    Ok(())
}
