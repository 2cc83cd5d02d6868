//! Authoritative per-site state: storage manager, operation log, and the
//! request endpoint that actors talk to.

pub mod client;
pub mod manager;
pub mod oplog;
pub mod server;

pub use client::SmClient;
pub use manager::StorageManager;
pub use oplog::{OpLog, OpLogStats};
pub use server::{SmHandler, StorageSite};

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::domain::LoanRuleError;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Rule(#[from] LoanRuleError),
    #[error("storage io on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("storage encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl StorageError {
    pub fn is_rule(&self) -> bool {
        matches!(self, StorageError::Rule(_))
    }

    /// Reply reason for the wire: business failures keep their message,
    /// infrastructure failures are reported opaquely.
    pub fn reply_reason(&self) -> String {
        match self {
            StorageError::Rule(rule) => rule.to_string(),
            _ => "internal error".to_string(),
        }
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Read a JSON file, treating a missing or corrupt file as the default
/// value so a site can always come up.
pub(crate) async fn read_json_or_default<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    match tokio::fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "corrupt file, starting empty");
                T::default()
            }
        },
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => T::default(),
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "unreadable file, starting empty");
            T::default()
        }
    }
}

/// Atomic write: serialize to `<file>.tmp`, then rename over `<file>`.
pub(crate) async fn write_json_atomic<T: Serialize>(
    path: &Path,
    value: &T,
) -> Result<(), StorageError> {
    let tmp = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(&tmp, &bytes)
        .await
        .map_err(|source| io_error(&tmp, source))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|source| io_error(path, source))?;
    Ok(())
}
