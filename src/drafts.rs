//! Auto-saved form drafts, one JSON file per user, expiring after a TTL.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::profile::FieldMap;

#[derive(Debug, thiserror::Error)]
pub enum DraftError {
    #[error("Failed to access draft {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("Draft {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draft {
    pub saved_at: DateTime<Utc>,
    pub step: usize,
    pub fields: FieldMap,
}

pub struct DraftStore {
    dir: PathBuf,
    ttl: Duration,
}

impl DraftStore {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
        }
    }

    /// One file per user; hex keeps the name filesystem-safe and distinct per email.
    fn path_for(&self, user: &str) -> PathBuf {
        self.dir
            .join(format!("draft_{}.json", hex::encode(user.as_bytes())))
    }

    pub fn save(&self, user: &str, step: usize, fields: &FieldMap) -> Result<(), DraftError> {
        self.save_at(user, step, fields, Utc::now())
    }

    pub fn save_at(
        &self,
        user: &str,
        step: usize,
        fields: &FieldMap,
        saved_at: DateTime<Utc>,
    ) -> Result<(), DraftError> {
        let path = self.path_for(user);
        fs::create_dir_all(&self.dir).map_err(|source| DraftError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let draft = Draft {
            saved_at,
            step,
            fields: fields.clone(),
        };
        let body = serde_json::to_vec_pretty(&draft).map_err(|source| DraftError::Corrupt {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, body).map_err(|source| DraftError::Io { path, source })
    }

    /// Load the user's draft; an expired draft is deleted and treated as absent.
    pub fn load(&self, user: &str) -> Result<Option<Draft>, DraftError> {
        self.load_at(user, Utc::now())
    }

    pub fn load_at(&self, user: &str, now: DateTime<Utc>) -> Result<Option<Draft>, DraftError> {
        let path = self.path_for(user);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(DraftError::Io { path, source }),
        };
        let draft: Draft = serde_json::from_slice(&bytes).map_err(|source| DraftError::Corrupt {
            path: path.clone(),
            source,
        })?;

        let age = now.signed_duration_since(draft.saved_at);
        let expired = age
            .to_std()
            .map(|age| age > self.ttl)
            .unwrap_or(false);
        if expired {
            tracing::debug!(path = %path.display(), "discarding expired draft");
            remove_if_exists(&path)?;
            return Ok(None);
        }
        Ok(Some(draft))
    }

    pub fn clear(&self, user: &str) -> Result<(), DraftError> {
        remove_if_exists(&self.path_for(user))
    }
}

fn remove_if_exists(path: &Path) -> Result<(), DraftError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(DraftError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
