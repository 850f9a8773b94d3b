//! Whole-document JSON persistence with optimistic versioning.
//!
//! Every document carries a top-level `revision`. Writers go through a
//! [`Transaction`] which holds the store's in-process lock, and the commit
//! compares the on-disk revision with the one it read before replacing the
//! file. The new content is written to a sibling temp file and renamed, so
//! readers never observe a half-written document.
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::{
    fs,
    sync::{Mutex, MutexGuard},
};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Number of read-modify-write attempts before [`DocumentStore::update`]
/// gives up with [`Error::Conflict`].
const MAX_ATTEMPTS: usize = 3;

/// A JSON document persisted by a [`DocumentStore`].
pub trait Document: Serialize + DeserializeOwned + Send + Sync {
    /// Checked after every load and before every commit.
    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }
}

#[derive(Deserialize)]
struct Versioned<T> {
    #[serde(default)]
    revision: u64,
    #[serde(flatten)]
    body: T,
}

#[derive(Serialize)]
struct VersionedRef<'a, T> {
    revision: u64,
    #[serde(flatten)]
    body: &'a T,
}

#[derive(Deserialize)]
struct RevisionOnly {
    #[serde(default)]
    revision: u64,
}

pub struct DocumentStore<T> {
    path: PathBuf,
    default: Option<fn() -> T>,
    write_lock: Mutex<()>,
}

impl<T: Document> DocumentStore<T> {
    /// A document that must exist; loading a missing file is
    /// [`Error::ConfigurationMissing`].
    pub fn required(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            default: None,
            write_lock: Mutex::new(()),
        }
    }

    /// A document that starts out as `T::default()` until first written.
    pub fn with_default(path: impl Into<PathBuf>) -> Self
    where
        T: Default,
    {
        Self {
            path: path.into(),
            default: Some(T::default),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the latest persisted version. Takes no lock.
    pub async fn load(&self) -> Result<T> {
        Ok(self.read().await?.1)
    }

    /// Start a read-modify-write transaction. Concurrent transactions on the
    /// same store wait for each other.
    pub async fn begin(&self) -> Result<Transaction<'_, T>> {
        let guard = self.write_lock.lock().await;
        let (revision, doc) = self.read().await?;
        Ok(Transaction {
            store: self,
            _guard: guard,
            revision,
            doc,
        })
    }

    /// Apply `edit` in a transaction and commit, retrying when another
    /// process changed the file underneath us. Returns the committed document
    /// together with whatever `edit` returned.
    pub async fn update<F, R>(&self, mut edit: F) -> Result<(T, R)>
    where
        F: FnMut(&mut T) -> Result<R>,
    {
        let mut attempt = 1;
        loop {
            let mut tx = self.begin().await?;
            let out = edit(&mut tx.doc)?;
            match tx.commit().await {
                Ok(doc) => return Ok((doc, out)),
                Err(Error::Conflict(path)) if attempt < MAX_ATTEMPTS => {
                    warn!(path = %path.display(), attempt, "document changed on disk, retrying update");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn read(&self) -> Result<(u64, T)> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return match self.default {
                    Some(default) => Ok((0, default())),
                    None => Err(Error::ConfigurationMissing(self.path.clone())),
                };
            }
            Err(e) => return Err(self.invalid(e.to_string())),
        };

        let versioned: Versioned<T> =
            serde_json::from_slice(&bytes).map_err(|e| self.invalid(e.to_string()))?;
        versioned.body.validate().map_err(|reason| self.invalid(reason))?;
        Ok((versioned.revision, versioned.body))
    }

    async fn disk_revision(&self) -> Result<u64> {
        match fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice::<RevisionOnly>(&bytes)
                .map(|r| r.revision)
                .map_err(|e| self.invalid(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(self.invalid(e.to_string())),
        }
    }

    fn invalid(&self, reason: String) -> Error {
        Error::ConfigurationInvalid {
            path: self.path.clone(),
            reason,
        }
    }

    fn persist_failed(&self, e: impl std::fmt::Display) -> Error {
        Error::PersistFailed {
            path: self.path.clone(),
            reason: e.to_string(),
        }
    }
}

/// An open read-modify-write on a [`DocumentStore`]. Dropping it without
/// calling [`commit`](Transaction::commit) discards the edits.
pub struct Transaction<'a, T> {
    store: &'a DocumentStore<T>,
    _guard: MutexGuard<'a, ()>,
    revision: u64,
    pub doc: T,
}

impl<T: Document> Transaction<'_, T> {
    /// Revision the document had when the transaction began.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub async fn commit(self) -> Result<T> {
        let store = self.store;
        self.doc.validate().map_err(Error::Validation)?;

        if store.disk_revision().await? != self.revision {
            return Err(Error::Conflict(store.path.clone()));
        }

        let next = self.revision + 1;
        let bytes = serde_json::to_vec_pretty(&VersionedRef {
            revision: next,
            body: &self.doc,
        })
        .map_err(|e| store.persist_failed(e))?;

        if let Some(dir) = store.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| store.persist_failed(e))?;
        }

        let tmp = store.path.with_extension("tmp");
        fs::write(&tmp, &bytes)
            .await
            .map_err(|e| store.persist_failed(e))?;
        fs::rename(&tmp, &store.path)
            .await
            .map_err(|e| store.persist_failed(e))?;

        debug!(path = %store.path.display(), revision = next, bytes = bytes.len(), "document saved");
        Ok(self.doc)
    }
}
