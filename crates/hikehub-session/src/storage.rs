//! Key-value storage for the access token slot
//!
//! `MemoryStorage` lives and dies with the process, which is the
//! session-scoped behavior the organizer application expects by default.
//! `FileStorage` survives restarts: a JSON object on disk, written with an
//! atomic temp-file + rename and 0600 permissions since it holds a bearer
//! token.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Boxed future returned by [`SessionStorage`] methods.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Named-slot string storage.
///
/// Uses `Pin<Box<dyn Future>>` return types so the session manager can hold
/// an `Arc<dyn SessionStorage>`.
pub trait SessionStorage: Send + Sync {
    fn get_item<'a>(&'a self, key: &'a str) -> StorageFuture<'a, Option<String>>;

    fn set_item<'a>(&'a self, key: &'a str, value: String) -> StorageFuture<'a, ()>;

    /// Removing an absent key is not an error.
    fn remove_item<'a>(&'a self, key: &'a str) -> StorageFuture<'a, ()>;
}

/// Process-local storage.
#[derive(Default)]
pub struct MemoryStorage {
    items: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemoryStorage {
    fn get_item<'a>(&'a self, key: &'a str) -> StorageFuture<'a, Option<String>> {
        Box::pin(async move { Ok(self.items.read().await.get(key).cloned()) })
    }

    fn set_item<'a>(&'a self, key: &'a str, value: String) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            self.items.write().await.insert(key.to_string(), value);
            Ok(())
        })
    }

    fn remove_item<'a>(&'a self, key: &'a str) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            self.items.write().await.remove(key);
            Ok(())
        })
    }
}

/// JSON-file-backed storage.
///
/// The Mutex serializes writes so concurrent `set_item`/`remove_item` calls
/// never interleave their temp-file renames.
pub struct FileStorage {
    path: PathBuf,
    items: Mutex<HashMap<String, String>>,
}

impl FileStorage {
    /// Load the storage file, creating it as `{}` when absent.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let items = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Storage(format!("reading session file: {e}")))?;
            let items: HashMap<String, String> = serde_json::from_str(&contents)
                .map_err(|e| Error::Storage(format!("parsing session file: {e}")))?;
            info!(path = %path.display(), slots = items.len(), "loaded session file");
            items
        } else {
            info!(path = %path.display(), "session file not found, starting empty");
            let items = HashMap::new();
            write_atomic(&path, &items).await?;
            items
        };

        Ok(Self {
            path,
            items: Mutex::new(items),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStorage for FileStorage {
    fn get_item<'a>(&'a self, key: &'a str) -> StorageFuture<'a, Option<String>> {
        Box::pin(async move { Ok(self.items.lock().await.get(key).cloned()) })
    }

    fn set_item<'a>(&'a self, key: &'a str, value: String) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            let mut items = self.items.lock().await;
            items.insert(key.to_string(), value);
            debug!(key, "stored session slot");
            write_atomic(&self.path, &items).await
        })
    }

    fn remove_item<'a>(&'a self, key: &'a str) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            let mut items = self.items.lock().await;
            if items.remove(key).is_some() {
                debug!(key, "removed session slot");
                write_atomic(&self.path, &items).await?;
            }
            Ok(())
        })
    }
}

/// Write the slot map to `path` via a temp file in the same directory.
async fn write_atomic(path: &Path, items: &HashMap<String, String>) -> Result<()> {
    let json = serde_json::to_string_pretty(items)
        .map_err(|e| Error::Storage(format!("serializing session file: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Storage("session path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".session.tmp.{}", std::process::id()));

    // A leftover from an interrupted write may carry other permissions
    match tokio::fs::remove_file(&tmp_path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(Error::Storage(format!("removing stale temp session file: {e}"))),
    }

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options
        .open(&tmp_path)
        .await
        .map_err(|e| Error::Storage(format!("creating temp session file: {e}")))?;
    file.write_all(json.as_bytes())
        .await
        .map_err(|e| Error::Storage(format!("writing temp session file: {e}")))?;
    file.sync_all()
        .await
        .map_err(|e| Error::Storage(format!("syncing temp session file: {e}")))?;
    drop(file);

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Storage(format!("renaming temp session file: {e}")))?;

    Ok(())
}
