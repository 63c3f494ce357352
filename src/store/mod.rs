//! Flat JSON-file persistence.
//!
//! Every store is a single JSON array on disk. Reads load the whole file,
//! writes replace the whole file. Writers are serialized per store by an
//! async mutex and across processes by an advisory lock on a sibling
//! `.lock` file, so two concurrent appends never lose a record.

pub mod ledger;
pub mod links;

pub use ledger::{LedgerEntry, UserContentLedger};
pub use links::{LinkId, LinkRecord, LinkRegistry};

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// Store error types
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize store: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// An append-mostly list of records kept as one JSON array file.
///
/// A missing, unreadable or corrupt file reads as an empty list. The next
/// write then starts the file over, which drops whatever was unreadable.
pub struct JsonListStore<T> {
    path: PathBuf,
    write_lock: Mutex<()>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonListStore<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Create a store backed by the given file. Nothing is read until the
    /// first operation.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    /// Read every record.
    pub async fn read_all(&self) -> Vec<T> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "store file missing, treating as empty");
                return Vec::new();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "store file unreadable, treating as empty");
                return Vec::new();
            }
        };

        match serde_json::from_slice(&data) {
            Ok(items) => items,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "store file corrupt, treating as empty");
                Vec::new()
            }
        }
    }

    /// Append one record and persist the whole list.
    pub async fn append(&self, item: T) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let _file_lock = self.lock_file().await?;
        let mut items = self.read_all().await;
        items.push(item);
        self.write_all(&items).await
    }

    /// Keep only records matching the predicate. Returns how many were removed.
    /// The file is left untouched when nothing matches.
    pub async fn retain<F>(&self, mut keep: F) -> StoreResult<usize>
    where
        F: FnMut(&T) -> bool,
    {
        let _guard = self.write_lock.lock().await;
        let _file_lock = self.lock_file().await?;
        let mut items = self.read_all().await;
        let before = items.len();
        items.retain(|item| keep(item));
        let removed = before - items.len();
        if removed > 0 {
            self.write_all(&items).await?;
        }
        Ok(removed)
    }

    /// Take the cross-process lock guarding read-modify-write cycles.
    /// Blocks on a worker thread until other holders release it.
    async fn lock_file(&self) -> StoreResult<StoreFileLock> {
        self.ensure_parent().await?;
        let path = lock_path(&self.path);
        tokio::task::spawn_blocking(move || StoreFileLock::acquire(&path))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
            .and_then(|locked| locked)
            .map_err(|source| self.io_error(source))
    }

    async fn ensure_parent(&self) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| self.io_error(source))?;
            }
        }
        Ok(())
    }

    /// Replace the file contents. Callers must hold both locks.
    async fn write_all(&self, items: &[T]) -> StoreResult<()> {
        let contents = serde_json::to_vec_pretty(items)?;
        let tmp = temp_path(&self.path);
        if let Err(source) = tokio::fs::write(&tmp, contents).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(self.io_error(source));
        }
        if let Err(source) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(self.io_error(source));
        }

        debug!(path = %self.path.display(), count = items.len(), "store written");
        Ok(())
    }

    fn io_error(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Exclusive advisory lock on a store's `.lock` file, released on drop.
struct StoreFileLock {
    file: File,
}

impl StoreFileLock {
    fn acquire(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;
        file.lock_exclusive()?;
        Ok(Self { file })
    }
}

impl Drop for StoreFileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

fn lock_path(path: &Path) -> PathBuf {
    sibling_path(path, ".lock")
}

/// A temp file name unique to one write.
fn temp_path(path: &Path) -> PathBuf {
    sibling_path(path, &format!(".{}.tmp", Uuid::new_v4().simple()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        n: u32,
    }

    #[tokio::test]
    async fn test_missing_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        let store: JsonListStore<Item> = JsonListStore::new(dir.path().join("items.json"));
        assert!(store.read_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("items.json");
        std::fs::write(&path, b"{not json").unwrap();

        let store: JsonListStore<Item> = JsonListStore::new(&path);
        assert!(store.read_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_append_after_corruption_starts_over() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("items.json");
        std::fs::write(&path, b"[{\"n\": 1}, oops").unwrap();

        let store = JsonListStore::new(&path);
        store.append(Item { n: 2 }).await.unwrap();
        assert_eq!(store.read_all().await, vec![Item { n: 2 }]);
    }

    #[tokio::test]
    async fn test_append_creates_parent_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/data/items.json");
        let store = JsonListStore::new(&path);

        store.append(Item { n: 1 }).await.unwrap();
        assert!(path.exists());
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_append_preserves_order() {
        let dir = TempDir::new().unwrap();
        let store = JsonListStore::new(dir.path().join("items.json"));
        for n in 0..3 {
            store.append(Item { n }).await.unwrap();
        }
        let ns: Vec<u32> = store.read_all().await.iter().map(|i| i.n).collect();
        assert_eq!(ns, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_retain_removes_matching() {
        let dir = TempDir::new().unwrap();
        let store = JsonListStore::new(dir.path().join("items.json"));
        for n in 0..5 {
            store.append(Item { n }).await.unwrap();
        }

        let removed = store.retain(|i| i.n % 2 == 0).await.unwrap();
        assert_eq!(removed, 2);
        let ns: Vec<u32> = store.read_all().await.iter().map(|i| i.n).collect();
        assert_eq!(ns, vec![0, 2, 4]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_keep_every_record() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(JsonListStore::new(dir.path().join("items.json")));

        let tasks: Vec<_> = (0..32)
            .map(|n| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.append(Item { n }).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let mut ns: Vec<u32> = store.read_all().await.iter().map(|i| i.n).collect();
        ns.sort_unstable();
        assert_eq!(ns, (0..32).collect::<Vec<_>>());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_separate_handles_on_one_file_keep_every_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("items.json");
        let first = Arc::new(JsonListStore::new(&path));
        let second = Arc::new(JsonListStore::new(&path));

        let tasks: Vec<_> = (0..40)
            .map(|n| {
                let store = if n % 2 == 0 {
                    Arc::clone(&first)
                } else {
                    Arc::clone(&second)
                };
                tokio::spawn(async move { store.append(Item { n }).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let mut ns: Vec<u32> = first.read_all().await.iter().map(|i| i.n).collect();
        ns.sort_unstable();
        assert_eq!(ns, (0..40).collect::<Vec<_>>());
    }

    #[test]
    fn test_temp_paths_are_unique() {
        let path = Path::new("/data/items.json");
        let a = temp_path(path);
        let b = temp_path(path);
        assert_ne!(a, b);
        assert_eq!(a.parent(), path.parent());
        assert!(a.to_string_lossy().ends_with(".tmp"));
        assert_eq!(lock_path(path), PathBuf::from("/data/items.json.lock"));
    }
}
