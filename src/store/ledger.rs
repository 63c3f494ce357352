//! Ledger of content created through the API.
//!
//! Only folders created and files uploaded through the server may later be
//! deleted through it. Paths are stored relative to the base root with `/`
//! separators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use super::{JsonListStore, StoreResult};

/// Directory ledger file name
pub const USER_DIRECTORIES_FILE: &str = "user-directories.json";

/// File ledger file name
pub const USER_FILES_FILE: &str = "user-files.json";

/// One ledgered path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: Uuid,
    pub path: String,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    fn new(path: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            path: clean(path),
            created_at: Utc::now(),
        }
    }
}

/// Directory and file ledgers kept side by side in the data directory.
pub struct UserContentLedger {
    directories: JsonListStore<LedgerEntry>,
    files: JsonListStore<LedgerEntry>,
}

impl UserContentLedger {
    /// Open both ledgers under `data_dir`
    pub fn open(data_dir: &Path) -> Self {
        Self {
            directories: JsonListStore::new(data_dir.join(USER_DIRECTORIES_FILE)),
            files: JsonListStore::new(data_dir.join(USER_FILES_FILE)),
        }
    }

    /// Record a created directory, returning its ledger id
    pub async fn record_directory(&self, path: &str) -> StoreResult<Uuid> {
        let entry = LedgerEntry::new(path);
        let id = entry.id;
        self.directories.append(entry).await?;
        Ok(id)
    }

    /// Record an uploaded file, returning its ledger id
    pub async fn record_file(&self, path: &str) -> StoreResult<Uuid> {
        let entry = LedgerEntry::new(path);
        let id = entry.id;
        self.files.append(entry).await?;
        Ok(id)
    }

    /// A directory may be deleted when it, or anything below it, was created
    /// through the API.
    pub async fn owns_directory(&self, path: &str) -> bool {
        let path = clean(path);
        self.directories
            .read_all()
            .await
            .iter()
            .any(|entry| is_same_or_below(&clean(&entry.path), &path))
    }

    /// A file may be deleted only when that exact file was uploaded.
    pub async fn owns_file(&self, path: &str) -> bool {
        let path = clean(path);
        self.files
            .read_all()
            .await
            .iter()
            .any(|entry| clean(&entry.path) == path)
    }

    /// Drop every directory and file entry at or below `path`.
    pub async fn forget_subtree(&self, path: &str) -> StoreResult<usize> {
        let path = clean(path);
        let dirs = self
            .directories
            .retain(|entry| !is_same_or_below(&clean(&entry.path), &path))
            .await?;
        let files = self
            .files
            .retain(|entry| !is_same_or_below(&clean(&entry.path), &path))
            .await?;
        Ok(dirs + files)
    }

    /// Drop the entry for a single file.
    pub async fn forget_file(&self, path: &str) -> StoreResult<usize> {
        let path = clean(path);
        self.files.retain(|entry| clean(&entry.path) != path).await
    }
}

fn clean(path: &str) -> String {
    path.replace('\\', "/").trim_matches('/').to_string()
}

fn is_same_or_below(candidate: &str, ancestor: &str) -> bool {
    candidate == ancestor
        || ancestor.is_empty()
        || candidate
            .strip_prefix(ancestor)
            .is_some_and(|rest| rest.starts_with('/'))
}
