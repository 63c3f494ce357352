//! Public share links.
//!
//! A link id is a bearer capability: whoever holds it can fetch the target.
//! Records are never edited or removed through the server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;
use uuid::Uuid;

use super::{JsonListStore, StoreResult};

/// Unique identifier for a share link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkId(pub Uuid);

impl LinkId {
    /// Generate a new random link ID (UUID v4, 122 random bits)
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LinkId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for LinkId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A persisted share link.
///
/// `filePath`/`fileName` are accepted on read so registries written by
/// earlier deployments still resolve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkRecord {
    pub id: LinkId,
    /// Target path relative to the base root
    #[serde(alias = "filePath")]
    pub target_path: String,
    #[serde(alias = "fileName")]
    pub display_name: String,
    #[serde(default)]
    pub is_directory: bool,
    pub created_at: DateTime<Utc>,
}

impl LinkRecord {
    /// Public URL a recipient opens for this link.
    ///
    /// Directories go to the media gallery page, files to the download page.
    pub fn public_url(&self, public_base_url: &str) -> String {
        let base = public_base_url.trim_end_matches('/');
        if self.is_directory {
            format!("{}/media-gallery/{}", base, self.id)
        } else {
            format!("{}/download/{}", base, self.id)
        }
    }
}

/// Registry of share links backed by one JSON array file.
pub struct LinkRegistry {
    store: JsonListStore<LinkRecord>,
}

impl LinkRegistry {
    /// Open the registry stored at `path`
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            store: JsonListStore::new(path),
        }
    }

    /// Create and persist a new link. The record is on disk when this returns.
    pub async fn create(
        &self,
        target_path: impl Into<String>,
        display_name: impl Into<String>,
        is_directory: bool,
    ) -> StoreResult<LinkRecord> {
        let record = LinkRecord {
            id: LinkId::new(),
            target_path: target_path.into(),
            display_name: display_name.into(),
            is_directory,
            created_at: Utc::now(),
        };

        self.store.append(record.clone()).await?;

        info!(
            link_id = %record.id,
            target = %record.target_path,
            directory = record.is_directory,
            "Share link created"
        );
        Ok(record)
    }

    /// Find a link by id (linear scan)
    pub async fn lookup(&self, id: LinkId) -> Option<LinkRecord> {
        self.store.read_all().await.into_iter().find(|r| r.id == id)
    }

    /// All links in creation order
    pub async fn list(&self) -> Vec<LinkRecord> {
        self.store.read_all().await
    }
}
