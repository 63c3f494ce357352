//! Directory listings for the browser and the shared-directory gallery.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fs::Metadata;
use std::io;
use std::path::Path;
use std::time::SystemTime;
use tracing::debug;

use super::guard::BaseRoot;

/// Page size used by the browser listing.
pub const ITEMS_PER_PAGE: usize = 1000;

/// A single entry in a directory listing.
#[derive(Debug, Clone, PartialEq)]
pub enum FileEntry {
    File {
        name: String,
        path: String,
        size: u64,
        created: DateTime<Utc>,
        modified: DateTime<Utc>,
    },
    Directory {
        name: String,
        path: String,
        created: DateTime<Utc>,
        modified: DateTime<Utc>,
    },
}

impl FileEntry {
    /// Build an entry from filesystem metadata. `path` is relative to the base
    /// root.
    pub fn from_metadata(name: String, path: String, meta: &Metadata) -> Self {
        let modified = timestamp(meta.modified());
        let created = meta.created().map(DateTime::<Utc>::from).unwrap_or(modified);

        if meta.is_dir() {
            Self::Directory {
                name,
                path,
                created,
                modified,
            }
        } else {
            Self::File {
                name,
                path,
                size: meta.len(),
                created,
                modified,
            }
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::File { name, .. } | Self::Directory { name, .. } => name,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::File { path, .. } | Self::Directory { path, .. } => path,
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, Self::Directory { .. })
    }

    /// Size in bytes; directories report 0.
    pub fn size(&self) -> u64 {
        match self {
            Self::File { size, .. } => *size,
            Self::Directory { .. } => 0,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EntryJson<'a> {
    name: &'a str,
    path: &'a str,
    size: u64,
    date_added: &'a DateTime<Utc>,
    last_modified: &'a DateTime<Utc>,
    is_directory: bool,
    #[serde(rename = "type")]
    kind: &'static str,
}

impl Serialize for FileEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let (created, modified, kind) = match self {
            Self::File {
                created, modified, ..
            } => (created, modified, "file"),
            Self::Directory {
                created, modified, ..
            } => (created, modified, "directory"),
        };
        EntryJson {
            name: self.name(),
            path: self.path(),
            size: self.size(),
            date_added: created,
            last_modified: modified,
            is_directory: self.is_directory(),
            kind,
        }
        .serialize(serializer)
    }
}

fn timestamp(time: io::Result<SystemTime>) -> DateTime<Utc> {
    DateTime::<Utc>::from(time.unwrap_or(SystemTime::UNIX_EPOCH))
}

/// Read every entry of `dir`, directories first, then by name.
///
/// Entries whose metadata cannot be read (dangling symlinks and the like) are
/// skipped.
pub async fn list_directory(root: &BaseRoot, dir: &Path) -> io::Result<Vec<FileEntry>> {
    let mut reader = tokio::fs::read_dir(dir).await?;
    let mut entries = Vec::new();

    while let Some(entry) = reader.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let meta = match tokio::fs::metadata(entry.path()).await {
            Ok(meta) => meta,
            Err(e) => {
                debug!(entry = %entry.path().display(), error = %e, "skipping unreadable entry");
                continue;
            }
        };
        let path = root.relative_of(&entry.path());
        entries.push(FileEntry::from_metadata(name, path, &meta));
    }

    entries.sort_by(|a, b| {
        b.is_directory()
            .cmp(&a.is_directory())
            .then_with(|| a.name().to_lowercase().cmp(&b.name().to_lowercase()))
    });
    Ok(entries)
}

/// One page of a filtered listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingPage {
    pub files: Vec<FileEntry>,
    pub current_page: usize,
    pub total_count: usize,
    pub items_per_page: usize,
}

/// Filter by case-insensitive name substring and cut out the 1-based `page`.
pub fn paginate(entries: Vec<FileEntry>, search: Option<&str>, page: usize) -> ListingPage {
    let page = page.max(1);
    let needle = search
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);

    let filtered: Vec<FileEntry> = match needle {
        Some(needle) => entries
            .into_iter()
            .filter(|e| e.name().to_lowercase().contains(&needle))
            .collect(),
        None => entries,
    };

    let total_count = filtered.len();
    let files = filtered
        .into_iter()
        .skip((page - 1).saturating_mul(ITEMS_PER_PAGE))
        .take(ITEMS_PER_PAGE)
        .collect();

    ListingPage {
        files,
        current_page: page,
        total_count,
        items_per_page: ITEMS_PER_PAGE,
    }
}

/// Coarse media classification used by the gallery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
    Image,
    Other,
}

impl MediaKind {
    /// Classify by file extension
    pub fn from_name(name: &str) -> Self {
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match ext.as_str() {
            "mp3" | "wav" | "ogg" | "flac" | "m4a" | "aac" => Self::Audio,
            "mp4" | "webm" | "avi" | "mov" | "mkv" => Self::Video,
            "jpg" | "jpeg" | "png" | "gif" | "webp" => Self::Image,
            _ => Self::Other,
        }
    }
}

/// A file shown in a shared-directory gallery.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryItem {
    pub name: String,
    pub path: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub date_added: DateTime<Utc>,
}

/// List only the files (not subdirectories) of a shared directory.
pub async fn list_gallery(root: &BaseRoot, dir: &Path) -> io::Result<Vec<GalleryItem>> {
    let items = list_directory(root, dir)
        .await?
        .into_iter()
        .filter_map(|entry| match entry {
            FileEntry::File {
                name,
                path,
                size,
                created,
                ..
            } => Some(GalleryItem {
                kind: MediaKind::from_name(&name),
                name,
                path,
                size,
                date_added: created,
            }),
            FileEntry::Directory { .. } => None,
        })
        .collect();
    Ok(items)
}
