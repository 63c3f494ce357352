//! Template rendering using minijinja.

use minijinja::{Environment, Error as JinjaError, ErrorKind};
use rust_embed::Embed;
use serde::Serialize;

use crate::files::{FileEntry, GalleryItem, ListingPage, MediaKind};
use crate::store::LinkRecord;

/// Embedded templates.
#[derive(Embed)]
#[folder = "templates/"]
pub struct Templates;

/// Template engine for rendering HTML pages.
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl TemplateEngine {
    /// Create a new template engine with embedded templates.
    pub fn new() -> Result<Self, JinjaError> {
        let mut env = Environment::new();

        for file in Templates::iter() {
            let filename = file.to_string();
            if let Some(content) = Templates::get(&filename) {
                let template_str = std::str::from_utf8(content.data.as_ref())
                    .map_err(|_| JinjaError::from(ErrorKind::InvalidOperation))?;
                env.add_template_owned(filename, template_str.to_string())?;
            }
        }

        Ok(Self { env })
    }

    /// Render the landing page for a shared file.
    pub fn render_download(&self, view: &DownloadView) -> Result<String, JinjaError> {
        let template = self.env.get_template("download.html")?;
        template.render(minijinja::context! { link => view })
    }

    /// Render the gallery page for a shared directory.
    pub fn render_gallery(&self, view: &GalleryView) -> Result<String, JinjaError> {
        let template = self.env.get_template("gallery.html")?;
        template.render(minijinja::context! { gallery => view })
    }

    /// Render the private directory browser.
    pub fn render_index(&self, view: &IndexView) -> Result<String, JinjaError> {
        let template = self.env.get_template("index.html")?;
        template.render(minijinja::context! { listing => view })
    }

    /// Render the page shown for unknown or dangling share links.
    pub fn render_not_found(&self, message: &str) -> Result<String, JinjaError> {
        let template = self.env.get_template("not_found.html")?;
        template.render(minijinja::context! { message => message })
    }
}

/// Human-readable byte count, e.g. `1.5 MB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// View model for the shared-file page.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadView {
    pub id: String,
    pub name: String,
    pub size: String,
    pub kind: MediaKind,
    /// Inline URL, used by the media players.
    pub stream_url: String,
    /// Same bytes with an attachment disposition.
    pub download_url: String,
}

impl DownloadView {
    pub fn new(link: &LinkRecord, size: u64) -> Self {
        let stream_url = format!("/api/public-download/{}", link.id);
        Self {
            id: link.id.to_string(),
            name: link.display_name.clone(),
            size: format_size(size),
            kind: MediaKind::from_name(&link.target_path),
            download_url: format!("{}?download=true", stream_url),
            stream_url,
        }
    }
}

/// View model for one file in a shared directory.
#[derive(Debug, Clone, Serialize)]
pub struct GalleryItemView {
    pub name: String,
    pub size: String,
    pub kind: MediaKind,
}

/// View model for the shared-directory page.
#[derive(Debug, Clone, Serialize)]
pub struct GalleryView {
    pub id: String,
    pub folder_name: String,
    pub items: Vec<GalleryItemView>,
}

impl GalleryView {
    pub fn new(link: &LinkRecord, items: &[GalleryItem]) -> Self {
        Self {
            id: link.id.to_string(),
            folder_name: link.display_name.clone(),
            items: items
                .iter()
                .map(|item| GalleryItemView {
                    name: item.name.clone(),
                    size: format_size(item.size),
                    kind: item.kind,
                })
                .collect(),
        }
    }
}

/// View model for one row of the directory browser.
#[derive(Debug, Clone, Serialize)]
pub struct IndexEntryView {
    pub name: String,
    pub path: String,
    pub is_directory: bool,
    pub size: String,
    pub modified: String,
}

impl IndexEntryView {
    fn from_entry(entry: &FileEntry) -> Self {
        let modified = match entry {
            FileEntry::File { modified, .. } | FileEntry::Directory { modified, .. } => {
                modified.format("%Y-%m-%d %H:%M").to_string()
            }
        };
        Self {
            name: entry.name().to_string(),
            path: entry.path().to_string(),
            is_directory: entry.is_directory(),
            size: if entry.is_directory() {
                String::new()
            } else {
                format_size(entry.size())
            },
            modified,
        }
    }
}

/// View model for the private directory browser.
#[derive(Debug, Clone, Serialize)]
pub struct IndexView {
    /// Directory being shown, relative to the base root ("" for the root).
    pub current: String,
    /// Parent directory, absent at the root.
    pub parent: Option<String>,
    pub entries: Vec<IndexEntryView>,
    pub page: usize,
    pub total_count: usize,
    pub has_next: bool,
}

impl IndexView {
    pub fn new(current: &str, page: &ListingPage) -> Self {
        let current = current.trim_matches('/').to_string();
        let parent = if current.is_empty() {
            None
        } else {
            Some(
                current
                    .rsplit_once('/')
                    .map(|(parent, _)| parent.to_string())
                    .unwrap_or_default(),
            )
        };
        Self {
            parent,
            entries: page.files.iter().map(IndexEntryView::from_entry).collect(),
            page: page.current_page,
            total_count: page.total_count,
            has_next: page.current_page * page.items_per_page < page.total_count,
            current,
        }
    }
}
