//! Mutating file operations: folder creation, uploads and deletion.
//!
//! Every operation validates its paths through [`BaseRoot`] before touching
//! the disk, and only content recorded in the [`UserContentLedger`] can be
//! deleted.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::guard::{is_symlink, BaseRoot, GuardError};
use crate::store::{StoreError, UserContentLedger};

/// Errors from mutating file operations
#[derive(Debug, Error)]
pub enum FileOpsError {
    #[error(transparent)]
    Guard(#[from] GuardError),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("file or directory not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FileOpsError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result type for file operations
pub type FileOpsResult<T> = Result<T, FileOpsError>;

/// Reduce a client-supplied name to a single safe path component.
///
/// Browsers on Windows may send full paths as upload file names; only the
/// final component is kept.
pub fn sanitize_file_name(raw: &str) -> FileOpsResult<String> {
    let normalized = raw.replace('\\', "/");
    let name = normalized.rsplit('/').next().unwrap_or_default().trim();
    if name.is_empty() || name == "." || name == ".." {
        return Err(FileOpsError::InvalidName(raw.to_string()));
    }
    Ok(name.to_string())
}

/// Validate a new folder name: one component, no separators.
fn validate_folder_name(raw: &str) -> FileOpsResult<&str> {
    let name = raw.trim();
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(FileOpsError::InvalidName(raw.to_string()));
    }
    Ok(name)
}

/// Create `folder_name` under `parent` (relative to the root), including any
/// missing parents, and record it in the ledger.
pub async fn create_folder(
    root: &BaseRoot,
    ledger: &UserContentLedger,
    parent: &str,
    folder_name: &str,
) -> FileOpsResult<Uuid> {
    let name = validate_folder_name(folder_name)?;
    let parent_path = root.resolve_existing(parent).await?;
    let full_path = parent_path.join(name);

    tokio::fs::create_dir_all(&full_path)
        .await
        .map_err(|e| FileOpsError::io(&full_path, e))?;

    let relative = root.relative_of(&full_path);
    let id = ledger.record_directory(&relative).await?;

    info!(path = %relative, folder_id = %id, "Folder created");
    Ok(id)
}

/// An upload being written to disk chunk by chunk.
///
/// Dropping the sink without calling [`finish`](Self::finish) leaves a
/// partial file that is not recorded in the ledger.
pub struct UploadSink {
    file: File,
    path: PathBuf,
    relative: String,
    written: u64,
}

impl UploadSink {
    /// Create (or truncate) the target file for an upload into `directory`.
    pub async fn create(root: &BaseRoot, directory: &str, file_name: &str) -> FileOpsResult<Self> {
        let name = sanitize_file_name(file_name)?;
        let dir_path = root.resolve_existing(directory).await?;

        tokio::fs::create_dir_all(&dir_path)
            .await
            .map_err(|e| FileOpsError::io(&dir_path, e))?;

        let target = format!("{}/{}", root.relative_of(&dir_path), name);
        let path = root.resolve_existing(&target).await?;
        if is_symlink(&path).await {
            warn!(path = %path.display(), "Refusing to upload over a symbolic link");
            return Err(FileOpsError::Forbidden("Cannot overwrite a symbolic link."));
        }

        let file = File::create(&path)
            .await
            .map_err(|e| FileOpsError::io(&path, e))?;

        debug!(path = %path.display(), "Upload started");
        Ok(Self {
            file,
            relative: root.relative_of(&path),
            path,
            written: 0,
        })
    }

    /// Append a chunk of the upload body
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> FileOpsResult<()> {
        self.file
            .write_all(chunk)
            .await
            .map_err(|e| FileOpsError::io(&self.path, e))?;
        self.written += chunk.len() as u64;
        Ok(())
    }

    /// Flush the file and record it in the ledger. Returns the file name.
    pub async fn finish(mut self, ledger: &UserContentLedger) -> FileOpsResult<String> {
        self.file
            .flush()
            .await
            .map_err(|e| FileOpsError::io(&self.path, e))?;
        drop(self.file);

        ledger.record_file(&self.relative).await?;
        info!(path = %self.relative, bytes = self.written, "Upload stored");

        Ok(self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default())
    }
}

/// Delete a ledgered file or directory.
///
/// `current_directory` is the directory the caller is browsing; deleting it
/// (or the root) out from under the caller is refused.
pub async fn delete_path(
    root: &BaseRoot,
    ledger: &UserContentLedger,
    file_path: &str,
    current_directory: &str,
) -> FileOpsResult<()> {
    let full_path = root.resolve_existing(file_path).await?;
    let current = root.resolve(current_directory)?;

    if root.is_root(&full_path) {
        warn!(path = %file_path, "Refusing to delete base root");
        return Err(FileOpsError::Forbidden("Cannot delete the root directory."));
    }
    if full_path == current {
        warn!(path = %file_path, "Refusing to delete current directory");
        return Err(FileOpsError::Forbidden("Cannot delete current directory."));
    }

    let meta = match tokio::fs::symlink_metadata(&full_path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(FileOpsError::NotFound(file_path.to_string()))
        }
        Err(e) => return Err(FileOpsError::io(&full_path, e)),
    };

    let relative = root.relative_of(&full_path);

    if meta.is_dir() {
        if !ledger.owns_directory(&relative).await {
            warn!(path = %relative, "Attempted to delete non-user-generated directory");
            return Err(FileOpsError::Forbidden(
                "Access denied. Can only delete user-generated content.",
            ));
        }
        tokio::fs::remove_dir_all(&full_path)
            .await
            .map_err(|e| FileOpsError::io(&full_path, e))?;
        ledger.forget_subtree(&relative).await?;
    } else {
        if !ledger.owns_file(&relative).await {
            warn!(path = %relative, "Attempted to delete non-user-added file");
            return Err(FileOpsError::Forbidden(
                "Access denied. Can only delete user-added files.",
            ));
        }
        tokio::fs::remove_file(&full_path)
            .await
            .map_err(|e| FileOpsError::io(&full_path, e))?;
        ledger.forget_file(&relative).await?;
    }

    info!(path = %relative, "Deleted");
    Ok(())
}
