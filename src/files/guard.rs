//! Path containment for everything that touches the filesystem.
//!
//! Callers hand in paths relative to the configured base root. A path is only
//! accepted when, after normalization, it is the root itself or sits below it.

use std::io;
use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR};
use thiserror::Error;

/// Errors raised by the containment guard.
#[derive(Debug, Error)]
pub enum GuardError {
    /// The path resolves outside the base root.
    #[error("access denied: {path}")]
    AccessDenied { path: String },

    /// The configured base root is not an absolute path.
    #[error("base root must be an absolute path: {0}")]
    NotAbsolute(PathBuf),

    /// The filesystem could not be inspected while validating a path.
    #[error("failed to inspect {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl GuardError {
    fn denied(path: impl Into<String>) -> Self {
        Self::AccessDenied { path: path.into() }
    }
}

/// Result type for guard operations.
pub type GuardResult<T> = Result<T, GuardError>;

/// The single directory every user-facing path is resolved against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseRoot {
    root: PathBuf,
}

impl BaseRoot {
    /// Create a base root from an absolute path. The path is normalized
    /// lexically; it does not have to exist yet.
    pub fn new(root: impl AsRef<Path>) -> GuardResult<Self> {
        let root = root.as_ref();
        if !root.is_absolute() {
            return Err(GuardError::NotAbsolute(root.to_path_buf()));
        }
        Ok(Self {
            root: normalize(root),
        })
    }

    /// The normalized absolute root.
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Resolve a caller-supplied relative path to an absolute path inside the
    /// root, without touching the filesystem.
    ///
    /// Backslashes are treated as separators and leading separators are
    /// stripped, so `"/a"` and `"a"` resolve to the same place.
    pub fn resolve(&self, relative: &str) -> GuardResult<PathBuf> {
        let cleaned = relative.replace('\\', "/");
        let cleaned = cleaned.trim_start_matches('/');
        let candidate = normalize(&self.root.join(cleaned));

        if is_within(&self.root, &candidate) {
            Ok(candidate)
        } else {
            tracing::warn!(requested = %relative, "path escapes base root");
            Err(GuardError::denied(relative))
        }
    }

    /// Like [`resolve`](Self::resolve), and additionally re-validates the
    /// target against the canonical root so a symbolic link inside the tree
    /// cannot lead outside it.
    ///
    /// For paths that do not exist yet, the nearest existing ancestor is
    /// checked instead.
    pub async fn resolve_existing(&self, relative: &str) -> GuardResult<PathBuf> {
        let candidate = self.resolve(relative)?;

        let canonical_root =
            tokio::fs::canonicalize(&self.root)
                .await
                .map_err(|source| GuardError::Io {
                    path: self.root.clone(),
                    source,
                })?;

        let mut probe = candidate.as_path();
        loop {
            match tokio::fs::canonicalize(probe).await {
                Ok(real) => {
                    if is_within(&canonical_root, &real) {
                        return Ok(candidate);
                    }
                    tracing::warn!(
                        requested = %relative,
                        target = %real.display(),
                        "symbolic link escapes base root"
                    );
                    return Err(GuardError::denied(relative));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    // A link whose target is missing cannot be validated.
                    if is_symlink(probe).await {
                        tracing::warn!(
                            requested = %relative,
                            link = %probe.display(),
                            "dangling symbolic link under base root"
                        );
                        return Err(GuardError::denied(relative));
                    }
                    match probe.parent() {
                        Some(parent) if is_within(&self.root, parent) => probe = parent,
                        _ => return Ok(candidate),
                    }
                }
                Err(source) => {
                    return Err(GuardError::Io {
                        path: probe.to_path_buf(),
                        source,
                    })
                }
            }
        }
    }

    /// Express an absolute path inside the root as a `/`-separated relative
    /// path. The root itself maps to the empty string.
    pub fn relative_of(&self, absolute: &Path) -> String {
        absolute
            .strip_prefix(&self.root)
            .map(|rel| {
                rel.components()
                    .filter_map(|c| match c {
                        Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .unwrap_or_default()
    }

    /// Whether the path is the root itself.
    pub fn is_root(&self, absolute: &Path) -> bool {
        normalize(absolute) == self.root
    }
}

/// Lexically normalize a path: drop `.`, resolve `..` against the preceding
/// component, never climb above the filesystem root.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// Whether `path` itself is a symbolic link, without following it.
pub async fn is_symlink(path: &Path) -> bool {
    tokio::fs::symlink_metadata(path)
        .await
        .map(|meta| meta.file_type().is_symlink())
        .unwrap_or(false)
}

/// Separator-aware prefix check: `candidate` must equal `root` or continue
/// with a separator right after it. `/base-evil` is not inside `/base`.
fn is_within(root: &Path, candidate: &Path) -> bool {
    let root = root.to_string_lossy();
    let candidate = candidate.to_string_lossy();

    if candidate == root {
        return true;
    }
    match candidate.strip_prefix(root.as_ref()) {
        Some(rest) => root.ends_with(MAIN_SEPARATOR) || rest.starts_with(MAIN_SEPARATOR),
        None => false,
    }
}
