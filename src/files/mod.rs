//! Filesystem access scoped to the configured base root.

pub mod guard;
pub mod listing;
pub mod ops;

pub use guard::{BaseRoot, GuardError, GuardResult};
pub use listing::{
    list_directory, list_gallery, paginate, FileEntry, GalleryItem, ListingPage, MediaKind,
    ITEMS_PER_PAGE,
};
pub use ops::{create_folder, delete_path, sanitize_file_name, FileOpsError, FileOpsResult, UploadSink};
