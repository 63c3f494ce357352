//! HTTP routes for the file server.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::path::Path as FsPath;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::debug;

use super::assets::asset_response;
use super::error::{ApiError, ApiResult};
use super::gate::{access_gate, AccessGate};
use super::stream::{serve_file, ServeOptions};
use super::templates::{DownloadView, GalleryView, IndexView, TemplateEngine};
use crate::config::LINKS_FILE;
use crate::files::{self, list_directory, list_gallery, paginate, BaseRoot, UploadSink};
use crate::store::{LinkId, LinkRecord, LinkRegistry, UserContentLedger};

/// Cache policy for downloads from the private browser.
const PRIVATE_DOWNLOAD_CACHE: &str = "public, max-age=3600";

/// Shared application state.
pub struct AppState {
    pub root: BaseRoot,
    pub links: LinkRegistry,
    pub ledger: UserContentLedger,
    /// Prefix for public links handed out by the API, without trailing slash.
    pub public_base_url: String,
    pub template_engine: TemplateEngine,
}

impl AppState {
    /// Open the registries kept in `data_dir`.
    pub fn open(
        root: BaseRoot,
        data_dir: &FsPath,
        public_base_url: impl Into<String>,
    ) -> Result<Self, minijinja::Error> {
        Ok(Self {
            root,
            links: LinkRegistry::open(data_dir.join(LINKS_FILE)),
            ledger: UserContentLedger::open(data_dir),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            template_engine: TemplateEngine::new()?,
        })
    }
}

/// Build the router with all routes, behind the access gate.
pub fn build_router(state: Arc<AppState>, gate: Arc<AccessGate>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/download/:id", get(download_page_handler))
        .route("/media-gallery/:id", get(gallery_page_handler))
        .route("/static/*path", get(static_handler))
        .route("/api/public-download/:id", get(public_download_handler))
        .route("/api/files", get(list_files_handler))
        .route("/api/files/download", get(files_download_handler))
        .route("/api/create-public-link", post(create_link_handler))
        .route("/api/create-folder", post(create_folder_handler))
        .route(
            "/api/upload",
            post(upload_handler).layer(DefaultBodyLimit::disable()),
        )
        .route("/api/delete-file", post(delete_file_handler))
        .route("/api/media-gallery/:id", get(media_gallery_handler))
        .route("/api/media-gallery/:id/:name", get(media_gallery_file_handler))
        .with_state(state)
        .layer(middleware::from_fn_with_state(gate, access_gate))
        .layer(TraceLayer::new_for_http())
}

/// Query accepted by download endpoints.
#[derive(Debug, Default, Deserialize)]
struct DownloadQuery {
    download: Option<String>,
}

impl DownloadQuery {
    fn wants_attachment(&self) -> bool {
        matches!(self.download.as_deref(), Some("true") | Some("1"))
    }
}

async fn find_link(state: &AppState, id: &str) -> ApiResult<LinkRecord> {
    let id: LinkId = id
        .parse()
        .map_err(|_| ApiError::NotFound("Link not found".to_string()))?;
    state
        .links
        .lookup(id)
        .await
        .ok_or_else(|| ApiError::NotFound("Link not found".to_string()))
}

/// Name offered to the recipient: the display name, carrying the target's
/// extension when the display name has none.
fn download_name(link: &LinkRecord) -> String {
    let target_ext = FsPath::new(&link.target_path)
        .extension()
        .and_then(|e| e.to_str());
    let has_ext = FsPath::new(&link.display_name).extension().is_some();
    match target_ext {
        Some(ext) if !has_ext && !link.display_name.is_empty() => {
            format!("{}.{}", link.display_name, ext)
        }
        _ if link.display_name.is_empty() => FsPath::new(&link.target_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        _ => link.display_name.clone(),
    }
}

/// Handler for `/api/public-download/{id}`.
async fn public_download_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<DownloadQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let link = find_link(&state, &id).await?;
    if link.is_directory {
        return Err(ApiError::NotFound("Link not found".to_string()));
    }

    let path = state.root.resolve_existing(&link.target_path).await?;
    debug!(link_id = %link.id, path = %path.display(), "Public download");

    serve_file(
        &path,
        &headers,
        ServeOptions {
            download: query.wants_attachment(),
            file_name: Some(download_name(&link)),
            cache_control: None,
        },
    )
    .await
}

#[derive(Debug, Deserialize)]
struct FileQuery {
    file: Option<String>,
}

/// Handler for `/api/files/download?file=<rel>`.
async fn files_download_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FileQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let file = query
        .file
        .filter(|f| !f.is_empty())
        .ok_or_else(|| ApiError::BadRequest("File path is required".to_string()))?;
    let path = state.root.resolve_existing(&file).await?;

    serve_file(
        &path,
        &headers,
        ServeOptions {
            download: true,
            file_name: None,
            cache_control: Some(PRIVATE_DOWNLOAD_CACHE),
        },
    )
    .await
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    subdir: Option<String>,
    search: Option<String>,
    page: Option<usize>,
}

/// Handler for `/api/files`.
async fn list_files_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Response> {
    let subdir = query.subdir.unwrap_or_default();
    let dir = state.root.resolve_existing(&subdir).await?;
    let entries = list_directory(&state.root, &dir)
        .await
        .map_err(|e| ApiError::from_io("Directory", e))?;

    let page = paginate(entries, query.search.as_deref(), query.page.unwrap_or(1));
    Ok(Json(page).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateLinkRequest {
    #[serde(alias = "filePath")]
    target_path: Option<String>,
    #[serde(alias = "fileName")]
    display_name: Option<String>,
    /// Advisory only; the filesystem decides.
    is_directory: Option<bool>,
}

/// Handler for `POST /api/create-public-link`.
async fn create_link_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateLinkRequest>,
) -> ApiResult<Response> {
    let target = request
        .target_path
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::BadRequest("targetPath is required".to_string()))?;

    let full_path = state.root.resolve_existing(&target).await?;
    let meta = tokio::fs::metadata(&full_path)
        .await
        .map_err(|e| ApiError::from_io("Target", e))?;

    if request.is_directory.is_some_and(|claimed| claimed != meta.is_dir()) {
        debug!(target = %target, "isDirectory disagrees with the filesystem");
    }

    let relative = state.root.relative_of(&full_path);
    let display_name = request
        .display_name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| {
            full_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        });

    let record = state
        .links
        .create(relative, display_name, meta.is_dir())
        .await?;

    Ok(Json(json!({
        "id": record.id,
        "publicLink": record.public_url(&state.public_base_url),
    }))
    .into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateFolderRequest {
    path: Option<String>,
    folder_name: Option<String>,
}

/// Handler for `POST /api/create-folder`.
async fn create_folder_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateFolderRequest>,
) -> ApiResult<Response> {
    let folder_name = request
        .folder_name
        .ok_or_else(|| ApiError::BadRequest("folderName is required".to_string()))?;
    let parent = request.path.unwrap_or_default();

    let folder_id =
        files::create_folder(&state.root, &state.ledger, &parent, &folder_name).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Folder created successfully",
            "folderId": folder_id,
        })),
    )
        .into_response())
}

fn bad_multipart(err: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError::BadRequest(format!("Invalid upload: {}", err))
}

/// Handler for `POST /api/upload`.
///
/// The `path` field must precede the `files` fields it applies to.
async fn upload_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> ApiResult<Response> {
    let mut directory = String::new();
    let mut stored = Vec::new();

    while let Some(mut field) = multipart.next_field().await.map_err(bad_multipart)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("path") => {
                directory = field.text().await.map_err(bad_multipart)?;
            }
            Some("files") => {
                let Some(file_name) = field.file_name().map(str::to_string) else {
                    continue;
                };
                let mut sink = UploadSink::create(&state.root, &directory, &file_name).await?;
                while let Some(chunk) = field.chunk().await.map_err(bad_multipart)? {
                    sink.write_chunk(&chunk).await?;
                }
                stored.push(sink.finish(&state.ledger).await?);
            }
            _ => {}
        }
    }

    if stored.is_empty() {
        return Err(ApiError::BadRequest("No files uploaded".to_string()));
    }

    Ok(Json(json!({
        "success": true,
        "message": format!("{} file(s) uploaded successfully", stored.len()),
        "files": stored,
    }))
    .into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteRequest {
    file_path: Option<String>,
    current_directory: Option<String>,
}

/// Handler for `POST /api/delete-file`.
async fn delete_file_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DeleteRequest>,
) -> ApiResult<Response> {
    let (Some(file_path), Some(current)) = (
        request.file_path.filter(|p| !p.is_empty()),
        request.current_directory,
    ) else {
        return Err(ApiError::BadRequest(
            "File path and current directory are required".to_string(),
        ));
    };

    files::delete_path(&state.root, &state.ledger, &file_path, &current).await?;
    Ok(Json(json!({ "message": "Deleted successfully" })).into_response())
}

async fn directory_link(state: &AppState, id: &str) -> ApiResult<LinkRecord> {
    let link = find_link(state, id).await?;
    if !link.is_directory {
        return Err(ApiError::NotFound("Gallery not found".to_string()));
    }
    Ok(link)
}

/// Handler for `/api/media-gallery/{id}`.
async fn media_gallery_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let link = directory_link(&state, &id).await?;
    let dir = state.root.resolve_existing(&link.target_path).await?;
    let items = list_gallery(&state.root, &dir)
        .await
        .map_err(|e| ApiError::from_io("Directory", e))?;

    Ok(Json(json!({
        "files": items,
        "folderName": link.display_name,
    }))
    .into_response())
}

/// Handler for `/api/media-gallery/{id}/{name}`: one file of a shared directory.
async fn media_gallery_file_handler(
    State(state): State<Arc<AppState>>,
    Path((id, name)): Path<(String, String)>,
    Query(query): Query<DownloadQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let link = directory_link(&state, &id).await?;
    let name = files::sanitize_file_name(&name)?;
    let relative = format!("{}/{}", link.target_path.trim_end_matches('/'), name);
    let path = state.root.resolve_existing(&relative).await?;

    serve_file(
        &path,
        &headers,
        ServeOptions {
            download: query.wants_attachment(),
            file_name: None,
            cache_control: None,
        },
    )
    .await
}

fn not_found_page(state: &AppState, message: &str) -> Response {
    match state.template_engine.render_not_found(message) {
        Ok(html) => (StatusCode::NOT_FOUND, Html(html)).into_response(),
        Err(_) => (StatusCode::NOT_FOUND, message.to_string()).into_response(),
    }
}

fn template_error(err: minijinja::Error) -> ApiError {
    ApiError::Internal(format!("template error: {}", err))
}

/// Handler for the `/download/{id}` landing page.
async fn download_page_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let link = match find_link(&state, &id).await {
        Ok(link) => link,
        Err(_) => return Ok(not_found_page(&state, "This link does not exist.")),
    };
    if link.is_directory {
        return Ok(Redirect::to(&format!("/media-gallery/{}", link.id)).into_response());
    }

    let path = state.root.resolve_existing(&link.target_path).await?;
    let meta = match tokio::fs::metadata(&path).await {
        Ok(meta) if meta.is_file() => meta,
        _ => return Ok(not_found_page(&state, "The shared file is no longer available.")),
    };

    let html = state
        .template_engine
        .render_download(&DownloadView::new(&link, meta.len()))
        .map_err(template_error)?;
    Ok(Html(html).into_response())
}

/// Handler for the `/media-gallery/{id}` page.
async fn gallery_page_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let link = match directory_link(&state, &id).await {
        Ok(link) => link,
        Err(_) => return Ok(not_found_page(&state, "This gallery does not exist.")),
    };

    let dir = state.root.resolve_existing(&link.target_path).await?;
    let items = match list_gallery(&state.root, &dir).await {
        Ok(items) => items,
        Err(_) => return Ok(not_found_page(&state, "The shared folder is no longer available.")),
    };

    let html = state
        .template_engine
        .render_gallery(&GalleryView::new(&link, &items))
        .map_err(template_error)?;
    Ok(Html(html).into_response())
}

/// Handler for the private directory browser.
async fn index_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Response> {
    let subdir = query.subdir.unwrap_or_default();
    let dir = state.root.resolve_existing(&subdir).await?;
    let entries = list_directory(&state.root, &dir)
        .await
        .map_err(|e| ApiError::from_io("Directory", e))?;
    let page = paginate(entries, query.search.as_deref(), query.page.unwrap_or(1));

    let current = state.root.relative_of(&dir);
    let html = state
        .template_engine
        .render_index(&IndexView::new(&current, &page))
        .map_err(template_error)?;
    Ok(Html(html).into_response())
}

async fn health_handler() -> &'static str {
    "ok"
}

/// Handler for embedded static assets.
async fn static_handler(Path(path): Path<String>) -> Response {
    asset_response(&path)
}
