//! Stylesheets and scripts for the HTML pages, embedded with rust-embed.

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use rust_embed::Embed;

use super::stream;

/// Static assets embedded in the binary.
#[derive(Embed)]
#[folder = "src/assets/"]
pub struct StaticAssets;

/// Content type for an embedded asset.
pub fn asset_content_type(path: &str) -> &'static str {
    match path.rsplit_once('.').map(|(_, ext)| ext) {
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "application/javascript; charset=utf-8",
        Some("ico") => "image/x-icon",
        _ => stream::content_type(path),
    }
}

/// Response for `/static/<path>`, or 404 when nothing is embedded there.
pub fn asset_response(path: &str) -> Response {
    match StaticAssets::get(path) {
        Some(file) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, asset_content_type(path)),
                (header::CACHE_CONTROL, "public, max-age=86400"),
            ],
            Body::from(file.data.into_owned()),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}
