//! File streaming with HTTP byte-range support.
//!
//! Each request opens its own file handle and streams it in bounded chunks;
//! the handle lives inside the response body and is dropped when the body
//! finishes or the client goes away.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::debug;

use super::error::{ApiError, ApiResult};

/// Read buffer size for streamed bodies.
pub const STREAM_CHUNK_SIZE: usize = 256 * 1024;

/// Content type for a file name, from a fixed extension table.
pub fn content_type(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "flac" => "audio/flac",
        "m4a" => "audio/mp4",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "txt" => "text/plain; charset=utf-8",
        "csv" => "text/csv",
        "json" => "application/json",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "zip" => "application/zip",
        "rar" => "application/x-rar-compressed",
        "7z" => "application/x-7z-compressed",
        "tar" => "application/x-tar",
        "gz" => "application/gzip",
        _ => "application/octet-stream",
    }
}

/// An inclusive byte range within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Parse a `Range` header against a file of `size` bytes.
///
/// - `Ok(None)`: no usable range; serve the whole file. Headers with another
///   unit, several ranges or non-numeric bounds fall here.
/// - `Ok(Some(range))`: serve the range; `end` is clamped to the last byte.
/// - `Err(RangeNotSatisfiable)`: `start` is at or past the end of the file,
///   or after `end`.
pub fn parse_range(value: &str, size: u64) -> ApiResult<Option<ByteRange>> {
    let Some(spec) = value.trim().strip_prefix("bytes=") else {
        return Ok(None);
    };
    if spec.contains(',') {
        return Ok(None);
    }
    let Some((start, end)) = spec.split_once('-') else {
        return Ok(None);
    };
    let (start, end) = (start.trim(), end.trim());

    if start.is_empty() {
        // Suffix form: the last N bytes.
        let Ok(suffix) = end.parse::<u64>() else {
            return Ok(None);
        };
        if suffix == 0 || size == 0 {
            return Err(ApiError::RangeNotSatisfiable(size));
        }
        return Ok(Some(ByteRange {
            start: size.saturating_sub(suffix),
            end: size - 1,
        }));
    }

    let Ok(start) = start.parse::<u64>() else {
        return Ok(None);
    };
    let end = if end.is_empty() {
        None
    } else {
        match end.parse::<u64>() {
            Ok(end) => Some(end),
            Err(_) => return Ok(None),
        }
    };

    if start >= size {
        return Err(ApiError::RangeNotSatisfiable(size));
    }
    let last = size - 1;
    let end = end.unwrap_or(last);
    if start > end {
        return Err(ApiError::RangeNotSatisfiable(size));
    }

    Ok(Some(ByteRange {
        start,
        end: end.min(last),
    }))
}

/// Per-request download state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSession {
    pub target_file: PathBuf,
    pub requested_range: Option<ByteRange>,
    pub total_size: u64,
}

impl DownloadSession {
    /// Stat the file and work out which bytes to send.
    pub async fn open(target_file: &Path, headers: &HeaderMap) -> ApiResult<Self> {
        let meta = tokio::fs::metadata(target_file)
            .await
            .map_err(|e| ApiError::from_io("File", e))?;
        if meta.is_dir() {
            return Err(ApiError::NotFound("File not found".to_string()));
        }
        let total_size = meta.len();

        let requested_range = match headers.get(header::RANGE).map(|v| v.to_str()) {
            Some(Ok(value)) => parse_range(value, total_size)?,
            Some(Err(_)) | None => None,
        };

        Ok(Self {
            target_file: target_file.to_path_buf(),
            requested_range,
            total_size,
        })
    }
}

/// How the response should present the file.
#[derive(Debug, Clone, Default)]
pub struct ServeOptions {
    /// Send `Content-Disposition: attachment`.
    pub download: bool,
    /// Name shown to the client. Defaults to the file's own name; also used
    /// for the content type when the file's own extension is unknown.
    pub file_name: Option<String>,
    /// Optional `Cache-Control` value.
    pub cache_control: Option<&'static str>,
}

/// Stream a file (already validated against the base root), honoring any
/// `Range` header in `headers`.
pub async fn serve_file(
    target_file: &Path,
    headers: &HeaderMap,
    options: ServeOptions,
) -> ApiResult<Response> {
    let session = DownloadSession::open(target_file, headers).await?;

    let target_name = target_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = options.file_name.clone().unwrap_or_else(|| target_name.clone());

    // Display names need not carry an extension; the file on disk decides first.
    let mime = match content_type(&target_name) {
        "application/octet-stream" => content_type(&file_name),
        known => known,
    };

    let mut file = File::open(&session.target_file)
        .await
        .map_err(|e| ApiError::from_io("File", e))?;

    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, mime)
        .header(header::ACCEPT_RANGES, "bytes");
    if options.download {
        builder = builder.header(header::CONTENT_DISPOSITION, attachment_disposition(&file_name));
    }
    if let Some(cache) = options.cache_control {
        builder = builder.header(header::CACHE_CONTROL, cache);
    }

    let response = match session.requested_range {
        Some(range) => {
            debug!(
                file = %session.target_file.display(),
                start = range.start,
                end = range.end,
                size = session.total_size,
                "Serving byte range"
            );
            file.seek(SeekFrom::Start(range.start))
                .await
                .map_err(|e| ApiError::Internal(format!("seek failed: {}", e)))?;
            let stream = ReaderStream::with_capacity(file.take(range.len()), STREAM_CHUNK_SIZE);

            builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(
                    header::CONTENT_RANGE,
                    format!("bytes {}-{}/{}", range.start, range.end, session.total_size),
                )
                .header(header::CONTENT_LENGTH, range.len())
                .body(Body::from_stream(stream))
        }
        None => {
            debug!(
                file = %session.target_file.display(),
                size = session.total_size,
                "Serving full file"
            );
            let stream = ReaderStream::with_capacity(file, STREAM_CHUNK_SIZE);

            builder
                .status(StatusCode::OK)
                .header(header::CONTENT_LENGTH, session.total_size)
                .body(Body::from_stream(stream))
        }
    };

    response.map_err(|e| ApiError::Internal(format!("failed to build response: {}", e)))
}

/// Bytes left unescaped in an RFC 5987 `filename*` value.
const FILENAME_ATTR_CHARS: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// `attachment` disposition with an ASCII fallback name and an RFC 5987
/// `filename*` when the name is not plain ASCII.
pub fn attachment_disposition(file_name: &str) -> HeaderValue {
    let fallback: String = file_name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();

    let value = if fallback == file_name {
        format!("attachment; filename=\"{}\"", fallback)
    } else {
        format!(
            "attachment; filename=\"{}\"; filename*=UTF-8''{}",
            fallback,
            utf8_percent_encode(file_name, FILENAME_ATTR_CHARS)
        )
    };

    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}
