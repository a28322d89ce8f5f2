//! Static file serving from the report and artifact directories

use std::path::Path;

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::debug;

/// Serve `rel` from below `dir`.
///
/// `rel` is the percent-encoded URL path. Paths that escape `dir` once
/// canonicalized get the same 404 as missing files.
pub async fn serve_under(dir: &Path, rel: &str) -> Response {
    let Ok(rel) = urlencoding::decode(rel.trim_start_matches('/')) else {
        return not_found();
    };
    if rel.is_empty() || Path::new(rel.as_ref()).is_absolute() {
        return not_found();
    }

    // Prevent path traversal: canonicalize and ensure the requested path stays within dir.
    let Ok(canon_dir) = tokio::fs::canonicalize(dir).await else {
        return not_found();
    };
    let Ok(canon_req) = tokio::fs::canonicalize(canon_dir.join(rel.as_ref())).await else {
        return not_found();
    };
    if !canon_req.starts_with(&canon_dir) {
        debug!("Refusing path outside {}: {}", dir.display(), rel);
        return not_found();
    }

    match tokio::fs::read(&canon_req).await {
        Ok(bytes) => {
            let mime = mime_guess::from_path(&canon_req).first_or_octet_stream();
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, mime.essence_str().to_string())],
                bytes,
            )
                .into_response()
        }
        Err(_) => not_found(),
    }
}

pub fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not found").into_response()
}
