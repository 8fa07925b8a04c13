//! Image storage for records that carry a picture.
//!
//! Images are written under the upload directory as `<uuid>.<ext>` and
//! referenced from records as `/uploads/<uuid>.<ext>`, which the router
//! serves straight from that directory.

use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::api::form::UploadedFile;

/// URL prefix under which stored images are served
pub const UPLOADS_ROUTE: &str = "/uploads";

const ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("image is empty")]
    Empty,
    #[error("image exceeds the {limit} byte limit")]
    TooLarge { limit: usize },
    #[error("unsupported image type: {0}")]
    NotAnImage(String),
    #[error("failed to write image: {0}")]
    Io(#[from] std::io::Error),
}

/// Pick the file extension for an upload from its content type, falling
/// back to the submitted file name.
fn image_extension(file: &UploadedFile) -> Result<String, UploadError> {
    if let Some(content_type) = file.content_type.as_deref() {
        if !content_type.starts_with("image/") {
            return Err(UploadError::NotAnImage(content_type.to_string()));
        }
        if let Some(ext) = mime_guess::get_mime_extensions_str(content_type)
            .and_then(|exts| exts.iter().find(|e| ALLOWED_EXTENSIONS.contains(*e)))
        {
            return Ok(ext.to_string());
        }
    }

    let from_name = file
        .filename
        .as_deref()
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match from_name {
        Some(ext) if ALLOWED_EXTENSIONS.contains(&ext.as_str()) => Ok(ext),
        Some(ext) => Err(UploadError::NotAnImage(ext)),
        None => Err(UploadError::NotAnImage(
            file.content_type.clone().unwrap_or_else(|| "unknown".to_string()),
        )),
    }
}

/// Write an uploaded image and return its public reference.
pub async fn store_image(
    dir: &Path,
    max_bytes: usize,
    file: &UploadedFile,
) -> Result<String, UploadError> {
    if file.bytes.is_empty() {
        return Err(UploadError::Empty);
    }
    if file.bytes.len() > max_bytes {
        return Err(UploadError::TooLarge { limit: max_bytes });
    }

    let ext = image_extension(file)?;
    let name = format!("{}.{}", Uuid::new_v4(), ext);

    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(dir.join(&name), &file.bytes).await?;

    tracing::debug!(file = %name, bytes = file.bytes.len(), "Stored image");
    Ok(format!("{}/{}", UPLOADS_ROUTE, name))
}

/// Map a stored reference back to its file, refusing anything that is not a
/// plain file name under the upload route.
fn stored_path(dir: &Path, reference: &str) -> Option<PathBuf> {
    let name = reference.strip_prefix(UPLOADS_ROUTE)?.strip_prefix('/')?;
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
        return None;
    }
    Some(dir.join(name))
}

/// Remove a previously stored image. Missing files are ignored.
pub async fn remove_image(dir: &Path, reference: &str) {
    let Some(path) = stored_path(dir, reference) else {
        tracing::warn!(reference = %reference, "Refusing to remove image outside upload dir");
        return;
    };
    match tokio::fs::remove_file(&path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed image"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove image"),
    }
}
