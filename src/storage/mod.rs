//! Uploaded file storage.
//!
//! Files live flat in the uploads directory as `{unix_millis}-{sanitized name}`
//! and are served back under `{public_url}/uploads/{file}`.

use anyhow::{Context, Result};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Route prefix uploaded files are served from
pub const UPLOADS_ROUTE: &str = "/uploads";

/// A file written to the uploads directory
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub file_name: String,
    pub path: PathBuf,
    pub url: String,
}

pub struct UploadStore {
    dir: PathBuf,
    public_url: String,
}

/// Replace every character outside `[A-Za-z0-9.-]` with `_`.
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    if sanitized.is_empty() {
        "upload".to_string()
    } else {
        sanitized
    }
}

/// Public URL for a stored file name
pub fn image_url(public_url: &str, file_name: &str) -> String {
    format!("{}{}/{}", public_url.trim_end_matches('/'), UPLOADS_ROUTE, file_name)
}

/// Last path segment of a URL or filesystem path, ignoring query and fragment.
fn file_name_of(url_or_path: &str) -> Option<&str> {
    let without_suffix = url_or_path
        .split(['?', '#'])
        .next()
        .unwrap_or_default();
    without_suffix
        .rsplit(['/', '\\'])
        .next()
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
}

/// Map a stored image URL (absolute URL or `/uploads/...` path) to the file
/// in `uploads_dir`. Returns `None` when no such file exists.
pub fn resolve_image_path(url_or_path: &str, uploads_dir: &Path) -> Option<PathBuf> {
    let path = uploads_dir.join(file_name_of(url_or_path.trim())?);
    path.is_file().then_some(path)
}

impl UploadStore {
    pub fn new(dir: impl Into<PathBuf>, public_url: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            public_url: public_url.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Ensure the uploads directory exists
    pub fn ensure_dir(&self) -> Result<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir).context("Failed to create uploads directory")?;
        }
        Ok(())
    }

    /// Generate a file name that does not collide with an existing upload.
    fn unique_name(&self, original_name: &str) -> String {
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let millis = Utc::now().timestamp_millis();
        let sanitized = sanitize_filename(original_name);
        let name = format!("{}-{}", millis, sanitized);
        if !self.dir.join(&name).exists() {
            return name;
        }

        loop {
            let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
            let name = format!("{}-{}-{}", millis, seq, sanitized);
            if !self.dir.join(&name).exists() {
                return name;
            }
        }
    }

    /// Write an uploaded file and return where it landed
    pub fn save(&self, bytes: &[u8], original_name: &str) -> Result<StoredFile> {
        self.ensure_dir()?;

        let file_name = self.unique_name(original_name);
        let path = self.dir.join(&file_name);
        fs::write(&path, bytes)
            .with_context(|| format!("Failed to write upload {}", path.display()))?;

        Ok(StoredFile {
            url: image_url(&self.public_url, &file_name),
            file_name,
            path,
        })
    }

    pub fn resolve(&self, url_or_path: &str) -> Option<PathBuf> {
        resolve_image_path(url_or_path, &self.dir)
    }

    /// Remove the file behind a stored URL. Returns whether a file was deleted;
    /// failures are logged, not raised.
    pub fn delete(&self, url_or_path: &str) -> bool {
        let Some(path) = self.resolve(url_or_path) else {
            return false;
        };
        match fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to delete image file");
                false
            }
        }
    }
}
