//! The upload directory.
//!
//! Uploaded slides are streamed to a hidden partial file and renamed into
//! place once complete, so listings and loads never observe a half-written
//! slide.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::UploadError;
use crate::overlay::SEGMENTATION_SUFFIX;
use crate::slide::{open_local_slide, Slide};

use super::filename::{allowed_file, secure_filename};

/// `ctime`-style timestamp, e.g. `Mon Oct  5 14:03:09 2026`.
const CTIME_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

/// One entry of the upload directory listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileEntry {
    pub filename: String,
    pub size: u64,
    pub size_kb: f64,
    pub modified: String,
}

/// Slide files stored under one directory.
#[derive(Debug, Clone)]
pub struct SlideStore {
    dir: PathBuf,
    max_upload_bytes: u64,
}

impl SlideStore {
    pub fn new(dir: impl Into<PathBuf>, max_upload_bytes: u64) -> Self {
        Self {
            dir: dir.into(),
            max_upload_bytes,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the directory if it does not exist yet.
    pub async fn ensure_dir(&self) -> Result<(), UploadError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| storage_error(&self.dir, e))
    }

    /// Start receiving an upload named `client_name`.
    ///
    /// # Errors
    ///
    /// - [`UploadError::NoSelectedFile`] when the name is empty, before or after sanitising
    /// - [`UploadError::FileTypeNotAllowed`] for other extensions
    pub async fn begin_upload(&self, client_name: &str) -> Result<PendingUpload, UploadError> {
        if client_name.is_empty() {
            return Err(UploadError::NoSelectedFile);
        }
        if !allowed_file(client_name) {
            return Err(UploadError::FileTypeNotAllowed);
        }

        let filename = secure_filename(client_name);
        if filename.is_empty() {
            return Err(UploadError::NoSelectedFile);
        }
        // Sanitising can strip the extension, e.g. "日本.svs" → "svs"
        if !allowed_file(&filename) {
            return Err(UploadError::FileTypeNotAllowed);
        }

        self.ensure_dir().await?;

        let final_path = self.dir.join(&filename);
        let partial_path = self.dir.join(format!(".{}.part", filename));
        let file = tokio::fs::File::create(&partial_path)
            .await
            .map_err(|e| storage_error(&partial_path, e))?;

        debug!(filename = %filename, "Receiving upload");

        Ok(PendingUpload {
            filename,
            file,
            partial_path,
            final_path,
            written: 0,
            limit: self.max_upload_bytes,
        })
    }

    /// Path of a stored slide, by sanitised name.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::NotFound`] when no regular file of that name exists.
    pub async fn resolve(&self, name: &str) -> Result<(String, PathBuf), UploadError> {
        let filename = secure_filename(name);
        if filename.is_empty() {
            return Err(UploadError::NotFound(filename));
        }

        let path = self.dir.join(&filename);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok((filename, path)),
            Ok(_) => Err(UploadError::NotFound(filename)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(UploadError::NotFound(filename))
            }
            Err(e) => Err(storage_error(&path, e)),
        }
    }

    /// Open a stored slide by name.
    pub async fn open(&self, name: &str) -> Result<(String, Arc<dyn Slide>), UploadError> {
        let (filename, path) = self.resolve(name).await?;
        let slide = open_local_slide(&path).await?;
        Ok((filename, slide))
    }

    /// Regular files in the directory, sorted by name.
    ///
    /// Partial uploads are hidden files and are not listed, nor are the
    /// segmentation files kept next to the slides or their in-flight temp
    /// files.
    pub async fn list_files(&self) -> Result<Vec<FileEntry>, UploadError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| storage_error(&self.dir, e))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_error(&self.dir, e))?
        {
            let filename = entry.file_name().to_string_lossy().into_owned();
            if filename.starts_with('.')
                || filename.ends_with(SEGMENTATION_SUFFIX)
                || filename.ends_with(".tmp")
            {
                continue;
            }

            // A file may vanish between read_dir and stat
            let meta = match entry.metadata().await {
                Ok(meta) if meta.is_file() => meta,
                _ => continue,
            };

            let size = meta.len();
            let modified = meta.modified().map(format_ctime).unwrap_or_default();

            files.push(FileEntry {
                filename,
                size,
                size_kb: size_kb(size),
                modified,
            });
        }

        files.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(files)
    }
}

/// An upload being streamed to disk.
pub struct PendingUpload {
    filename: String,
    file: tokio::fs::File,
    partial_path: PathBuf,
    final_path: PathBuf,
    written: u64,
    limit: u64,
}

impl PendingUpload {
    /// Sanitised name the slide will be stored under.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Append a chunk of the upload body.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::TooLarge`] once the upload limit is exceeded.
    /// The caller should then [`abort`](Self::abort).
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), UploadError> {
        self.written += chunk.len() as u64;
        if self.written > self.limit {
            return Err(UploadError::TooLarge { limit: self.limit });
        }
        self.file
            .write_all(chunk)
            .await
            .map_err(|e| storage_error(&self.partial_path, e))
    }

    /// Flush and move the upload into place, replacing any previous file.
    pub async fn finish(mut self) -> Result<(String, PathBuf), UploadError> {
        self.file
            .flush()
            .await
            .map_err(|e| storage_error(&self.partial_path, e))?;
        self.file
            .sync_all()
            .await
            .map_err(|e| storage_error(&self.partial_path, e))?;
        drop(self.file);

        tokio::fs::rename(&self.partial_path, &self.final_path)
            .await
            .map_err(|e| storage_error(&self.final_path, e))?;

        info!(
            filename = %self.filename,
            bytes = self.written,
            "Upload stored"
        );
        Ok((self.filename, self.final_path))
    }

    /// Discard the partial file.
    pub async fn abort(self) {
        drop(self.file);
        if let Err(e) = tokio::fs::remove_file(&self.partial_path).await {
            debug!(path = %self.partial_path.display(), error = %e, "Failed to remove partial upload");
        }
    }
}

fn storage_error(path: &Path, err: std::io::Error) -> UploadError {
    UploadError::Storage(format!("{}: {}", path.display(), err))
}

/// Size in KiB rounded to one decimal.
fn size_kb(size: u64) -> f64 {
    (size as f64 / 1024.0 * 10.0).round() / 10.0
}

fn format_ctime(time: SystemTime) -> String {
    DateTime::<Local>::from(time).format(CTIME_FORMAT).to_string()
}
