//! Source files and downloaded artifacts.
//!
//! A [`SourceFile`] is the in-memory copy of what the user picked for upload;
//! an [`Artifact`] is a finished result coming back from the server. Both
//! carry a filename because every endpoint that moves files either needs one
//! (multipart upload) or supplies one (`Content-Disposition`).

use crate::error::LauncherError;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A file selected for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Name sent as the multipart filename.
    pub name: String,
    /// Raw file contents.
    pub bytes: Vec<u8>,
}

impl SourceFile {
    /// Wrap bytes that are already in memory.
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    /// Read a local file.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, LauncherError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| LauncherError::SourceUnreadable {
                path: path.to_path_buf(),
                source,
            })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload.bin".to_string());
        debug!("Read source file {} ({} bytes)", path.display(), bytes.len());
        Ok(Self { name, bytes })
    }

    /// Best-effort MIME type from the file extension.
    pub fn mime_type(&self) -> &'static str {
        let ext = self
            .name
            .rsplit_once('.')
            .map(|(_, e)| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "jpg" | "jpeg" => "image/jpeg",
            "png" => "image/png",
            "webp" => "image/webp",
            "gif" => "image/gif",
            "bmp" => "image/bmp",
            "pdf" => "application/pdf",
            "mp4" => "video/mp4",
            "mov" => "video/quicktime",
            "webm" => "video/webm",
            "mkv" => "video/x-matroska",
            "avi" => "video/x-msvideo",
            _ => "application/octet-stream",
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A finished file returned by export or download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Filename from `Content-Disposition`, or the tool's fallback.
    pub filename: String,
    /// Value of the `Content-Type` header, when present.
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl Artifact {
    /// Write the artifact to `target`.
    ///
    /// When `target` is an existing directory the artifact's own filename is
    /// used inside it. The write is atomic: contents go to a temp file in the
    /// destination directory, which is then renamed into place.
    pub async fn save(&self, target: impl AsRef<Path>) -> Result<PathBuf, LauncherError> {
        let target = target.as_ref();
        let path = if tokio::fs::metadata(target)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            target.join(&self.filename)
        } else {
            target.to_path_buf()
        };

        let bytes = self.bytes.clone();
        let dest = path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&dest, &bytes))
            .await
            .map_err(|e| LauncherError::Internal(format!("write task panicked: {e}")))??;

        info!("Saved {} ({} bytes)", path.display(), self.bytes.len());
        Ok(path)
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), LauncherError> {
    let write_err = |source: std::io::Error| LauncherError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(write_err)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(write_err)?;
    tmp.write_all(bytes).map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}
