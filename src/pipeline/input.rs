//! Input resolution: turn a user-supplied path or URL into PDF bytes.
//!
//! pdfium can open a byte slice directly, so unlike a file-based pipeline
//! nothing is written to disk: local files are read and URLs are downloaded
//! into memory. The `%PDF` magic bytes are checked up front so callers get a
//! meaningful error rather than a pdfium failure.

use crate::error::ExaminerError;
use std::path::Path;
use tracing::{debug, info};

/// An uploaded PDF: display name plus raw bytes.
#[derive(Debug, Clone)]
pub struct PdfSource {
    /// File name shown in history (`paper.pdf`), not a full path.
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl PdfSource {
    /// Wrap bytes that are already in memory, validating the PDF header.
    pub fn from_bytes(file_name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, ExaminerError> {
        let file_name = file_name.into();
        check_magic(&file_name, &bytes)?;
        Ok(Self { file_name, bytes })
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve a local path or HTTP/HTTPS URL into a [`PdfSource`].
pub async fn resolve_pdf(input: &str, timeout_secs: u64) -> Result<PdfSource, ExaminerError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        read_local(Path::new(input)).await
    }
}

fn check_magic(name: &str, bytes: &[u8]) -> Result<(), ExaminerError> {
    if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
        return Err(ExaminerError::NotAPdf {
            name: name.to_string(),
            magic: bytes.iter().take(4).copied().collect(),
        });
    }
    Ok(())
}

async fn read_local(path: &Path) -> Result<PdfSource, ExaminerError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => ExaminerError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => ExaminerError::FileNotFound {
            path: path.to_path_buf(),
        },
    })?;

    let file_name = display_name(path);
    debug!("Read local PDF: {} ({} bytes)", path.display(), bytes.len());
    PdfSource::from_bytes(file_name, bytes)
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<PdfSource, ExaminerError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ExaminerError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            ExaminerError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            ExaminerError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(ExaminerError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| ExaminerError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    info!("Downloaded {} bytes", bytes.len());
    PdfSource::from_bytes(file_name_from_url(url), bytes.to_vec())
}

/// Last non-empty path segment containing a dot, else `downloaded.pdf`.
pub fn file_name_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded.pdf".to_string()
}

/// File-name part of a path, falling back to the whole path.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
