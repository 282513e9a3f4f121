//! Input resolution: normalise a user-supplied path or URL to a local file.
//!
//! ## Why keep downloads in the cache directory?
//!
//! pdfium requires a file-system path, so URLs are downloaded first. The
//! file lands in `<cache_dir>/downloads/` and is reused on the next run,
//! which keeps the document's [`SourceId`](crate::model::SourceId) (and so
//! all its cache entries) stable without a second download. The `%PDF`
//! magic bytes are checked before returning so callers get a meaningful
//! error rather than a pdfium failure.

use crate::error::PipelineError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

static ARXIV_ABS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://(?:www\.)?arxiv\.org/abs/([^/?#]+?)(?:v\d+)?/?$").unwrap());
static HF_PAPER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://(?:www\.)?huggingface\.co/papers/([^/?#]+)/?$").unwrap());

/// A local PDF ready to be opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInput {
    pub path: PathBuf,
    /// The URL the file was fetched from, if any.
    pub url: Option<String>,
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Rewrite paper landing pages to their direct PDF link.
///
/// `arxiv.org/abs/<id>` and `huggingface.co/papers/<id>` both point at
/// `arxiv.org/pdf/<id>.pdf`; anything else is returned unchanged.
pub fn canonical_pdf_url(url: &str) -> String {
    let url = url.trim();
    if let Some(c) = ARXIV_ABS.captures(url).or_else(|| HF_PAPER.captures(url)) {
        return format!("https://arxiv.org/pdf/{}.pdf", &c[1]);
    }
    url.to_string()
}

/// Resolve the input string to a local PDF file path.
pub async fn resolve_input(
    input: &str,
    cache_dir: &Path,
    timeout_secs: u64,
) -> Result<ResolvedInput, PipelineError> {
    if input.trim().is_empty() {
        return Err(PipelineError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(&canonical_pdf_url(input), cache_dir, timeout_secs).await
    } else {
        resolve_local(input)
    }
}

/// Validate existence, permissions and PDF magic bytes.
fn resolve_local(path_str: &str) -> Result<ResolvedInput, PipelineError> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(PipelineError::FileNotFound { path });
    }

    match std::fs::File::open(&path) {
        Ok(mut f) => {
            let mut magic = [0u8; 4];
            if f.read_exact(&mut magic).is_ok() && &magic != b"%PDF" {
                return Err(PipelineError::NotAPdf { path, magic });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(PipelineError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(PipelineError::FileNotFound { path });
        }
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(ResolvedInput { path, url: None })
}

async fn download_url(
    url: &str,
    cache_dir: &Path,
    timeout_secs: u64,
) -> Result<ResolvedInput, PipelineError> {
    let dir = cache_dir.join("downloads");
    let file_path = dir.join(filename_from_url(url));

    if file_path.exists() {
        info!("Reusing download: {}", file_path.display());
        let resolved = resolve_local(&file_path.to_string_lossy())?;
        return Ok(ResolvedInput {
            url: Some(url.to_string()),
            ..resolved
        });
    }

    info!("Downloading PDF from: {}", url);
    let failed = |reason: String| PipelineError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            PipelineError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;

    if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
        let mut magic = [0u8; 4];
        let n = bytes.len().min(4);
        magic[..n].copy_from_slice(&bytes[..n]);
        return Err(PipelineError::NotAPdf {
            path: file_path,
            magic,
        });
    }

    crate::export::write_atomic(&file_path, &bytes)?;
    info!("Downloaded to: {}", file_path.display());

    Ok(ResolvedInput {
        path: file_path,
        url: Some(url.to_string()),
    })
}

/// A file name for a downloaded URL: the last path segment, with `.pdf`
/// appended when missing.
pub fn filename_from_url(url: &str) -> String {
    let last = reqwest::Url::parse(url).ok().and_then(|parsed| {
        parsed
            .path_segments()
            .and_then(|mut s| s.next_back().map(str::to_string))
            .filter(|s| !s.is_empty())
    });
    match last {
        Some(name) if name.to_ascii_lowercase().ends_with(".pdf") => name,
        Some(name) => format!("{name}.pdf"),
        None => "downloaded.pdf".to_string(),
    }
}
