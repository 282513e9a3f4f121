//! Export engine: Markdown serialisation and output files.
//!
//! Output locations are derived from the source document's file stem:
//!
//! ```text
//! <export_dir>/<stem>_structured.md
//! <export_dir>/<stem>_knowledge_graph.json
//! ```
//!
//! All writes go through [`write_atomic`]: a temp file in the target
//! directory followed by a rename, so a crash never leaves a truncated
//! output behind.

pub mod markdown;
pub mod postprocess;

pub use markdown::{export, export_with, ExportOptions, PageSeparator};

use crate::error::PipelineError;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// `<export_dir>/<stem>_structured.md`
pub fn markdown_path(export_dir: &Path, stem: &str) -> PathBuf {
    export_dir.join(format!("{stem}_structured.md"))
}

/// `<export_dir>/<stem>_knowledge_graph.json`
pub fn graph_path(export_dir: &Path, stem: &str) -> PathBuf {
    export_dir.join(format!("{stem}_knowledge_graph.json"))
}

/// Write `bytes` to `path` via a temp file + rename, creating parent
/// directories as needed.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PipelineError> {
    let write_err = |source: std::io::Error| PipelineError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(write_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(bytes).map_err(write_err)?;
    tmp.flush().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;

    debug!("Wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}
