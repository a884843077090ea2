//! Text Loader

use crate::error::{ExtractError, Result};
use std::io::ErrorKind;
use std::path::Path;

const UTF8_BOM: &str = "\u{feff}";

/// Query source text of one report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedText {
    pub content: String,
}

/// Read the extracted member as UTF-8, without a leading byte-order mark
///
/// A missing file is the usual outcome for reports whose container has no
/// `Section1.m`, and is reported as [`ExtractError::Read`] like any other
/// read failure.
pub async fn load_text(path: &Path) -> Result<ExtractedText> {
    let read_error = |reason: String| ExtractError::Read {
        path: path.to_path_buf(),
        reason,
    };

    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        ErrorKind::NotFound => read_error("file was not extracted".to_string()),
        _ => read_error(e.to_string()),
    })?;

    let mut content =
        String::from_utf8(bytes).map_err(|e| read_error(format!("not valid UTF-8: {e}")))?;
    if content.starts_with(UTF8_BOM) {
        content.drain(..UTF8_BOM.len());
    }

    Ok(ExtractedText { content })
}
