//! Local filesystem layout for downloaded reports
//!
//! A report at catalog path `/Sales/Report1` under root `power_bi_reports`
//! is downloaded to `power_bi_reports/Sales/Report1.zip` and unpacked into
//! the folder `power_bi_reports/Sales/Report1/`.

use crate::error::{ExtractError, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Local files owned by one catalog entry while it is processed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalArtifactBundle {
    /// Extraction folder
    pub folder: PathBuf,
    /// Downloaded top-level archive, `folder` + ".zip"
    pub archive_path: PathBuf,
    /// `/`-separated form of `folder`, stored in the destination `path` column
    pub label: String,
}

impl LocalArtifactBundle {
    /// Map a catalog path below `root`
    ///
    /// Empty segments are ignored; `.` and `..` segments are refused so a
    /// catalog row can never point outside `root`.
    pub fn derive(root: &Path, catalog_path: &str) -> Result<Self> {
        let segments: Vec<&str> = catalog_path
            .split(['/', '\\'])
            .filter(|segment| !segment.is_empty())
            .collect();

        if segments.is_empty() || segments.iter().any(|s| *s == "." || *s == "..") {
            return Err(ExtractError::InvalidPath(catalog_path.to_string()));
        }

        let folder = segments
            .iter()
            .fold(root.to_path_buf(), |folder, segment| folder.join(segment));

        let mut archive_path = folder.clone().into_os_string();
        archive_path.push(".zip");

        let root_label = root.to_string_lossy().replace('\\', "/");
        let label = format!("{}/{}", root_label.trim_end_matches('/'), segments.join("/"));

        Ok(Self {
            folder,
            archive_path: PathBuf::from(archive_path),
            label,
        })
    }

    /// Leave an empty extraction folder and no archive behind
    ///
    /// Content from an earlier run of the same path is removed; a missing
    /// folder or archive is not an error.
    pub async fn prepare(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.folder).await {
            Ok(()) => debug!(folder = %self.folder.display(), "Removed previous extraction"),
            Err(e) if e.kind() == ErrorKind::NotFound => {},
            Err(e) => return Err(ExtractError::storage(&self.folder, e)),
        }

        match tokio::fs::remove_file(&self.archive_path).await {
            Ok(()) => debug!(archive = %self.archive_path.display(), "Removed previous archive"),
            Err(e) if e.kind() == ErrorKind::NotFound => {},
            Err(e) => return Err(ExtractError::storage(&self.archive_path, e)),
        }

        tokio::fs::create_dir_all(&self.folder)
            .await
            .map_err(|e| ExtractError::storage(&self.folder, e))
    }
}
