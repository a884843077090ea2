//! Error taxonomy for the extraction pipeline
//!
//! Errors split into two scopes. Run-scoped errors (`SourceUnavailable`,
//! `CatalogRead`, `Reset`, `Config`) end the run. Entry-scoped errors only
//! concern the report being processed; the pipeline's entry policy decides
//! whether they skip that report or end the run.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;
use thiserror::Error;

/// Result type for extraction operations
pub type Result<T> = std::result::Result<T, ExtractError>;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Catalog source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Failed to read catalog row: {0}")]
    CatalogRead(String),

    #[error("Failed to reset destination table {table}: {source}")]
    Reset {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Catalog path '{0}' cannot be mapped to a local folder")]
    InvalidPath(String),

    #[error("Failed to fetch catalog item {item_id}: {reason}")]
    Fetch { item_id: String, reason: String },

    #[error("Failed to store {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Unpack(#[from] UnpackError),

    #[error("Failed to read extracted text {}: {reason}", path.display())]
    Read { path: PathBuf, reason: String },

    #[error("Failed to write row for catalog item {item_id}: {source}")]
    Write {
        item_id: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ExtractError {
    /// Whether the error only concerns the entry being processed
    pub fn is_entry_scoped(&self) -> bool {
        matches!(
            self,
            ExtractError::InvalidPath(_)
                | ExtractError::Fetch { .. }
                | ExtractError::Storage { .. }
                | ExtractError::Unpack(_)
                | ExtractError::Read { .. }
                | ExtractError::Write { .. }
        )
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }
}

/// Failure of one archive extraction step
#[derive(Debug, Error)]
pub enum UnpackError {
    #[error("Failed to launch archive tool {}: {source}", tool.display())]
    Launch {
        tool: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Archive tool {status} while extracting {member} from {}: {output}", archive.display())]
    ToolFailed {
        archive: PathBuf,
        member: String,
        status: ExitStatus,
        output: String,
    },

    #[error("Archive tool timed out after {timeout:?} extracting {member} from {}", archive.display())]
    TimedOut {
        archive: PathBuf,
        member: String,
        timeout: Duration,
    },

    #[error("Member {member} not found in {}", archive.display())]
    MemberNotFound { archive: PathBuf, member: String },

    #[error("{} is not a readable archive: {reason}", archive.display())]
    Format { archive: PathBuf, reason: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Extraction worker failed: {0}")]
    Worker(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_scope_classification() {
        assert!(ExtractError::InvalidPath("/..".into()).is_entry_scoped());
        assert!(ExtractError::Fetch {
            item_id: "A1".into(),
            reason: "HTTP 404".into()
        }
        .is_entry_scoped());
        assert!(ExtractError::Unpack(UnpackError::Worker("panicked".into())).is_entry_scoped());
        assert!(ExtractError::Read {
            path: PathBuf::from("Section1.m"),
            reason: "missing".into()
        }
        .is_entry_scoped());

        assert!(!ExtractError::SourceUnavailable("refused".into()).is_entry_scoped());
        assert!(!ExtractError::CatalogRead("bad row".into()).is_entry_scoped());
        assert!(!ExtractError::config("empty url").is_entry_scoped());
        assert!(!ExtractError::Reset {
            table: "t".into(),
            source: sqlx::Error::PoolClosed
        }
        .is_entry_scoped());
    }

    #[test]
    fn test_unpack_error_is_transparent() {
        let err: ExtractError = UnpackError::MemberNotFound {
            archive: PathBuf::from("Sales/Report1/DataMashup"),
            member: "Section1.m".into(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Member Section1.m not found in Sales/Report1/DataMashup"
        );
    }
}
