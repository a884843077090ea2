//! Archive Unpacker
//!
//! A `.pbix` report is a zip archive. Its query source does not sit in that
//! archive directly: the member `DataMashup` is itself a container whose
//! package parts hold `Formulas/Section1.m`. Getting at the text therefore
//! takes two extraction steps, each performed by an [`ArchiveExtractor`].

use crate::config::{ArchiveConfig, ArchiveToolKind};
use crate::error::{ExtractError, UnpackError};
use crate::layout::LocalArtifactBundle;
use async_trait::async_trait;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Member of the report archive holding the query container
pub const INNER_CONTAINER_MEMBER: &str = "DataMashup";

/// Member of the query container holding the `M` source text
pub const QUERY_SOURCE_MEMBER: &str = "Section1.m";

const ZIP_LOCAL_HEADER: &[u8] = b"PK\x03\x04";

/// Extracts one named member from an archive into a directory
///
/// The member is written flat into `output_dir` under its file name,
/// replacing any existing file. With `recursive` the member is searched at
/// any depth of the archive, otherwise only its exact name matches.
#[async_trait]
pub trait ArchiveExtractor: Send + Sync {
    async fn extract(
        &self,
        archive: &Path,
        member: &str,
        output_dir: &Path,
        recursive: bool,
    ) -> Result<(), UnpackError>;
}

/// Runs the two extraction steps against one bundle
pub struct ArchiveUnpacker {
    extractor: Box<dyn ArchiveExtractor>,
}

impl ArchiveUnpacker {
    pub fn new(extractor: Box<dyn ArchiveExtractor>) -> Self {
        Self { extractor }
    }

    /// Step one: `DataMashup` out of the downloaded archive
    pub async fn extract_container(
        &self,
        bundle: &LocalArtifactBundle,
    ) -> Result<PathBuf, ExtractError> {
        self.extractor
            .extract(&bundle.archive_path, INNER_CONTAINER_MEMBER, &bundle.folder, false)
            .await?;
        Ok(bundle.folder.join(INNER_CONTAINER_MEMBER))
    }

    /// Step two: `Section1.m` out of the container, wherever it is nested
    pub async fn extract_query_source(
        &self,
        bundle: &LocalArtifactBundle,
        container: &Path,
    ) -> Result<PathBuf, ExtractError> {
        self.extractor
            .extract(container, QUERY_SOURCE_MEMBER, &bundle.folder, true)
            .await?;
        Ok(bundle.folder.join(QUERY_SOURCE_MEMBER))
    }

    /// Both steps in order; returns the path of the extracted text member
    pub async fn unpack(&self, bundle: &LocalArtifactBundle) -> Result<PathBuf, ExtractError> {
        let container = self.extract_container(bundle).await?;
        self.extract_query_source(bundle, &container).await
    }
}

// ============================================================================
// 7-Zip process
// ============================================================================

/// Extraction through an external 7-Zip executable
///
/// Invoked as `<tool> -aoa e <archive> -o<dir> <member> [-r] -y`. 7-Zip
/// reports success when nothing matched the member name, so a missing
/// member shows up later as a read failure of the extracted file.
#[derive(Debug, Clone)]
pub struct SevenZip {
    tool_path: PathBuf,
    timeout: Option<Duration>,
}

impl SevenZip {
    pub fn new(tool_path: impl Into<PathBuf>) -> Self {
        Self {
            tool_path: tool_path.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn arguments(
        archive: &Path,
        member: &str,
        output_dir: &Path,
        recursive: bool,
    ) -> Vec<String> {
        let mut args = vec![
            "-aoa".to_string(),
            "e".to_string(),
            archive.to_string_lossy().into_owned(),
            format!("-o{}", output_dir.to_string_lossy()),
            member.to_string(),
        ];
        if recursive {
            args.push("-r".to_string());
        }
        args.push("-y".to_string());
        args
    }
}

fn output_tail(stdout: &[u8], stderr: &[u8]) -> String {
    const LIMIT: usize = 512;
    let text = if stderr.iter().any(|b| !b.is_ascii_whitespace()) {
        String::from_utf8_lossy(stderr)
    } else {
        String::from_utf8_lossy(stdout)
    };
    let text = text.trim();
    match text.char_indices().rev().nth(LIMIT) {
        Some((start, _)) => format!("...{}", &text[start..]),
        None => text.to_string(),
    }
}

#[async_trait]
impl ArchiveExtractor for SevenZip {
    async fn extract(
        &self,
        archive: &Path,
        member: &str,
        output_dir: &Path,
        recursive: bool,
    ) -> Result<(), UnpackError> {
        let args = Self::arguments(archive, member, output_dir, recursive);
        debug!(tool = %self.tool_path.display(), args = ?args, "Running archive tool");

        let mut command = Command::new(&self.tool_path);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let run = command.output();
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, run).await.map_err(|_| {
                UnpackError::TimedOut {
                    archive: archive.to_path_buf(),
                    member: member.to_string(),
                    timeout: limit,
                }
            })?,
            None => run.await,
        }
        .map_err(|source| UnpackError::Launch {
            tool: self.tool_path.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(UnpackError::ToolFailed {
                archive: archive.to_path_buf(),
                member: member.to_string(),
                status: output.status,
                output: output_tail(&output.stdout, &output.stderr),
            });
        }

        debug!(member, archive = %archive.display(), "Archive tool finished");
        Ok(())
    }
}

// ============================================================================
// In-process zip reader
// ============================================================================

/// Extraction with the `zip` crate, no external tool required
///
/// Besides plain zip archives it reads `DataMashup` streams: a 4-byte
/// little-endian version (0), a 4-byte little-endian length, then that many
/// bytes of zip package parts.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeZip;

/// Locate the zip bytes inside a plain zip or a `DataMashup` stream
pub fn package_bytes(bytes: &[u8]) -> Result<&[u8], String> {
    if bytes.starts_with(ZIP_LOCAL_HEADER) {
        return Ok(bytes);
    }
    if bytes.len() < 8 {
        return Err(format!("{} bytes is too short for an archive", bytes.len()));
    }

    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[0..4]);
    let version = u32::from_le_bytes(word);
    if version != 0 {
        return Err(format!("unsupported container version {version}"));
    }

    word.copy_from_slice(&bytes[4..8]);
    let length = u32::from_le_bytes(word) as usize;
    let parts = 8usize
        .checked_add(length)
        .and_then(|end| bytes.get(8..end))
        .ok_or_else(|| format!("package parts length {length} exceeds container size"))?;

    if !parts.starts_with(ZIP_LOCAL_HEADER) {
        return Err("package parts are not a zip archive".to_string());
    }
    Ok(parts)
}

fn member_matches(entry_name: &str, member: &str, recursive: bool) -> bool {
    let entry_name = entry_name.trim_start_matches('/');
    if recursive {
        entry_name.rsplit(['/', '\\']).next() == Some(member)
    } else {
        entry_name == member
    }
}

fn extract_blocking(
    archive: &Path,
    member: &str,
    output_dir: &Path,
    recursive: bool,
) -> Result<(), UnpackError> {
    let io_error = |path: &Path, source| UnpackError::Io {
        path: path.to_path_buf(),
        source,
    };
    let format_error = |reason: String| UnpackError::Format {
        archive: archive.to_path_buf(),
        reason,
    };

    let bytes = std::fs::read(archive).map_err(|e| io_error(archive, e))?;
    let package = package_bytes(&bytes).map_err(format_error)?;
    let mut zip =
        zip::ZipArchive::new(Cursor::new(package)).map_err(|e| format_error(e.to_string()))?;

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).map_err(|e| format_error(e.to_string()))?;
        if entry.is_dir() || !member_matches(entry.name(), member, recursive) {
            continue;
        }

        let target = output_dir.join(member);
        let mut contents = Vec::new();
        entry
            .read_to_end(&mut contents)
            .map_err(|e| format_error(format!("failed to inflate {}: {e}", entry.name())))?;

        let mut file = File::create(&target).map_err(|e| io_error(&target, e))?;
        std::io::Write::write_all(&mut file, &contents).map_err(|e| io_error(&target, e))?;

        debug!(member, bytes = contents.len(), target = %target.display(), "Member extracted");
        return Ok(());
    }

    Err(UnpackError::MemberNotFound {
        archive: archive.to_path_buf(),
        member: member.to_string(),
    })
}

#[async_trait]
impl ArchiveExtractor for NativeZip {
    async fn extract(
        &self,
        archive: &Path,
        member: &str,
        output_dir: &Path,
        recursive: bool,
    ) -> Result<(), UnpackError> {
        let archive = archive.to_path_buf();
        let member = member.to_string();
        let output_dir = output_dir.to_path_buf();

        tokio::task::spawn_blocking(move || {
            extract_blocking(&archive, &member, &output_dir, recursive)
        })
        .await
        .map_err(|e| UnpackError::Worker(e.to_string()))?
    }
}

/// Pick the extractor described by the archive configuration
pub fn extractor_for(config: &ArchiveConfig) -> Box<dyn ArchiveExtractor> {
    match config.tool {
        ArchiveToolKind::SevenZip => {
            info!(tool = %config.tool_path.display(), "Using 7-Zip for extraction");
            Box::new(
                SevenZip::new(&config.tool_path)
                    .with_timeout(config.timeout_secs.map(Duration::from_secs)),
            )
        },
        ArchiveToolKind::Native => {
            info!("Using the built-in zip reader for extraction");
            Box::new(NativeZip)
        },
    }
}
