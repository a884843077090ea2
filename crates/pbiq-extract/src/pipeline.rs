//! Pipeline Driver
//!
//! One run:
//! 1. Truncate the destination table
//! 2. Open the catalog and stream the selected entries
//! 3. Per entry: fetch, unpack the container, unpack the text, read, write
//!
//! Entries are processed one at a time. Failures before the first entry and
//! catalog row failures end the run; per-entry failures follow
//! [`EntryErrorPolicy`].

use crate::catalog::{CatalogEntry, CatalogItemType, CatalogSource, RestCatalog, SqlCatalog};
use crate::config::{CatalogKind, EntryErrorPolicy, ExtractConfig};
use crate::destination::{DestinationRow, DestinationSink, PgDestination};
use crate::error::{ExtractError, Result};
use crate::fetcher::{build_client, ArtifactFetcher};
use crate::loader::load_text;
use crate::unpacker::{extractor_for, ArchiveUnpacker};
use futures::TryStreamExt;
use pbiq_common::Stopwatch;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

/// Per-entry processing step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Fetch,
    UnpackContainer,
    UnpackText,
    Read,
    Write,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Fetch => "fetch",
            Phase::UnpackContainer => "unpack container",
            Phase::UnpackText => "unpack text",
            Phase::Read => "read",
            Phase::Write => "write",
        };
        f.write_str(name)
    }
}

/// An entry that was skipped
#[derive(Debug, Clone, Serialize)]
pub struct EntryFailure {
    pub item_id: String,
    pub path: String,
    pub phase: Phase,
    pub error: String,
}

/// Outcome of a completed run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Entries delivered by the catalog
    pub entries: usize,
    /// Time spent opening the catalog
    pub catalog_elapsed: Duration,
    /// Rows committed to the destination
    pub loaded: usize,
    pub failures: Vec<EntryFailure>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn skipped(&self) -> usize {
        self.failures.len()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub item_type: CatalogItemType,
    pub on_entry_error: EntryErrorPolicy,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            item_type: CatalogItemType::PowerBiReport,
            on_entry_error: EntryErrorPolicy::Skip,
        }
    }
}

/// Fetch, unpack, read and write one entry
pub struct EntryProcessor {
    fetcher: ArtifactFetcher,
    unpacker: ArchiveUnpacker,
    sink: Box<dyn DestinationSink>,
}

async fn timed<T, F>(
    item_id: &str,
    phase: Phase,
    step: F,
) -> std::result::Result<T, (Phase, ExtractError)>
where
    F: Future<Output = Result<T>>,
{
    let watch = Stopwatch::start();
    let outcome = step.await.map_err(|e| (phase, e));
    if outcome.is_ok() {
        info!(item_id, %phase, elapsed = %watch.elapsed_human(), "Phase complete");
    }
    outcome
}

impl EntryProcessor {
    pub fn new(
        fetcher: ArtifactFetcher,
        unpacker: ArchiveUnpacker,
        sink: Box<dyn DestinationSink>,
    ) -> Self {
        Self {
            fetcher,
            unpacker,
            sink,
        }
    }

    /// Run every phase for `entry`; the error carries the phase that failed
    pub async fn process(
        &mut self,
        entry: &CatalogEntry,
    ) -> std::result::Result<(), (Phase, ExtractError)> {
        let id = entry.item_id.as_str();

        let bundle = timed(id, Phase::Fetch, self.fetcher.fetch(id, &entry.path)).await?;
        let container =
            timed(id, Phase::UnpackContainer, self.unpacker.extract_container(&bundle)).await?;
        let text_path = timed(
            id,
            Phase::UnpackText,
            self.unpacker.extract_query_source(&bundle, &container),
        )
        .await?;
        let text = timed(id, Phase::Read, load_text(&text_path)).await?;

        let row = DestinationRow::new(entry, &bundle, text);
        timed(id, Phase::Write, self.sink.append(&row)).await
    }
}

/// Catalog to destination extraction run
pub struct Pipeline {
    catalog: Box<dyn CatalogSource>,
    processor: EntryProcessor,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        catalog: Box<dyn CatalogSource>,
        processor: EntryProcessor,
        options: PipelineOptions,
    ) -> Self {
        Self {
            catalog,
            processor,
            options,
        }
    }

    /// Wire up every component from configuration
    ///
    /// Nothing is contacted yet; connections are opened by [`Pipeline::run`].
    pub fn from_config(config: &ExtractConfig) -> Result<Self> {
        config.validate()?;

        let client = build_client(&config.api)?;

        let catalog: Box<dyn CatalogSource> = match config.catalog.kind {
            CatalogKind::Sql => Box::new(SqlCatalog::new(
                &config.catalog.connection,
                config.catalog.table.as_str(),
            )?),
            CatalogKind::Api => Box::new(RestCatalog::new(
                client.clone(),
                config.api.base_url.as_str(),
                config.api.auth.clone(),
            )),
        };

        let fetcher = ArtifactFetcher::new(
            client,
            config.api.base_url.as_str(),
            config.api.auth.clone(),
            config.local_root.clone(),
        )
        .with_progress(config.show_progress);

        let unpacker = ArchiveUnpacker::new(extractor_for(&config.archive));
        let sink = Box::new(PgDestination::new(
            &config.destination.connection,
            config.destination.table.as_str(),
        )?);

        Ok(Self::new(
            catalog,
            EntryProcessor::new(fetcher, unpacker, sink),
            PipelineOptions {
                item_type: config.catalog.item_type,
                on_entry_error: config.on_entry_error,
            },
        ))
    }

    /// Replace the destination content with the queries of every catalog entry
    pub async fn run(&mut self) -> Result<RunSummary> {
        let run_watch = Stopwatch::start();
        let mut summary = RunSummary::default();

        info!(item_type = %self.options.item_type, "Starting extraction run");

        let step = Stopwatch::start();
        self.processor.sink.reset().await?;
        info!(elapsed = %step.elapsed_human(), "Destination reset");

        let local_root = self.processor.fetcher.local_root();
        tokio::fs::create_dir_all(local_root)
            .await
            .map_err(|e| ExtractError::storage(local_root, e))?;

        let outcome = self.process_catalog(&mut summary).await;
        self.catalog.close().await;
        outcome?;

        summary.elapsed = run_watch.elapsed();
        info!(
            entries = summary.entries,
            loaded = summary.loaded,
            skipped = summary.skipped(),
            elapsed = %run_watch.elapsed_human(),
            "Extraction run complete"
        );

        Ok(summary)
    }

    /// Stream the catalog and process each entry
    ///
    /// Leaves the catalog open; the caller closes it on every outcome.
    async fn process_catalog(&mut self, summary: &mut RunSummary) -> Result<()> {
        let step = Stopwatch::start();
        let mut entries = self.catalog.entries(self.options.item_type).await?;
        summary.catalog_elapsed = step.elapsed();
        info!(elapsed = %step.elapsed_human(), "Catalog opened");

        while let Some(entry) = entries.try_next().await? {
            summary.entries += 1;
            info!(item_id = %entry.item_id, path = %entry.path, "Processing report");

            let entry_watch = Stopwatch::start();
            match self.processor.process(&entry).await {
                Ok(()) => {
                    summary.loaded += 1;
                    info!(
                        item_id = %entry.item_id,
                        elapsed = %entry_watch.elapsed_human(),
                        "Report loaded"
                    );
                },
                Err((phase, e)) => match self.options.on_entry_error {
                    EntryErrorPolicy::Skip => {
                        warn!(
                            item_id = %entry.item_id,
                            path = %entry.path,
                            %phase,
                            error = %e,
                            "Skipping report"
                        );
                        summary.failures.push(EntryFailure {
                            item_id: entry.item_id.clone(),
                            path: entry.path.clone(),
                            phase,
                            error: e.to_string(),
                        });
                    },
                    EntryErrorPolicy::Abort => {
                        error!(item_id = %entry.item_id, %phase, error = %e, "Aborting run");
                        return Err(e);
                    },
                },
            }
        }

        Ok(())
    }

    /// Enumerate the catalog without fetching or writing anything
    pub async fn list(&mut self) -> Result<Vec<CatalogEntry>> {
        let step = Stopwatch::start();
        let listed = match self.catalog.entries(self.options.item_type).await {
            Ok(stream) => stream.try_collect::<Vec<CatalogEntry>>().await,
            Err(e) => Err(e),
        };
        self.catalog.close().await;
        let entries = listed?;

        for entry in &entries {
            info!(item_id = %entry.item_id, path = %entry.path, name = %entry.name, "Catalog entry");
        }
        info!(
            count = entries.len(),
            item_type = %self.options.item_type,
            elapsed = %step.elapsed_human(),
            "Catalog listed"
        );

        Ok(entries)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_names() {
        assert_eq!(Phase::Fetch.to_string(), "fetch");
        assert_eq!(Phase::UnpackContainer.to_string(), "unpack container");
        assert_eq!(Phase::UnpackText.to_string(), "unpack text");
    }

    #[test]
    fn test_from_config_rejects_invalid_table() {
        let mut config = ExtractConfig::default();
        config.destination.table = "queries; drop table x".to_string();
        assert!(matches!(Pipeline::from_config(&config), Err(ExtractError::Config(_))));
    }

    #[tokio::test]
    async fn test_run_stops_when_destination_unreachable() {
        let mut config = ExtractConfig::default();
        config.destination.connection = "postgresql://127.0.0.1:1/staging".to_string();
        config.local_root = std::env::temp_dir().join("pbiq-never-created");

        let mut pipeline = Pipeline::from_config(&config).unwrap();
        assert!(matches!(pipeline.run().await, Err(ExtractError::Reset { .. })));
        assert!(!config.local_root.exists());
    }
}
