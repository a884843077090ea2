//! Shared fixtures for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use pbiq_extract::catalog::CatalogStream;
use pbiq_extract::{
    ArchiveUnpacker, ArtifactFetcher, CatalogEntry, CatalogItemType, CatalogSource,
    DestinationRow, DestinationSink, EntryErrorPolicy, EntryProcessor, ExtractError, NativeZip,
    Pipeline, PipelineOptions, Result,
};
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use zip::write::SimpleFileOptions;

// ============================================================================
// Report fixtures
// ============================================================================

pub fn zip_bytes(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, contents) in members {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(contents).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// `DataMashup` stream: version, package length, package parts, trailer
pub fn data_mashup(query_source: Option<&str>) -> Vec<u8> {
    let parts = match query_source {
        Some(text) => zip_bytes(&[
            ("[Content_Types].xml", b"<Types/>"),
            ("Config/Package.xml", b"<Package/>"),
            ("Formulas/Section1.m", text.as_bytes()),
        ]),
        None => zip_bytes(&[("[Content_Types].xml", b"<Types/>")]),
    };

    let mut bytes = Vec::new();
    bytes.extend_from_slice(&0u32.to_le_bytes());
    bytes.extend_from_slice(&(parts.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&parts);
    bytes.extend_from_slice(&[0u8; 12]);
    bytes
}

/// A `.pbix` whose `DataMashup` holds `Section1.m` with `query_source`
pub fn pbix_with_queries(query_source: &str) -> Vec<u8> {
    let mashup = data_mashup(Some(query_source));
    zip_bytes(&[
        ("Version", b"1.28"),
        ("DataMashup", mashup.as_slice()),
        ("Report/Layout", b"{}"),
    ])
}

/// A `.pbix` without a `DataMashup` member (live connection report)
pub fn pbix_without_mashup() -> Vec<u8> {
    zip_bytes(&[("Version", b"1.28"), ("Connections", b"{}")])
}

/// A `.pbix` whose `DataMashup` has no `Section1.m`
pub fn pbix_without_query_source() -> Vec<u8> {
    let mashup = data_mashup(None);
    zip_bytes(&[("Version", b"1.28"), ("DataMashup", mashup.as_slice())])
}

pub fn content_path(item_id: &str) -> String {
    format!("/catalogitems({item_id})/Content/$value")
}

// ============================================================================
// Catalog fakes
// ============================================================================

/// Serves a fixed list of rows; an `Err` row yields a catalog read error
#[derive(Clone, Default)]
pub struct InMemoryCatalog {
    rows: Vec<std::result::Result<CatalogEntry, String>>,
    pub opened: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
    pub requested_type: Arc<Mutex<Option<CatalogItemType>>>,
    open_delay: Option<Duration>,
}

impl InMemoryCatalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self {
            rows: entries.into_iter().map(Ok).collect(),
            ..Self::default()
        }
    }

    pub fn with_broken_row(mut self, reason: &str) -> Self {
        self.rows.push(Err(reason.to_string()));
        self
    }

    /// Take `delay` to answer, like a slow catalog query
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = Some(delay);
        self
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogSource for InMemoryCatalog {
    async fn entries<'a>(&'a mut self, item_type: CatalogItemType) -> Result<CatalogStream<'a>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        *self.requested_type.lock().unwrap() = Some(item_type);
        if let Some(delay) = self.open_delay {
            tokio::time::sleep(delay).await;
        }

        let rows = self
            .rows
            .clone()
            .into_iter()
            .map(|row| row.map_err(ExtractError::CatalogRead));
        Ok(stream::iter(rows).boxed())
    }

    async fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Fails to open, as an unreachable catalog database would
#[derive(Clone, Default)]
pub struct UnavailableCatalog {
    pub opened: Arc<AtomicBool>,
    pub closed: Arc<AtomicBool>,
}

#[async_trait]
impl CatalogSource for UnavailableCatalog {
    async fn entries<'a>(&'a mut self, _item_type: CatalogItemType) -> Result<CatalogStream<'a>> {
        self.opened.store(true, Ordering::SeqCst);
        Err(ExtractError::SourceUnavailable("connection refused".to_string()))
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// Destination fake
// ============================================================================

/// Keeps committed rows in memory; `reset` empties them like `TRUNCATE`
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub rows: Arc<Mutex<Vec<DestinationRow>>>,
    pub resets: Arc<AtomicUsize>,
    fail_reset: bool,
    fail_item: Option<String>,
}

impl RecordingSink {
    pub fn failing_reset() -> Self {
        Self {
            fail_reset: true,
            ..Self::default()
        }
    }

    pub fn failing_append_for(item_id: &str) -> Self {
        Self {
            fail_item: Some(item_id.to_string()),
            ..Self::default()
        }
    }

    pub fn rows(&self) -> Vec<DestinationRow> {
        self.rows.lock().unwrap().clone()
    }

    pub fn reset_count(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DestinationSink for RecordingSink {
    async fn reset(&mut self) -> Result<()> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        if self.fail_reset {
            return Err(ExtractError::Reset {
                table: "power_bi_report_queries".to_string(),
                source: sqlx::Error::PoolClosed,
            });
        }
        self.rows.lock().unwrap().clear();
        Ok(())
    }

    async fn append(&mut self, row: &DestinationRow) -> Result<()> {
        if self.fail_item.as_deref() == Some(row.item_id.as_str()) {
            return Err(ExtractError::Write {
                item_id: row.item_id.clone(),
                source: sqlx::Error::Protocol("value too long for type character varying".into()),
            });
        }
        self.rows.lock().unwrap().push(row.clone());
        Ok(())
    }
}

// ============================================================================
// Wiring
// ============================================================================

pub fn pipeline(
    base_url: &str,
    local_root: &Path,
    catalog: impl CatalogSource + 'static,
    sink: RecordingSink,
    on_entry_error: EntryErrorPolicy,
) -> Pipeline {
    let fetcher = ArtifactFetcher::new(
        reqwest::Client::new(),
        base_url,
        pbiq_extract::config::ApiAuth::None,
        local_root,
    );
    let processor =
        EntryProcessor::new(fetcher, ArchiveUnpacker::new(Box::new(NativeZip)), Box::new(sink));

    Pipeline::new(
        Box::new(catalog),
        processor,
        PipelineOptions {
            item_type: CatalogItemType::PowerBiReport,
            on_entry_error,
        },
    )
}
