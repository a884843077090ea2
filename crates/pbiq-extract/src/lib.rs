//! pbiq Extract Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Collects the Power Query (M) source of every Power BI report published
//! on a report server into one relational table.
//!
//! # Overview
//!
//! - **Catalog**: enumerate report items from the catalog table or the REST API
//! - **Fetcher**: download each report into a local bundle
//! - **Unpacker**: pull `DataMashup` out of the report, then `Section1.m`
//!   out of `DataMashup`
//! - **Loader**: read the query text
//! - **Destination**: truncate once, then append one row per report
//! - **Pipeline**: drive the above, one report at a time
//!
//! # Example
//!
//! ```no_run
//! use pbiq_extract::{ExtractConfig, Pipeline};
//!
//! # async fn example() -> pbiq_extract::Result<()> {
//! let config = ExtractConfig::from_env()?;
//! let summary = Pipeline::from_config(&config)?.run().await?;
//! println!("{} of {} reports loaded", summary.loaded, summary.entries);
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod config;
pub mod destination;
pub mod error;
pub mod fetcher;
pub mod layout;
pub mod loader;
pub mod pipeline;
pub mod unpacker;

pub use catalog::{CatalogEntry, CatalogItemType, CatalogSource, RestCatalog, SqlCatalog};
pub use config::{EntryErrorPolicy, ExtractConfig};
pub use destination::{DestinationRow, DestinationSink, PgDestination};
pub use error::{ExtractError, Result, UnpackError};
pub use fetcher::ArtifactFetcher;
pub use layout::LocalArtifactBundle;
pub use loader::{load_text, ExtractedText};
pub use pipeline::{EntryFailure, EntryProcessor, Phase, Pipeline, PipelineOptions, RunSummary};
pub use unpacker::{ArchiveExtractor, ArchiveUnpacker, NativeZip, SevenZip};
