//! Destination Writer
//!
//! The destination table is replaced on every run: one `TRUNCATE` before the
//! first report, then one committed `INSERT` per extracted report. Each
//! insert uses its own connection and transaction, so a crash loses at most
//! the row in flight.

use crate::catalog::CatalogEntry;
use crate::error::{ExtractError, Result};
use crate::layout::LocalArtifactBundle;
use crate::loader::ExtractedText;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnectOptions;
use sqlx::{Connection, PgConnection};
use tracing::{debug, info};

/// Row written for one report
///
/// `loaded_at` and `loaded_by` are filled in by column defaults on the
/// server and are therefore not part of this struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationRow {
    pub item_id: String,
    pub report_name: String,
    pub path: String,
    pub queries: String,
}

impl DestinationRow {
    pub fn new(entry: &CatalogEntry, bundle: &LocalArtifactBundle, text: ExtractedText) -> Self {
        Self {
            item_id: entry.item_id.clone(),
            report_name: entry.name.clone(),
            path: bundle.label.clone(),
            queries: text.content,
        }
    }
}

/// Relational sink for extracted queries
#[async_trait]
pub trait DestinationSink: Send {
    /// Empty the destination table; failure ends the run
    async fn reset(&mut self) -> Result<()>;

    /// Insert and commit one row
    async fn append(&mut self, row: &DestinationRow) -> Result<()>;
}

/// PostgreSQL destination, one short-lived connection per statement
pub struct PgDestination {
    options: PgConnectOptions,
    table: String,
}

impl PgDestination {
    /// `table` must already be validated (see [`crate::config::validate_table_name`])
    pub fn new(url: &str, table: impl Into<String>) -> Result<Self> {
        let options = url
            .parse::<PgConnectOptions>()
            .map_err(|e| ExtractError::config(format!("Invalid destination URL: {e}")))?;
        Ok(Self::with_options(options, table))
    }

    pub fn with_options(options: PgConnectOptions, table: impl Into<String>) -> Self {
        Self {
            options,
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn truncate_statement(&self) -> String {
        format!("TRUNCATE TABLE {}", self.table)
    }

    pub fn insert_statement(&self) -> String {
        format!(
            r#"INSERT INTO {} ("item_id", "report_name", "path", "queries") VALUES ($1, $2, $3, $4)"#,
            self.table
        )
    }

    pub fn create_statement(&self) -> String {
        format!(
            r#"CREATE TABLE IF NOT EXISTS {} (
    item_id     VARCHAR(36)  NOT NULL,
    report_name VARCHAR(512) NOT NULL,
    path        VARCHAR(512) NOT NULL,
    queries     TEXT         NOT NULL,
    loaded_at   TIMESTAMP(0) NOT NULL DEFAULT now(),
    loaded_by   VARCHAR(128) NOT NULL DEFAULT current_user
)"#,
            self.table
        )
    }

    /// Create the destination table when it does not exist yet
    pub async fn create_table(&self) -> Result<()> {
        let mut conn = PgConnection::connect_with(&self.options)
            .await
            .map_err(|e| ExtractError::config(format!("Cannot reach destination: {e}")))?;

        sqlx::query(&self.create_statement())
            .execute(&mut conn)
            .await
            .map_err(|e| ExtractError::config(format!("Cannot create {}: {e}", self.table)))?;

        close(conn).await;
        info!(table = %self.table, "Destination table is ready");
        Ok(())
    }
}

async fn close(conn: PgConnection) {
    if let Err(e) = conn.close().await {
        debug!(error = %e, "Destination connection did not close cleanly");
    }
}

#[async_trait]
impl DestinationSink for PgDestination {
    async fn reset(&mut self) -> Result<()> {
        let reset_error = |source| ExtractError::Reset {
            table: self.table.clone(),
            source,
        };

        let mut conn = PgConnection::connect_with(&self.options).await.map_err(reset_error)?;
        sqlx::query(&self.truncate_statement())
            .execute(&mut conn)
            .await
            .map_err(reset_error)?;
        close(conn).await;

        info!(table = %self.table, "Destination table truncated");
        Ok(())
    }

    async fn append(&mut self, row: &DestinationRow) -> Result<()> {
        let write_error = |source| ExtractError::Write {
            item_id: row.item_id.clone(),
            source,
        };

        let mut conn = PgConnection::connect_with(&self.options).await.map_err(write_error)?;
        let mut tx = conn.begin().await.map_err(write_error)?;

        sqlx::query(&self.insert_statement())
            .bind(&row.item_id)
            .bind(&row.report_name)
            .bind(&row.path)
            .bind(&row.queries)
            .execute(&mut *tx)
            .await
            .map_err(write_error)?;

        tx.commit().await.map_err(write_error)?;
        close(conn).await;

        debug!(item_id = %row.item_id, bytes = row.queries.len(), "Row committed");
        Ok(())
    }
}
