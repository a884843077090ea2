//! Catalog Reader
//!
//! Enumerates report server catalog items of one type. Two sources are
//! supported: the catalog table of the report server database, and the
//! `CatalogItems` listing of the report server REST API.

use crate::config::ApiAuth;
use crate::error::{ExtractError, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnectOptions;
use sqlx::{Connection, PgConnection};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// One catalog row selected by the type filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CatalogEntry {
    pub item_id: String,
    /// Hierarchical catalog path, e.g. `/Sales/Report1`
    pub path: String,
    pub name: String,
}

impl CatalogEntry {
    pub fn new(
        item_id: impl Into<String>,
        path: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            path: path.into(),
            name: name.into(),
        }
    }
}

/// Report server catalog item types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CatalogItemType {
    Folder,
    /// Paginated (Report Builder) report
    Report,
    DataSource,
    ReportPart,
    SharedDataset,
    PowerBiReport,
}

impl CatalogItemType {
    const ALL: [CatalogItemType; 6] = [
        CatalogItemType::Folder,
        CatalogItemType::Report,
        CatalogItemType::DataSource,
        CatalogItemType::ReportPart,
        CatalogItemType::SharedDataset,
        CatalogItemType::PowerBiReport,
    ];

    /// Value of the catalog table's `Type` column
    pub fn code(self) -> i32 {
        match self {
            CatalogItemType::Folder => 1,
            CatalogItemType::Report => 2,
            CatalogItemType::DataSource => 5,
            CatalogItemType::ReportPart => 7,
            CatalogItemType::SharedDataset => 8,
            CatalogItemType::PowerBiReport => 13,
        }
    }

    /// Name used by the REST API `Type` property
    pub fn api_name(self) -> &'static str {
        match self {
            CatalogItemType::Folder => "Folder",
            CatalogItemType::Report => "Report",
            CatalogItemType::DataSource => "DataSource",
            CatalogItemType::ReportPart => "Component",
            CatalogItemType::SharedDataset => "DataSet",
            CatalogItemType::PowerBiReport => "PowerBIReport",
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }
}

impl fmt::Display for CatalogItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.api_name(), self.code())
    }
}

/// Parses either the numeric type code or the API name
impl FromStr for CatalogItemType {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let found = match s.parse::<i32>() {
            Ok(code) => Self::from_code(code),
            Err(_) => Self::ALL
                .into_iter()
                .find(|t| t.api_name().eq_ignore_ascii_case(s)),
        };
        found.ok_or_else(|| ExtractError::config(format!("Unknown catalog item type '{s}'")))
    }
}

pub type CatalogStream<'a> = BoxStream<'a, Result<CatalogEntry>>;

/// Source of catalog entries
///
/// `entries` fails with [`ExtractError::SourceUnavailable`] when the source
/// cannot be reached. Items of the returned stream fail with
/// [`ExtractError::CatalogRead`]; the pipeline treats both as fatal.
#[async_trait]
pub trait CatalogSource: Send {
    async fn entries<'a>(&'a mut self, item_type: CatalogItemType) -> Result<CatalogStream<'a>>;

    /// Release whatever `entries` left open
    async fn close(&mut self) {}
}

// ============================================================================
// SQL catalog
// ============================================================================

/// Reads the report server catalog table over a single connection
pub struct SqlCatalog {
    options: PgConnectOptions,
    statement: String,
    conn: Option<PgConnection>,
}

impl SqlCatalog {
    /// `table` must already be validated (see [`crate::config::validate_table_name`])
    pub fn new(url: &str, table: impl Into<String>) -> Result<Self> {
        let options = url
            .parse::<PgConnectOptions>()
            .map_err(|e| ExtractError::config(format!("Invalid catalog URL: {e}")))?;
        Ok(Self::with_options(options, table))
    }

    pub fn with_options(options: PgConnectOptions, table: impl Into<String>) -> Self {
        let statement = format!(
            r#"SELECT "ItemID"::text AS item_id, "Path" AS path, "Name" AS name FROM {} WHERE "Type" = $1"#,
            table.into()
        );
        Self {
            options,
            statement,
            conn: None,
        }
    }

    pub fn select_statement(&self) -> &str {
        &self.statement
    }
}

#[async_trait]
impl CatalogSource for SqlCatalog {
    async fn entries<'a>(&'a mut self, item_type: CatalogItemType) -> Result<CatalogStream<'a>> {
        let conn = PgConnection::connect_with(&self.options)
            .await
            .map_err(|e| ExtractError::SourceUnavailable(e.to_string()))?;
        let conn = self.conn.insert(conn);

        info!(item_type = %item_type, "Reading report server catalog");

        let rows = sqlx::query_as::<_, CatalogEntry>(&self.statement)
            .bind(item_type.code())
            .fetch(conn)
            .map_err(|e| ExtractError::CatalogRead(e.to_string()));

        Ok(rows.boxed())
    }

    async fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.close().await {
                debug!(error = %e, "Catalog connection did not close cleanly");
            }
        }
    }
}

// ============================================================================
// REST catalog
// ============================================================================

#[derive(Debug, Deserialize)]
struct ODataList {
    value: Vec<ApiCatalogItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiCatalogItem {
    id: String,
    path: String,
    name: String,
}

/// Lists catalog items through `GET <base>/CatalogItems?$filter=Type eq '<type>'`
pub struct RestCatalog {
    client: Client,
    base_url: String,
    auth: ApiAuth,
}

impl RestCatalog {
    pub fn new(client: Client, base_url: impl Into<String>, auth: ApiAuth) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            auth,
        }
    }

    pub fn listing_url(&self) -> String {
        format!("{}/CatalogItems", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl CatalogSource for RestCatalog {
    async fn entries<'a>(&'a mut self, item_type: CatalogItemType) -> Result<CatalogStream<'a>> {
        let url = self.listing_url();
        let filter = format!("Type eq '{}'", item_type.api_name());
        info!(url = %url, filter = %filter, "Listing report server catalog");

        let request = self.client.get(&url).query(&[("$filter", filter.as_str())]);
        let response = self
            .auth
            .apply(request)
            .send()
            .await
            .map_err(|e| ExtractError::SourceUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractError::SourceUnavailable(format!(
                "{url} answered HTTP {status}"
            )));
        }

        let listing: ODataList = response
            .json()
            .await
            .map_err(|e| ExtractError::CatalogRead(e.to_string()))?;
        debug!(items = listing.value.len(), "Catalog listing received");

        let entries = listing
            .value
            .into_iter()
            .map(|item| Ok(CatalogEntry::new(item.id, item.path, item.name)));

        Ok(stream::iter(entries).boxed())
    }
}
