//! Configuration management
//!
//! All connection strings, paths and tool locations live in [`ExtractConfig`],
//! which is handed to each component when it is built. Values come from the
//! environment (optionally seeded from a `.env` file) with the defaults below.

use crate::catalog::CatalogItemType;
use crate::error::{ExtractError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_CATALOG_URL: &str = "postgresql://localhost/ReportServer";

pub const DEFAULT_CATALOG_TABLE: &str = "\"Catalog\"";

pub const DEFAULT_DESTINATION_URL: &str = "postgresql://localhost/staging";

pub const DEFAULT_DESTINATION_TABLE: &str = "power_bi_report_queries";

pub const DEFAULT_API_BASE_URL: &str = "http://localhost/ReportsPowerBi/api/v2.0";

/// Report downloads can be large, so the request timeout is generous.
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 300;

pub const DEFAULT_LOCAL_ROOT: &str = "power_bi_reports";

pub const DEFAULT_ARCHIVE_TOOL_PATH: &str = "7z";

/// Where the catalog is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CatalogKind {
    /// The report server catalog table
    #[default]
    Sql,
    /// The report server REST API
    Api,
}

impl FromStr for CatalogKind {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sql" | "db" => Ok(CatalogKind::Sql),
            "api" | "rest" => Ok(CatalogKind::Api),
            other => Err(ExtractError::config(format!("Unknown catalog kind '{other}'"))),
        }
    }
}

/// Which archive capability performs the two extraction steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveToolKind {
    /// External 7-Zip process
    #[default]
    SevenZip,
    /// In-process zip reader
    Native,
}

impl FromStr for ArchiveToolKind {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "seven-zip" | "7z" | "7zip" => Ok(ArchiveToolKind::SevenZip),
            "native" | "zip" => Ok(ArchiveToolKind::Native),
            other => Err(ExtractError::config(format!("Unknown archive tool '{other}'"))),
        }
    }
}

/// What the driver does when one report fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntryErrorPolicy {
    /// Log the failure and continue with the next catalog entry
    #[default]
    Skip,
    /// Stop the run on the first failed entry
    Abort,
}

impl FromStr for EntryErrorPolicy {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "skip" | "continue" => Ok(EntryErrorPolicy::Skip),
            "abort" | "stop" => Ok(EntryErrorPolicy::Abort),
            other => Err(ExtractError::config(format!("Unknown entry error policy '{other}'"))),
        }
    }
}

/// Credentials presented to the report server API
/// Serialized for logs only; secrets are never written out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
#[serde(tag = "scheme", rename_all = "lowercase")]
pub enum ApiAuth {
    #[default]
    None,
    Basic {
        username: String,
        #[serde(skip_serializing)]
        password: Option<String>,
    },
    Bearer {
        #[serde(skip_serializing)]
        token: String,
    },
}

impl ApiAuth {
    /// Attach the credentials to an outgoing request
    pub fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            ApiAuth::None => request,
            ApiAuth::Basic { username, password } => request.basic_auth(username, password.as_ref()),
            ApiAuth::Bearer { token } => request.bearer_auth(token),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogConfig {
    pub kind: CatalogKind,
    /// Connection URL of the catalog database
    pub connection: String,
    pub table: String,
    pub item_type: CatalogItemType,
}

#[derive(Debug, Clone, Serialize)]
pub struct DestinationConfig {
    pub connection: String,
    pub table: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub auth: ApiAuth,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveConfig {
    pub tool: ArchiveToolKind,
    pub tool_path: PathBuf,
    /// Per invocation limit; `None` waits for the tool indefinitely
    pub timeout_secs: Option<u64>,
}

/// Complete pipeline configuration
#[derive(Debug, Clone, Serialize)]
pub struct ExtractConfig {
    pub catalog: CatalogConfig,
    pub destination: DestinationConfig,
    pub api: ApiConfig,
    /// Root of the per-report extraction folders
    pub local_root: PathBuf,
    pub archive: ArchiveConfig,
    pub on_entry_error: EntryErrorPolicy,
    pub show_progress: bool,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            catalog: CatalogConfig {
                kind: CatalogKind::Sql,
                connection: DEFAULT_CATALOG_URL.to_string(),
                table: DEFAULT_CATALOG_TABLE.to_string(),
                item_type: CatalogItemType::PowerBiReport,
            },
            destination: DestinationConfig {
                connection: DEFAULT_DESTINATION_URL.to_string(),
                table: DEFAULT_DESTINATION_TABLE.to_string(),
            },
            api: ApiConfig {
                base_url: DEFAULT_API_BASE_URL.to_string(),
                auth: ApiAuth::None,
                timeout_secs: DEFAULT_API_TIMEOUT_SECS,
            },
            local_root: PathBuf::from(DEFAULT_LOCAL_ROOT),
            archive: ArchiveConfig {
                tool: ArchiveToolKind::SevenZip,
                tool_path: PathBuf::from(DEFAULT_ARCHIVE_TOOL_PATH),
                timeout_secs: None,
            },
            on_entry_error: EntryErrorPolicy::Skip,
            show_progress: false,
        }
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ExtractError::config(format!("{key} must be true or false, got '{value}'"))),
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ExtractError::config(format!("{key} must be a number, got '{value}'")))
}

impl ExtractConfig {
    /// Load configuration from `.env` and the process environment
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(kind) = lookup("PBIQ_CATALOG_KIND") {
            config.catalog.kind = kind.parse()?;
        }
        if let Some(url) = lookup("PBIQ_CATALOG_URL") {
            config.catalog.connection = url;
        }
        if let Some(table) = lookup("PBIQ_CATALOG_TABLE") {
            config.catalog.table = table;
        }
        if let Some(item_type) = lookup("PBIQ_CATALOG_ITEM_TYPE") {
            config.catalog.item_type = item_type.parse()?;
        }
        if let Some(url) = lookup("PBIQ_DESTINATION_URL") {
            config.destination.connection = url;
        }
        if let Some(table) = lookup("PBIQ_DESTINATION_TABLE") {
            config.destination.table = table;
        }
        if let Some(url) = lookup("PBIQ_API_BASE_URL") {
            config.api.base_url = url;
        }
        if let Some(secs) = lookup("PBIQ_API_TIMEOUT_SECS") {
            config.api.timeout_secs = parse_number("PBIQ_API_TIMEOUT_SECS", &secs)?;
        }
        config.api.auth = match (
            lookup("PBIQ_API_TOKEN"),
            lookup("PBIQ_API_USERNAME"),
            lookup("PBIQ_API_PASSWORD"),
        ) {
            (Some(token), _, _) => ApiAuth::Bearer { token },
            (None, Some(username), password) => ApiAuth::Basic { username, password },
            (None, None, Some(_)) => {
                return Err(ExtractError::config(
                    "PBIQ_API_PASSWORD is set without PBIQ_API_USERNAME",
                ))
            },
            (None, None, None) => ApiAuth::None,
        };
        if let Some(root) = lookup("PBIQ_LOCAL_ROOT") {
            config.local_root = PathBuf::from(root);
        }
        if let Some(tool) = lookup("PBIQ_ARCHIVE_TOOL") {
            config.archive.tool = tool.parse()?;
        }
        if let Some(path) = lookup("PBIQ_ARCHIVE_TOOL_PATH") {
            config.archive.tool_path = PathBuf::from(path);
        }
        if let Some(secs) = lookup("PBIQ_ARCHIVE_TIMEOUT_SECS") {
            config.archive.timeout_secs = Some(parse_number("PBIQ_ARCHIVE_TIMEOUT_SECS", &secs)?);
        }
        if let Some(policy) = lookup("PBIQ_ON_ENTRY_ERROR") {
            config.on_entry_error = policy.parse()?;
        }
        if let Some(progress) = lookup("PBIQ_PROGRESS") {
            config.show_progress = parse_flag("PBIQ_PROGRESS", &progress)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.catalog.kind == CatalogKind::Sql {
            if self.catalog.connection.trim().is_empty() {
                return Err(ExtractError::config("Catalog connection URL cannot be empty"));
            }
            validate_table_name(&self.catalog.table)?;
        }

        if self.destination.connection.trim().is_empty() {
            return Err(ExtractError::config("Destination connection URL cannot be empty"));
        }
        validate_table_name(&self.destination.table)?;

        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://")
        {
            return Err(ExtractError::config(format!(
                "API base URL must be http(s), got '{}'",
                self.api.base_url
            )));
        }

        if self.api.timeout_secs == 0 {
            return Err(ExtractError::config("API timeout must be greater than 0"));
        }

        if self.archive.timeout_secs == Some(0) {
            return Err(ExtractError::config("Archive tool timeout must be greater than 0"));
        }

        if self.local_root.as_os_str().is_empty() {
            return Err(ExtractError::config("Local root cannot be empty"));
        }

        if self.archive.tool == ArchiveToolKind::SevenZip
            && self.archive.tool_path.as_os_str().is_empty()
        {
            return Err(ExtractError::config("Archive tool path cannot be empty"));
        }

        Ok(())
    }
}

/// Accept `table`, `schema.table` and double-quoted parts such as `"Catalog"`
///
/// Table names are spliced into statements, so anything else is refused.
pub fn validate_table_name(name: &str) -> Result<()> {
    let invalid = || ExtractError::config(format!("'{name}' is not a valid table name"));

    let parts: Vec<&str> = name.split('.').collect();
    if parts.is_empty() || parts.len() > 2 {
        return Err(invalid());
    }

    for part in parts {
        let bare = match part.strip_prefix('"').and_then(|p| p.strip_suffix('"')) {
            Some(quoted) => quoted,
            None => part,
        };
        let mut chars = bare.chars();
        let starts_ok = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        if !starts_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(invalid());
        }
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_vars(vars: &[(&str, &str)]) -> Result<ExtractConfig> {
        let map: HashMap<&str, &str> = vars.iter().copied().collect();
        ExtractConfig::from_lookup(|key| map.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = from_vars(&[]).unwrap();
        assert_eq!(config.catalog.kind, CatalogKind::Sql);
        assert_eq!(config.catalog.item_type, CatalogItemType::PowerBiReport);
        assert_eq!(config.local_root, PathBuf::from("power_bi_reports"));
        assert_eq!(config.archive.tool, ArchiveToolKind::SevenZip);
        assert_eq!(config.on_entry_error, EntryErrorPolicy::Skip);
        assert_eq!(config.api.auth, ApiAuth::None);
    }

    #[test]
    fn test_overrides_from_environment() {
        let config = from_vars(&[
            ("PBIQ_CATALOG_KIND", "api"),
            ("PBIQ_CATALOG_ITEM_TYPE", "2"),
            ("PBIQ_DESTINATION_TABLE", "mdw.report_queries"),
            ("PBIQ_API_BASE_URL", "https://reports.example.com/api/v2.0"),
            ("PBIQ_API_USERNAME", "svc_reports"),
            ("PBIQ_API_PASSWORD", "hunter2"),
            ("PBIQ_LOCAL_ROOT", "/var/lib/pbiq"),
            ("PBIQ_ARCHIVE_TOOL", "native"),
            ("PBIQ_ARCHIVE_TIMEOUT_SECS", "45"),
            ("PBIQ_ON_ENTRY_ERROR", "abort"),
        ])
        .unwrap();

        assert_eq!(config.catalog.kind, CatalogKind::Api);
        assert_eq!(config.catalog.item_type, CatalogItemType::Report);
        assert_eq!(config.destination.table, "mdw.report_queries");
        assert_eq!(
            config.api.auth,
            ApiAuth::Basic {
                username: "svc_reports".into(),
                password: Some("hunter2".into())
            }
        );
        assert_eq!(config.local_root, PathBuf::from("/var/lib/pbiq"));
        assert_eq!(config.archive.tool, ArchiveToolKind::Native);
        assert_eq!(config.archive.timeout_secs, Some(45));
        assert_eq!(config.on_entry_error, EntryErrorPolicy::Abort);
    }

    #[test]
    fn test_token_wins_over_basic_credentials() {
        let config = from_vars(&[("PBIQ_API_TOKEN", "abc"), ("PBIQ_API_USERNAME", "svc")]).unwrap();
        assert_eq!(config.api.auth, ApiAuth::Bearer { token: "abc".into() });
    }

    #[test]
    fn test_password_without_username_is_rejected() {
        assert!(matches!(
            from_vars(&[("PBIQ_API_PASSWORD", "secret")]),
            Err(ExtractError::Config(_))
        ));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(from_vars(&[("PBIQ_API_TIMEOUT_SECS", "soon")]).is_err());
        assert!(from_vars(&[("PBIQ_API_TIMEOUT_SECS", "0")]).is_err());
        assert!(from_vars(&[("PBIQ_ARCHIVE_TIMEOUT_SECS", "0")]).is_err());
        assert!(from_vars(&[("PBIQ_ON_ENTRY_ERROR", "retry")]).is_err());
        assert!(from_vars(&[("PBIQ_API_BASE_URL", "ftp://reports")]).is_err());
        assert!(from_vars(&[("PBIQ_DESTINATION_TABLE", "t; DROP TABLE x")]).is_err());
        assert!(from_vars(&[("PBIQ_DESTINATION_URL", "  ")]).is_err());
    }

    #[test]
    fn test_table_name_validation() {
        assert!(validate_table_name("power_bi_report_queries").is_ok());
        assert!(validate_table_name("mdw.report_queries").is_ok());
        assert!(validate_table_name("\"Catalog\"").is_ok());
        assert!(validate_table_name("dbo.\"Catalog\"").is_ok());

        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("a.b.c").is_err());
        assert!(validate_table_name("1table").is_err());
        assert!(validate_table_name("\"Cat\"alog\"").is_err());
        assert!(validate_table_name("queries'--").is_err());
    }

    #[test]
    fn test_api_auth_is_not_serialized() {
        let config = from_vars(&[("PBIQ_API_TOKEN", "top-secret")]).unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"scheme\":\"bearer\""));
        assert!(!json.contains("top-secret"));
    }

    #[test]
    fn test_progress_flag_values() {
        for on in ["true", "1", "yes", "ON"] {
            assert!(from_vars(&[("PBIQ_PROGRESS", on)]).unwrap().show_progress, "{on}");
        }
        for off in ["false", "0", "no", "Off"] {
            assert!(!from_vars(&[("PBIQ_PROGRESS", off)]).unwrap().show_progress, "{off}");
        }
        assert!(matches!(
            from_vars(&[("PBIQ_PROGRESS", "maybe")]),
            Err(ExtractError::Config(_))
        ));
    }
}
