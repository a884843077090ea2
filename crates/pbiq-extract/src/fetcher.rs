//! Artifact Fetcher
//!
//! Downloads the binary content of one catalog item into its local bundle.

use crate::config::{ApiAuth, ApiConfig};
use crate::error::{ExtractError, Result};
use crate::layout::LocalArtifactBundle;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Build the HTTP client shared by the fetcher and the REST catalog
pub fn build_client(api: &ApiConfig) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(api.timeout_secs))
        .user_agent(concat!("pbiq-extract/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ExtractError::config(format!("Failed to build HTTP client: {e}")))
}

/// Fetches report content from the report server API
pub struct ArtifactFetcher {
    client: Client,
    base_url: String,
    auth: ApiAuth,
    local_root: PathBuf,
    show_progress: bool,
}

impl ArtifactFetcher {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        auth: ApiAuth,
        local_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            auth,
            local_root: local_root.into(),
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    pub fn content_url(&self, item_id: &str) -> String {
        format!(
            "{}/catalogitems({})/Content/$value",
            self.base_url.trim_end_matches('/'),
            item_id
        )
    }

    /// Download `item_id` into a freshly cleaned bundle for `catalog_path`
    ///
    /// Returns the bundle whose `archive_path` now holds the report bytes.
    pub async fn fetch(&self, item_id: &str, catalog_path: &str) -> Result<LocalArtifactBundle> {
        let bundle = LocalArtifactBundle::derive(&self.local_root, catalog_path)?;
        bundle.prepare().await?;

        let url = self.content_url(item_id);
        debug!(url = %url, "Requesting report content");

        let fetch_error = |reason: String| ExtractError::Fetch {
            item_id: item_id.to_string(),
            reason,
        };

        let response = self
            .auth
            .apply(self.client.get(&url))
            .send()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fetch_error(format!("HTTP {status}")));
        }

        let progress = self.progress_bar(response.content_length(), &bundle.archive_path)?;

        let mut file = tokio::fs::File::create(&bundle.archive_path)
            .await
            .map_err(|e| ExtractError::storage(&bundle.archive_path, e))?;

        let mut written = 0u64;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| fetch_error(e.to_string()))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| ExtractError::storage(&bundle.archive_path, e))?;
            written += chunk.len() as u64;
            progress.set_position(written);
        }

        file.flush()
            .await
            .map_err(|e| ExtractError::storage(&bundle.archive_path, e))?;
        progress.finish_and_clear();

        info!(
            item_id,
            bytes = written,
            archive = %bundle.archive_path.display(),
            "Report downloaded"
        );

        Ok(bundle)
    }

    fn progress_bar(&self, total: Option<u64>, archive: &Path) -> Result<ProgressBar> {
        if !self.show_progress {
            return Ok(ProgressBar::hidden());
        }

        let style = ProgressStyle::default_bar()
            .template("{msg} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes}")
            .map_err(|e| ExtractError::config(format!("Invalid progress template: {e}")))?
            .progress_chars("#>-");

        let bar = ProgressBar::new(total.unwrap_or(0)).with_style(style);
        bar.set_message(
            archive
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );
        Ok(bar)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_content_url_wraps_identifier() {
        let fetcher = ArtifactFetcher::new(
            Client::new(),
            "http://sqlinfobi/ReportsPowerBi/api/v2.0/",
            ApiAuth::None,
            "power_bi_reports",
        );
        assert_eq!(
            fetcher.content_url("6f1c2b1e-0000-4a5b-9c1d-123456789abc"),
            "http://sqlinfobi/ReportsPowerBi/api/v2.0/catalogitems(6f1c2b1e-0000-4a5b-9c1d-123456789abc)/Content/$value"
        );
    }
}
