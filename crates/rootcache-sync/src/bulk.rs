//! Zone acquisition by HTTP download of the published zone file.

use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::rr::Record;
use rootcache_zone::{parse_records, ZoneStore};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::{first_usable, Result, SyncError, SyncMethod, ZoneSynchronizer};

/// Published copies of the root zone, tried after any preferred URL.
pub const DEFAULT_BULK_URLS: &[&str] = &["https://www.internic.net/domain/root.zone"];

/// Bulk download settings.
#[derive(Debug, Clone)]
pub struct BulkOptions {
    /// URLs tried after the preferred one, in order.
    pub fallback_urls: Vec<String>,
    /// Timeout for a whole request, body included.
    pub timeout: Duration,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            fallback_urls: DEFAULT_BULK_URLS.iter().map(|s| (*s).to_string()).collect(),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Downloads the root zone file over HTTP(S).
///
/// URLs are tried in order and the first one that yields a usable store
/// wins. Later URLs are not contacted.
#[derive(Debug, Clone)]
pub struct BulkDownloadSynchronizer {
    urls: Vec<Url>,
    client: reqwest::Client,
}

impl BulkDownloadSynchronizer {
    /// Creates a synchronizer that tries `preferred` first, then the fallbacks.
    pub fn new(preferred: Option<&str>, options: BulkOptions) -> Result<Self> {
        let urls = preferred
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .into_iter()
            .chain(options.fallback_urls)
            .map(|s| parse_url(&s))
            .collect::<Result<Vec<_>>>()?;

        if urls.is_empty() {
            return Err(SyncError::config("no zone download URLs configured"));
        }

        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .user_agent(concat!("rootcache/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { urls, client })
    }

    /// Returns the URLs in the order they are tried.
    pub fn urls(&self) -> &[Url] {
        &self.urls
    }

    #[instrument(skip(self, url), fields(url = %url))]
    async fn fetch(&self, url: &Url) -> Result<Vec<Record>> {
        debug!("downloading zone file");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| http_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| http_error(url, e))?;
        let loaded = parse_records(&body);
        if loaded.skipped > 0 {
            warn!(skipped = loaded.skipped, "ignored unparsable zone file lines");
        }
        debug!(records = loaded.records.len(), bytes = body.len(), "downloaded zone file");

        Ok(loaded.records)
    }
}

#[async_trait]
impl ZoneSynchronizer for BulkDownloadSynchronizer {
    fn method(&self) -> SyncMethod {
        SyncMethod::BulkDownload
    }

    async fn download(&self) -> Result<ZoneStore> {
        first_usable(SyncMethod::BulkDownload, &self.urls, |url| self.fetch(url)).await
    }
}

fn parse_url(text: &str) -> Result<Url> {
    let url = Url::parse(text)
        .map_err(|e| SyncError::config(format!("invalid download URL {text:?}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(SyncError::config(format!(
            "download URL {text:?} must use http or https"
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(SyncError::config(format!("download URL {text:?} has no host")));
    }
    Ok(url)
}

fn http_error(url: &Url, error: reqwest::Error) -> SyncError {
    if error.is_timeout() {
        SyncError::Timeout(format!("fetching {url}"))
    } else {
        SyncError::Http(error)
    }
}
