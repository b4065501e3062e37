//! reqwest-backed [`MediaTransfer`]

use super::{
    CHUNK_SIZE, MediaTransfer, ProgressFn, RequestThrottle, TransferReport, remove_partial,
    staging_path,
};
use crate::config::{Config, RetryConfig};
use crate::error::{Error, Result, TransferError};
use crate::retry::download_with_retry;
use futures::StreamExt;
use reqwest::header::{self, HeaderMap, HeaderValue};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP transfer client shared by the scraper and the batch orchestrator
#[derive(Debug)]
pub struct HttpTransfer {
    client: reqwest::Client,
    retry: RetryConfig,
    timeout: Duration,
    throttle: RequestThrottle,
    /// Site root sent as `Referer` for requests to the site's host
    site_root: Option<url::Url>,
}

impl HttpTransfer {
    /// Build a client from the download, retry and site settings
    pub fn new(config: &Config) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.9,zh-TW;q=0.8,zh;q=0.7"),
        );
        headers.insert(header::UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .connect_timeout(CONNECT_TIMEOUT.min(config.download.timeout))
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {e}")))?;

        let site_root = url::Url::parse(&config.site.base_url)
            .ok()
            .and_then(|u| u.join("/").ok());

        Ok(Self {
            client,
            retry: config.retry.clone(),
            timeout: config.download.timeout,
            throttle: RequestThrottle::new(config.download.delay_between_requests),
            site_root,
        })
    }

    /// Fetch a page body as text through the same retry policy and throttle
    pub async fn get_text(&self, url: &str) -> Result<String> {
        let text = download_with_retry(&self.retry, |attempt| self.text_attempt(url, attempt))
            .await?;
        tracing::debug!(url, chars = text.len(), "Fetched page");
        Ok(text)
    }

    async fn text_attempt(&self, url: &str, attempt: u32) -> std::result::Result<String, TransferError> {
        self.throttle.wait().await;
        tracing::debug!(url, attempt, "GET page");

        let request = async {
            let response = self.request(url, false).send().await?;
            let status = response.status().as_u16();
            if status != 200 {
                return Err(TransferError::from_status(status, url));
            }
            Ok(response.text().await?)
        };

        tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| TransferError::Timeout { url: url.to_string() })?
    }

    fn request(&self, url: &str, media: bool) -> reqwest::RequestBuilder {
        let mut builder = self.client.get(url);
        if media {
            builder = builder
                .header(header::ACCEPT, "audio/mpeg,audio/*,*/*")
                .header(header::ACCEPT_ENCODING, "identity");
        }
        if let Some(referer) = self.referer_for(url) {
            builder = builder.header(header::REFERER, referer);
        }
        builder
    }

    fn referer_for(&self, url: &str) -> Option<String> {
        let root = self.site_root.as_ref()?;
        let target = url::Url::parse(url).ok()?;
        (target.host_str() == root.host_str() && target.port_or_known_default() == root.port_or_known_default())
            .then(|| root.to_string())
    }

    /// One attempt: request, status check, stream to the staging file, swap in
    async fn media_attempt(
        &self,
        url: &str,
        dest: &Path,
        on_progress: ProgressFn<'_>,
        total_seen: &std::sync::Mutex<Option<u64>>,
    ) -> std::result::Result<u64, TransferError> {
        self.throttle.wait().await;

        let transfer = async {
            let response = self.request(url, true).send().await?;
            let status = response.status().as_u16();
            if status != 200 {
                return Err(TransferError::from_status(status, url));
            }

            let total = response.content_length();
            if let Ok(mut seen) = total_seen.lock() {
                *seen = total;
            }
            if let Some(total) = total {
                tracing::debug!(url, total, "Starting transfer");
            }

            let io_err = |source: std::io::Error| TransferError::Io {
                path: dest.to_path_buf(),
                source,
            };
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
            let staging = staging_path(dest);
            let mut file = std::fs::File::create(&staging).map_err(io_err)?;

            let mut written: u64 = 0;
            let mut stream = response.bytes_stream();
            while let Some(bytes) = stream.next().await {
                let bytes = bytes?;
                for chunk in bytes.chunks(CHUNK_SIZE) {
                    file.write_all(chunk).map_err(io_err)?;
                    written += chunk.len() as u64;
                    on_progress(written, total);
                }
            }
            file.flush().map_err(io_err)?;
            drop(file);
            std::fs::rename(&staging, dest).map_err(io_err)?;
            Ok(written)
        };

        match tokio::time::timeout(self.timeout, transfer).await {
            Ok(result) => result,
            Err(_) => Err(TransferError::Timeout { url: url.to_string() }),
        }
    }
}

#[async_trait::async_trait]
impl MediaTransfer for HttpTransfer {
    async fn fetch(&self, url: &str, dest: &Path, on_progress: ProgressFn<'_>) -> TransferReport {
        let mut attempts = 0;
        let total_seen = std::sync::Mutex::new(None);

        let result = download_with_retry(&self.retry, |attempt| {
            attempts = attempt;
            self.media_attempt(url, dest, on_progress, &total_seen)
        })
        .await;

        let total = total_seen.lock().ok().and_then(|t| *t);
        match result {
            Ok(bytes) => {
                tracing::info!(url, path = %dest.display(), bytes, attempts, "Transfer complete");
                TransferReport {
                    bytes,
                    total,
                    attempts,
                    error: None,
                }
            }
            Err(e) => {
                remove_partial(&staging_path(dest));
                tracing::error!(url, error = %e, attempts, "Transfer failed");
                TransferReport {
                    bytes: 0,
                    total,
                    attempts,
                    error: Some(e),
                }
            }
        }
    }
}
