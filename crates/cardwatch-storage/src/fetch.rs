use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_LENGTH, CONTENT_TYPE, REFERER, RETRY_AFTER};
use reqwest::StatusCode;
use thiserror::Error;
use tracing::info_span;
use tracing::Instrument;

/// Image formats the asset store keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    Webp,
}

impl ImageFormat {
    pub fn mime(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
        }
    }

    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let mime = content_type.split(';').next()?.trim().to_ascii_lowercase();
        match mime.as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            "image/gif" => Some(Self::Gif),
            "image/webp" => Some(Self::Webp),
            _ => None,
        }
    }

    /// Identify the format from the leading magic bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [0xFF, 0xD8, 0xFF, ..] => Some(Self::Jpeg),
            [0x89, b'P', b'N', b'G', ..] => Some(Self::Png),
            [b'G', b'I', b'F', b'8', ..] => Some(Self::Gif),
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some(Self::Webp),
            _ => None,
        }
    }
}

/// Bounded exponential retry for transient image-host failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub first_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            first_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `retry` (0-based). A server `Retry-After`
    /// lengthens the wait but never past `max_delay`.
    pub fn delay_before(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        let backoff = self.first_delay.saturating_mul(factor);
        backoff.max(retry_after.unwrap_or_default()).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    /// Sent as `Referer`; image hosts commonly refuse hotlinked requests without it.
    pub referer: Option<String>,
    pub retry: RetryPolicy,
    /// Bodies larger than this are refused.
    pub max_bytes: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            referer: None,
            retry: RetryPolicy::default(),
            max_bytes: 5 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadedImage {
    pub final_url: String,
    /// Canonical MIME type of the detected format.
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("empty body from {url}")]
    Empty { url: String },
    #[error("{url} served {content_type}, not an image")]
    NotAnImage { content_type: String, url: String },
    #[error("{url} is larger than {limit} bytes")]
    TooLarge { url: String, limit: usize },
}

impl FetchError {
    /// Whether another attempt at the same URL might succeed. Wrong or
    /// oversized content is permanent; throttling and host errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request(err) => err.is_timeout() || err.is_connect(),
            Self::HttpStatus { status, .. } => {
                let status = StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_REQUEST);
                status.is_server_error()
                    || status == StatusCode::TOO_MANY_REQUESTS
                    || status == StatusCode::REQUEST_TIMEOUT
            }
            Self::Empty { .. } | Self::NotAnImage { .. } | Self::TooLarge { .. } => false,
        }
    }
}

/// Validate a fetched body as an image. Magic bytes win over the declared
/// content type, which image hosts often get wrong.
pub fn inspect_image(
    final_url: String,
    declared: Option<&str>,
    bytes: Vec<u8>,
    max_bytes: usize,
) -> Result<DownloadedImage, FetchError> {
    if bytes.is_empty() {
        return Err(FetchError::Empty { url: final_url });
    }
    if bytes.len() > max_bytes {
        return Err(FetchError::TooLarge {
            url: final_url,
            limit: max_bytes,
        });
    }
    let format = ImageFormat::sniff(&bytes).or_else(|| declared.and_then(ImageFormat::from_content_type));
    match format {
        Some(format) => Ok(DownloadedImage {
            final_url,
            content_type: format.mime().to_string(),
            bytes,
        }),
        None => Err(FetchError::NotAnImage {
            content_type: declared.unwrap_or("no content type").to_string(),
            url: final_url,
        }),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: reqwest::header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    header_str(headers, RETRY_AFTER)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
pub trait ImageDownloader: Send + Sync {
    async fn download(&self, url: &str) -> Result<DownloadedImage, FetchError>;
}

/// Sequential image downloader with bounded exponential retry.
#[derive(Debug)]
pub struct HttpImageFetcher {
    client: reqwest::Client,
    referer: Option<String>,
    retry: RetryPolicy,
    max_bytes: usize,
}

impl HttpImageFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            referer: config.referer,
            retry: config.retry,
            max_bytes: config.max_bytes,
        })
    }

    /// One request. On failure also returns any `Retry-After` hint.
    async fn attempt(&self, url: &str) -> Result<DownloadedImage, (FetchError, Option<Duration>)> {
        let mut request = self.client.get(url);
        if let Some(referer) = &self.referer {
            request = request.header(REFERER, referer);
        }
        let resp = request.send().await.map_err(|err| (FetchError::Request(err), None))?;

        let status = resp.status();
        let final_url = resp.url().to_string();
        if !status.is_success() {
            let hint = retry_after(resp.headers());
            return Err((
                FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                },
                hint,
            ));
        }

        let declared_len = header_str(resp.headers(), CONTENT_LENGTH).and_then(|v| v.parse::<usize>().ok());
        if declared_len.is_some_and(|len| len > self.max_bytes) {
            return Err((
                FetchError::TooLarge {
                    url: final_url,
                    limit: self.max_bytes,
                },
                None,
            ));
        }
        let declared = header_str(resp.headers(), CONTENT_TYPE).map(str::to_string);
        let bytes = resp.bytes().await.map_err(|err| (FetchError::Request(err), None))?.to_vec();
        inspect_image(final_url, declared.as_deref(), bytes, self.max_bytes).map_err(|err| (err, None))
    }

    async fn fetch_with_retry(&self, url: &str) -> Result<DownloadedImage, FetchError> {
        let mut retry = 0;
        loop {
            let (err, hint) = match self.attempt(url).await {
                Ok(image) => return Ok(image),
                Err(failure) => failure,
            };
            if !err.is_transient() || retry >= self.retry.max_retries {
                return Err(err);
            }
            let delay = self.retry.delay_before(retry, hint);
            tracing::debug!(retry, delay_ms = delay.as_millis() as u64, error = %err, "retrying image download");
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }
}

#[async_trait]
impl ImageDownloader for HttpImageFetcher {
    async fn download(&self, url: &str) -> Result<DownloadedImage, FetchError> {
        let span = info_span!("image_fetch", url);
        self.fetch_with_retry(url).instrument(span).await
    }
}
