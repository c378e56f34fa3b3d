// src/client.rs

//! HTTP client for keys and artifacts
//!
//! A wrapper around blocking reqwest with retry on transport errors. HTTP
//! error statuses are not retried.

use crate::error::{Error, Result};
use crate::exec::CancelToken;
use crate::hash::sha256_reader;
use reqwest::blocking::{Client, Response};
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for HTTP requests
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum attempts for a failed request
const MAX_RETRIES: u32 = 3;

/// Base delay between attempts
const RETRY_DELAY_MS: u64 = 1000;

/// HTTP client wrapper with retry support
pub struct HttpClient {
    client: Client,
    max_retries: u32,
}

impl HttpClient {
    pub fn new() -> Result<Self> {
        Self::with_timeout(HTTP_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_retries: MAX_RETRIES,
        })
    }

    fn get(&self, url: &str, cancel: &CancelToken) -> Result<Response> {
        let mut attempt = 0;
        loop {
            cancel.check()?;
            attempt += 1;
            match self.client.get(url).send() {
                Ok(response) => {
                    if !response.status().is_success() {
                        return Err(Error::DownloadError(format!(
                            "HTTP {} from {}",
                            response.status(),
                            url
                        )));
                    }
                    return Ok(response);
                }
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(Error::DownloadError(format!(
                            "Failed to fetch {url} after {attempt} attempts: {e}"
                        )));
                    }
                    warn!("Fetch attempt {} for {} failed: {}, retrying...", attempt, url, e);
                    cancel.sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64))?;
                }
            }
        }
    }

    /// Fetch a URL into memory, refusing bodies larger than `limit` bytes
    pub fn fetch_capped(&self, url: &str, limit: u64, cancel: &CancelToken) -> Result<Vec<u8>> {
        debug!("Fetching {} (limit {} bytes)", url, limit);
        let response = self.get(url, cancel)?;

        if let Some(len) = response.content_length() {
            if len > limit {
                return Err(Error::DownloadError(format!(
                    "{url} is {len} bytes, larger than the {limit} byte limit"
                )));
            }
        }

        let mut body = Vec::new();
        response
            .take(limit + 1)
            .read_to_end(&mut body)
            .map_err(|e| Error::DownloadError(format!("Failed to read {url}: {e}")))?;
        if body.len() as u64 > limit {
            return Err(Error::DownloadError(format!(
                "{url} exceeds the {limit} byte limit"
            )));
        }
        Ok(body)
    }

    /// Stream a URL to `dest`, returning the SHA-256 of what was written
    ///
    /// The body goes to a temporary file next to `dest` that is renamed into
    /// place only once complete.
    pub fn download_file(&self, url: &str, dest: &Path, cancel: &CancelToken) -> Result<String> {
        info!("Downloading {} to {}", url, dest.display());
        let parent = dest.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(parent).map_err(|e| {
            Error::IoError(format!("Failed to create directory {}: {e}", parent.display()))
        })?;

        let response = self.get(url, cancel)?;
        let mut temp = tempfile::NamedTempFile::new_in(parent)?;
        let mut tee = HashingReader {
            inner: response,
            sink: temp.as_file_mut(),
        };
        let digest = sha256_reader(&mut tee)
            .map_err(|e| Error::DownloadError(format!("Failed to download {url}: {e}")))?;
        temp.as_file().sync_all()?;
        temp.persist(dest)
            .map_err(|e| Error::IoError(format!("Failed to move download to {}: {}", dest.display(), e)))?;

        debug!("Downloaded {} (sha256 {})", dest.display(), digest);
        Ok(digest)
    }
}

/// Copies everything read from `inner` into `sink`
struct HashingReader<'a, R: Read> {
    inner: R,
    sink: &'a mut fs::File,
}

impl<R: Read> Read for HashingReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.sink.write_all(&buf[..n])?;
        Ok(n)
    }
}
