//! Byte-transfer sink handed to download sources.
//!
//! A [`Transfer`] is the handle a resolved source receives when it is asked
//! to fetch actual bytes: it knows where files go, carries the cancellation
//! token network calls must honor, and does the progress accounting.
//! Every downloaded or expected byte flows through its counters and out via
//! the progress callback.

mod error;

pub use error::TransferError;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Read granularity for [`Transfer::save_stream`].
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Callback invoked with `(downloaded_bytes, expected_bytes)` whenever
/// either counter changes.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// A cancellable sink for the bytes of a single download.
pub struct Transfer {
    token: CancellationToken,
    target_dir: PathBuf,
    progress: Option<ProgressFn>,
    downloaded_bytes: AtomicU64,
    expected_bytes: AtomicU64,
}

impl Transfer {
    /// Start building a transfer.
    pub fn builder() -> TransferBuilder {
        TransferBuilder::default()
    }

    /// The cancellation token to attach to any I/O performed on behalf of
    /// this transfer. Cancelling it makes in-flight saves return
    /// [`TransferError::Cancelled`] promptly.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Declare additional expected bytes; cumulative across calls.
    pub fn add_expected_bytes(&self, n: u64) {
        self.expected_bytes.fetch_add(n, Ordering::Relaxed);
        self.report_progress();
    }

    /// Record additional downloaded bytes; cumulative across calls.
    pub fn add_downloaded_bytes(&self, n: u64) {
        self.downloaded_bytes.fetch_add(n, Ordering::Relaxed);
        self.report_progress();
    }

    /// Current `(downloaded, expected)` byte counts.
    pub fn progress(&self) -> (u64, u64) {
        (
            self.downloaded_bytes.load(Ordering::Relaxed),
            self.expected_bytes.load(Ordering::Relaxed),
        )
    }

    fn report_progress(&self) {
        if let Some(progress) = &self.progress {
            let (downloaded, expected) = self.progress();
            progress(downloaded, expected);
        }
    }

    /// Create (truncate) a file under the target directory, creating parent
    /// directories as needed.
    pub async fn create_file(&self, filename: &str) -> Result<tokio::fs::File, TransferError> {
        let path = self.target_path(filename);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(tokio::fs::File::create(&path).await?)
    }

    /// Drain a reader into the named file, counting every byte downloaded.
    pub async fn save_stream(
        &self,
        filename: &str,
        stream: impl AsyncRead + Unpin,
    ) -> Result<(), TransferError> {
        let mut file = self.create_file(filename).await?;
        let mut stream = stream;
        let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
        loop {
            let n = tokio::select! {
                read = stream.read(&mut buf) => read?,
                _ = self.token.cancelled() => return Err(TransferError::Cancelled),
            };
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n]).await?;
            self.add_downloaded_bytes(n as u64);
        }
        file.flush().await?;
        debug!(filename, bytes = self.downloaded_bytes.load(Ordering::Relaxed), "stream saved");
        Ok(())
    }

    /// GET the URL and save the response body like
    /// [`save_stream`](Transfer::save_stream). Delegates through
    /// [`save_http_request`](Transfer::save_http_request).
    pub async fn save_url(&self, filename: &str, url: &str) -> Result<(), TransferError> {
        let url = reqwest::Url::parse(url).map_err(|e| TransferError::Request(e.to_string()))?;
        let request = reqwest::Request::new(reqwest::Method::GET, url);
        self.save_http_request(filename, request).await
    }

    /// Execute the request and save the response body like
    /// [`save_stream`](Transfer::save_stream).
    pub async fn save_http_request(
        &self,
        filename: &str,
        request: reqwest::Request,
    ) -> Result<(), TransferError> {
        let client = reqwest::Client::new();
        let response = tokio::select! {
            response = client.execute(request) => {
                response.map_err(|e| TransferError::Request(e.to_string()))?
            }
            _ = self.token.cancelled() => return Err(TransferError::Cancelled),
        };
        let response = response
            .error_for_status()
            .map_err(|e| TransferError::Request(e.to_string()))?;
        if let Some(len) = response.content_length() {
            self.add_expected_bytes(len);
        }

        let mut file = self.create_file(filename).await?;
        let mut body = response.bytes_stream();
        loop {
            let chunk = tokio::select! {
                chunk = body.next() => chunk,
                _ = self.token.cancelled() => return Err(TransferError::Cancelled),
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk.map_err(|e| TransferError::Request(e.to_string()))?;
            file.write_all(&chunk).await?;
            self.add_downloaded_bytes(chunk.len() as u64);
        }
        file.flush().await?;
        debug!(filename, "response saved");
        Ok(())
    }

    fn target_path(&self, filename: &str) -> PathBuf {
        self.target_dir.join(filename)
    }
}

impl std::fmt::Debug for Transfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (downloaded, expected) = self.progress();
        f.debug_struct("Transfer")
            .field("target_dir", &self.target_dir)
            .field("downloaded", &downloaded)
            .field("expected", &expected)
            .finish()
    }
}

/// Builder for [`Transfer`].
#[derive(Default)]
pub struct TransferBuilder {
    token: Option<CancellationToken>,
    target_dir: Option<PathBuf>,
    progress: Option<ProgressFn>,
}

impl TransferBuilder {
    /// Attach a cancellation token; defaults to a fresh, never-cancelled
    /// token.
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Set the directory files are saved under; defaults to `.`.
    pub fn with_target_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.target_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Set the progress callback.
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn build(self) -> Transfer {
        Transfer {
            token: self.token.unwrap_or_default(),
            target_dir: self.target_dir.unwrap_or_else(|| PathBuf::from(".")),
            progress: self.progress,
            downloaded_bytes: AtomicU64::new(0),
            expected_bytes: AtomicU64::new(0),
        }
    }
}
