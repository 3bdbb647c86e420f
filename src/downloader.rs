mod progress;
mod session;
#[cfg(feature = "verification")]
pub(crate) mod verify;

pub use progress::{print_progress, ProgressFn, ProgressTracker};
#[cfg(feature = "render_progress")]
pub use progress::Progress;

use crate::error::DownloadError;
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT},
    Url,
};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use session::Session;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_BASE_URL: &str = "http://localhost:5000";
const DEFAULT_ACCEPT: &str = "application/json";
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(6);
const DEFAULT_FALLBACK_CAPACITY: usize = 4096;

/// How a declared `Content-Length` is treated when the body disagrees with it.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SizePolicy {
    /// The declared length only drives progress; short or long bodies are returned as received.
    #[default]
    Advisory,
    /// A body longer or shorter than declared fails with [`DownloadError::SizeMismatch`].
    Strict,
}

/// Streams resources below a base URL into memory, reporting whole-percent progress.
///
/// A `Fetcher` holds configuration only; every call to [`Fetcher::fetch`] or
/// [`Fetcher::download`] owns its own progress state, so concurrent downloads
/// through one `Fetcher` don't interfere.
pub struct Fetcher {
    client: ClientWithMiddleware,
    base: Url,
    accept: HeaderValue,
    observers: Vec<ProgressFn>,
    #[cfg(feature = "render_progress")]
    progress: Option<Progress>,
    fallback_capacity: usize,
    size_policy: SizePolicy,
}

impl Fetcher {
    pub fn new(base: impl AsRef<str>) -> Result<Self, DownloadError> {
        let base = Url::parse(base.as_ref()).map_err(|_| DownloadError::URLParse)?;
        let client = reqwest::ClientBuilder::new().connect_timeout(DEFAULT_CONNECT_TIMEOUT).build()?;
        Ok(Self {
            client: ClientBuilder::new(client).build(),
            base,
            accept: HeaderValue::from_static(DEFAULT_ACCEPT),
            observers: Vec::new(),
            #[cfg(feature = "render_progress")]
            progress: None,
            fallback_capacity: DEFAULT_FALLBACK_CAPACITY,
            size_policy: SizePolicy::default(),
        })
    }
    pub fn with_client(mut self, client: ClientWithMiddleware) -> Self {
        self.client = client;
        self
    }
    pub fn with_accept(mut self, accept: HeaderValue) -> Self {
        self.accept = accept;
        self
    }
    pub fn with_observer(mut self, observer: impl Fn(u8) + Send + Sync + 'static) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }
    /// Draws a fresh bar for every download, all grouped under `progress`'s `MultiProgress`.
    #[cfg(feature = "render_progress")]
    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = Some(progress);
        self
    }
    /// Initial buffer capacity used when the server sends no `Content-Length`.
    pub fn with_fallback_capacity(mut self, capacity: usize) -> Self {
        self.fallback_capacity = capacity;
        self
    }
    pub fn with_size_policy(mut self, policy: SizePolicy) -> Self {
        self.size_policy = policy;
        self
    }

    /// Downloads `path`, resolved against the base URL, into memory.
    ///
    /// Observers receive strictly increasing percentages while the body is
    /// read and a final `100` once it is complete. Nothing is returned if
    /// `cancel` fires before the body ends.
    pub async fn fetch(&self, path: &str, cancel: &CancellationToken) -> Result<Vec<u8>, DownloadError> {
        self.download(Download::new(path).with_cancellation(cancel.clone()))
            .await
    }

    pub async fn download(&self, download: Download) -> Result<Vec<u8>, DownloadError> {
        let url = self.base.join(&download.path).map_err(|_| DownloadError::URLParse)?;
        log::debug!("Requesting {url}");

        let mut request = self.client.get(url.clone()).header(ACCEPT, self.accept.clone());
        if let Some(headers) = download.headers {
            request = request.headers(headers);
        }
        let response = tokio::select! {
            biased;
            _ = download.cancel.cancelled() => {
                log::warn!("Request to {url} cancelled before headers arrived");
                return Err(DownloadError::Cancelled);
            }
            response = request.send() => response?,
        };

        let status = response.status();
        if !status.is_success() {
            log::warn!("{url} returned {status}");
            return Err(DownloadError::HttpStatus(status));
        }

        let observers = self.session_observers();
        let session = Session::new(
            response.content_length(),
            self.fallback_capacity,
            &observers,
            self.size_policy,
        );
        let payload = session
            .read_to_end(response.bytes_stream(), &download.cancel)
            .await?;

        #[cfg(feature = "verification")]
        if let Some(checksum) = download.checksum {
            checksum.verify(&payload)?;
        }
        log::info!("Downloaded {} bytes from {url}", payload.len());
        Ok(payload)
    }

    fn session_observers(&self) -> Vec<ProgressFn> {
        #[allow(unused_mut)]
        let mut observers = self.observers.clone();
        #[cfg(feature = "render_progress")]
        if let Some(progress) = &self.progress {
            observers.push(progress.observer());
        }
        observers
    }
}

/// A single request for [`Fetcher::download`].
pub struct Download {
    path: String,
    cancel: CancellationToken,
    headers: Option<HeaderMap>,
    #[cfg(feature = "verification")]
    checksum: Option<verify::Checksum>,
}

impl Download {
    /// `path` may be relative to the fetcher's base URL or absolute.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            cancel: CancellationToken::new(),
            headers: None,
            #[cfg(feature = "verification")]
            checksum: None,
        }
    }
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = Some(headers);
        self
    }
    #[cfg(feature = "verification")]
    pub fn with_checksum(mut self, checksum: verify::Checksum) -> Self {
        self.checksum = Some(checksum);
        self
    }
}
