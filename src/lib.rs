mod downloader;
mod error;

pub use downloader::{
    print_progress, Download, Fetcher, ProgressFn, ProgressTracker, SizePolicy, DEFAULT_BASE_URL,
};
pub use error::DownloadError;
pub use tokio_util::sync::CancellationToken;

#[cfg(feature = "verification")]
pub use downloader::verify::{Checksum, CsType};
#[cfg(feature = "verification")]
pub use error::ChecksumError;

#[cfg(feature = "render_progress")]
pub use downloader::Progress;
