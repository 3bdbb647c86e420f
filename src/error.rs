use reqwest::StatusCode;
use thiserror::Error;

#[cfg(feature = "verification")]
#[derive(Debug, Error)]
pub enum ChecksumError {
    #[error("Could not recognize the length of inputted checksum")]
    UnrecognizedSize,
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Unable to parse URL")]
    URLParse,
    #[error("The request returned with HTTP status code {0}")]
    HttpStatus(StatusCode),
    #[error("Download was cancelled")]
    Cancelled,
    #[error("{0}")]
    RequestError(#[from] reqwest_middleware::Error),
    #[error("{0}")]
    ReqwestError(#[from] reqwest::Error),
    #[error("Server declared {declared} bytes but sent {received}")]
    SizeMismatch { declared: u64, received: u64 },
    #[error("Downloaded content does not match the given checksum")]
    InvalidChecksum,
}
