use crate::error::{ChecksumError, DownloadError};
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

/// An expected hex digest for a downloaded payload.
pub struct Checksum {
    kind: CsType,
    expected: String,
}

impl Checksum {
    fn new_inner(hash: impl Into<String>, kind: CsType) -> Self {
        Self {
            kind,
            expected: hash.into().to_ascii_lowercase(),
        }
    }
    /// Picks the algorithm from the length of the hex digest.
    pub fn new(hash: impl Into<String>) -> Result<Self, ChecksumError> {
        let hash = hash.into();
        let kind = match hash.len() {
            32 => CsType::MD5,
            40 => CsType::Sha1,
            56 => CsType::Sha224,
            64 => CsType::Sha256,
            96 => CsType::Sha384,
            128 => CsType::Sha512,
            _ => return Err(ChecksumError::UnrecognizedSize),
        };
        Ok(Self::new_inner(hash, kind))
    }
    pub fn kind(&self) -> CsType {
        self.kind
    }
    pub(crate) fn verify(&self, payload: &[u8]) -> Result<(), DownloadError> {
        let actual = self.kind.digest_hex(payload);
        if actual == self.expected {
            Ok(())
        } else {
            log::warn!("Checksum mismatch: expected {}, got {actual}", self.expected);
            Err(DownloadError::InvalidChecksum)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsType {
    MD5,
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl CsType {
    fn digest_hex(self, payload: &[u8]) -> String {
        match self {
            Self::MD5 => format!("{:x}", Md5::digest(payload)),
            Self::Sha1 => format!("{:x}", Sha1::digest(payload)),
            Self::Sha224 => format!("{:x}", Sha224::digest(payload)),
            Self::Sha256 => format!("{:x}", Sha256::digest(payload)),
            Self::Sha384 => format!("{:x}", Sha384::digest(payload)),
            Self::Sha512 => format!("{:x}", Sha512::digest(payload)),
        }
    }
}
