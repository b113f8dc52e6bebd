use crate::error::{ForgeError, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::io::Write;

/// Digest algorithm a provider expects in its upload manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
}

/// Transformation applied to file bytes before hashing (and uploading).
///
/// Firebase hashes the gzip-compressed payload it later receives; Cloudflare
/// hashes raw bytes. Getting this wrong produces silent provider-side
/// mismatches, so it travels with the algorithm as one spec value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preprocess {
    Raw,
    Gzip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashSpec {
    pub algorithm: HashAlgorithm,
    pub preprocess: Preprocess,
}

impl HashSpec {
    pub const CLOUDFLARE: Self = Self {
        algorithm: HashAlgorithm::Sha256,
        preprocess: Preprocess::Raw,
    };

    pub const FIREBASE: Self = Self {
        algorithm: HashAlgorithm::Sha256,
        preprocess: Preprocess::Gzip,
    };
}

/// Gzip-compress a payload at the default level.
pub fn gzip_bytes(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Compute the hex digest of `data` under the given spec.
///
/// Empty content is a packaging error, never hashed: an empty page would
/// silently break the served site.
pub fn content_hash(spec: HashSpec, data: &[u8]) -> Result<String> {
    if data.is_empty() {
        return Err(ForgeError::Validation(
            "cannot hash empty file content".to_string(),
        ));
    }

    let processed;
    let input: &[u8] = match spec.preprocess {
        Preprocess::Raw => data,
        Preprocess::Gzip => {
            processed = gzip_bytes(data)?;
            &processed
        }
    };

    let digest = match spec.algorithm {
        HashAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(input);
            hex::encode(hasher.finalize())
        }
        HashAlgorithm::Sha1 => {
            let mut hasher = Sha1::new();
            hasher.update(input);
            hex::encode(hasher.finalize())
        }
    };

    Ok(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_raw_is_deterministic() {
        let a = content_hash(HashSpec::CLOUDFLARE, b"<h1>Acme</h1>").unwrap();
        let b = content_hash(HashSpec::CLOUDFLARE, b"<h1>Acme</h1>").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn sha1_digest_length() {
        let spec = HashSpec {
            algorithm: HashAlgorithm::Sha1,
            preprocess: Preprocess::Raw,
        };
        let digest = content_hash(spec, b"hello").unwrap();
        assert_eq!(digest.len(), 40);
    }

    #[test]
    fn gzip_preprocessing_changes_the_digest() {
        let raw = content_hash(HashSpec::CLOUDFLARE, b"<h1>Acme</h1>").unwrap();
        let gz = content_hash(HashSpec::FIREBASE, b"<h1>Acme</h1>").unwrap();
        assert_ne!(raw, gz);
    }

    #[test]
    fn empty_content_is_rejected() {
        let err = content_hash(HashSpec::CLOUDFLARE, b"").unwrap_err();
        assert!(matches!(err, ForgeError::Validation(_)));
    }

    #[test]
    fn gzip_roundtrip_is_decompressible() {
        use flate2::read::GzDecoder;
        use std::io::Read;

        let compressed = gzip_bytes(b"<h1>Acme</h1>").unwrap();
        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"<h1>Acme</h1>");
    }
}
