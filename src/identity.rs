//! Content-addressed document identity.
//!
//! The canonical `document_id` is the lowercase SHA-256 hex digest of the
//! raw drawing bytes — content only, independent of filename or metadata.
//! Identical bytes always resolve to the same id, which is what makes
//! re-ingestion idempotent across the whole pipeline.

use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Bytes per read when hashing from a stream.
const HASH_READ_SIZE: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("source file does not exist: {0}")]
    NotFound(String),
    #[error("failed to read source bytes: {0}")]
    Unreadable(#[from] std::io::Error),
}

/// Compute the canonical document id for a byte slice.
pub fn compute_document_id(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Compute the canonical document id for a file, reading in bounded
/// chunks so large drawings are not pulled into memory at once.
pub fn compute_document_id_from_path(path: &Path) -> Result<String, IdentityError> {
    if !path.is_file() {
        return Err(IdentityError::NotFound(path.display().to_string()));
    }

    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_READ_SIZE];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let a = compute_document_id(b"drawing bytes");
        let b = compute_document_id(b"drawing bytes");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_one_bit_difference_changes_id() {
        let a = compute_document_id(&[0b0000_0000]);
        let b = compute_document_id(&[0b0000_0001]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_content_only_ignores_context() {
        // Same bytes written to different "files" (paths don't matter).
        let a = compute_document_id(b"same content");
        let b = compute_document_id(b"same content");
        assert_eq!(a, b);
    }

    #[test]
    fn test_path_and_slice_agree() {
        let tmp = std::env::temp_dir().join("cadsentry_identity_test.bin");
        std::fs::write(&tmp, b"stream me").unwrap();
        let from_path = compute_document_id_from_path(&tmp).unwrap();
        let from_slice = compute_document_id(b"stream me");
        std::fs::remove_file(&tmp).ok();
        assert_eq!(from_path, from_slice);
    }

    #[test]
    fn test_missing_file() {
        let err = compute_document_id_from_path(Path::new("/no/such/file.dwg")).unwrap_err();
        assert!(matches!(err, IdentityError::NotFound(_)));
    }
}
