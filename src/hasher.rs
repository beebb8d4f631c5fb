//! Content hashing used for file identity

use md5::{Digest, Md5};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::IndexError;

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Computes a stable digest of a file's bytes.
///
/// Two files with equal digests are treated as the same content.
pub trait ContentHasher {
    fn hash_file(&self, path: &Path) -> Result<String, IndexError>;
}

/// Full-content MD5, lowercase hex
#[derive(Debug, Clone, Copy, Default)]
pub struct Md5Hasher;

impl ContentHasher for Md5Hasher {
    fn hash_file(&self, path: &Path) -> Result<String, IndexError> {
        let mut file = File::open(path)
            .map_err(|e| IndexError::hash_error(path.to_path_buf(), e.to_string()))?;
        let mut hasher = Md5::new();
        let mut buffer = vec![0u8; READ_CHUNK_SIZE];
        loop {
            let n = file
                .read(&mut buffer)
                .map_err(|e| IndexError::hash_error(path.to_path_buf(), e.to_string()))?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IndexErrorKind;

    #[test]
    fn test_md5_of_known_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, b"hello").unwrap();

        let hash = Md5Hasher.hash_file(&path).unwrap();
        assert_eq!(hash, "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn test_identical_content_identical_hash() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        let bytes = vec![7u8; READ_CHUNK_SIZE * 2 + 13];
        std::fs::write(&a, &bytes).unwrap();
        std::fs::write(&b, &bytes).unwrap();

        assert_eq!(
            Md5Hasher.hash_file(&a).unwrap(),
            Md5Hasher.hash_file(&b).unwrap()
        );
    }

    #[test]
    fn test_missing_file_is_hash_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Md5Hasher.hash_file(&dir.path().join("missing")).unwrap_err();
        assert_eq!(err.kind, IndexErrorKind::Hash);
    }
}
