use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::{MediaError, Result};

pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Whole-file digests available for duplicate detection.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha1,
    Blake3,
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Blake3 => "blake3",
        };
        f.write_str(name)
    }
}

/// Streaming content hasher
#[derive(Debug, Clone)]
pub struct HashService {
    algorithm: HashAlgorithm,
    chunk_size: usize,
}

impl HashService {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            algorithm,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Hex digest of the whole file, read in fixed-size chunks.
    pub fn compute_content_hash(&self, file_path: &Path) -> Result<String> {
        let read_failure = |source: std::io::Error| MediaError::HashReadFailure {
            path: file_path.to_string_lossy().to_string(),
            source,
        };

        let file = File::open(file_path).map_err(read_failure)?;
        let reader = BufReader::new(file);

        let digest = match self.algorithm {
            HashAlgorithm::Sha256 => digest_stream(Sha256::new(), reader, self.chunk_size)
                .map(|hasher| format!("{:x}", hasher.finalize())),
            HashAlgorithm::Sha1 => digest_stream(Sha1::new(), reader, self.chunk_size)
                .map(|hasher| format!("{:x}", hasher.finalize())),
            HashAlgorithm::Blake3 => blake3_stream(reader, self.chunk_size),
        };
        digest.map_err(read_failure)
    }
}

impl Default for HashService {
    fn default() -> Self {
        Self::new(HashAlgorithm::default())
    }
}

fn digest_stream<D: Digest, R: Read>(
    mut hasher: D,
    mut reader: R,
    chunk_size: usize,
) -> std::io::Result<D> {
    let mut buffer = vec![0u8; chunk_size];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher)
}

fn blake3_stream<R: Read>(mut reader: R, chunk_size: usize) -> std::io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; chunk_size];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_compute_content_hash() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test.txt");
        fs::write(&file_path, b"Hello, World!").unwrap();

        let hash_service = HashService::default();
        let hash = hash_service.compute_content_hash(&file_path).unwrap();

        assert_eq!(
            hash,
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );
        assert_eq!(hash, hash_service.compute_content_hash(&file_path).unwrap());
    }

    #[test]
    fn test_digest_lengths_per_algorithm() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test.bin");
        fs::write(&file_path, vec![7u8; 20_000]).unwrap();

        let lengths = [
            (HashAlgorithm::Sha256, 64),
            (HashAlgorithm::Sha1, 40),
            (HashAlgorithm::Blake3, 64),
        ];
        for (algorithm, expected_len) in lengths {
            let hash = HashService::new(algorithm)
                .compute_content_hash(&file_path)
                .unwrap();
            assert_eq!(hash.len(), expected_len, "{algorithm}");
            assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn test_chunk_size_does_not_change_digest() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test.bin");
        let content: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&file_path, &content).unwrap();

        for algorithm in [HashAlgorithm::Sha256, HashAlgorithm::Sha1, HashAlgorithm::Blake3] {
            let small = HashService::new(algorithm)
                .with_chunk_size(7)
                .compute_content_hash(&file_path)
                .unwrap();
            let large = HashService::new(algorithm)
                .with_chunk_size(65_536)
                .compute_content_hash(&file_path)
                .unwrap();
            assert_eq!(small, large);
        }
        assert_eq!(
            HashService::new(HashAlgorithm::Blake3)
                .compute_content_hash(&file_path)
                .unwrap(),
            blake3::hash(&content).to_hex().to_string()
        );
    }

    #[test]
    fn test_identical_files_same_hash() {
        let temp_dir = TempDir::new().unwrap();
        let file1 = temp_dir.path().join("file1.txt");
        let file2 = temp_dir.path().join("file2.txt");
        let file3 = temp_dir.path().join("file3.txt");
        fs::write(&file1, b"Identical content").unwrap();
        fs::write(&file2, b"Identical content").unwrap();
        fs::write(&file3, b"Different content").unwrap();

        let hash_service = HashService::default();
        let hash1 = hash_service.compute_content_hash(&file1).unwrap();
        assert_eq!(hash1, hash_service.compute_content_hash(&file2).unwrap());
        assert_ne!(hash1, hash_service.compute_content_hash(&file3).unwrap());
    }

    #[test]
    fn test_missing_file_is_read_failure() {
        let temp_dir = TempDir::new().unwrap();
        let result = HashService::default().compute_content_hash(&temp_dir.path().join("nope"));
        assert!(matches!(result, Err(MediaError::HashReadFailure { .. })));
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!(HashAlgorithm::Sha256.to_string(), "sha256");
        assert_eq!(
            serde_json::to_string(&HashAlgorithm::Blake3).unwrap(),
            "\"blake3\""
        );
    }
}
