use serde::{Deserialize, Serialize};

/// Default maximum part size: 8 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Default number of part uploads allowed in flight at once.
pub const DEFAULT_TASK_LIMIT: usize = 4;

/// Largest part number a multipart upload may use.
pub const MAX_PART_COUNT: u32 = 10_000;

/// Smallest size S3 accepts for every part except the last (5 MiB).
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Longest object key accepted, in UTF-8 bytes.
pub const MAX_OBJECT_KEY_LEN: usize = 1024;

/// Checksum algorithm requested for a session and applied to every part.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChecksumAlgorithm {
    #[default]
    #[serde(rename = "sha256", alias = "SHA256")]
    Sha256,
    #[serde(rename = "crc32", alias = "CRC32")]
    Crc32,
}

impl ChecksumAlgorithm {
    /// Upper-case name as used in S3 request headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => "SHA256",
            Self::Crc32 => "CRC32",
        }
    }
}

impl std::fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_algorithm_serde_names() {
        assert_eq!(
            serde_json::to_string(&ChecksumAlgorithm::Sha256).unwrap(),
            "\"sha256\""
        );
        let parsed: ChecksumAlgorithm = serde_json::from_str("\"CRC32\"").unwrap();
        assert_eq!(parsed, ChecksumAlgorithm::Crc32);
    }

    #[test]
    fn checksum_algorithm_default_is_sha256() {
        assert_eq!(ChecksumAlgorithm::default(), ChecksumAlgorithm::Sha256);
        assert_eq!(ChecksumAlgorithm::Sha256.to_string(), "SHA256");
    }

    #[test]
    fn limits_are_consistent() {
        assert!(DEFAULT_CHUNK_SIZE >= MIN_PART_SIZE);
        assert!(DEFAULT_TASK_LIMIT > 0);
    }
}
