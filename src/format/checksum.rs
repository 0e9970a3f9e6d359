//! Checksum helpers: SHA-256, Adler-32, and the 8-byte little-endian
//! SHA-256 prefix used by slot descriptors.

use sha2::{Digest, Sha256};
use std::io::Read;

const STREAM_BUFFER: usize = 8 * 1024 * 1024;

/// Full SHA-256 digest of a byte slice.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// SHA-256 of a reader, streamed in 8 MB chunks.
pub fn sha256_stream<R: Read>(mut reader: R) -> std::io::Result<[u8; 32]> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; STREAM_BUFFER];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hasher.finalize().into())
}

/// First 8 bytes of a SHA-256 digest as a little-endian u64, the form
/// stored in slot descriptors and name hashes.
pub fn sha256_prefix64(data: &[u8]) -> u64 {
    let digest = sha256(data);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(prefix)
}

/// Adler-32 over a byte slice.
pub fn adler32(data: &[u8]) -> u32 {
    adler::adler32_slice(data)
}

/// Hex rendering of a full SHA-256 digest with the conventional prefix.
pub fn sha256_hex(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(sha256(data)))
}

/// Checksum algorithms that appear in prefixed checksum strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    Sha256,
    Adler32,
}

impl std::fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChecksumAlgorithm::Sha256 => write!(f, "sha256"),
            ChecksumAlgorithm::Adler32 => write!(f, "adler32"),
        }
    }
}

/// Parse a checksum string of the form `algorithm:hex`. Unprefixed values
/// are classified by length (64 hex chars = SHA-256, 8 = Adler-32).
pub fn parse_checksum(value: &str) -> Result<(ChecksumAlgorithm, String), String> {
    if let Some((algo, hex_part)) = value.split_once(':') {
        let algo = match algo {
            "sha256" => ChecksumAlgorithm::Sha256,
            "adler32" => ChecksumAlgorithm::Adler32,
            other => return Err(format!("unknown checksum algorithm '{other}'")),
        };
        return Ok((algo, hex_part.to_string()));
    }

    let algo = match value.len() {
        64 => ChecksumAlgorithm::Sha256,
        8 => ChecksumAlgorithm::Adler32,
        n => return Err(format!("cannot classify {n}-character checksum")),
    };
    Ok((algo, value.to_string()))
}

/// Verify data against a prefixed checksum string.
pub fn verify_checksum(data: &[u8], value: &str) -> Result<bool, String> {
    let (algo, expected) = parse_checksum(value)?;
    let actual = match algo {
        ChecksumAlgorithm::Sha256 => hex::encode(sha256(data)),
        ChecksumAlgorithm::Adler32 => format!("{:08x}", adler32(data)),
    };
    Ok(actual == expected.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_matches_full_digest() {
        let data = b"progressive secure package";
        let full = sha256(data);
        let prefix = sha256_prefix64(data);
        assert_eq!(prefix.to_le_bytes(), full[..8]);
    }

    #[test]
    fn stream_matches_slice() {
        let data = vec![0x5Au8; 100_000];
        let streamed = sha256_stream(&data[..]).unwrap();
        assert_eq!(streamed, sha256(&data));
    }

    #[test]
    fn sha256_hex_carries_prefix() {
        let rendered = sha256_hex(b"");
        assert!(rendered.starts_with("sha256:e3b0c442"));
    }

    #[test]
    fn adler32_known_value() {
        // RFC 1950 example: "Wikipedia" -> 0x11E60398
        assert_eq!(adler32(b"Wikipedia"), 0x11E6_0398);
    }

    #[test]
    fn prefixed_checksums_parse() {
        let (algo, hex_part) = parse_checksum("sha256:00ff").unwrap();
        assert_eq!(algo, ChecksumAlgorithm::Sha256);
        assert_eq!(hex_part, "00ff");

        let (algo, _) = parse_checksum("adler32:0a0b0c0d").unwrap();
        assert_eq!(algo, ChecksumAlgorithm::Adler32);

        assert!(parse_checksum("md5:abcd").is_err());
    }

    #[test]
    fn unprefixed_checksums_classify_by_length() {
        let hex64 = "a".repeat(64);
        assert_eq!(
            parse_checksum(&hex64).unwrap().0,
            ChecksumAlgorithm::Sha256
        );
        assert_eq!(
            parse_checksum("0a0b0c0d").unwrap().0,
            ChecksumAlgorithm::Adler32
        );
        assert!(parse_checksum("abc").is_err());
    }

    #[test]
    fn verify_checksum_round_trip() {
        let data = b"verify me";
        assert!(verify_checksum(data, &sha256_hex(data)).unwrap());
        assert!(!verify_checksum(b"other", &sha256_hex(data)).unwrap());
        assert!(verify_checksum(data, &format!("adler32:{:08x}", adler32(data))).unwrap());
    }
}
