//! Packing, unpacking, and naming of operation chains.
//!
//! A chain is a u64 whose eight little-endian octets each hold one
//! operation tag. Octet 0 runs first on creation. The first zero octet
//! terminates the chain; octets past it are ignored on read and must be
//! zero on write.

use super::{OP_BZIP2, OP_GZIP, OP_TAR, OP_XZ, OP_ZSTD, is_declared, op_name};
use crate::error::{FlavorError, Result};

/// Maximum number of operations in one chain.
pub const MAX_CHAIN_LEN: usize = 8;

/// Pack an operation list into a u64, placing operation *i* into byte *i*.
/// Lists longer than eight are rejected.
pub fn pack(ops: &[u8]) -> Result<u64> {
    if ops.len() > MAX_CHAIN_LEN {
        return Err(FlavorError::Build(format!(
            "operation chain too long: {} > {MAX_CHAIN_LEN}",
            ops.len()
        )));
    }

    let mut packed = 0u64;
    for (i, &op) in ops.iter().enumerate() {
        packed |= u64::from(op) << (i * 8);
    }
    Ok(packed)
}

/// Unpack a u64 into its operation list, stopping at the first zero octet.
pub fn unpack(packed: u64) -> Vec<u8> {
    let mut ops = Vec::new();
    for i in 0..MAX_CHAIN_LEN {
        let op = ((packed >> (i * 8)) & 0xFF) as u8;
        if op == 0 {
            break;
        }
        ops.push(op);
    }
    ops
}

/// Validate that every tag in a packed chain is declared by the format.
pub fn validate(packed: u64) -> Result<()> {
    for op in unpack(packed) {
        if !is_declared(op) {
            return Err(FlavorError::UnsupportedOperation(op));
        }
    }
    Ok(())
}

/// Parse a named chain (`"tar.gz"`), an alias (`"tgz"`), or a
/// pipe-separated list (`"tar|gzip"`) into its operation list.
pub fn parse_name(name: &str) -> Result<Vec<u8>> {
    let name = name.trim().to_lowercase();

    match name.as_str() {
        "" | "raw" | "none" => return Ok(vec![]),
        "tar" => return Ok(vec![OP_TAR]),
        "gzip" | "gz" => return Ok(vec![OP_GZIP]),
        "bzip2" => return Ok(vec![OP_BZIP2]),
        "xz" => return Ok(vec![OP_XZ]),
        "zstd" => return Ok(vec![OP_ZSTD]),
        "tar.gz" | "tgz" => return Ok(vec![OP_TAR, OP_GZIP]),
        "tar.bz2" | "tbz2" => return Ok(vec![OP_TAR, OP_BZIP2]),
        "tar.xz" | "txz" => return Ok(vec![OP_TAR, OP_XZ]),
        "tar.zst" => return Ok(vec![OP_TAR, OP_ZSTD]),
        _ => {}
    }

    if name.contains('|') {
        let mut ops = Vec::new();
        for part in name.split('|') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            match part {
                "tar" => ops.push(OP_TAR),
                "gzip" | "gz" => ops.push(OP_GZIP),
                "bzip2" => ops.push(OP_BZIP2),
                "xz" => ops.push(OP_XZ),
                "zstd" => ops.push(OP_ZSTD),
                other => {
                    return Err(FlavorError::Build(format!(
                        "unknown operation '{other}' in chain '{name}'"
                    )));
                }
            }
        }
        return Ok(ops);
    }

    Err(FlavorError::Build(format!("unknown operation chain '{name}'")))
}

/// Canonical display name for a packed chain.
pub fn display(packed: u64) -> String {
    let ops = unpack(packed);
    match ops.as_slice() {
        [] => "raw".to_string(),
        [OP_TAR] => "tar".to_string(),
        [OP_GZIP] => "gzip".to_string(),
        [OP_BZIP2] => "bzip2".to_string(),
        [OP_XZ] => "xz".to_string(),
        [OP_ZSTD] => "zstd".to_string(),
        [OP_TAR, OP_GZIP] => "tar.gz".to_string(),
        [OP_TAR, OP_BZIP2] => "tar.bz2".to_string(),
        [OP_TAR, OP_XZ] => "tar.xz".to_string(),
        [OP_TAR, OP_ZSTD] => "tar.zst".to_string(),
        other => other
            .iter()
            .map(|&op| op_name(op))
            .collect::<Vec<_>>()
            .join("|"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_places_ops_in_ascending_octets() {
        assert_eq!(pack(&[OP_GZIP]).unwrap(), 0x10);
        assert_eq!(pack(&[OP_TAR, OP_GZIP]).unwrap(), 0x1001);
    }

    #[test]
    fn unpack_stops_at_first_zero() {
        assert_eq!(unpack(0x1001), vec![OP_TAR, OP_GZIP]);
        // 0x10 in octet 0, zero in octet 1, garbage beyond is ignored
        assert_eq!(unpack(0x13_00_10), vec![OP_GZIP]);
        assert!(unpack(0).is_empty());
    }

    #[test]
    fn pack_unpack_round_trips_interior_nonzero_lists() {
        let cases: [&[u8]; 4] = [
            &[],
            &[OP_GZIP],
            &[OP_TAR, OP_GZIP],
            &[1, 2, 3, 4, 5, 6, 7, 8],
        ];
        for ops in cases {
            assert_eq!(unpack(pack(ops).unwrap()), ops);
        }
    }

    #[test]
    fn nine_ops_are_rejected() {
        assert!(pack(&[1; 9]).is_err());
    }

    #[test]
    fn named_chains_parse_to_canonical_lists() {
        assert_eq!(parse_name("raw").unwrap(), Vec::<u8>::new());
        assert_eq!(parse_name("gzip").unwrap(), vec![OP_GZIP]);
        assert_eq!(parse_name("tar.gz").unwrap(), vec![OP_TAR, OP_GZIP]);
        assert_eq!(parse_name("TGZ").unwrap(), vec![OP_TAR, OP_GZIP]);
        assert_eq!(parse_name("tar.zst").unwrap(), vec![OP_TAR, OP_ZSTD]);
        assert_eq!(parse_name("tar|gzip").unwrap(), vec![OP_TAR, OP_GZIP]);
    }

    #[test]
    fn unknown_chain_name_fails() {
        assert!(parse_name("7z").is_err());
        assert!(parse_name("tar|rot13").is_err());
    }

    #[test]
    fn display_prefers_dotted_names() {
        assert_eq!(display(0), "raw");
        assert_eq!(display(pack(&[OP_TAR, OP_GZIP]).unwrap()), "tar.gz");
        assert_eq!(display(pack(&[OP_GZIP, OP_GZIP]).unwrap()), "gzip|gzip");
    }

    #[test]
    fn validate_rejects_undeclared_tags() {
        assert!(validate(pack(&[OP_TAR, OP_GZIP]).unwrap()).is_ok());
        assert!(validate(0x42).is_err());
    }
}
