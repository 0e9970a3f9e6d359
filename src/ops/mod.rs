//! Operation chain engine.
//!
//! An operation is an 8-bit tag naming one reversible transform over a byte
//! stream. Tags are partitioned by range: `0x00` identity, `0x01..=0x0F`
//! bundle, `0x10..=0x2F` compression, `0x30..=0x4F` encryption (reserved),
//! `0x50..=0xFE` reserved, `0xFF` terminator. Only declared tags may appear
//! in a package; anything else fails with `UnsupportedOperation` instead of
//! being skipped.

pub mod chain;

use crate::error::{FlavorError, Result};
use flate2::Compression;
use flate2::read::GzDecoder;
use std::io::{Cursor, Read, Write};

/// No operation / chain terminator.
pub const OP_NONE: u8 = 0x00;
/// POSIX TAR archive (REQUIRED bundle operation).
pub const OP_TAR: u8 = 0x01;
/// GZIP compression (REQUIRED).
pub const OP_GZIP: u8 = 0x10;
/// BZIP2 compression (recognized, codec not carried).
pub const OP_BZIP2: u8 = 0x13;
/// XZ/LZMA2 compression (recognized, codec not carried).
pub const OP_XZ: u8 = 0x16;
/// Zstandard compression (recognized, codec not carried).
pub const OP_ZSTD: u8 = 0x1B;
/// Explicit chain terminator.
pub const OP_TERMINATOR: u8 = 0xFF;

/// Human-readable name for an operation tag.
pub fn op_name(tag: u8) -> &'static str {
    match tag {
        OP_NONE => "none",
        OP_TAR => "tar",
        OP_GZIP => "gzip",
        OP_BZIP2 => "bzip2",
        OP_XZ => "xz",
        OP_ZSTD => "zstd",
        _ => "unknown",
    }
}

/// True when the tag is declared by the format (even if the codec is not
/// carried by this implementation).
pub fn is_declared(tag: u8) -> bool {
    matches!(tag, OP_NONE | OP_TAR | OP_GZIP | OP_BZIP2 | OP_XZ | OP_ZSTD | OP_TERMINATOR)
}

fn gzip_compress(input: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    // mtime pinned to zero keeps the blob byte-stable across builds
    let mut encoder = flate2::GzBuilder::new()
        .mtime(0)
        .write(&mut out, Compression::default());
    encoder.write_all(input)?;
    encoder.finish()?;
    Ok(out)
}

fn gzip_decompress(input: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(input);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Name of the single entry a byte-wise TAR bundle carries.
const TAR_SINGLE_ENTRY: &str = "data";

fn tar_bundle(input: &[u8]) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(input.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_cksum();
    builder.append_data(&mut header, TAR_SINGLE_ENTRY, input)?;
    builder
        .into_inner()
        .map_err(FlavorError::Io)
}

fn tar_unbundle(input: &[u8]) -> Result<Vec<u8>> {
    let mut archive = tar::Archive::new(Cursor::new(input));
    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.header().entry_type().is_file() {
            let mut out = Vec::new();
            entry.read_to_end(&mut out)?;
            return Ok(out);
        }
    }
    Err(FlavorError::SlotExtractionFailed(
        0,
        "tar bundle contains no regular file entry".to_string(),
    ))
}

/// Apply one operation in the forward (creation) direction.
pub fn apply_one(tag: u8, input: &[u8]) -> Result<Vec<u8>> {
    match tag {
        OP_NONE => Ok(input.to_vec()),
        OP_TAR => tar_bundle(input),
        OP_GZIP => gzip_compress(input),
        other => Err(FlavorError::UnsupportedOperation(other)),
    }
}

/// Invert one operation.
pub fn invert_one(tag: u8, input: &[u8]) -> Result<Vec<u8>> {
    match tag {
        OP_NONE => Ok(input.to_vec()),
        OP_TAR => tar_unbundle(input),
        OP_GZIP => gzip_decompress(input),
        other => Err(FlavorError::UnsupportedOperation(other)),
    }
}

/// Run a chain forward, in ascending octet order.
pub fn apply_chain(input: &[u8], ops: &[u8]) -> Result<Vec<u8>> {
    let mut data = input.to_vec();
    for &op in ops {
        data = apply_one(op, &data)?;
    }
    Ok(data)
}

/// Undo a chain, inverting each operation in descending octet order.
pub fn invert_chain(input: &[u8], ops: &[u8]) -> Result<Vec<u8>> {
    let mut data = input.to_vec();
    for &op in ops.iter().rev() {
        data = invert_one(op, &data)?;
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gzip_round_trip() {
        let input = b"the quick brown fox jumps over the lazy dog".repeat(50);
        let compressed = apply_one(OP_GZIP, &input).unwrap();
        assert!(compressed.len() < input.len());
        assert_eq!(invert_one(OP_GZIP, &compressed).unwrap(), input);
    }

    #[test]
    fn gzip_output_is_deterministic() {
        let input = b"stable bytes".to_vec();
        assert_eq!(
            apply_one(OP_GZIP, &input).unwrap(),
            apply_one(OP_GZIP, &input).unwrap()
        );
    }

    #[test]
    fn tar_gzip_chain_round_trips() {
        let input = b"payload that goes through tar then gzip".to_vec();
        let chain = [OP_TAR, OP_GZIP];
        let stored = apply_chain(&input, &chain).unwrap();
        assert_eq!(invert_chain(&stored, &chain).unwrap(), input);
    }

    #[test]
    fn empty_chain_is_identity() {
        let input = b"raw".to_vec();
        assert_eq!(apply_chain(&input, &[]).unwrap(), input);
        assert_eq!(invert_chain(&input, &[]).unwrap(), input);
    }

    #[test]
    fn recognized_but_uncarried_codecs_fail_cleanly() {
        for tag in [OP_BZIP2, OP_XZ, OP_ZSTD] {
            assert!(is_declared(tag));
            assert!(matches!(
                apply_one(tag, b"x"),
                Err(FlavorError::UnsupportedOperation(t)) if t == tag
            ));
        }
    }

    #[test]
    fn undeclared_tag_fails() {
        assert!(!is_declared(0x42));
        assert!(matches!(
            invert_one(0x42, b"x"),
            Err(FlavorError::UnsupportedOperation(0x42))
        ));
    }
}
