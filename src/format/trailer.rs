//! The 8200-byte magic trailer at end-of-file: 📦 · index block · 🪄.

use super::{INDEX_BLOCK_SIZE, MAGIC_TRAILER_SIZE, TRAILER_END_MAGIC, TRAILER_START_MAGIC};
use super::index::IndexBlock;
use crate::error::{FlavorError, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Compose a trailer from a packed index block.
pub fn compose(index: &IndexBlock) -> Vec<u8> {
    let mut trailer = Vec::with_capacity(MAGIC_TRAILER_SIZE);
    trailer.extend_from_slice(&TRAILER_START_MAGIC);
    trailer.extend_from_slice(&index.pack());
    trailer.extend_from_slice(&TRAILER_END_MAGIC);
    trailer
}

/// Split a raw trailer into its index-block bytes, checking both bookends.
pub fn split(trailer: &[u8]) -> Result<&[u8]> {
    if trailer.len() != MAGIC_TRAILER_SIZE {
        return Err(FlavorError::InvalidMagic(format!(
            "trailer must be {MAGIC_TRAILER_SIZE} bytes, got {}",
            trailer.len()
        )));
    }
    if trailer[..4] != TRAILER_START_MAGIC {
        return Err(FlavorError::InvalidMagic(
            "missing \u{1F4E6} at trailer start".to_string(),
        ));
    }
    if trailer[MAGIC_TRAILER_SIZE - 4..] != TRAILER_END_MAGIC {
        return Err(FlavorError::InvalidMagic(
            "missing \u{1FA84} at trailer end".to_string(),
        ));
    }
    Ok(&trailer[4..4 + INDEX_BLOCK_SIZE])
}

/// Read the trailer from the last 8200 bytes of an open file.
pub fn read_from(file: &mut File) -> Result<Vec<u8>> {
    let file_size = file.metadata()?.len();
    if file_size < MAGIC_TRAILER_SIZE as u64 {
        return Err(FlavorError::InvalidMagic(format!(
            "file too small for a trailer ({file_size} bytes)"
        )));
    }

    file.seek(SeekFrom::End(-(MAGIC_TRAILER_SIZE as i64)))?;
    let mut trailer = vec![0u8; MAGIC_TRAILER_SIZE];
    file.read_exact(&mut trailer)?;
    Ok(trailer)
}

/// Cheap probe: does this path end in a PSPF magic trailer?
pub fn is_package(path: &Path) -> bool {
    let Ok(mut file) = File::open(path) else {
        return false;
    };
    let Ok(trailer) = read_from(&mut file) else {
        return false;
    };
    split(&trailer).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn compose_split_round_trip() {
        let index = IndexBlock::new();
        let trailer = compose(&index);
        assert_eq!(trailer.len(), MAGIC_TRAILER_SIZE);

        let block = split(&trailer).unwrap();
        let parsed = IndexBlock::unpack(block).unwrap();
        assert!(parsed.verify_checksum(block));
    }

    #[test]
    fn bad_start_magic_is_rejected() {
        let mut trailer = compose(&IndexBlock::new());
        trailer[0] = 0;
        assert!(matches!(
            split(&trailer),
            Err(FlavorError::InvalidMagic(_))
        ));
    }

    #[test]
    fn bad_end_magic_is_rejected() {
        let mut trailer = compose(&IndexBlock::new());
        let last = trailer.len() - 1;
        trailer[last] = 0;
        assert!(split(&trailer).is_err());
    }

    #[test]
    fn probe_detects_trailer_at_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pkg.psp");

        let mut file = File::create(&path).unwrap();
        file.write_all(b"launcher bytes").unwrap();
        file.write_all(&compose(&IndexBlock::new())).unwrap();
        drop(file);

        assert!(is_package(&path));
    }

    #[test]
    fn probe_rejects_plain_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-a-package");
        std::fs::write(&path, vec![0u8; MAGIC_TRAILER_SIZE + 16]).unwrap();
        assert!(!is_package(&path));
    }
}
