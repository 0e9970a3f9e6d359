//! PSPF/2025 on-disk format primitives.
//!
//! Fixed-size little-endian structures: the 8192-byte index block, the
//! 64-byte slot descriptor, and the 8200-byte magic trailer that wraps the
//! index at end-of-file.

pub mod checksum;
pub mod index;
pub mod slot;
pub mod trailer;

/// Format version constant: `0x2025_0001`.
pub const FORMAT_VERSION: u32 = 0x2025_0001;

/// Size of the index block in bytes.
pub const INDEX_BLOCK_SIZE: usize = 8192;

/// Size of a packed slot descriptor in bytes.
pub const SLOT_DESCRIPTOR_SIZE: usize = 64;

/// Total size of the magic trailer: start magic + index block + end magic.
pub const MAGIC_TRAILER_SIZE: usize = 4 + INDEX_BLOCK_SIZE + 4;

/// Slot data alignment within the package body.
pub const SLOT_ALIGNMENT: u64 = 8;

/// UTF-8 bytes of 📦, opening the magic trailer.
pub const TRAILER_START_MAGIC: [u8; 4] = [0xF0, 0x9F, 0x93, 0xA6];

/// UTF-8 bytes of 🪄, closing the magic trailer (and the file).
pub const TRAILER_END_MAGIC: [u8; 4] = [0xF0, 0x9F, 0xAA, 0x84];

/// Align an offset up to the slot alignment boundary.
pub fn align8(offset: u64) -> u64 {
    (offset + SLOT_ALIGNMENT - 1) & !(SLOT_ALIGNMENT - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align8_rounds_up_to_boundary() {
        assert_eq!(align8(0), 0);
        assert_eq!(align8(1), 8);
        assert_eq!(align8(7), 8);
        assert_eq!(align8(8), 8);
        assert_eq!(align8(9), 16);
        assert_eq!(align8(4096), 4096);
    }

    #[test]
    fn trailer_size_is_8200() {
        assert_eq!(MAGIC_TRAILER_SIZE, 8200);
    }

    #[test]
    fn magic_bytes_are_the_emoji() {
        assert_eq!(std::str::from_utf8(&TRAILER_START_MAGIC).unwrap(), "\u{1F4E6}");
        assert_eq!(std::str::from_utf8(&TRAILER_END_MAGIC).unwrap(), "\u{1FA84}");
    }
}
