//! DOS stub expansion for Rust PE launchers.
//!
//! The stub is padded with zeros until `e_lfanew` reaches 0xF0, shifting
//! everything after it forward. Every absolute file offset in the headers
//! must then be adjusted by the same delta: section `PointerToRawData`
//! values, `SizeOfHeaders`, the Certificate Table entry (which stores a
//! file offset, unlike its RVA-based siblings), and each debug-directory
//! entry's `PointerToRawData`. The optional-header checksum is zeroed.

use super::pe_header_offset;
use anyhow::{Context, Result, bail};
use log::{debug, info, trace};

/// Target DOS stub size matching MSVC-linked binaries.
pub const TARGET_STUB_SIZE: usize = 0xF0;

struct PeLayout {
    coff_offset: usize,
    num_sections: usize,
    opt_header_size: usize,
    is_pe32_plus: bool,
}

fn read_u16(data: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([data[off], data[off + 1]])
}

fn read_u32(data: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}

fn write_u32(data: &mut [u8], off: usize, value: u32) {
    data[off..off + 4].copy_from_slice(&value.to_le_bytes());
}

fn layout(data: &[u8]) -> Result<PeLayout> {
    let pe_offset = pe_header_offset(data).context("invalid PE header offset")?;
    let coff_offset = pe_offset + 4;
    if data.len() < coff_offset + 20 {
        bail!("truncated COFF header");
    }

    let magic = read_u16(data, coff_offset + 20);
    Ok(PeLayout {
        coff_offset,
        num_sections: read_u16(data, coff_offset + 2) as usize,
        opt_header_size: read_u16(data, coff_offset + 16) as usize,
        is_pe32_plus: magic == 0x20B,
    })
}

fn section_table_offset(layout: &PeLayout) -> usize {
    layout.coff_offset + 20 + layout.opt_header_size
}

fn data_directory_offset(layout: &PeLayout) -> usize {
    // PE32 data directories start at optional header + 96, PE32+ at + 112
    let base = if layout.is_pe32_plus { 112 } else { 96 };
    layout.coff_offset + 20 + base
}

/// Shift every non-zero section `PointerToRawData` by the padding delta.
fn shift_section_pointers(data: &mut [u8], layout: &PeLayout, delta: u32) {
    let table = section_table_offset(layout);
    let mut updated = 0;

    for i in 0..layout.num_sections {
        let ptr_offset = table + i * 40 + 20;
        if ptr_offset + 4 > data.len() {
            break;
        }
        let current = read_u32(data, ptr_offset);
        if current > 0 {
            write_u32(data, ptr_offset, current + delta);
            trace!("section {i} raw pointer 0x{current:x} -> 0x{:x}", current + delta);
            updated += 1;
        }
    }

    debug!("shifted {updated}/{} section pointers", layout.num_sections);
}

/// `SizeOfHeaders` (optional header + 60) also grows by the delta.
fn shift_size_of_headers(data: &mut [u8], layout: &PeLayout, delta: u32) -> Result<()> {
    let off = layout.coff_offset + 20 + 60;
    if off + 4 > data.len() {
        bail!("SizeOfHeaders field beyond file bounds");
    }
    let current = read_u32(data, off);
    write_u32(data, off, current + delta);
    debug!("SizeOfHeaders 0x{current:x} -> 0x{:x}", current + delta);
    Ok(())
}

/// The Certificate Table (data directory entry 4) stores an absolute file
/// offset. Shift it when it points past the original stub.
fn shift_certificate_table(data: &mut [u8], layout: &PeLayout, delta: u32) {
    let entry = data_directory_offset(layout) + 4 * 8;
    if entry + 8 > data.len() {
        return;
    }

    let cert_offset = read_u32(data, entry);
    if cert_offset >= 0x80 {
        write_u32(data, entry, cert_offset + delta);
        debug!("certificate table offset 0x{cert_offset:x} -> 0x{:x}", cert_offset + delta);
    }
}

/// Zero the optional-header checksum; the loader does not validate it for
/// plain executables.
fn zero_checksum(data: &mut [u8], layout: &PeLayout) {
    let off = layout.coff_offset + 20 + 64;
    if off + 4 <= data.len() {
        write_u32(data, off, 0);
    }
}

/// Map an RVA to a file offset by walking the section table. Must run after
/// the section pointers were shifted so the mapping matches the buffer
/// being patched.
fn rva_to_offset(data: &[u8], layout: &PeLayout, rva: u32) -> Option<usize> {
    let table = section_table_offset(layout);
    for i in 0..layout.num_sections {
        let section = table + i * 40;
        if section + 40 > data.len() {
            return None;
        }
        let virtual_size = read_u32(data, section + 8);
        let virtual_addr = read_u32(data, section + 12);
        let raw_pointer = read_u32(data, section + 20);

        if rva >= virtual_addr && rva < virtual_addr + virtual_size {
            return Some((raw_pointer + (rva - virtual_addr)) as usize);
        }
    }
    None
}

/// Shift each `IMAGE_DEBUG_DIRECTORY.PointerToRawData`. The companion
/// `AddressOfRawData` is an RVA and stays untouched.
fn shift_debug_directory(data: &mut [u8], layout: &PeLayout, delta: u32) {
    let entry = data_directory_offset(layout) + 6 * 8;
    if entry + 8 > data.len() {
        return;
    }

    let dir_rva = read_u32(data, entry);
    let dir_size = read_u32(data, entry + 4);
    if dir_rva == 0 || dir_size == 0 {
        trace!("no debug directory present");
        return;
    }

    let Some(dir_offset) = rva_to_offset(data, layout, dir_rva) else {
        trace!("debug directory RVA 0x{dir_rva:x} not mapped by any section");
        return;
    };

    // IMAGE_DEBUG_DIRECTORY is 28 bytes; PointerToRawData sits at +24
    let entries = dir_size as usize / 28;
    let mut updated = 0;
    for i in 0..entries {
        let ptr_offset = dir_offset + i * 28 + 24;
        if ptr_offset + 4 > data.len() {
            break;
        }
        let current = read_u32(data, ptr_offset);
        if current >= 0x80 {
            write_u32(data, ptr_offset, current + delta);
            updated += 1;
        }
    }

    if updated > 0 {
        debug!("shifted {updated}/{entries} debug directory entries");
    }
}

/// Expand the DOS stub to [`TARGET_STUB_SIZE`] and fix all absolute file
/// offsets in the headers.
pub fn expand_dos_stub(data: Vec<u8>) -> Result<Vec<u8>> {
    if !super::is_pe(&data) {
        bail!("not a Windows PE executable");
    }

    let current_offset = pe_header_offset(&data).context("invalid PE header offset")?;
    if current_offset >= TARGET_STUB_SIZE {
        debug!("DOS stub already 0x{current_offset:x} bytes, no expansion needed");
        return Ok(data);
    }

    let padding = TARGET_STUB_SIZE - current_offset;
    info!(
        "expanding DOS stub 0x{current_offset:x} -> 0x{TARGET_STUB_SIZE:x} (+{padding} bytes)"
    );

    let mut expanded = Vec::with_capacity(data.len() + padding);
    expanded.extend_from_slice(&data[..current_offset]);
    expanded.extend(std::iter::repeat_n(0u8, padding));
    expanded.extend_from_slice(&data[current_offset..]);
    write_u32(&mut expanded, 0x3C, TARGET_STUB_SIZE as u32);

    let layout = layout(&expanded)?;
    let delta = padding as u32;

    shift_section_pointers(&mut expanded, &layout, delta);
    shift_size_of_headers(&mut expanded, &layout, delta)?;
    shift_certificate_table(&mut expanded, &layout, delta);
    shift_debug_directory(&mut expanded, &layout, delta);
    zero_checksum(&mut expanded, &layout);

    let new_offset =
        pe_header_offset(&expanded).context("PE offset unreadable after expansion")?;
    if new_offset != TARGET_STUB_SIZE {
        bail!(
            "stub expansion failed: e_lfanew is 0x{new_offset:x}, expected 0x{TARGET_STUB_SIZE:x}"
        );
    }

    Ok(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pe::synthetic_pe;

    #[test]
    fn expansion_moves_pe_header_to_f0() {
        let original = synthetic_pe(0x80);
        let expanded = expand_dos_stub(original.clone()).unwrap();
        assert_eq!(pe_header_offset(&expanded), Some(TARGET_STUB_SIZE));
        assert_eq!(expanded.len(), original.len() + 0x70);
    }

    #[test]
    fn section_pointers_shift_by_delta() {
        let original = synthetic_pe(0x80);
        let layout_before = layout(&original).unwrap();
        let table = section_table_offset(&layout_before);
        let before = read_u32(&original, table + 20);

        let expanded = expand_dos_stub(original).unwrap();
        let layout_after = layout(&expanded).unwrap();
        let table = section_table_offset(&layout_after);
        assert_eq!(read_u32(&expanded, table + 20), before + 0x70);
    }

    #[test]
    fn size_of_headers_shifts_by_delta() {
        let original = synthetic_pe(0x80);
        let lo = layout(&original).unwrap();
        let before = read_u32(&original, lo.coff_offset + 20 + 60);

        let expanded = expand_dos_stub(original).unwrap();
        let lo = layout(&expanded).unwrap();
        assert_eq!(read_u32(&expanded, lo.coff_offset + 20 + 60), before + 0x70);
    }

    #[test]
    fn adequate_stub_is_left_alone() {
        let original = synthetic_pe(0xF0);
        let result = expand_dos_stub(original.clone()).unwrap();
        assert_eq!(result, original);
    }

    #[test]
    fn non_pe_is_rejected() {
        assert!(expand_dos_stub(b"\x7fELF...".to_vec()).is_err());
    }

    #[test]
    fn stub_padding_is_zeroed() {
        let expanded = expand_dos_stub(synthetic_pe(0x80)).unwrap();
        assert!(expanded[0x80..0xF0].iter().all(|&b| b == 0));
    }
}
