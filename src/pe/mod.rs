//! Windows PE adaptation for polyglot packages.
//!
//! Appending data after a PE image is tolerated by some loaders and rejected
//! by others, depending on how the launcher was linked. Two strategies keep
//! the OS loader happy:
//!
//!  - Rust launchers get their DOS stub expanded to a fixed 0xF0 offset with
//!    all absolute file offsets in the headers patched ([`stub`]).
//!  - Go launchers are left byte-identical and the payload is embedded as an
//!    `RT_RCDATA` resource named `PSPF` after assembly ([`resource`]).

pub mod resource;
pub mod stub;

use log::debug;

/// Launcher family inferred from PE characteristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LauncherFamily {
    /// Minimal DOS stub, `e_lfanew == 0x80`
    Go,
    /// MSVC-style stub, `e_lfanew >= 0xE8`
    Rust,
    /// PE with an unusual stub size
    UnknownPe,
    /// Not a PE image at all (ELF, Mach-O, script, ...)
    NotPe,
}

impl LauncherFamily {
    pub fn name(&self) -> &'static str {
        match self {
            LauncherFamily::Go => "go",
            LauncherFamily::Rust => "rust",
            LauncherFamily::UnknownPe => "unknown-pe",
            LauncherFamily::NotPe => "native",
        }
    }
}

/// Check for the `MZ` signature.
pub fn is_pe(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == b'M' && data[1] == b'Z'
}

/// Read `e_lfanew` and validate the `PE\0\0` signature it points at.
/// The returned offset equals the DOS stub size.
pub fn pe_header_offset(data: &[u8]) -> Option<usize> {
    if data.len() < 0x40 {
        return None;
    }

    let offset = u32::from_le_bytes([data[0x3C], data[0x3D], data[0x3E], data[0x3F]]) as usize;
    if data.len() < offset + 4 || &data[offset..offset + 4] != b"PE\x00\x00" {
        return None;
    }

    Some(offset)
}

/// Classify a launcher binary by its DOS stub size.
pub fn launcher_family(data: &[u8]) -> LauncherFamily {
    if !is_pe(data) {
        return LauncherFamily::NotPe;
    }

    match pe_header_offset(data) {
        Some(0x80) => LauncherFamily::Go,
        Some(offset) if offset >= 0xE8 => LauncherFamily::Rust,
        Some(offset) => {
            debug!("PE launcher with unusual stub size 0x{offset:x}");
            LauncherFamily::UnknownPe
        }
        None => LauncherFamily::UnknownPe,
    }
}

/// Whether the assembler should switch to resource embedding after the
/// normal append pass.
pub fn wants_resource_embedding(data: &[u8]) -> bool {
    matches!(launcher_family(data), LauncherFamily::Go)
}

/// Prepare launcher bytes for trailing-data appends. Rust PE launchers get
/// stub expansion; everything else passes through untouched.
pub fn prepare_launcher(data: Vec<u8>) -> crate::error::Result<Vec<u8>> {
    match launcher_family(&data) {
        LauncherFamily::Rust => {
            if pe_header_offset(&data).is_some_and(|o| o < stub::TARGET_STUB_SIZE) {
                Ok(stub::expand_dos_stub(data)?)
            } else {
                Ok(data)
            }
        }
        _ => Ok(data),
    }
}

#[cfg(test)]
pub(crate) fn synthetic_pe(stub_size: usize) -> Vec<u8> {
    // Minimal PE32+ image: DOS header, stub, PE signature, COFF header,
    // optional header with data directories, one section.
    let opt_header_size = 112 + 16 * 8;
    let mut data = vec![0u8; stub_size + 4 + 20 + opt_header_size + 40 + 512];
    data[0] = b'M';
    data[1] = b'Z';
    data[0x3C..0x40].copy_from_slice(&(stub_size as u32).to_le_bytes());

    let pe = stub_size;
    data[pe..pe + 4].copy_from_slice(b"PE\x00\x00");
    let coff = pe + 4;
    data[coff + 2..coff + 4].copy_from_slice(&1u16.to_le_bytes()); // one section
    data[coff + 16..coff + 18].copy_from_slice(&(opt_header_size as u16).to_le_bytes());

    let opt = coff + 20;
    data[opt..opt + 2].copy_from_slice(&0x20Bu16.to_le_bytes()); // PE32+
    // SizeOfHeaders at opt + 60
    let headers_end = (opt + opt_header_size + 40) as u32;
    data[opt + 60..opt + 64].copy_from_slice(&headers_end.to_le_bytes());

    // Section header: PointerToRawData at +20
    let section = opt + opt_header_size;
    data[section + 8..section + 12].copy_from_slice(&512u32.to_le_bytes()); // VirtualSize
    data[section + 12..section + 16].copy_from_slice(&0x1000u32.to_le_bytes()); // VirtualAddress
    data[section + 20..section + 24].copy_from_slice(&headers_end.to_le_bytes());

    data
}
