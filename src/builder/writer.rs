//! Final assembly: concatenate launcher, metadata, slot table, and slot
//! data, then seal the file with the magic trailer.

use super::slots::ProcessedSlot;
use crate::error::Result;
use crate::format::index::{CAPABILITY_SIGNED, IndexBlock};
use crate::format::{MAGIC_TRAILER_SIZE, SLOT_DESCRIPTOR_SIZE, align8, trailer};
use crate::metadata::{self, Metadata};
use ed25519_dalek::{SigningKey, VerifyingKey};
use log::{debug, trace};
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

/// Write the complete package. Slot descriptors come in with `offset == 0`
/// and are patched as their data lands in the body.
pub(super) fn assemble(
    output_path: &Path,
    launcher_data: &[u8],
    document: &Metadata,
    signing_key: &SigningKey,
    verifying_key: &VerifyingKey,
    mut slots: Vec<ProcessedSlot>,
) -> Result<()> {
    let mut out = File::create(output_path)?;
    let mut index = IndexBlock::new();

    // 1. launcher prefix
    out.write_all(launcher_data)?;
    index.launcher_size = launcher_data.len() as u64;

    // 2. signed, compressed metadata
    let encoded = metadata::encode(document, signing_key)?;
    index.metadata_offset = out.stream_position()?;
    index.metadata_size = encoded.compressed.len() as u64;
    out.write_all(&encoded.compressed)?;
    debug!(
        "metadata at {:#x}, {} bytes compressed",
        index.metadata_offset, index.metadata_size
    );

    // 3. reserved slot table, 8-byte aligned
    let table_offset = align8(out.stream_position()?);
    let table_size = (slots.len() * SLOT_DESCRIPTOR_SIZE) as u64;
    index.slot_table_offset = table_offset;
    index.slot_table_size = table_size;
    index.slot_count = slots.len() as u32;
    pad_to(&mut out, table_offset)?;
    out.write_all(&vec![0u8; table_size as usize])?;

    // 4. slot data, each aligned, patching descriptor offsets
    for slot in &mut slots {
        if slot.stored.is_empty() {
            trace!("slot {} carries no bytes, offset stays 0", slot.descriptor.id);
            slot.descriptor.offset = 0;
            continue;
        }

        let aligned = align8(out.stream_position()?);
        pad_to(&mut out, aligned)?;
        slot.descriptor.offset = aligned;
        out.write_all(&slot.stored)?;
        trace!(
            "slot {} at {:#x}, {} bytes",
            slot.descriptor.id,
            aligned,
            slot.stored.len()
        );
    }
    let body_end = out.stream_position()?;

    // 5. back-patch the completed slot table
    out.seek(SeekFrom::Start(table_offset))?;
    for slot in &slots {
        out.write_all(&slot.descriptor.pack())?;
    }
    out.seek(SeekFrom::Start(body_end))?;

    // 6. finalize the index and seal with the trailer
    index.package_size = body_end + MAGIC_TRAILER_SIZE as u64;
    index.public_key.copy_from_slice(verifying_key.as_bytes());
    index.metadata_checksum = encoded.checksum;
    index.integrity_signature[..64].copy_from_slice(&encoded.signature);
    index.caps.capabilities = CAPABILITY_SIGNED;
    index.stamp.build_timestamp = build_epoch();

    out.write_all(&trailer::compose(&index))?;
    out.flush()?;
    drop(out);

    make_executable(output_path)?;

    debug!(
        "assembled {} bytes ({} launcher + body + {} trailer)",
        index.package_size,
        index.launcher_size,
        MAGIC_TRAILER_SIZE
    );

    Ok(())
}

fn pad_to(out: &mut File, target: u64) -> Result<()> {
    let current = out.stream_position()?;
    if target > current {
        out.write_all(&vec![0u8; (target - current) as usize])?;
    }
    Ok(())
}

fn build_epoch() -> u64 {
    std::env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or_else(|| chrono::Utc::now().timestamp().max(0) as u64)
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}
