//! Slot extraction into the per-process scratch directory.
//!
//! Every slot lands under `tmp/<pid>/` first; nothing touches the shared
//! workenv until the merge step. Archive slots aimed at the workenv root
//! are staged in `slot_<i>_<id>/` directories so the merge can apply
//! slot-ordered precedence; everything else extracts to its target path.

use crate::error::{FlavorError, Result};
use crate::format::slot::Lifecycle;
use crate::metadata::SlotEntry;
use crate::ops::{self, OP_TAR};
use crate::reader::PackageReader;
use log::{debug, info, trace};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// What extraction produced, for the merge and cleanup phases.
#[derive(Debug)]
pub struct ExtractedLayout {
    /// The `tmp/<pid>/` scratch root everything was extracted into
    pub temp_dir: PathBuf,
    /// Workenv-relative paths of slots with `init` lifecycle
    pub init_targets: Vec<PathBuf>,
}

/// True when a slot target resolves to the workenv root itself.
fn targets_workenv_root(target: &str) -> bool {
    matches!(target.trim_end_matches('/'), "" | "{workenv}")
}

/// Strip the `{workenv}` prefix off a target path.
fn relative_target(target: &str) -> PathBuf {
    let stripped = target
        .strip_prefix("{workenv}/")
        .or_else(|| target.strip_prefix("{workenv}"))
        .unwrap_or(target);
    PathBuf::from(stripped.trim_start_matches('/'))
}

/// Extract every materialized slot into `temp_dir`.
pub fn extract_all(reader: &mut PackageReader, temp_dir: &Path) -> Result<ExtractedLayout> {
    let entries: Vec<SlotEntry> = reader.metadata().slots.clone();
    info!("extracting {} slots", entries.len());

    let mut init_targets = Vec::new();

    for (i, entry) in entries.iter().enumerate() {
        if entry.self_ref == Some(true) {
            debug!("slot {i} ('{}') is self-referential, skipping", entry.id);
            continue;
        }

        extract_slot(reader, i, entry, temp_dir)
            .map_err(|e| match e {
                already @ FlavorError::SlotExtractionFailed(..) => already,
                other @ (FlavorError::BadChecksum(..) | FlavorError::UnsupportedOperation(_)) => other,
                other => FlavorError::SlotExtractionFailed(i, other.to_string()),
            })?;

        if Lifecycle::from_name(&entry.lifecycle) == Lifecycle::Init
            && !targets_workenv_root(&entry.target)
        {
            init_targets.push(relative_target(&entry.target));
        }
    }

    Ok(ExtractedLayout {
        temp_dir: temp_dir.to_path_buf(),
        init_targets,
    })
}

/// Extract one slot's materialized content into an arbitrary directory
/// (the CLI `extract INDEX DIR` path). Self-referential slots extract to
/// nothing.
pub fn extract_single(reader: &mut PackageReader, i: usize, dest_dir: &Path) -> Result<()> {
    let entries = reader.metadata().slots.clone();
    let entry = entries
        .get(i)
        .ok_or(FlavorError::MissingSlotReference(i))?;

    if entry.self_ref == Some(true) {
        debug!("slot {i} is self-referential, nothing to extract");
        return Ok(());
    }

    let (descriptor, stored) = reader.read_slot_stored(i)?;
    let op_list = ops::chain::unpack(descriptor.operations);

    if let Some(tar_pos) = op_list.iter().position(|&op| op == OP_TAR) {
        let archive_bytes = ops::invert_chain(&stored, &op_list[tar_pos + 1..])?;
        unpack_archive(&archive_bytes, dest_dir, i)?;
    } else {
        let content = ops::invert_chain(&stored, &op_list)?;
        let dest = dest_dir.join(relative_target(&entry.target));
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&dest, &content)?;
        set_mode(&dest, descriptor.permissions);
    }

    Ok(())
}

fn extract_slot(
    reader: &mut PackageReader,
    i: usize,
    entry: &SlotEntry,
    temp_dir: &Path,
) -> Result<()> {
    let (descriptor, stored) = reader.read_slot_stored(i)?;
    let op_list = ops::chain::unpack(descriptor.operations);
    trace!(
        "slot {i} ('{}'): {} stored bytes, chain {}",
        entry.id,
        stored.len(),
        ops::chain::display(descriptor.operations)
    );

    if let Some(tar_pos) = op_list.iter().position(|&op| op == OP_TAR) {
        // Undo the compression layered on top of the archive, then unpack
        // the archive itself onto the filesystem
        let archive_bytes = ops::invert_chain(&stored, &op_list[tar_pos + 1..])?;

        let dest = if targets_workenv_root(&entry.target) {
            temp_dir.join(format!("slot_{i}_{}", entry.id))
        } else {
            temp_dir.join(relative_target(&entry.target))
        };
        unpack_archive(&archive_bytes, &dest, i)?;
        debug!("slot {i}: archive unpacked into {dest:?}");
    } else {
        let content = ops::invert_chain(&stored, &op_list)?;
        let dest = temp_dir.join(relative_target(&entry.target));

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&dest, &content)?;
        set_mode(&dest, descriptor.permissions);
        debug!("slot {i}: {} bytes written to {dest:?}", content.len());
    }

    Ok(())
}

/// Unpack a tar stream to a directory, honoring entry modes.
fn unpack_archive(bytes: &[u8], dest: &Path, slot_index: usize) -> Result<()> {
    if !looks_like_tar(bytes) {
        return Err(FlavorError::SlotExtractionFailed(
            slot_index,
            "chain declares tar but the data is not a tar archive".to_string(),
        ));
    }

    fs::create_dir_all(dest)?;
    let mut archive = tar::Archive::new(Cursor::new(bytes));
    archive.set_preserve_permissions(true);
    archive
        .unpack(dest)
        .map_err(|e| FlavorError::SlotExtractionFailed(slot_index, e.to_string()))?;
    Ok(())
}

/// Tar archives carry "ustar" at offset 257.
fn looks_like_tar(data: &[u8]) -> bool {
    data.len() > 262 && &data[257..262] == b"ustar"
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u16) {
    use std::os::unix::fs::PermissionsExt;
    if mode != 0 {
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(u32::from(mode)));
    }
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u16) {}
