//! Merging the scratch directory into the shared workenv.
//!
//! Staged `slot_<i>_<id>/` directories merge into the workenv root in
//! *descending* slot order, so the lowest-index slot writes last and wins
//! every file-level conflict. Subtrees are never swapped wholesale; the
//! dominant slot wins file by file. Plain entries are renamed into place
//! with a copy fallback for cross-device moves.

use crate::error::{FlavorError, Result};
use log::{debug, trace, warn};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Parse `slot_<i>_<id>` staging names.
fn staged_slot_index(name: &str) -> Option<usize> {
    let rest = name.strip_prefix("slot_")?;
    let (index, _id) = rest.split_once('_')?;
    index.parse().ok()
}

/// Merge everything under `temp_dir` into `workenv`, then rewrite shebangs
/// and remove the scratch tree.
pub fn merge_into_workenv(temp_dir: &Path, workenv: &Path) -> Result<()> {
    fs::create_dir_all(workenv)?;

    let mut staged: Vec<(usize, PathBuf)> = Vec::new();
    let mut plain: Vec<PathBuf> = Vec::new();

    for entry in fs::read_dir(temp_dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        match name.to_str().and_then(staged_slot_index) {
            Some(index) if path.is_dir() => staged.push((index, path)),
            _ => plain.push(path),
        }
    }

    for path in plain {
        let dest = workenv.join(path.file_name().unwrap_or_default());
        move_into_place(&path, &dest)?;
    }

    // Descending order: lower-index slots apply later and overwrite
    staged.sort_by(|a, b| b.0.cmp(&a.0));
    for (index, path) in staged {
        trace!("merging slot {index} staging dir into workenv root");
        merge_tree(&path, workenv)?;
    }

    let bin_dir = workenv.join("bin");
    if bin_dir.is_dir() {
        rewrite_shebangs(&bin_dir, temp_dir, workenv)?;
    }

    if let Err(e) = fs::remove_dir_all(temp_dir) {
        debug!("failed to remove scratch directory {temp_dir:?}: {e}");
    }

    Ok(())
}

/// Rename an entry over its destination, replacing whatever was there.
fn move_into_place(source: &Path, dest: &Path) -> Result<()> {
    if dest.exists() {
        if dest.is_dir() {
            fs::remove_dir_all(dest)?;
        } else {
            fs::remove_file(dest)?;
        }
    }

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    if let Err(e) = fs::rename(source, dest) {
        warn!("rename failed ({e}), falling back to copy");
        if source.is_dir() {
            copy_tree(source, dest)?;
            fs::remove_dir_all(source)?;
        } else {
            fs::copy(source, dest)?;
            fs::remove_file(source)?;
        }
    }
    Ok(())
}

/// Merge `src`'s contents into the directory `dst`, file by file.
fn merge_tree(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());

        if from.is_dir() {
            merge_tree(&from, &to)?;
        } else {
            if to.exists() {
                fs::remove_file(&to)?;
            }
            if fs::rename(&from, &to).is_err() {
                fs::copy(&from, &to)?;
            }
        }
    }
    Ok(())
}

fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        if from.is_dir() {
            copy_tree(&from, &to)?;
        } else {
            fs::copy(&from, &to)?;
        }
    }
    Ok(())
}

/// Rewrite `#!` lines in `bin/` that still reference the scratch prefix.
fn rewrite_shebangs(bin_dir: &Path, old_prefix: &Path, new_prefix: &Path) -> Result<()> {
    let old_prefix = old_prefix.to_string_lossy();
    let new_prefix = new_prefix.to_string_lossy();

    for entry in fs::read_dir(bin_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let mut file = fs::File::open(&path)?;
        let mut head = [0u8; 2];
        if file.read_exact(&mut head).is_err() || &head != b"#!" {
            continue;
        }

        let mut content = Vec::new();
        file = fs::File::open(&path)?;
        file.read_to_end(&mut content)?;
        drop(file);

        let Some(newline) = content.iter().position(|&b| b == b'\n') else {
            continue;
        };

        let first_line = String::from_utf8_lossy(&content[..newline]).into_owned();
        if !first_line.contains(old_prefix.as_ref()) {
            continue;
        }

        let fixed = first_line.replace(old_prefix.as_ref(), new_prefix.as_ref());
        let mode = file_mode(&path);

        let mut rewritten = Vec::with_capacity(content.len());
        rewritten.extend_from_slice(fixed.as_bytes());
        rewritten.extend_from_slice(&content[newline..]);

        let mut out = fs::File::create(&path)?;
        out.write_all(&rewritten)?;
        drop(out);
        restore_mode(&path, mode);

        debug!("rewrote shebang in {:?}", path.file_name().unwrap_or_default());
    }

    Ok(())
}

#[cfg(unix)]
fn file_mode(path: &Path) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path).ok().map(|m| m.permissions().mode())
}

#[cfg(unix)]
fn restore_mode(path: &Path, mode: Option<u32>) {
    use std::os::unix::fs::PermissionsExt;
    if let Some(mode) = mode {
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(mode));
    }
}

#[cfg(not(unix))]
fn file_mode(_path: &Path) -> Option<u32> {
    None
}

#[cfg(not(unix))]
fn restore_mode(_path: &Path, _mode: Option<u32>) {}

/// Write the metadata document sidecar after a successful merge.
pub fn write_metadata_document(
    paths: &crate::workenv::WorkenvPaths,
    metadata: &crate::metadata::Metadata,
) -> Result<()> {
    fs::create_dir_all(paths.package_dir())?;
    let json = serde_json::to_string_pretty(metadata).map_err(FlavorError::Json)?;
    fs::write(paths.metadata_document(), json)?;
    Ok(())
}
