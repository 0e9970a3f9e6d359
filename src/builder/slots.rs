//! Slot processing: load each declared source, run its operation chain,
//! checksum the stored form, and emit the descriptor plus document entry.

use super::BuildOptions;
use crate::error::{FlavorError, Result};
use crate::format::checksum::{sha256_prefix64, sha256_hex};
use crate::format::slot::{Lifecycle, Purpose, SlotDescriptor, DEFAULT_FILE_MODE};
use crate::manifest::{BuildManifest, SlotInput};
use crate::metadata::SlotEntry;
use crate::ops::{self, OP_TAR, chain};
use log::{debug, info, trace};
use std::fs;
use std::path::{Path, PathBuf};

/// A slot ready for the writer: descriptor (offset unpatched), its JSON
/// mirror, and the stored bytes.
#[derive(Debug)]
pub struct ProcessedSlot {
    pub descriptor: SlotDescriptor,
    pub entry: SlotEntry,
    pub stored: Vec<u8>,
}

/// Process every manifest slot in declaration order.
pub(super) fn process_slots(
    manifest: &BuildManifest,
    options: &BuildOptions,
) -> Result<Vec<ProcessedSlot>> {
    let mut processed = Vec::with_capacity(manifest.slots.len());

    for (index, input) in manifest.slots.iter().enumerate() {
        trace!("processing slot {index}: {}", input.id);
        if input.is_self_referential() {
            processed.push(self_referential_slot(index, input));
            continue;
        }
        processed.push(materialized_slot(index, input, options)?);
    }

    debug!("processed {} slots", processed.len());
    Ok(processed)
}

/// A `$SELF` slot carries no bytes; the payload reads the enclosing
/// executable at runtime.
fn self_referential_slot(index: usize, input: &SlotInput) -> ProcessedSlot {
    info!("slot {index} ('{}') is self-referential", input.id);

    let mut descriptor = SlotDescriptor::new(index as u64).with_name(&input.target);
    descriptor.operations = 0;
    descriptor.purpose = Purpose::from_name(&input.purpose) as u8;
    descriptor.lifecycle = Lifecycle::from_name(&input.lifecycle) as u8;
    descriptor.permissions = input.mode_or(DEFAULT_FILE_MODE);

    ProcessedSlot {
        descriptor,
        entry: SlotEntry {
            slot: index,
            id: input.id.clone(),
            source: input.source.clone(),
            target: input.target.clone(),
            size: 0,
            checksum: String::new(),
            operations: "raw".to_string(),
            purpose: input.purpose.clone(),
            lifecycle: input.lifecycle.clone(),
            resolution: input.resolution.clone().or_else(|| Some("runtime".to_string())),
            permissions: Some(format!("{:04o}", input.mode_or(DEFAULT_FILE_MODE))),
            self_ref: Some(true),
        },
        stored: Vec::new(),
    }
}

fn materialized_slot(
    index: usize,
    input: &SlotInput,
    options: &BuildOptions,
) -> Result<ProcessedSlot> {
    let source_path = resolve_source(&input.source, options)?;
    let op_list = chain::parse_name(&input.operations)?;

    let (original, remaining_ops): (Vec<u8>, &[u8]) = if source_path.is_dir() {
        // Directory sources are consumed by the leading bundle operation
        let Some((&first, rest)) = op_list.split_first() else {
            return Err(FlavorError::Build(format!(
                "slot '{}': directory source requires a bundle operation",
                input.id
            )));
        };
        if first != OP_TAR {
            return Err(FlavorError::Build(format!(
                "slot '{}': directory source requires the chain to start with tar",
                input.id
            )));
        }
        (bundle_directory(&source_path)?, rest)
    } else {
        let bytes = fs::read(&source_path).map_err(|e| {
            FlavorError::Build(format!(
                "slot '{}': failed to read '{}': {e}",
                input.id,
                source_path.display()
            ))
        })?;
        (bytes, op_list.as_slice())
    };

    let original_size = original.len() as u64;
    let stored = ops::apply_chain(&original, remaining_ops)?;

    let checksum64 = sha256_prefix64(&stored);
    let checksum_hex = sha256_hex(&stored);
    debug!(
        "slot {index} ('{}'): {} -> {} bytes, chain {}",
        input.id,
        original_size,
        stored.len(),
        chain::display(chain::pack(&op_list)?)
    );

    let mut descriptor = SlotDescriptor::new(index as u64).with_name(&input.target);
    descriptor.size = stored.len() as u64;
    descriptor.original_size = original_size;
    descriptor.operations = chain::pack(&op_list)?;
    descriptor.checksum = checksum64;
    descriptor.purpose = Purpose::from_name(&input.purpose) as u8;
    descriptor.lifecycle = Lifecycle::from_name(&input.lifecycle) as u8;
    descriptor.permissions = input.mode_or(DEFAULT_FILE_MODE);

    Ok(ProcessedSlot {
        descriptor,
        entry: SlotEntry {
            slot: index,
            id: input.id.clone(),
            source: input.source.clone(),
            target: input.target.clone(),
            size: stored.len() as u64,
            checksum: checksum_hex,
            operations: chain::display(descriptor.operations),
            purpose: input.purpose.clone(),
            lifecycle: input.lifecycle.clone(),
            resolution: input.resolution.clone().or_else(|| Some("build".to_string())),
            permissions: Some(format!("{:04o}", input.mode_or(DEFAULT_FILE_MODE))),
            self_ref: None,
        },
        stored,
    })
}

/// Expand `{workenv}` in a slot source against the configured base
/// directory, falling back to `FLAVOR_WORKENV_BASE` and then the current
/// directory.
fn resolve_source(source: &str, options: &BuildOptions) -> Result<PathBuf> {
    if !source.contains("{workenv}") {
        return Ok(PathBuf::from(source));
    }

    let base = if let Some(ref base) = options.workenv_base {
        base.clone()
    } else if let Ok(env_base) = std::env::var("FLAVOR_WORKENV_BASE") {
        PathBuf::from(env_base)
    } else {
        std::env::current_dir()?
    };

    let resolved = source.replace("{workenv}", &base.to_string_lossy());
    trace!("resolved slot source '{source}' -> '{resolved}'");
    Ok(PathBuf::from(resolved))
}

/// Bundle a directory tree into a tar stream, preserving POSIX modes.
fn bundle_directory(dir: &Path) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);
    builder.append_dir_all(".", dir).map_err(|e| {
        FlavorError::Build(format!("failed to bundle '{}': {e}", dir.display()))
    })?;
    builder.into_inner().map_err(FlavorError::Io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::OP_GZIP;
    use std::collections::HashMap;

    fn manifest_with(slots: Vec<SlotInput>) -> BuildManifest {
        BuildManifest {
            package: crate::manifest::ManifestPackage {
                name: "demo".to_string(),
                version: "0.1.0".to_string(),
                description: String::new(),
            },
            execution: crate::manifest::ManifestExecution {
                command: "{workenv}/bin/demo".to_string(),
                environment: HashMap::new(),
            },
            slots,
            runtime: None,
            cache_validation: None,
            workenv: None,
            setup_commands: vec![],
        }
    }

    fn slot(id: &str, source: &str, operations: &str) -> SlotInput {
        SlotInput {
            position: None,
            id: id.to_string(),
            source: source.to_string(),
            target: format!("data/{id}"),
            operations: operations.to_string(),
            purpose: "data".to_string(),
            lifecycle: "runtime".to_string(),
            resolution: None,
            permissions: Some("0644".to_string()),
        }
    }

    #[test]
    fn raw_file_slot_stores_bytes_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("payload.bin");
        fs::write(&file, b"raw payload").unwrap();

        let manifest = manifest_with(vec![slot("payload", file.to_str().unwrap(), "raw")]);
        let processed = process_slots(&manifest, &BuildOptions::default()).unwrap();

        assert_eq!(processed[0].stored, b"raw payload");
        assert_eq!(processed[0].descriptor.original_size, 11);
        assert_eq!(processed[0].descriptor.operations, 0);
        assert_eq!(
            processed[0].descriptor.checksum,
            sha256_prefix64(b"raw payload")
        );
    }

    #[test]
    fn gzip_slot_is_invertible() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("big.txt");
        let content = b"compressible ".repeat(200);
        fs::write(&file, &content).unwrap();

        let manifest = manifest_with(vec![slot("big", file.to_str().unwrap(), "gzip")]);
        let processed = process_slots(&manifest, &BuildOptions::default()).unwrap();

        let stored = &processed[0].stored;
        assert!(stored.len() < content.len());
        assert_eq!(ops::invert_chain(stored, &[OP_GZIP]).unwrap(), content);
        assert_eq!(processed[0].descriptor.original_size, content.len() as u64);
    }

    #[test]
    fn directory_slot_requires_tar_chain() {
        let dir = tempfile::tempdir().unwrap();
        let tree = dir.path().join("tree");
        fs::create_dir_all(&tree).unwrap();
        fs::write(tree.join("file"), b"x").unwrap();

        let manifest = manifest_with(vec![slot("tree", tree.to_str().unwrap(), "gzip")]);
        assert!(process_slots(&manifest, &BuildOptions::default()).is_err());
    }

    #[test]
    fn directory_slot_bundles_through_tar_gz() {
        let dir = tempfile::tempdir().unwrap();
        let tree = dir.path().join("tree");
        fs::create_dir_all(tree.join("bin")).unwrap();
        fs::write(tree.join("bin/run"), b"#!/bin/sh\necho hi\n").unwrap();

        let manifest = manifest_with(vec![slot("tree", tree.to_str().unwrap(), "tar.gz")]);
        let processed = process_slots(&manifest, &BuildOptions::default()).unwrap();

        let descriptor = &processed[0].descriptor;
        assert_eq!(chain::unpack(descriptor.operations), vec![OP_TAR, OP_GZIP]);

        // Stored bytes gunzip back to the tar the original size was taken from
        let tar_bytes = ops::invert_one(OP_GZIP, &processed[0].stored).unwrap();
        assert_eq!(descriptor.original_size, tar_bytes.len() as u64);
    }

    #[test]
    fn self_ref_slot_has_no_bytes() {
        let manifest = manifest_with(vec![slot("me", "$SELF", "raw")]);
        let processed = process_slots(&manifest, &BuildOptions::default()).unwrap();

        assert!(processed[0].stored.is_empty());
        assert_eq!(processed[0].descriptor.size, 0);
        assert_eq!(processed[0].descriptor.operations, 0);
        assert_eq!(processed[0].entry.self_ref, Some(true));
    }
}
