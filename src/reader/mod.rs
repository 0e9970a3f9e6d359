//! Package reading and verification.
//!
//! Opening a package runs the full §4.7 sequence: locate the trailer
//! (resource section first on Windows, file tail otherwise), parse and
//! check the index block, then verify metadata checksum and integrity
//! signature. Structural failures are always fatal; integrity failures
//! escalate according to the configured validation level.

pub mod verify;

use crate::config::{RuntimeConfig, ValidationLevel};
use crate::error::{ChecksumKind, FlavorError, Result};
use crate::format::checksum::{sha256, sha256_prefix64};
use crate::format::index::IndexBlock;
use crate::format::slot::SlotDescriptor;
use crate::format::{FORMAT_VERSION, MAGIC_TRAILER_SIZE, SLOT_DESCRIPTOR_SIZE, trailer};
use crate::metadata::{self, Metadata};
use crate::ops::{self, chain};
use log::{debug, warn};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// An opened, verified package.
pub struct PackageReader {
    file: File,
    path: PathBuf,
    index: IndexBlock,
    metadata: Metadata,
    metadata_json: Vec<u8>,
    validation: ValidationLevel,
    // Keeps a resource-extracted payload alive for the reader's lifetime
    _resource_spill: Option<tempfile::NamedTempFile>,
}

impl std::fmt::Debug for PackageReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageReader")
            .field("path", &self.path)
            .field("slot_count", &self.index.slot_count)
            .finish()
    }
}

/// Handle an integrity failure according to the validation level.
fn escalate(validation: ValidationLevel, err: FlavorError) -> Result<()> {
    match validation {
        ValidationLevel::Strict => Err(err),
        ValidationLevel::Standard => {
            eprintln!("SECURITY WARNING: {err}");
            eprintln!("continuing with standard validation (set FLAVOR_VALIDATION=strict to enforce)");
            warn!("integrity failure tolerated: {err}");
            Ok(())
        }
        ValidationLevel::Relaxed | ValidationLevel::Minimal => {
            warn!("integrity failure tolerated ({}): {err}", validation.as_str());
            Ok(())
        }
        ValidationLevel::None => Ok(()),
    }
}

impl PackageReader {
    /// Open and verify a package file.
    pub fn open(path: &Path, config: &RuntimeConfig) -> Result<Self> {
        let validation = config.validation;

        // On Windows a Go-launcher package carries its payload in the
        // resource section; spill it to a temp file so everything below
        // can treat it as a regular package tail.
        let (mut file, effective_path, spill) = open_payload(path)?;

        let raw_trailer = trailer::read_from(&mut file)?;
        let raw_index = trailer::split(&raw_trailer)?;
        let index = IndexBlock::unpack(raw_index)?;

        if index.format_version != FORMAT_VERSION {
            return Err(FlavorError::InvalidVersion(index.format_version));
        }

        if validation.verifies() && !index.verify_checksum(raw_index) {
            escalate(
                validation,
                FlavorError::BadChecksum(
                    ChecksumKind::Index,
                    format!("{:08x}", index.index_checksum),
                    "recomputed Adler-32 differs".to_string(),
                ),
            )?;
        }

        // Structural bounds are fatal regardless of level
        let file_size = file.metadata()?.len();
        check_structure(&index, file_size)?;

        file.seek(SeekFrom::Start(index.metadata_offset))?;
        let mut compressed = vec![0u8; index.metadata_size as usize];
        file.read_exact(&mut compressed)?;

        if validation.verifies() {
            let actual = sha256(&compressed);
            if actual != index.metadata_checksum {
                escalate(
                    validation,
                    FlavorError::BadChecksum(
                        ChecksumKind::Metadata,
                        hex::encode(&index.metadata_checksum[..8]),
                        hex::encode(&actual[..8]),
                    ),
                )?;
            }
        }

        let (parsed, metadata_json) = metadata::decode(&compressed)?;

        if validation.verifies() {
            let mut signature = [0u8; 64];
            signature.copy_from_slice(&index.integrity_signature[..64]);
            if let Err(err) =
                metadata::verify_signature(&metadata_json, &signature, &index.public_key)
            {
                escalate(validation, err)?;
            }
        }

        debug!(
            "opened {} ({} v{}, {} slots)",
            effective_path.display(),
            parsed.package.name,
            parsed.package.version,
            index.slot_count
        );

        Ok(PackageReader {
            file,
            path: effective_path,
            index,
            metadata: parsed,
            metadata_json,
            validation,
            _resource_spill: spill,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn index(&self) -> &IndexBlock {
        &self.index
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// The uncompressed canonical metadata JSON, as signed.
    pub fn metadata_json(&self) -> &[u8] {
        &self.metadata_json
    }

    /// Read slot descriptor *i* from the slot table.
    pub fn descriptor(&mut self, i: usize) -> Result<SlotDescriptor> {
        if i >= self.index.slot_count as usize {
            return Err(FlavorError::MissingSlotReference(i));
        }

        let offset = self.index.slot_table_offset + (i * SLOT_DESCRIPTOR_SIZE) as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        let mut raw = [0u8; SLOT_DESCRIPTOR_SIZE];
        self.file.read_exact(&mut raw)?;

        SlotDescriptor::unpack(&raw).ok_or_else(|| {
            FlavorError::SlotExtractionFailed(i, "unparseable slot descriptor".to_string())
        })
    }

    /// All slot descriptors in table order.
    pub fn descriptors(&mut self) -> Result<Vec<SlotDescriptor>> {
        (0..self.index.slot_count as usize)
            .map(|i| self.descriptor(i))
            .collect()
    }

    /// Read slot *i*'s stored bytes and verify their checksum prefix.
    pub fn read_slot_stored(&mut self, i: usize) -> Result<(SlotDescriptor, Vec<u8>)> {
        let descriptor = self.descriptor(i)?;
        if descriptor.size == 0 {
            return Ok((descriptor, Vec::new()));
        }

        self.file.seek(SeekFrom::Start(descriptor.offset))?;
        let mut stored = vec![0u8; descriptor.size as usize];
        self.file.read_exact(&mut stored)?;

        if self.validation.verifies() {
            let actual = sha256_prefix64(&stored);
            if actual != descriptor.checksum {
                escalate(
                    self.validation,
                    FlavorError::BadChecksum(
                        ChecksumKind::Slot(i),
                        format!("{:016x}", descriptor.checksum),
                        format!("{actual:016x}"),
                    ),
                )?;
            }
        }

        Ok((descriptor, stored))
    }

    /// Read slot *i* and undo its full operation chain.
    pub fn read_slot(&mut self, i: usize) -> Result<Vec<u8>> {
        let (descriptor, stored) = self.read_slot_stored(i)?;
        if stored.is_empty() {
            return Ok(stored);
        }

        let op_list = chain::unpack(descriptor.operations);
        chain::validate(descriptor.operations)?;
        ops::invert_chain(&stored, &op_list)
            .map_err(|e| match e {
                FlavorError::UnsupportedOperation(op) => FlavorError::UnsupportedOperation(op),
                other => FlavorError::SlotExtractionFailed(i, other.to_string()),
            })
    }
}

/// Structural bounds checks over the parsed index. Fatal on any violation.
fn check_structure(index: &IndexBlock, file_size: u64) -> Result<()> {
    if index.package_size != file_size {
        return Err(FlavorError::InvalidMagic(format!(
            "package size mismatch: index says {}, file is {file_size}",
            index.package_size
        )));
    }

    if index.slot_table_size != u64::from(index.slot_count) * SLOT_DESCRIPTOR_SIZE as u64 {
        return Err(FlavorError::InvalidMagic(format!(
            "slot table size {} does not match {} slots",
            index.slot_table_size, index.slot_count
        )));
    }

    let body_end = file_size - MAGIC_TRAILER_SIZE as u64;
    let in_body = |offset: u64, size: u64| offset.checked_add(size).is_some_and(|end| end <= body_end);

    if !in_body(index.metadata_offset, index.metadata_size) {
        return Err(FlavorError::InvalidMagic(
            "metadata region extends past the package body".to_string(),
        ));
    }
    if !in_body(index.slot_table_offset, index.slot_table_size) {
        return Err(FlavorError::InvalidMagic(
            "slot table extends past the package body".to_string(),
        ));
    }

    Ok(())
}

/// Locate the package payload: when reading the running executable, try
/// the PE resource section first, then fall back to the file itself.
fn open_payload(path: &Path) -> Result<(File, PathBuf, Option<tempfile::NamedTempFile>)> {
    let reading_self = std::env::current_exe()
        .ok()
        .is_some_and(|exe| exe == path || exe.canonicalize().ok() == path.canonicalize().ok());

    if reading_self {
        if let Some(payload) = crate::pe::resource::find_payload_in_self() {
            debug!("using {}-byte payload from PE resource section", payload.len());
            let mut spill = tempfile::NamedTempFile::new()?;
            spill.write_all(&payload)?;
            spill.flush()?;
            let file = spill.reopen()?;
            let spill_path = spill.path().to_path_buf();
            return Ok((file, spill_path, Some(spill)));
        }
    }

    let file = File::open(path)?;
    Ok((file, path.to_path_buf(), None))
}
