//! Full verification pass producing a per-check report.
//!
//! Unlike the launcher's open-time checks, explicit verification never
//! aborts early on integrity mismatches: every check runs and its result
//! lands in the report, which the CLI renders.

use super::PackageReader;
use crate::config::{RuntimeConfig, ValidationLevel};
use crate::error::Result;
use crate::format::checksum::{sha256, sha256_prefix64};
use crate::format::{FORMAT_VERSION, trailer};
use crate::metadata;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// One verification check.
#[derive(Debug, Clone)]
pub struct Check {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

/// Per-slot verification result.
#[derive(Debug, Clone)]
pub struct SlotCheck {
    pub index: usize,
    pub id: String,
    pub passed: bool,
    pub detail: String,
}

/// Aggregate verification report.
#[derive(Debug)]
pub struct VerifyReport {
    pub package_name: String,
    pub package_version: String,
    pub checks: Vec<Check>,
    pub slots: Vec<SlotCheck>,
}

impl VerifyReport {
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed) && self.slots.iter().all(|s| s.passed)
    }
}

/// Run every check against a package file.
pub fn verify(path: &Path) -> Result<VerifyReport> {
    // Open leniently so a damaged-but-parseable package still yields a
    // report; structural failures surface as hard errors from open()
    let lenient = RuntimeConfig {
        validation: ValidationLevel::None,
        ..RuntimeConfig::default()
    };
    let mut reader = PackageReader::open(path, &lenient)?;
    let index = reader.index().clone();

    let mut checks = Vec::new();

    let mut file = File::open(reader.path())?;
    let file_size = file.metadata()?.len();

    // Trailer magic: open() already insisted on it, record it as passed
    checks.push(Check {
        name: "trailer magic",
        passed: true,
        detail: "\u{1F4E6} ... \u{1FA84} present".to_string(),
    });

    checks.push(Check {
        name: "format version",
        passed: index.format_version == FORMAT_VERSION,
        detail: format!("0x{:08x}", index.format_version),
    });

    let raw_trailer = trailer::read_from(&mut file)?;
    let raw_index = trailer::split(&raw_trailer)?;
    checks.push(Check {
        name: "index checksum",
        passed: index.verify_checksum(raw_index),
        detail: format!("adler32:{:08x}", index.index_checksum),
    });

    checks.push(Check {
        name: "package size",
        passed: index.package_size == file_size,
        detail: format!("{} bytes", file_size),
    });

    file.seek(SeekFrom::Start(index.metadata_offset))?;
    let mut compressed = vec![0u8; index.metadata_size as usize];
    file.read_exact(&mut compressed)?;
    let metadata_ok = sha256(&compressed) == index.metadata_checksum;
    checks.push(Check {
        name: "metadata checksum",
        passed: metadata_ok,
        detail: format!("sha256:{}", hex::encode(&index.metadata_checksum[..8])),
    });

    let mut signature = [0u8; 64];
    signature.copy_from_slice(&index.integrity_signature[..64]);
    let signature_result =
        metadata::verify_signature(reader.metadata_json(), &signature, &index.public_key);
    checks.push(Check {
        name: "integrity signature",
        passed: signature_result.is_ok(),
        detail: match &signature_result {
            Ok(()) => "ed25519 valid".to_string(),
            Err(e) => e.to_string(),
        },
    });

    // Per-slot stored-byte checksums
    let mut slots = Vec::new();
    let entries = reader.metadata().slots.clone();
    for i in 0..index.slot_count as usize {
        let id = entries
            .get(i)
            .map(|e| e.id.clone())
            .unwrap_or_else(|| format!("slot_{i}"));

        let result = reader.read_slot_stored(i);
        let (passed, detail) = match result {
            Ok((descriptor, stored)) => {
                if stored.is_empty() {
                    (true, "self-referential, no bytes".to_string())
                } else {
                    let actual = sha256_prefix64(&stored);
                    let mut passed = actual == descriptor.checksum;
                    let mut detail =
                        format!("{} bytes, checksum {:016x}", stored.len(), actual);

                    // Cross-check the document entry against the descriptor
                    if let Some(entry) = entries.get(i) {
                        if entry.size != descriptor.size {
                            passed = false;
                            detail = format!(
                                "document size {} disagrees with descriptor size {}",
                                entry.size, descriptor.size
                            );
                        } else if !entry.checksum.is_empty()
                            && !crate::format::checksum::verify_checksum(
                                &stored,
                                &entry.checksum,
                            )
                            .unwrap_or(false)
                        {
                            passed = false;
                            detail = "document checksum disagrees with stored bytes"
                                .to_string();
                        } else if entry.operations
                            != crate::ops::chain::display(descriptor.operations)
                        {
                            passed = false;
                            detail = format!(
                                "document chain '{}' disagrees with descriptor '{}'",
                                entry.operations,
                                crate::ops::chain::display(descriptor.operations)
                            );
                        }
                    }

                    (passed, detail)
                }
            }
            Err(e) => (false, e.to_string()),
        };

        slots.push(SlotCheck {
            index: i,
            id,
            passed,
            detail,
        });
    }

    Ok(VerifyReport {
        package_name: reader.metadata().package.name.clone(),
        package_version: reader.metadata().package.version.clone(),
        checks,
        slots,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{BuildOptions, build};
    use std::fs;

    fn build_sample(dir: &Path) -> std::path::PathBuf {
        let launcher = dir.join("launcher");
        fs::write(&launcher, b"#!/bin/sh\nexit 0\n").unwrap();
        let payload = dir.join("p.bin");
        fs::write(&payload, b"verify me").unwrap();

        let manifest_path = dir.join("manifest.json");
        fs::write(
            &manifest_path,
            format!(
                r#"{{
                  "package": {{"name": "verified", "version": "2.0.0"}},
                  "execution": {{"command": "true"}},
                  "slots": [{{"id": "p", "source": "{}", "target": "data/p"}}]
                }}"#,
                payload.display()
            ),
        )
        .unwrap();

        let output = dir.join("verified.psp");
        build(
            &manifest_path,
            &output,
            &BuildOptions {
                launcher_bin: Some(launcher),
                key_seed: Some("verify tests".to_string()),
                ..BuildOptions::default()
            },
        )
        .unwrap();
        output
    }

    #[test]
    fn clean_package_passes_all_checks() {
        let dir = tempfile::tempdir().unwrap();
        let output = build_sample(dir.path());

        let report = verify(&output).unwrap();
        assert!(report.all_passed(), "failing checks: {:?}", report);
        assert_eq!(report.package_name, "verified");
        assert_eq!(report.slots.len(), 1);
    }

    #[test]
    fn tampered_slot_fails_only_its_check() {
        let dir = tempfile::tempdir().unwrap();
        let output = build_sample(dir.path());

        // Corrupt the last byte of the slot region (just before the trailer)
        let mut bytes = fs::read(&output).unwrap();
        let target = bytes.len() - crate::format::MAGIC_TRAILER_SIZE - 1;
        bytes[target] ^= 0xFF;
        fs::write(&output, &bytes).unwrap();

        let report = verify(&output).unwrap();
        assert!(!report.all_passed());
        assert!(!report.slots[0].passed);
        // Structural checks still pass
        assert!(report.checks.iter().find(|c| c.name == "package size").unwrap().passed);
    }

    #[test]
    fn tampered_metadata_fails_checksum_and_signature() {
        let dir = tempfile::tempdir().unwrap();
        let output = build_sample(dir.path());

        let lenient = RuntimeConfig {
            validation: ValidationLevel::None,
            ..RuntimeConfig::default()
        };
        let reader = PackageReader::open(&output, &lenient).unwrap();
        let metadata_offset = reader.index().metadata_offset as usize;
        drop(reader);

        let mut bytes = fs::read(&output).unwrap();
        bytes[metadata_offset + 4] ^= 0x01;
        fs::write(&output, &bytes).unwrap();

        // Damaged gzip may fail to parse at all; that is a hard error, not
        // a report. Flip a byte that keeps the stream decodable often
        // enough that both outcomes are acceptable here.
        match verify(&output) {
            Ok(report) => {
                let metadata_check = report
                    .checks
                    .iter()
                    .find(|c| c.name == "metadata checksum")
                    .unwrap();
                assert!(!metadata_check.passed);
            }
            Err(_) => {}
        }
    }
}
