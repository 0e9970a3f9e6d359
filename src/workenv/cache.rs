//! Cache-validity bookkeeping, staleness sweeps, and the disk-space guard.
//!
//! A workenv is valid iff its content directory exists and is non-empty,
//! the `complete` marker exists, and the `package.checksum` sentinel holds
//! the current index checksum. The sentinel is written last (after
//! `complete`) and read first (before lock acquisition).

use super::paths::WorkenvPaths;
use crate::config::{RuntimeConfig, ValidationLevel};
use crate::error::{ChecksumKind, FlavorError, Result};
use crate::format::index::IndexBlock;
use crate::platform::{free_disk_space, process_running};
use crate::metadata::Metadata;
use log::{debug, info, warn};
use serde::Serialize;
use std::fs;
use std::io::Write;

/// Safety factor applied to summed slot sizes before extraction.
const DISK_SPACE_MULTIPLIER: u64 = 2;

/// Why the cache cannot be reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheState {
    Valid,
    MissingContent,
    Incomplete,
    NoSentinel,
    ChecksumMismatch { cached: String, current: String },
    ValidationFileMismatch,
}

/// Evaluate the cached workenv against the package being launched.
///
/// A checksum mismatch escalates by validation level: strict is fatal,
/// everything else re-extracts.
pub fn evaluate(
    paths: &WorkenvPaths,
    index: &IndexBlock,
    metadata: &Metadata,
    config: &RuntimeConfig,
) -> Result<CacheState> {
    let content = paths.content();
    let non_empty = content.is_dir()
        && fs::read_dir(&content)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false);
    if !non_empty {
        debug!("cache miss: content directory missing or empty");
        return Ok(CacheState::MissingContent);
    }

    if !paths.complete_file().exists() {
        debug!("cache miss: no completion marker");
        return Ok(CacheState::Incomplete);
    }

    let sentinel = match fs::read_to_string(paths.checksum_file()) {
        Ok(s) => s.trim().to_string(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("cache miss: no checksum sentinel");
            return Ok(CacheState::NoSentinel);
        }
        Err(e) => return Err(e.into()),
    };

    let current = format!("{:08x}", index.index_checksum);
    if sentinel == current {
        // Optional package-declared validation file, checked on top of
        // the sentinel
        if let Some(ref validation) = metadata.cache_validation {
            let check_path = validation
                .check_file
                .replace("{workenv}", &content.to_string_lossy());
            let matches = fs::read_to_string(&check_path)
                .map(|found| found.trim() == validation.expected_content)
                .unwrap_or(false);
            if !matches {
                info!("cache validation file '{check_path}' missing or stale");
                return Ok(CacheState::ValidationFileMismatch);
            }
        }

        debug!("cache valid (checksum {current})");
        return Ok(CacheState::Valid);
    }

    match config.validation {
        ValidationLevel::Strict => Err(FlavorError::BadChecksum(
            ChecksumKind::CacheSentinel,
            sentinel,
            current,
        )),
        level => {
            warn!(
                "cached workenv was built from a different package \
                 (cached {sentinel}, current {current}); re-extracting \
                 [validation: {}]",
                level.as_str()
            );
            Ok(CacheState::ChecksumMismatch {
                cached: sentinel,
                current,
            })
        }
    }
}

/// Write the completion marker (owner pid), then the checksum sentinel,
/// then the `index.json` sidecar, in that order.
pub fn mark_complete(paths: &WorkenvPaths, index: &IndexBlock) -> Result<()> {
    fs::create_dir_all(paths.extract_dir())?;
    fs::create_dir_all(paths.log_dir())?;

    let mut complete = fs::File::create(paths.complete_file())?;
    writeln!(complete, "{}", std::process::id())?;
    complete.sync_all()?;

    let mut sentinel = fs::File::create(paths.checksum_file())?;
    write!(sentinel, "{:08x}", index.index_checksum)?;
    // The sentinel must hit disk before an exec-replace can discard it
    sentinel.sync_all()?;

    write_index_sidecar(paths, index)?;

    info!("extraction complete, sentinel {:08x}", index.index_checksum);
    Ok(())
}

/// Serializable subset of the index block for the introspection sidecar.
#[derive(Debug, Serialize)]
struct IndexSidecar {
    format_version: String,
    package_size: u64,
    launcher_size: u64,
    metadata_offset: u64,
    metadata_size: u64,
    slot_table_offset: u64,
    slot_table_size: u64,
    slot_count: u32,
    index_checksum: String,
    metadata_checksum: String,
    build_timestamp: u64,
    capabilities: u64,
}

fn write_index_sidecar(paths: &WorkenvPaths, index: &IndexBlock) -> Result<()> {
    let sidecar = IndexSidecar {
        format_version: format!("0x{:08x}", index.format_version),
        package_size: index.package_size,
        launcher_size: index.launcher_size,
        metadata_offset: index.metadata_offset,
        metadata_size: index.metadata_size,
        slot_table_offset: index.slot_table_offset,
        slot_table_size: index.slot_table_size,
        slot_count: index.slot_count,
        index_checksum: format!("{:08x}", index.index_checksum),
        metadata_checksum: hex::encode(index.metadata_checksum),
        build_timestamp: index.stamp.build_timestamp,
        capabilities: index.caps.capabilities,
    };

    fs::write(
        paths.index_sidecar(),
        serde_json::to_string_pretty(&sidecar)?,
    )?;
    Ok(())
}

/// Remove `tmp/<pid>` directories left behind by dead processes.
pub fn sweep_stale_scratch(paths: &WorkenvPaths) {
    let tmp_root = paths.tmp_root();
    let Ok(entries) = fs::read_dir(&tmp_root) else {
        return;
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(pid) = name.to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        if !process_running(pid) {
            info!("sweeping stale scratch directory of dead pid {pid}");
            if let Err(e) = fs::remove_dir_all(entry.path()) {
                debug!("failed to remove stale scratch {:?}: {e}", entry.path());
            }
        }
    }
}

/// Reject extraction when the filesystem lacks `2 × Σ slot.size` free
/// bytes. Non-fatal when the OS query fails.
pub fn check_disk_space(paths: &WorkenvPaths, metadata: &Metadata) -> Result<()> {
    let needed: u64 = metadata
        .slots
        .iter()
        .map(|slot| slot.size * DISK_SPACE_MULTIPLIER)
        .sum();

    let content = paths.content();
    let probe = if content.exists() {
        content
    } else {
        content
            .ancestors()
            .find(|p| p.exists())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| std::path::PathBuf::from("."))
    };

    match free_disk_space(&probe) {
        Some(available) if available < needed => Err(FlavorError::DiskSpaceInsufficient {
            needed,
            available,
        }),
        Some(available) => {
            debug!("disk space ok: need {needed}, {available} available");
            Ok(())
        }
        None => {
            warn!("free-disk query failed, proceeding without the guard");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn paths_in(dir: &Path) -> WorkenvPaths {
        WorkenvPaths::new(dir.to_path_buf(), Path::new("cachetest.psp"))
    }

    fn sample_index() -> IndexBlock {
        let mut index = IndexBlock::new();
        index.index_checksum = 0xDEAD_BEEF;
        index
    }

    fn sample_metadata() -> Metadata {
        Metadata {
            format: "PSPF/2025".to_string(),
            format_version: None,
            package: crate::metadata::PackageInfo {
                name: "cachetest".to_string(),
                version: "1.0".to_string(),
                description: String::new(),
            },
            slots: vec![],
            execution: crate::metadata::ExecutionInfo {
                primary_slot: 0,
                command: "true".to_string(),
                environment: Default::default(),
            },
            runtime: None,
            cache_validation: None,
            setup_commands: vec![],
            verification: None,
            build: None,
            launcher: None,
            compatibility: None,
            workenv: None,
        }
    }

    fn strict() -> RuntimeConfig {
        RuntimeConfig {
            validation: ValidationLevel::Strict,
            ..RuntimeConfig::default()
        }
    }

    #[test]
    fn empty_workenv_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());

        assert_eq!(
            evaluate(&paths, &sample_index(), &sample_metadata(), &strict()).unwrap(),
            CacheState::MissingContent
        );
    }

    #[test]
    fn full_completion_cycle_validates() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());
        let index = sample_index();

        fs::create_dir_all(paths.content()).unwrap();
        fs::write(paths.content().join("marker"), b"x").unwrap();
        mark_complete(&paths, &index).unwrap();

        assert_eq!(
            evaluate(&paths, &index, &sample_metadata(), &strict()).unwrap(),
            CacheState::Valid
        );

        // Sentinel is 8 lowercase hex digits
        let sentinel = fs::read_to_string(paths.checksum_file()).unwrap();
        assert_eq!(sentinel, "deadbeef");

        // Sidecar exists and parses
        let sidecar: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(paths.index_sidecar()).unwrap()).unwrap();
        assert_eq!(sidecar["index_checksum"], "deadbeef");
    }

    #[test]
    fn content_without_marker_is_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());

        fs::create_dir_all(paths.content()).unwrap();
        fs::write(paths.content().join("marker"), b"x").unwrap();

        assert_eq!(
            evaluate(&paths, &sample_index(), &sample_metadata(), &strict()).unwrap(),
            CacheState::Incomplete
        );
    }

    #[test]
    fn sentinel_mismatch_is_fatal_in_strict() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());
        let index = sample_index();

        fs::create_dir_all(paths.content()).unwrap();
        fs::write(paths.content().join("marker"), b"x").unwrap();
        mark_complete(&paths, &index).unwrap();

        let mut other = index.clone();
        other.index_checksum = 0x0BAD_CAFE;
        assert!(matches!(
            evaluate(&paths, &other, &sample_metadata(), &strict()),
            Err(FlavorError::BadChecksum(ChecksumKind::CacheSentinel, _, _))
        ));
    }

    #[test]
    fn sentinel_mismatch_reextracts_in_standard() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());
        let index = sample_index();

        fs::create_dir_all(paths.content()).unwrap();
        fs::write(paths.content().join("marker"), b"x").unwrap();
        mark_complete(&paths, &index).unwrap();

        let mut other = index.clone();
        other.index_checksum = 0x0BAD_CAFE;
        let config = RuntimeConfig::default();
        assert!(matches!(
            evaluate(&paths, &other, &sample_metadata(), &config).unwrap(),
            CacheState::ChecksumMismatch { .. }
        ));
    }

    #[test]
    fn validation_file_gates_an_otherwise_valid_cache() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());
        let index = sample_index();

        fs::create_dir_all(paths.content()).unwrap();
        fs::write(paths.content().join("marker"), b"x").unwrap();
        mark_complete(&paths, &index).unwrap();

        let mut metadata = sample_metadata();
        metadata.cache_validation = Some(crate::metadata::CacheValidationInfo {
            check_file: "{workenv}/VERSION".to_string(),
            expected_content: "1.0".to_string(),
        });

        // Missing check file invalidates
        assert_eq!(
            evaluate(&paths, &index, &metadata, &strict()).unwrap(),
            CacheState::ValidationFileMismatch
        );

        // Matching content validates
        fs::write(paths.content().join("VERSION"), "1.0\n").unwrap();
        assert_eq!(
            evaluate(&paths, &index, &metadata, &strict()).unwrap(),
            CacheState::Valid
        );

        // Stale content invalidates again
        fs::write(paths.content().join("VERSION"), "0.9\n").unwrap();
        assert_eq!(
            evaluate(&paths, &index, &metadata, &strict()).unwrap(),
            CacheState::ValidationFileMismatch
        );
    }

    #[test]
    fn stale_scratch_dirs_are_swept() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());

        let dead = paths.tmp_for(4_294_967_294);
        let alive = paths.tmp_for(std::process::id());
        fs::create_dir_all(&dead).unwrap();
        fs::create_dir_all(&alive).unwrap();

        sweep_stale_scratch(&paths);

        assert!(!dead.exists());
        assert!(alive.exists());
    }

    #[cfg(unix)]
    #[test]
    fn disk_guard_passes_for_small_payloads() {
        let dir = tempfile::tempdir().unwrap();
        let paths = paths_in(dir.path());
        let metadata = crate::metadata::Metadata {
            format: "PSPF/2025".to_string(),
            format_version: None,
            package: crate::metadata::PackageInfo {
                name: "d".into(),
                version: "1".into(),
                description: String::new(),
            },
            slots: vec![],
            execution: crate::metadata::ExecutionInfo {
                primary_slot: 0,
                command: "true".into(),
                environment: Default::default(),
            },
            runtime: None,
            cache_validation: None,
            setup_commands: vec![],
            verification: None,
            build: None,
            launcher: None,
            compatibility: None,
            workenv: None,
        };
        check_disk_space(&paths, &metadata).unwrap();
    }
}
