//! Launch orchestration: verify, materialize the workenv, hand off.

pub mod command;
pub mod environ;
pub mod extract;
pub mod merge;
pub mod setup;

use crate::config::RuntimeConfig;
use crate::error::{FlavorError, Result};
use crate::metadata::{Metadata, WorkenvInfo};
use crate::platform::cache_root;
use crate::reader::PackageReader;
use crate::workenv::cache::{self, CacheState};
use crate::workenv::lock::{ExtractionLock, LockAttempt};
use crate::workenv::WorkenvPaths;
use log::{debug, info};
use std::fs;
use std::path::Path;

/// Launch a package: the full §4.10 sequence. Returns the payload's exit
/// code in spawn mode; in exec mode this only returns on failure.
pub fn launch(package_path: &Path, args: &[String], config: &RuntimeConfig) -> Result<i32> {
    debug!("launching {}", package_path.display());

    let mut reader = PackageReader::open(package_path, config)?;
    let metadata = reader.metadata().clone();
    let index = reader.index().clone();

    info!(
        "package {} v{}",
        metadata.package.name, metadata.package.version
    );

    let paths = resolve_paths(package_path, config);
    let workenv = paths.content();
    fs::create_dir_all(&workenv)?;
    secure_dir(&workenv);

    if let Some(ref workenv_info) = metadata.workenv {
        create_declared_directories(&workenv, workenv_info)?;
    }

    cache::sweep_stale_scratch(&paths);

    let state = if config.use_cache {
        cache::evaluate(&paths, &index, &metadata, config)?
    } else {
        info!("FLAVOR_WORKENV_CACHE disabled, forcing extraction");
        CacheState::MissingContent
    };

    if state == CacheState::Valid {
        info!("work environment is valid, skipping extraction");
    } else {
        populate_workenv(&mut reader, &metadata, &index, &paths, config)?;
    }

    let env = environ::build_child_env(&metadata, &workenv, package_path, &cache_root());
    let prepared = command::prepare(&metadata, &workenv, package_path, args, env)?;
    command::handover(prepared, config)
}

/// Resolve workenv paths, honoring the `FLAVOR_WORKDIR` override.
fn resolve_paths(package_path: &Path, config: &RuntimeConfig) -> WorkenvPaths {
    if let Some(ref workdir) = config.workdir_override {
        info!("using workenv override {}", workdir.display());
        WorkenvPaths::with_content_override(package_path, workdir.clone())
    } else {
        WorkenvPaths::new(cache_root(), package_path)
    }
}

/// Cache-miss path: guard disk space, take (or wait for) the lock,
/// extract, merge, and record completion.
fn populate_workenv(
    reader: &mut PackageReader,
    metadata: &Metadata,
    index: &crate::format::index::IndexBlock,
    paths: &WorkenvPaths,
    config: &RuntimeConfig,
) -> Result<()> {
    cache::check_disk_space(paths, metadata)?;

    match ExtractionLock::try_acquire(paths)? {
        LockAttempt::Acquired(guard) => {
            let result = extract_and_merge(reader, metadata, index, paths);
            // The guard releases on drop for every outcome
            drop(guard);
            result
        }
        LockAttempt::Held(pid) => {
            debug!("extraction lock held by pid {pid}, waiting");
            ExtractionLock::wait_for_release(paths, config.lock_timeout)?;

            match cache::evaluate(paths, index, metadata, config)? {
                CacheState::Valid => {
                    info!("extraction completed by another process");
                    Ok(())
                }
                other => Err(FlavorError::Launch(format!(
                    "extraction by another process left the cache invalid ({other:?})"
                ))),
            }
        }
    }
}

fn extract_and_merge(
    reader: &mut PackageReader,
    metadata: &Metadata,
    index: &crate::format::index::IndexBlock,
    paths: &WorkenvPaths,
) -> Result<()> {
    let temp_dir = paths.tmp_for(std::process::id());
    fs::create_dir_all(&temp_dir)?;
    secure_dir(&temp_dir);

    let layout = match extract::extract_all(reader, &temp_dir) {
        Ok(layout) => layout,
        Err(e) => {
            // Roll the scratch tree back so a retry starts clean
            let _ = fs::remove_dir_all(&temp_dir);
            return Err(e);
        }
    };

    let workenv = paths.content();
    if let Err(e) = merge::merge_into_workenv(&layout.temp_dir, &workenv) {
        let _ = fs::remove_dir_all(&layout.temp_dir);
        return Err(FlavorError::SlotExtractionFailed(0, e.to_string()));
    }

    merge::write_metadata_document(paths, metadata)?;

    setup::run_setup_commands(
        &metadata.setup_commands,
        &workenv,
        &metadata.package,
        &metadata.execution.environment,
    )?;
    setup::remove_init_slots(&workenv, &layout.init_targets);

    cache::mark_complete(paths, index)?;
    Ok(())
}

/// Create the directories the metadata declares, applying their modes.
fn create_declared_directories(workenv: &Path, info: &WorkenvInfo) -> Result<()> {
    let Some(ref directories) = info.directories else {
        return Ok(());
    };

    for spec in directories {
        let relative = spec
            .path
            .strip_prefix("{workenv}/")
            .or_else(|| spec.path.strip_prefix("{workenv}"))
            .unwrap_or(&spec.path);

        let dir = if relative.is_empty() {
            workenv.to_path_buf()
        } else {
            workenv.join(relative)
        };

        debug!("creating declared directory {dir:?}");
        fs::create_dir_all(&dir)?;

        #[cfg(unix)]
        if let Some(mode) = spec.mode.as_deref().and_then(crate::manifest::parse_octal_mode) {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&dir, fs::Permissions::from_mode(u32::from(mode)))?;
        }
    }

    Ok(())
}

#[cfg(unix)]
fn secure_dir(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o700));
}

#[cfg(not(unix))]
fn secure_dir(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{BuildOptions, build};
    use crate::config::{ExecMode, ValidationLevel};
    use std::path::PathBuf;

    /// Build a package whose payload is a shell script writing to a file,
    /// so a spawn-mode launch is observable.
    fn build_runnable(dir: &Path) -> PathBuf {
        let launcher = dir.join("launcher");
        fs::write(&launcher, b"#!/bin/sh\nexit 0\n").unwrap();

        let tree = dir.join("tree");
        fs::create_dir_all(tree.join("bin")).unwrap();
        fs::write(
            tree.join("bin/run"),
            b"#!/bin/sh\necho \"ran with: $@\"\nexit 0\n",
        )
        .unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(tree.join("bin/run"), fs::Permissions::from_mode(0o755))
                .unwrap();
        }

        let data = dir.join("input.txt");
        fs::write(&data, b"slot one data").unwrap();

        let manifest_path = dir.join("manifest.json");
        fs::write(
            &manifest_path,
            format!(
                r#"{{
                  "package": {{"name": "launchable", "version": "1.0.0"}},
                  "execution": {{"command": "{{workenv}}/bin/run {{slot:1}}"}},
                  "slots": [
                    {{"id": "tree", "source": "{}", "target": "{{workenv}}", "operations": "tar.gz", "permissions": "0755"}},
                    {{"id": "data", "source": "{}", "target": "data/input.txt"}}
                  ]
                }}"#,
                tree.display(),
                data.display()
            ),
        )
        .unwrap();

        let output = dir.join("launchable.psp");
        build(
            &manifest_path,
            &output,
            &BuildOptions {
                launcher_bin: Some(launcher),
                key_seed: Some("launch tests".to_string()),
                ..BuildOptions::default()
            },
        )
        .unwrap();
        output
    }

    fn spawn_config(workdir: &Path) -> RuntimeConfig {
        RuntimeConfig {
            validation: ValidationLevel::Strict,
            exec_mode: ExecMode::Spawn,
            use_cache: true,
            workdir_override: Some(workdir.to_path_buf()),
            lock_timeout: std::time::Duration::from_secs(5),
        }
    }

    #[cfg(unix)]
    #[test]
    fn launch_extracts_and_runs_payload() {
        let dir = tempfile::tempdir().unwrap();
        let package = build_runnable(dir.path());
        let workdir = dir.path().join("we");

        let code = launch(&package, &[], &spawn_config(&workdir)).unwrap();
        assert_eq!(code, 0);

        // Extraction artifacts in place
        assert!(workdir.join("bin/run").is_file());
        assert!(workdir.join("data/input.txt").is_file());

        let paths =
            WorkenvPaths::with_content_override(&package, workdir.clone());
        assert!(paths.complete_file().exists());
        assert!(paths.checksum_file().exists());
        assert!(paths.metadata_document().exists());
        assert!(!paths.lock_file().exists());
    }

    #[cfg(unix)]
    #[test]
    fn second_launch_reuses_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let package = build_runnable(dir.path());
        let workdir = dir.path().join("we");
        let config = spawn_config(&workdir);

        launch(&package, &[], &config).unwrap();

        // Plant a sentinel that extraction would wipe
        let sentinel = workdir.join("bin/.cache-witness");
        fs::write(&sentinel, b"untouched").unwrap();

        launch(&package, &[], &config).unwrap();
        assert!(sentinel.exists(), "second launch re-extracted the workenv");
    }

    #[cfg(unix)]
    #[test]
    fn cache_disabled_forces_reextraction() {
        let dir = tempfile::tempdir().unwrap();
        let package = build_runnable(dir.path());
        let workdir = dir.path().join("we");
        let mut config = spawn_config(&workdir);

        launch(&package, &[], &config).unwrap();
        // The data slot is a plain entry, so extraction replaces the whole
        // directory and the witness with it
        let sentinel = workdir.join("data/.cache-witness");
        fs::write(&sentinel, b"x").unwrap();

        config.use_cache = false;
        launch(&package, &[], &config).unwrap();
        assert!(!sentinel.exists(), "extraction did not refresh data/");
    }

    #[test]
    fn declared_directories_are_created_with_modes() {
        let dir = tempfile::tempdir().unwrap();
        let info: WorkenvInfo = serde_json::from_value(serde_json::json!({
            "directories": [
                {"path": "{workenv}/var/log", "mode": "0700"},
                {"path": "cache"}
            ]
        }))
        .unwrap();

        create_declared_directories(dir.path(), &info).unwrap();

        assert!(dir.path().join("var/log").is_dir());
        assert!(dir.path().join("cache").is_dir());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(dir.path().join("var/log"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o700);
        }
    }
}
