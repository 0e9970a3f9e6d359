//! Setup commands executed after merge, before handover.
//!
//! A command is either a raw string (run as-is) or a typed object:
//! `execute` (free command), `enumerate_and_execute` (glob expansion
//! appends each match to the argv tail), or `write_file` (materialize a
//! file with an optional mode). `{workenv}`, `{package_name}`, and
//! `{version}` substitute in all string fields.

use super::command::{resolve_executable, shell_split, substitute_basic};
use crate::error::{FlavorError, Result};
use crate::metadata::PackageInfo;
use glob::glob;
use log::{debug, info};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::process::Command;

/// Run all setup commands in order; the first failure aborts.
pub fn run_setup_commands(
    commands: &[Value],
    workenv: &Path,
    package: &PackageInfo,
    exec_env: &HashMap<String, String>,
) -> Result<()> {
    if commands.is_empty() {
        return Ok(());
    }

    info!("running {} setup commands", commands.len());
    let user_cwd = std::env::current_dir()?;

    for (i, value) in commands.iter().enumerate() {
        debug!("setup command {}/{}", i + 1, commands.len());
        match value {
            Value::String(command) => {
                run_one(command, workenv, package, &user_cwd, exec_env)?;
            }
            Value::Object(obj) => run_typed(obj, workenv, package, &user_cwd, exec_env)?,
            other => {
                return Err(FlavorError::Launch(format!(
                    "setup command {i} must be a string or object, got {other}"
                )));
            }
        }
    }

    Ok(())
}

fn run_typed(
    obj: &serde_json::Map<String, Value>,
    workenv: &Path,
    package: &PackageInfo,
    user_cwd: &Path,
    exec_env: &HashMap<String, String>,
) -> Result<()> {
    let kind = obj
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| FlavorError::Launch("setup command object missing 'type'".to_string()))?;

    match kind {
        "execute" => {
            let command = require_str(obj, "command")?;
            run_one(command, workenv, package, user_cwd, exec_env)
        }

        "enumerate_and_execute" => {
            let base_command = require_str(obj, "command")?;
            let enumerate = obj
                .get("enumerate")
                .and_then(|v| v.as_object())
                .ok_or_else(|| {
                    FlavorError::Launch("enumerate_and_execute missing 'enumerate'".to_string())
                })?;
            let path = require_str(enumerate, "path")?;
            let pattern = require_str(enumerate, "pattern")?;

            let base = substitute_basic(path, workenv, package);
            let glob_pattern = format!("{base}/{pattern}");
            debug!("enumerating {glob_pattern}");

            for entry in glob(&glob_pattern)
                .map_err(|e| FlavorError::Launch(format!("bad glob '{glob_pattern}': {e}")))?
            {
                let matched = entry
                    .map_err(|e| FlavorError::Launch(format!("enumeration failed: {e}")))?;
                let command = format!("{base_command} {}", matched.display());
                run_one(&command, workenv, package, user_cwd, exec_env)?;
            }
            Ok(())
        }

        "write_file" => {
            let path = substitute_basic(require_str(obj, "path")?, workenv, package);
            let content = substitute_basic(require_str(obj, "content")?, workenv, package);

            if let Some(parent) = Path::new(&path).parent() {
                fs::create_dir_all(parent)?;
            }
            debug!("writing setup file {path}");
            fs::write(&path, content)?;

            if let Some(mode) = obj.get("mode").and_then(|v| v.as_str()) {
                apply_mode(Path::new(&path), mode);
            }
            Ok(())
        }

        other => Err(FlavorError::Launch(format!(
            "unknown setup command type '{other}'"
        ))),
    }
}

fn require_str<'a>(obj: &'a serde_json::Map<String, Value>, key: &str) -> Result<&'a str> {
    obj.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| FlavorError::Launch(format!("setup command missing '{key}'")))
}

/// Run one command line with the workenv context applied.
fn run_one(
    command: &str,
    workenv: &Path,
    package: &PackageInfo,
    user_cwd: &Path,
    exec_env: &HashMap<String, String>,
) -> Result<()> {
    let substituted = substitute_basic(command, workenv, package);
    let parts = shell_split(&substituted)
        .map_err(|e| FlavorError::Launch(format!("bad setup command '{substituted}': {e}")))?;
    let Some((program, args)) = parts.split_first() else {
        return Ok(());
    };

    let resolved = resolve_executable(program);
    debug!("setup: {resolved} {args:?}");

    let mut cmd = Command::new(&resolved);
    cmd.args(args);
    cmd.current_dir(user_cwd);
    cmd.env("FLAVOR_WORKENV", workenv);
    for (key, value) in exec_env {
        cmd.env(key, value);
    }
    if let Ok(path) = std::env::var("PATH") {
        cmd.env("PATH", format!("{}/bin:{path}", workenv.display()));
    }

    let output = cmd
        .output()
        .map_err(|e| FlavorError::CommandSpawnFailed(resolved.clone(), e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(FlavorError::Launch(format!(
            "setup command '{resolved}' failed with status {}: {}",
            output.status.code().unwrap_or(-1),
            stderr.trim()
        )));
    }

    Ok(())
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: &str) {
    use std::os::unix::fs::PermissionsExt;
    if let Some(mode) = crate::manifest::parse_octal_mode(mode) {
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(u32::from(mode)));
    }
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: &str) {}

/// Delete extracted paths of `init`-lifecycle slots after setup completes.
pub fn remove_init_slots(workenv: &Path, init_targets: &[std::path::PathBuf]) {
    for target in init_targets {
        let path = workenv.join(target);
        if !path.exists() {
            continue;
        }
        debug!("removing init slot content {path:?}");
        let result = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        if let Err(e) = result {
            log::warn!("failed to remove init path {path:?}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn package() -> PackageInfo {
        PackageInfo {
            name: "setup-test".to_string(),
            version: "1.0.0".to_string(),
            description: String::new(),
        }
    }

    #[cfg(unix)]
    #[test]
    fn raw_string_command_runs() {
        let dir = tempfile::tempdir().unwrap();
        let commands = vec![Value::String(format!(
            "touch {}/created-by-setup",
            dir.path().display()
        ))];

        run_setup_commands(&commands, dir.path(), &package(), &HashMap::new()).unwrap();
        assert!(dir.path().join("created-by-setup").exists());
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let commands = vec![Value::String("false".to_string())];
        assert!(
            run_setup_commands(&commands, dir.path(), &package(), &HashMap::new()).is_err()
        );
    }

    #[test]
    fn write_file_materializes_with_substitution() {
        let dir = tempfile::tempdir().unwrap();
        let commands = vec![serde_json::json!({
            "type": "write_file",
            "path": "{workenv}/etc/app.conf",
            "content": "name={package_name} version={version}\n",
            "mode": "0600"
        })];

        run_setup_commands(&commands, dir.path(), &package(), &HashMap::new()).unwrap();

        let content = fs::read_to_string(dir.path().join("etc/app.conf")).unwrap();
        assert_eq!(content, "name=setup-test version=1.0.0\n");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(dir.path().join("etc/app.conf"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[cfg(unix)]
    #[test]
    fn enumerate_and_execute_expands_matches() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("pkgs")).unwrap();
        fs::write(dir.path().join("pkgs/a.whl"), b"").unwrap();
        fs::write(dir.path().join("pkgs/b.whl"), b"").unwrap();
        fs::write(dir.path().join("pkgs/ignore.txt"), b"").unwrap();

        let log = dir.path().join("seen.log");
        let commands = vec![serde_json::json!({
            "type": "enumerate_and_execute",
            "command": format!("sh -c 'echo \"$0\" >> {}'", log.display()),
            "enumerate": {"path": "{workenv}/pkgs", "pattern": "*.whl"}
        })];

        run_setup_commands(&commands, dir.path(), &package(), &HashMap::new()).unwrap();

        let seen = fs::read_to_string(&log).unwrap();
        assert_eq!(seen.lines().count(), 2);
        assert!(seen.contains("a.whl"));
        assert!(!seen.contains("ignore.txt"));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let commands = vec![serde_json::json!({"type": "format_disk"})];
        let err =
            run_setup_commands(&commands, dir.path(), &package(), &HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("format_disk"));
    }

    #[test]
    fn init_slot_paths_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("seed.bin"), b"x").unwrap();
        fs::create_dir_all(dir.path().join("keep")).unwrap();

        remove_init_slots(dir.path(), &[std::path::PathBuf::from("seed.bin")]);

        assert!(!dir.path().join("seed.bin").exists());
        assert!(dir.path().join("keep").exists());
    }
}
