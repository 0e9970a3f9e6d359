//! Target-command construction and process handover.
//!
//! The execution command is split with shell-aware quoting, placeholders
//! are substituted (`{slot:N}` resolving to absolute workenv paths), the
//! executable is resolved through PATH, and control passes to the payload:
//! exec-replace on POSIX, spawn-and-wait on Windows or when requested.

use crate::config::{ExecMode, RuntimeConfig};
use crate::error::{FlavorError, Result};
use crate::metadata::{Metadata, PackageInfo};
use log::{debug, info};
use std::collections::HashMap;
use std::path::Path;
use std::process::Command;

/// Split a command line honoring single quotes, double quotes, and
/// backslash escapes (outside single quotes).
pub fn shell_split(line: &str) -> std::result::Result<Vec<String>, String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(inner) => current.push(inner),
                        None => return Err("unterminated single quote".to_string()),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped @ ('"' | '\\' | '$' | '`')) => current.push(escaped),
                            Some(other) => {
                                current.push('\\');
                                current.push(other);
                            }
                            None => return Err("trailing backslash in quotes".to_string()),
                        },
                        Some(inner) => current.push(inner),
                        None => return Err("unterminated double quote".to_string()),
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(escaped) => current.push(escaped),
                    None => return Err("trailing backslash".to_string()),
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    parts.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            other => {
                in_word = true;
                current.push(other);
            }
        }
    }

    if in_word {
        parts.push(current);
    }
    Ok(parts)
}

/// Substitute `{workenv}`, `{package_name}`, and `{version}`.
pub fn substitute_basic(text: &str, workenv: &Path, package: &PackageInfo) -> String {
    text.replace("{workenv}", &workenv.to_string_lossy())
        .replace("{package_name}", &package.name)
        .replace("{version}", &package.version)
}

/// Substitute `{slot:N}` references against the slot table. Any reference
/// that cannot be resolved is fatal.
pub fn substitute_slots(text: &str, metadata: &Metadata, workenv: &Path) -> Result<String> {
    let mut result = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("{slot:") {
        result.push_str(&rest[..start]);
        let tail = &rest[start + "{slot:".len()..];
        let Some(end) = tail.find('}') else {
            return Err(FlavorError::Launch(format!(
                "malformed slot reference in '{text}'"
            )));
        };

        let index: usize = tail[..end]
            .parse()
            .map_err(|_| FlavorError::Launch(format!("malformed slot reference in '{text}'")))?;

        let entry = metadata
            .slots
            .get(index)
            .ok_or(FlavorError::MissingSlotReference(index))?;

        let target = entry.target.trim_end_matches('/');
        let resolved = if target.is_empty() || target == "{workenv}" {
            workenv.to_path_buf()
        } else {
            let stripped = target
                .strip_prefix("{workenv}/")
                .unwrap_or(target)
                .trim_start_matches('/');
            workenv.join(stripped)
        };

        result.push_str(&resolved.to_string_lossy());
        rest = &tail[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

/// Resolve an executable name through PATH; absolute paths that do not
/// exist fall back to basename resolution.
pub fn resolve_executable(executable: &str) -> String {
    if Path::new(executable).is_absolute() && Path::new(executable).exists() {
        return executable.to_string();
    }

    let name = if executable.starts_with('/') {
        executable.rsplit('/').next().unwrap_or(executable)
    } else {
        executable
    };

    match which::which(name) {
        Ok(path) => path.to_string_lossy().into_owned(),
        Err(_) => name.to_string(),
    }
}

/// A fully prepared payload invocation.
#[derive(Debug)]
pub struct PreparedCommand {
    pub executable: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    /// argv[0] for the child: basename of the original invocation
    pub argv0: String,
}

/// Build the payload command from the execution spec plus caller args.
pub fn prepare(
    metadata: &Metadata,
    workenv: &Path,
    package_path: &Path,
    extra_args: &[String],
    env: HashMap<String, String>,
) -> Result<PreparedCommand> {
    let command = substitute_basic(&metadata.execution.command, workenv, &metadata.package);
    let command = substitute_slots(&command, metadata, workenv)?;

    let mut parts = shell_split(&command)
        .map_err(|e| FlavorError::Launch(format!("bad execution command '{command}': {e}")))?;
    if parts.is_empty() {
        return Err(FlavorError::Launch("empty execution command".to_string()));
    }

    let executable = resolve_executable(&parts.remove(0));
    parts.extend_from_slice(extra_args);

    let argv0 = package_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| executable.clone());

    debug!("prepared command: {executable} {parts:?}");
    Ok(PreparedCommand {
        executable,
        args: parts,
        env,
        argv0,
    })
}

/// Hand control to the payload. On POSIX with exec mode this replaces the
/// process and only returns on failure; otherwise the child is spawned,
/// termination signals are forwarded, and its exit status is returned.
pub fn handover(prepared: PreparedCommand, config: &RuntimeConfig) -> Result<i32> {
    #[cfg(unix)]
    if config.exec_mode == ExecMode::Exec {
        use std::os::unix::process::CommandExt;

        info!("exec-replacing with {}", prepared.executable);
        let mut cmd = Command::new(&prepared.executable);
        cmd.args(&prepared.args);
        cmd.env_clear();
        cmd.envs(&prepared.env);
        cmd.arg0(&prepared.argv0);

        let err = cmd.exec();
        return Err(FlavorError::CommandSpawnFailed(
            prepared.executable,
            err.to_string(),
        ));
    }

    spawn_and_wait(prepared, config)
}

fn spawn_and_wait(prepared: PreparedCommand, _config: &RuntimeConfig) -> Result<i32> {
    info!("spawning {}", prepared.executable);

    let mut cmd = Command::new(&prepared.executable);
    cmd.args(&prepared.args);
    cmd.env_clear();
    cmd.envs(&prepared.env);

    let mut child = cmd
        .spawn()
        .map_err(|e| FlavorError::CommandSpawnFailed(prepared.executable.clone(), e.to_string()))?;

    forward_signals(child.id());

    let status = child.wait()?;
    Ok(exit_status_code(&status))
}

fn exit_status_code(status: &std::process::ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    status.code().unwrap_or(1)
}

/// Forward SIGINT/SIGTERM to the child in spawn mode so Ctrl-C reaches
/// the payload rather than orphaning it.
#[cfg(unix)]
#[allow(unsafe_code)] // kill(2) to relay the signal
fn forward_signals(child_pid: u32) {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    crate::CHILD_PID.store(child_pid, std::sync::atomic::Ordering::SeqCst);

    let Ok(mut signals) = Signals::new([SIGINT, SIGTERM]) else {
        return;
    };
    std::thread::spawn(move || {
        for signal in signals.forever() {
            let pid = crate::CHILD_PID.load(std::sync::atomic::Ordering::SeqCst);
            if pid != 0 {
                unsafe {
                    libc::kill(pid as libc::pid_t, signal);
                }
            }
        }
    });
}

#[cfg(not(unix))]
fn forward_signals(_child_pid: u32) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{ExecutionInfo, SlotEntry};

    fn metadata_with_slots(targets: &[&str], command: &str) -> Metadata {
        Metadata {
            format: "PSPF/2025".to_string(),
            format_version: None,
            package: PackageInfo {
                name: "cmdtest".to_string(),
                version: "0.9.0".to_string(),
                description: String::new(),
            },
            slots: targets
                .iter()
                .enumerate()
                .map(|(i, target)| SlotEntry {
                    slot: i,
                    id: format!("s{i}"),
                    source: "x".to_string(),
                    target: (*target).to_string(),
                    size: 1,
                    checksum: String::new(),
                    operations: "raw".to_string(),
                    purpose: "data".to_string(),
                    lifecycle: "runtime".to_string(),
                    resolution: None,
                    permissions: None,
                    self_ref: None,
                })
                .collect(),
            execution: ExecutionInfo {
                primary_slot: 0,
                command: command.to_string(),
                environment: HashMap::new(),
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

    #[test]
    fn shell_split_handles_quotes() {
        assert_eq!(
            shell_split("prog arg1 arg2").unwrap(),
            vec!["prog", "arg1", "arg2"]
        );
        assert_eq!(
            shell_split(r#"prog "two words" 'single quoted'"#).unwrap(),
            vec!["prog", "two words", "single quoted"]
        );
        assert_eq!(
            shell_split(r#"prog arg\ with\ spaces"#).unwrap(),
            vec!["prog", "arg with spaces"]
        );
        assert_eq!(
            shell_split(r#"echo "nested \"quote\"""#).unwrap(),
            vec!["echo", r#"nested "quote""#]
        );
    }

    #[test]
    fn shell_split_rejects_unterminated_quotes() {
        assert!(shell_split("prog 'oops").is_err());
        assert!(shell_split(r#"prog "oops"#).is_err());
    }

    #[test]
    fn shell_split_keeps_empty_quoted_arg() {
        assert_eq!(shell_split(r#"prog """#).unwrap(), vec!["prog", ""]);
    }

    #[test]
    fn slot_references_resolve_to_workenv_paths() {
        let metadata = metadata_with_slots(
            &["bin/run", "{workenv}/data/input.txt"],
            "{workenv}/bin/run {slot:1}",
        );
        let out =
            substitute_slots("{slot:0} {slot:1}", &metadata, Path::new("/we")).unwrap();
        assert_eq!(out, "/we/bin/run /we/data/input.txt");
    }

    #[test]
    fn unresolved_slot_reference_is_fatal() {
        let metadata = metadata_with_slots(&["bin/run"], "run");
        assert!(matches!(
            substitute_slots("{slot:7}", &metadata, Path::new("/we")),
            Err(FlavorError::MissingSlotReference(7))
        ));
    }

    #[test]
    fn malformed_slot_reference_is_fatal() {
        let metadata = metadata_with_slots(&[], "run");
        assert!(substitute_slots("{slot:x}", &metadata, Path::new("/we")).is_err());
        assert!(substitute_slots("{slot:", &metadata, Path::new("/we")).is_err());
    }

    #[test]
    fn prepare_appends_caller_args_and_sets_argv0() {
        let metadata = metadata_with_slots(&["data/in"], "{workenv}/bin/tool --flag {slot:0}");
        let prepared = prepare(
            &metadata,
            Path::new("/we"),
            Path::new("/opt/tool.psp"),
            &["extra".to_string()],
            HashMap::new(),
        )
        .unwrap();

        assert!(prepared.executable.ends_with("tool"));
        assert_eq!(prepared.args, vec!["--flag", "/we/data/in", "extra"]);
        assert_eq!(prepared.argv0, "tool.psp");
    }

    #[test]
    fn empty_command_is_rejected() {
        let metadata = metadata_with_slots(&[], "");
        assert!(
            prepare(
                &metadata,
                Path::new("/we"),
                Path::new("/p.psp"),
                &[],
                HashMap::new()
            )
            .is_err()
        );
    }

    #[cfg(unix)]
    #[test]
    fn spawn_mode_returns_child_status() {
        let metadata = metadata_with_slots(&[], "sh -c 'exit 7'");
        let mut env: HashMap<String, String> = std::env::vars().collect();
        env.insert("X".to_string(), "y".to_string());
        let prepared = prepare(
            &metadata,
            Path::new("/tmp"),
            Path::new("/tmp/x.psp"),
            &[],
            env,
        )
        .unwrap();

        let config = RuntimeConfig {
            exec_mode: ExecMode::Spawn,
            ..RuntimeConfig::default()
        };
        assert_eq!(handover(prepared, &config).unwrap(), 7);
    }

    #[test]
    fn resolve_falls_back_to_basename() {
        // An absolute path that does not exist resolves via basename
        let resolved = resolve_executable("/definitely/not/here/sh");
        assert!(resolved.ends_with("sh"));
    }
}
