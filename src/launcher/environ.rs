//! Child-environment synthesis.
//!
//! Starting from the inherited environment, `runtime.env` operations apply
//! in a fixed order: pass-pattern analysis, unset, map, set. `pass` names
//! variables (exact or glob) that survive unset and map; `unset "*"`
//! clears everything not passed; `map {A:B}` renames preserving the value;
//! `set` always wins. The workenv env layer and `execution.environment`
//! stack on top, then the launcher's own exports.

use super::command::substitute_basic;
use crate::metadata::{Metadata, PackageInfo, RuntimeEnv};
use glob::Pattern;
use log::{debug, trace};
use std::collections::HashMap;
use std::path::Path;

/// Variables Windows processes cannot initialize without; implicitly
/// appended to the pass set there.
#[cfg(target_os = "windows")]
const WINDOWS_IMPLICIT_PASS: &[&str] = &[
    "SYSTEMROOT", "WINDIR", "TEMP", "TMP", "PATHEXT", "COMSPEC",
];

/// Compiled pass patterns.
struct PassSet {
    exact: Vec<String>,
    globs: Vec<Pattern>,
}

impl PassSet {
    fn compile(patterns: &[String]) -> Self {
        let mut exact = Vec::new();
        let mut globs = Vec::new();

        for pattern in patterns {
            if pattern.contains('*') || pattern.contains('?') {
                match Pattern::new(pattern) {
                    Ok(p) => globs.push(p),
                    Err(_) => exact.push(pattern.clone()),
                }
            } else {
                exact.push(pattern.clone());
            }
        }

        PassSet { exact, globs }
    }

    fn protects(&self, key: &str) -> bool {
        self.exact.iter().any(|e| e == key) || self.globs.iter().any(|g| g.matches(key))
    }
}

/// Apply `runtime.env` operations to an environment map in place.
pub fn apply_runtime_env(env: &mut HashMap<String, String>, runtime_env: &RuntimeEnv) {
    #[cfg(target_os = "windows")]
    let pass_patterns = {
        let mut patterns = runtime_env.pass.clone().unwrap_or_default();
        for var in WINDOWS_IMPLICIT_PASS {
            if !patterns.iter().any(|p| p == var) {
                patterns.push((*var).to_string());
            }
        }
        patterns
    };

    #[cfg(not(target_os = "windows"))]
    let pass_patterns = runtime_env.pass.clone().unwrap_or_default();

    let pass = PassSet::compile(&pass_patterns);

    // unset
    if let Some(ref unset_patterns) = runtime_env.unset {
        for pattern in unset_patterns {
            if pattern == "*" {
                let keys: Vec<String> = env.keys().cloned().collect();
                for key in keys {
                    if !pass.protects(&key) {
                        env.remove(&key);
                        trace!("unset {key}");
                    }
                }
            } else if pattern.contains('*') || pattern.contains('?') {
                if let Ok(glob) = Pattern::new(pattern) {
                    let keys: Vec<String> = env
                        .keys()
                        .filter(|k| glob.matches(k))
                        .cloned()
                        .collect();
                    for key in keys {
                        if !pass.protects(&key) {
                            env.remove(&key);
                            trace!("unset {key} (glob {pattern})");
                        }
                    }
                }
            } else if !pass.protects(pattern) {
                env.remove(pattern);
            }
        }
    }

    // map: rename preserving the value
    if let Some(ref mappings) = runtime_env.map {
        for (old_key, new_key) in mappings {
            if pass.protects(old_key) {
                continue;
            }
            if let Some(value) = env.remove(old_key) {
                debug!("mapped {old_key} -> {new_key}");
                env.insert(new_key.clone(), value);
            }
        }
    }

    // set: exact assignments, always win
    if let Some(ref assignments) = runtime_env.set {
        for (key, value) in assignments {
            env.insert(key.clone(), value.clone());
        }
    }
}

/// Build the complete child environment for the payload process.
pub fn build_child_env(
    metadata: &Metadata,
    workenv: &Path,
    package_path: &Path,
    cache_root: &Path,
) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = std::env::vars().collect();

    // FLAVOR_CACHE pins the host cache before any workenv override of HOME
    // can disturb its derivation
    env.entry("FLAVOR_CACHE".to_string())
        .or_insert_with(|| cache_root.to_string_lossy().into_owned());

    if let Some(ref runtime) = metadata.runtime {
        if let Some(ref runtime_env) = runtime.env {
            apply_runtime_env(&mut env, runtime_env);
        }
    }

    // Workenv layer, placeholder-substituted; never clobbers FLAVOR_CACHE
    if let Some(ref workenv_info) = metadata.workenv {
        if let Some(ref layer) = workenv_info.env {
            for (key, value) in layer {
                if key == "FLAVOR_CACHE" && env.contains_key("FLAVOR_CACHE") {
                    continue;
                }
                env.insert(
                    key.clone(),
                    substitute_basic(value, workenv, &metadata.package),
                );
            }
        }
    }

    // execution.environment applies verbatim
    for (key, value) in &metadata.execution.environment {
        env.insert(key.clone(), value.clone());
    }

    env.insert(
        "FLAVOR_WORKENV".to_string(),
        workenv.to_string_lossy().into_owned(),
    );
    env.insert(
        "FLAVOR_ORIGINAL_COMMAND".to_string(),
        package_path.to_string_lossy().into_owned(),
    );
    env.insert(
        "FLAVOR_COMMAND_NAME".to_string(),
        package_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| package_path.to_string_lossy().into_owned()),
    );

    // {workenv}/bin leads the child's PATH
    let bin = format!("{}/bin", workenv.display());
    let path_value = match env.get("PATH") {
        Some(existing) => format!("{bin}{}{existing}", path_separator()),
        None => bin,
    };
    env.insert("PATH".to_string(), path_value);

    env
}

fn path_separator() -> char {
    if cfg!(windows) { ';' } else { ':' }
}
