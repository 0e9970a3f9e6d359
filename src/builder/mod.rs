//! Package assembly: manifest in, polyglot `.psp` file out.

mod meta;
mod slots;
mod writer;

pub use slots::ProcessedSlot;

use crate::error::{FlavorError, Result};
use crate::keys::{self, KeySource};
use crate::manifest::BuildManifest;
use crate::pe;
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};

/// Typed inputs for a build, supplied by the CLI layer.
#[derive(Debug, Default)]
pub struct BuildOptions {
    /// Path to the launcher binary to prefix the package with
    pub launcher_bin: Option<PathBuf>,
    /// PEM private key for the integrity seal
    pub private_key_path: Option<PathBuf>,
    /// PEM public key (derived from the private key when absent)
    pub public_key_path: Option<PathBuf>,
    /// Deterministic key seed; takes precedence over key files
    pub key_seed: Option<String>,
    /// Base directory for `{workenv}` expansion in slot sources
    pub workenv_base: Option<PathBuf>,
    /// Skip the post-build verification pass
    pub skip_verification: bool,
}

/// Build a package from a manifest file.
pub fn build(manifest_path: &Path, output_path: &Path, options: &BuildOptions) -> Result<()> {
    info!("building PSPF/2025 package from {}", manifest_path.display());

    let manifest = BuildManifest::load(manifest_path)?;

    let launcher_data = load_launcher(options)?;
    let wants_resource_mode = pe::wants_resource_embedding(&launcher_data);
    let launcher_data = pe::prepare_launcher(launcher_data)?;
    let launcher_size = launcher_data.len() as u64;
    debug!(
        "launcher prepared: {} bytes, family {}",
        launcher_size,
        pe::launcher_family(&launcher_data).name()
    );

    let key_source = KeySource {
        private_key_path: options.private_key_path.clone(),
        public_key_path: options.public_key_path.clone(),
        seed: options.key_seed.clone(),
    };
    let (signing_key, verifying_key) = keys::resolve(&key_source)?;

    let processed = slots::process_slots(&manifest, options)?;
    let metadata = meta::create_document(&manifest, &processed, launcher_size, &launcher_data, options)?;

    writer::assemble(
        output_path,
        &launcher_data,
        &metadata,
        &signing_key,
        &verifying_key,
        processed,
    )?;

    // Go PE launchers reject trailing data, so the payload moves into the
    // resource section after normal assembly
    if wants_resource_mode {
        if cfg!(windows) {
            info!("converting to PE resource layout (Go launcher)");
            pe::resource::convert_to_resource_layout(output_path, launcher_size)
                .map_err(|e| FlavorError::PeStructureInvalid(format!("{e:#}")))?;
        } else {
            log::warn!(
                "Go PE launcher detected but the resource API is unavailable \
                 on this host; keeping the appended layout"
            );
        }
    }

    // Re-open and verify what was just written. Resource-layout output is
    // exempt: its payload is only reachable through the resource API of
    // the packaged launcher itself.
    if !options.skip_verification && !wants_resource_mode {
        let report = crate::reader::verify::verify(output_path)?;
        if !report.all_passed() {
            return Err(FlavorError::Build(
                "post-build verification failed".to_string(),
            ));
        }
        debug!("post-build verification passed");
    }

    info!(
        "built {} ({} v{}, {} slots)",
        output_path.display(),
        manifest.package.name,
        manifest.package.version,
        manifest.slots.len()
    );

    Ok(())
}

/// Resolve and read the launcher binary. An explicit option wins over the
/// `FLAVOR_LAUNCHER_BIN` environment variable; there is no other fallback.
fn load_launcher(options: &BuildOptions) -> Result<Vec<u8>> {
    let launcher_path = if let Some(ref path) = options.launcher_bin {
        path.clone()
    } else if let Ok(path) = std::env::var("FLAVOR_LAUNCHER_BIN") {
        PathBuf::from(path)
    } else {
        return Err(FlavorError::Build(
            "launcher binary must be given via --launcher-bin or FLAVOR_LAUNCHER_BIN".to_string(),
        ));
    };

    info!("loading launcher: {}", launcher_path.display());

    // Best-effort version probe, purely informational
    if let Ok(output) = std::process::Command::new(&launcher_path)
        .arg("--version")
        .output()
    {
        let version = String::from_utf8_lossy(&output.stdout);
        let version = version.trim();
        if !version.is_empty() {
            info!("launcher reports version: {version}");
        }
    }

    fs::read(&launcher_path).map_err(|e| {
        FlavorError::Build(format!(
            "failed to read launcher '{}': {e}",
            launcher_path.display()
        ))
    })
}
