//! flavorpack - Progressive Secure Package Format (PSPF/2025)
//!
//! Building, verifying, and launching self-extracting signed packages: a
//! PSPF file is simultaneously a native executable and an indexed archive
//! of data slots sealed by an 8200-byte magic trailer.

#![deny(
    unsafe_code,
    missing_debug_implementations,
    unreachable_pub,
    future_incompatible,
    rust_2018_idioms
)]
#![warn(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::large_enum_variant,
    clippy::wildcard_imports,
    clippy::enum_glob_use
)]

pub mod builder;
pub mod cli;
pub mod config;
pub mod error;
pub mod exit;
pub mod format;
pub mod keys;
pub mod launcher;
pub mod logging;
pub mod manifest;
pub mod metadata;
pub mod ops;
pub mod pe;
pub mod platform;
pub mod reader;
pub mod workenv;

use std::path::Path;
use std::sync::atomic::AtomicU32;

pub use builder::BuildOptions;
pub use config::RuntimeConfig;
pub use error::{FlavorError, Result};

/// Pid of the spawned payload, consulted by the signal-forwarding thread.
pub static CHILD_PID: AtomicU32 = AtomicU32::new(0);

/// Build a package from a manifest.
pub fn build_package(
    manifest_path: &Path,
    output_path: &Path,
    options: &BuildOptions,
) -> Result<()> {
    builder::build(manifest_path, output_path, options)
}

/// Launch a package file with the given extra arguments.
pub fn launch_package(
    package_path: &Path,
    args: &[String],
    config: &RuntimeConfig,
) -> Result<i32> {
    if !format::trailer::is_package(package_path)
        && pe::resource::find_payload_in_self().is_none()
    {
        return Err(FlavorError::InvalidMagic(format!(
            "{} is not a PSPF package",
            package_path.display()
        )));
    }
    launcher::launch(package_path, args, config)
}

/// Verify a package and return the full report.
pub fn verify_package(package_path: &Path) -> Result<reader::verify::VerifyReport> {
    reader::verify::verify(package_path)
}
