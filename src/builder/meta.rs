//! Metadata document creation for the builder.

use super::BuildOptions;
use super::slots::ProcessedSlot;
use crate::error::Result;
use crate::format::checksum::sha256_hex;
use crate::manifest::BuildManifest;
use crate::metadata::{
    BuildInfo, CacheValidationInfo, CompatibilityInfo, ExecutionInfo, IntegritySealInfo,
    LauncherInfo, Metadata, PackageInfo, PlatformInfo, RuntimeInfo, VerificationInfo, WorkenvInfo,
};
use std::path::PathBuf;

/// Build timestamp and host identification. `SOURCE_DATE_EPOCH` pins the
/// timestamp and drops the hostname for reproducible builds.
fn build_stamp() -> (String, String) {
    if let Ok(epoch) = std::env::var("SOURCE_DATE_EPOCH") {
        let timestamp = epoch
            .parse::<i64>()
            .ok()
            .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| chrono::Utc::now().to_rfc3339());
        (
            timestamp,
            format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH),
        )
    } else {
        let hostname = gethostname::gethostname().to_string_lossy().to_string();
        (
            chrono::Utc::now().to_rfc3339(),
            format!(
                "{}/{} {hostname}",
                std::env::consts::OS,
                std::env::consts::ARCH
            ),
        )
    }
}

/// Assemble the metadata document from the manifest and processed slots.
pub(super) fn create_document(
    manifest: &BuildManifest,
    slots: &[ProcessedSlot],
    launcher_size: u64,
    launcher_data: &[u8],
    options: &BuildOptions,
) -> Result<Metadata> {
    let (timestamp, host) = build_stamp();

    let launcher_tool = options
        .launcher_bin
        .clone()
        .or_else(|| std::env::var("FLAVOR_LAUNCHER_BIN").ok().map(PathBuf::from))
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "unknown".to_string());

    Ok(Metadata {
        format: "PSPF/2025".to_string(),
        format_version: Some("1.0.0".to_string()),
        package: PackageInfo {
            name: manifest.package.name.clone(),
            version: manifest.package.version.clone(),
            description: manifest.package.description.clone(),
        },
        slots: slots.iter().map(|s| s.entry.clone()).collect(),
        execution: ExecutionInfo {
            primary_slot: 0,
            command: manifest.execution.command.clone(),
            environment: manifest.execution.environment.clone(),
        },
        runtime: manifest
            .runtime
            .as_ref()
            .and_then(|v| serde_json::from_value::<RuntimeInfo>(v.clone()).ok()),
        cache_validation: manifest
            .cache_validation
            .as_ref()
            .and_then(|v| serde_json::from_value::<CacheValidationInfo>(v.clone()).ok()),
        setup_commands: manifest.setup_commands.clone(),
        verification: Some(VerificationInfo {
            integrity_seal: IntegritySealInfo {
                required: true,
                algorithm: "ed25519".to_string(),
            },
            signed: true,
            require_verification: true,
        }),
        build: Some(BuildInfo {
            tool: "flavorpack".to_string(),
            tool_version: env!("FLAVOR_VERSION").to_string(),
            timestamp,
            deterministic: options.key_seed.is_some(),
            platform: PlatformInfo {
                os: std::env::consts::OS.to_string(),
                arch: std::env::consts::ARCH.to_string(),
                host,
            },
        }),
        launcher: Some(LauncherInfo {
            tool: launcher_tool,
            size: launcher_size,
            checksum: sha256_hex(launcher_data),
        }),
        compatibility: Some(CompatibilityInfo {
            min_format_version: "1.0.0".to_string(),
            features: vec![],
        }),
        workenv: manifest
            .workenv
            .as_ref()
            .and_then(|v| serde_json::from_value::<WorkenvInfo>(v.clone()).ok()),
    })
}
