//! Builder input types: the manifest a package is assembled from.

use crate::error::{FlavorError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Marker in a slot's `source` declaring a self-referential slot.
pub const SELF_REF_MARKER: &str = "$SELF";

/// The build manifest.
#[derive(Debug, Serialize, Deserialize)]
pub struct BuildManifest {
    pub package: ManifestPackage,
    pub execution: ManifestExecution,
    pub slots: Vec<SlotInput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_validation: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workenv: Option<Value>,
    #[serde(default)]
    pub setup_commands: Vec<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ManifestPackage {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ManifestExecution {
    pub command: String,
    #[serde(default)]
    pub environment: HashMap<String, String>,
}

/// One slot declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotInput {
    /// Optional position validator; must equal the array index when given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
    pub id: String,
    /// Source path, or `$SELF` for a self-referential slot
    pub source: String,
    /// Destination path relative to the workenv
    pub target: String,
    #[serde(default)]
    pub operations: String,
    #[serde(default = "default_purpose")]
    pub purpose: String,
    #[serde(default = "default_lifecycle")]
    pub lifecycle: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    /// Octal mode string, e.g. `"0755"`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
}

fn default_purpose() -> String {
    "data".to_string()
}

fn default_lifecycle() -> String {
    "runtime".to_string()
}

impl SlotInput {
    /// True when this slot carries no bytes of its own.
    pub fn is_self_referential(&self) -> bool {
        self.source == SELF_REF_MARKER
    }

    /// Parse the octal permission string, falling back to the given default.
    pub fn mode_or(&self, default: u16) -> u16 {
        self.permissions
            .as_deref()
            .and_then(parse_octal_mode)
            .unwrap_or(default)
    }
}

/// Parse an octal mode string like `"0755"` or `"755"`.
pub fn parse_octal_mode(s: &str) -> Option<u16> {
    let trimmed = s.trim().trim_start_matches("0o");
    if trimmed.is_empty() {
        return None;
    }
    u16::from_str_radix(trimmed, 8).ok()
}

impl BuildManifest {
    /// Read and validate a manifest file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path).map_err(|e| {
            FlavorError::Build(format!("failed to read manifest '{}': {e}", path.display()))
        })?;
        let manifest: BuildManifest = serde_json::from_str(&data)
            .map_err(|e| FlavorError::Build(format!("failed to parse manifest: {e}")))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Structural validation of slot declarations.
    pub fn validate(&self) -> Result<()> {
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.id.is_empty() {
                return Err(FlavorError::Build(format!("slot {i}: empty id")));
            }
            if slot.source.is_empty() {
                return Err(FlavorError::Build(format!(
                    "slot {i} ('{}'): empty source",
                    slot.id
                )));
            }
            if slot.target.is_empty() {
                return Err(FlavorError::Build(format!(
                    "slot {i} ('{}'): empty target",
                    slot.id
                )));
            }
            if let Some(position) = slot.position {
                if position as usize != i {
                    return Err(FlavorError::Build(format!(
                        "slot '{}': declared position {position} does not match index {i}",
                        slot.id
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_manifest(slots: &str) -> String {
        format!(
            r#"{{
              "package": {{"name": "demo", "version": "0.1.0"}},
              "execution": {{"command": "{{workenv}}/bin/demo"}},
              "slots": {slots}
            }}"#
        )
    }

    fn load_str(json: &str) -> Result<BuildManifest> {
        let manifest: BuildManifest =
            serde_json::from_str(json).map_err(|e| FlavorError::Build(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    #[test]
    fn minimal_manifest_parses() {
        let manifest = load_str(&minimal_manifest(
            r#"[{"id": "bin", "source": "demo", "target": "bin/demo"}]"#,
        ))
        .unwrap();
        assert_eq!(manifest.slots.len(), 1);
        assert_eq!(manifest.slots[0].purpose, "data");
        assert_eq!(manifest.slots[0].lifecycle, "runtime");
    }

    #[test]
    fn position_mismatch_is_rejected() {
        let err = load_str(&minimal_manifest(
            r#"[{"position": 1, "id": "bin", "source": "demo", "target": "bin/demo"}]"#,
        ))
        .unwrap_err();
        assert!(err.to_string().contains("position"));
    }

    #[test]
    fn empty_target_is_rejected() {
        assert!(
            load_str(&minimal_manifest(
                r#"[{"id": "bin", "source": "demo", "target": ""}]"#
            ))
            .is_err()
        );
    }

    #[test]
    fn self_ref_marker_is_detected() {
        let manifest = load_str(&minimal_manifest(
            r#"[{"id": "self", "source": "$SELF", "target": "self"}]"#,
        ))
        .unwrap();
        assert!(manifest.slots[0].is_self_referential());
    }

    #[test]
    fn octal_modes_parse() {
        assert_eq!(parse_octal_mode("0755"), Some(0o755));
        assert_eq!(parse_octal_mode("644"), Some(0o644));
        assert_eq!(parse_octal_mode("0o700"), Some(0o700));
        assert_eq!(parse_octal_mode("nope"), None);
    }
}
