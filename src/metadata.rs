//! The package metadata document and its wire codec.
//!
//! The document is canonical UTF-8 JSON (struct field order gives the key
//! order, two-space indentation via pretty serialization). The *uncompressed*
//! JSON is signed with Ed25519; the blob stored in the package is gzipped
//! with deterministic settings, and its SHA-256 goes into the index block.

use crate::error::{FlavorError, Result};
use crate::format::checksum::sha256;
use crate::ops;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Top-level metadata document.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Metadata {
    pub format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format_version: Option<String>,
    pub package: PackageInfo,
    pub slots: Vec<SlotEntry>,
    pub execution: ExecutionInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_validation: Option<CacheValidationInfo>,
    #[serde(default)]
    pub setup_commands: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launcher: Option<LauncherInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compatibility: Option<CompatibilityInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workenv: Option<WorkenvInfo>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PackageInfo {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
}

/// One slot as mirrored into the JSON document.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SlotEntry {
    /// Position validator; equals the slot-table index
    pub slot: usize,
    pub id: String,
    pub source: String,
    /// Destination path relative to the workenv (may use `{workenv}`)
    pub target: String,
    /// Stored (post-operations) size
    pub size: u64,
    /// `sha256:<hex>` of the stored bytes; empty for self-referential slots
    pub checksum: String,
    /// Chain display name, e.g. `tar.gz`
    pub operations: String,
    pub purpose: String,
    pub lifecycle: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub self_ref: Option<bool>,
}

impl SlotEntry {
    /// Parsed operation list for this slot.
    pub fn operation_list(&self) -> Result<Vec<u8>> {
        ops::chain::parse_name(&self.operations)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionInfo {
    pub primary_slot: usize,
    pub command: String,
    #[serde(default)]
    pub environment: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuntimeInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<RuntimeEnv>,
}

/// Environment operations applied in pass → unset → map → set order.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeEnv {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unset: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub set: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheValidationInfo {
    pub check_file: String,
    pub expected_content: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VerificationInfo {
    pub integrity_seal: IntegritySealInfo,
    #[serde(default)]
    pub signed: bool,
    #[serde(default = "default_true")]
    pub require_verification: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IntegritySealInfo {
    pub required: bool,
    pub algorithm: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BuildInfo {
    pub tool: String,
    pub tool_version: String,
    pub timestamp: String,
    #[serde(default)]
    pub deterministic: bool,
    pub platform: PlatformInfo,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlatformInfo {
    pub os: String,
    pub arch: String,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LauncherInfo {
    pub tool: String,
    pub size: u64,
    pub checksum: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompatibilityInfo {
    pub min_format_version: String,
    #[serde(default)]
    pub features: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkenvInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directories: Option<Vec<DirectorySpec>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DirectorySpec {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

/// A metadata document prepared for the wire: signed, compressed, hashed.
#[derive(Debug)]
pub struct EncodedMetadata {
    /// Gzipped canonical JSON as stored in the package body
    pub compressed: Vec<u8>,
    /// SHA-256 of the compressed blob (all 32 bytes)
    pub checksum: [u8; 32],
    /// Ed25519 signature over the *uncompressed* JSON
    pub signature: [u8; 64],
}

/// Serialize the document canonically: stable key order, two-space indent.
pub fn to_canonical_json(metadata: &Metadata) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(metadata)?)
}

/// Sign and compress a metadata document for embedding.
pub fn encode(metadata: &Metadata, signing_key: &SigningKey) -> Result<EncodedMetadata> {
    let json = to_canonical_json(metadata)?;

    let signature: Signature = signing_key.sign(&json);

    let compressed = ops::apply_one(ops::OP_GZIP, &json)?;
    let checksum = sha256(&compressed);

    Ok(EncodedMetadata {
        compressed,
        checksum,
        signature: signature.to_bytes(),
    })
}

/// Decompress and parse a stored metadata blob.
pub fn decode(compressed: &[u8]) -> Result<(Metadata, Vec<u8>)> {
    let json = ops::invert_one(ops::OP_GZIP, compressed)?;
    let metadata: Metadata = serde_json::from_slice(&json)?;
    Ok((metadata, json))
}

/// Verify an integrity signature over uncompressed metadata JSON.
pub fn verify_signature(json: &[u8], signature: &[u8; 64], public_key: &[u8; 32]) -> Result<()> {
    if signature.iter().all(|&b| b == 0) || public_key.iter().all(|&b| b == 0) {
        return Err(FlavorError::NoIntegritySeal);
    }

    let key = VerifyingKey::from_bytes(public_key)
        .map_err(|_| FlavorError::SignatureInvalid)?;
    let signature = Signature::from_bytes(signature);
    key.verify(json, &signature)
        .map_err(|_| FlavorError::SignatureInvalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys;

    fn sample_metadata() -> Metadata {
        Metadata {
            format: "PSPF/2025".to_string(),
            format_version: Some("1.0.0".to_string()),
            package: PackageInfo {
                name: "demo".to_string(),
                version: "1.2.3".to_string(),
                description: "sample".to_string(),
            },
            slots: vec![SlotEntry {
                slot: 0,
                id: "payload".to_string(),
                source: "payload.bin".to_string(),
                target: "data/payload.bin".to_string(),
                size: 42,
                checksum: "sha256:00".to_string(),
                operations: "gzip".to_string(),
                purpose: "data".to_string(),
                lifecycle: "runtime".to_string(),
                resolution: Some("build".to_string()),
                permissions: Some("0644".to_string()),
                self_ref: None,
            }],
            execution: ExecutionInfo {
                primary_slot: 0,
                command: "{workenv}/bin/demo".to_string(),
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
    fn canonical_json_uses_two_space_indent() {
        let json = to_canonical_json(&sample_metadata()).unwrap();
        let text = String::from_utf8(json).unwrap();
        assert!(text.starts_with("{\n  \"format\""));
    }

    #[test]
    fn encode_decode_round_trip() {
        let (signing, _) = keys::from_seed("test seed");
        let metadata = sample_metadata();
        let encoded = encode(&metadata, &signing).unwrap();

        let (decoded, json) = decode(&encoded.compressed).unwrap();
        assert_eq!(decoded.package.name, "demo");
        assert_eq!(json, to_canonical_json(&metadata).unwrap());
    }

    #[test]
    fn signature_verifies_against_uncompressed_json() {
        let (signing, verifying) = keys::from_seed("test seed");
        let metadata = sample_metadata();
        let encoded = encode(&metadata, &signing).unwrap();

        let (_, json) = decode(&encoded.compressed).unwrap();
        verify_signature(&json, &encoded.signature, verifying.as_bytes()).unwrap();
    }

    #[test]
    fn tampered_json_fails_verification() {
        let (signing, verifying) = keys::from_seed("test seed");
        let encoded = encode(&sample_metadata(), &signing).unwrap();

        let (_, mut json) = decode(&encoded.compressed).unwrap();
        json[0] = b'[';
        assert!(matches!(
            verify_signature(&json, &encoded.signature, verifying.as_bytes()),
            Err(FlavorError::SignatureInvalid)
        ));
    }

    #[test]
    fn zero_signature_means_no_seal() {
        assert!(matches!(
            verify_signature(b"{}", &[0u8; 64], &[1u8; 32]),
            Err(FlavorError::NoIntegritySeal)
        ));
    }

    #[test]
    fn checksum_covers_compressed_blob() {
        let (signing, _) = keys::from_seed("seed");
        let encoded = encode(&sample_metadata(), &signing).unwrap();
        assert_eq!(encoded.checksum, sha256(&encoded.compressed));
    }
}
