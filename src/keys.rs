//! Ed25519 key material for package signing.
//!
//! Keys come from a PEM file pair, from a deterministic textual seed, or
//! fall back to an ephemeral pair for unsigned throwaway builds.

use crate::error::{FlavorError, Result};
use ed25519_dalek::{SigningKey, VerifyingKey};
use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// Sources a builder can draw its signing key from.
#[derive(Debug, Default)]
pub struct KeySource {
    pub private_key_path: Option<std::path::PathBuf>,
    pub public_key_path: Option<std::path::PathBuf>,
    pub seed: Option<String>,
}

/// Resolve a signing/verifying key pair from the configured source.
pub fn resolve(source: &KeySource) -> Result<(SigningKey, VerifyingKey)> {
    if let Some(ref seed) = source.seed {
        info!("using seed-based key generation");
        return Ok(from_seed(seed));
    }

    if let Some(ref private_path) = source.private_key_path {
        info!("loading signing keys from PEM files");
        return from_pem_files(private_path, source.public_key_path.as_deref());
    }

    warn!("no signing keys provided, generating ephemeral pair");
    Ok(ephemeral())
}

/// Derive a deterministic key pair from a textual seed.
pub fn from_seed(seed: &str) -> (SigningKey, VerifyingKey) {
    let digest: [u8; 32] = Sha256::digest(seed.as_bytes()).into();
    let signing = SigningKey::from_bytes(&digest);
    let verifying = signing.verifying_key();

    debug!(
        "seed-derived key fingerprint: {}",
        &hex::encode(verifying.as_bytes())[..16]
    );
    (signing, verifying)
}

/// Generate a random one-shot key pair.
pub fn ephemeral() -> (SigningKey, VerifyingKey) {
    use rand::RngCore;
    use rand::rngs::OsRng;

    let mut secret = [0u8; 32];
    OsRng.fill_bytes(&mut secret);
    let signing = SigningKey::from_bytes(&secret);
    let verifying = signing.verifying_key();
    (signing, verifying)
}

/// Load a key pair from PEM files. The public key is derived from the
/// private one when no file is given.
pub fn from_pem_files(
    private_path: &Path,
    public_path: Option<&Path>,
) -> Result<(SigningKey, VerifyingKey)> {
    let private_pem = fs::read_to_string(private_path).map_err(|e| {
        FlavorError::Build(format!(
            "failed to read private key '{}': {e}",
            private_path.display()
        ))
    })?;
    let private = pem::parse(&private_pem)
        .map_err(|e| FlavorError::Build(format!("failed to parse private key PEM: {e}")))?;

    let key_bytes = extract_key_bytes(private.tag(), private.contents(), true)?;
    let signing = SigningKey::from_bytes(&key_bytes);

    let verifying = if let Some(public_path) = public_path {
        let public_pem = fs::read_to_string(public_path).map_err(|e| {
            FlavorError::Build(format!(
                "failed to read public key '{}': {e}",
                public_path.display()
            ))
        })?;
        let public = pem::parse(&public_pem)
            .map_err(|e| FlavorError::Build(format!("failed to parse public key PEM: {e}")))?;
        let key_bytes = extract_key_bytes(public.tag(), public.contents(), false)?;
        VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| FlavorError::Build(format!("invalid public key: {e}")))?
    } else {
        signing.verifying_key()
    };

    debug!("loaded signing keys from PEM files");
    Ok((signing, verifying))
}

/// Pull the raw 32 key bytes out of a PEM body, accepting both raw
/// Ed25519 and PKCS#8 wrapping.
fn extract_key_bytes(tag: &str, contents: &[u8], private: bool) -> Result<[u8; 32]> {
    let bytes: &[u8] = match tag {
        "ED25519 PRIVATE KEY" | "ED25519 PUBLIC KEY" => contents,
        "PRIVATE KEY" if private => {
            // PKCS#8 Ed25519: the raw key sits in the trailing 32 bytes
            if contents.len() == 32 {
                contents
            } else if contents.len() >= 48 && contents[0] == 0x30 {
                &contents[contents.len() - 32..]
            } else {
                return Err(FlavorError::Build("invalid private key format".to_string()));
            }
        }
        "PUBLIC KEY" if !private => {
            // SubjectPublicKeyInfo: the raw key sits in the trailing 32 bytes
            if contents.len() == 32 {
                contents
            } else if contents.len() >= 44 && contents[0] == 0x30 {
                &contents[contents.len() - 32..]
            } else {
                return Err(FlavorError::Build("invalid public key format".to_string()));
            }
        }
        other => {
            return Err(FlavorError::Build(format!(
                "unsupported key PEM tag '{other}'"
            )));
        }
    };

    bytes
        .try_into()
        .map_err(|_| FlavorError::Build("key must be exactly 32 bytes".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, Verifier};

    #[test]
    fn seed_derivation_is_deterministic() {
        let (a, _) = from_seed("shared seed");
        let (b, _) = from_seed("shared seed");
        assert_eq!(a.to_bytes(), b.to_bytes());

        let (c, _) = from_seed("other seed");
        assert_ne!(a.to_bytes(), c.to_bytes());
    }

    #[test]
    fn seed_key_signs_and_verifies() {
        let (signing, verifying) = from_seed("sign me");
        let signature = signing.sign(b"message");
        assert!(verifying.verify(b"message", &signature).is_ok());
        assert!(verifying.verify(b"other", &signature).is_err());
    }

    #[test]
    fn ephemeral_pairs_differ() {
        let (a, _) = ephemeral();
        let (b, _) = ephemeral();
        assert_ne!(a.to_bytes(), b.to_bytes());
    }

    #[test]
    fn raw_pem_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (signing, verifying) = from_seed("pem test");

        let private_path = dir.path().join("key.pem");
        let public_path = dir.path().join("key.pub.pem");
        fs::write(
            &private_path,
            pem::encode(&pem::Pem::new("ED25519 PRIVATE KEY", signing.to_bytes().to_vec())),
        )
        .unwrap();
        fs::write(
            &public_path,
            pem::encode(&pem::Pem::new("ED25519 PUBLIC KEY", verifying.to_bytes().to_vec())),
        )
        .unwrap();

        let (loaded, loaded_pub) = from_pem_files(&private_path, Some(&public_path)).unwrap();
        assert_eq!(loaded.to_bytes(), signing.to_bytes());
        assert_eq!(loaded_pub.to_bytes(), verifying.to_bytes());
    }

    #[test]
    fn public_key_derived_when_not_given() {
        let dir = tempfile::tempdir().unwrap();
        let (signing, verifying) = from_seed("derive pub");

        let private_path = dir.path().join("key.pem");
        fs::write(
            &private_path,
            pem::encode(&pem::Pem::new("ED25519 PRIVATE KEY", signing.to_bytes().to_vec())),
        )
        .unwrap();

        let (_, derived) = from_pem_files(&private_path, None).unwrap();
        assert_eq!(derived.to_bytes(), verifying.to_bytes());
    }
}
