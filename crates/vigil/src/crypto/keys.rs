//! Validator identity keys.
//!
//! A validator is identified by an Ed25519 key. On the wire and on disk the
//! key travels as lowercase hex: the public half in the signup message, the
//! secret half in the agent's key file.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use ed25519_dalek::{SigningKey, VerifyingKey};

#[derive(Clone)]
pub struct KeyPair {
    pub signing_key: SigningKey,
    pub verifying_key: VerifyingKey,
}

impl KeyPair {
    pub fn new(signing_key: SigningKey) -> Self {
        let verifying_key = signing_key.verifying_key();
        Self { signing_key, verifying_key }
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Public key in the form validators announce at signup
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key_bytes())
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair").field("public_key", &self.public_key_hex()).finish_non_exhaustive()
    }
}

pub fn generate_keypair() -> KeyPair {
    let secret: [u8; 32] = rand::random();
    KeyPair::new(SigningKey::from_bytes(&secret))
}

/// Parse a hex encoded public key. Anything that is not exactly 32 bytes of
/// hex, or not a point on the curve, yields `None`.
pub fn decode_public_key(public_key_hex: &str) -> Option<VerifyingKey> {
    let bytes: [u8; 32] = hex::decode(public_key_hex.trim()).ok()?.try_into().ok()?;
    VerifyingKey::from_bytes(&bytes).ok()
}

/// Write the secret key as a single line of hex, creating parent
/// directories as needed.
pub fn save_keypair(keypair: &KeyPair, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create key directory {}", parent.display()))?;
    }

    let line = format!("{}\n", hex::encode(keypair.signing_key.to_bytes()));
    fs::write(path, line).with_context(|| format!("Failed to write key file {}", path.display()))?;

    tracing::info!(public_key = %keypair.public_key_hex(), "Saved validator key to {}", path.display());
    Ok(())
}

pub fn load_keypair(path: &Path) -> Result<KeyPair> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read key file {}", path.display()))?;
    let bytes = hex::decode(text.trim()).context("Key file is not valid hex")?;
    let secret: [u8; 32] = bytes
        .try_into()
        .map_err(|b: Vec<u8>| anyhow::anyhow!("Key file holds {} bytes, expected 32", b.len()))?;

    Ok(KeyPair::new(SigningKey::from_bytes(&secret)))
}

/// Load the key at `path`, or create one there on first run
pub fn load_or_generate_keypair(path: &Path) -> Result<KeyPair> {
    if path.exists() {
        return load_keypair(path);
    }

    let keypair = generate_keypair();
    save_keypair(&keypair, path)?;
    Ok(keypair)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_public_key_hex_decodes_to_same_key() {
        let keypair = generate_keypair();
        let decoded = decode_public_key(&keypair.public_key_hex()).unwrap();
        assert_eq!(decoded, keypair.verifying_key);
        assert_eq!(keypair.public_key_hex().len(), 64);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_public_key("not hex").is_none());
        assert!(decode_public_key("abcd").is_none());
        assert!(decode_public_key("").is_none());
        assert!(decode_public_key(&"ab".repeat(33)).is_none());
    }

    #[test]
    fn test_load_or_generate_is_stable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keys/validator.key");

        let first = load_or_generate_keypair(&path).unwrap();
        let second = load_or_generate_keypair(&path).unwrap();

        assert_eq!(first.public_key_bytes(), second.public_key_bytes());
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.trim().len(), 64);
    }

    #[test]
    fn test_load_rejects_short_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.key");
        fs::write(&path, "abcdef\n").unwrap();

        assert!(load_keypair(&path).is_err());
    }

    #[test]
    fn test_debug_hides_secret() {
        let keypair = generate_keypair();
        let rendered = format!("{keypair:?}");
        assert!(rendered.contains(&keypair.public_key_hex()));
        assert!(!rendered.contains(&hex::encode(keypair.signing_key.to_bytes())));
    }
}
