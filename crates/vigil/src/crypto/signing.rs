//! Ed25519 signing operations.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::Signer;

use super::keys::KeyPair;

/// Sign raw bytes with a keypair. Returns 64-byte Ed25519 signature.
pub fn sign_bytes(data: &[u8], keypair: &KeyPair) -> Vec<u8> {
    let signature = keypair.signing_key.sign(data);
    signature.to_bytes().to_vec()
}

/// Sign a challenge string and encode the signature the way it travels in
/// `signedMessage` fields (standard base64).
pub fn sign_message(message: &str, keypair: &KeyPair) -> String {
    STANDARD.encode(sign_bytes(message.as_bytes(), keypair))
}
