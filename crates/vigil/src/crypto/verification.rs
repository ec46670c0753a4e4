//! Ed25519 signature verification.
//!
//! Verification never fails loudly: a malformed key or signature is simply
//! an invalid attestation.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use super::keys::decode_public_key;

/// Verify an Ed25519 signature over raw bytes.
pub fn verify_signature(data: &[u8], signature_bytes: &[u8], verifying_key: &VerifyingKey) -> bool {
    let Ok(sig_arr) = <[u8; 64]>::try_from(signature_bytes) else {
        return false;
    };
    let signature = Signature::from_bytes(&sig_arr);

    verifying_key.verify(data, &signature).is_ok()
}

/// Verify a base64 `signedMessage` over `message` for a hex encoded public key.
pub fn verify(message: &str, public_key_hex: &str, signature_b64: &str) -> bool {
    let Some(verifying_key) = decode_public_key(public_key_hex) else {
        return false;
    };
    let Ok(signature_bytes) = STANDARD.decode(signature_b64.trim()) else {
        return false;
    };

    verify_signature(message.as_bytes(), &signature_bytes, &verifying_key)
}
