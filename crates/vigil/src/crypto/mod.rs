//! Cryptographic operations for Vigil.
//!
//! - Ed25519 key generation and persistence
//! - Signing and verification of protocol challenge strings
//! - The challenge string builders shared by hub and agents

pub mod attestation;
pub mod keys;
pub mod signing;
pub mod verification;

pub use attestation::{reply_message, signup_message};
pub use keys::{
    decode_public_key, generate_keypair, load_keypair, load_or_generate_keypair, save_keypair,
    KeyPair,
};
pub use signing::{sign_bytes, sign_message};
pub use verification::{verify, verify_signature};
