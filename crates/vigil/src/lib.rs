//! Vigil - attestation and wire protocol shared by the hub and validator agents
//!
//! This library defines the JSON messages exchanged over a validator's
//! duplex connection and the Ed25519 challenge strings both sides sign.

pub mod crypto;
pub mod protocol;

pub use crypto::{generate_keypair, load_or_generate_keypair, sign_message, verify, KeyPair};
pub use protocol::{
    decode_hub_message, decode_validator_message, encode, CheckStatus, HubMessage,
    ProtocolError, SignupReply, SignupRequest, ValidateReply, ValidateRequest, ValidatorMessage,
};

/// Re-export common error types
pub use anyhow;

/// The version of the Vigil wire protocol
pub const PROTOCOL_VERSION: &str = "1.0";
