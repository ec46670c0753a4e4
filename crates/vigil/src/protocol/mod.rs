//! Protocol module for Vigil.
//!
//! Messages are JSON objects `{ "type": ..., "data": ... }` carried in
//! WebSocket text frames. Each direction has its own sum type so the type
//! discriminator is decoded exactly once, at the transport boundary.

pub mod codec;
pub mod types;

pub use codec::{decode_hub_message, decode_validator_message, encode, ProtocolError};
pub use types::{
    CheckStatus, HubMessage, SignupReply, SignupRequest, ValidateReply, ValidateRequest,
    ValidatorMessage,
};
