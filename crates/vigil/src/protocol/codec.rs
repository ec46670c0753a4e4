//! Text frame encoding for Vigil messages.

use serde::Serialize;
use thiserror::Error;

use super::types::{HubMessage, ValidatorMessage};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Serialize a message into the JSON text sent over the wire.
pub fn encode<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}

/// Decode a frame received by the hub.
pub fn decode_validator_message(text: &str) -> Result<ValidatorMessage, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

/// Decode a frame received by a validator.
pub fn decode_hub_message(text: &str) -> Result<HubMessage, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}
