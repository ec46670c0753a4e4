//! Protocol type definitions for Vigil.

use serde::{Deserialize, Serialize};

/// Outcome reported by a validator for one check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckStatus {
    Good,
    Bad,
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckStatus::Good => write!(f, "Good"),
            CheckStatus::Bad => write!(f, "Bad"),
        }
    }
}

impl std::str::FromStr for CheckStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Good" => Ok(CheckStatus::Good),
            "Bad" => Ok(CheckStatus::Bad),
            other => Err(format!("unknown check status: {other}")),
        }
    }
}

/// Registration request sent by a validator right after connecting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    /// Validator chosen id echoed back in the reply
    pub callback_id: String,

    /// Address the validator reports for itself
    pub ip: String,

    /// Hex encoded Ed25519 public key
    pub public_key: String,

    /// Signature over `"Signed message for {callbackId}, {publicKey}"`
    pub signed_message: String,
}

/// Hub answer to a verified signup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupReply {
    pub validator_id: String,
    pub callback_id: String,
}

/// Check request sent by the hub
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateRequest {
    pub url: String,
    pub callback_id: String,
}

/// Check result sent back by a validator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateReply {
    pub validator_id: String,

    /// Correlation id of the request being answered
    pub callback_id: String,

    pub status: CheckStatus,

    /// Observed latency in milliseconds
    pub latency: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    /// Signature over `"Replying to {callbackId}"`
    pub signed_message: String,
}

impl ValidateReply {
    /// Latency clamped to whole, non-negative milliseconds.
    pub fn latency_ms(&self) -> u64 {
        if self.latency.is_finite() && self.latency > 0.0 {
            self.latency.round() as u64
        } else {
            0
        }
    }
}

/// Messages travelling from a validator to the hub
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum ValidatorMessage {
    Signup(SignupRequest),
    Validate(ValidateReply),
}

/// Messages travelling from the hub to a validator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum HubMessage {
    Signup(SignupReply),
    Validate(ValidateRequest),
}
