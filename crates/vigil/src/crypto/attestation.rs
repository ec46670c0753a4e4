//! Challenge strings signed by validators.
//!
//! Every challenge embeds the correlation id of the exchange it answers, so
//! a signature can never be replayed against another request.

/// Message a validator signs when registering.
pub fn signup_message(callback_id: &str, public_key_hex: &str) -> String {
    format!("Signed message for {callback_id}, {public_key_hex}")
}

/// Message a validator signs when answering a check request.
pub fn reply_message(callback_id: &str) -> String {
    format!("Replying to {callback_id}")
}
