use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use vigil::crypto::signup_message;
use vigil::{HubMessage, SignupReply, SignupRequest};

use super::registry::{ConnectionId, TransportHandle, ValidatorRegistry};
use crate::database::Store;
use crate::database::models::ValidatorRecord;

/// Validator join and leave
pub struct SessionManager {
    registry: Arc<ValidatorRegistry>,
    store: Arc<dyn Store>,
}

impl SessionManager {
    pub fn new(registry: Arc<ValidatorRegistry>, store: Arc<dyn Store>) -> Self {
        Self { registry, store }
    }

    /// Verify a signup and register the validator behind `transport`.
    ///
    /// Returns `None` when the attestation does not verify; nothing is
    /// registered and no reply is sent in that case.
    pub async fn handle_signup(&self, transport: &TransportHandle, signup: SignupRequest) -> Option<Uuid> {
        let message = signup_message(&signup.callback_id, &signup.public_key);
        if !vigil::verify(&message, &signup.public_key, &signup.signed_message) {
            debug!(connection = %transport.connection(), "Dropping signup with invalid signature");
            return None;
        }

        let public_key = signup.public_key.trim().to_ascii_lowercase();
        let registration = self.registry.register(&public_key, &signup.ip, transport.clone()).await;
        let validator_id = registration.validator_id;

        let record = ValidatorRecord {
            uuid: validator_id,
            public_key,
            ip: signup.ip.clone(),
            pending_credit: 0,
            registered_at: Utc::now(),
        };
        if let Err(e) = self.store.upsert_validator(&record).await {
            error!("Failed to persist validator {validator_id}: {e:#}");
        }

        if registration.new_identity {
            info!(validator = %validator_id, ip = %signup.ip, "New validator registered");
        } else {
            info!(validator = %validator_id, ip = %signup.ip, "Validator reconnected");
        }

        let reply = HubMessage::Signup(SignupReply {
            validator_id: validator_id.to_string(),
            callback_id: signup.callback_id,
        });
        if let Err(e) = transport.send(reply).await {
            warn!(validator = %validator_id, "Could not acknowledge signup: {e}");
        }

        Some(validator_id)
    }

    /// Forget every session bound to a closed connection
    pub async fn handle_close(&self, connection: ConnectionId) -> Vec<Uuid> {
        let departed = self.registry.deregister(connection).await;
        if departed.is_empty() {
            debug!(%connection, "Connection closed without a live session");
        }
        for id in &departed {
            info!(validator = %id, %connection, "Validator disconnected");
        }
        departed
    }
}
