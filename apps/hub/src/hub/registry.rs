//! Connected validator sessions.
//!
//! A public key maps to at most one live session. Identities outlive their
//! sessions so a validator that reconnects gets its original id back.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;
use vigil::HubMessage;

use crate::error::HubError;

/// Identifies one accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Sending half of a validator connection
#[derive(Debug, Clone)]
pub struct TransportHandle {
    connection: ConnectionId,
    tx: mpsc::Sender<HubMessage>,
}

impl TransportHandle {
    pub fn new(connection: ConnectionId, tx: mpsc::Sender<HubMessage>) -> Self {
        Self { connection, tx }
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Queue a message, waiting for buffer space
    pub async fn send(&self, message: HubMessage) -> Result<(), HubError> {
        self.tx.send(message).await.map_err(|_| HubError::TransportClosed)
    }

    /// Queue a message without waiting; a full buffer is reported, not awaited
    pub fn try_send(&self, message: HubMessage) -> Result<(), HubError> {
        self.tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => HubError::TransportFull,
            mpsc::error::TrySendError::Closed(_) => HubError::TransportClosed,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ValidatorSession {
    pub validator_id: Uuid,
    pub public_key: String,
    pub ip: String,
    pub transport: TransportHandle,
    pub registered_at: DateTime<Utc>,
}

/// Result of a registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub validator_id: Uuid,
    /// True when the public key had never been seen before
    pub new_identity: bool,
}

#[derive(Default)]
struct RegistryState {
    /// Live sessions in registration order
    sessions: Vec<ValidatorSession>,
    /// public key -> validator id, kept across disconnects
    identities: HashMap<String, Uuid>,
}

#[derive(Default)]
pub struct ValidatorRegistry {
    state: RwLock<RegistryState>,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that already knows the given `(public_key, validator_id)` pairs
    pub fn with_identities(identities: impl IntoIterator<Item = (String, Uuid)>) -> Self {
        Self {
            state: RwLock::new(RegistryState {
                sessions: Vec::new(),
                identities: identities.into_iter().collect(),
            }),
        }
    }

    /// Register a session for `public_key`.
    ///
    /// A known key keeps its id; if it already has a live session, that
    /// session's transport is replaced in place.
    pub async fn register(
        &self,
        public_key: &str,
        ip: &str,
        transport: TransportHandle,
    ) -> Registration {
        let mut state = self.state.write().await;

        let (validator_id, new_identity) = match state.identities.get(public_key) {
            Some(id) => (*id, false),
            None => {
                let id = Uuid::new_v4();
                state.identities.insert(public_key.to_string(), id);
                (id, true)
            }
        };

        if let Some(session) = state.sessions.iter_mut().find(|s| s.public_key == public_key) {
            session.transport = transport;
            session.ip = ip.to_string();
        } else {
            state.sessions.push(ValidatorSession {
                validator_id,
                public_key: public_key.to_string(),
                ip: ip.to_string(),
                transport,
                registered_at: Utc::now(),
            });
        }

        Registration { validator_id, new_identity }
    }

    /// Remove every session currently bound to `connection` and return the
    /// validators that left. A connection may carry several keys.
    pub async fn deregister(&self, connection: ConnectionId) -> Vec<Uuid> {
        let mut state = self.state.write().await;
        let mut departed = Vec::new();
        state.sessions.retain(|s| {
            let bound = s.transport.connection() == connection;
            if bound {
                departed.push(s.validator_id);
            }
            !bound
        });
        departed
    }

    /// Snapshot of live sessions in registration order
    pub async fn list_active(&self) -> Vec<ValidatorSession> {
        self.state.read().await.sessions.clone()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: u64) -> (TransportHandle, mpsc::Receiver<HubMessage>) {
        let (tx, rx) = mpsc::channel(8);
        (TransportHandle::new(ConnectionId(id), tx), rx)
    }

    #[tokio::test]
    async fn test_same_key_registers_once() {
        let registry = ValidatorRegistry::new();
        let (first, _rx1) = handle(1);
        let (second, _rx2) = handle(2);

        let a = registry.register("key-a", "10.0.0.1", first).await;
        let b = registry.register("key-a", "10.0.0.1", second).await;

        assert_eq!(a.validator_id, b.validator_id);
        assert!(a.new_identity);
        assert!(!b.new_identity);

        let active = registry.list_active().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].transport.connection(), ConnectionId(2));
    }

    #[tokio::test]
    async fn test_stale_close_keeps_replacement_session() {
        let registry = ValidatorRegistry::new();
        let (old, _rx1) = handle(1);
        let (new, _rx2) = handle(2);

        registry.register("key-a", "ip", old).await;
        registry.register("key-a", "ip", new).await;

        assert!(registry.deregister(ConnectionId(1)).await.is_empty());
        assert_eq!(registry.len().await, 1);

        assert_eq!(registry.deregister(ConnectionId(2)).await.len(), 1);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_deregister_is_idempotent() {
        let registry = ValidatorRegistry::new();
        let (conn, _rx) = handle(7);
        registry.register("key-a", "ip", conn).await;

        assert_eq!(registry.deregister(ConnectionId(7)).await.len(), 1);
        assert!(registry.deregister(ConnectionId(7)).await.is_empty());
        assert!(registry.deregister(ConnectionId(99)).await.is_empty());
    }

    #[tokio::test]
    async fn test_close_removes_every_key_on_the_connection() {
        let registry = ValidatorRegistry::new();
        let (shared, _rx) = handle(3);
        let (other, _rx_other) = handle(4);

        let a = registry.register("key-a", "ip", shared.clone()).await.validator_id;
        let b = registry.register("key-b", "ip", shared).await.validator_id;
        registry.register("key-c", "ip", other).await;

        let departed = registry.deregister(ConnectionId(3)).await;
        assert_eq!(departed, vec![a, b]);

        let active = registry.list_active().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].transport.connection(), ConnectionId(4));
    }

    #[tokio::test]
    async fn test_identity_survives_reconnect() {
        let registry = ValidatorRegistry::new();
        let (first, _rx1) = handle(1);
        let id = registry.register("key-a", "ip", first).await.validator_id;
        registry.deregister(ConnectionId(1)).await;

        let (second, _rx2) = handle(2);
        let again = registry.register("key-a", "ip", second).await;
        assert_eq!(again.validator_id, id);
        assert!(!again.new_identity);
    }

    #[tokio::test]
    async fn test_seeded_identities_are_reused() {
        let known = Uuid::new_v4();
        let registry = ValidatorRegistry::with_identities([("key-a".to_string(), known)]);
        let (conn, _rx) = handle(1);

        assert_eq!(registry.register("key-a", "ip", conn).await.validator_id, known);
    }

    #[tokio::test]
    async fn test_list_active_keeps_insertion_order() {
        let registry = ValidatorRegistry::new();
        let mut receivers = Vec::new();
        let mut ids = Vec::new();
        for (n, key) in ["k1", "k2", "k3"].iter().enumerate() {
            let (conn, rx) = handle(n as u64);
            receivers.push(rx);
            ids.push(registry.register(key, "ip", conn).await.validator_id);
        }

        let listed: Vec<Uuid> = registry.list_active().await.iter().map(|s| s.validator_id).collect();
        assert_eq!(listed, ids);
    }
}
