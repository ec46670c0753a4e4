/// Hub module - the coordination core
///
/// The hub owns every piece of shared protocol state and wires it together:
/// - `registry`: live validator sessions and their identities
/// - `correlator`: pending check requests awaiting a response
/// - `ledger`: credit owed to each validator
/// - `scheduler`: periodic fan-out of check requests
/// - `aggregator`: verification and bookkeeping of results
/// - `session`: signup handshake and disconnect cleanup
pub mod aggregator;
pub mod correlator;
pub mod ledger;
pub mod registry;
pub mod scheduler;
pub mod session;


pub use aggregator::{CheckContext, DropReason, Outcome, ResultAggregator};
pub use correlator::Correlator;
pub use ledger::CreditLedger;
pub use registry::{ConnectionId, TransportHandle, ValidatorRegistry, ValidatorSession};
pub use scheduler::{Scheduler, SchedulerSettings, TickReport};
pub use session::SessionManager;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;
use vigil::{ValidateReply, ValidatorMessage};

use crate::config::Config;
use crate::database::Store;
use crate::error::HubError;
use crate::notify::Notifier;

/// Tunables of the coordination core
#[derive(Debug, Clone)]
pub struct HubSettings {
    pub scheduler: SchedulerSettings,
    pub credit_unit: u64,
    pub debounce_window: Duration,
    pub outbound_buffer: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            scheduler: SchedulerSettings::default(),
            credit_unit: 1,
            debounce_window: Duration::from_secs(3600),
            outbound_buffer: 256,
        }
    }
}

impl From<&Config> for HubSettings {
    fn from(config: &Config) -> Self {
        Self {
            scheduler: SchedulerSettings {
                tick: config.scheduler.tick(),
                pending_max_age: config.scheduler.pending_max_age(),
                max_in_flight_per_validator: config.scheduler.max_in_flight_per_validator,
            },
            credit_unit: config.ledger.credit_unit,
            debounce_window: Duration::from_secs(config.alerts.debounce_seconds),
            outbound_buffer: config.server.outbound_buffer.max(1),
        }
    }
}

pub struct Hub {
    settings: HubSettings,
    store: Arc<dyn Store>,
    registry: Arc<ValidatorRegistry>,
    correlator: Arc<Correlator<ValidateReply>>,
    ledger: Arc<CreditLedger>,
    aggregator: Arc<ResultAggregator>,
    sessions: SessionManager,
    scheduler: Arc<Scheduler>,
}

impl Hub {
    /// Build the hub, seeding identities and balances from the store
    pub async fn new(settings: HubSettings, store: Arc<dyn Store>, notifier: Arc<dyn Notifier>) -> Result<Arc<Self>> {
        let known = store.known_validators().await?;
        info!("Loaded {} known validator identities", known.len());

        let registry = Arc::new(ValidatorRegistry::with_identities(
            known.iter().map(|v| (v.public_key.clone(), v.uuid)),
        ));
        let ledger = Arc::new(CreditLedger::from_balances(
            known.iter().map(|v| (v.uuid, v.pending_credit)),
        ));
        let correlator = Arc::new(Correlator::new());

        let aggregator = Arc::new(ResultAggregator::new(
            store.clone(),
            notifier,
            ledger.clone(),
            settings.credit_unit,
            settings.debounce_window,
        ));
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            registry.clone(),
            correlator.clone(),
            aggregator.clone(),
            settings.scheduler.clone(),
        ));
        let sessions = SessionManager::new(registry.clone(), store.clone());

        Ok(Arc::new(Self { settings, store, registry, correlator, ledger, aggregator, sessions, scheduler }))
    }

    pub fn settings(&self) -> &HubSettings {
        &self.settings
    }

    pub fn scheduler(&self) -> Arc<Scheduler> {
        self.scheduler.clone()
    }

    /// Handle one text frame received on `transport`
    pub async fn dispatch(&self, transport: &TransportHandle, text: &str) {
        let message = match vigil::decode_validator_message(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(connection = %transport.connection(), "Dropping frame: {e}");
                return;
            }
        };

        match message {
            ValidatorMessage::Signup(signup) => {
                self.sessions.handle_signup(transport, signup).await;
            }
            ValidatorMessage::Validate(reply) => {
                let correlation_id = reply.callback_id.clone();
                self.correlator.resolve(&correlation_id, reply).await;
            }
        }
    }

    /// Called by the transport once a connection is gone. Returns every
    /// validator whose session was bound to it.
    pub async fn connection_closed(&self, connection: ConnectionId) -> Vec<Uuid> {
        self.sessions.handle_close(connection).await
    }

    pub async fn active_validators(&self) -> Vec<ValidatorSession> {
        self.registry.list_active().await
    }

    pub async fn credit_snapshot(&self) -> HashMap<Uuid, u64> {
        self.ledger.snapshot().await
    }

    pub async fn pending_requests(&self) -> usize {
        self.correlator.len().await
    }

    /// Enable or disable a target; takes effect on the next tick
    pub async fn set_target_enabled(&self, target: Uuid, enabled: bool) -> Result<bool> {
        let changed = self.store.set_target_enabled(target, enabled).await?;
        if changed {
            info!(%target, enabled, "Target toggled");
        }
        Ok(changed)
    }

    /// Zero a validator's balance after an external payout, returning the
    /// amount that was settled
    pub async fn settle_credit(&self, validator: Uuid) -> Result<u64> {
        self.aggregator.settle(validator).await
    }

    /// Serve validators on `listener` and run the scheduler until `shutdown`
    pub async fn run(self: Arc<Self>, listener: TcpListener, shutdown: watch::Receiver<bool>) -> Result<(), HubError> {
        let scheduler = tokio::spawn(self.scheduler().run(shutdown.clone()));

        let served = crate::transport::serve(listener, self.clone(), shutdown).await;

        if let Err(e) = scheduler.await {
            tracing::error!("Scheduler task failed: {e}");
        }
        served
    }
}
