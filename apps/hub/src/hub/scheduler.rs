use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};
use vigil::{HubMessage, ValidateReply, ValidateRequest};

use super::aggregator::{CheckContext, ResultAggregator};
use super::correlator::{Continuation, Correlator};
use super::registry::{ValidatorRegistry, ValidatorSession};
use crate::database::Store;
use crate::database::models::MonitoredTarget;

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub tick: Duration,
    pub pending_max_age: Duration,
    /// 0 means no cap
    pub max_in_flight_per_validator: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(10),
            pending_max_age: Duration::from_secs(300),
            max_in_flight_per_validator: 0,
        }
    }
}

/// Counters describing one tick
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub expired: usize,
    pub dispatched: usize,
    /// Pairs skipped because the validator was at its in-flight cap
    pub throttled: usize,
    /// Requests that could not be handed to the transport
    pub failed: usize,
}

/// Fan-out scheduler - sends every enabled target to every live validator
pub struct Scheduler {
    store: Arc<dyn Store>,
    registry: Arc<ValidatorRegistry>,
    correlator: Arc<Correlator<ValidateReply>>,
    aggregator: Arc<ResultAggregator>,
    settings: SchedulerSettings,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<ValidatorRegistry>,
        correlator: Arc<Correlator<ValidateReply>>,
        aggregator: Arc<ResultAggregator>,
        settings: SchedulerSettings,
    ) -> Self {
        Self { store, registry, correlator, aggregator, settings }
    }

    /// Tick until `shutdown` flips to true
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut timer = interval(self.settings.tick);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Scheduler started (tick every {:?})", self.settings.tick);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    let report = self.tick().await;
                    if report.dispatched > 0 || report.expired > 0 || report.failed > 0 {
                        debug!(?report, "Scheduler tick complete");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Scheduler stopped");
    }

    /// Run one scheduling pass
    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport {
            expired: self.correlator.expire(self.settings.pending_max_age).await,
            ..TickReport::default()
        };
        if report.expired > 0 {
            debug!("Expired {} unanswered check requests", report.expired);
        }

        let targets = match self.store.list_enabled_targets().await {
            Ok(targets) => targets,
            Err(e) => {
                error!("Failed to load targets, skipping tick: {e:#}");
                return report;
            }
        };
        let validators = self.registry.list_active().await;
        if targets.is_empty() || validators.is_empty() {
            return report;
        }

        let cap = self.settings.max_in_flight_per_validator;
        let mut in_flight = if cap > 0 {
            self.correlator.in_flight_counts().await
        } else {
            Default::default()
        };

        for target in &targets {
            if url::Url::parse(&target.url).is_err() {
                warn!("Skipping target {} with malformed url {:?}", target.uuid, target.url);
                continue;
            }

            for validator in &validators {
                if cap > 0 {
                    let count = in_flight.entry(validator.validator_id).or_insert(0);
                    if *count >= cap {
                        report.throttled += 1;
                        continue;
                    }
                    *count += 1;
                }

                if self.dispatch(target, validator).await {
                    report.dispatched += 1;
                } else {
                    report.failed += 1;
                }
            }
        }

        report
    }

    async fn dispatch(&self, target: &MonitoredTarget, validator: &ValidatorSession) -> bool {
        let context = CheckContext {
            target_id: target.uuid,
            target_url: target.url.clone(),
            owner_id: target.owner_uuid,
            validator_id: validator.validator_id,
            public_key: validator.public_key.clone(),
            issued_at: Utc::now(),
        };

        let correlation_id = self
            .correlator
            .create_pending(validator.validator_id, self.continuation(context))
            .await;

        let request = HubMessage::Validate(ValidateRequest {
            url: target.url.clone(),
            callback_id: correlation_id.clone(),
        });

        match validator.transport.try_send(request) {
            Ok(()) => true,
            Err(e) => {
                warn!(validator = %validator.validator_id, "Could not send check request: {e}");
                self.correlator.cancel(&correlation_id).await;
                false
            }
        }
    }

    fn continuation(&self, context: CheckContext) -> Continuation<ValidateReply> {
        let aggregator = self.aggregator.clone();
        Box::new(move |reply: ValidateReply| {
            async move {
                let correlation_id = reply.callback_id.clone();
                aggregator.handle(&correlation_id, &context, reply).await;
            }
            .boxed()
        })
    }
}
