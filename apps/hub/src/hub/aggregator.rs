//! Verified check results: health samples, credit and outage alerts.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use vigil::crypto::reply_message;
use vigil::{CheckStatus, ValidateReply};

use super::ledger::CreditLedger;
use crate::database::Store;
use crate::database::models::{CheckResult, MonitoredTarget, OutageRecord};
use crate::notify::Notifier;

/// What a check request was about, fixed when the request is issued
#[derive(Debug, Clone)]
pub struct CheckContext {
    pub target_id: Uuid,
    pub target_url: String,
    pub owner_id: Uuid,
    pub validator_id: Uuid,
    /// Hex public key the validator registered with
    pub public_key: String,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    BadSignature,
    ValidatorMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Dropped(DropReason),
    Recorded { alerted: bool },
}

pub struct ResultAggregator {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    ledger: Arc<CreditLedger>,
    credit_unit: u64,
    debounce_window: Duration,
    /// Held shared while a credit lands in memory and in the store, and
    /// exclusively while a balance is settled
    settlement: RwLock<()>,
}

impl ResultAggregator {
    pub fn new(
        store: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
        ledger: Arc<CreditLedger>,
        credit_unit: u64,
        debounce_window: std::time::Duration,
    ) -> Self {
        Self {
            store,
            notifier,
            ledger,
            credit_unit,
            debounce_window: Duration::from_std(debounce_window).unwrap_or(Duration::hours(1)),
            settlement: RwLock::new(()),
        }
    }

    pub async fn handle(&self, correlation_id: &str, context: &CheckContext, reply: ValidateReply) -> Outcome {
        self.handle_at(correlation_id, context, reply, Utc::now()).await
    }

    /// Process a response as if it arrived at `now`
    pub async fn handle_at(
        &self,
        correlation_id: &str,
        context: &CheckContext,
        reply: ValidateReply,
        now: DateTime<Utc>,
    ) -> Outcome {
        if reply.validator_id != context.validator_id.to_string() {
            debug!(
                correlation_id,
                expected = %context.validator_id,
                claimed = %reply.validator_id,
                "Dropping response from a different validator"
            );
            return Outcome::Dropped(DropReason::ValidatorMismatch);
        }

        let message = reply_message(correlation_id);
        if !vigil::verify(&message, &context.public_key, &reply.signed_message) {
            debug!(correlation_id, validator = %context.validator_id, "Dropping response with invalid signature");
            return Outcome::Dropped(DropReason::BadSignature);
        }

        let result = CheckResult {
            target_uuid: context.target_id,
            validator_uuid: context.validator_id,
            status: reply.status,
            latency_ms: reply.latency_ms(),
            location: reply.location.clone(),
            observed_at: now,
        };

        if let Err(e) = self.store.create_health_sample(&result).await {
            error!("Failed to store health sample for {}: {e:#}", context.target_id);
        }

        let balance = self.credit(context.validator_id).await;
        debug!(
            validator = %context.validator_id,
            url = %context.target_url,
            balance,
            status = %result.status,
            round_trip_ms = (now - context.issued_at).num_milliseconds(),
            "Credited check"
        );

        let alerted = match result.status {
            CheckStatus::Good => false,
            CheckStatus::Bad => self.handle_outage(context, &result, now).await,
        };

        Outcome::Recorded { alerted }
    }

    async fn credit(&self, validator: Uuid) -> u64 {
        let _settlement = self.settlement.read().await;
        let balance = self.ledger.credit(validator, self.credit_unit).await;
        if let Err(e) = self.store.increment_credit(validator, self.credit_unit).await {
            error!("Failed to persist credit for {validator}: {e:#}");
        }
        balance
    }

    /// Zero a validator's balance in memory and in the store, returning the
    /// amount settled. No credit can land between the two resets.
    pub async fn settle(&self, validator: Uuid) -> Result<u64> {
        let _settlement = self.settlement.write().await;
        let persisted = self.store.reset_credit(validator).await?;
        let in_memory = self.ledger.reset(validator).await;
        info!(%validator, persisted, in_memory, "Credit settled");
        Ok(in_memory.max(persisted))
    }

    async fn handle_outage(&self, context: &CheckContext, result: &CheckResult, now: DateTime<Utc>) -> bool {
        let outage = OutageRecord {
            target_uuid: result.target_uuid,
            validator_uuid: result.validator_uuid,
            location: result.location.clone(),
            observed_at: now,
        };
        if let Err(e) = self.store.record_outage(&outage).await {
            error!("Failed to record outage for {}: {e:#}", context.target_id);
        }

        // the conditional stamp decides which of several concurrent results alerts
        match self.store.update_target_alert(context.target_id, now, now - self.debounce_window).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("Outage alert for {} suppressed by debounce window", context.target_id);
                return false;
            }
            Err(e) => {
                error!("Failed to stamp alert time on {}: {e:#}", context.target_id);
                return false;
            }
        }

        let owner = match self.store.read_owner(context.owner_id).await {
            Ok(Some(owner)) => owner,
            Ok(None) => {
                warn!("Target {} has no owner {}, alert not sent", context.target_id, context.owner_id);
                return false;
            }
            Err(e) => {
                error!("Failed to load owner of {}: {e:#}", context.target_id);
                return false;
            }
        };

        let target = MonitoredTarget {
            uuid: context.target_id,
            url: context.target_url.clone(),
            owner_uuid: context.owner_id,
            enabled: true,
            last_alert_sent_at: Some(now),
        };

        info!(target = %target.uuid, url = %target.url, "Sending outage alert");
        if let Err(e) = self.notifier.send_outage_alert(&owner, &target, result.location.as_deref()).await {
            error!("Failed to send outage alert for {}: {e:#}", target.uuid);
        }

        true
    }
}
