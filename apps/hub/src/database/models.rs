use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vigil::CheckStatus;

/// Endpoint watched by the validator network
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoredTarget {
    pub uuid: Uuid,
    pub url: String,
    pub owner_uuid: Uuid,
    pub enabled: bool,
    pub last_alert_sent_at: Option<DateTime<Utc>>,
}

impl MonitoredTarget {
    /// Create a new enabled target that has never alerted
    pub fn new(url: impl Into<String>, owner_uuid: Uuid) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            url: url.into(),
            owner_uuid,
            enabled: true,
            last_alert_sent_at: None,
        }
    }
}

/// Account owning targets; receives outage alerts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Owner {
    pub uuid: Uuid,
    pub email: String,
}

/// One verified health sample reported by a validator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub target_uuid: Uuid,
    pub validator_uuid: Uuid,
    pub status: CheckStatus,
    pub latency_ms: u64,
    pub location: Option<String>,
    pub observed_at: DateTime<Utc>,
}

/// Outage log entry, written for every verified `Bad` result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutageRecord {
    pub target_uuid: Uuid,
    pub validator_uuid: Uuid,
    pub location: Option<String>,
    pub observed_at: DateTime<Utc>,
}

/// Persisted validator identity and its unsettled credit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorRecord {
    pub uuid: Uuid,
    pub public_key: String,
    pub ip: String,
    pub pending_credit: u64,
    pub registered_at: DateTime<Utc>,
}

/// Convert a timestamp to Unix seconds
pub fn timestamp_to_i64(time: DateTime<Utc>) -> i64 {
    time.timestamp()
}

/// Convert Unix seconds back to a timestamp
pub fn i64_to_timestamp(timestamp: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(timestamp, 0).single().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_result_serializes_timestamp_as_rfc3339() {
        let result = CheckResult {
            target_uuid: Uuid::nil(),
            validator_uuid: Uuid::nil(),
            status: CheckStatus::Bad,
            latency_ms: 120,
            location: None,
            observed_at: i64_to_timestamp(1_700_000_000),
        };

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["observed_at"], "2023-11-14T22:13:20Z");

        let back: CheckResult = serde_json::from_value(value).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn test_seconds_conversion_drops_sub_second_part() {
        let at = i64_to_timestamp(1_700_000_000) + chrono::Duration::milliseconds(750);
        assert_eq!(i64_to_timestamp(timestamp_to_i64(at)), i64_to_timestamp(1_700_000_000));
    }
}
