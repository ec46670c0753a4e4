use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Row, params};
use uuid::Uuid;

use super::models::{
    CheckResult, MonitoredTarget, Owner, OutageRecord, ValidatorRecord, i64_to_timestamp,
    timestamp_to_i64,
};
use crate::pool::{LibsqlManager, LibsqlPool};

/// Persistence operations the coordination core depends on
#[async_trait]
pub trait Store: Send + Sync {
    /// Get all targets that should be checked
    async fn list_enabled_targets(&self) -> Result<Vec<MonitoredTarget>>;

    /// Get a target by UUID
    async fn read_target(&self, uuid: Uuid) -> Result<Option<MonitoredTarget>>;

    /// Insert or replace a target
    async fn save_target(&self, target: &MonitoredTarget) -> Result<()>;

    /// Enable or disable a target. Returns false if the target does not exist
    async fn set_target_enabled(&self, uuid: Uuid, enabled: bool) -> Result<bool>;

    /// Stamp `sent_at` as the target's last alert, but only if no alert went
    /// out after `not_after`. Returns whether the stamp was written, which
    /// makes the caller the one that sends the alert.
    async fn update_target_alert(
        &self,
        uuid: Uuid,
        sent_at: DateTime<Utc>,
        not_after: DateTime<Utc>,
    ) -> Result<bool>;

    /// Get an owner by UUID
    async fn read_owner(&self, uuid: Uuid) -> Result<Option<Owner>>;

    /// Insert or replace an owner
    async fn save_owner(&self, owner: &Owner) -> Result<()>;

    /// Append a verified health sample
    async fn create_health_sample(&self, result: &CheckResult) -> Result<i64>;

    /// Most recent health samples for a target, newest first
    async fn recent_health_samples(&self, target: Uuid, limit: usize) -> Result<Vec<CheckResult>>;

    /// Append an outage log entry
    async fn record_outage(&self, outage: &OutageRecord) -> Result<i64>;

    /// Outage log of a target, oldest first
    async fn outages_for_target(&self, target: Uuid) -> Result<Vec<OutageRecord>>;

    /// Persist a validator identity, refreshing its ip if the key is known
    async fn upsert_validator(&self, validator: &ValidatorRecord) -> Result<()>;

    /// All validator identities ever registered
    async fn known_validators(&self) -> Result<Vec<ValidatorRecord>>;

    /// Add to a validator's unsettled credit
    async fn increment_credit(&self, validator: Uuid, amount: u64) -> Result<()>;

    /// Zero a validator's unsettled credit, returning what it was
    async fn reset_credit(&self, validator: Uuid) -> Result<u64>;
}

/// LibSQL store implementation
pub struct LibsqlStore {
    pool: LibsqlPool,
}

impl LibsqlStore {
    /// Create a new store from a pool
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>> {
        self.pool.get().await.map_err(|e| anyhow::anyhow!("Failed to get connection: {e}"))
    }

    fn target_from_row(row: &Row) -> Result<MonitoredTarget> {
        let uuid: String = row.get(0)?;
        let owner: String = row.get(2)?;
        Ok(MonitoredTarget {
            uuid: Uuid::parse_str(&uuid)?,
            url: row.get(1)?,
            owner_uuid: Uuid::parse_str(&owner)?,
            enabled: row.get::<i64>(3)? != 0,
            last_alert_sent_at: row.get::<Option<i64>>(4)?.map(i64_to_timestamp),
        })
    }

    fn validator_from_row(row: &Row) -> Result<ValidatorRecord> {
        let uuid: String = row.get(0)?;
        Ok(ValidatorRecord {
            uuid: Uuid::parse_str(&uuid)?,
            public_key: row.get(1)?,
            ip: row.get(2)?,
            pending_credit: row.get::<i64>(3)?.max(0) as u64,
            registered_at: i64_to_timestamp(row.get(4)?),
        })
    }
}

const TARGET_COLUMNS: &str = "uuid, url, owner_uuid, enabled, last_alert_sent_at";

#[async_trait]
impl Store for LibsqlStore {
    async fn list_enabled_targets(&self) -> Result<Vec<MonitoredTarget>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(&format!("SELECT {TARGET_COLUMNS} FROM targets WHERE enabled = 1 ORDER BY rowid"), ())
            .await?;

        let mut targets = Vec::new();
        while let Some(row) = rows.next().await? {
            targets.push(Self::target_from_row(&row)?);
        }

        Ok(targets)
    }

    async fn read_target(&self, uuid: Uuid) -> Result<Option<MonitoredTarget>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                &format!("SELECT {TARGET_COLUMNS} FROM targets WHERE uuid = ?"),
                params![uuid.to_string()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::target_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn save_target(&self, target: &MonitoredTarget) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO targets (uuid, url, owner_uuid, enabled, last_alert_sent_at) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(uuid) DO UPDATE SET url = excluded.url, owner_uuid = excluded.owner_uuid,
                enabled = excluded.enabled, last_alert_sent_at = excluded.last_alert_sent_at",
            params![
                target.uuid.to_string(),
                target.url.clone(),
                target.owner_uuid.to_string(),
                if target.enabled { 1 } else { 0 },
                target.last_alert_sent_at.map(timestamp_to_i64)
            ],
        )
        .await?;
        Ok(())
    }

    async fn set_target_enabled(&self, uuid: Uuid, enabled: bool) -> Result<bool> {
        let conn = self.get_conn().await?;
        let changed = conn
            .execute(
                "UPDATE targets SET enabled = ? WHERE uuid = ?",
                params![if enabled { 1 } else { 0 }, uuid.to_string()],
            )
            .await?;
        Ok(changed > 0)
    }

    async fn update_target_alert(
        &self,
        uuid: Uuid,
        sent_at: DateTime<Utc>,
        not_after: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.get_conn().await?;
        let stamped = conn
            .execute(
                "UPDATE targets SET last_alert_sent_at = ?1
                 WHERE uuid = ?2 AND (last_alert_sent_at IS NULL OR last_alert_sent_at <= ?3)",
                params![timestamp_to_i64(sent_at), uuid.to_string(), timestamp_to_i64(not_after)],
            )
            .await?;
        Ok(stamped == 1)
    }

    async fn read_owner(&self, uuid: Uuid) -> Result<Option<Owner>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query("SELECT uuid, email FROM owners WHERE uuid = ?", params![uuid.to_string()])
            .await?;

        match rows.next().await? {
            Some(row) => {
                let uuid: String = row.get(0)?;
                Ok(Some(Owner { uuid: Uuid::parse_str(&uuid)?, email: row.get(1)? }))
            }
            None => Ok(None),
        }
    }

    async fn save_owner(&self, owner: &Owner) -> Result<()> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO owners (uuid, email) VALUES (?, ?)
             ON CONFLICT(uuid) DO UPDATE SET email = excluded.email",
            params![owner.uuid.to_string(), owner.email.clone()],
        )
        .await?;
        Ok(())
    }

    async fn create_health_sample(&self, result: &CheckResult) -> Result<i64> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO health_samples (target_uuid, validator_uuid, status, latency_ms, location, observed_at) VALUES (?, ?, ?, ?, ?, ?)",
            params![
                result.target_uuid.to_string(),
                result.validator_uuid.to_string(),
                result.status.to_string(),
                result.latency_ms as i64,
                result.location.clone(),
                timestamp_to_i64(result.observed_at)
            ],
        )
        .await?;

        Ok(conn.last_insert_rowid())
    }

    async fn recent_health_samples(&self, target: Uuid, limit: usize) -> Result<Vec<CheckResult>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT target_uuid, validator_uuid, status, latency_ms, location, observed_at FROM health_samples WHERE target_uuid = ? ORDER BY id DESC LIMIT ?",
                params![target.to_string(), limit as i64],
            )
            .await?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await? {
            let target_uuid: String = row.get(0)?;
            let validator_uuid: String = row.get(1)?;
            let status: String = row.get(2)?;

            results.push(CheckResult {
                target_uuid: Uuid::parse_str(&target_uuid)?,
                validator_uuid: Uuid::parse_str(&validator_uuid)?,
                status: status.parse().map_err(anyhow::Error::msg)?,
                latency_ms: row.get::<i64>(3)?.max(0) as u64,
                location: row.get(4)?,
                observed_at: i64_to_timestamp(row.get(5)?),
            });
        }

        Ok(results)
    }

    async fn record_outage(&self, outage: &OutageRecord) -> Result<i64> {
        let conn = self.get_conn().await?;
        conn.execute(
            "INSERT INTO outages (target_uuid, validator_uuid, location, observed_at) VALUES (?, ?, ?, ?)",
            params![
                outage.target_uuid.to_string(),
                outage.validator_uuid.to_string(),
                outage.location.clone(),
                timestamp_to_i64(outage.observed_at)
            ],
        )
        .await?;

        Ok(conn.last_insert_rowid())
    }

    async fn outages_for_target(&self, target: Uuid) -> Result<Vec<OutageRecord>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT target_uuid, validator_uuid, location, observed_at FROM outages WHERE target_uuid = ? ORDER BY id",
                params![target.to_string()],
            )
            .await?;

        let mut outages = Vec::new();
        while let Some(row) = rows.next().await? {
            let target_uuid: String = row.get(0)?;
            let validator_uuid: String = row.get(1)?;

            outages.push(OutageRecord {
                target_uuid: Uuid::parse_str(&target_uuid)?,
                validator_uuid: Uuid::parse_str(&validator_uuid)?,
                location: row.get(2)?,
                observed_at: i64_to_timestamp(row.get(3)?),
            });
        }

        Ok(outages)
    }

    async fn upsert_validator(&self, validator: &ValidatorRecord) -> Result<()> {
        let conn = self.get_conn().await?;
        let now = timestamp_to_i64(Utc::now());
        conn.execute(
            "INSERT INTO validators (uuid, public_key, ip, pending_credit, registered_at, last_seen_at) VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(public_key) DO UPDATE SET ip = excluded.ip, last_seen_at = excluded.last_seen_at",
            params![
                validator.uuid.to_string(),
                validator.public_key.clone(),
                validator.ip.clone(),
                validator.pending_credit as i64,
                timestamp_to_i64(validator.registered_at),
                now
            ],
        )
        .await
        .context("Failed to upsert validator")?;
        Ok(())
    }

    async fn known_validators(&self) -> Result<Vec<ValidatorRecord>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT uuid, public_key, ip, pending_credit, registered_at FROM validators ORDER BY registered_at",
                (),
            )
            .await?;

        let mut validators = Vec::new();
        while let Some(row) = rows.next().await? {
            validators.push(Self::validator_from_row(&row)?);
        }

        Ok(validators)
    }

    async fn increment_credit(&self, validator: Uuid, amount: u64) -> Result<()> {
        let conn = self.get_conn().await?;
        let changed = conn
            .execute(
                "UPDATE validators SET pending_credit = pending_credit + ? WHERE uuid = ?",
                params![amount as i64, validator.to_string()],
            )
            .await?;

        if changed == 0 {
            anyhow::bail!("No validator row for {validator}");
        }
        Ok(())
    }

    async fn reset_credit(&self, validator: Uuid) -> Result<u64> {
        let conn = self.get_conn().await?;
        let tx = conn.transaction().await?;

        let mut rows = tx
            .query("SELECT pending_credit FROM validators WHERE uuid = ?", params![validator.to_string()])
            .await?;
        let previous = match rows.next().await? {
            Some(row) => row.get::<i64>(0)?.max(0) as u64,
            None => return Ok(0),
        };
        drop(rows);

        tx.execute("UPDATE validators SET pending_credit = 0 WHERE uuid = ?", params![validator.to_string()])
            .await?;
        tx.commit().await?;

        Ok(previous)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::database::initialize_database;
    use tempfile::TempDir;
    use vigil::CheckStatus;

    /// Store backed by a fresh database file; keep the `TempDir` alive
    pub(crate) async fn create_test_store() -> Result<(LibsqlStore, TempDir)> {
        let temp_dir = tempfile::tempdir()?;
        let db_path = temp_dir.path().join("test.db");
        let pool = crate::pool::open_pool(&db_path.to_string_lossy(), 4).await?;

        let conn = pool.get().await.map_err(|e| anyhow::anyhow!("{e}"))?;
        initialize_database(&conn).await?;
        drop(conn);

        Ok((LibsqlStore::new_from_pool(pool), temp_dir))
    }

    async fn saved_owner(store: &LibsqlStore) -> Result<Uuid> {
        let owner = Owner { uuid: Uuid::new_v4(), email: "owner@example.com".into() };
        store.save_owner(&owner).await?;
        Ok(owner.uuid)
    }

    #[tokio::test]
    async fn test_only_enabled_targets_are_listed() -> Result<()> {
        let (store, _dir) = create_test_store().await?;
        let owner = saved_owner(&store).await?;
        let enabled = MonitoredTarget::new("https://a.example", owner);
        let mut disabled = MonitoredTarget::new("https://b.example", owner);
        disabled.enabled = false;

        store.save_target(&enabled).await?;
        store.save_target(&disabled).await?;

        let listed = store.list_enabled_targets().await?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].uuid, enabled.uuid);

        assert!(store.set_target_enabled(disabled.uuid, true).await?);
        assert_eq!(store.list_enabled_targets().await?.len(), 2);
        assert!(!store.set_target_enabled(Uuid::new_v4(), true).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_alert_stamp_respects_window() -> Result<()> {
        let (store, _dir) = create_test_store().await?;
        let target = MonitoredTarget::new("https://a.example", saved_owner(&store).await?);
        store.save_target(&target).await?;

        let first = i64_to_timestamp(1_700_000_000);
        assert!(store.update_target_alert(target.uuid, first, first - chrono::Duration::hours(1)).await?);
        let loaded = store.read_target(target.uuid).await?.unwrap();
        assert_eq!(loaded.last_alert_sent_at, Some(first));

        // ten minutes later, still inside a one hour window
        let soon = first + chrono::Duration::minutes(10);
        assert!(!store.update_target_alert(target.uuid, soon, soon - chrono::Duration::hours(1)).await?);
        assert_eq!(store.read_target(target.uuid).await?.unwrap().last_alert_sent_at, Some(first));

        let later = first + chrono::Duration::hours(1);
        assert!(store.update_target_alert(target.uuid, later, later - chrono::Duration::hours(1)).await?);
        assert_eq!(store.read_target(target.uuid).await?.unwrap().last_alert_sent_at, Some(later));

        assert!(!store.update_target_alert(Uuid::new_v4(), later, later).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_credit_increments_and_resets() -> Result<()> {
        let (store, _dir) = create_test_store().await?;
        let validator = ValidatorRecord {
            uuid: Uuid::new_v4(),
            public_key: "aa".repeat(32),
            ip: "127.0.0.1".into(),
            pending_credit: 0,
            registered_at: Utc::now(),
        };
        store.upsert_validator(&validator).await?;

        store.increment_credit(validator.uuid, 3).await?;
        store.increment_credit(validator.uuid, 2).await?;
        assert_eq!(store.known_validators().await?[0].pending_credit, 5);

        assert_eq!(store.reset_credit(validator.uuid).await?, 5);
        assert_eq!(store.known_validators().await?[0].pending_credit, 0);

        assert!(store.increment_credit(Uuid::new_v4(), 1).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_upsert_keeps_identity_for_known_key() -> Result<()> {
        let (store, _dir) = create_test_store().await?;
        let first = ValidatorRecord {
            uuid: Uuid::new_v4(),
            public_key: "bb".repeat(32),
            ip: "10.0.0.1".into(),
            pending_credit: 0,
            registered_at: Utc::now(),
        };
        store.upsert_validator(&first).await?;
        store
            .upsert_validator(&ValidatorRecord { uuid: Uuid::new_v4(), ip: "10.0.0.2".into(), ..first.clone() })
            .await?;

        let known = store.known_validators().await?;
        assert_eq!(known.len(), 1);
        assert_eq!(known[0].uuid, first.uuid);
        assert_eq!(known[0].ip, "10.0.0.2");
        Ok(())
    }

    #[tokio::test]
    async fn test_health_samples_newest_first() -> Result<()> {
        let (store, _dir) = create_test_store().await?;
        let target = Uuid::new_v4();
        let validator = Uuid::new_v4();

        for (latency, status) in [(10, CheckStatus::Good), (900, CheckStatus::Bad)] {
            store
                .create_health_sample(&CheckResult {
                    target_uuid: target,
                    validator_uuid: validator,
                    status,
                    latency_ms: latency,
                    location: Some("Amsterdam".into()),
                    observed_at: Utc::now(),
                })
                .await?;
        }

        let samples = store.recent_health_samples(target, 10).await?;
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].status, CheckStatus::Bad);
        assert_eq!(samples[0].latency_ms, 900);
        assert_eq!(samples[1].location.as_deref(), Some("Amsterdam"));
        Ok(())
    }
}
