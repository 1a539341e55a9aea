//! ---
//! prc_section: "02-metadata"
//! prc_subsection: "module"
//! prc_type: "source"
//! prc_scope: "code"
//! prc_description: "Metadata client capability and shard group catalog."
//! prc_version: "v0.0.0-prealpha"
//! prc_owner: "tbd"
//! ---
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use precreator_common::config::DatabaseConfig;
use precreator_common::time::{advance, truncate};
use tracing::{debug, info};

use crate::{MetaError, MetadataClient, Result};

/// Shard group metadata tracked by the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardGroupInfo {
    /// Catalog-wide identifier.
    pub id: u64,
    /// Inclusive start of the covered range.
    pub start_time: DateTime<Utc>,
    /// Exclusive end of the covered range.
    pub end_time: DateTime<Utc>,
    /// Set once the group has been deleted.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ShardGroupInfo {
    /// Whether `timestamp` falls inside `[start_time, end_time)`.
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        self.start_time <= timestamp && timestamp < self.end_time
    }

    /// Whether the group has been deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug)]
struct RetentionPolicy {
    shard_group_duration: Duration,
    shard_groups: Vec<ShardGroupInfo>,
}

impl RetentionPolicy {
    fn live_group_containing(&self, timestamp: DateTime<Utc>) -> Option<&ShardGroupInfo> {
        self.shard_groups
            .iter()
            .find(|group| !group.is_deleted() && group.contains(timestamp))
    }

    fn latest_group(&self) -> Option<&ShardGroupInfo> {
        self.shard_groups.iter().max_by_key(|group| group.end_time)
    }
}

#[derive(Debug, Default)]
struct Catalog {
    databases: IndexMap<String, IndexMap<String, RetentionPolicy>>,
    next_id: u64,
    closed: bool,
}

impl Catalog {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(MetaError::Closed);
        }
        Ok(())
    }

    fn policy_mut(&mut self, database: &str, policy: &str) -> Result<&mut RetentionPolicy> {
        let policies = self
            .databases
            .get_mut(database)
            .ok_or_else(|| MetaError::DatabaseNotFound(database.to_owned()))?;
        policies
            .get_mut(policy)
            .ok_or_else(|| MetaError::RetentionPolicyNotFound {
                database: database.to_owned(),
                policy: policy.to_owned(),
            })
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert_group(
        &mut self,
        database: &str,
        policy: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<ShardGroupInfo> {
        if let Some(existing) = self
            .policy_mut(database, policy)?
            .live_group_containing(timestamp)
        {
            return Ok(existing.clone());
        }
        let id = self.allocate_id();
        let rp = self.policy_mut(database, policy)?;
        let start_time = truncate(timestamp, rp.shard_group_duration);
        let group = ShardGroupInfo {
            id,
            start_time,
            end_time: advance(start_time, rp.shard_group_duration),
            deleted_at: None,
        };
        rp.shard_groups.push(group.clone());
        rp.shard_groups.sort_by_key(|g| g.start_time);
        Ok(group)
    }
}

/// Single-node shard group catalog.
///
/// Serves the daemon's standalone mode and tests. Placement, replication and
/// retention enforcement are not modelled.
#[derive(Debug, Default)]
pub struct InMemoryMetaStore {
    inner: RwLock<Catalog>,
}

impl InMemoryMetaStore {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog holding the configured databases and retention policies.
    pub fn from_config(databases: &IndexMap<String, DatabaseConfig>) -> Result<Self> {
        let store = Self::new();
        for (name, database) in databases {
            store.create_database(name)?;
            for (rp_name, rp) in &database.retention_policies {
                store.create_retention_policy(name, rp_name, rp.shard_group_duration)?;
            }
        }
        Ok(store)
    }

    /// Register a database. Existing databases are left untouched.
    pub fn create_database(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.write();
        inner.ensure_open()?;
        inner.databases.entry(name.to_owned()).or_default();
        Ok(())
    }

    /// Register a retention policy on an existing database.
    pub fn create_retention_policy(
        &self,
        database: &str,
        name: &str,
        shard_group_duration: Duration,
    ) -> Result<()> {
        if shard_group_duration.is_zero() {
            return Err(MetaError::InvalidShardGroupDuration);
        }
        let mut inner = self.inner.write();
        inner.ensure_open()?;
        let policies = inner
            .databases
            .get_mut(database)
            .ok_or_else(|| MetaError::DatabaseNotFound(database.to_owned()))?;
        policies
            .entry(name.to_owned())
            .or_insert_with(|| RetentionPolicy {
                shard_group_duration,
                shard_groups: Vec::new(),
            });
        Ok(())
    }

    /// Return the shard group covering `timestamp`, creating it if needed.
    pub fn create_shard_group(
        &self,
        database: &str,
        policy: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<ShardGroupInfo> {
        let mut inner = self.inner.write();
        inner.ensure_open()?;
        inner.insert_group(database, policy, timestamp)
    }

    /// Mark a shard group as deleted. Deleting an already deleted group keeps
    /// the original deletion time.
    pub fn delete_shard_group(
        &self,
        database: &str,
        policy: &str,
        id: u64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        inner.ensure_open()?;
        let rp = inner.policy_mut(database, policy)?;
        let group = rp
            .shard_groups
            .iter_mut()
            .find(|g| g.id == id)
            .ok_or(MetaError::ShardGroupNotFound(id))?;
        group.deleted_at.get_or_insert(at);
        Ok(())
    }

    /// Snapshot of the shard groups held by a retention policy, ordered by start time.
    pub fn shard_groups(&self, database: &str, policy: &str) -> Result<Vec<ShardGroupInfo>> {
        let inner = self.inner.read();
        let rp = inner
            .databases
            .get(database)
            .ok_or_else(|| MetaError::DatabaseNotFound(database.to_owned()))?
            .get(policy)
            .ok_or_else(|| MetaError::RetentionPolicyNotFound {
                database: database.to_owned(),
                policy: policy.to_owned(),
            })?;
        Ok(rp.shard_groups.clone())
    }

    /// Reject every subsequent call with [`MetaError::Closed`].
    pub fn close(&self) {
        self.inner.write().closed = true;
    }

    fn precreate_locked(&self, now: DateTime<Utc>, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut inner = self.inner.write();
        inner.ensure_open()?;

        let mut pending = Vec::new();
        for (database, policies) in &inner.databases {
            for (policy, rp) in policies {
                let Some(latest) = rp.latest_group() else {
                    continue;
                };
                if latest.is_deleted() || latest.end_time <= now || latest.end_time >= cutoff {
                    continue;
                }
                if rp.live_group_containing(latest.end_time).is_some() {
                    continue;
                }
                pending.push((database.clone(), policy.clone(), latest.end_time));
            }
        }

        for (database, policy, next_start) in &pending {
            let group = inner.insert_group(database, policy, *next_start)?;
            info!(
                database = %database,
                retention_policy = %policy,
                shard_group = group.id,
                start = %group.start_time,
                end = %group.end_time,
                "precreated shard group"
            );
        }
        Ok(pending.len())
    }
}

#[async_trait]
impl MetadataClient for InMemoryMetaStore {
    async fn precreate_shard_groups(
        &self,
        now: DateTime<Utc>,
        cutoff: DateTime<Utc>,
    ) -> Result<()> {
        let created = self.precreate_locked(now, cutoff)?;
        debug!(%now, %cutoff, created, "shard group precreation pass complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};

    const HOUR: Duration = Duration::from_secs(3600);

    fn store_with_policy() -> InMemoryMetaStore {
        let store = InMemoryMetaStore::new();
        store.create_database("db0").unwrap();
        store.create_retention_policy("db0", "rp0", HOUR).unwrap();
        store
    }

    #[test]
    fn create_shard_group_aligns_and_is_idempotent() {
        let store = store_with_policy();
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 10, 25, 0).unwrap();
        let first = store.create_shard_group("db0", "rp0", ts).unwrap();
        assert_eq!(first.start_time, Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());
        assert_eq!(first.end_time - first.start_time, ChronoDuration::hours(1));

        let again = store
            .create_shard_group("db0", "rp0", ts + ChronoDuration::minutes(10))
            .unwrap();
        assert_eq!(first, again);
        assert_eq!(store.shard_groups("db0", "rp0").unwrap().len(), 1);
    }

    #[test]
    fn unknown_targets_are_reported() {
        let store = store_with_policy();
        let ts = Utc::now();
        assert_eq!(
            store.create_shard_group("missing", "rp0", ts).unwrap_err(),
            MetaError::DatabaseNotFound("missing".into())
        );
        assert!(matches!(
            store.create_shard_group("db0", "missing", ts).unwrap_err(),
            MetaError::RetentionPolicyNotFound { .. }
        ));
        assert_eq!(
            store
                .create_retention_policy("db0", "rp1", Duration::ZERO)
                .unwrap_err(),
            MetaError::InvalidShardGroupDuration
        );
    }

    #[test]
    fn deleted_latest_group_is_not_extended() {
        let store = store_with_policy();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 50, 0).unwrap();
        let group = store.create_shard_group("db0", "rp0", now).unwrap();
        store.delete_shard_group("db0", "rp0", group.id, now).unwrap();

        let created = store
            .precreate_locked(now, now + ChronoDuration::minutes(30))
            .unwrap();
        assert_eq!(created, 0);
    }

    #[test]
    fn deleting_unknown_group_is_reported() {
        let store = store_with_policy();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 50, 0).unwrap();
        let group = store.create_shard_group("db0", "rp0", now).unwrap();

        assert_eq!(
            store
                .delete_shard_group("db0", "rp0", group.id + 100, now)
                .unwrap_err(),
            MetaError::ShardGroupNotFound(group.id + 100)
        );
        assert!(!store.shard_groups("db0", "rp0").unwrap()[0].is_deleted());
    }

    #[test]
    fn closed_store_rejects_calls() {
        let store = store_with_policy();
        store.close();
        assert_eq!(store.create_database("db1").unwrap_err(), MetaError::Closed);
        assert_eq!(
            store.precreate_locked(Utc::now(), Utc::now()).unwrap_err(),
            MetaError::Closed
        );
    }
}
