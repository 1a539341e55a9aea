//! ---
//! prc_section: "02-metadata"
//! prc_subsection: "module"
//! prc_type: "source"
//! prc_scope: "code"
//! prc_description: "Metadata client capability and shard group catalog."
//! prc_version: "v0.0.0-prealpha"
//! prc_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use indexmap::IndexMap;
use precreator_common::config::{DatabaseConfig, RetentionPolicyConfig};
use precreator_meta::{InMemoryMetaStore, MetadataClient};

const HOUR: Duration = Duration::from_secs(3600);

fn seeded_store() -> InMemoryMetaStore {
    let store = InMemoryMetaStore::new();
    store.create_database("telegraf").unwrap();
    store.create_retention_policy("telegraf", "autogen", HOUR).unwrap();
    store
}

#[tokio::test]
async fn next_group_created_when_latest_ends_inside_horizon() {
    let store = seeded_store();
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 40, 0).unwrap();
    store.create_shard_group("telegraf", "autogen", now).unwrap();

    store
        .precreate_shard_groups(now, now + ChronoDuration::minutes(30))
        .await
        .unwrap();

    let groups = store.shard_groups("telegraf", "autogen").unwrap();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[1].start_time, groups[0].end_time);
    assert_eq!(
        groups[1].start_time,
        Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap()
    );
}

#[tokio::test]
async fn overlapping_calls_do_not_duplicate_groups() {
    let store = seeded_store();
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 40, 0).unwrap();
    store.create_shard_group("telegraf", "autogen", now).unwrap();

    for offset in 0..3 {
        let tick = now + ChronoDuration::minutes(offset);
        store
            .precreate_shard_groups(tick, tick + ChronoDuration::minutes(30))
            .await
            .unwrap();
    }

    assert_eq!(store.shard_groups("telegraf", "autogen").unwrap().len(), 2);
}

#[tokio::test]
async fn nothing_created_when_latest_group_outlasts_cutoff() {
    let store = seeded_store();
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 5, 0).unwrap();
    store.create_shard_group("telegraf", "autogen", now).unwrap();

    store
        .precreate_shard_groups(now, now + ChronoDuration::minutes(30))
        .await
        .unwrap();

    assert_eq!(store.shard_groups("telegraf", "autogen").unwrap().len(), 1);
}

#[tokio::test]
async fn policies_without_groups_are_skipped() {
    let store = seeded_store();
    let now = Utc::now();
    store
        .precreate_shard_groups(now, now + ChronoDuration::hours(2))
        .await
        .unwrap();
    assert!(store.shard_groups("telegraf", "autogen").unwrap().is_empty());
}

#[tokio::test]
async fn shared_store_satisfies_capability() {
    let mut policies = IndexMap::new();
    policies.insert(
        "autogen".to_owned(),
        RetentionPolicyConfig {
            shard_group_duration: HOUR,
        },
    );
    let mut databases = IndexMap::new();
    databases.insert(
        "db0".to_owned(),
        DatabaseConfig {
            retention_policies: policies,
        },
    );
    let store = Arc::new(InMemoryMetaStore::from_config(&databases).unwrap());
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 55, 0).unwrap();
    store.create_shard_group("db0", "autogen", now).unwrap();

    let client: Arc<dyn MetadataClient> = store.clone();
    client
        .precreate_shard_groups(now, now + ChronoDuration::minutes(10))
        .await
        .unwrap();
    assert_eq!(store.shard_groups("db0", "autogen").unwrap().len(), 2);
}
