//! ---
//! prc_section: "02-metadata"
//! prc_subsection: "module"
//! prc_type: "source"
//! prc_scope: "code"
//! prc_description: "Metadata client capability and shard group catalog."
//! prc_version: "v0.0.0-prealpha"
//! prc_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Narrow view of the cluster metadata store consumed by the precreation service.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub mod store;

pub use store::{InMemoryMetaStore, ShardGroupInfo};

/// Result alias used throughout the metadata crate.
pub type Result<T> = std::result::Result<T, MetaError>;

/// Errors reported by a metadata collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetaError {
    /// The referenced database does not exist.
    #[error("database not found: {0}")]
    DatabaseNotFound(String),
    /// The referenced retention policy does not exist on the database.
    #[error("retention policy not found: {database}.{policy}")]
    RetentionPolicyNotFound {
        /// Database that was searched.
        database: String,
        /// Missing retention policy name.
        policy: String,
    },
    /// No shard group with the given id exists on the retention policy.
    #[error("shard group not found: {0}")]
    ShardGroupNotFound(u64),
    /// Retention policies need a positive shard group duration.
    #[error("shard group duration must be positive")]
    InvalidShardGroupDuration,
    /// The metadata service could not be reached or refused the request.
    #[error("metadata service unavailable: {0}")]
    Unavailable(String),
    /// The client has been closed.
    #[error("metadata client closed")]
    Closed,
}

/// Capability required by the precreation service.
///
/// Implementations return once every shard group intersecting `[now, cutoff]`
/// is known to exist, or with the reason it could not be created. Groups that
/// already exist are not an error, and overlapping ranges across calls must be
/// safe.
#[async_trait]
pub trait MetadataClient: Send + Sync + 'static {
    /// Ensure shard groups exist ahead of `now`, up to `cutoff`.
    async fn precreate_shard_groups(&self, now: DateTime<Utc>, cutoff: DateTime<Utc>)
        -> Result<()>;
}

#[async_trait]
impl<T: MetadataClient + ?Sized> MetadataClient for Arc<T> {
    async fn precreate_shard_groups(
        &self,
        now: DateTime<Utc>,
        cutoff: DateTime<Utc>,
    ) -> Result<()> {
        (**self).precreate_shard_groups(now, cutoff).await
    }
}
