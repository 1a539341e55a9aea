//! ---
//! prc_section: "04-precreation"
//! prc_subsection: "module"
//! prc_type: "source"
//! prc_scope: "code"
//! prc_description: "Shard group precreation scheduling."
//! prc_version: "v0.0.0-prealpha"
//! prc_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Background service ensuring upcoming shard groups exist before writes reach them.

mod service;

pub use service::PrecreationService;

use precreator_meta::MetaError;

/// Result alias used throughout the precreation crate.
pub type Result<T> = std::result::Result<T, PrecreatorError>;

/// Error type for the precreation service.
#[derive(Debug, thiserror::Error)]
pub enum PrecreatorError {
    /// Construction parameters were rejected.
    #[error("invalid precreator configuration: {0}")]
    Config(String),
    /// The metadata store failed to precreate shard groups.
    #[error("shard group precreation failed: {0}")]
    Precreation(#[from] MetaError),
    /// An invalid lifecycle transition was requested.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// Invalid lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    /// `open` was called while the loop is already running.
    #[error("precreation service is already running")]
    AlreadyRunning,
    /// `open` was called outside of a tokio runtime.
    #[error("precreation service must be opened inside a tokio runtime")]
    NoRuntime,
}
