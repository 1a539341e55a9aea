//! ---
//! prc_section: "01-core-functionality"
//! prc_subsection: "module"
//! prc_type: "source"
//! prc_scope: "code"
//! prc_description: "Shared primitives and utilities for the precreator runtime."
//! prc_version: "v0.0.0-prealpha"
//! prc_owner: "tbd"
//! ---
//! Shared primitives for the shard precreator workspace.
//! This crate exposes configuration loading, tracing setup, and the time
//! arithmetic used when computing precreation horizons.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{
    AppConfig, DatabaseConfig, LoadedAppConfig, LoggingConfig, MetricsConfig, PrecreatorConfig,
    RetentionPolicyConfig,
};
pub use logging::{init_tracing, LogFormat};
